//! Search query construction.
//!
//! Filters and the free-text term build a small condition tree which is then
//! compiled to case-insensitive regex matchers and evaluated against stored
//! records. The tree replaces the ad hoc nested query objects a document
//! database client would otherwise accumulate.

use anyhow::{Context, Result};
use regex::RegexBuilder;

use crate::models::{Filter, FilterOp, StoredRecord};

/// A boolean search condition over record fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Case-insensitive, unanchored substring/regex match on one field.
    Field { field: String, pattern: String },
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

impl Condition {
    fn field(field: &str, pattern: &str) -> Condition {
        Condition::Field {
            field: field.to_string(),
            pattern: pattern.to_string(),
        }
    }
}

/// Folds filters left to right into an accumulator list whose members are
/// implicitly ANDed.
///
/// The first filter seeds the list and its operator is never read. `AND`
/// appends; `OR` collapses the whole accumulated list into a single `Or`
/// branch together with the new condition, which then becomes the base any
/// further `AND` attaches to. The fold is strictly sequential — it is not a
/// textbook precedence parse, and reorderings change the result.
pub fn fold_filters(filters: &[Filter]) -> Vec<Condition> {
    let mut acc: Vec<Condition> = Vec::new();
    for filter in filters {
        let condition = Condition::field(&filter.field, &filter.value);
        if acc.is_empty() {
            acc.push(condition);
        } else {
            match filter.operator {
                FilterOp::And => acc.push(condition),
                FilterOp::Or => {
                    let mut branches = std::mem::take(&mut acc);
                    branches.push(condition);
                    acc.push(Condition::Or(branches));
                }
            }
        }
    }
    acc
}

/// Builds the final condition from filters plus an optional free-text term.
///
/// The term expands to an `Or` over every searchable field; an empty
/// searchable set silently degrades to filters-only. `None` means the query
/// matches everything.
pub fn build_query(
    filters: &[Filter],
    term: Option<&str>,
    searchable_fields: &[String],
) -> Option<Condition> {
    let term_condition = term
        .filter(|t| !t.is_empty())
        .filter(|_| !searchable_fields.is_empty())
        .map(|t| {
            Condition::Or(
                searchable_fields
                    .iter()
                    .map(|f| Condition::field(f, t))
                    .collect(),
            )
        });

    let folded = fold_filters(filters);

    match (term_condition, folded.is_empty()) {
        (Some(term), false) => {
            let mut all = vec![term];
            all.extend(folded);
            Some(Condition::And(all))
        }
        (Some(term), true) => Some(term),
        (None, false) => {
            if folded.len() > 1 {
                Some(Condition::And(folded))
            } else {
                folded.into_iter().next()
            }
        }
        (None, true) => None,
    }
}

/// A condition with its regexes built, ready to evaluate.
#[derive(Debug)]
enum CompiledCondition {
    Field { field: String, re: regex::Regex },
    And(Vec<CompiledCondition>),
    Or(Vec<CompiledCondition>),
}

impl CompiledCondition {
    fn matches(&self, record: &StoredRecord) -> bool {
        match self {
            CompiledCondition::Field { field, re } => record
                .fields
                .get(field)
                .is_some_and(|value| re.is_match(value)),
            CompiledCondition::And(cs) => cs.iter().all(|c| c.matches(record)),
            CompiledCondition::Or(cs) => cs.iter().any(|c| c.matches(record)),
        }
    }
}

/// A compiled query; `None` inside matches every record.
#[derive(Debug)]
pub struct Query(Option<CompiledCondition>);

impl Query {
    pub fn matches(&self, record: &StoredRecord) -> bool {
        match &self.0 {
            Some(condition) => condition.matches(record),
            None => true,
        }
    }
}

/// Compiles a condition tree. An invalid user-supplied pattern is a
/// reportable input error, not a server fault.
pub fn compile(condition: Option<&Condition>) -> Result<Query> {
    match condition {
        Some(c) => Ok(Query(Some(compile_condition(c)?))),
        None => Ok(Query(None)),
    }
}

fn compile_condition(condition: &Condition) -> Result<CompiledCondition> {
    Ok(match condition {
        Condition::Field { field, pattern } => {
            let re = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .with_context(|| format!("invalid pattern for field '{}': {}", field, pattern))?;
            CompiledCondition::Field {
                field: field.clone(),
                re,
            }
        }
        Condition::And(cs) => CompiledCondition::And(
            cs.iter().map(compile_condition).collect::<Result<Vec<_>>>()?,
        ),
        Condition::Or(cs) => CompiledCondition::Or(
            cs.iter().map(compile_condition).collect::<Result<Vec<_>>>()?,
        ),
    })
}
