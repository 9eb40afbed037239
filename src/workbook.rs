//! Workbook reading for uploaded xlsx files.
//!
//! An xlsx file is a ZIP of XML parts. This module lists sheet names in
//! workbook order and extracts a dense 2-D grid of string cells from a named
//! sheet, resolving shared strings and placing each cell by its `A1`-style
//! reference. Rows before the caller's start row are dropped; rows absent
//! from the XML inside the kept range materialize as empty rows so indices
//! stay aligned with what the user saw in the preview.

use std::io::{Cursor, Read};

use quick_xml::events::Event;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb
/// protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Workbook reading error. Handlers map these to data-shape responses; the
/// reader itself never panics on malformed input.
#[derive(Debug)]
pub enum WorkbookError {
    NotZip(String),
    MissingPart(String),
    SheetNotFound(String),
    Xml(String),
}

impl std::fmt::Display for WorkbookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkbookError::NotZip(e) => write!(f, "not an xlsx archive: {}", e),
            WorkbookError::MissingPart(name) => write!(f, "workbook part missing: {}", name),
            WorkbookError::SheetNotFound(name) => write!(f, "sheet not found: {}", name),
            WorkbookError::Xml(e) => write!(f, "workbook XML error: {}", e),
        }
    }
}

impl std::error::Error for WorkbookError {}

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, WorkbookError> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| WorkbookError::NotZip(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, WorkbookError> {
    let entry = archive
        .by_name(name)
        .map_err(|_| WorkbookError::MissingPart(name.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| WorkbookError::Xml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(WorkbookError::Xml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

/// Lists sheet names in workbook order.
pub fn sheet_names(bytes: &[u8]) -> Result<Vec<String>, WorkbookError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "xl/workbook.xml", MAX_XML_ENTRY_BYTES)?;
    Ok(parse_sheet_entries(&xml)?.into_iter().map(|(name, _)| name).collect())
}

/// Extracts the named sheet as a dense grid of string cells, skipping the
/// first `start_row` rows (zero-based).
pub fn read_grid(
    bytes: &[u8],
    sheet_name: &str,
    start_row: usize,
) -> Result<Vec<Vec<String>>, WorkbookError> {
    let mut archive = open_archive(bytes)?;
    let part = sheet_part_path(&mut archive, sheet_name)?;
    let shared = read_shared_strings(&mut archive)?;
    let sheet_xml = read_zip_entry_bounded(&mut archive, &part, MAX_XML_ENTRY_BYTES)?;
    parse_sheet_grid(&sheet_xml, &shared, start_row)
}

/// Parses `<sheet name=… r:id=…>` entries from `xl/workbook.xml`.
fn parse_sheet_entries(xml: &[u8]) -> Result<Vec<(String, String)>, WorkbookError> {
    let mut entries = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"sheet" {
                    let mut name = String::new();
                    let mut rid = String::new();
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"name" => {
                                name = attr
                                    .unescape_value()
                                    .map_err(|e| WorkbookError::Xml(e.to_string()))?
                                    .into_owned();
                            }
                            b"r:id" => {
                                rid = attr
                                    .unescape_value()
                                    .map_err(|e| WorkbookError::Xml(e.to_string()))?
                                    .into_owned();
                            }
                            _ => {}
                        }
                    }
                    entries.push((name, rid));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(WorkbookError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(entries)
}

/// Resolves a sheet name to its part path through the workbook relationships.
fn sheet_part_path(archive: &mut Archive<'_>, sheet_name: &str) -> Result<String, WorkbookError> {
    let workbook_xml = read_zip_entry_bounded(archive, "xl/workbook.xml", MAX_XML_ENTRY_BYTES)?;
    let rid = parse_sheet_entries(&workbook_xml)?
        .into_iter()
        .find(|(name, _)| name == sheet_name)
        .map(|(_, rid)| rid)
        .ok_or_else(|| WorkbookError::SheetNotFound(sheet_name.to_string()))?;

    let rels_xml =
        read_zip_entry_bounded(archive, "xl/_rels/workbook.xml.rels", MAX_XML_ENTRY_BYTES)?;
    let mut target = String::new();
    let mut reader = quick_xml::Reader::from_reader(rels_xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"Relationship" {
                    let mut id = String::new();
                    let mut t = String::new();
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"Id" => {
                                id = attr
                                    .unescape_value()
                                    .map_err(|e| WorkbookError::Xml(e.to_string()))?
                                    .into_owned();
                            }
                            b"Target" => {
                                t = attr
                                    .unescape_value()
                                    .map_err(|e| WorkbookError::Xml(e.to_string()))?
                                    .into_owned();
                            }
                            _ => {}
                        }
                    }
                    if id == rid {
                        target = t;
                        break;
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(WorkbookError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if target.is_empty() {
        return Err(WorkbookError::SheetNotFound(sheet_name.to_string()));
    }

    // Targets are relative to xl/ unless written as an absolute part name.
    if let Some(stripped) = target.strip_prefix('/') {
        Ok(stripped.to_string())
    } else {
        Ok(format!("xl/{}", target))
    }
}

/// Reads `xl/sharedStrings.xml` if present. Rich-text runs inside one `<si>`
/// are concatenated into a single string.
fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, WorkbookError> {
    let xml = match read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES) {
        Ok(xml) => xml,
        Err(WorkbookError::MissingPart(_)) => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut strings: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut in_si = false;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = true;
                    strings.push(String::new());
                }
                b"t" if in_si => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                let text = te.unescape().unwrap_or_default();
                if let Some(last) = strings.last_mut() {
                    last.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => in_si = false,
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(WorkbookError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Cell type attribute (`t=`) on a `<c>` element.
#[derive(Clone, Copy, PartialEq)]
enum CellKind {
    Plain,
    SharedString,
    InlineString,
    Boolean,
}

fn parse_sheet_grid(
    xml: &[u8],
    shared: &[String],
    start_row: usize,
) -> Result<Vec<Vec<String>>, WorkbookError> {
    // (absolute row index, column index) -> value; sparse until assembly.
    let mut cells: Vec<(usize, usize, String)> = Vec::new();
    let mut max_row: Option<usize> = None;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut cur_row: usize = 0;
    let mut next_row: usize = 0;
    let mut cur_col: usize = 0;
    let mut next_col: usize = 0;
    let mut kind = CellKind::Plain;
    let mut in_v = false;
    let mut in_is_t = false;
    let mut pending: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    cur_row = row_index(&e)?.unwrap_or(next_row);
                    next_row = cur_row + 1;
                    next_col = 0;
                    if cur_row >= start_row {
                        max_row = Some(max_row.map_or(cur_row, |m: usize| m.max(cur_row)));
                    }
                }
                b"c" => {
                    let (col, k) = cell_attrs(&e, next_col)?;
                    cur_col = col;
                    next_col = col + 1;
                    kind = k;
                    pending = None;
                }
                b"v" => in_v = true,
                b"t" if kind == CellKind::InlineString => in_is_t = true,
                _ => {}
            },
            // Self-closing rows and cells carry no value but still advance
            // the position counters.
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"row" => {
                    cur_row = row_index(&e)?.unwrap_or(next_row);
                    next_row = cur_row + 1;
                    next_col = 0;
                    if cur_row >= start_row {
                        max_row = Some(max_row.map_or(cur_row, |m: usize| m.max(cur_row)));
                    }
                }
                b"c" => {
                    let (col, _) = cell_attrs(&e, next_col)?;
                    next_col = col + 1;
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_v || in_is_t => {
                let text = te.unescape().unwrap_or_default().into_owned();
                match pending.as_mut() {
                    Some(p) => p.push_str(&text),
                    None => pending = Some(text),
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_v = false,
                b"t" => in_is_t = false,
                b"c" => {
                    if cur_row >= start_row {
                        let value = render_cell(kind, pending.take(), shared);
                        if !value.is_empty() {
                            cells.push((cur_row, cur_col, value));
                        }
                    }
                    kind = CellKind::Plain;
                    pending = None;
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(WorkbookError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    // Assemble the dense grid. Every absolute row in [start_row, max_row]
    // becomes one output row so offsets match the previewed sheet.
    let Some(max_row) = max_row else {
        return Ok(Vec::new());
    };
    let mut grid: Vec<Vec<String>> = vec![Vec::new(); max_row - start_row + 1];
    for (row, col, value) in cells {
        let out = &mut grid[row - start_row];
        if out.len() <= col {
            out.resize(col + 1, String::new());
        }
        out[col] = value;
    }
    Ok(grid)
}

fn row_index(e: &quick_xml::events::BytesStart<'_>) -> Result<Option<usize>, WorkbookError> {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == b"r" {
            let text = attr
                .unescape_value()
                .map_err(|e| WorkbookError::Xml(e.to_string()))?;
            let n: usize = text
                .parse()
                .map_err(|_| WorkbookError::Xml(format!("bad row reference: {}", text)))?;
            if n == 0 {
                return Err(WorkbookError::Xml("row reference 0".to_string()));
            }
            return Ok(Some(n - 1));
        }
    }
    Ok(None)
}

fn cell_attrs(
    e: &quick_xml::events::BytesStart<'_>,
    default_col: usize,
) -> Result<(usize, CellKind), WorkbookError> {
    let mut col = default_col;
    let mut kind = CellKind::Plain;
    for attr in e.attributes().flatten() {
        match attr.key.as_ref() {
            b"r" => {
                let text = attr
                    .unescape_value()
                    .map_err(|e| WorkbookError::Xml(e.to_string()))?;
                col = column_of_ref(&text)
                    .ok_or_else(|| WorkbookError::Xml(format!("bad cell reference: {}", text)))?;
            }
            b"t" => {
                kind = match attr.value.as_ref() {
                    b"s" => CellKind::SharedString,
                    b"inlineStr" => CellKind::InlineString,
                    b"b" => CellKind::Boolean,
                    _ => CellKind::Plain,
                };
            }
            _ => {}
        }
    }
    Ok((col, kind))
}

/// Zero-based column index from an `A1`-style reference (`"BC12"` → 54).
fn column_of_ref(cell_ref: &str) -> Option<usize> {
    let letters: String = cell_ref.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    if letters.is_empty() {
        return None;
    }
    let mut col: usize = 0;
    for c in letters.chars() {
        col = col * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
    }
    Some(col - 1)
}

fn render_cell(kind: CellKind, raw: Option<String>, shared: &[String]) -> String {
    let raw = raw.unwrap_or_default();
    match kind {
        CellKind::SharedString => raw
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared.get(i))
            .cloned()
            .unwrap_or_default(),
        CellKind::Boolean => match raw.trim() {
            "1" => "TRUE".to_string(),
            "0" => "FALSE".to_string(),
            other => other.to_string(),
        },
        CellKind::Plain | CellKind::InlineString => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_refs_decode() {
        assert_eq!(column_of_ref("A1"), Some(0));
        assert_eq!(column_of_ref("Z9"), Some(25));
        assert_eq!(column_of_ref("AA10"), Some(26));
        assert_eq!(column_of_ref("BC12"), Some(54));
        assert_eq!(column_of_ref("123"), None);
    }

    #[test]
    fn not_a_zip_is_an_error() {
        let err = sheet_names(b"plainly not a zip").unwrap_err();
        assert!(matches!(err, WorkbookError::NotZip(_)));
    }

    #[test]
    fn grid_places_cells_by_reference() {
        let xml = br#"<?xml version="1.0"?>
            <worksheet><sheetData>
              <row r="1"><c r="A1" t="s"><v>0</v></c><c r="C1"><v>7</v></c></row>
              <row r="3"><c r="B3" t="inlineStr"><is><t>hi</t></is></c></row>
            </sheetData></worksheet>"#;
        let shared = vec!["head".to_string()];
        let grid = parse_sheet_grid(xml, &shared, 0).unwrap();
        assert_eq!(grid.len(), 3);
        assert_eq!(grid[0], vec!["head", "", "7"]);
        assert!(grid[1].is_empty());
        assert_eq!(grid[2], vec!["", "hi"]);
    }

    #[test]
    fn start_row_offsets_the_grid() {
        let xml = br#"<worksheet><sheetData>
              <row r="1"><c r="A1"><v>skip</v></c></row>
              <row r="2"><c r="A2"><v>keep</v></c></row>
            </sheetData></worksheet>"#;
        let grid = parse_sheet_grid(xml, &[], 1).unwrap();
        assert_eq!(grid, vec![vec!["keep".to_string()]]);
    }

    #[test]
    fn rows_without_references_count_forward() {
        let xml = br#"<worksheet><sheetData>
              <row><c><v>a</v></c><c><v>b</v></c></row>
              <row><c><v>c</v></c></row>
            </sheetData></worksheet>"#;
        let grid = parse_sheet_grid(xml, &[], 0).unwrap();
        assert_eq!(grid, vec![vec!["a".to_string(), "b".to_string()], vec!["c".to_string()]]);
    }

    #[test]
    fn boolean_cells_render_as_words() {
        let xml = br#"<worksheet><sheetData>
              <row r="1"><c r="A1" t="b"><v>1</v></c><c r="B1" t="b"><v>0</v></c></row>
            </sheetData></worksheet>"#;
        let grid = parse_sheet_grid(xml, &[], 0).unwrap();
        assert_eq!(grid[0], vec!["TRUE", "FALSE"]);
    }
}
