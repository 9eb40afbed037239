//! # Sheetdock
//!
//! A small internal service for uploading build result spreadsheets,
//! normalizing selected rows into a document store, and searching the
//! stored rows and upload history.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌───────────┐   ┌──────────┐
//! │ Workbook │──▶│ Normalizer │──▶│   Store    │◀──│  Query   │
//! │ zip+xml  │   │ build ctx  │   │  SQLite    │   │  fold    │
//! └──────────┘   └────────────┘   └─────┬─────┘   └──────────┘
//!                                       │
//!                       ┌───────────────┤
//!                       ▼               ▼
//!                  ┌──────────┐   ┌──────────┐
//!                  │   CLI    │   │   HTTP   │
//!                  │sheetdock │   │  (axum)  │
//!                  └──────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! sheetdock init                                    # create database
//! sheetdock sheets results.xlsx                     # list sheet names
//! sheetdock preview results.xlsx --sheet Sheet1     # pick header + columns
//! sheetdock import results.xlsx --sheet Sheet1 --columns 기능,결과
//! sheetdock search "login" --filter 결과=fail:and
//! sheetdock serve                                   # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`workbook`] | xlsx sheet listing and grid extraction |
//! | [`normalize`] | Build-marker grouping and column projection |
//! | [`query`] | Filter folding and regex compilation |
//! | [`store`] | Document store client (SQLite) |
//! | [`ingest`] | Upload orchestration |
//! | [`search`] | Record search |
//! | [`history`] | Upload and build history listings |
//! | [`get`] | Record detail lookup |
//! | [`server`] | HTTP server |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod get;
pub mod history;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod query;
pub mod search;
pub mod server;
pub mod store;
pub mod workbook;
