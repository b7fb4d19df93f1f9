//! Relational store for the CPE dictionary and the per-port classification.
//!
//! - `CheckDb`: SQLite wrapper with versioned schema (products, ports, candidates,
//!   stage_runs).
//! - Value types (`PortRecord`, `DictionaryEntry`, `StageRunRecord`, ...) shared by the
//!   services.
//! - `StoreContext`: configuration plus an open database, the usual entry point for
//!   frontends.

pub mod check_db;
pub mod context;
pub mod models;

pub use check_db::*;
pub use context::*;
pub use models::*;
