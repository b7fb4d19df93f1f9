//! chkcpe-core
//!
//! Core library for reconciling the CPE identifiers declared by ports against the NVD
//! CPE dictionary.
//!
//! This crate holds the identifier model, the dictionary and classification store, the
//! curator overlay, and the staged pipeline that ties them together. Frontends (the
//! `chkcpe` CLI, or a review UI) only wire configuration and presentation around it.

pub mod config;
pub mod cpe;
pub mod db;
pub mod dictionary;
pub mod overlay;
pub mod services;

/// Returns the library version as encoded at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
