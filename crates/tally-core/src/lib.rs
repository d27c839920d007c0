//! tally-core - Core library for Tally
//!
//! This crate contains the record models, the merge engine, and the
//! offline-first sync orchestration shared by every Tally client (CLI,
//! desktop, mobile).

pub mod config;
pub mod conflicts;
pub mod db;
pub mod error;
pub mod merge;
pub mod models;
pub mod remote;
pub mod store;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{CollectionKey, CollectionSnapshot, Conflict, Record, RecordId};
