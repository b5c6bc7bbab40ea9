//! Shared library for the SCOURT synchronization engine
//!
//! Carries the error taxonomy, configuration/settings layer, database schema
//! and row models, plus the case-number and court-date utilities used by both
//! the sync service and its tests.

pub mod case_number;
pub mod config;
pub mod db;
pub mod error;
pub mod kst;
pub mod settings;

pub use error::{Error, Result, RetryClass};
