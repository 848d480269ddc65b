//! # FSD Common Library
//!
//! Shared code for the FSD curation crates:
//! - Error type
//! - Configuration loading and database path resolution
//! - Database initialization and row models

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
