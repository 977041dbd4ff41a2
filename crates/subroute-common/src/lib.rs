//! subroute Common - Shared configuration and error types
//!
//! This crate provides the configuration model and the error type
//! shared across all subroute components.

pub mod config;
pub mod error;

pub use self::config::Config;
pub use error::{Error, Result};
