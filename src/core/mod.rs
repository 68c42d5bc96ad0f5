//! Core module - shared infrastructure for Netdesk
//!
//! This module contains foundational types, configuration, and error handling
//! used throughout the application.

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, ProviderType};
pub use error::{NetdeskError, Result};
pub use types::*;
