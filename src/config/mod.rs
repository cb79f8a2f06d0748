//! Configuration module for Grid-Crawl
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use grid_crawl::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("grid-crawl.toml")).unwrap();
//! println!("Documents stored in: {}", config.store.database_path);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{ApiConfig, BusConfig, Config, StoreConfig};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
