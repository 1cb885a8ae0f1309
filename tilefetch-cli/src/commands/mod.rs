//! CLI command implementations.
//!
//! Each subcommand has its own module with argument definitions and handlers.
//!
//! # Command Modules
//!
//! - [`info`] - Describe the configured tile source
//! - [`region`] - Fetch every tile covering a bounding box
//! - [`tile`] - Fetch a single tile

pub mod info;
pub mod region;
pub mod tile;
