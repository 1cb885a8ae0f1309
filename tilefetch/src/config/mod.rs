//! Configuration file support for `~/.tilefetch/config.ini`.
//!
//! The file describes one tile source plus the loader settings used to reach
//! it. [`TilefetchConfig`] is the parsed form; it builds the [`Source`],
//! [`NetworkOptions`] and [`LoaderContext`] the controller needs.
//!
//! # Example
//!
//! ```
//! use tilefetch::config::TilefetchConfig;
//!
//! let config = TilefetchConfig::from_ini_str(
//!     "[source]\nname = OSM\nurl = https://tile.openstreetmap.org\nmax_zoom = 19\n",
//! )
//! .unwrap();
//! let source = config.build_source().unwrap();
//! ```
//!
//! [`Source`]: crate::source::Source
//! [`NetworkOptions`]: crate::loader::NetworkOptions
//! [`LoaderContext`]: crate::loader::LoaderContext

mod file;
mod parser;
mod settings;

pub use file::{config_directory, config_file_path, log_directory, ConfigFileError};
pub use settings::{LoaderSettings, SourceKind, SourceSettings, TilefetchConfig};
