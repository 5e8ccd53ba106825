//! Ambient stack shared by every other crate in the workspace: error kinds,
//! logging setup and the `.rc` config-file parser.

pub mod config;
pub mod error;
pub mod logging;
pub mod time;

pub use error::{AcqError, ConfigError, IoError, ProtocolError, ReloadError, TuneError};
