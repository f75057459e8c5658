//! `keel-core`: configuration and shared definitions for the keel workspace.

pub mod config;
pub mod error;
pub mod types;

pub use config::KeelConfig;
pub use error::{KeelError, Result};
pub use types::SYSTEM_BOT_ID;
