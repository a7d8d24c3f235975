//! # DeskBot Core
//!
//! Shared foundation for all DeskBot crates: configuration, error type,
//! data types, collaborator traits, the message catalog, and the
//! Telegram message renderer.

pub mod config;
pub mod error;
pub mod messages;
pub mod render;
pub mod traits;
pub mod types;

pub use config::DeskBotConfig;
pub use error::{DeskBotError, Result};
