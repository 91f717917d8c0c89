//! `cronhook-core`: configuration and shared error types.

pub mod config;
pub mod error;

pub use config::CronhookConfig;
pub use error::{CronhookError, Result};
