pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod queue;
pub mod service;
pub mod sink;
pub mod source;

pub use error::{Result, SyncError};
