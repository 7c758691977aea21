pub mod models;
pub mod repository;
pub mod service;
pub mod config;
pub mod error;
pub mod logging;

pub use config::Config;
pub use error::{Error, Result};
pub use service::{CallContext, CallHandle, CallSession, CallSnapshot};
