pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod sandbox;
pub mod server;

pub use error::{Result, SandpitError};
