pub mod config;
pub mod core;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

// Re-export commonly used items for convenience
pub use config::ServerConfig;
pub use core::*;
pub use state::{AppState, StartupError};
