//! HTTP surface of the Exovision prediction service
//!
//! Routes requests onto [`exovision_ai_core::PredictionService`], runs
//! inference on the blocking pool under a timeout and maps service errors
//! onto status codes.

pub mod server;

pub use server::{build_router, start_server, AppState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
