//! Historic-tracking and regression-analysis service for JSON-RPC benchmark
//! runs. `server` wires the HTTP/WebSocket surface over the `analysis`
//! pipeline and the `storage` port.

pub mod analysis;
pub mod error;
pub mod models;
pub mod server;
pub mod storage;
pub mod ws;

pub use error::AppError;
pub use server::{AppState, build_router};
