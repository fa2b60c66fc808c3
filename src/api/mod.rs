//! HTTP API module.
//!
//! The HTTP surface is deliberately small: a health probe plus the two
//! WebSocket handshake endpoints. Everything else happens on the sockets.

mod error;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::AppState;
