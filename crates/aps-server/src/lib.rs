pub mod error;
pub mod handlers;
pub mod server;

pub use error::ApiError;
pub use server::{build_router, start, start_with, AppState, ServerConfig, ServerHandle};
