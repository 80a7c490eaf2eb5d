pub mod admission;
pub mod envelope;
pub mod handlers;
pub mod server;
pub mod store;

use std::sync::Arc;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: store::Store,
    pub policy: Arc<admission::AdmissionPolicy>,
    /// Prefix for the links handed back on create, e.g. `https://burn.example`.
    pub base_url: String,
    /// Expose why a drop is gone (expired vs exhausted vs unknown) instead of
    /// one generic not-found.
    pub reveal_reasons: bool,
}

pub use server::{router, run, ServerConfig};
