//! HTTP Surface
//!
//! Thin axum layer over the service facade.

mod handlers;
mod routes;
mod server;
pub mod types;

pub use handlers::AppState;
pub use routes::create_router;
pub use server::HttpServer;
