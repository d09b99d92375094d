#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![deny(unused_crate_dependencies)]

#[cfg(test)]
use http_body_util as _;
#[cfg(test)]
use tempfile as _;
#[cfg(test)]
use tower as _;

// Used by the server binary
use dotenvy as _;
use tracing_subscriber as _;

pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use bootstrap::{AxumContext, CorsConfig, ServerConfig, bootstrap, build_service, start_server};
pub use error::HttpError;
pub use routes::create_router;
pub use state::AppState;
