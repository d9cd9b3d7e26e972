//! Pagesmith control plane.
//!
//! Thin HTTP layer over the orchestration engine: submit a conversion,
//! observe job and page state, fetch results, retry failed pages and
//! delete jobs. Stateless apart from the shared engine handles; every
//! request is scoped to the owner resolved by [`auth::Owner`].

pub mod adapters;
pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
