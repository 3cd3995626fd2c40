//! Webhook server for Conductor.
//!
//! Provides the HTTP front end that feeds source-control events into the
//! scheduler, plus the GitHub and Buildbucket adapters it talks to.

pub mod config;
pub mod error;
pub mod routes;
pub mod services;
pub mod state;

pub use config::ServerConfig;
pub use state::AppState;
