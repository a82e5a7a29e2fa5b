//! compose-secrets core - shared functionality for the compose-secrets tools
//!
//! Standard paths, the YAML/environment configuration layer and the host
//! identity used in audit annotations.

pub mod config;
pub mod host;
pub mod paths;

pub use config::Config;
pub use paths::{expand_tilde, Paths};
