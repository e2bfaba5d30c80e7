//! # Bulwark
//!
//! A multi-tenant supply-chain policy control plane. Projects own providers,
//! rule types and profiles; every call passes an authentication, project
//! resolution and authorization pipeline before it reaches a service.
//!
//! ## Library Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bulwark::auth::{JwtValidator, SigningKeys};
//! use bulwark::events::InMemoryPublisher;
//! use bulwark::rpc::Pipeline;
//! use bulwark::server::{AppState, create_router};
//! use bulwark::service::Services;
//! use bulwark::store::{SqliteStore, Store};
//!
//! let store: Arc<dyn Store> = Arc::new(SqliteStore::new("./data/bulwark.db")?);
//! store.initialize()?;
//!
//! let validator = Arc::new(JwtValidator::new(issuer, None, SigningKeys::Shared(secret)));
//! let state = Arc::new(AppState::new(
//!     Pipeline::new(validator, store.clone()),
//!     Services::new(store, Arc::new(InMemoryPublisher::new())),
//! ));
//! let router = create_router(state);
//! // Serve with axum...
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Builds the `bulwark` binary. Disable with `default-features = false`.

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod guidance;
pub mod projects;
pub mod providers;
pub mod rpc;
pub mod schema;
pub mod server;
pub mod service;
pub mod status;
pub mod store;
pub mod types;
