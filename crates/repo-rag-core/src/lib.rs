//! # repo-rag core
//!
//! Runtime-agnostic logic shared by every repo-rag frontend: data models,
//! the error taxonomy, the store abstraction (with an in-memory backend),
//! similarity ranking, prompt/context assembly, and the capability traits
//! for the external gateways.
//!
//! This crate contains no tokio, sqlx, or HTTP client dependencies. The
//! application crate supplies concrete stores and gateways.

pub mod context;
pub mod embedding;
pub mod error;
pub mod gateway;
pub mod models;
pub mod search;
pub mod store;

pub use error::{RagError, Result};
