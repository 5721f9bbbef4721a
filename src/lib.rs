//! # repo-rag
//!
//! Ingests GitHub repositories into a SQLite-backed vector store and answers
//! natural-language questions about them with retrieval-augmented generation.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────────────┐   ┌──────────┐
//! │ Extraction │──▶│  Workflow (steps,    │──▶│  SQLite  │
//! │  service   │   │  retry, embeddings)  │   │ repos +  │
//! └────────────┘   └──────────────────────┘   │ repo_code│
//!                                             └────┬─────┘
//!                      ┌───────────────────────────┤
//!                      ▼                           ▼
//!                 ┌──────────┐               ┌──────────┐
//!                 │   CLI    │               │   HTTP   │
//!                 │  (rrag)  │               │  (axum)  │
//!                 └──────────┘               └──────────┘
//! ```
//!
//! The runtime-agnostic pieces (error taxonomy, data model, capability
//! traits, similarity ranking, prompt assembly, in-memory store) live in
//! the `repo-rag-core` crate.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite `Store` implementation |
//! | [`embedding`] | Embedding providers |
//! | [`generation`] | Text-generation providers |
//! | [`extract`] | Extraction service client |
//! | [`github`] | GitHub URL parsing and access checks |
//! | [`step`] | Checkpointed retry runner |
//! | [`ingest`] | Ingestion steps |
//! | [`workflow`] | Workflow engine and instance registry |
//! | [`answer`] | Question answering pipeline |
//! | [`server`] | HTTP API |
//! | [`app`] | Component wiring from config |

pub mod answer;
pub mod app;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod github;
mod http;
pub mod ingest;
pub mod migrate;
pub mod server;
pub mod sqlite_store;
pub mod step;
pub mod workflow;
