//! # Contract Review
//!
//! Versioned storage and two-stage automated review of contract documents.
//!
//! Each uploaded file becomes an immutable, content-addressed [`Version`] of
//! a contract. A review run takes the latest version through structured
//! extraction (stage 1) and knowledge-graph construction (stage 2), storing
//! every artifact in a [`ContentRecord`] and streaming progress to whoever
//! watches the contract.
//!
//! ## Architecture
//!
//! ```text
//!  upload ──▶ ┌───────────────┐   ┌─────────────┐
//!             │ VersionLedger │──▶│ RemoteStore │  sftp / local
//!             └──────┬────────┘   └──────▲──────┘
//!                    │                   │ download
//!                    ▼                   │
//!             ┌───────────────┐   ┌──────┴─────────┐   ┌──────────────────┐
//!  review ──▶ │ SQLite stores │◀──│ ReviewPipeline │──▶│ extraction / KG  │
//!             └───────────────┘   └──────┬─────────┘   └──────────────────┘
//!                                        ▼
//!                               ProgressRegistry ──▶ /ws/review/{id}
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`app`] | Wiring from configuration |
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy and codes |
//! | [`models`] | Core data types |
//! | [`store`] | Contract / version / content stores (SQLite, in-memory) |
//! | [`remote`] | Remote file storage (SFTP, local) |
//! | [`extract`] | Local PDF/DOCX text extraction |
//! | [`ledger`] | Version creation, lookup, cascade delete |
//! | [`services`] | Extraction and knowledge-graph service clients |
//! | [`pipeline`] | Review state machine |
//! | [`progress`] | Progress events, live channel, CLI reporters |
//! | [`contracts`] | Contract-level operations |
//! | [`server`] | HTTP API and WebSocket |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//!
//! [`Version`]: models::Version
//! [`ContentRecord`]: models::ContentRecord

pub mod app;
pub mod config;
pub mod contracts;
pub mod db;
pub mod error;
pub mod extract;
pub mod ledger;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod remote;
pub mod server;
pub mod services;
pub mod store;
