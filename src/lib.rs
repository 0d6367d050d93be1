//! # Shiplog
//!
//! Turns a window of merged GitHub pull requests into a structured,
//! categorized changelog using an AI completion service, and keeps the
//! result for later retrieval, manual additions, and versioned publishing.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌─────────────┐   ┌──────────┐
//! │ GitHub       │──▶│  Summarizer  │──▶│  Assembler  │──▶│  Store   │
//! │ (PRs+diffs)  │   │ (completion) │   │ (snapshot)  │   │ (SQLite) │
//! └──────────────┘   └──────────────┘   └─────────────┘   └────┬─────┘
//!                                                              │
//!                                       ┌──────────────────────┤
//!                                       ▼                      ▼
//!                                  ┌──────────┐          ┌──────────┐
//!                                  │   CLI    │          │   HTTP   │
//!                                  │(shiplog) │          │  (axum)  │
//!                                  └──────────┘          └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! shiplog init acme/widgets --name Widgets
//! shiplog generate --repo acme-widgets --days 7
//! shiplog preview --repo acme-widgets
//! shiplog publish --repo acme-widgets --version v1.0.0
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`error`] | Typed error taxonomy |
//! | [`models`] | Core data types |
//! | [`retry`] | Exponential backoff for upstream calls |
//! | [`github`] | Pull request source (GitHub REST API) |
//! | [`completion`] | Completion backends (Anthropic, Ollama) |
//! | [`summarizer`] | PR → change record |
//! | [`assembler`] | Change records → snapshot |
//! | [`generate`] | The end-to-end generation pipeline |
//! | [`store`] | Repository, snapshot, manual-entry, and version storage |
//! | [`export`] | Markdown rendering |
//! | [`commands`] | CLI command implementations |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod assembler;
pub mod commands;
pub mod completion;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod generate;
pub mod github;
pub mod migrate;
pub mod models;
pub mod retry;
pub mod server;
pub mod store;
pub mod summarizer;
