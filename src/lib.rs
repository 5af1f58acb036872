//! # Local Docs MCP
//!
//! Semantic search over a local directory of text documents, served to AI
//! tools over the Model Context Protocol.
//!
//! Files are crawled, split into fixed-size overlapping chunks, embedded by
//! a pluggable provider and stored in SQLite next to their vectors. Clients
//! call two tools, `index` and `search`, through session-bound MCP
//! connections over HTTP, or over stdio for a single local client.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ crawl        │──▶│ chunk+embed  │──▶│ SQLite store │
//! │ .md / .txt   │   │ (ingest)     │   │ docs+vectors │
//! └──────────────┘   └──────────────┘   └──────┬───────┘
//!                                              │
//!                        ┌─────────────────────┤
//!                        ▼                     ▼
//!                  ┌──────────┐   ┌──────────────────────┐
//!                  │   CLI    │   │ MCP sessions         │
//!                  │ (ldocs)  │   │ HTTP /mcp or stdio   │
//!                  └──────────┘   └──────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ldocs init                          # create database
//! ldocs index ./notes                 # index a directory
//! ldocs search "deployment checklist"
//! ldocs serve http                    # MCP over HTTP at /mcp
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`crawl`] | Directory crawl and text extraction |
//! | [`chunk`] | Overlapping text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`store`] | Document store and vector index |
//! | [`ingest`] | Ingestion pipeline |
//! | [`search`] | Retrieval pipeline |
//! | [`tools`] | `index` / `search` tool dispatch |
//! | [`protocol`] | JSON-RPC / MCP message types |
//! | [`session`] | Session table and router |
//! | [`server`] | MCP HTTP server |
//! | [`mcp`] | MCP stdio bridge |
//! | [`stats`] | Index statistics |

pub mod chunk;
pub mod config;
pub mod crawl;
pub mod db;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod mcp;
pub mod migrate;
pub mod models;
pub mod protocol;
pub mod search;
pub mod server;
pub mod session;
pub mod stats;
pub mod store;
pub mod tools;

pub use error::{Error, Result};
