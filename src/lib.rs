//! # Access RAG
//!
//! Access-level-aware retrieval and indexing for multi-tenant RAG chatbots.
//!
//! Every document carries an access level `1..=N`. Text documents are
//! chunked, embedded and written into vector tiers `index_l1..index_lN`,
//! duplicated from their own level upward, so a reader at level `K`
//! searches tier `K` alone. Tabular documents become SQL tables with an
//! `access_level` column; questions over them are turned into SQL, checked
//! by a signature gate, and scoped to `access_level <= K` before execution.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌────────────┐   ┌──────────────┐
//! │ Catalog  │──▶│ Object   │──▶│ Processors │─┬▶│ Vector tiers │◀── Retriever
//! │ manifest │   │ store    │   │ csv/xlsx/  │ │ │ index_l1..N  │
//! └──────────┘   └──────────┘   │ pdf/txt    │ │ └──────────────┘
//!                               └────────────┘ │ ┌──────────────┐
//!                                              └▶│ SQL tables   │◀── Tabular engine
//!                                                └──────────────┘      + security gate
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Typed error conditions |
//! | [`models`] | Core data types |
//! | [`catalog`] | Document sources |
//! | [`object_store`] | Presigned downloads (S3, local) |
//! | [`extract`] | CSV, XLSX, PDF and TXT loaders |
//! | [`chunk`] | Sentence chunking |
//! | [`processor`] | Per-format document processing |
//! | [`embedding`] | Embedding providers |
//! | [`completion`] | Chat completion providers |
//! | [`store`] | Tiered vector storage |
//! | [`node_storage`] | Embed and store nodes |
//! | [`retriever`] | Context retrieval |
//! | [`sql`] | NL→SQL engine and security gate |
//! | [`indexing`] | Document indexing pipeline |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema bootstrap |

pub mod catalog;
pub mod chunk;
pub mod completion;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
mod http_retry;
pub mod indexing;
pub mod migrate;
pub mod models;
pub mod node_storage;
pub mod object_store;
pub mod processor;
pub mod retriever;
pub mod server;
pub mod sql;
pub mod store;
