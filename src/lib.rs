//! # Engram
//!
//! **A long-lived memory service for AI agents.**
//!
//! Engram persists heterogeneous knowledge in one local datastore and
//! exposes it as remote-callable tools: scoped key–value facts,
//! vector-embedded memories and knowledge-base documents, a typed
//! entity/relationship graph, hybrid-searchable events, and symbols
//! extracted from source-code projects indexed in the background.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────────┐   ┌───────────────┐
//! │  Tools     │──▶│ Storage Engine │──▶│    SQLite     │
//! │ (modules)  │   │  + Embedder    │   │  FTS5 + Vec   │
//! └─────┬──────┘   └───────┬────────┘   └───────────────┘
//!       │                  ▲
//!       ▼                  │
//! ┌────────────┐   ┌───────┴────────┐
//! │ stdio/HTTP │   │  Code Indexer  │
//! │ transports │   │ pool + watcher │
//! └────────────┘   └────────────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. A transport decodes `{name, arguments}` and hands it to the
//!    [`tools::ModuleManager`].
//! 2. The middleware chain validates the call; the handler decodes typed
//!    arguments and drives the [`store::MemoryStore`].
//! 3. Content that needs semantic recall runs through the
//!    [`embedding::Embedder`] (adaptive chunking, 768-dim vectors).
//! 4. Retrieval fuses cosine similarity with BM25 text scores
//!    ([`search`]).
//! 5. Source projects index in the background ([`indexer`]): walk, hash
//!    gate, tree-sitter extraction, embedding, storage — with a per-project
//!    file watcher keeping the index fresh.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML + environment + flag configuration |
//! | [`error`] | Error taxonomy shared by every layer |
//! | [`models`] | Persisted record types |
//! | [`db`] | Datastore adapter: parameterized queries, result normalization |
//! | [`migrate`] | Declarative, idempotent schema migrations |
//! | [`chunk`] | Adaptive sentence/word/hard-cut text chunker |
//! | [`embedding`] | Provider abstraction: local model, Ollama, OpenAI-compatible |
//! | [`store`] | Storage engine: facts, vectors, KB, graph, events, code |
//! | [`search`] | Hybrid retrieval over events |
//! | [`indexer`] | Code indexing pipeline: workers, jobs, watcher |
//! | [`tools`] | Tool surface and module registry |
//! | [`server`] | Plain HTTP JSON surface (Axum) |
//! | [`stdio`] | Line-delimited stdio transport |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod indexer;
pub mod migrate;
pub mod models;
pub mod search;
pub mod server;
pub mod stdio;
pub mod store;
pub mod tools;
