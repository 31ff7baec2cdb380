//! # Answer Guard
//!
//! Role-gated retrieval-augmented question answering with two-stage PII
//! redaction.
//!
//! A question is answered against an ingested document corpus through a
//! fixed pipeline: access check, hybrid retrieval, optional context
//! pseudonymization, answer generation, display masking, audit. The
//! pipeline runs either as a single batch call or as an incrementally
//! streamed sequence of progress events.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────┐
//! │  Corpus  │──▶│ Chunk+Embed  │──▶│  SQLite    │
//! │ (md/txt) │   │  (ingest)    │   │ idx store  │
//! └──────────┘   └──────────────┘   └─────┬─────┘
//!                                         │
//!   AccessCheck ▶ Retrieve ▶ Pseudonymize ▶ Generate ▶ Mask ▶ Audit
//!                                         │
//!                      ┌──────────┐  ┌────┴─────┐
//!                      │   CLI    │  │   HTTP    │
//!                      │ (aguard) │  │ (batch +  │
//!                      │          │  │  stream)  │
//!                      └──────────┘  └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! aguard init                              # create the index store
//! aguard ingest                            # chunk + embed the corpus
//! aguard query "How long does payout take?" --role clerk
//! aguard serve                             # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunk`] | Heading-aware document chunking |
//! | [`embedding`] | Embedding collaborator + vector utilities |
//! | [`index`] | In-memory vector index |
//! | [`access`] | Role → permitted-sources gate |
//! | [`search`] | Hybrid retrieval (semantic + keyword boost) |
//! | [`pii`] | PII detection (patterns + NER + exclusion rules) |
//! | [`pseudonym`] | Reversible pseudonym labels (pre-generation) |
//! | [`mask`] | Irreversible display masks (post-generation) |
//! | [`generate`] | Answer-generation collaborator |
//! | [`audit`] | Append-only audit trail |
//! | [`pipeline`] | Stage orchestration (batch + streaming) |
//! | [`server`] | HTTP API |
//! | [`ingest`] | Offline corpus ingestion |
//! | [`db`] | SQLite index store |

pub mod access;
pub mod audit;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod generate;
pub mod index;
pub mod ingest;
pub mod mask;
pub mod models;
pub mod pii;
pub mod pipeline;
pub mod pseudonym;
pub mod search;
pub mod server;
