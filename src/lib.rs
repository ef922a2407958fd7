//! CNPJ Enrichment Library
//!
//! This library enriches spreadsheet rows keyed by CNPJ with data from the
//! BrasilAPI registry, keeping a persistent lookup cache so interrupted batch
//! runs resume without re-fetching known companies.
//!
//! # Modules
//!
//! - `core`: Domain logic re-exports.
//! - `integrations`: Registry client and tabular I/O re-exports.
//! - `cache`: Persistent write-through lookup cache.
//! - `cnpj`: CNPJ normalization and check-digit validation.
//! - `config`: Configuration management.
//! - `enrichment`: Row-by-row enrichment engine.
//! - `errors`: Error handling types.
//! - `models`: Lookup results, cache entries and CNAE codes.
//! - `progress`: Throughput and ETA accounting.
//! - `projection`: Mapping of lookup results to output cells.
//! - `registry_client`: BrasilAPI client.
//! - `table`: Tabular source/sink (CSV).

pub mod core;
pub mod integrations;

pub mod cache;
pub mod cnpj;
pub mod config;
pub mod enrichment;
pub mod errors;
pub mod models;
pub mod progress;
pub mod projection;
pub mod registry_client;
pub mod table;
