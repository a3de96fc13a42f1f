#![doc = "edi-sync-core: core logic library for edi-sync."]

//! This crate holds the data models, collaborator traits and pipelines that move
//! EDI files between remote endpoints and an object store, split 835 interchanges,
//! and trigger the downstream data pipeline.
//! Concrete clients for secrets, transports, storage and triggers live in the
//! `edi-sync` binary crate or in tests.
//!
//! # Usage
//! Build a [`contract::Services`] once, load an [`config::AppConfig`], then call
//! [`pipeline::run_document_pipeline`] per document type.

pub mod config;
pub mod contract;
pub mod error;
pub mod fleet;
pub mod outbound;
pub mod pipeline;
pub mod relay;
pub mod retry;
pub mod split;
pub mod sync_engine;
