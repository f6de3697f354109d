//! Core types and trait definitions for the strata ingestion engine.
//!
//! This crate has no database or filesystem dependencies.
//! Pipelines, the registry and the manager live in `strata-etl`; concrete
//! relational backends implement [`store::Store`].

pub mod dataset;
pub mod error;
pub mod identity;
pub mod registry;
pub mod storage;
pub mod store;
pub mod table;

pub use error::{Error, Result};
