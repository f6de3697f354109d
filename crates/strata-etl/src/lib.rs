//! Ingestion pipelines, the datafile registry, the orchestration manager and
//! the tariff imputation engine.
//!
//! Everything here is generic over [`strata_core::store::Store`] and
//! [`strata_core::storage::ObjectStorage`]; the binary picks the concrete
//! backends.

pub mod catalog;
pub mod error;
pub mod incremental;
pub mod manager;
pub mod pipeline;
pub mod registry;
pub mod snapshot;
pub mod storage;
pub mod tariff;


pub use error::{Error, Result};
pub use manager::{Manager, PipelineReport, RunReport};
pub use pipeline::Pipeline;
pub use registry::DatafileRegistry;
