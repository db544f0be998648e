//! CitySim Engine - Checkpointed execution of long-running analyses
//!
//! This crate runs analyses as resumable checkpoint chains on top of the
//! storage ports, submitting their heavy lifting to a remote compute network
//! and exposing the extraction protocol for their results.

pub mod analyses;
pub mod analysis;
pub mod checkpoint;
pub mod context;
pub mod dispatcher;
pub mod extraction;
pub mod gateway;
pub mod geometries;
pub mod locks;
pub mod registry;

pub use analysis::Analysis;
pub use checkpoint::{CheckpointMachine, Step};
pub use context::{AnalysisContext, Services};
pub use dispatcher::Dispatcher;
pub use extraction::{ExtractorRegistry, ResultContent, ResultExtractor};
pub use gateway::{JobGateway, LocalJobGateway};
pub use geometries::{FeatureQuery, GeometryService};
pub use registry::AnalysisRegistry;
