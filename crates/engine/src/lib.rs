//! Waypoint query engine
//!
//! Decides how a natural-language request is answered and answers it:
//! - Mode routing (LOCAL, CLOUD, AUTO, CLOUD_ONLY)
//! - Hybrid retrieval with a fallback chain
//! - Context augmentation and remote generation
//! - Response composition with an execution trace

pub mod augment;
pub mod composer;
pub mod deps;
pub mod generation;
pub mod pipeline;
pub mod profile;
pub mod request;
pub mod retrieval;
pub mod routing;
pub mod stage;

#[cfg(test)]
mod testing;

pub use composer::{ResponseMetadata, StepStatus, TraceStep, UnifiedResponse};
pub use deps::Dependencies;
pub use pipeline::QueryPipeline;
pub use profile::{resolve_runtime_profile, ResolvedProfile, RuntimeProfile};
pub use request::{QueryContext, QueryOptions, QueryRequest, ServerHint};
pub use retrieval::{EngineHealth, EngineKind, HybridResponse, HybridRetrievalEngine, RetrievalItem};
pub use routing::{select_optimal_mode, validate_and_normalize_mode, CanonicalMode, RoutingDecision, RoutingStats, RoutingSystem};
pub use stage::{CancelHandle, CancelSignal};
