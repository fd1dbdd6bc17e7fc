pub mod config;
pub mod engine;
pub mod export;
pub mod ids;
pub mod mapper;
pub mod model;
pub mod snapshot;
pub mod source;

pub use config::EngineConfig;
pub use engine::{Aggregator, BuildError, BuildReport};
pub use ids::IdAllocator;
pub use model::Gradebook;
pub use snapshot::SnapshotSource;
pub use source::GradeSource;
