use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use gradebookd::{BuildReport, EngineConfig, Gradebook, IdAllocator, SnapshotSource};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct BuiltGradebook {
    pub gradebook: Gradebook,
    pub report: BuildReport,
}

pub struct AppState {
    pub runtime: tokio::runtime::Runtime,
    pub config: EngineConfig,
    /// Shared by every build in this process so local ids never repeat.
    pub ids: Arc<IdAllocator>,
    pub source_path: Option<PathBuf>,
    pub source: Option<Arc<SnapshotSource>>,
    /// Keyed by the source course id the build was requested for.
    pub gradebooks: HashMap<String, BuiltGradebook>,
}

impl AppState {
    pub fn new(runtime: tokio::runtime::Runtime, config: EngineConfig) -> Self {
        Self {
            runtime,
            config,
            ids: Arc::new(IdAllocator::new()),
            source_path: None,
            source: None,
            gradebooks: HashMap::new(),
        }
    }
}
