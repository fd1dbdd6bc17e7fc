use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_SOURCE_SYSTEM: &str = "Moodle";
pub const DEFAULT_MAX_CONCURRENT_STUDENTS: usize = 4;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Overrides the name the source reports for itself.
    pub source_system: Option<String>,
    /// Upper bound on students whose submission statuses are fetched at once.
    pub max_concurrent_students: usize,
    /// Applied to every individual collector call.
    pub request_timeout: Duration,
    pub exclude_students_without_email: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            source_system: None,
            max_concurrent_students: DEFAULT_MAX_CONCURRENT_STUDENTS,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            exclude_students_without_email: false,
        }
    }
}

/// Partial config as it arrives over IPC; absent fields keep the base value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfigOverride {
    pub source_system: Option<String>,
    pub max_concurrent_students: Option<usize>,
    pub request_timeout_secs: Option<u64>,
    pub exclude_students_without_email: Option<bool>,
}

impl EngineConfig {
    /// Reads `GRADEBOOKD_*` variables over the defaults. Unparsable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(v) = get("GRADEBOOKD_SOURCE_SYSTEM").filter(|v| !v.trim().is_empty()) {
            cfg.source_system = Some(v.trim().to_string());
        }
        if let Some(n) = get("GRADEBOOKD_MAX_CONCURRENCY").and_then(|v| v.trim().parse().ok()) {
            cfg.max_concurrent_students = n;
        }
        if let Some(secs) = get("GRADEBOOKD_REQUEST_TIMEOUT_SECS").and_then(|v| v.trim().parse().ok()) {
            cfg.request_timeout = Duration::from_secs(secs);
        }
        if let Some(b) = get("GRADEBOOKD_EXCLUDE_NO_EMAIL").and_then(|v| parse_boolish(&v)) {
            cfg.exclude_students_without_email = b;
        }
        cfg.normalized()
    }

    pub fn with_override(&self, o: &EngineConfigOverride) -> Self {
        let mut cfg = self.clone();
        if let Some(v) = o.source_system.as_deref().filter(|v| !v.trim().is_empty()) {
            cfg.source_system = Some(v.trim().to_string());
        }
        if let Some(n) = o.max_concurrent_students {
            cfg.max_concurrent_students = n;
        }
        if let Some(secs) = o.request_timeout_secs {
            cfg.request_timeout = Duration::from_secs(secs);
        }
        if let Some(b) = o.exclude_students_without_email {
            cfg.exclude_students_without_email = b;
        }
        cfg.normalized()
    }

    fn normalized(mut self) -> Self {
        self.max_concurrent_students = self.max_concurrent_students.max(1);
        if self.request_timeout.is_zero() {
            self.request_timeout = Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS);
        }
        self
    }
}

fn parse_boolish(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Some(true),
        "0" | "false" | "no" | "n" => Some(false),
        _ => None,
    }
}
