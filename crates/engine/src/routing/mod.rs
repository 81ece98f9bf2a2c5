//! Mode routing
//!
//! Normalizes the requested operating mode and, for AUTO, selects a concrete
//! mode from query signals. The per-mode configuration table is static.

mod signals;

pub use signals::{analyze, has_non_latin_script, Complexity, QuerySignals};

use crate::request::{QueryContext, QueryRequest};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};
use waypoint_common::metrics;

/// The four operating modes after normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CanonicalMode {
    Local,
    Cloud,
    Auto,
    CloudOnly,
}

impl CanonicalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalMode::Local => "LOCAL",
            CanonicalMode::Cloud => "CLOUD",
            CanonicalMode::Auto => "AUTO",
            CanonicalMode::CloudOnly => "CLOUD_ONLY",
        }
    }

    /// CLOUD and CLOUD_ONLY run augmentation and generation
    pub fn is_cloud_family(&self) -> bool {
        matches!(self, CanonicalMode::Cloud | CanonicalMode::CloudOnly)
    }

    fn index(&self) -> usize {
        match self {
            CanonicalMode::Local => 0,
            CanonicalMode::Cloud => 1,
            CanonicalMode::Auto => 2,
            CanonicalMode::CloudOnly => 3,
        }
    }
}

impl fmt::Display for CanonicalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engines a mode can hand work to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineId {
    PrimaryStore,
    PrimaryText,
    FallbackIndex,
    Generation,
}

impl EngineId {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineId::PrimaryStore => "primary-store",
            EngineId::PrimaryText => "primary-text",
            EngineId::FallbackIndex => "fallback-index",
            EngineId::Generation => "generation",
        }
    }
}

/// Static per-mode configuration
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeConfig {
    pub name: CanonicalMode,
    pub primary_engine: EngineId,
    pub fallback_chain: &'static [EngineId],
    /// Per-stage budget in milliseconds
    pub max_processing_time: u64,
    pub priority: u8,
    pub enable_cache: bool,
}

impl ModeConfig {
    pub fn for_mode(mode: CanonicalMode) -> &'static ModeConfig {
        &MODE_TABLE[mode.index()]
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.max_processing_time)
    }

    fn strategy(&self) -> String {
        let chain: Vec<&str> = self.fallback_chain.iter().map(EngineId::as_str).collect();
        format!(
            "{} -> [{}] within {}ms",
            self.primary_engine.as_str(),
            chain.join(", "),
            self.max_processing_time
        )
    }
}

static MODE_TABLE: [ModeConfig; 4] = [
    ModeConfig {
        name: CanonicalMode::Local,
        primary_engine: EngineId::PrimaryStore,
        fallback_chain: &[EngineId::PrimaryText, EngineId::FallbackIndex],
        max_processing_time: 3000,
        priority: 1,
        enable_cache: true,
    },
    ModeConfig {
        name: CanonicalMode::Cloud,
        primary_engine: EngineId::PrimaryStore,
        fallback_chain: &[EngineId::PrimaryText, EngineId::FallbackIndex, EngineId::Generation],
        max_processing_time: 8000,
        priority: 2,
        enable_cache: true,
    },
    ModeConfig {
        name: CanonicalMode::Auto,
        primary_engine: EngineId::PrimaryStore,
        fallback_chain: &[EngineId::PrimaryText, EngineId::FallbackIndex],
        max_processing_time: 5000,
        priority: 3,
        enable_cache: false,
    },
    ModeConfig {
        name: CanonicalMode::CloudOnly,
        primary_engine: EngineId::Generation,
        fallback_chain: &[],
        max_processing_time: 8000,
        priority: 2,
        enable_cache: false,
    },
];

/// Outcome of routing one request. `target_mode` is never AUTO.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    pub target_mode: CanonicalMode,
    pub config: ModeConfig,
    pub reason: String,
    pub strategy: String,
}

/// Snapshot of routing counters
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoutingStats {
    pub total: u64,
    pub local: u64,
    pub cloud: u64,
    pub auto: u64,
    pub cloud_only: u64,
}

/// Normalize a requested mode. Case-insensitive, trims whitespace, treats
/// `-` and `_` alike, maps the legacy `google_ai` to CLOUD. Anything else
/// resolves to LOCAL with a warning.
pub fn validate_and_normalize_mode(mode: Option<&str>) -> CanonicalMode {
    let Some(raw) = mode else {
        debug!("No mode requested, using LOCAL");
        return CanonicalMode::Local;
    };

    let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
    match normalized.as_str() {
        "local" => CanonicalMode::Local,
        "cloud" => CanonicalMode::Cloud,
        "auto" => CanonicalMode::Auto,
        "cloud_only" => CanonicalMode::CloudOnly,
        "google_ai" => CanonicalMode::Cloud,
        _ => {
            warn!(requested = raw, "Unknown mode, using LOCAL");
            CanonicalMode::Local
        }
    }
}

/// Pick a concrete mode for an AUTO request along with the signals that decided it
pub fn explain_selection(query: &str, context: Option<&QueryContext>) -> (CanonicalMode, String) {
    let has_servers = context.is_some_and(|c| !c.servers.is_empty());
    let s = analyze(query, has_servers);

    let complexity = match s.complexity {
        Complexity::Simple => "simple",
        Complexity::Medium => "medium",
        Complexity::High => "high",
    };

    if s.realtime || s.complexity == Complexity::High {
        let why = if s.realtime { "realtime need" } else { "high complexity" };
        return (CanonicalMode::Cloud, format!("auto: {} -> CLOUD", why));
    }
    if s.technical || s.non_latin {
        let why = if s.technical { "technical terms" } else { "non-Latin script" };
        return (CanonicalMode::Local, format!("auto: {} -> LOCAL", why));
    }
    if s.complexity == Complexity::Simple {
        return (CanonicalMode::Local, "auto: simple query -> LOCAL".to_string());
    }
    (
        CanonicalMode::Cloud,
        format!("auto: {} complexity -> CLOUD", complexity),
    )
}

/// Deterministic AUTO selection
pub fn select_optimal_mode(query: &str, context: Option<&QueryContext>) -> CanonicalMode {
    explain_selection(query, context).0
}

/// Routes requests and counts decisions
#[derive(Debug, Default)]
pub struct RoutingSystem {
    per_mode: [AtomicU64; 4],
    total: AtomicU64,
}

impl RoutingSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the mode for a request. Always returns.
    pub fn route_request(&self, request: &QueryRequest) -> RoutingDecision {
        let requested = validate_and_normalize_mode(request.mode.as_deref());

        let (target_mode, reason) = match requested {
            CanonicalMode::Auto => explain_selection(&request.query, request.context.as_ref()),
            explicit => (explicit, format!("requested {}", explicit)),
        };

        self.per_mode[target_mode.index()].fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
        metrics::record_routing(target_mode.as_str());

        let config = *ModeConfig::for_mode(target_mode);
        debug!(mode = %target_mode, reason = %reason, "Request routed");

        RoutingDecision {
            target_mode,
            strategy: config.strategy(),
            config,
            reason,
        }
    }

    pub fn stats(&self) -> RoutingStats {
        let get = |m: CanonicalMode| self.per_mode[m.index()].load(Ordering::Relaxed);
        RoutingStats {
            total: self.total.load(Ordering::Relaxed),
            local: get(CanonicalMode::Local),
            cloud: get(CanonicalMode::Cloud),
            auto: get(CanonicalMode::Auto),
            cloud_only: get(CanonicalMode::CloudOnly),
        }
    }

    pub fn reset_stats(&self) {
        for counter in &self.per_mode {
            counter.store(0, Ordering::Relaxed);
        }
        self.total.store(0, Ordering::Relaxed);
    }
}
