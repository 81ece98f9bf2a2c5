//! Runtime profile resolution
//!
//! Decides once, at startup, whether the in-process fallback engine may be
//! constructed. Resolution is a pure function of [`ProfileInputs`] so it can
//! be exercised without touching the process environment.

use serde::Serialize;
use tracing::warn;
use waypoint_common::config::AppConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeProfile {
    /// Hosted/production deployment
    Managed,
    /// Developer machine or self-hosted install
    Local,
}

impl RuntimeProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeProfile::Managed => "managed",
            RuntimeProfile::Local => "local",
        }
    }
}

/// Everything the resolver looks at
#[derive(Debug, Clone, Default)]
pub struct ProfileInputs {
    /// `runtime.profile` from configuration
    pub configured: String,
    /// `runtime.vercel` platform marker
    pub vercel: bool,
    /// `runtime.environment`
    pub app_env: Option<String>,
    /// `fallback.enabled` override
    pub fallback_override: Option<bool>,
}

impl ProfileInputs {
    /// Collect inputs from loaded configuration
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            configured: config.runtime.profile.clone(),
            vercel: config.runtime.vercel,
            app_env: Some(config.runtime.environment.clone()),
            fallback_override: config.fallback.enabled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedProfile {
    pub profile: RuntimeProfile,
    pub fallback_enabled: bool,
}

/// Resolve the runtime profile. Managed deployments do not construct the
/// fallback engine unless `fallback.enabled` says otherwise.
pub fn resolve_runtime_profile(inputs: &ProfileInputs) -> ResolvedProfile {
    let detected = || {
        let production = inputs
            .app_env
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case("production"));
        if inputs.vercel || production {
            RuntimeProfile::Managed
        } else {
            RuntimeProfile::Local
        }
    };

    let profile = match inputs.configured.trim().to_ascii_lowercase().as_str() {
        "managed" | "production" => RuntimeProfile::Managed,
        "local" | "development" | "dev" => RuntimeProfile::Local,
        "auto" | "" => detected(),
        other => {
            warn!(profile = other, "Unknown runtime profile, detecting from environment");
            detected()
        }
    };

    ResolvedProfile {
        profile,
        fallback_enabled: inputs
            .fallback_override
            .unwrap_or(profile == RuntimeProfile::Local),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(configured: &str) -> ProfileInputs {
        ProfileInputs {
            configured: configured.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_auto_defaults_to_local_with_fallback() {
        let resolved = resolve_runtime_profile(&inputs("auto"));
        assert_eq!(resolved.profile, RuntimeProfile::Local);
        assert!(resolved.fallback_enabled);
    }

    #[test]
    fn test_markers_select_managed() {
        let mut i = inputs("auto");
        i.vercel = true;
        let resolved = resolve_runtime_profile(&i);
        assert_eq!(resolved.profile, RuntimeProfile::Managed);
        assert!(!resolved.fallback_enabled);

        let mut i = inputs("auto");
        i.app_env = Some("Production".into());
        assert_eq!(resolve_runtime_profile(&i).profile, RuntimeProfile::Managed);
    }

    #[test]
    fn test_explicit_profile_beats_markers() {
        let mut i = inputs("local");
        i.vercel = true;
        assert_eq!(resolve_runtime_profile(&i).profile, RuntimeProfile::Local);
    }

    #[test]
    fn test_override_enables_fallback_in_managed() {
        let mut i = inputs("managed");
        i.fallback_override = Some(true);
        let resolved = resolve_runtime_profile(&i);
        assert_eq!(resolved.profile, RuntimeProfile::Managed);
        assert!(resolved.fallback_enabled);
    }

    #[test]
    fn test_inputs_come_from_runtime_config() {
        let mut config = AppConfig::default();
        let resolved = resolve_runtime_profile(&ProfileInputs::from_config(&config));
        assert_eq!(resolved.profile, RuntimeProfile::Local);

        config.runtime.vercel = true;
        let inputs = ProfileInputs::from_config(&config);
        assert!(inputs.vercel);
        assert_eq!(resolve_runtime_profile(&inputs).profile, RuntimeProfile::Managed);

        config.runtime.vercel = false;
        config.runtime.environment = "production".to_string();
        config.fallback.enabled = Some(true);
        let resolved = resolve_runtime_profile(&ProfileInputs::from_config(&config));
        assert_eq!(resolved.profile, RuntimeProfile::Managed);
        assert!(resolved.fallback_enabled);
    }

    #[test]
    fn test_unknown_profile_falls_back_to_detection() {
        assert_eq!(
            resolve_runtime_profile(&inputs("staging-ish")).profile,
            RuntimeProfile::Local
        );
    }
}
