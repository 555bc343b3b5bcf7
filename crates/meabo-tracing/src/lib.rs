//! Shared tracing configuration for the meabo workspace.
//!
//! The benchmark binary, the integration tests and the criterion benches all
//! install their `tracing` subscriber through this crate so that phase
//! timings, binding decisions and validation outcomes are logged the same way
//! regardless of who drives the run.
//!
//! ## Profiles
//!
//! | Profile       | Format | ANSI | Span events      | Perf spans |
//! |---------------|--------|------|------------------|------------|
//! | `local`       | pretty | yes  | none             | debug builds |
//! | `ci`          | json   | no   | none             | off        |
//! | `performance` | json   | no   | enter/exit/close | on         |
//!
//! Every format writes to stderr; stdout belongs to the benchmark's own
//! output.

pub mod performance;

#[macro_use]
pub mod macros;

use std::env;
use std::str::FromStr;

pub use tracing::{debug, error, info, trace, warn};

use tracing::Subscriber;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter, Registry};

/// Named starting points for a [`TracingConfig`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TracingProfile {
    /// Interactive terminal runs.
    #[default]
    Local,
    /// Machine-collected logs.
    Ci,
    /// Phase and binding analysis.
    Performance,
}

impl FromStr for TracingProfile {
    type Err = TracingSetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "" => Ok(Self::Local),
            "ci" => Ok(Self::Ci),
            "performance" | "perf" => Ok(Self::Performance),
            other => Err(TracingSetupError::UnknownProfile(other.to_string())),
        }
    }
}

/// How the shared subscriber filters and formats events.
#[derive(Clone, Debug)]
pub struct TracingConfig {
    pub profile: TracingProfile,
    /// Filter directives (e.g. `meabo_core=debug,info`). When absent the
    /// filter comes from `RUST_LOG`, then from `default_directive`.
    pub directives: Option<String>,
    pub default_directive: String,
    /// Print event targets (module paths).
    pub include_targets: bool,
    pub ansi: bool,
    pub span_events: FmtSpan,
    pub output: TracingOutput,
    /// Whether [`performance::PerformanceSpan`] guards log on drop.
    pub enable_performance_tracing: bool,
    /// Minimum duration in microseconds for a performance span to be logged.
    pub performance_threshold_us: Option<u64>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::for_profile(TracingProfile::Local)
    }
}

impl TracingConfig {
    pub fn for_profile(profile: TracingProfile) -> Self {
        let (output, span_events, perf) = match profile {
            TracingProfile::Local => (TracingOutput::Pretty, FmtSpan::NONE, cfg!(debug_assertions)),
            TracingProfile::Ci => (TracingOutput::Json, FmtSpan::NONE, false),
            TracingProfile::Performance => (
                TracingOutput::Json,
                FmtSpan::ENTER | FmtSpan::EXIT | FmtSpan::CLOSE,
                true,
            ),
        };
        let directives = match profile {
            // phase timings and per-worker binding are logged at debug
            TracingProfile::Performance => Some("meabo_core=debug,meabo=debug,info".to_string()),
            _ => None,
        };

        Self {
            profile,
            directives,
            default_directive: "info".to_string(),
            include_targets: true,
            ansi: output != TracingOutput::Json && profile == TracingProfile::Local,
            span_events,
            output,
            enable_performance_tracing: perf,
            performance_threshold_us: None,
        }
    }

    pub fn for_local() -> Self {
        Self::for_profile(TracingProfile::Local)
    }

    pub fn for_ci() -> Self {
        Self::for_profile(TracingProfile::Ci)
    }

    pub fn for_performance() -> Self {
        Self::for_profile(TracingProfile::Performance)
    }

    /// Build a configuration from environment hints.
    ///
    /// # Environment Variables
    ///
    /// - `MEABO_TRACING_PROFILE` - `local` (default), `ci`, or `performance`
    /// - `MEABO_TRACING_DIRECTIVES` - overrides filter directives
    /// - `MEABO_TRACING_FORMAT` - `pretty`, `compact`, or `json`
    /// - `MEABO_PERF_TRACING` - `true`/`1`/`yes`/`on` enables performance spans
    /// - `MEABO_PERF_THRESHOLD_US` - minimum span duration to log
    ///
    /// Unrecognised values fall back to the profile's setting.
    pub fn from_env() -> Self {
        let profile = env::var("MEABO_TRACING_PROFILE")
            .ok()
            .and_then(|value| value.parse::<TracingProfile>().ok())
            .unwrap_or_default();
        let mut config = Self::for_profile(profile);

        if let Some(directives) = env::var("MEABO_TRACING_DIRECTIVES")
            .ok()
            .filter(|value| !value.trim().is_empty())
        {
            config.directives = Some(directives);
        }

        if let Some(output) = env::var("MEABO_TRACING_FORMAT")
            .ok()
            .and_then(|value| value.parse::<TracingOutput>().ok())
        {
            config.output = output;
            config.ansi &= output != TracingOutput::Json;
        }

        if let Ok(value) = env::var("MEABO_PERF_TRACING") {
            config.enable_performance_tracing = parse_flag(&value);
        }

        if let Some(threshold_us) = env::var("MEABO_PERF_THRESHOLD_US")
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
        {
            config.performance_threshold_us = Some(threshold_us);
        }

        config
    }

    /// Raise the default directive, as done for `-v`/`-vv` on the command line.
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        match verbosity {
            0 => {}
            1 => self.default_directive = "debug".to_string(),
            _ => self.default_directive = "trace".to_string(),
        }
        self
    }

    fn resolve_filter(&self) -> Result<EnvFilter, TracingSetupError> {
        let directives = match &self.directives {
            Some(directives) => directives.clone(),
            None => match env::var(EnvFilter::DEFAULT_ENV) {
                Ok(from_env) if !from_env.trim().is_empty() => from_env,
                _ => self.default_directive.clone(),
            },
        };
        EnvFilter::try_new(&directives).map_err(|err| TracingSetupError::InvalidFilter {
            directives,
            reason: err.to_string(),
        })
    }
}

/// Interpret the usual truthy spellings of an environment flag.
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Errors surfaced while configuring the shared subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TracingSetupError {
    #[error("invalid tracing directives '{directives}': {reason}")]
    InvalidFilter { directives: String, reason: String },

    #[error("unknown tracing profile '{0}'")]
    UnknownProfile(String),

    #[error("unknown tracing format '{0}'")]
    UnknownFormat(String),

    /// Usually a subscriber is already installed.
    #[error("failed to install global tracing subscriber: {0}")]
    SubscriberInit(#[from] tracing_subscriber::util::TryInitError),
}

/// Build a subscriber for `config` without installing it.
pub fn build_subscriber(config: &TracingConfig) -> Result<impl Subscriber + Send + Sync, TracingSetupError> {
    let (filter, fmt_layer) = subscriber_layers(config)?;
    Ok(Registry::default().with(fmt_layer).with(filter))
}

/// Filter and formatting layers, for callers composing their own registry.
pub fn subscriber_layers(
    config: &TracingConfig,
) -> Result<(EnvFilter, Box<dyn Layer<Registry> + Send + Sync>), TracingSetupError> {
    let filter = config.resolve_filter()?;
    let base = tracing_fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(config.include_targets)
        .with_thread_names(true)
        .with_span_events(config.span_events.clone());

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.output {
        TracingOutput::Compact => Box::new(base.compact().with_ansi(config.ansi)),
        TracingOutput::Pretty => Box::new(base.pretty().with_ansi(config.ansi)),
        TracingOutput::Json => Box::new(base.json().with_ansi(false)),
    };

    Ok((filter, layer))
}

/// Install the configured subscriber as the process-wide default and apply
/// the performance-span settings.
pub fn init_global_tracing(config: &TracingConfig) -> Result<(), TracingSetupError> {
    performance::set_performance_tracing(config.enable_performance_tracing, config.performance_threshold_us);
    build_subscriber(config)?.try_init()?;
    Ok(())
}

/// Formatter layer output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingOutput {
    Compact,
    Pretty,
    Json,
}

impl FromStr for TracingOutput {
    type Err = TracingSetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(TracingSetupError::UnknownFormat(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const TRACING_VARS: [&str; 6] = [
        "RUST_LOG",
        "MEABO_TRACING_PROFILE",
        "MEABO_TRACING_DIRECTIVES",
        "MEABO_TRACING_FORMAT",
        "MEABO_PERF_TRACING",
        "MEABO_PERF_THRESHOLD_US",
    ];

    fn clear_env() {
        for key in TRACING_VARS {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn rejects_invalid_directive() {
        let config = TracingConfig {
            directives: Some("=::invalid".to_string()),
            ..TracingConfig::default()
        };
        let result = build_subscriber(&config);
        assert!(matches!(result, Err(TracingSetupError::InvalidFilter { .. })));
    }

    #[test]
    #[serial]
    fn builds_every_profile() {
        clear_env();
        for profile in [TracingProfile::Local, TracingProfile::Ci, TracingProfile::Performance] {
            assert!(build_subscriber(&TracingConfig::for_profile(profile)).is_ok(), "{profile:?}");
        }
    }

    #[test]
    #[serial]
    fn from_env_respects_profile_and_format() {
        clear_env();
        env::set_var("MEABO_TRACING_PROFILE", "ci");
        env::set_var("MEABO_TRACING_FORMAT", "compact");
        env::set_var("MEABO_TRACING_DIRECTIVES", "meabo_core=trace");

        let config = TracingConfig::from_env();
        assert_eq!(config.profile, TracingProfile::Ci);
        assert_eq!(config.directives.as_deref(), Some("meabo_core=trace"));
        assert!(!config.ansi);
        assert_eq!(config.output, TracingOutput::Compact);
        clear_env();
    }

    #[test]
    #[serial]
    fn from_env_ignores_unknown_values() {
        clear_env();
        env::set_var("MEABO_TRACING_PROFILE", "verbose");
        env::set_var("MEABO_TRACING_FORMAT", "xml");
        env::set_var("MEABO_PERF_THRESHOLD_US", "soon");

        let config = TracingConfig::from_env();
        assert_eq!(config.profile, TracingProfile::Local);
        assert_eq!(config.output, TracingOutput::Pretty);
        assert_eq!(config.performance_threshold_us, None);
        clear_env();
    }

    #[test]
    #[serial]
    fn from_env_respects_performance_settings() {
        clear_env();
        env::set_var("MEABO_PERF_TRACING", "yes");
        env::set_var("MEABO_PERF_THRESHOLD_US", "250");

        let config = TracingConfig::from_env();
        assert!(config.enable_performance_tracing);
        assert_eq!(config.performance_threshold_us, Some(250));
        clear_env();
    }

    #[test]
    fn performance_preset_emits_span_events() {
        let config = TracingConfig::for_performance();
        assert!(config.enable_performance_tracing);
        assert_eq!(config.output, TracingOutput::Json);
        assert!(!config.ansi);
        assert!(config.directives.is_some());
    }

    #[test]
    fn verbosity_raises_default_directive() {
        assert_eq!(TracingConfig::for_local().with_verbosity(0).default_directive, "info");
        assert_eq!(TracingConfig::for_local().with_verbosity(1).default_directive, "debug");
        assert_eq!(TracingConfig::for_local().with_verbosity(3).default_directive, "trace");
    }

    #[test]
    fn parses_truthy_flags() {
        for value in ["1", "true", "TRUE", "yes", "on"] {
            assert!(parse_flag(value), "{value} should be truthy");
        }
        for value in ["0", "false", "off", ""] {
            assert!(!parse_flag(value), "{value} should be falsy");
        }
    }

    #[test]
    fn parses_profiles_and_formats() {
        assert_eq!("perf".parse::<TracingProfile>().ok(), Some(TracingProfile::Performance));
        assert!(matches!(
            "loud".parse::<TracingProfile>(),
            Err(TracingSetupError::UnknownProfile(_))
        ));
        assert_eq!(" JSON ".parse::<TracingOutput>().ok(), Some(TracingOutput::Json));
    }
}
