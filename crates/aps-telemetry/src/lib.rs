use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "aps_engine" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    Filter(String),

    #[error("subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

impl TelemetryConfig {
    /// Parse a level name as accepted on the command line.
    pub fn parse_level(s: &str) -> Option<Level> {
        s.parse().ok()
    }

    /// The `EnvFilter` directive string this config stands for.
    pub fn filter_directive(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter
    }

    fn env_filter(&self) -> Result<EnvFilter, TelemetryError> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(self.filter_directive())
                .map_err(|e| TelemetryError::Filter(e.to_string())),
        }
    }
}

/// Initialize the global tracing subscriber. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = config.env_filter()?;

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInstalled(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directive_is_level_only() {
        assert_eq!(TelemetryConfig::default().filter_directive(), "info");
    }

    #[test]
    fn module_levels_append_directives() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![
                ("aps_engine".into(), Level::DEBUG),
                ("tower_http".into(), Level::INFO),
            ],
            json: true,
        };
        assert_eq!(config.filter_directive(), "warn,aps_engine=debug,tower_http=info");
    }

    #[test]
    fn parse_level_accepts_names() {
        assert_eq!(TelemetryConfig::parse_level("debug"), Some(Level::DEBUG));
        assert_eq!(TelemetryConfig::parse_level("TRACE"), Some(Level::TRACE));
        assert_eq!(TelemetryConfig::parse_level("loud"), None);
    }

    #[test]
    fn second_init_reports_already_installed() {
        let config = TelemetryConfig::default();
        let _ = init_telemetry(&config);
        let second = init_telemetry(&config);
        assert!(matches!(second, Err(TelemetryError::AlreadyInstalled(_))));
    }
}
