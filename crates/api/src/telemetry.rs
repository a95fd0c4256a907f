// Telemetry initialisation
//
// Console logging through tracing-subscriber, filtered by RUST_LOG and
// optionally emitted as JSON lines.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "outreach_api=debug,outreach_engine=debug,tower_http=debug";

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    pub service_version: Option<String>,
    /// Log filter (e.g., "info", "outreach_engine=trace")
    pub log_filter: Option<String>,
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "outreach-api".to_string(),
            service_version: None,
            log_filter: None,
            format: LogFormat::Text,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `SERVICE_NAME`: Service name (default: "outreach-api")
    /// - `RUST_LOG` or `LOG_LEVEL`: Log filter
    /// - `LOG_FORMAT`: "json" for JSON lines, anything else for text
    pub fn from_env() -> Self {
        Self {
            service_name: std::env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "outreach-api".to_string()),
            service_version: None,
            log_filter: std::env::var("RUST_LOG")
                .ok()
                .or_else(|| std::env::var("LOG_LEVEL").ok()),
            format: match std::env::var("LOG_FORMAT") {
                Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
        }
    }

    fn filter(&self) -> EnvFilter {
        self.log_filter
            .as_ref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
    }
}

/// Install the global subscriber. Call once, early in `main`.
pub fn init_telemetry(config: TelemetryConfig) {
    let filter = config.filter();

    let console_layer = match config.format {
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_filter(filter)
            .boxed(),
    };

    tracing_subscriber::registry().with(console_layer).init();

    tracing::info!(
        service = %config.service_name,
        version = config.service_version.as_deref().unwrap_or("unknown"),
        format = ?config.format,
        "Telemetry initialized"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_falls_back_to_default() {
        let config = TelemetryConfig {
            log_filter: Some("outreach_api=loud".to_string()),
            ..Default::default()
        };
        assert_eq!(config.filter().to_string(), EnvFilter::new(DEFAULT_LOG_FILTER).to_string());
    }

    #[test]
    fn test_explicit_filter_is_used() {
        let config = TelemetryConfig {
            log_filter: Some("warn".to_string()),
            ..Default::default()
        };
        assert_eq!(config.filter().to_string(), "warn");
    }
}
