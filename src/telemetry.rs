//! Log setup
//!
//! `RUST_LOG` wins when set; otherwise the operator logs at info, or debug
//! with `--debug`, and keeps kube and HTTP stack chatter down.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Log output settings
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Emit JSON lines instead of human-readable text
    pub json: bool,
    /// Log the operator's own debug events
    pub debug: bool,
}

impl TelemetryConfig {
    /// Filter directives used when `RUST_LOG` is unset
    pub fn default_directives(&self) -> String {
        let own = if self.debug { "debug" } else { "info" };
        format!("info,jenkins_operator={own},kube=info,tower=warn,hyper=warn,reqwest=warn")
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.default_directives()))
    }
}

/// Install the global subscriber. Must be called once, before any logging.
pub fn init_telemetry(config: TelemetryConfig) {
    let registry = tracing_subscriber::registry().with(config.filter());
    if config.json {
        registry.with(fmt::layer().json().with_current_span(true)).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
