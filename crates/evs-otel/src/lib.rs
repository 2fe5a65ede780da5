use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Output format of the console subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    /// `LOG_FORMAT=text` selects plain text; anything else is JSON.
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT") {
            Ok(raw) if raw.trim().eq_ignore_ascii_case("text") => Self::Text,
            _ => Self::Json,
        }
    }
}

/// Filter directives: `RUST_LOG`, then `LOG_LEVEL`, then `info`.
pub fn filter_directives() -> String {
    if let Ok(raw) = std::env::var("RUST_LOG") {
        if !raw.trim().is_empty() {
            return raw.trim().to_string();
        }
    }
    match std::env::var("LOG_LEVEL") {
        Ok(level) if !level.trim().is_empty() => level.trim().to_ascii_lowercase(),
        _ => "info".to_string(),
    }
}

pub fn init() {
    let filter = EnvFilter::try_new(filter_directives()).unwrap_or_else(|_| EnvFilter::new("info"));
    install_console(filter, LogFormat::from_env());
}

fn install_console(filter: EnvFilter, format: LogFormat) {
    let layer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(false)
            .flatten_event(true)
            .boxed(),
        LogFormat::Text => fmt::layer().with_target(false).boxed(),
    };
    let _ = tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init();
}
