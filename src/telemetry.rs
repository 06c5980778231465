//! Tracing setup shared by the server and the scheduled job binaries.
//!
//! Knobs come from the environment:
//! - `RUST_LOG` is used verbatim when set
//! - `AXUM_LOG_LEVEL` otherwise picks the level, falling back to the
//!   caller's default; `sqlx::query` stays at `warn` either way
//! - `AXUM_SPAN_EVENTS`: `full` or `enter_exit`, else span close only
//! - `FORCE_COLOR`: `1|true|yes` or `0|false|no`; unset follows stdout

use std::env;
use std::io::IsTerminal;

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

// ---

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Subscriber settings resolved from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    pub directives: String,
    pub span_events: FmtSpan,
    /// `None` follows stdout's TTY status.
    pub color: Option<bool>,
}

impl LogSettings {
    /// Resolve settings through `lookup`, normally [`std::env::var`].
    pub fn resolve(default_level: &str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        // ---
        let directives = match lookup("RUST_LOG") {
            Some(directives) => directives,
            None => {
                let requested = lookup("AXUM_LOG_LEVEL").map(|v| v.to_ascii_lowercase());
                let level = requested
                    .as_deref()
                    .filter(|level| LEVELS.contains(level))
                    .unwrap_or(default_level);
                format!("{level},sqlx::query=warn")
            }
        };

        let span_events = match lookup("AXUM_SPAN_EVENTS").as_deref() {
            Some("full") => FmtSpan::FULL,
            Some("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
            _ => FmtSpan::CLOSE,
        };

        let color = match lookup("FORCE_COLOR").as_deref() {
            Some("1" | "true" | "yes") => Some(true),
            Some("0" | "false" | "no") => Some(false),
            _ => None,
        };

        Self {
            directives,
            span_events,
            color,
        }
    }
}

/// Install the compact subscriber, logging at `default_level` unless the
/// environment says otherwise. Later calls in the same process do nothing.
pub fn init_tracing(default_level: &str) {
    // ---
    let settings = LogSettings::resolve(default_level, |name| env::var(name).ok());
    let use_color = settings.color.unwrap_or_else(|| std::io::stdout().is_terminal());

    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(settings.span_events)
        .with_env_filter(EnvFilter::new(&settings.directives))
        .with_ansi(use_color)
        .compact()
        .try_init();
}
