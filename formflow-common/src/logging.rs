use std::str::FromStr;

use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, $($msg:expr),*) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg),*)
    }};
}

/// Events about the engine itself (startup, shutdown, draining).
#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::internal!(level = TRACE, $($msg),*)
    };
}

/// Events about payloads leaving the process.
#[macro_export]
macro_rules! outgoing {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "outgoing", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::outgoing!(level = TRACE, $($msg),*)
    };
}

/// Environment variable holding the verbosity (`error` through `trace`, or `off`)
pub const LOG_LEVEL_ENV: &str = "FORMFLOW_LOG";

/// Only events from the dispatcher's own crates are printed; reqwest and
/// hyper are noisy at `TRACE`.
fn is_own_target(target: &str) -> bool {
    target.starts_with("formflow")
}

fn parse_level(value: Option<&str>, default: LevelFilter) -> LevelFilter {
    let Some(value) = value else {
        return default;
    };

    LevelFilter::from_str(value.trim()).unwrap_or_else(|_| {
        eprintln!("Ignoring {LOG_LEVEL_ENV}={value}, using {default}");
        default
    })
}

/// Install the global subscriber. Call once, after configuration is read.
pub fn init() {
    let default = if cfg!(debug_assertions) {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let level = parse_level(std::env::var(LOG_LEVEL_ENV).ok().as_deref(), default);

    let console = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(std::env::var_os("NO_COLOR").is_none())
        .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
        .with_filter(level)
        .with_filter(FilterFn::new(|metadata| is_own_target(metadata.target())));

    tracing_subscriber::Registry::default().with(console).init();
}
