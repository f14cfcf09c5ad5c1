use crate::config::{from_env, ENV_PREFIX};
use crate::prelude::*;
use serde::Deserialize;
use std::ops::Deref;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Verbosity used when `SHUTTLEBOT_LOG` isn't set
const DEFAULT_VERBOSITY: u8 = 1;

#[derive(Deserialize, Default)]
struct LoggingConfig {
    /// Numeric verbosity level, the higher the more verbose
    log: Option<u8>,

    /// Raw [`EnvFilter`] directive that takes precedence over [`Self::log`]
    log_filter: Option<String>,
}

/// Installs the global `tracing` subscriber and the panic hook.
///
/// The logging config is loaded separately from the main config, because
/// we need logging to be available to report errors in the main config.
pub fn init_logging() {
    let (config, config_err) = match from_env::<LoggingConfig>(ENV_PREFIX) {
        Ok(config) => (config, None),
        Err(err) => (LoggingConfig::default(), Some(err)),
    };

    let env_filter = config
        .log_filter
        .as_deref()
        .map(EnvFilter::new)
        .unwrap_or_else(|| {
            EnvFilter::new(verbosity_directive(
                config.log.unwrap_or(DEFAULT_VERBOSITY),
            ))
        });

    let fmt = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(std::env::var("COLORS").as_deref() != Ok("0"))
        .pretty();

    tracing_subscriber::registry()
        .with(fmt)
        .with(env_filter)
        .with(tracing_error::ErrorLayer::default())
        .init();

    init_panic_hook();

    if let Some(err) = config_err {
        warn!(
            err = tracing_err(&err),
            "Invalid logging config in the environment, using the defaults"
        );
    }
}

/// Maps the numeric verbosity to a filter directive. Only our own crate
/// gets more verbose, third-party crates are kept at `warn` level.
fn verbosity_directive(verbosity: u8) -> String {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    format!("warn,{}={level}", env!("CARGO_CRATE_NAME"))
}

fn init_panic_hook() {
    let current_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        // It's super-important to call the default panic hook, otherwise
        // we may not see it in the logs at all, because the panic may
        // happen inside of `tracing` logging system itself.
        current_hook(panic_info);

        let location = panic_info
            .location()
            .map(|location| format!("{}:{}", location.file(), location.line()));

        // If the panic message was formatted using interpolated values,
        // it will be a `String`. Otherwise, it will be a `&str`.
        let payload = panic_info.payload();
        let message = payload
            .downcast_ref::<String>()
            .map(<_>::deref)
            .or_else(|| payload.downcast_ref::<&str>().map(<_>::deref))
            .unwrap_or("<unknown>");

        let span_trace = tracing_error::SpanTrace::capture();

        error!(
            target: "panic",
            thread = std::thread::current().name(),
            location,
            span_trace = %span_trace,
            "{message}"
        );
    }));
}
