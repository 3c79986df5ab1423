use std::sync::Once;

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

static TRACING_INIT: Once = Once::new();

fn normalize_level_directives(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return "info".to_owned();
    }

    match trimmed.to_ascii_lowercase().as_str() {
        "trace" => "trace".to_owned(),
        "debug" => "debug".to_owned(),
        "info" => "info".to_owned(),
        "warn" | "warning" => "warn".to_owned(),
        "error" => "error".to_owned(),
        // Anything else is treated as an `EnvFilter` directive string.
        _ => trimmed.to_owned(),
    }
}

/// Effective filter for the configured level, merged with `RUST_LOG` when it is set.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    let config_directives = normalize_level_directives(&config.level);
    let fallback = || {
        EnvFilter::try_new(&config_directives).unwrap_or_else(|_| {
            EnvFilter::default().add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    };

    let env_directives = std::env::var("RUST_LOG")
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty());

    match env_directives {
        Some(env_directives) => {
            EnvFilter::try_new(format!("{config_directives},{env_directives}"))
                .or_else(|_| EnvFilter::try_new(&env_directives))
                .unwrap_or_else(|_| fallback())
        }
        None => fallback(),
    }
}

/// Installs the global `tracing` subscriber.
///
/// Safe to call more than once; only the first call installs a subscriber, and an
/// already-installed subscriber from the embedding gateway is left alone.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = env_filter(config);
        let registry = tracing_subscriber::registry().with(filter);
        let result = if config.json {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .try_init()
        } else {
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .try_init()
        };
        if let Err(err) = result {
            tracing::debug!(
                target: "stepdebug.logging",
                error = %err,
                "global tracing subscriber already installed"
            );
        }
    });
}
