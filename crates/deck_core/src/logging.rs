use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_FILTER: &str =
    "info,deck_app=debug,deck_ai=debug,deck_data=info,deck_docs=info,deck_convert=debug";

/// Build the default filter string for the given verbosity and level.
pub fn default_filter(level: &str, verbose: bool) -> String {
    if verbose {
        DEFAULT_FILTER.replacen("info", "debug", 1)
    } else {
        format!("{level},deck_app=info,deck_ai=info,deck_convert=info")
    }
}

/// Console-only logging. `RUST_LOG` takes precedence over `filter`.
pub fn init_logging(filter: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    Ok(())
}

/// Console logging plus a daily-rotated file under `logs_dir`.
/// The returned guard must stay alive until the process exits.
pub fn init_logging_to_dir(logs_dir: &std::path::Path, filter: &str) -> Result<WorkerGuard> {
    std::fs::create_dir_all(logs_dir)?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, "sheetdeck");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_to_dir_creates_directory() {
        let tmp = tempfile::tempdir().expect("Failed to create tempdir");
        let logs_dir = tmp.path().join("nested").join("logs");
        assert!(!logs_dir.exists());

        // Only one global subscriber can be installed per process, so the
        // result may be an error; the directory is created either way.
        let result = init_logging_to_dir(&logs_dir, "warn");
        assert!(logs_dir.exists());

        if let Err(e) = result {
            let msg = e.to_string();
            assert!(msg.contains("logging"), "unexpected error: {msg}");
        }
    }

    #[test]
    fn default_filter_verbose_raises_base_level() {
        let filter = default_filter("info", true);
        assert!(filter.starts_with("debug"), "got: {filter}");
        assert!(filter.contains("deck_ai=debug"));
    }

    #[test]
    fn default_filter_respects_level() {
        let filter = default_filter("warn", false);
        assert!(filter.starts_with("warn,"), "got: {filter}");
    }

    #[test]
    fn default_filters_parse() {
        for f in [default_filter("info", false), default_filter("error", true)] {
            let filter = EnvFilter::try_new(&f);
            assert!(filter.is_ok(), "filter did not parse: {f}");
        }
    }
}
