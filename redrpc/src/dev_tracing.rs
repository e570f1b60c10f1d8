/// Development helper: initialize tracing subscriber when `RUST_LOG` is set.
///
/// Benches and tests can call `redrpc::dev_tracing::init_tracing()` to enable
/// structured logging for debugging. This is a no-op when `RUST_LOG` is not set
/// or when a global subscriber is already installed.
pub fn init_tracing() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

/// Like [`init_tracing`], but `verbose` forces `debug` regardless of `RUST_LOG`.
///
/// Used by the demo binaries' `--verbose` flag.
pub fn init_tracing_verbose(verbose: bool) {
    if !verbose {
        return init_tracing();
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
        .with_thread_names(true)
        .try_init();
}
