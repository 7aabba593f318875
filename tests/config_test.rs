use taskspan::config::{Config, SPAN_OUTPUT_VAR, USE_WORKER_POOL_VAR, WORKER_THREADS_VAR};

// Environment variables are process-wide, so every env case lives in this
// one test.
#[test]
fn config_from_env() {
    unsafe {
        std::env::remove_var(USE_WORKER_POOL_VAR);
        std::env::remove_var(WORKER_THREADS_VAR);
        std::env::remove_var(SPAN_OUTPUT_VAR);
    }
    let config = Config::from_env().unwrap();
    assert!(config.use_worker_pool);
    assert!(config.worker_threads.is_none());
    assert!(config.span_output.is_none());
    assert!(!config.log_level.is_empty());

    unsafe {
        std::env::set_var(USE_WORKER_POOL_VAR, "false");
        std::env::set_var(WORKER_THREADS_VAR, "6");
        std::env::set_var(SPAN_OUTPUT_VAR, "/tmp/spans.jsonl");
    }
    let config = Config::from_env().unwrap();
    assert!(!config.use_worker_pool);
    assert_eq!(config.worker_threads, Some(6));
    assert_eq!(
        config.span_output.as_deref(),
        Some(std::path::Path::new("/tmp/spans.jsonl"))
    );
    let execution = config.execution();
    assert!(!execution.use_worker_pool);
    assert_eq!(execution.worker_threads, Some(6));

    unsafe {
        std::env::set_var(WORKER_THREADS_VAR, "zero");
    }
    assert!(Config::from_env().is_err());

    unsafe {
        std::env::remove_var(USE_WORKER_POOL_VAR);
        std::env::remove_var(WORKER_THREADS_VAR);
        std::env::remove_var(SPAN_OUTPUT_VAR);
    }
}

#[test]
fn config_from_toml() {
    let config = Config::from_toml_str(
        r#"
        use_worker_pool = false
        worker_threads = 3
        span_output = "build/spans.jsonl"
        log_level = "debug"
        "#,
    )
    .unwrap();
    assert!(!config.use_worker_pool);
    assert_eq!(config.worker_threads, Some(3));
    assert_eq!(config.log_level, "debug");
    assert!(config.otel_endpoint.is_none());
}

#[test]
fn config_from_toml_defaults_and_errors() {
    let config = Config::from_toml_str("").unwrap();
    assert!(config.use_worker_pool);
    assert_eq!(config.log_level, "info");

    assert!(Config::from_toml_str("worker_threads = 0").is_err());
    assert!(Config::from_toml_str("unknown_key = true").is_err());
    assert!(Config::from_toml_file("/nonexistent/taskspan.toml").is_err());
}
