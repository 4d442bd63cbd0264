//! Configuration loading: files, environment overrides and validation.

use std::io::Write;
use std::num::NonZeroUsize;
use std::sync::Arc;

use nybus::config::{FrameFormat, LogFormat};
use nybus::{
    BusBuilder, BusError, ConcurrencyPolicy, ConfigurationError, ErrorFilterProviders,
    FilterConfiguration, InMemoryBusEngine, NybusOptions,
};
use serial_test::serial;

const ENV_KEYS: [&str; 3] = [
    "NYBUS__HOST__MAX_CONCURRENCY",
    "NYBUS__BROKER__COMMAND_QUEUE",
    "NYBUS__LOGGING__FORMAT",
];

fn config_file(text: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
#[serial]
fn loads_from_file() {
    let file = config_file(
        r#"
        [nybus.host]
        max_concurrency = 2

        [nybus.broker]
        command_queue = "orders.commands"
        frame_format = "json"

        [[nybus.command_error_filters]]
        type = "retry"
        max_retries = 4
        "#,
    );

    temp_env::with_vars_unset(ENV_KEYS, || {
        let options = NybusOptions::load(Some(file.path())).unwrap();
        assert_eq!(
            options.host.concurrency().unwrap(),
            ConcurrencyPolicy::Concurrent(NonZeroUsize::new(2).unwrap())
        );
        assert_eq!(options.broker.command_queue, "orders.commands");
        assert_eq!(options.broker.frame_format, FrameFormat::Json);
        assert_eq!(
            options.command_error_filters,
            vec![FilterConfiguration::new("retry").with_setting("max_retries", 4)]
        );
        assert!(options.event_error_filters.is_empty());
    });
}

#[test]
#[serial]
fn environment_overrides_file() {
    let file = config_file(
        r#"
        [nybus.host]
        max_concurrency = 2

        [nybus.broker]
        command_queue = "orders.commands"
        "#,
    );

    temp_env::with_vars(
        [
            ("NYBUS__HOST__MAX_CONCURRENCY", Some("6")),
            ("NYBUS__LOGGING__FORMAT", Some("json")),
        ],
        || {
            let options = NybusOptions::load(Some(file.path())).unwrap();
            assert_eq!(options.host.max_concurrency, 6);
            assert_eq!(options.broker.command_queue, "orders.commands");
            assert_eq!(options.logging.format, LogFormat::Json);
        },
    );
}

#[test]
#[serial]
fn missing_file_means_defaults() {
    temp_env::with_vars_unset(ENV_KEYS, || {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let options = NybusOptions::load(Some(path.as_path())).unwrap();
        assert_eq!(options, NybusOptions::default());
    });
}

#[test]
#[serial]
fn zero_concurrency_from_environment_is_rejected() {
    temp_env::with_vars([("NYBUS__HOST__MAX_CONCURRENCY", Some("0"))], || {
        let err = NybusOptions::load(None).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidConcurrency));
    });
}

#[test]
fn negative_max_retries_fails_the_build() {
    let options = NybusOptions::from_toml(
        r#"
        [[nybus.event_error_filters]]
        type = "retry"
        max_retries = -3
        "#,
    )
    .unwrap();

    let err = BusBuilder::new(Arc::new(InMemoryBusEngine::new()))
        .configure(&options, &ErrorFilterProviders::default())
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        BusError::Configuration(ConfigurationError::InvalidMaxRetries(-3))
    ));
}

#[test]
fn unknown_provider_fails_the_build() {
    let options = NybusOptions::from_toml(
        r#"
        [[nybus.command_error_filters]]
        type = "archive"
        "#,
    )
    .unwrap();

    let err = BusBuilder::new(Arc::new(InMemoryBusEngine::new()))
        .configure(&options, &ErrorFilterProviders::default())
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        BusError::Configuration(ConfigurationError::UnknownFilterProvider(name)) if name == "archive"
    ));
}

#[test]
fn configured_dead_letter_queue_is_used() {
    let options = NybusOptions::from_toml(
        r#"
        [[nybus.command_error_filters]]
        type = "dead-letter"
        queue = "orders.errors"
        "#,
    )
    .unwrap();

    let pipeline = ErrorFilterProviders::default()
        .build_pipeline(&options.command_error_filters)
        .unwrap();
    assert_eq!(pipeline.len(), 2);
}
