//! Process wiring: configuration, discovery, kafka clients, metrics, runtime and watchdog.

use std::future::ready;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use axum::{routing::get, Router};
use common_kafka::discovery::resolve_broker_addresses;
use common_kafka::kafka_consumer::PollingConsumer;
use common_kafka::kafka_producer::OutputProducer;
use common_kafka::stats::StatsReporter;
use envconfig::Envconfig;
use lifecycle::{LivenessHandler, ReadinessHandler, Watchdog};
use serve_metrics::{
    install_recorder, metrics_router, serve, track_metrics, PrometheusHandle, LATENCY_BUCKETS,
};
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::Config;
use crate::filter::FilterHandler;
use crate::handler::{Handler, OperatorContext};
use crate::runtime::{OperatorRuntime, RuntimeSettings, RuntimeThread};

const BACKGROUND_JOIN_TIMEOUT: Duration = Duration::from_secs(30);

fn setup_tracing(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let log_layer = tracing_subscriber::fmt::layer().with_filter(filter);
    tracing_subscriber::registry().with(log_layer).init();
}

fn start_metrics_server(
    bind: String,
    recorder: PrometheusHandle,
    readiness: ReadinessHandler,
    liveness: LivenessHandler,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let router = Router::new()
        .route("/_readiness", get(move || ready(readiness.check())))
        .route("/_liveness", get(move || ready(liveness.check())))
        .merge(metrics_router(recorder))
        .layer(axum::middleware::from_fn(track_metrics));

    info!(%bind, "launching metrics server");
    thread::Builder::new()
        .name("metrics-server".into())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!("failed to build metrics runtime: {e}");
                    return;
                }
            };
            if let Err(e) = rt.block_on(serve(router, &bind, shutdown)) {
                error!("metrics server failed: {e}");
            }
        })?;
    Ok(())
}

/// Runs an operator until it is shut down by a signal, or one of its components dies.
///
/// `build_handler` receives the deployment context once configuration is
/// loaded; the filters are compiled against the selectors it declares.
pub fn run<H, F>(name: &str, version: &str, build_handler: F) -> anyhow::Result<()>
where
    H: Handler + 'static,
    F: FnOnce(&OperatorContext) -> anyhow::Result<H>,
{
    let config = Config::init_from_env().context("failed to load deployment configuration")?;
    let operator_config = config
        .operator_config()
        .context("failed to parse CONFIG")?;

    setup_tracing(&operator_config.log_directive());
    info!(name, version, "starting operator");
    debug!(?config, "deployment config");
    debug!(?operator_config, "operator config");

    // The recorder has to be installed before the kafka clients report statistics
    let recorder = match config.metrics {
        true => Some(install_recorder(LATENCY_BUCKETS).context("failed to install metrics recorder")?),
        false => None,
    };

    let context = OperatorContext::new(&config, operator_config);
    let handler = build_handler(&context).context("failed to set up handler")?;
    let filters = FilterHandler::from_input_topics(
        &context.operator_config.input_topics,
        &config.pipeline_id,
        &handler.selectors(),
    )
    .context("failed to compile filters")?;

    let kafka = match &config.zk_quorum {
        Some(quorum) => {
            let brokers = resolve_broker_addresses(quorum, &config.zk_brokers_path)
                .context("failed to discover kafka brokers")?;
            config.kafka.with_brokers(&brokers)
        }
        None => config.kafka.clone(),
    };
    let stats = config
        .metrics
        .then(|| StatsReporter::new(&config.consumer.kafka_consumer_group));
    let consumer = PollingConsumer::new(&kafka, &config.consumer, stats.clone())
        .context("failed to create kafka consumer")?;
    let producer =
        OutputProducer::new(&kafka, stats).context("failed to create kafka producer")?;

    let background = handler.background_tasks();
    let runtime = OperatorRuntime::new(
        handler,
        filters,
        consumer.clone(),
        producer.clone(),
        RuntimeSettings {
            output_topic: config.output.clone(),
            pipeline_id: config.pipeline_id.clone(),
            operator_id: config.operator_id.clone(),
            poll_timeout: config.poll_timeout(),
            flush_timeout: config.flush_timeout(),
        },
    );
    let runtime_handle = runtime.handle();
    let runtime_slot: Arc<Mutex<Option<RuntimeThread>>> = Arc::new(Mutex::new(None));

    let mut builder = Watchdog::builder(name)
        .with_check_interval(Duration::from_millis(config.watchdog_check_interval_ms));
    if let Some(path) = &config.prestop_file {
        builder = builder.with_prestop_file(path);
    }
    let mut watchdog = builder.build();

    let handle = runtime_handle.clone();
    watchdog.register_monitor("operator-runtime", move || handle.is_alive());
    let handle = runtime_handle;
    watchdog.register_shutdown("operator-runtime", move || {
        handle.stop();
        Ok(())
    });
    for task in &background {
        let name = task.name().to_string();
        let task = task.clone();
        watchdog.register_shutdown(&name, move || {
            task.stop();
            Ok(())
        });
    }

    let slot = runtime_slot.clone();
    let runtime_join_timeout = Duration::from_secs(config.runtime_join_timeout_secs);
    watchdog.register_join("operator-runtime", move || {
        let thread = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        match thread {
            Some(thread) => Ok(thread.join(runtime_join_timeout)??),
            None => Ok(()),
        }
    });
    for task in background {
        let name = task.name().to_string();
        watchdog.register_join(&name, move || Ok(task.join(BACKGROUND_JOIN_TIMEOUT)?));
    }
    let flush_timeout = config.flush_timeout();
    watchdog.register_join("kafka-producer", move || Ok(producer.flush(flush_timeout)?));
    watchdog.register_join("kafka-consumer", move || {
        consumer.close();
        Ok(())
    });

    if let Some(recorder) = recorder {
        start_metrics_server(
            format!("{}:{}", config.host, config.metrics_port),
            recorder,
            watchdog.readiness_handler(),
            watchdog.liveness_handler(),
            watchdog.shutdown_signal(),
        )
        .context("failed to start metrics server")?;
    }

    let guard = watchdog
        .start(Duration::from_secs(config.watchdog_start_delay_secs))
        .context("failed to start watchdog")?;
    let thread = runtime.spawn().context("failed to start operator runtime")?;
    *runtime_slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(thread);

    let reason = guard.join()?;
    info!(?reason, "operator shut down");
    Ok(())
}
