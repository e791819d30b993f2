//! Nightwatch daemon entry point.

use std::sync::Arc;

use clap::Parser;
use lapin::ExchangeKind;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nightwatch::analyzers::dispatch::DispatchContext;
use nightwatch::analyzers::sigscan::{RuleSource, SignatureScanner};
use nightwatch::analyzers::AnalyzerRegistry;
use nightwatch::config::Config;
use nightwatch::control::{self, ControlEvent, Runtime};
use nightwatch::db::VerdictStore;
use nightwatch::error::Result;
use nightwatch::filestore::FilestoreVersion;
use nightwatch::ingest::{backlog, socket::SocketInput};
use nightwatch::janitor::{Janitor, DEFAULT_TICK};
use nightwatch::magic::MagicFilter;
use nightwatch::pipeline::Pipeline;
use nightwatch::submit::{amqp::AmqpSubmitter, DummySubmitter, Submitter};
use nightwatch::upload::{UploadConfig, Uploader};
use nightwatch::sensor;

fn init_tracing(config: &Config) {
    let default_filter = if config.verbose {
        "nightwatch=debug"
    } else {
        "nightwatch=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());
    let registry = tracing_subscriber::registry().with(env_filter);
    if config.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Forward process signals to the control channel until it closes.
fn spawn_signal_bridge(events: mpsc::Sender<ControlEvent>) -> Result<()> {
    let mut hup = signal(SignalKind::hangup())?;
    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut usr2 = signal(SignalKind::user_defined2())?;
    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = hup.recv() => ControlEvent::ReloadAnalyzers,
                _ = usr1.recv() => ControlEvent::Rescan,
                _ = usr2.recv() => ControlEvent::RescanFromScratch,
                _ = term.recv() => ControlEvent::Shutdown,
                _ = int.recv() => ControlEvent::Shutdown,
            };
            tracing::info!(?event, "received signal");
            if events.send(event).await.is_err() {
                return;
            }
        }
    });
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_tracing(&config);

    let store_version = FilestoreVersion::from_flag(config.store_version)?;
    let sensor_id = sensor::sensor_id();
    tracing::info!(sensor_id = %sensor_id, "starting nightwatch");

    let submitter: Arc<dyn Submitter> = if config.dummy {
        tracing::info!("disabling verdict submission");
        Arc::new(DummySubmitter)
    } else {
        AmqpSubmitter::connect(
            &config.amqp_uri,
            &config.amqp_user,
            &config.amqp_pass,
            &config.amqp_exchange,
            ExchangeKind::Fanout,
            sensor_id.clone(),
        )
        .await?
    };

    let uploader = match &config.upload_endpoint {
        Some(endpoint) => Some(
            Uploader::new(
                UploadConfig {
                    endpoint: endpoint.clone(),
                    access_key: config.upload_access_key.clone(),
                    secret_key: config.upload_secret_access_key.clone(),
                    bucket: config.upload_bucket.clone(),
                    region: config.upload_region.clone(),
                    use_ssl: config.upload_ssl,
                    scratch_dir: config.upload_scratch_dir.clone(),
                },
                Some(submitter.clone()),
            )
            .await?,
        ),
        None => None,
    };

    tokio::fs::create_dir_all(&config.data_dir).await?;
    let store = Arc::new(VerdictStore::open(&config.data_dir)?);

    let scanner = SignatureScanner::new(RuleSource {
        file: config.rule_file.clone(),
        uri: config.rule_uri.clone(),
        xz: config.rule_xz,
    });
    let registry = Arc::new(AnalyzerRegistry::new(vec![Arc::new(scanner)]));
    registry.reload().await?;

    let filter = Arc::new(MagicFilter::default());
    let ctx = Arc::new(DispatchContext::new(
        registry.clone(),
        store.clone(),
        submitter.clone(),
        uploader.clone(),
        config.rescan_time,
    ));
    let pipeline = Pipeline::new(ctx);

    // Catch up on files the live socket missed before accepting new events.
    backlog::build_backlog(
        &config.file_dir,
        store_version,
        &filter,
        &pipeline.sender(),
        &pipeline.pending(),
    )
    .await;

    let (socket_shutdown, socket_shutdown_rx) = watch::channel(false);
    let socket_input = SocketInput::bind(
        &config.socket,
        &config.file_dir,
        store_version,
        filter.clone(),
        pipeline.sender(),
        pipeline.pending(),
    )?;
    let socket_task = socket_input.run(socket_shutdown_rx);
    tracing::info!(
        socket = %config.socket.display(),
        filestore = %config.file_dir.display(),
        version = config.store_version,
        "watcher running"
    );

    let (janitor_shutdown, janitor_shutdown_rx) = watch::channel(false);
    let janitor = Janitor::new(config.max_age, config.max_space, DEFAULT_TICK);
    let janitor_task = janitor.run(config.file_dir.clone(), janitor_shutdown_rx);

    let (control_tx, control_rx) = mpsc::channel(8);
    spawn_signal_bridge(control_tx)?;

    control::run(
        control_rx,
        Runtime {
            registry,
            store,
            filter,
            pipeline,
            submitter,
            uploader,
            socket_shutdown,
            socket_task,
            janitor_shutdown,
            janitor_task,
            file_dir: config.file_dir.clone(),
            store_version,
        },
    )
    .await
}
