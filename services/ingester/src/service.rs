//! Assembles the ingester from its configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bufr_parser::BufrTables;
use chrono::Utc;
use ingestion::{
    Binder, BufrConverter, Composer, ConverterSet, CsvConverter, CsvStationRegistry, DataMappings,
};
use publisher::{Broker, Clock, Publisher};
use storage::{Database, DeadLetterSink, FeatureStore, ObjectFeatureStore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backpressure::AdmissionGate;
use crate::config::IngesterConfig;
use crate::intake::IntakeWatcher;
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::server::ServerState;
use crate::tracker::EventTracker;

/// Every long-lived component of a running node.
pub struct IngesterService {
    pub database: Database,
    pub pipeline: Arc<Pipeline>,
    pub publisher: Arc<Publisher>,
    pub watcher: Arc<IntakeWatcher>,
    pub gate: Arc<AdmissionGate>,
    pub tracker: Arc<EventTracker>,
    pub dead_letters: Arc<dyn DeadLetterSink>,
}

impl IngesterService {
    /// Open local storage and wire the pipeline to `broker`.
    ///
    /// Entries left `IN_FLIGHT` by a previous run are returned to `PENDING`
    /// and old `ACKED` entries are purged before anything is delivered.
    pub async fn build(config: &IngesterConfig, broker: Arc<dyn Broker>, clock: Arc<dyn Clock>) -> Result<Self> {
        if let Some(parent) = config.outbox.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let database = Database::open(&config.outbox.path).await?;
        let outbox = database.outbox();

        let recovered = outbox.recover_in_flight(clock.now()).await?;
        if recovered > 0 {
            warn!(count = recovered, "Recovered in-flight notifications from previous run");
        }
        let cutoff = Utc::now() - chrono::Duration::hours(config.outbox.retention_hours as i64);
        let purged = outbox.purge_acked(cutoff).await?;
        if purged > 0 {
            info!(count = purged, "Purged acknowledged notifications");
        }

        let mappings = match &config.mappings.csv {
            Some(path) => DataMappings::load(path)?,
            None => DataMappings::default(),
        };
        let mut tables = BufrTables::wmo_subset();
        if let Some(path) = &config.mappings.bufr_tables {
            let yaml = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read BUFR tables: {}", path.display()))?;
            tables.extend_from_yaml(&yaml)?;
        }
        let converters = ConverterSet::new(
            CsvConverter::new(mappings),
            BufrConverter::new(Arc::new(tables)),
        );

        let registry = CsvStationRegistry::open(&config.registry.path)?;
        let binder = Binder::new(Arc::new(registry));
        let composer = Composer::new(config.composer_settings());
        let features: Arc<dyn FeatureStore> = Arc::new(ObjectFeatureStore::from_config(&config.features.store)?);

        let publisher = Arc::new(Publisher::new(
            outbox.clone(),
            broker,
            clock,
            config.publisher.delivery.clone(),
        ));
        let dead_letters: Arc<dyn DeadLetterSink> = Arc::new(database.dead_letters());
        let tracker = Arc::new(EventTracker::default());
        let gate = Arc::new(AdmissionGate::new(
            outbox,
            config.outbox.high_watermark,
            config.outbox.low_watermark,
            publisher.depth_notifier(),
        ));
        let watcher = Arc::new(IntakeWatcher::new(&config.intake)?);

        let settings = PipelineSettings {
            workers: config.pipeline.workers,
            bind_attempts: config.pipeline.bind_attempts.max(1),
            bind_retry_delay: Duration::from_millis(config.pipeline.bind_retry_delay_ms),
            poll_interval: config.intake.poll_interval(),
            formats: config.intake.formats.clone(),
        };
        let pipeline = Arc::new(Pipeline::new(
            Arc::new(converters),
            binder,
            composer,
            features,
            Arc::clone(&publisher),
            Arc::clone(&dead_letters),
            Arc::clone(&tracker),
            settings,
        ));

        Ok(Self {
            database,
            pipeline,
            publisher,
            watcher,
            gate,
            tracker,
            dead_letters,
        })
    }

    pub fn server_state(&self) -> Arc<ServerState> {
        Arc::new(ServerState {
            publisher: Arc::clone(&self.publisher),
            dead_letters: Arc::clone(&self.dead_letters),
            gate: Arc::clone(&self.gate),
            tracker: Arc::clone(&self.tracker),
        })
    }

    /// Run intake and delivery until `cancel` fires.
    ///
    /// With `once`, intake stops after the files present at start and the
    /// call returns when the outbox has drained or `drain_timeout` passes.
    pub async fn run(&self, cancel: CancellationToken, once: bool, drain_timeout: Duration) -> Result<()> {
        let delivery_cancel = CancellationToken::new();
        let loops = self.publisher.spawn_loops(delivery_cancel.clone());

        let intake = Arc::clone(&self.pipeline)
            .run(Arc::clone(&self.watcher), Arc::clone(&self.gate), cancel.clone(), once)
            .await;

        if once && intake.is_ok() {
            self.wait_for_drain(&cancel, drain_timeout).await?;
        }

        delivery_cancel.cancel();
        for handle in loops {
            if let Err(e) = handle.await {
                warn!(error = %e, "Delivery loop ended abnormally");
            }
        }

        intake.context("Intake stopped on a storage failure")
    }

    async fn wait_for_drain(&self, cancel: &CancellationToken, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let depth_changed = self.publisher.depth_notifier();
        loop {
            let notified = depth_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let depth = self.publisher.outbox().depth().await?;
            if depth == 0 {
                info!("Outbox drained");
                return Ok(());
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(depth, "Outbox not drained before timeout");
                    return Ok(());
                }
                _ = &mut notified => {}
                _ = tokio::time::sleep(Duration::from_millis(200)) => {}
            }
        }
    }
}
