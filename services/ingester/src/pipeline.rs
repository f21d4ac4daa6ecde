//! Pipeline orchestration.
//!
//! Intake files are admitted through the backpressure gate and processed
//! by a bounded pool of workers. Each event runs
//! `RECEIVED → CONVERTING → CONVERTED → BOUND → COMPOSED → ENQUEUED`, ending
//! early in `CONVERSION_FAILED` or `BIND_FAILED` (dead-lettered). Once the
//! notification is in the outbox the publisher owns it.
//!
//! Shutdown lets every worker reach a safe checkpoint: an event either
//! finishes enqueueing or is rolled back to `RECEIVED`, leaving its file in
//! place for the next start.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ingestion::{Binder, Composer, ConversionError, ConverterSet};
use metrics::counter;
use publisher::Publisher;
use storage::{DeadLetter, DeadLetterSink, DeadLetterStage, FeatureStore, StorageError};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use wis2_common::{BoundObject, DataFormat, RawIntakeEvent};

use crate::backpressure::AdmissionGate;
use crate::intake::{IntakeWatcher, Settlement};
use crate::tracker::{EventState, EventTracker, InvalidTransition};

/// Conditions that stop intake for the whole process.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The outbox or dead-letter store could not be written
    #[error("Local storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// How one intake event ended.
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Enqueued { notification_id: String },
    DeadLettered { stage: DeadLetterStage, reason: String },
    /// Rolled back to `RECEIVED`; the file stays for a later attempt
    Released { reason: String },
}

impl EventOutcome {
    pub fn settlement(&self) -> Settlement {
        match self {
            EventOutcome::Enqueued { .. } => Settlement::Processed,
            EventOutcome::DeadLettered { .. } => Settlement::DeadLettered,
            EventOutcome::Released { .. } => Settlement::Released,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub workers: usize,
    pub bind_attempts: u32,
    pub bind_retry_delay: Duration,
    pub poll_interval: Duration,
    pub formats: Vec<DataFormat>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            bind_attempts: 3,
            bind_retry_delay: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            formats: vec![DataFormat::Csv, DataFormat::Bufr],
        }
    }
}

/// Wires intake to conversion, binding, composition and the outbox.
pub struct Pipeline {
    converters: Arc<ConverterSet>,
    binder: Binder,
    composer: Composer,
    features: Arc<dyn FeatureStore>,
    publisher: Arc<Publisher>,
    dead_letters: Arc<dyn DeadLetterSink>,
    tracker: Arc<EventTracker>,
    settings: PipelineSettings,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        converters: Arc<ConverterSet>,
        binder: Binder,
        composer: Composer,
        features: Arc<dyn FeatureStore>,
        publisher: Arc<Publisher>,
        dead_letters: Arc<dyn DeadLetterSink>,
        tracker: Arc<EventTracker>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            converters,
            binder,
            composer,
            features,
            publisher,
            dead_letters,
            tracker,
            settings,
        }
    }

    pub fn tracker(&self) -> &Arc<EventTracker> {
        &self.tracker
    }

    pub fn publisher(&self) -> &Arc<Publisher> {
        &self.publisher
    }

    /// Take one intake file through the pipeline.
    #[instrument(skip(self, content, cancel), fields(bytes = content.len()))]
    pub async fn process(
        &self,
        source_path: &str,
        content: bytes::Bytes,
        cancel: &CancellationToken,
    ) -> PipelineResult<EventOutcome> {
        counter!("wis2_intake_events_total").increment(1);
        let id = self.tracker.start(source_path).await;

        let result = self.run_event(id, source_path, content, cancel).await;
        let (notification_id, error_message) = match &result {
            Ok(EventOutcome::Enqueued { notification_id }) => (Some(notification_id.clone()), None),
            Ok(EventOutcome::DeadLettered { reason, .. }) | Ok(EventOutcome::Released { reason }) => {
                (None, Some(reason.clone()))
            }
            Err(e) => (None, Some(e.to_string())),
        };
        self.tracker.finish(id, notification_id, error_message).await;
        result
    }

    async fn run_event(
        &self,
        id: Uuid,
        source_path: &str,
        content: bytes::Bytes,
        cancel: &CancellationToken,
    ) -> PipelineResult<EventOutcome> {
        let event = match ingestion::prepare_event(source_path, content) {
            Ok(event) if self.settings.formats.contains(&event.format) => event,
            Ok(event) => {
                let reason = format!("format {} is not enabled", event.format);
                return self.dead_letter(DeadLetter::new(source_path, DeadLetterStage::Intake, reason)).await;
            }
            Err(e) => {
                return self
                    .dead_letter(DeadLetter::new(source_path, DeadLetterStage::Intake, e.to_string()))
                    .await;
            }
        };

        self.tracker.advance(id, EventState::Converting).await?;
        let object = match self.convert(event).await {
            Ok(object) => object,
            Err(e) => {
                self.tracker.advance(id, EventState::ConversionFailed).await?;
                counter!("wis2_conversion_failures_total").increment(1);
                warn!(source = %source_path, error = %e, "Conversion failed");
                return self
                    .dead_letter(DeadLetter::new(source_path, DeadLetterStage::Conversion, e.to_string()))
                    .await;
            }
        };
        self.tracker.advance(id, EventState::Converted).await?;

        // Binding, retried while the registry may still catch up
        let mut attempt = 0;
        let (dataset, stations) = loop {
            attempt += 1;
            self.tracker.record_bind_attempt(id).await;
            match self.binder.resolve(&object) {
                Ok(resolved) => break resolved,
                Err(e) if e.is_retryable() && attempt < self.settings.bind_attempts => {
                    debug!(source = %source_path, attempt, error = %e, "Binding failed, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return self.roll_back(id, "cancelled while waiting for the registry").await;
                        }
                        _ = tokio::time::sleep(self.settings.bind_retry_delay) => {}
                    }
                }
                Err(e) => {
                    self.tracker.advance(id, EventState::BindFailed).await?;
                    warn!(source = %source_path, attempt, error = %e, "Binding failed");
                    let letter = DeadLetter::new(source_path, DeadLetterStage::Binding, e.to_string())
                        .with_content_hash(&object.content_hash);
                    return self.dead_letter(letter).await;
                }
            }
        };
        let bound = BoundObject {
            object,
            dataset,
            stations,
        };
        self.tracker.advance(id, EventState::Bound).await?;

        let notification = self.composer.compose(&bound, Utc::now());
        self.tracker.advance(id, EventState::Composed).await?;

        if cancel.is_cancelled() {
            return self.roll_back(id, "cancelled before publishing").await;
        }

        // The object must resolve before anyone is told about it
        let key = self.composer.object_key(&bound);
        if let Err(e) = self.features.put(&key, bound.object.canonical_bytes.clone()).await {
            warn!(source = %source_path, key = %key, error = %e, "Features store write failed");
            return self.roll_back(id, &format!("features store write failed: {}", e)).await;
        }

        let entry = self.publisher.enqueue(&notification).await.map_err(|e| {
            error!(source = %source_path, id = %notification.id, error = %e, "Cannot persist to outbox");
            e
        })?;
        self.tracker.advance(id, EventState::Enqueued).await?;

        info!(
            source = %source_path,
            id = %entry.id,
            topic = %entry.topic,
            state = entry.state.as_str(),
            records = bound.object.len(),
            "Notification enqueued"
        );
        Ok(EventOutcome::Enqueued {
            notification_id: entry.id,
        })
    }

    /// Conversion is CPU bound and runs off the async workers.
    async fn convert(&self, event: RawIntakeEvent) -> Result<wis2_common::DataObject, ConversionError> {
        let converters = Arc::clone(&self.converters);
        tokio::task::spawn_blocking(move || converters.convert(&event))
            .await
            .unwrap_or_else(|e| Err(ConversionError::Malformed(format!("converter aborted: {}", e))))
    }

    async fn dead_letter(&self, letter: DeadLetter) -> PipelineResult<EventOutcome> {
        let stage = letter.stage;
        let reason = letter.reason.clone();
        self.dead_letters.record(letter).await?;
        counter!("wis2_dead_letters_total", "stage" => stage.as_str()).increment(1);
        Ok(EventOutcome::DeadLettered { stage, reason })
    }

    async fn roll_back(&self, id: Uuid, reason: &str) -> PipelineResult<EventOutcome> {
        self.tracker.advance(id, EventState::Received).await?;
        info!(event = %id, reason, "Event rolled back");
        Ok(EventOutcome::Released {
            reason: reason.to_string(),
        })
    }

    /// Read, process and settle one claimed intake file.
    async fn handle_file(
        &self,
        watcher: &IntakeWatcher,
        path: &Path,
        cancel: &CancellationToken,
    ) -> PipelineResult<EventOutcome> {
        let source_path = path.display().to_string();
        let outcome = match watcher.read(path) {
            Ok(content) => self.process(&source_path, content, cancel).await,
            Err(e) => {
                // Vanished or unreadable; try again on the next scan
                warn!(source = %source_path, error = %e, "Could not read intake file");
                Ok(EventOutcome::Released {
                    reason: e.to_string(),
                })
            }
        };

        let settlement = match &outcome {
            Ok(outcome) => outcome.settlement(),
            Err(_) => Settlement::Released,
        };
        if let Err(e) = watcher.settle(path, settlement) {
            warn!(source = %source_path, ?settlement, error = %e, "Could not settle intake file");
        }
        outcome
    }

    /// Run intake until cancelled, or once over the current intake
    /// directory contents when `once` is set.
    ///
    /// Returns an error if local storage failed; intake stops at that point
    /// and in-progress events are left to finish or roll back.
    pub async fn run(
        self: Arc<Self>,
        watcher: Arc<IntakeWatcher>,
        gate: Arc<AdmissionGate>,
        cancel: CancellationToken,
        once: bool,
    ) -> PipelineResult<()> {
        info!(
            workers = self.settings.workers,
            dir = %watcher.watch_dir().display(),
            "Pipeline started"
        );
        let workers = Arc::new(Semaphore::new(self.settings.workers.max(1)));
        let mut tasks: JoinSet<PipelineResult<EventOutcome>> = JoinSet::new();
        let mut failure: Option<PipelineError> = None;

        'intake: loop {
            let mut pending: Vec<PathBuf> = watcher.scan().into_iter().rev().collect();

            while let Some(path) = pending.pop() {
                let admitted = match gate.admit(&cancel).await {
                    Ok(admitted) => admitted,
                    Err(e) => {
                        failure = Some(e.into());
                        false
                    }
                };
                let permit = if admitted {
                    tokio::select! {
                        _ = cancel.cancelled() => None,
                        permit = Arc::clone(&workers).acquire_owned() => permit.ok(),
                    }
                } else {
                    None
                };
                let Some(permit) = permit else {
                    watcher.release(&path);
                    for path in pending.drain(..) {
                        watcher.release(&path);
                    }
                    break 'intake;
                };

                let pipeline = Arc::clone(&self);
                let task_watcher = Arc::clone(&watcher);
                let task_cancel = cancel.clone();
                tasks.spawn(async move {
                    let outcome = pipeline.handle_file(&task_watcher, &path, &task_cancel).await;
                    drop(permit);
                    outcome
                });

                if let Some(e) = reap(&mut tasks) {
                    failure = Some(e);
                    for path in pending.drain(..) {
                        watcher.release(&path);
                    }
                    break 'intake;
                }
            }

            if once {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }

            if let Some(e) = reap(&mut tasks) {
                failure = Some(e);
                break;
            }
        }

        if failure.is_some() {
            error!("Local storage failure, intake stopped");
        }

        // Drain: workers finish enqueueing or roll back.
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Err(e)) => {
                    error!(error = %e, "Event failed during drain");
                    failure.get_or_insert(e);
                }
                Ok(Ok(outcome)) => debug!(?outcome, "Event finished during drain"),
                Err(e) => error!(error = %e, "Pipeline worker panicked"),
            }
        }

        info!("Pipeline stopped");
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Collect finished workers, returning the first fatal error.
fn reap(tasks: &mut JoinSet<PipelineResult<EventOutcome>>) -> Option<PipelineError> {
    let mut fatal = None;
    while let Some(joined) = tasks.try_join_next() {
        match joined {
            Ok(Ok(outcome)) => debug!(?outcome, "Event finished"),
            Ok(Err(e)) => {
                error!(error = %e, "Event failed");
                fatal.get_or_insert(e);
            }
            Err(e) => error!(error = %e, "Pipeline worker panicked"),
        }
    }
    fatal
}
