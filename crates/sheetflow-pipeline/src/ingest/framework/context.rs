//! Replay-safe execution context
//!
//! Each step a run takes (activity call or timer) gets the next sequence
//! number. Before executing a step the context looks up that number in the
//! run's history: a recorded completion is returned as-is, a recorded timer
//! only waits for whatever time is left. New completions are appended to the
//! store before the result is handed back, so a crash after a step never
//! causes that step to run again.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::checkpoint::CheckpointStore;
use super::types::HistoryEvent;
use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone)]
enum RecordedStep {
    Activity {
        name: String,
        output: serde_json::Value,
    },
    Timer {
        fire_at: DateTime<Utc>,
        fired: bool,
    },
}

impl RecordedStep {
    fn describe(&self) -> String {
        match self {
            RecordedStep::Activity { name, .. } => format!("activity '{}'", name),
            RecordedStep::Timer { .. } => "timer".to_string(),
        }
    }
}

pub struct OrchestrationContext {
    run_id: Uuid,
    store: Arc<dyn CheckpointStore>,
    steps: BTreeMap<u64, RecordedStep>,
    next_seq: u64,
    cancel: CancellationToken,
}

impl OrchestrationContext {
    /// Load the run's history and position the cursor at the first step
    pub async fn load(
        run_id: Uuid,
        store: Arc<dyn CheckpointStore>,
        cancel: CancellationToken,
    ) -> PipelineResult<Self> {
        let history = store.load_history(run_id).await?;
        let mut steps = BTreeMap::new();

        for event in history {
            match event {
                HistoryEvent::ActivityCompleted {
                    seq, name, output, ..
                } => {
                    steps.insert(seq, RecordedStep::Activity { name, output });
                }
                HistoryEvent::TimerScheduled { seq, fire_at } => {
                    steps.insert(
                        seq,
                        RecordedStep::Timer {
                            fire_at,
                            fired: false,
                        },
                    );
                }
                HistoryEvent::TimerFired { seq, .. } => match steps.get_mut(&seq) {
                    Some(RecordedStep::Timer { fired, .. }) => *fired = true,
                    _ => {
                        return Err(PipelineError::Checkpoint(format!(
                            "timer fired at seq {} without being scheduled",
                            seq
                        )))
                    }
                },
            }
        }

        debug!(%run_id, recorded_steps = steps.len(), "Loaded run history");

        Ok(Self {
            run_id,
            store,
            steps,
            next_seq: 0,
            cancel,
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// True while the cursor is still inside recorded history
    pub fn is_replaying(&self) -> bool {
        self.steps.contains_key(&self.next_seq)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `activity` once per run, returning its recorded output on replay
    pub async fn call_activity<T, F, Fut>(&mut self, name: &str, activity: F) -> PipelineResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = PipelineResult<T>>,
    {
        let seq = self.next_seq;
        self.next_seq += 1;

        match self.steps.get(&seq) {
            Some(RecordedStep::Activity {
                name: recorded,
                output,
            }) => {
                if recorded != name {
                    return Err(PipelineError::NonDeterministicReplay {
                        seq,
                        expected: format!("activity '{}'", name),
                        found: format!("activity '{}'", recorded),
                    });
                }
                debug!(run_id = %self.run_id, seq, activity = name, "Replaying recorded activity");
                return Ok(serde_json::from_value(output.clone())?);
            }
            Some(other) => {
                return Err(PipelineError::NonDeterministicReplay {
                    seq,
                    expected: format!("activity '{}'", name),
                    found: other.describe(),
                });
            }
            None => {}
        }

        let output = activity().await?;
        let value = serde_json::to_value(&output)?;

        self.record(HistoryEvent::ActivityCompleted {
            seq,
            name: name.to_string(),
            output: value.clone(),
            completed_at: Utc::now(),
        })
        .await?;

        self.steps.insert(
            seq,
            RecordedStep::Activity {
                name: name.to_string(),
                output: value,
            },
        );

        Ok(output)
    }

    /// Durable delay. A resumed run waits only for the time remaining.
    ///
    /// Returns [`PipelineError::Cancelled`] if cancellation fires while waiting.
    pub async fn create_timer(&mut self, delay: Duration) -> PipelineResult<()> {
        let seq = self.next_seq;
        self.next_seq += 1;

        let fire_at = match self.steps.get(&seq) {
            Some(RecordedStep::Timer { fired: true, .. }) => return Ok(()),
            Some(RecordedStep::Timer { fire_at, .. }) => *fire_at,
            Some(other) => {
                return Err(PipelineError::NonDeterministicReplay {
                    seq,
                    expected: "timer".to_string(),
                    found: other.describe(),
                });
            }
            None => {
                let delay = chrono::Duration::from_std(delay).map_err(|e| {
                    PipelineError::Configuration(format!("timer delay out of range: {}", e))
                })?;
                let fire_at = Utc::now() + delay;

                self.record(HistoryEvent::TimerScheduled { seq, fire_at })
                    .await?;
                self.steps.insert(
                    seq,
                    RecordedStep::Timer {
                        fire_at,
                        fired: false,
                    },
                );
                fire_at
            }
        };

        let remaining = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        if !remaining.is_zero() {
            debug!(run_id = %self.run_id, seq, remaining_ms = remaining.as_millis() as u64, "Waiting on timer");
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
            }
        }

        self.record(HistoryEvent::TimerFired {
            seq,
            fired_at: Utc::now(),
        })
        .await?;
        self.steps.insert(
            seq,
            RecordedStep::Timer {
                fire_at,
                fired: true,
            },
        );

        Ok(())
    }

    #[instrument(skip(self, event), fields(run_id = %self.run_id, seq = event.seq(), kind = event.kind()))]
    async fn record(&self, event: HistoryEvent) -> PipelineResult<()> {
        self.store.append_event(self.run_id, &event).await
    }
}
