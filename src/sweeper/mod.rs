//! Background sweeper: settles bookings whose calendar confirmation never
//! arrived and retries queued CRM updates.

use crate::booking::{ReconcileReport, SlotManager};
use crate::conversation::{CrmSync, contact_snapshot};
use crate::providers::resilient::ServiceGateway;
use crate::store::{SideEffect, SideEffectKind, SideEffectStatus, Store, Urgency};
use crate::utils::mask_phone;
use crate::utils::task_tracker::TaskTracker;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Side effects handled per sweep.
const SIDE_EFFECT_BATCH: usize = 50;

const RETRY_BASE_SECS: i64 = 30;
const RETRY_MAX_SECS: i64 = 3600;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub bookings: ReconcileReport,
    pub side_effects_done: usize,
    pub side_effects_retrying: usize,
    pub side_effects_dead: usize,
}

/// Delay before the next attempt after `attempts` failures.
pub fn retry_delay(attempts: u32) -> chrono::Duration {
    let secs = RETRY_BASE_SECS.saturating_mul(1_i64 << attempts.min(16));
    chrono::Duration::seconds(secs.min(RETRY_MAX_SECS))
}

pub struct Sweeper {
    store: Arc<Store>,
    gateway: Arc<ServiceGateway>,
    slots: Arc<SlotManager>,
    running: Arc<tokio::sync::Mutex<bool>>,
    task_tracker: TaskTracker,
}

impl Sweeper {
    pub fn new(store: Arc<Store>, gateway: Arc<ServiceGateway>, slots: Arc<SlotManager>) -> Self {
        Self {
            store,
            gateway,
            slots,
            running: Arc::new(tokio::sync::Mutex::new(false)),
            task_tracker: TaskTracker::new(),
        }
    }

    /// One pass over stale bookings and due side effects.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let older_than = Duration::from_secs(self.slots.config().pending_timeout_secs);
        let bookings = match self.slots.reconcile_stale(older_than).await {
            Ok(report) => report,
            Err(e) => {
                error!("booking reconciliation failed: {}", e);
                ReconcileReport::default()
            }
        };
        let mut report = SweepReport {
            bookings,
            ..SweepReport::default()
        };
        self.drain_side_effects(Utc::now(), &mut report).await?;

        if report != SweepReport::default() {
            info!(
                "sweep: bookings {}/{} settled, side effects {} done, {} retrying, {} dead",
                report.bookings.scheduled + report.bookings.released,
                report.bookings.examined,
                report.side_effects_done,
                report.side_effects_retrying,
                report.side_effects_dead
            );
        }
        Ok(report)
    }

    async fn drain_side_effects(&self, now: DateTime<Utc>, report: &mut SweepReport) -> Result<()> {
        let due = self.store.due_side_effects(now, SIDE_EFFECT_BATCH)?;
        let max_attempts = self.slots.config().side_effect_max_attempts;
        for effect in due {
            match self.apply(&effect).await {
                Ok(()) => {
                    self.store.complete_side_effect(effect.id)?;
                    report.side_effects_done += 1;
                }
                Err(e) => {
                    let next_at = now + retry_delay(effect.attempts);
                    let status =
                        self.store
                            .fail_side_effect(effect.id, &format!("{:#}", e), next_at, max_attempts)?;
                    if status == SideEffectStatus::Dead {
                        warn!(
                            "side effect {} ({}) gave up after {} attempts: {:#}",
                            effect.id,
                            effect.kind,
                            effect.attempts + 1,
                            e
                        );
                        self.store.add_review_flag(
                            None,
                            "crm_sync_abandoned",
                            Urgency::High,
                            Some(&format!("side effect {}: {:#}", effect.id, e)),
                        )?;
                        report.side_effects_dead += 1;
                    } else {
                        debug!("side effect {} failed, retry at {}: {:#}", effect.id, next_at, e);
                        report.side_effects_retrying += 1;
                    }
                }
            }
        }
        Ok(())
    }

    async fn apply(&self, effect: &SideEffect) -> Result<()> {
        match effect.kind {
            SideEffectKind::CrmUpsert => {
                let job: CrmSync = serde_json::from_str(&effect.payload)
                    .context("corrupt CRM payload")?;
                // Send what the conversation looks like now, not when the push failed
                let Some(conversation) = self.store.get_conversation(&job.conversation_id)? else {
                    debug!("conversation {} gone, dropping CRM update", job.conversation_id);
                    return Ok(());
                };
                let snapshot = contact_snapshot(&conversation);
                let contact_id = self.gateway.upsert_contact(&snapshot).await?;
                self.store
                    .set_crm_contact_id(&snapshot.conversation_id, &contact_id)?;
                debug!("queued CRM update for {} delivered", mask_phone(&snapshot.phone));
                Ok(())
            }
        }
    }

    pub async fn start(&self) {
        *self.running.lock().await = true;
        let running = self.running.clone();
        let interval = self.slots.config().sweep_interval_secs.max(1);
        let sweeper = Self {
            store: self.store.clone(),
            gateway: self.gateway.clone(),
            slots: self.slots.clone(),
            running: self.running.clone(),
            task_tracker: TaskTracker::new(),
        };

        self.task_tracker
            .spawn("sweeper", async move {
                loop {
                    tokio::time::sleep(Duration::from_secs(interval)).await;
                    if !*running.lock().await {
                        break;
                    }
                    if let Err(e) = sweeper.sweep_once().await {
                        error!("sweep failed: {:#}", e);
                    }
                }
            })
            .await;
        info!("sweeper started (every {}s)", interval);
    }

    pub async fn stop(&self) {
        *self.running.lock().await = false;
        self.task_tracker.cancel_all().await;
    }
}
