//! Site-survey slot reservation.
//!
//! The partial unique index on `survey_bookings(scheduled_date, scheduled_time)`
//! is the only thing that decides who gets a slot: a reservation first inserts
//! a `pending` row, and only the caller whose insert succeeds talks to the
//! calendar. The insert also refuses any slot whose `[start, end)` overlaps a
//! held booking, so off-grid start times cannot double-book the surveyor.
//! Rows stuck in `pending` (lost calendar responses) are settled by
//! [`SlotManager::reconcile_stale`].

pub mod hours;

use crate::config::BookingConfig;
use crate::errors::GatewayError;
use crate::providers::base::{Attendee, DateRange, Slot};
use crate::providers::resilient::ServiceGateway;
use crate::store::{BookingStatus, NewBooking, Store, SurveyBooking, Urgency};
use crate::utils::mask_phone;
use chrono::{DateTime, Days, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ReservationError {
    #[error("slot {} is not available", .slot.label())]
    SlotUnavailable {
        slot: Slot,
        /// Nearest bookable slots, chronological.
        alternatives: Vec<Slot>,
    },

    /// The calendar did not answer in time; the booking stays `pending` until
    /// reconciliation finds out whether the event exists.
    #[error("booking {booking_id} is awaiting calendar confirmation")]
    ReconciliationPending { booking_id: String },

    /// Unknown booking, or one that was already cancelled or moved.
    #[error("booking {booking_id} does not hold a slot")]
    NotHeld { booking_id: String },

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("booking persistence failed: {0}")]
    Persistence(anyhow::Error),
}

/// Outcome counts of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub examined: usize,
    pub scheduled: usize,
    pub released: usize,
    /// Left pending because the calendar could not be asked.
    pub deferred: usize,
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct SlotManager {
    store: Arc<Store>,
    gateway: Arc<ServiceGateway>,
    config: BookingConfig,
    timezone: Tz,
    /// Decides which slots are already in the past.
    clock: Clock,
}

impl SlotManager {
    pub fn new(
        store: Arc<Store>,
        gateway: Arc<ServiceGateway>,
        config: BookingConfig,
        timezone: Tz,
    ) -> Self {
        Self {
            store,
            gateway,
            config,
            timezone,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &BookingConfig {
        &self.config
    }

    fn local_now(&self) -> NaiveDateTime {
        (self.clock)().with_timezone(&self.timezone).naive_local()
    }

    /// The default search window: today plus `search_days`.
    pub fn default_range(&self) -> DateRange {
        let today = self.local_now().date();
        let end = today
            .checked_add_days(Days::new(u64::from(self.config.search_days)))
            .unwrap_or(today);
        DateRange::new(today, end)
    }

    /// Free slots in `range`, in business hours, not held locally and not in
    /// the past. Falls back to plain business hours when the calendar cannot
    /// be asked before `deadline`.
    pub async fn list_candidates(
        &self,
        range: &DateRange,
        duration_minutes: u32,
        deadline: Option<Instant>,
    ) -> Result<Vec<Slot>, ReservationError> {
        let offered = match self
            .gateway
            .list_free_slots(range, duration_minutes, deadline)
            .await
        {
            Ok(slots) => slots
                .into_iter()
                .filter(|s| hours::within_hours(&self.config.hours, s))
                .collect::<Vec<_>>(),
            Err(e) => {
                warn!("calendar unavailable, offering business hours: {}", e);
                hours::business_hours_slots(&self.config.hours, range, duration_minutes)
            }
        };

        let held = self
            .store
            .held_slots(range)
            .map_err(ReservationError::Persistence)?;
        let now = self.local_now();

        let mut slots: Vec<Slot> = offered
            .into_iter()
            .filter(|s| s.start() > now && !held.iter().any(|h| h.overlaps(s)))
            .collect();
        slots.sort();
        slots.dedup();
        Ok(slots)
    }

    fn bookable(&self, slot: &Slot) -> bool {
        slot.start() > self.local_now() && hours::within_hours(&self.config.hours, slot)
    }

    /// Reserve `slot` for `customer`. Exactly one of any number of concurrent
    /// callers for overlapping slots gets a booking. A calendar that has not
    /// answered by `deadline` leaves the booking for reconciliation.
    pub async fn reserve(
        &self,
        slot: Slot,
        customer: &Attendee,
        conversation_id: Option<&str>,
        deadline: Option<Instant>,
    ) -> Result<SurveyBooking, ReservationError> {
        if !self.bookable(&slot) {
            debug!("requested slot {} is outside bookable time", slot.label());
            return Err(self.unavailable(slot, deadline).await);
        }

        let booking_id = Uuid::new_v4().to_string();
        let pending = self
            .store
            .insert_pending_booking(&NewBooking {
                id: booking_id.clone(),
                conversation_id: conversation_id.map(str::to_string),
                customer: customer.clone(),
                slot,
            })
            .map_err(ReservationError::Persistence)?;
        let Some(pending) = pending else {
            info!("slot {} already held, offering alternatives", slot.label());
            return Err(self.unavailable(slot, deadline).await);
        };

        match self
            .gateway
            .create_event(&slot, customer, &booking_id, deadline)
            .await
        {
            Ok(event_id) => match self.store.mark_booking_scheduled(&booking_id, &event_id) {
                Ok(true) => {
                    info!(
                        "booked {} for {} (booking {})",
                        slot.label(),
                        mask_phone(&customer.phone),
                        booking_id
                    );
                    Ok(SurveyBooking {
                        status: BookingStatus::Scheduled,
                        calendar_event_id: Some(event_id),
                        updated_at: Utc::now(),
                        ..pending
                    })
                }
                Ok(false) => {
                    self.compensate(&booking_id, &event_id).await;
                    Err(ReservationError::Persistence(anyhow::anyhow!(
                        "booking {} left pending before it could be scheduled",
                        booking_id
                    )))
                }
                Err(e) => {
                    self.compensate(&booking_id, &event_id).await;
                    Err(ReservationError::Persistence(e))
                }
            },
            Err(GatewayError::Timeout { .. }) => {
                warn!(
                    "calendar timed out creating booking {}, leaving it for reconciliation",
                    booking_id
                );
                Err(ReservationError::ReconciliationPending { booking_id })
            }
            Err(e) => {
                warn!("calendar rejected booking {}: {}", booking_id, e);
                self.release(&booking_id);
                Err(ReservationError::Gateway(e))
            }
        }
    }

    /// Undo a calendar event whose local booking could not be recorded.
    async fn compensate(&self, booking_id: &str, event_id: &str) {
        warn!("cancelling calendar event for unrecorded booking {}", booking_id);
        if let Err(e) = self.gateway.cancel_event(event_id).await {
            error!(
                "compensation failed for booking {}, event {} may be orphaned: {}",
                booking_id, event_id, e
            );
            let detail = format!("booking {booking_id}, calendar event {event_id}");
            if let Err(flag_err) = self.store.add_review_flag(
                None,
                "orphaned calendar event",
                Urgency::High,
                Some(&detail),
            ) {
                error!("failed to flag orphaned event: {}", flag_err);
            }
        }
    }

    async fn unavailable(&self, slot: Slot, deadline: Option<Instant>) -> ReservationError {
        let alternatives = match self.alternatives(&slot, deadline).await {
            Ok(alternatives) => alternatives,
            Err(e) => {
                warn!("could not compute alternatives for {}: {}", slot.label(), e);
                Vec::new()
            }
        };
        ReservationError::SlotUnavailable { slot, alternatives }
    }

    /// The `alternatives` bookable slots closest in time to `slot`.
    pub async fn alternatives(
        &self,
        slot: &Slot,
        deadline: Option<Instant>,
    ) -> Result<Vec<Slot>, ReservationError> {
        let today = self.local_now().date();
        let start = slot.date.max(today);
        let end = start
            .checked_add_days(Days::new(u64::from(self.config.search_days)))
            .unwrap_or(start);
        let wanted = slot.start();

        let mut candidates = self
            .list_candidates(&DateRange::new(start, end), slot.duration_minutes, deadline)
            .await?;
        candidates.retain(|c| c.start() != wanted);
        candidates.sort_by_key(|c| (c.start() - wanted).num_minutes().abs());
        candidates.truncate(self.config.alternatives);
        candidates.sort();
        Ok(candidates)
    }

    /// Cancel a booking and its calendar event. Returns false when the
    /// booking does not exist or no longer holds its slot.
    pub async fn cancel(&self, booking_id: &str) -> Result<bool, ReservationError> {
        let booking = self
            .store
            .get_booking(booking_id)
            .map_err(ReservationError::Persistence)?;
        let Some(booking) = booking else {
            return Ok(false);
        };
        if !booking.status.holds_slot() {
            debug!("booking {} already {}", booking_id, booking.status);
            return Ok(false);
        }

        let event_id = match booking.calendar_event_id {
            Some(id) => Some(id),
            // A pending booking may have an event we never heard back about
            None => self.gateway.find_event(&booking.id).await?,
        };
        if let Some(event_id) = event_id {
            self.gateway.cancel_event(&event_id).await?;
        }

        let cancelled = self
            .store
            .transition_booking(booking_id, &BookingStatus::HOLDING, BookingStatus::Cancelled)
            .map_err(ReservationError::Persistence)?;
        if cancelled {
            info!("cancelled booking {}", booking_id);
        }
        Ok(cancelled)
    }

    /// Move a booking to `new_slot`. The new time is held under the same
    /// overlap rules as a fresh reservation, the calendar event is moved (or
    /// created when the old booking never got one) and the old row ends as
    /// `rescheduled`.
    pub async fn reschedule(
        &self,
        booking_id: &str,
        new_slot: Slot,
        deadline: Option<Instant>,
    ) -> Result<SurveyBooking, ReservationError> {
        let old = self
            .store
            .get_booking(booking_id)
            .map_err(ReservationError::Persistence)?
            .filter(|b| b.status.holds_slot())
            .ok_or_else(|| ReservationError::NotHeld {
                booking_id: booking_id.to_string(),
            })?;
        if old.slot == new_slot {
            debug!("booking {} already at {}", booking_id, new_slot.label());
            return Ok(old);
        }
        if !self.bookable(&new_slot) {
            debug!("reschedule target {} is outside bookable time", new_slot.label());
            return Err(self.unavailable(new_slot, deadline).await);
        }

        let new_id = Uuid::new_v4().to_string();
        let pending = self
            .store
            .insert_replacement_booking(
                &NewBooking {
                    id: new_id.clone(),
                    conversation_id: old.conversation_id.clone(),
                    customer: old.customer.clone(),
                    slot: new_slot,
                },
                &old.id,
            )
            .map_err(ReservationError::Persistence)?;
        let Some(pending) = pending else {
            info!("reschedule target {} already held", new_slot.label());
            return Err(self.unavailable(new_slot, deadline).await);
        };

        let existing_event = match old.calendar_event_id.clone() {
            Some(id) => Some(id),
            None => match self.gateway.find_event(&old.id).await {
                Ok(found) => found,
                Err(e) => {
                    self.release(&new_id);
                    return Err(e.into());
                }
            },
        };
        let moved = match &existing_event {
            Some(event_id) => self
                .gateway
                .move_event(event_id, &new_slot, &new_id, deadline)
                .await
                .map(|()| event_id.clone()),
            None => {
                self.gateway
                    .create_event(&new_slot, &old.customer, &new_id, deadline)
                    .await
            }
        };
        let event_id = match moved {
            Ok(event_id) => event_id,
            Err(e) => {
                warn!("calendar could not move booking {}: {}", booking_id, e);
                self.release(&new_id);
                if matches!(e, GatewayError::Timeout { .. }) {
                    // The calendar may have applied the change after all
                    let detail = format!("booking {booking_id} to {}", new_slot.label());
                    if let Err(flag_err) = self.store.add_review_flag(
                        old.conversation_id.as_deref(),
                        "reschedule_unconfirmed",
                        Urgency::High,
                        Some(&detail),
                    ) {
                        error!("failed to flag unconfirmed reschedule: {}", flag_err);
                    }
                }
                return Err(ReservationError::Gateway(e));
            }
        };

        let scheduled = self
            .store
            .mark_booking_scheduled(&new_id, &event_id)
            .map_err(ReservationError::Persistence)?;
        let retired = self
            .store
            .transition_booking(&old.id, &BookingStatus::HOLDING, BookingStatus::Rescheduled)
            .map_err(ReservationError::Persistence)?;
        if !scheduled || !retired {
            warn!(
                "booking {} changed while it was being moved to {}",
                booking_id, new_id
            );
        }
        info!(
            "rescheduled booking {} from {} to {} (booking {})",
            booking_id,
            old.slot.label(),
            new_slot.label(),
            new_id
        );
        Ok(SurveyBooking {
            status: BookingStatus::Scheduled,
            calendar_event_id: Some(event_id),
            updated_at: Utc::now(),
            ..pending
        })
    }

    fn release(&self, booking_id: &str) {
        if let Err(e) =
            self.store
                .transition_booking(booking_id, &[BookingStatus::Pending], BookingStatus::Cancelled)
        {
            error!("failed to release booking {}: {}", booking_id, e);
        }
    }

    /// Settle `pending` bookings older than `older_than` by looking their
    /// event up in the calendar.
    pub async fn reconcile_stale(&self, older_than: Duration) -> Result<ReconcileReport, ReservationError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::zero());
        let stale = self
            .store
            .stale_pending_bookings(cutoff)
            .map_err(ReservationError::Persistence)?;

        let mut report = ReconcileReport {
            examined: stale.len(),
            ..ReconcileReport::default()
        };
        for booking in stale {
            match self.gateway.find_event(&booking.id).await {
                Ok(Some(event_id)) => {
                    let scheduled = self
                        .store
                        .mark_booking_scheduled(&booking.id, &event_id)
                        .map_err(ReservationError::Persistence)?;
                    if scheduled {
                        report.scheduled += 1;
                        if let Some(conversation_id) = &booking.conversation_id {
                            self.store
                                .mark_survey_booked(conversation_id)
                                .map_err(ReservationError::Persistence)?;
                        }
                        info!("reconciled booking {} as scheduled", booking.id);
                    }
                }
                Ok(None) => {
                    let released = self
                        .store
                        .transition_booking(&booking.id, &[BookingStatus::Pending], BookingStatus::Cancelled)
                        .map_err(ReservationError::Persistence)?;
                    if released {
                        report.released += 1;
                        info!("released stale booking {}, no calendar event", booking.id);
                    }
                }
                Err(e) => {
                    report.deferred += 1;
                    debug!("booking {} left for next sweep: {}", booking.id, e);
                }
            }
        }
        Ok(report)
    }
}
