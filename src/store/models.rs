use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

use crate::providers::base::{Attendee, Slot};

string_enum! {
    pub enum BookingStatus {
        /// Slot held while the calendar event is being created.
        Pending => "pending",
        Scheduled => "scheduled",
        Confirmed => "confirmed",
        Completed => "completed",
        Cancelled => "cancelled",
        NoShow => "no_show",
        Rescheduled => "rescheduled",
    }
}

impl BookingStatus {
    /// Statuses that occupy their slot.
    pub const HOLDING: [BookingStatus; 3] = [Self::Pending, Self::Scheduled, Self::Confirmed];

    pub fn holds_slot(self) -> bool {
        Self::HOLDING.contains(&self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SurveyBooking {
    /// Also the idempotency reference stored on the calendar event.
    pub id: String,
    pub conversation_id: Option<String>,
    pub customer: Attendee,
    pub slot: Slot,
    pub status: BookingStatus,
    pub calendar_event_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub id: String,
    pub conversation_id: Option<String>,
    pub customer: Attendee,
    pub slot: Slot,
}

string_enum! {
    pub enum CallDirection {
        Inbound => "inbound",
        Outbound => "outbound",
    }
}

string_enum! {
    pub enum CallStatus {
        Ringing => "ringing",
        InProgress => "in_progress",
        Completed => "completed",
        Failed => "failed",
        Transferred => "transferred",
        Voicemail => "voicemail",
    }
}

impl CallStatus {
    pub fn is_final(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Transferred | Self::Voicemail
        )
    }

    /// `ringing -> in_progress -> {completed, failed, transferred, voicemail}`.
    /// A call may also end straight from ringing (missed, voicemail).
    pub fn can_transition_to(self, next: CallStatus) -> bool {
        match (self, next) {
            (Self::Ringing, Self::InProgress) => true,
            (Self::Ringing | Self::InProgress, n) => n.is_final(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhoneCall {
    pub vapi_call_id: String,
    pub conversation_id: String,
    pub direction: CallDirection,
    pub status: CallStatus,
    pub duration_secs: Option<u32>,
    pub recording_url: Option<String>,
    pub functions_invoked: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

string_enum! {
    pub enum SideEffectKind {
        CrmUpsert => "crm_upsert",
    }
}

string_enum! {
    pub enum SideEffectStatus {
        Pending => "pending",
        Done => "done",
        /// Gave up after the maximum number of attempts.
        Dead => "dead",
    }
}

#[derive(Debug, Clone)]
pub struct SideEffect {
    pub id: i64,
    pub kind: SideEffectKind,
    pub payload: String,
    pub attempts: u32,
    pub status: SideEffectStatus,
    pub last_error: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
}

string_enum! {
    pub enum Urgency {
        Normal => "normal",
        High => "high",
        Urgent => "urgent",
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewFlag {
    pub id: i64,
    pub conversation_id: Option<String>,
    pub reason: String,
    pub urgency: Urgency,
    pub detail: Option<String>,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

/// Counts shown by the health endpoint and the `status` command.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub active_conversations: u64,
    pub pending_bookings: u64,
    pub pending_side_effects: u64,
    pub open_review_flags: u64,
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn format_time(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}
