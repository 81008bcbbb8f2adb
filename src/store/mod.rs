pub mod models;

use crate::conversation::types::{
    Channel, Conversation, ConversationStatus, Message, MessageRole, NewMessage,
};
use crate::providers::base::{Attendee, DateRange, Slot};
use crate::scoring::{ExtractedInfo, LeadScore, LeadTier, ScoringPolicy, score};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

pub use models::{
    BookingStatus, CallDirection, CallStatus, NewBooking, PhoneCall, ReviewFlag, SideEffect,
    SideEffectKind, SideEffectStatus, StoreStats, SurveyBooking, Urgency,
};
use models::{format_date, format_time};

const CONVERSATION_COLUMNS: &str = "id, external_identity, channel, status, lead_score, lead_tier,
    extracted_info, survey_booked, crm_contact_id, close_reason, started_at, ended_at, updated_at";

const MESSAGE_COLUMNS: &str = "conversation_id, seq, role, content, content_type, sentiment,
    token_count, latency_ms, created_at";

const BOOKING_COLUMNS: &str = "id, conversation_id, customer_name, phone, email, address,
    postcode, scheduled_date, scheduled_time, duration_minutes, status, calendar_event_id,
    created_at, updated_at";

const CALL_COLUMNS: &str = "vapi_call_id, conversation_id, direction, status, duration_secs,
    recording_url, functions_invoked, started_at, ended_at";

/// Result of merging new extraction data into a conversation.
#[derive(Debug, Clone)]
pub struct ExtractionUpdate {
    pub info: ExtractedInfo,
    pub score: LeadScore,
    pub previous_tier: Option<LeadTier>,
}

impl ExtractionUpdate {
    pub fn tier_changed(&self) -> bool {
        self.previous_tier != Some(self.score.tier)
    }
}

/// SQLite persistence for conversations, bookings and the retry queue.
///
/// One connection behind a `std` mutex; every method is synchronous and
/// never holds the lock across an `.await`. Cross-process correctness
/// comes from the unique indexes, not from the mutex.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!(
                    "Failed to create database parent directory: {}",
                    parent.display()
                )
            })?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at: {}", db_path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=3000;
             PRAGMA foreign_keys=ON;",
        )?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema().with_context(|| {
            format!(
                "Failed to initialize database schema at: {}",
                db_path.display()
            )
        })?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                external_identity TEXT NOT NULL,
                channel TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                lead_score INTEGER,
                lead_tier TEXT,
                extracted_info TEXT NOT NULL DEFAULT '{}',
                survey_booked INTEGER NOT NULL DEFAULT 0,
                crm_contact_id TEXT,
                close_reason TEXT,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                updated_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_active
                ON conversations(external_identity, channel) WHERE status = 'active';

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                seq INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                content_type TEXT NOT NULL,
                sentiment TEXT,
                token_count INTEGER,
                latency_ms INTEGER,
                created_at TEXT NOT NULL,
                UNIQUE (conversation_id, seq)
            );

            CREATE TABLE IF NOT EXISTS extracted_info_history (
                id INTEGER PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                info TEXT NOT NULL,
                lead_score INTEGER NOT NULL,
                lead_tier TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS phone_calls (
                vapi_call_id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL UNIQUE
                    REFERENCES conversations(id) ON DELETE CASCADE,
                direction TEXT NOT NULL,
                status TEXT NOT NULL,
                duration_secs INTEGER,
                recording_url TEXT,
                functions_invoked TEXT NOT NULL DEFAULT '[]',
                started_at TEXT NOT NULL,
                ended_at TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS survey_bookings (
                id TEXT PRIMARY KEY,
                conversation_id TEXT REFERENCES conversations(id) ON DELETE SET NULL,
                customer_name TEXT NOT NULL,
                phone TEXT NOT NULL,
                email TEXT,
                address TEXT,
                postcode TEXT,
                scheduled_date TEXT NOT NULL,
                scheduled_time TEXT NOT NULL,
                duration_minutes INTEGER NOT NULL,
                status TEXT NOT NULL,
                calendar_event_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_bookings_slot
                ON survey_bookings(scheduled_date, scheduled_time)
                WHERE status IN ('pending', 'scheduled', 'confirmed');
            CREATE INDEX IF NOT EXISTS idx_bookings_status
                ON survey_bookings(status, created_at);

            CREATE TABLE IF NOT EXISTS side_effects (
                id INTEGER PRIMARY KEY,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'pending',
                last_error TEXT,
                next_attempt_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_side_effects_due
                ON side_effects(status, next_attempt_at);

            CREATE TABLE IF NOT EXISTS review_flags (
                id INTEGER PRIMARY KEY,
                conversation_id TEXT REFERENCES conversations(id) ON DELETE SET NULL,
                reason TEXT NOT NULL,
                urgency TEXT NOT NULL,
                detail TEXT,
                resolved INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    // ── Conversations ───────────────────────────────────────────

    /// Return the active conversation for `(identity, channel)`, creating it
    /// if there is none. The bool is true when a row was created.
    pub fn open_conversation(
        &self,
        identity: &str,
        channel: Channel,
    ) -> Result<(Conversation, bool)> {
        let conn = self.lock()?;
        let now = timestamp(Utc::now());
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO conversations
                (id, external_identity, channel, status, started_at, updated_at)
             VALUES (?1, ?2, ?3, 'active', ?4, ?4)",
            params![Uuid::new_v4().to_string(), identity, channel, now],
        )?;
        let conversation = conn
            .query_row(
                &format!(
                    "SELECT {} FROM conversations
                     WHERE external_identity = ?1 AND channel = ?2 AND status = 'active'",
                    CONVERSATION_COLUMNS
                ),
                params![identity, channel],
                conversation_from_row,
            )
            .context("active conversation vanished after insert")?;
        Ok((conversation, inserted == 1))
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let conn = self.lock()?;
        let conversation = conn
            .query_row(
                &format!("SELECT {} FROM conversations WHERE id = ?1", CONVERSATION_COLUMNS),
                [id],
                conversation_from_row,
            )
            .optional()?;
        Ok(conversation)
    }

    pub fn find_active_conversation(
        &self,
        identity: &str,
        channel: Channel,
    ) -> Result<Option<Conversation>> {
        let conn = self.lock()?;
        let conversation = conn
            .query_row(
                &format!(
                    "SELECT {} FROM conversations
                     WHERE external_identity = ?1 AND channel = ?2 AND status = 'active'",
                    CONVERSATION_COLUMNS
                ),
                params![identity, channel],
                conversation_from_row,
            )
            .optional()?;
        Ok(conversation)
    }

    pub fn touch_conversation(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            params![timestamp(Utc::now()), id],
        )?;
        Ok(())
    }

    /// Move an active conversation to a terminal status. Returns false when
    /// it was already terminal.
    pub fn close_conversation(
        &self,
        id: &str,
        status: ConversationStatus,
        reason: &str,
    ) -> Result<bool> {
        anyhow::ensure!(status.is_terminal(), "cannot close into status {}", status);
        let conn = self.lock()?;
        let now = timestamp(Utc::now());
        let changed = conn.execute(
            "UPDATE conversations
             SET status = ?1, close_reason = ?2, ended_at = ?3, updated_at = ?3
             WHERE id = ?4 AND status = 'active'",
            params![status, reason, now, id],
        )?;
        Ok(changed == 1)
    }

    /// Merge `update` into the stored snapshot, rescore, and record the
    /// result in the history table, atomically. The score column is only
    /// ever written here.
    pub fn merge_extracted_info(
        &self,
        conversation_id: &str,
        update: ExtractedInfo,
        policy: &ScoringPolicy,
    ) -> Result<ExtractionUpdate> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let (current, previous_tier): (String, Option<String>) = tx
            .query_row(
                "SELECT extracted_info, lead_tier FROM conversations WHERE id = ?1",
                [conversation_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .with_context(|| format!("conversation {} not found", conversation_id))?;
        let mut info: ExtractedInfo =
            serde_json::from_str(&current).context("corrupt extracted_info column")?;
        let previous_tier = previous_tier.map(|t| t.parse::<LeadTier>()).transpose()?;

        info.merge(update);
        let lead_score = score(&info, policy);
        let info_json = serde_json::to_string(&info)?;
        let now = timestamp(Utc::now());

        tx.execute(
            "UPDATE conversations
             SET extracted_info = ?1, lead_score = ?2, lead_tier = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                info_json,
                lead_score.score,
                lead_score.tier.as_str(),
                now,
                conversation_id
            ],
        )?;
        tx.execute(
            "INSERT INTO extracted_info_history
                (conversation_id, info, lead_score, lead_tier, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                conversation_id,
                info_json,
                lead_score.score,
                lead_score.tier.as_str(),
                now
            ],
        )?;
        tx.commit()?;

        Ok(ExtractionUpdate {
            info,
            score: lead_score,
            previous_tier,
        })
    }

    pub fn extraction_history_len(&self, conversation_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM extracted_info_history WHERE conversation_id = ?1",
            [conversation_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn set_crm_contact_id(&self, conversation_id: &str, contact_id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE conversations SET crm_contact_id = ?1 WHERE id = ?2",
            params![contact_id, conversation_id],
        )?;
        Ok(())
    }

    pub fn mark_survey_booked(&self, conversation_id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE conversations SET survey_booked = 1, updated_at = ?1 WHERE id = ?2",
            params![timestamp(Utc::now()), conversation_id],
        )?;
        Ok(())
    }

    // ── Messages ────────────────────────────────────────────────

    /// Append a message with the next sequence number for its conversation.
    pub fn append_message(&self, conversation_id: &str, message: &NewMessage) -> Result<Message> {
        let conn = self.lock()?;
        let now = Utc::now();
        let seq: i64 = conn
            .query_row(
                "INSERT INTO messages
                    (conversation_id, seq, role, content, content_type, sentiment,
                     token_count, latency_ms, created_at)
                 SELECT ?1, COALESCE(MAX(seq), 0) + 1, ?2, ?3, ?4, ?5, ?6, ?7, ?8
                 FROM messages WHERE conversation_id = ?1
                 RETURNING seq",
                params![
                    conversation_id,
                    message.role,
                    message.content,
                    message.content_type,
                    message.sentiment,
                    message.token_count,
                    message.latency_ms.map(|ms| ms as i64),
                    timestamp(now)
                ],
                |row| row.get(0),
            )
            .with_context(|| format!("failed to append message to {}", conversation_id))?;
        Ok(Message {
            conversation_id: conversation_id.to_string(),
            seq,
            role: message.role,
            content: message.content.clone(),
            content_type: message.content_type,
            sentiment: message.sentiment.clone(),
            token_count: message.token_count,
            latency_ms: message.latency_ms,
            created_at: now,
        })
    }

    /// The most recent `limit` messages, oldest first.
    pub fn recent_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages WHERE conversation_id = ?1 ORDER BY seq DESC LIMIT ?2",
            MESSAGE_COLUMNS
        ))?;
        let mut messages = stmt
            .query_map(params![conversation_id, limit as i64], message_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    // ── Bookings ────────────────────────────────────────────────

    /// Insert a `pending` booking. `None` means its time overlaps a booking
    /// that already holds a slot.
    pub fn insert_pending_booking(&self, booking: &NewBooking) -> Result<Option<SurveyBooking>> {
        self.insert_pending(booking, None)
    }

    /// Like [`Store::insert_pending_booking`], but the booking `replacing`
    /// does not count as a clash: a visit may move to a time that overlaps
    /// its own current slot.
    pub fn insert_replacement_booking(
        &self,
        booking: &NewBooking,
        replacing: &str,
    ) -> Result<Option<SurveyBooking>> {
        self.insert_pending(booking, Some(replacing))
    }

    fn insert_pending(
        &self,
        booking: &NewBooking,
        replacing: Option<&str>,
    ) -> Result<Option<SurveyBooking>> {
        let mut conn = self.lock()?;
        // IMMEDIATE takes the write lock up front, so the overlap check and
        // the insert are atomic against other processes sharing the file
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let clash = {
            let mut stmt = tx.prepare(
                "SELECT id, scheduled_time, duration_minutes FROM survey_bookings
                 WHERE scheduled_date = ?1
                   AND status IN ('pending', 'scheduled', 'confirmed')",
            )?;
            let held = stmt
                .query_map([format_date(booking.slot.date)], |row| {
                    let id: String = row.get(0)?;
                    let slot = Slot::new(booking.slot.date, parse_time(row, 1)?, row.get(2)?);
                    Ok((id, slot))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            held.into_iter()
                .find(|(id, slot)| Some(id.as_str()) != replacing && slot.overlaps(&booking.slot))
        };
        if let Some((id, held)) = clash {
            debug!(
                "slot {} {} overlaps booking {} at {}",
                booking.slot.date, booking.slot.time, id, held.time
            );
            return Ok(None);
        }

        let now = Utc::now();
        let result = tx.execute(
            "INSERT INTO survey_bookings
                (id, conversation_id, customer_name, phone, email, address, postcode,
                 scheduled_date, scheduled_time, duration_minutes, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'pending', ?11, ?11)",
            params![
                booking.id,
                booking.conversation_id,
                booking.customer.name,
                booking.customer.phone,
                booking.customer.email,
                booking.customer.address,
                booking.customer.postcode,
                format_date(booking.slot.date),
                format_time(booking.slot.time),
                booking.slot.duration_minutes,
                timestamp(now)
            ],
        );
        match result {
            Ok(_) => {
                tx.commit()?;
                Ok(Some(SurveyBooking {
                    id: booking.id.clone(),
                    conversation_id: booking.conversation_id.clone(),
                    customer: booking.customer.clone(),
                    slot: booking.slot,
                    status: BookingStatus::Pending,
                    calendar_event_id: None,
                    created_at: now,
                    updated_at: now,
                }))
            }
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                debug!(
                    "slot {} {} already held",
                    booking.slot.date, booking.slot.time
                );
                Ok(None)
            }
            Err(e) => Err(e).context("failed to insert booking"),
        }
    }

    pub fn get_booking(&self, id: &str) -> Result<Option<SurveyBooking>> {
        let conn = self.lock()?;
        let booking = conn
            .query_row(
                &format!("SELECT {} FROM survey_bookings WHERE id = ?1", BOOKING_COLUMNS),
                [id],
                booking_from_row,
            )
            .optional()?;
        Ok(booking)
    }

    pub fn bookings_for_conversation(&self, conversation_id: &str) -> Result<Vec<SurveyBooking>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM survey_bookings WHERE conversation_id = ?1 ORDER BY created_at, rowid",
            BOOKING_COLUMNS
        ))?;
        let rows = stmt
            .query_map([conversation_id], booking_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// `pending -> scheduled` with the calendar event id.
    pub fn mark_booking_scheduled(&self, id: &str, calendar_event_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE survey_bookings
             SET status = 'scheduled', calendar_event_id = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'pending'",
            params![calendar_event_id, timestamp(Utc::now()), id],
        )?;
        Ok(changed == 1)
    }

    /// Move a booking to `to` if it is currently in one of `from`.
    pub fn transition_booking(
        &self,
        id: &str,
        from: &[BookingStatus],
        to: BookingStatus,
    ) -> Result<bool> {
        if from.is_empty() {
            return Ok(false);
        }
        let allowed = from
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let conn = self.lock()?;
        let changed = conn.execute(
            &format!(
                "UPDATE survey_bookings SET status = ?1, updated_at = ?2
                 WHERE id = ?3 AND status IN ({})",
                allowed
            ),
            params![to, timestamp(Utc::now()), id],
        )?;
        Ok(changed == 1)
    }

    /// Slots held by pending, scheduled or confirmed bookings.
    pub fn held_slots(&self, range: &DateRange) -> Result<Vec<Slot>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT scheduled_date, scheduled_time, duration_minutes FROM survey_bookings
             WHERE scheduled_date BETWEEN ?1 AND ?2
               AND status IN ('pending', 'scheduled', 'confirmed')",
        )?;
        let rows = stmt
            .query_map(
                params![format_date(range.start), format_date(range.end)],
                |row| Ok(Slot::new(parse_date(row, 0)?, parse_time(row, 1)?, row.get(2)?)),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn stale_pending_bookings(&self, created_before: DateTime<Utc>) -> Result<Vec<SurveyBooking>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM survey_bookings
             WHERE status = 'pending' AND created_at <= ?1 ORDER BY created_at",
            BOOKING_COLUMNS
        ))?;
        let rows = stmt
            .query_map([timestamp(created_before)], booking_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Side effects ────────────────────────────────────────────

    pub fn enqueue_side_effect(&self, kind: SideEffectKind, payload: &str) -> Result<i64> {
        let conn = self.lock()?;
        let now = timestamp(Utc::now());
        conn.execute(
            "INSERT INTO side_effects (kind, payload, next_attempt_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3, ?3)",
            params![kind, payload, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn due_side_effects(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<SideEffect>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, kind, payload, attempts, status, last_error, next_attempt_at
             FROM side_effects
             WHERE status = 'pending' AND next_attempt_at <= ?1
             ORDER BY id LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![timestamp(now), limit as i64], |row| {
                Ok(SideEffect {
                    id: row.get(0)?,
                    kind: row.get(1)?,
                    payload: row.get(2)?,
                    attempts: row.get(3)?,
                    status: row.get(4)?,
                    last_error: row.get(5)?,
                    next_attempt_at: parse_timestamp(row, 6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn complete_side_effect(&self, id: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE side_effects SET status = 'done', updated_at = ?1 WHERE id = ?2",
            params![timestamp(Utc::now()), id],
        )?;
        Ok(())
    }

    /// Count a failed attempt; the entry goes `dead` once `max_attempts` is
    /// reached. Returns the resulting status.
    pub fn fail_side_effect(
        &self,
        id: i64,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<SideEffectStatus> {
        let conn = self.lock()?;
        let status: SideEffectStatus = conn.query_row(
            "UPDATE side_effects
             SET attempts = attempts + 1,
                 last_error = ?1,
                 next_attempt_at = ?2,
                 updated_at = ?3,
                 status = CASE WHEN attempts + 1 >= ?4 THEN 'dead' ELSE 'pending' END
             WHERE id = ?5
             RETURNING status",
            params![
                error,
                timestamp(next_attempt_at),
                timestamp(Utc::now()),
                max_attempts,
                id
            ],
            |row| row.get(0),
        )?;
        Ok(status)
    }

    // ── Review flags ────────────────────────────────────────────

    pub fn add_review_flag(
        &self,
        conversation_id: Option<&str>,
        reason: &str,
        urgency: Urgency,
        detail: Option<&str>,
    ) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO review_flags (conversation_id, reason, urgency, detail, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![conversation_id, reason, urgency, detail, timestamp(Utc::now())],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_review_flags(&self, include_resolved: bool) -> Result<Vec<ReviewFlag>> {
        let conn = self.lock()?;
        let sql = if include_resolved {
            "SELECT id, conversation_id, reason, urgency, detail, resolved, created_at
             FROM review_flags ORDER BY id"
        } else {
            "SELECT id, conversation_id, reason, urgency, detail, resolved, created_at
             FROM review_flags WHERE resolved = 0 ORDER BY id"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ReviewFlag {
                    id: row.get(0)?,
                    conversation_id: row.get(1)?,
                    reason: row.get(2)?,
                    urgency: row.get(3)?,
                    detail: row.get(4)?,
                    resolved: row.get(5)?,
                    created_at: parse_timestamp(row, 6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn resolve_review_flag(&self, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute("UPDATE review_flags SET resolved = 1 WHERE id = ?1", [id])?;
        Ok(changed == 1)
    }

    // ── Phone calls ─────────────────────────────────────────────

    /// Record a call in `ringing`. Repeated starts for the same call id are
    /// ignored and return the existing row.
    pub fn start_phone_call(
        &self,
        vapi_call_id: &str,
        conversation_id: &str,
        direction: CallDirection,
    ) -> Result<PhoneCall> {
        let conn = self.lock()?;
        let now = timestamp(Utc::now());
        conn.execute(
            "INSERT OR IGNORE INTO phone_calls
                (vapi_call_id, conversation_id, direction, status, started_at, updated_at)
             VALUES (?1, ?2, ?3, 'ringing', ?4, ?4)",
            params![vapi_call_id, conversation_id, direction, now],
        )?;
        let call = conn.query_row(
            &format!("SELECT {} FROM phone_calls WHERE vapi_call_id = ?1", CALL_COLUMNS),
            [vapi_call_id],
            call_from_row,
        )?;
        Ok(call)
    }

    pub fn get_phone_call(&self, vapi_call_id: &str) -> Result<Option<PhoneCall>> {
        let conn = self.lock()?;
        let call = conn
            .query_row(
                &format!("SELECT {} FROM phone_calls WHERE vapi_call_id = ?1", CALL_COLUMNS),
                [vapi_call_id],
                call_from_row,
            )
            .optional()?;
        Ok(call)
    }

    /// Apply a status change if the call state machine allows it. Final
    /// statuses also record duration, recording and end time.
    pub fn update_call_status(
        &self,
        vapi_call_id: &str,
        next: CallStatus,
        duration_secs: Option<u32>,
        recording_url: Option<&str>,
    ) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let current: Option<CallStatus> = tx
            .query_row(
                "SELECT status FROM phone_calls WHERE vapi_call_id = ?1",
                [vapi_call_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Ok(false);
        };
        if !current.can_transition_to(next) {
            debug!(
                "ignoring call {} transition {} -> {}",
                vapi_call_id, current, next
            );
            return Ok(false);
        }
        let now = timestamp(Utc::now());
        let ended_at = next.is_final().then_some(now.as_str());
        tx.execute(
            "UPDATE phone_calls
             SET status = ?1,
                 duration_secs = COALESCE(?2, duration_secs),
                 recording_url = COALESCE(?3, recording_url),
                 ended_at = COALESCE(?4, ended_at),
                 updated_at = ?5
             WHERE vapi_call_id = ?6",
            params![next, duration_secs, recording_url, ended_at, now, vapi_call_id],
        )?;
        tx.commit()?;
        Ok(true)
    }

    pub fn record_call_function(&self, vapi_call_id: &str, function: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE phone_calls
             SET functions_invoked = json_insert(functions_invoked, '$[#]', ?1),
                 updated_at = ?2
             WHERE vapi_call_id = ?3",
            params![function, timestamp(Utc::now()), vapi_call_id],
        )?;
        Ok(())
    }

    /// Fill in duration and recording of a call that has already ended.
    pub fn attach_call_report(
        &self,
        vapi_call_id: &str,
        duration_secs: Option<u32>,
        recording_url: Option<&str>,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE phone_calls
             SET duration_secs = COALESCE(?1, duration_secs),
                 recording_url = COALESCE(?2, recording_url),
                 updated_at = ?3
             WHERE vapi_call_id = ?4 AND ended_at IS NOT NULL",
            params![duration_secs, recording_url, timestamp(Utc::now()), vapi_call_id],
        )?;
        Ok(changed > 0)
    }

    // ── Stats ───────────────────────────────────────────────────

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;
        let count = |sql: &str| -> Result<u64> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as u64)
        };
        Ok(StoreStats {
            active_conversations: count(
                "SELECT COUNT(*) FROM conversations WHERE status = 'active'",
            )?,
            pending_bookings: count("SELECT COUNT(*) FROM survey_bookings WHERE status = 'pending'")?,
            pending_side_effects: count(
                "SELECT COUNT(*) FROM side_effects WHERE status = 'pending'",
            )?,
            open_review_flags: count("SELECT COUNT(*) FROM review_flags WHERE resolved = 0")?,
        })
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn parse_optional_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

fn parse_date(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| conversion_error(idx, e))
}

fn parse_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveTime> {
    let raw: String = row.get(idx)?;
    NaiveTime::parse_from_str(&raw, "%H:%M").map_err(|e| conversion_error(idx, e))
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    let lead_tier: Option<String> = row.get(5)?;
    let extracted: String = row.get(6)?;
    let lead_score: Option<i64> = row.get(4)?;
    Ok(Conversation {
        id: row.get(0)?,
        external_identity: row.get(1)?,
        channel: row.get(2)?,
        status: row.get(3)?,
        lead_score: lead_score.map(|s| s.clamp(0, 100) as u8),
        lead_tier: lead_tier
            .map(|t| t.parse::<LeadTier>())
            .transpose()
            .map_err(|e| conversion_error(5, e))?,
        extracted_info: serde_json::from_str(&extracted).map_err(|e| conversion_error(6, e))?,
        survey_booked: row.get(7)?,
        crm_contact_id: row.get(8)?,
        close_reason: row.get(9)?,
        started_at: parse_timestamp(row, 10)?,
        ended_at: parse_optional_timestamp(row, 11)?,
        updated_at: parse_timestamp(row, 12)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let latency: Option<i64> = row.get(7)?;
    Ok(Message {
        conversation_id: row.get(0)?,
        seq: row.get(1)?,
        role: row.get::<_, MessageRole>(2)?,
        content: row.get(3)?,
        content_type: row.get(4)?,
        sentiment: row.get(5)?,
        token_count: row.get(6)?,
        latency_ms: latency.map(|ms| ms.max(0) as u64),
        created_at: parse_timestamp(row, 8)?,
    })
}

fn booking_from_row(row: &Row<'_>) -> rusqlite::Result<SurveyBooking> {
    Ok(SurveyBooking {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        customer: Attendee {
            name: row.get(2)?,
            phone: row.get(3)?,
            email: row.get(4)?,
            address: row.get(5)?,
            postcode: row.get(6)?,
        },
        slot: Slot::new(parse_date(row, 7)?, parse_time(row, 8)?, row.get(9)?),
        status: row.get(10)?,
        calendar_event_id: row.get(11)?,
        created_at: parse_timestamp(row, 12)?,
        updated_at: parse_timestamp(row, 13)?,
    })
}

fn call_from_row(row: &Row<'_>) -> rusqlite::Result<PhoneCall> {
    let functions: String = row.get(6)?;
    Ok(PhoneCall {
        vapi_call_id: row.get(0)?,
        conversation_id: row.get(1)?,
        direction: row.get(2)?,
        status: row.get(3)?,
        duration_secs: row.get(4)?,
        recording_url: row.get(5)?,
        functions_invoked: serde_json::from_str(&functions).map_err(|e| conversion_error(6, e))?,
        started_at: parse_timestamp(row, 7)?,
        ended_at: parse_optional_timestamp(row, 8)?,
    })
}

#[cfg(test)]
mod tests;
