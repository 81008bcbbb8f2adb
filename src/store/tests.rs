use super::*;
use crate::config::ScoringConfig;
use crate::conversation::types::ContentType;
use tempfile::TempDir;

fn open_store() -> (TempDir, Store) {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path().join("leadline.db")).unwrap();
    (dir, store)
}

fn policy() -> ScoringPolicy {
    ScoringPolicy::from_config(&ScoringConfig::default()).unwrap()
}

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
}

fn time(h: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, 0, 0).unwrap()
}

fn new_booking(id: &str, day: u32, hour: u32) -> NewBooking {
    NewBooking {
        id: id.to_string(),
        conversation_id: None,
        customer: Attendee {
            name: "Jane Smith".into(),
            phone: "+447912345678".into(),
            ..Attendee::default()
        },
        slot: Slot::new(date(day), time(hour), 60),
    }
}

#[test]
fn test_open_conversation_is_idempotent() {
    let (_dir, store) = open_store();
    let (first, created) = store
        .open_conversation("+447912345678", Channel::WhatsAppText)
        .unwrap();
    assert!(created);
    let (second, created) = store
        .open_conversation("+447912345678", Channel::WhatsAppText)
        .unwrap();
    assert!(!created);
    assert_eq!(first.id, second.id);
    assert_eq!(second.status, ConversationStatus::Active);
    assert!(second.lead_score.is_none());
}

#[test]
fn test_channels_have_separate_conversations() {
    let (_dir, store) = open_store();
    let (text, _) = store.open_conversation("+44791", Channel::WhatsAppText).unwrap();
    let (call, _) = store.open_conversation("+44791", Channel::PhoneCall).unwrap();
    assert_ne!(text.id, call.id);
}

#[test]
fn test_closed_conversation_is_not_reused() {
    let (_dir, store) = open_store();
    let (first, _) = store.open_conversation("+44791", Channel::PhoneCall).unwrap();
    assert!(
        store
            .close_conversation(&first.id, ConversationStatus::Completed, "call ended")
            .unwrap()
    );
    // second close is a no-op
    assert!(
        !store
            .close_conversation(&first.id, ConversationStatus::Abandoned, "again")
            .unwrap()
    );
    let closed = store.get_conversation(&first.id).unwrap().unwrap();
    assert_eq!(closed.status, ConversationStatus::Completed);
    assert_eq!(closed.close_reason.as_deref(), Some("call ended"));
    assert!(closed.ended_at.is_some());

    let (next, created) = store.open_conversation("+44791", Channel::PhoneCall).unwrap();
    assert!(created);
    assert_ne!(next.id, first.id);
}

#[test]
fn test_close_rejects_active_status() {
    let (_dir, store) = open_store();
    let (conv, _) = store.open_conversation("+44791", Channel::WhatsAppText).unwrap();
    assert!(
        store
            .close_conversation(&conv.id, ConversationStatus::Active, "x")
            .is_err()
    );
}

#[test]
fn test_messages_are_sequenced_per_conversation() {
    let (_dir, store) = open_store();
    let (a, _) = store.open_conversation("a", Channel::WhatsAppText).unwrap();
    let (b, _) = store.open_conversation("b", Channel::WhatsAppText).unwrap();

    let m1 = store
        .append_message(&a.id, &NewMessage::new(MessageRole::User, "hi", ContentType::Text))
        .unwrap();
    let m2 = store
        .append_message(&b.id, &NewMessage::new(MessageRole::User, "hello", ContentType::Text))
        .unwrap();
    let m3 = store
        .append_message(
            &a.id,
            &NewMessage::new(MessageRole::Assistant, "hi there", ContentType::Text),
        )
        .unwrap();
    assert_eq!((m1.seq, m2.seq, m3.seq), (1, 1, 2));

    let history = store.recent_messages(&a.id, 10).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "hi");
    assert_eq!(history[1].role, MessageRole::Assistant);
}

#[test]
fn test_recent_messages_keeps_latest_in_order() {
    let (_dir, store) = open_store();
    let (conv, _) = store.open_conversation("a", Channel::WhatsAppText).unwrap();
    for i in 0..5 {
        store
            .append_message(
                &conv.id,
                &NewMessage::new(MessageRole::User, format!("m{}", i), ContentType::Text),
            )
            .unwrap();
    }
    let recent = store.recent_messages(&conv.id, 2).unwrap();
    let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["m3", "m4"]);
}

#[test]
fn test_message_for_unknown_conversation_fails() {
    let (_dir, store) = open_store();
    let err = store.append_message(
        "missing",
        &NewMessage::new(MessageRole::User, "hi", ContentType::Text),
    );
    assert!(err.is_err());
}

#[test]
fn test_merge_extracted_info_scores_and_snapshots() {
    let (_dir, store) = open_store();
    let (conv, _) = store.open_conversation("a", Channel::WhatsAppText).unwrap();

    let first = store
        .merge_extracted_info(
            &conv.id,
            ExtractedInfo {
                project_type: Some("loft conversion".into()),
                ..ExtractedInfo::default()
            },
            &policy(),
        )
        .unwrap();
    assert_eq!(first.score.score, 25);
    assert!(first.tier_changed());

    let second = store
        .merge_extracted_info(
            &conv.id,
            ExtractedInfo {
                budget_range: Some("£80-100k".into()),
                timeline: Some("ASAP".into()),
                postcode: Some("NW3 4QP".into()),
                decision_maker: Some(true),
                ..ExtractedInfo::default()
            },
            &policy(),
        )
        .unwrap();
    assert_eq!(second.score.score, 95);
    assert_eq!(second.previous_tier, Some(LeadTier::Cold));
    assert_eq!(second.info.project_type.as_deref(), Some("loft conversion"));

    let stored = store.get_conversation(&conv.id).unwrap().unwrap();
    assert_eq!(stored.lead_score, Some(95));
    assert_eq!(stored.lead_tier, Some(LeadTier::Hot));
    assert_eq!(store.extraction_history_len(&conv.id).unwrap(), 2);
}

#[test]
fn test_slot_uniqueness_among_holding_statuses() {
    let (_dir, store) = open_store();
    assert!(store.insert_pending_booking(&new_booking("b1", 10, 9)).unwrap().is_some());
    assert!(store.insert_pending_booking(&new_booking("b2", 10, 9)).unwrap().is_none());

    assert!(store.mark_booking_scheduled("b1", "evt-1").unwrap());
    assert!(store.insert_pending_booking(&new_booking("b3", 10, 9)).unwrap().is_none());

    // releasing frees the slot
    assert!(
        store
            .transition_booking("b1", &BookingStatus::HOLDING, BookingStatus::Cancelled)
            .unwrap()
    );
    assert!(store.insert_pending_booking(&new_booking("b4", 10, 9)).unwrap().is_some());
}

#[test]
fn test_overlapping_start_times_are_rejected() {
    let (_dir, store) = open_store();
    assert!(store.insert_pending_booking(&new_booking("b1", 10, 9)).unwrap().is_some());

    let mut half_past = new_booking("b2", 10, 9);
    half_past.slot.time = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
    assert!(store.insert_pending_booking(&half_past).unwrap().is_none());

    let mut earlier = new_booking("b3", 10, 8);
    earlier.slot.time = NaiveTime::from_hms_opt(8, 30, 0).unwrap();
    assert!(store.insert_pending_booking(&earlier).unwrap().is_none());

    // back to back is fine
    assert!(store.insert_pending_booking(&new_booking("b4", 10, 10)).unwrap().is_some());
    assert!(store.insert_pending_booking(&new_booking("b5", 10, 8)).unwrap().is_some());
}

#[test]
fn test_replacement_may_overlap_the_booking_it_replaces() {
    let (_dir, store) = open_store();
    store.insert_pending_booking(&new_booking("b1", 10, 9)).unwrap();
    store.mark_booking_scheduled("b1", "evt-1").unwrap();
    store.insert_pending_booking(&new_booking("other", 10, 11)).unwrap();

    let mut moved = new_booking("b2", 10, 9);
    moved.slot.time = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
    assert!(store.insert_pending_booking(&moved).unwrap().is_none());
    assert!(store.insert_replacement_booking(&moved, "b1").unwrap().is_some());

    // still clashes with anyone else
    let mut clash = new_booking("b3", 10, 10);
    clash.slot.time = NaiveTime::from_hms_opt(10, 30, 0).unwrap();
    assert!(store.insert_replacement_booking(&clash, "b1").unwrap().is_none());
}

#[test]
fn test_mark_scheduled_only_from_pending() {
    let (_dir, store) = open_store();
    store.insert_pending_booking(&new_booking("b1", 10, 9)).unwrap();
    store
        .transition_booking("b1", &[BookingStatus::Pending], BookingStatus::Cancelled)
        .unwrap();
    assert!(!store.mark_booking_scheduled("b1", "evt-1").unwrap());
    let booking = store.get_booking("b1").unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Cancelled);
    assert!(booking.calendar_event_id.is_none());
}

#[test]
fn test_held_slots_in_range() {
    let (_dir, store) = open_store();
    store.insert_pending_booking(&new_booking("b1", 10, 9)).unwrap();
    store.insert_pending_booking(&new_booking("b2", 11, 14)).unwrap();
    store.insert_pending_booking(&new_booking("b3", 20, 9)).unwrap();
    store
        .transition_booking("b2", &[BookingStatus::Pending], BookingStatus::Cancelled)
        .unwrap();

    let held = store.held_slots(&DateRange::new(date(10), date(12))).unwrap();
    assert_eq!(held, vec![Slot::new(date(10), time(9), 60)]);
}

#[test]
fn test_stale_pending_bookings() {
    let (_dir, store) = open_store();
    store.insert_pending_booking(&new_booking("b1", 10, 9)).unwrap();
    store.insert_pending_booking(&new_booking("b2", 10, 10)).unwrap();
    store.mark_booking_scheduled("b2", "evt").unwrap();

    let cutoff = Utc::now() + chrono::Duration::seconds(1);
    let stale = store.stale_pending_bookings(cutoff).unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id, "b1");
    assert!(
        store
            .stale_pending_bookings(Utc::now() - chrono::Duration::hours(1))
            .unwrap()
            .is_empty()
    );
}

#[test]
fn test_booking_survives_conversation_delete() {
    let (_dir, store) = open_store();
    let (conv, _) = store.open_conversation("a", Channel::PhoneCall).unwrap();
    let mut booking = new_booking("b1", 10, 9);
    booking.conversation_id = Some(conv.id.clone());
    store.insert_pending_booking(&booking).unwrap();
    {
        let conn = store.lock().unwrap();
        conn.execute("DELETE FROM conversations WHERE id = ?1", [&conv.id])
            .unwrap();
    }
    let kept = store.get_booking("b1").unwrap().unwrap();
    assert!(kept.conversation_id.is_none());
}

#[test]
fn test_side_effect_attempts_and_dead_letter() {
    let (_dir, store) = open_store();
    let id = store
        .enqueue_side_effect(SideEffectKind::CrmUpsert, r#"{"phone":"+44"}"#)
        .unwrap();
    let due = store.due_side_effects(Utc::now(), 10).unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].attempts, 0);

    let later = Utc::now() + chrono::Duration::minutes(5);
    let status = store.fail_side_effect(id, "503", later, 2).unwrap();
    assert_eq!(status, SideEffectStatus::Pending);
    assert!(store.due_side_effects(Utc::now(), 10).unwrap().is_empty());

    let status = store.fail_side_effect(id, "503 again", Utc::now(), 2).unwrap();
    assert_eq!(status, SideEffectStatus::Dead);
    assert!(store.due_side_effects(Utc::now(), 10).unwrap().is_empty());
}

#[test]
fn test_side_effect_completion() {
    let (_dir, store) = open_store();
    let id = store.enqueue_side_effect(SideEffectKind::CrmUpsert, "{}").unwrap();
    store.complete_side_effect(id).unwrap();
    assert!(store.due_side_effects(Utc::now(), 10).unwrap().is_empty());
    assert_eq!(store.stats().unwrap().pending_side_effects, 0);
}

#[test]
fn test_review_flags() {
    let (_dir, store) = open_store();
    let (conv, _) = store.open_conversation("a", Channel::WhatsAppText).unwrap();
    let id = store
        .add_review_flag(Some(&conv.id), "ai_fallback", Urgency::High, Some("chat timed out"))
        .unwrap();
    store
        .add_review_flag(None, "negative_sentiment", Urgency::Urgent, None)
        .unwrap();
    assert_eq!(store.list_review_flags(false).unwrap().len(), 2);
    assert!(store.resolve_review_flag(id).unwrap());
    let open = store.list_review_flags(false).unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].urgency, Urgency::Urgent);
    assert_eq!(store.list_review_flags(true).unwrap().len(), 2);
}

#[test]
fn test_phone_call_state_machine() {
    let (_dir, store) = open_store();
    let (conv, _) = store.open_conversation("+44791", Channel::PhoneCall).unwrap();
    let call = store
        .start_phone_call("call-1", &conv.id, CallDirection::Inbound)
        .unwrap();
    assert_eq!(call.status, CallStatus::Ringing);
    // duplicate start keeps the row
    store
        .start_phone_call("call-1", &conv.id, CallDirection::Inbound)
        .unwrap();

    assert!(store.update_call_status("call-1", CallStatus::InProgress, None, None).unwrap());
    assert!(!store.update_call_status("call-1", CallStatus::Ringing, None, None).unwrap());
    store.record_call_function("call-1", "extract_lead_info").unwrap();
    store.record_call_function("call-1", "book_survey").unwrap();
    assert!(
        store
            .update_call_status(
                "call-1",
                CallStatus::Completed,
                Some(184),
                Some("https://recordings.example/1.wav")
            )
            .unwrap()
    );
    assert!(!store.update_call_status("call-1", CallStatus::Failed, None, None).unwrap());

    let call = store.get_phone_call("call-1").unwrap().unwrap();
    assert_eq!(call.status, CallStatus::Completed);
    assert_eq!(call.duration_secs, Some(184));
    assert_eq!(call.functions_invoked, vec!["extract_lead_info", "book_survey"]);
    assert!(call.ended_at.is_some());
}

#[test]
fn test_call_report_only_attaches_to_ended_calls() {
    let (_dir, store) = open_store();
    let (conv, _) = store.open_conversation("+44792", Channel::PhoneCall).unwrap();
    store
        .start_phone_call("call-2", &conv.id, CallDirection::Inbound)
        .unwrap();
    assert!(!store.attach_call_report("call-2", Some(60), None).unwrap());

    store.update_call_status("call-2", CallStatus::Voicemail, None, None).unwrap();
    assert!(store.attach_call_report("call-2", Some(42), Some("rec.wav")).unwrap());
    let call = store.get_phone_call("call-2").unwrap().unwrap();
    assert_eq!(call.status, CallStatus::Voicemail);
    assert_eq!(call.duration_secs, Some(42));
    assert_eq!(call.recording_url.as_deref(), Some("rec.wav"));
}

#[test]
fn test_unknown_call_update_is_noop() {
    let (_dir, store) = open_store();
    assert!(!store.update_call_status("nope", CallStatus::InProgress, None, None).unwrap());
}

#[test]
fn test_reopen_existing_database() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("leadline.db");
    let id = {
        let store = Store::open(&path).unwrap();
        store.open_conversation("a", Channel::WhatsAppText).unwrap().0.id
    };
    let store = Store::open(&path).unwrap();
    assert_eq!(
        store
            .find_active_conversation("a", Channel::WhatsAppText)
            .unwrap()
            .unwrap()
            .id,
        id
    );
}
