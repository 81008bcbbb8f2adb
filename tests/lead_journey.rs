mod common;

use common::{TestApp, function, phone_turn, text, whatsapp_text};
use leadline::conversation::functions::{BOOK_SURVEY, EXTRACT_LEAD_INFO};
use leadline::conversation::{ConversationStatus, MessageRole};
use leadline::scoring::LeadTier;
use leadline::store::BookingStatus;
use leadline::sweeper::Sweeper;
use serde_json::json;

const CUSTOMER: &str = "+447700900321";

fn booking_args() -> serde_json::Value {
    json!({
        "name": "Priya Shah",
        "address": "3 Belsize Lane",
        "postcode": "nw3 5ap",
        "date": "2024-01-16",
        "time": "10:00",
    })
}

#[tokio::test]
async fn test_whatsapp_lead_is_qualified_and_booked() {
    let app = TestApp::new(vec![
        // turn 1
        text("Hi! What kind of work are you planning?"),
        // turn 2
        function(
            EXTRACT_LEAD_INFO,
            json!({
                "project_type": "rear extension",
                "budget_range": "£120k-£160k",
                "timeline": "next month",
                "postcode": "NW3 5AP",
                "decision_maker": true,
                "name": "Priya Shah"
            }),
        ),
        text("That sounds great. Could we pop round for a free survey?"),
        // turn 3
        function(BOOK_SURVEY, booking_args()),
        text("Booked: Tuesday 16 January at 10am."),
    ]);
    let engine = &app.engine;

    let (conversation, first) = engine.handle(&whatsapp_text(CUSTOMER, "Hello")).await.unwrap();
    assert!(!first.fallback);
    assert!(app.store.get_conversation(&conversation.id).unwrap().unwrap().lead_score.is_none());

    let (again, _) = engine
        .handle(&whatsapp_text(
            CUSTOMER,
            "Rear extension in NW3, budget 120-160k, we'd like to start next month",
        ))
        .await
        .unwrap();
    assert_eq!(again.id, conversation.id);
    engine.drain_background().await;

    let scored = app.store.get_conversation(&conversation.id).unwrap().unwrap();
    assert_eq!(scored.lead_tier, Some(LeadTier::Hot));
    assert_eq!(scored.extracted_info.name.as_deref(), Some("Priya Shah"));
    assert_eq!(app.services.crm.upserts(), 1);
    assert_eq!(scored.crm_contact_id, Some(format!("hs-{}", CUSTOMER)));

    let (_, confirmation) = engine
        .handle(&whatsapp_text(CUSTOMER, "Tuesday at 10 works"))
        .await
        .unwrap();
    assert_eq!(confirmation.content, "Booked: Tuesday 16 January at 10am.");
    engine.drain_background().await;

    let bookings = app.store.bookings_for_conversation(&conversation.id).unwrap();
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].status, BookingStatus::Scheduled);
    assert_eq!(bookings[0].customer.postcode.as_deref(), Some("NW3 5AP"));
    assert_eq!(app.services.calendar.events.lock().unwrap().len(), 1);

    let booked = app.store.get_conversation(&conversation.id).unwrap().unwrap();
    assert!(booked.survey_booked);
    assert_eq!(booked.status, ConversationStatus::Active);
    assert!(app.services.crm.last().unwrap().survey_booked);

    let messages = app.store.recent_messages(&conversation.id, 50).unwrap();
    assert_eq!(messages.len(), 6);
    assert_eq!(messages[0].role, MessageRole::User);
    assert!(messages.windows(2).all(|w| w[0].seq < w[1].seq));
}

#[tokio::test]
async fn test_crm_outage_after_booking_is_recovered_by_sweeper() {
    let app = TestApp::new(vec![
        function(BOOK_SURVEY, booking_args()),
        text("You're all booked in."),
    ]);
    app.services.crm.set_down(true);

    let (conversation, reply) = app
        .engine
        .handle(&whatsapp_text(CUSTOMER, "Can you come Tuesday at 10?"))
        .await
        .unwrap();
    assert_eq!(reply.content, "You're all booked in.");
    app.engine.drain_background().await;

    // Booking stands even though the CRM refused the update
    let bookings = app.store.bookings_for_conversation(&conversation.id).unwrap();
    assert_eq!(bookings[0].status, BookingStatus::Scheduled);
    assert_eq!(app.store.stats().unwrap().pending_side_effects, 1);

    app.services.crm.set_down(false);
    let sweeper = Sweeper::new(app.store.clone(), app.gateway.clone(), app.slots.clone());
    let report = sweeper.sweep_once().await.unwrap();
    assert_eq!(report.side_effects_done, 1);

    let synced = app.store.get_conversation(&conversation.id).unwrap().unwrap();
    assert_eq!(synced.crm_contact_id, Some(format!("hs-{}", CUSTOMER)));
    assert!(app.services.crm.last().unwrap().survey_booked);
    assert_eq!(app.store.stats().unwrap().pending_side_effects, 0);
}

#[tokio::test]
async fn test_channels_keep_separate_conversations() {
    let app = TestApp::new(vec![text("Hello on WhatsApp"), text("Hello on the phone")]);

    let (chat, _) = app
        .engine
        .handle(&whatsapp_text(CUSTOMER, "hi"))
        .await
        .unwrap();
    let (call, spoken) = app
        .engine
        .handle(&phone_turn(CUSTOMER, "hello"))
        .await
        .unwrap();

    assert_ne!(chat.id, call.id);
    assert_eq!(spoken.content, "Hello on the phone");
    assert_eq!(app.store.stats().unwrap().active_conversations, 2);
}

#[tokio::test]
async fn test_closed_conversation_is_replaced_by_a_new_one() {
    let app = TestApp::new(vec![]);
    let (first, _) = app
        .engine
        .handle(&whatsapp_text(CUSTOMER, "hi"))
        .await
        .unwrap();
    assert!(
        app.engine
            .close(&first.id, ConversationStatus::Abandoned, "no reply for 7 days")
            .unwrap()
    );

    let (second, _) = app
        .engine
        .handle(&whatsapp_text(CUSTOMER, "hello again"))
        .await
        .unwrap();
    assert_ne!(first.id, second.id);
    let closed = app.store.get_conversation(&first.id).unwrap().unwrap();
    assert_eq!(closed.status, ConversationStatus::Abandoned);
    assert!(closed.ended_at.is_some());
}
