use super::*;
use chrono::{NaiveDate, NaiveTime};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn calendar(base: &str) -> GraphCalendar {
    GraphCalendar::new(
        &CalendarConfig {
            tenant_id: "tenant".into(),
            client_id: "client".into(),
            client_secret: "secret".into(),
            calendar_user: "surveys@example.com".into(),
            api_base: Some(base.to_string()),
            auth_base: Some(base.to_string()),
        },
        "Europe/London",
    )
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/tenant/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "graph-token",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(server)
        .await;
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
}

#[test]
fn test_slots_from_availability() {
    let start = day(10).and_hms_opt(0, 0, 0).unwrap();
    let slots = slots_from_availability("2202", start, 60);
    assert_eq!(slots.len(), 2);
    assert_eq!(slots[0].time, NaiveTime::from_hms_opt(2, 0, 0).unwrap());
    assert_eq!(slots[1].time, NaiveTime::from_hms_opt(3, 0, 0).unwrap());
    assert_eq!(slots[1].duration_minutes, 60);
}

#[test]
fn test_slots_roll_over_midnight() {
    let start = day(10).and_hms_opt(0, 0, 0).unwrap();
    let view = "2".repeat(24) + "0";
    let slots = slots_from_availability(&view, start, 60);
    assert_eq!(slots[0].date, day(11));
}

#[tokio::test]
async fn test_list_free_slots_and_token_reuse() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/users/surveys@example.com/calendar/getSchedule"))
        .and(header("authorization", "Bearer graph-token"))
        .and(body_partial_json(json!({"availabilityViewInterval": 60})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{"scheduleId": "surveys@example.com", "availabilityView": "000000000200"}]
        })))
        .mount(&server)
        .await;

    let cal = calendar(&server.uri());
    let range = DateRange::new(day(10), day(10));
    let first = cal.list_free_slots(&range, 60).await.unwrap();
    assert_eq!(first.len(), 11);
    assert!(!first.iter().any(|s| s.time == NaiveTime::from_hms_opt(9, 0, 0).unwrap()));
    // second call reuses the cached token (token mock expects exactly one hit)
    cal.list_free_slots(&range, 60).await.unwrap();
}

#[tokio::test]
async fn test_create_event_carries_reference() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/users/surveys@example.com/events"))
        .and(body_partial_json(json!({
            "subject": "Site survey: Jane Smith [ref:bk-42]",
            "transactionId": "bk-42",
            "start": {"dateTime": "2026-03-10T09:00:00", "timeZone": "Europe/London"}
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "AAMk-1"})))
        .mount(&server)
        .await;

    let slot = Slot::new(day(10), NaiveTime::from_hms_opt(9, 0, 0).unwrap(), 60);
    let attendee = Attendee {
        name: "Jane Smith".into(),
        phone: "+447912345678".into(),
        postcode: Some("NW3 4QP".into()),
        ..Attendee::default()
    };
    let id = calendar(&server.uri())
        .create_event(&slot, &attendee, "bk-42")
        .await
        .unwrap();
    assert_eq!(id, "AAMk-1");
}

#[tokio::test]
async fn test_find_event_by_reference() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/users/surveys@example.com/events"))
        .and(query_param("$filter", "contains(subject,'[ref:bk-42]')"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": [{"id": "AAMk-1"}]})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/surveys@example.com/events"))
        .and(query_param("$filter", "contains(subject,'[ref:bk-99]')"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
        .mount(&server)
        .await;

    let cal = calendar(&server.uri());
    assert_eq!(cal.find_event("bk-42").await.unwrap().as_deref(), Some("AAMk-1"));
    assert_eq!(cal.find_event("bk-99").await.unwrap(), None);
}

#[tokio::test]
async fn test_cancel_missing_event_is_ok() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("DELETE"))
        .and(path("/users/surveys@example.com/events/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    calendar(&server.uri()).cancel_event("gone").await.unwrap();
}

#[tokio::test]
async fn test_token_failure_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tenant/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "invalid_client"})))
        .mount(&server)
        .await;

    let err = calendar(&server.uri()).find_event("x").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<crate::errors::LeadlineError>(),
        Some(crate::errors::LeadlineError::Auth(_))
    ));
}

#[test]
fn test_retag_subject_replaces_reference() {
    assert_eq!(
        retag_subject("Site survey: Jane [ref:old-1]", "new-2"),
        "Site survey: Jane [ref:new-2]"
    );
    assert_eq!(retag_subject("Site survey", "new-2"), "Site survey [ref:new-2]");
}

#[tokio::test]
async fn test_move_event_patches_times_and_reference() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/users/surveys@example.com/events/evt-9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "evt-9",
            "subject": "Site survey: Jane Smith [ref:b-old]"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/users/surveys@example.com/events/evt-9"))
        .and(body_partial_json(json!({
            "subject": "Site survey: Jane Smith [ref:b-new]",
            "start": {"dateTime": "2026-03-11T14:00:00", "timeZone": "Europe/London"},
            "end": {"dateTime": "2026-03-11T15:00:00", "timeZone": "Europe/London"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "evt-9"})))
        .expect(1)
        .mount(&server)
        .await;

    let cal = calendar(&server.uri());
    let slot = Slot::new(day(11), NaiveTime::from_hms_opt(14, 0, 0).unwrap(), 60);
    cal.move_event("evt-9", &slot, "b-new").await.unwrap();
}
