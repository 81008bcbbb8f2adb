use crate::config::CalendarConfig;
use crate::providers::base::{Attendee, CalendarBackend, DateRange, Slot};
use crate::providers::errors::ProviderErrorHandler;
use crate::providers::provider_http_client;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDateTime};
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

const GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";
const AUTH_BASE: &str = "https://login.microsoftonline.com";
const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";
/// Refresh this long before the token actually expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Microsoft Graph calendar of the surveyor mailbox, app-only auth.
pub struct GraphCalendar {
    tenant_id: String,
    client_id: String,
    client_secret: String,
    calendar_user: String,
    timezone: String,
    graph_base: String,
    auth_base: String,
    client: Client,
    token: Mutex<Option<CachedToken>>,
}

impl GraphCalendar {
    pub fn new(config: &CalendarConfig, timezone: &str) -> Self {
        Self {
            tenant_id: config.tenant_id.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            calendar_user: config.calendar_user.clone(),
            timezone: timezone.to_string(),
            graph_base: config
                .api_base
                .as_deref()
                .unwrap_or(GRAPH_BASE)
                .trim_end_matches('/')
                .to_string(),
            auth_base: config
                .auth_base
                .as_deref()
                .unwrap_or(AUTH_BASE)
                .trim_end_matches('/')
                .to_string(),
            client: provider_http_client(),
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && Instant::now() + TOKEN_EXPIRY_MARGIN < token.expires_at
        {
            return Ok(token.token.clone());
        }

        let resp = self
            .client
            .post(format!("{}/{}/oauth2/v2.0/token", self.auth_base, self.tenant_id))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", GRAPH_SCOPE),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .context("Failed to request Graph token")?;
        let json = ProviderErrorHandler::check_json(resp, "Microsoft identity").await?;
        let token = json["access_token"]
            .as_str()
            .context("Token response missing access_token")?
            .to_string();
        let expires_in = json["expires_in"].as_u64().unwrap_or(3600);
        debug!("graph token refreshed, expires in {}s", expires_in);
        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at: Instant::now() + Duration::from_secs(expires_in),
        });
        Ok(token)
    }

    fn user_url(&self) -> String {
        format!("{}/users/{}", self.graph_base, self.calendar_user)
    }

    fn graph_time(&self, at: NaiveDateTime) -> Value {
        json!({
            "dateTime": at.format("%Y-%m-%dT%H:%M:%S").to_string(),
            "timeZone": self.timezone,
        })
    }
}

/// Turn a Graph availability view (one digit per interval, `0` = free) into
/// slots starting at `start`.
pub fn slots_from_availability(
    view: &str,
    start: NaiveDateTime,
    duration_minutes: u32,
) -> Vec<Slot> {
    view.chars()
        .enumerate()
        .filter(|(_, c)| *c == '0')
        .map(|(i, _)| {
            let at = start + ChronoDuration::minutes(i as i64 * i64::from(duration_minutes));
            Slot::new(at.date(), at.time(), duration_minutes)
        })
        .collect()
}

/// The marker stored in the event subject so the event can be found again.
pub fn reference_tag(reference: &str) -> String {
    format!("[ref:{}]", reference)
}

/// Replace the reference tag in an event subject, appending one if missing.
pub fn retag_subject(subject: &str, reference: &str) -> String {
    let base = match subject.find("[ref:") {
        Some(at) => subject[..at].trim_end(),
        None => subject.trim_end(),
    };
    format!("{} {}", base, reference_tag(reference))
}

#[async_trait]
impl CalendarBackend for GraphCalendar {
    async fn list_free_slots(&self, range: &DateRange, duration_minutes: u32) -> Result<Vec<Slot>> {
        let token = self.access_token().await?;
        let start = range.start.and_time(chrono::NaiveTime::MIN);
        let end = (range.end + ChronoDuration::days(1)).and_time(chrono::NaiveTime::MIN);

        let resp = self
            .client
            .post(format!("{}/calendar/getSchedule", self.user_url()))
            .bearer_auth(&token)
            .header("Prefer", format!("outlook.timezone=\"{}\"", self.timezone))
            .json(&json!({
                "schedules": [self.calendar_user],
                "startTime": self.graph_time(start),
                "endTime": self.graph_time(end),
                "availabilityViewInterval": duration_minutes,
            }))
            .send()
            .await
            .context("Failed to query Graph schedule")?;
        let json = ProviderErrorHandler::check_json(resp, "Microsoft Graph").await?;
        let view = json["value"][0]["availabilityView"]
            .as_str()
            .context("Schedule response missing availabilityView")?;
        let slots = slots_from_availability(view, start, duration_minutes);
        debug!(
            "graph schedule {}..{}: {} free intervals",
            range.start,
            range.end,
            slots.len()
        );
        Ok(slots)
    }

    async fn create_event(&self, slot: &Slot, attendee: &Attendee, reference: &str) -> Result<String> {
        let token = self.access_token().await?;
        let mut body = format!(
            "Site survey for {}\nPhone: {}",
            attendee.name, attendee.phone
        );
        if let Some(email) = &attendee.email {
            body.push_str(&format!("\nEmail: {}", email));
        }
        let location = match (&attendee.address, &attendee.postcode) {
            (Some(address), Some(postcode)) => format!("{}, {}", address, postcode),
            (Some(address), None) => address.clone(),
            (None, Some(postcode)) => postcode.clone(),
            (None, None) => String::new(),
        };

        let resp = self
            .client
            .post(format!("{}/events", self.user_url()))
            .bearer_auth(&token)
            .json(&json!({
                "subject": format!("Site survey: {} {}", attendee.name, reference_tag(reference)),
                "body": {"contentType": "text", "content": body},
                "start": self.graph_time(slot.start()),
                "end": self.graph_time(slot.end()),
                "location": {"displayName": location},
                // Graph de-duplicates creates that share a transactionId
                "transactionId": reference,
            }))
            .send()
            .await
            .context("Failed to create Graph event")?;
        let json = ProviderErrorHandler::check_json(resp, "Microsoft Graph").await?;
        let id = json["id"]
            .as_str()
            .context("Create event response missing id")?
            .to_string();
        info!("calendar event created for {} ({})", slot.label(), reference);
        Ok(id)
    }

    async fn find_event(&self, reference: &str) -> Result<Option<String>> {
        let token = self.access_token().await?;
        let filter = format!("contains(subject,'{}')", reference_tag(reference).replace('\'', "''"));
        let resp = self
            .client
            .get(format!("{}/events", self.user_url()))
            .bearer_auth(&token)
            .query(&[("$filter", filter.as_str()), ("$select", "id"), ("$top", "1")])
            .send()
            .await
            .context("Failed to search Graph events")?;
        let json = ProviderErrorHandler::check_json(resp, "Microsoft Graph").await?;
        Ok(json["value"][0]["id"].as_str().map(str::to_string))
    }

    async fn move_event(&self, event_id: &str, slot: &Slot, reference: &str) -> Result<()> {
        let token = self.access_token().await?;
        let url = format!("{}/events/{}", self.user_url(), event_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .query(&[("$select", "subject")])
            .send()
            .await
            .context("Failed to read Graph event")?;
        let json = ProviderErrorHandler::check_json(resp, "Microsoft Graph").await?;
        let subject = json["subject"].as_str().unwrap_or("Site survey");
        let subject = retag_subject(subject, reference);

        let resp = self
            .client
            .patch(&url)
            .bearer_auth(&token)
            .json(&json!({
                "subject": subject,
                "start": self.graph_time(slot.start()),
                "end": self.graph_time(slot.end()),
            }))
            .send()
            .await
            .context("Failed to move Graph event")?;
        ProviderErrorHandler::check_http_status(resp, "Microsoft Graph").await?;
        info!("calendar event {} moved to {} ({})", event_id, slot.label(), reference);
        Ok(())
    }

    async fn cancel_event(&self, event_id: &str) -> Result<()> {
        let token = self.access_token().await?;
        let resp = self
            .client
            .delete(format!("{}/events/{}", self.user_url(), event_id))
            .bearer_auth(&token)
            .send()
            .await
            .context("Failed to delete Graph event")?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            debug!("calendar event {} already gone", event_id);
            return Ok(());
        }
        ProviderErrorHandler::check_http_status(resp, "Microsoft Graph").await?;
        info!("calendar event {} cancelled", event_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests;
