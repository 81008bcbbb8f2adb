use crate::config::HubSpotConfig;
use crate::providers::base::{ContactSnapshot, CrmClient};
use crate::providers::errors::ProviderErrorHandler;
use crate::providers::provider_http_client;
use crate::utils::{mask_phone, split_name};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

const API_BASE: &str = "https://api.hubapi.com";

/// HubSpot contacts, keyed by phone number.
pub struct HubSpotCrm {
    access_token: String,
    base_url: String,
    client: Client,
}

impl HubSpotCrm {
    pub fn new(config: &HubSpotConfig) -> Self {
        Self {
            access_token: config.access_token.clone(),
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            client: provider_http_client(),
        }
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<String>> {
        let resp = self
            .client
            .post(format!("{}/crm/v3/objects/contacts/search", self.base_url))
            .bearer_auth(&self.access_token)
            .json(&json!({
                "filterGroups": [{
                    "filters": [{"propertyName": "phone", "operator": "EQ", "value": phone}]
                }],
                "limit": 1,
            }))
            .send()
            .await
            .context("Failed to search HubSpot contacts")?;
        let json = ProviderErrorHandler::check_json(resp, "HubSpot").await?;
        Ok(json["results"][0]["id"].as_str().map(str::to_string))
    }
}

/// Map a snapshot onto HubSpot contact properties, skipping unknowns so an
/// update never blanks a field the CRM already holds.
pub fn contact_properties(contact: &ContactSnapshot) -> Map<String, Value> {
    let mut props = Map::new();
    props.insert("phone".into(), json!(contact.phone));
    if let Some(name) = &contact.name {
        let (first, last) = split_name(name);
        props.insert("firstname".into(), json!(first));
        if !last.is_empty() {
            props.insert("lastname".into(), json!(last));
        }
    }
    let optional = [
        ("email", &contact.email),
        ("zip", &contact.postcode),
        ("address", &contact.address),
        ("project_type", &contact.project_type),
        ("budget_range", &contact.budget_range),
        ("timeline", &contact.timeline),
        ("lead_tier", &contact.lead_tier),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            props.insert(key.into(), json!(value));
        }
    }
    if let Some(score) = contact.lead_score {
        props.insert("lead_score".into(), json!(score.to_string()));
    }
    props.insert("lead_channel".into(), json!(contact.channel));
    props.insert("conversation_id".into(), json!(contact.conversation_id));
    props.insert(
        "survey_booked".into(),
        json!(if contact.survey_booked { "true" } else { "false" }),
    );
    props
}

#[async_trait]
impl CrmClient for HubSpotCrm {
    async fn upsert_contact(&self, contact: &ContactSnapshot) -> Result<String> {
        let properties = contact_properties(contact);
        let existing = self.find_by_phone(&contact.phone).await?;

        let request = match &existing {
            Some(id) => {
                debug!("hubspot: updating contact {} for {}", id, mask_phone(&contact.phone));
                self.client
                    .patch(format!("{}/crm/v3/objects/contacts/{}", self.base_url, id))
            }
            None => self
                .client
                .post(format!("{}/crm/v3/objects/contacts", self.base_url)),
        };
        let resp = request
            .bearer_auth(&self.access_token)
            .json(&json!({"properties": properties}))
            .send()
            .await
            .context("Failed to write HubSpot contact")?;
        let json = ProviderErrorHandler::check_json(resp, "HubSpot").await?;

        let id = json["id"]
            .as_str()
            .map(str::to_string)
            .or(existing)
            .context("HubSpot response missing contact id")?;
        info!("hubspot contact {} upserted for {}", id, mask_phone(&contact.phone));
        Ok(id)
    }
}
