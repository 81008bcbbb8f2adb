//! Functions offered to the model, and their argument types.

use crate::providers::base::FunctionSchema;
use crate::scoring::ExtractedInfo;
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use serde_json::{Value, json};

pub const EXTRACT_LEAD_INFO: &str = "extract_lead_info";
pub const CHECK_AVAILABILITY: &str = "check_availability";
pub const BOOK_SURVEY: &str = "book_survey";
pub const RESCHEDULE_SURVEY: &str = "reschedule_survey";
pub const TRANSFER_TO_HUMAN: &str = "transfer_to_human";
pub const CHECK_SERVICE_AREA: &str = "check_service_area";

pub fn schemas() -> Vec<FunctionSchema> {
    vec![
        FunctionSchema {
            name: EXTRACT_LEAD_INFO.into(),
            description: "Record project details learned from the customer. Send only the \
                          fields you learned; earlier values are kept."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "project_type": {"type": "string", "description": "e.g. kitchen, loft_conversion, extension, full_renovation"},
                    "budget_range": {"type": "string", "description": "as the customer said it, e.g. £80-100k"},
                    "timeline": {"type": "string", "description": "e.g. ASAP, 3-6 months"},
                    "postcode": {"type": "string"},
                    "property_type": {"type": "string"},
                    "decision_maker": {"type": "boolean"},
                    "name": {"type": "string"},
                    "email": {"type": "string"},
                    "address": {"type": "string"},
                    "confidence_score": {"type": "number", "minimum": 0, "maximum": 1}
                }
            }),
        },
        FunctionSchema {
            name: CHECK_AVAILABILITY.into(),
            description: "List free site-survey slots.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "date": {"type": "string", "description": "YYYY-MM-DD; omit for the next available days"},
                    "time_preference": {"type": "string", "enum": ["morning", "afternoon", "any"]}
                }
            }),
        },
        FunctionSchema {
            name: BOOK_SURVEY.into(),
            description: "Book a free site survey once the customer has picked a slot.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "phone": {"type": "string"},
                    "email": {"type": "string"},
                    "address": {"type": "string"},
                    "postcode": {"type": "string"},
                    "date": {"type": "string", "description": "YYYY-MM-DD"},
                    "time": {"type": "string", "description": "HH:MM, 24 hour"}
                },
                "required": ["name", "address", "date", "time"]
            }),
        },
        FunctionSchema {
            name: RESCHEDULE_SURVEY.into(),
            description: "Move the customer's booked site survey to another slot.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "booking_id": {"type": "string", "description": "omit to move the survey booked in this conversation"},
                    "date": {"type": "string", "description": "YYYY-MM-DD"},
                    "time": {"type": "string", "description": "HH:MM, 24 hour"}
                },
                "required": ["date", "time"]
            }),
        },
        FunctionSchema {
            name: TRANSFER_TO_HUMAN.into(),
            description: "Hand the customer to a member of the team.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "reason": {"type": "string"},
                    "urgency": {"type": "string", "enum": ["immediate", "same-day", "next-day"]}
                },
                "required": ["reason"]
            }),
        },
        FunctionSchema {
            name: CHECK_SERVICE_AREA.into(),
            description: "Check whether a postcode is inside the area we cover.".into(),
            parameters: json!({
                "type": "object",
                "properties": {"postcode": {"type": "string"}},
                "required": ["postcode"]
            }),
        },
    ]
}

fn parse<T: for<'de> Deserialize<'de>>(name: &str, arguments: &Value) -> Result<T> {
    // Some models send `null` instead of `{}` for argument-less calls
    let arguments = if arguments.is_null() { json!({}) } else { arguments.clone() };
    serde_json::from_value(arguments).with_context(|| format!("invalid arguments for {}", name))
}

pub fn extract_args(arguments: &Value) -> Result<ExtractedInfo> {
    parse(EXTRACT_LEAD_INFO, arguments)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimePreference {
    Morning,
    Afternoon,
    #[default]
    Any,
}

impl TimePreference {
    pub fn accepts(self, time: NaiveTime) -> bool {
        let noon = NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default();
        match self {
            Self::Morning => time < noon,
            Self::Afternoon => time >= noon,
            Self::Any => true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AvailabilityArgs {
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub time_preference: TimePreference,
}

pub fn availability_args(arguments: &Value) -> Result<AvailabilityArgs> {
    parse(CHECK_AVAILABILITY, arguments)
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookingArgs {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub address: String,
    #[serde(default)]
    pub postcode: Option<String>,
    pub date: NaiveDate,
    #[serde(deserialize_with = "hh_mm")]
    pub time: NaiveTime,
}

fn hh_mm<'de, D: serde::Deserializer<'de>>(de: D) -> Result<NaiveTime, D::Error> {
    let text = String::deserialize(de)?;
    NaiveTime::parse_from_str(&text, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(&text, "%H:%M:%S"))
        .map_err(serde::de::Error::custom)
}

pub fn booking_args(arguments: &Value) -> Result<BookingArgs> {
    parse(BOOK_SURVEY, arguments)
}

#[derive(Debug, Clone, Deserialize)]
pub struct RescheduleArgs {
    #[serde(default)]
    pub booking_id: Option<String>,
    pub date: NaiveDate,
    #[serde(deserialize_with = "hh_mm")]
    pub time: NaiveTime,
}

pub fn reschedule_args(arguments: &Value) -> Result<RescheduleArgs> {
    parse(RESCHEDULE_SURVEY, arguments)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferUrgency {
    Immediate,
    #[default]
    SameDay,
    NextDay,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransferArgs {
    #[serde(default = "default_transfer_reason")]
    pub reason: String,
    #[serde(default)]
    pub urgency: TransferUrgency,
}

fn default_transfer_reason() -> String {
    "customer asked for a person".to_string()
}

pub fn transfer_args(arguments: &Value) -> Result<TransferArgs> {
    parse(TRANSFER_TO_HUMAN, arguments)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAreaArgs {
    pub postcode: String,
}

pub fn service_area_args(arguments: &Value) -> Result<ServiceAreaArgs> {
    parse(CHECK_SERVICE_AREA, arguments)
}
