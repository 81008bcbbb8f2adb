//! Lead scoring: a pure, additive function of the extracted lead fields.
//!
//! Every signal contributes a bounded sub-score; the sum is capped at 100 and
//! mapped to a tier through configurable thresholds. Identical input always
//! yields identical output, so callers may rescore on every extraction.

use crate::config::{BudgetBrackets, ScoringConfig, TierThresholds};
use crate::utils::regex::RegexPatterns;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MAX_SCORE: u8 = 100;

/// Best-effort structured snapshot the AI extracts from a conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postcode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_maker: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl ExtractedInfo {
    /// Field-wise merge: every field present in `update` overwrites ours.
    pub fn merge(&mut self, update: ExtractedInfo) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if update.$field.is_some() {
                    self.$field = update.$field;
                })*
            };
        }
        take!(
            project_type,
            budget_range,
            timeline,
            postcode,
            property_type,
            decision_maker,
            confidence_score,
            name,
            email,
            address
        );
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadTier {
    Hot,
    Warm,
    Cold,
    Unqualified,
}

impl LeadTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Warm => "warm",
            Self::Cold => "cold",
            Self::Unqualified => "unqualified",
        }
    }

    pub fn from_score(score: u8, tiers: &TierThresholds) -> Self {
        if score >= tiers.hot {
            Self::Hot
        } else if score >= tiers.warm {
            Self::Warm
        } else if score >= tiers.cold {
            Self::Cold
        } else {
            Self::Unqualified
        }
    }
}

impl fmt::Display for LeadTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadTier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hot" => Ok(Self::Hot),
            "warm" => Ok(Self::Warm),
            "cold" => Ok(Self::Cold),
            "unqualified" => Ok(Self::Unqualified),
            other => anyhow::bail!("unknown lead tier '{}'", other),
        }
    }
}

/// Per-signal contributions, kept for logging and the `score` command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScoreBreakdown {
    pub project: u8,
    pub budget: u8,
    pub timeline: u8,
    pub postcode: u8,
    pub decision_maker: u8,
}

impl ScoreBreakdown {
    fn total(self) -> u8 {
        let sum = u16::from(self.project)
            + u16::from(self.budget)
            + u16::from(self.timeline)
            + u16::from(self.postcode)
            + u16::from(self.decision_maker);
        sum.min(u16::from(MAX_SCORE)) as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LeadScore {
    pub score: u8,
    pub tier: LeadTier,
    pub breakdown: ScoreBreakdown,
}

/// Scoring rules compiled from [`ScoringConfig`].
#[derive(Debug, Clone)]
pub struct ScoringPolicy {
    tiers: TierThresholds,
    budget: BudgetBrackets,
    premium_postcodes: Vec<Regex>,
    major_projects: Vec<String>,
    room_projects: Vec<String>,
    immediate_timelines: Vec<String>,
    near_timelines: Vec<String>,
}

impl ScoringPolicy {
    pub fn from_config(config: &ScoringConfig) -> Result<Self> {
        let premium_postcodes = config
            .premium_postcode_patterns
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("invalid postcode pattern '{}'", p)))
            .collect::<Result<Vec<_>>>()?;
        let lower = |items: &[String]| -> Vec<String> {
            items.iter().map(|s| s.to_lowercase()).collect()
        };
        Ok(Self {
            tiers: config.tiers,
            budget: config.budget,
            premium_postcodes,
            major_projects: lower(&config.major_projects),
            room_projects: lower(&config.room_projects),
            immediate_timelines: lower(&config.immediate_timelines),
            near_timelines: lower(&config.near_timelines),
        })
    }

    pub fn tiers(&self) -> &TierThresholds {
        &self.tiers
    }
}

/// Score extracted lead information. Pure and deterministic.
pub fn score(info: &ExtractedInfo, policy: &ScoringPolicy) -> LeadScore {
    let breakdown = ScoreBreakdown {
        project: score_project(present(info.project_type.as_deref()), policy),
        budget: score_budget(present(info.budget_range.as_deref()), policy),
        timeline: score_timeline(present(info.timeline.as_deref()), policy),
        postcode: score_postcode(present(info.postcode.as_deref()), policy),
        decision_maker: if info.decision_maker == Some(true) {
            10
        } else {
            0
        },
    };
    let total = breakdown.total();
    LeadScore {
        score: total,
        tier: LeadTier::from_score(total, &policy.tiers),
        breakdown,
    }
}

/// Blank strings count as missing.
fn present(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_lowercase)
}

fn contains_any(value: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|k| value.contains(k.as_str()))
}

fn score_project(value: Option<String>, policy: &ScoringPolicy) -> u8 {
    match value {
        None => 0,
        Some(v) if contains_any(&v, &policy.major_projects) => 25,
        Some(v) if contains_any(&v, &policy.room_projects) => 20,
        Some(_) => 10,
    }
}

fn score_timeline(value: Option<String>, policy: &ScoringPolicy) -> u8 {
    match value {
        None => 0,
        Some(v) if contains_any(&v, &policy.immediate_timelines) => 20,
        Some(v) if contains_any(&v, &policy.near_timelines) => 15,
        Some(_) => 5,
    }
}

fn score_postcode(value: Option<String>, policy: &ScoringPolicy) -> u8 {
    let Some(v) = value else {
        return 0;
    };
    let normalized = crate::utils::normalize_postcode(&v);
    if policy
        .premium_postcodes
        .iter()
        .any(|re| re.is_match(&normalized))
    {
        20
    } else {
        10
    }
}

fn score_budget(value: Option<String>, policy: &ScoringPolicy) -> u8 {
    let Some(v) = value else {
        return 0;
    };
    let Some(range) = parse_budget(&v) else {
        return 5;
    };
    let b = &policy.budget;
    match range.high {
        Some(high) if high > b.premium_floor => 25,
        Some(high) if high >= b.mid_floor => 20,
        Some(high) if high >= b.lower_mid_floor => 15,
        Some(_) => 5,
        None if range.low >= b.premium_floor => 25,
        None if range.low >= b.mid_floor => 20,
        None if range.low >= b.lower_mid_floor => 15,
        None => 5,
    }
}

/// Budget in pounds. `high` is `None` for open-ended budgets ("150k+").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetRange {
    pub low: u64,
    pub high: Option<u64>,
}

const OPEN_ENDED_MARKERS: &[&str] = &["+", "over", "above", "more than", "at least", "plus"];

/// Parse free-form budget text (`£50k-75k`, `around 150k`, `£1.2m+`).
pub fn parse_budget(text: &str) -> Option<BudgetRange> {
    let cleaned = text.to_lowercase().replace(['£', ','], "");
    let amounts: Vec<(f64, Option<u64>)> = RegexPatterns::money_amount()
        .captures_iter(&cleaned)
        .filter_map(|caps| {
            let value: f64 = caps.get(1)?.as_str().parse().ok()?;
            let multiplier = caps.get(2).map(|m| match m.as_str() {
                "m" | "million" => 1_000_000,
                _ => 1_000,
            });
            Some((value, multiplier))
        })
        .collect();
    if amounts.is_empty() {
        return None;
    }

    // "50-75k": a bare small number borrows the last explicit multiplier
    let trailing = amounts.iter().rev().find_map(|(_, m)| *m);
    let values: Vec<u64> = amounts
        .into_iter()
        .map(|(value, multiplier)| {
            let multiplier = match (multiplier, trailing) {
                (Some(m), _) => m,
                (None, Some(m)) if value < 1_000.0 => m,
                _ => 1,
            };
            (value * multiplier as f64).round() as u64
        })
        .collect();

    let low = values.iter().copied().min()?;
    let high = values.iter().copied().max()?;
    let open_ended = values.len() == 1 && OPEN_ENDED_MARKERS.iter().any(|m| cleaned.contains(m));
    Some(BudgetRange {
        low,
        high: (!open_ended).then_some(high),
    })
}
