//! Keyword sentiment for inbound customer messages.

use crate::store::Urgency;
use regex::Regex;
use std::sync::LazyLock;

string_enum! {
    pub enum Sentiment {
        PriceShocked => "price_shocked",
        Frustrated => "frustrated",
        Angry => "angry",
        Concerned => "concerned",
        Positive => "positive",
        Neutral => "neutral",
    }
}

impl Sentiment {
    /// Urgency of the review flag raised for this sentiment, if any.
    pub fn review_urgency(self) -> Option<Urgency> {
        match self {
            Self::Angry => Some(Urgency::Urgent),
            Self::Frustrated | Self::PriceShocked => Some(Urgency::High),
            Self::Concerned | Self::Positive | Self::Neutral => None,
        }
    }
}

fn phrase_set(phrases: &[&str]) -> Regex {
    let alternation = phrases
        .iter()
        .map(|p| {
            // Phrases ending in punctuation cannot take a trailing \b
            let tail = if p.ends_with(|c: char| c.is_alphanumeric()) {
                r"\b"
            } else {
                ""
            };
            format!(r"\b{}{}", regex::escape(p), tail)
        })
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("(?i){}", alternation)).expect("Failed to compile sentiment phrase regex")
}

// Checked in order; the first match wins.
static RULES: LazyLock<[(Sentiment, Regex); 5]> = LazyLock::new(|| {
    [
        (
            Sentiment::PriceShocked,
            phrase_set(&[
                "how much?!",
                "that much",
                "that's expensive",
                "can't afford",
                "out of my budget",
                "way more than",
                "wasn't expecting",
                "seriously?",
                "you're joking",
            ]),
        ),
        (
            Sentiment::Frustrated,
            phrase_set(&[
                "frustrated",
                "annoying",
                "ridiculous",
                "waste of time",
                "not helpful",
                "useless",
                "terrible",
                "awful",
                "pathetic",
            ]),
        ),
        (
            Sentiment::Angry,
            phrase_set(&["furious", "disgusted", "appalled", "sue", "lawyer", "report you"]),
        ),
        (
            Sentiment::Positive,
            phrase_set(&[
                "thank you",
                "thanks",
                "great",
                "excellent",
                "perfect",
                "brilliant",
                "wonderful",
                "amazing",
                "love it",
                "sounds good",
            ]),
        ),
        (
            Sentiment::Concerned,
            phrase_set(&["worried", "concerned", "not sure", "hesitant", "nervous", "uncertain"]),
        ),
    ]
});

pub fn classify(message: &str) -> Sentiment {
    let normalized = message.replace('\u{2019}', "'");
    RULES
        .iter()
        .find(|(_, re)| re.is_match(&normalized))
        .map_or(Sentiment::Neutral, |(sentiment, _)| *sentiment)
}
