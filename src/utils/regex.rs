use regex::Regex;
use std::sync::LazyLock;

/// Compiled regex patterns that are reused across the codebase
pub struct RegexPatterns;

impl RegexPatterns {
    /// Full UK postcode, optional space between outward and inward codes
    pub fn uk_postcode() -> &'static Regex {
        static RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"^[A-Z]{1,2}[0-9][0-9A-Z]?\s?[0-9][A-Z]{2}$")
                .expect("Failed to compile UK postcode regex")
        });
        &RE
    }

    /// Bare outward code such as `NW3` or `SW1A`
    pub fn uk_outward_code() -> &'static Regex {
        static RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"^[A-Z]{1,2}[0-9][0-9A-Z]?$").expect("Failed to compile outward code regex")
        });
        &RE
    }

    /// Amounts like `150k`, `1.2m`, `75000`
    pub fn money_amount() -> &'static Regex {
        static RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"(\d+(?:\.\d+)?)\s*(k|m|thousand|million)?\b")
                .expect("Failed to compile money amount regex")
        });
        &RE
    }

    /// Runs of whitespace
    pub fn whitespace() -> &'static Regex {
        static RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"\s+").expect("Failed to compile whitespace regex"));
        &RE
    }
}
