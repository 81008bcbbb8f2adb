pub mod regex;
pub mod task_tracker;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use self::regex::RegexPatterns;

pub fn ensure_dir(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    Ok(path.to_path_buf())
}

pub fn get_leadline_home() -> Result<PathBuf> {
    if let Some(home) = std::env::var_os("LEADLINE_HOME") {
        return Ok(PathBuf::from(home));
    }
    Ok(dirs::home_dir()
        .context("Could not determine home directory")?
        .join(".leadline"))
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}

/// Mask a phone number for logging, keeping the last four digits.
pub fn mask_phone(phone: &str) -> String {
    let count = phone.chars().count();
    if count < 4 {
        return "****".to_string();
    }
    let tail: String = phone.chars().skip(count - 4).collect();
    format!("{}{}", "*".repeat(count - 4), tail)
}

/// Best-effort E.164 formatting for UK numbers.
pub fn normalize_phone(phone: &str) -> String {
    let cleaned: String = phone
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();
    if cleaned.starts_with('+') {
        return cleaned;
    }
    if let Some(rest) = cleaned.strip_prefix("00") {
        return format!("+{rest}");
    }
    if let Some(rest) = cleaned.strip_prefix('0') {
        return format!("+44{rest}");
    }
    format!("+{cleaned}")
}

/// Uppercase and insert the single space before the inward code.
pub fn normalize_postcode(postcode: &str) -> String {
    let cleaned = RegexPatterns::whitespace()
        .replace_all(postcode.trim(), "")
        .to_uppercase();
    if cleaned.len() >= 5 && cleaned.is_ascii() {
        let (outward, inward) = cleaned.split_at(cleaned.len() - 3);
        return format!("{outward} {inward}");
    }
    cleaned
}

pub fn is_valid_postcode(postcode: &str) -> bool {
    RegexPatterns::uk_postcode().is_match(&postcode.trim().to_uppercase())
}

/// Outward code (`NW3` from `nw3 2ab`). Accepts a bare outward code too.
pub fn outward_code(postcode: &str) -> Option<String> {
    let normalized = normalize_postcode(postcode);
    if is_valid_postcode(&normalized) {
        return normalized.split_whitespace().next().map(str::to_string);
    }
    RegexPatterns::uk_outward_code()
        .is_match(&normalized)
        .then_some(normalized)
}

/// Whether the postcode's area letters appear in `areas` (e.g. `NW`, `EN`).
pub fn in_service_area(postcode: &str, areas: &[String]) -> bool {
    let Some(outward) = outward_code(postcode) else {
        return false;
    };
    let area: String = outward.chars().take_while(char::is_ascii_alphabetic).collect();
    areas.iter().any(|a| a.eq_ignore_ascii_case(&area))
}

/// Split a full name into first and last parts.
pub fn split_name(full_name: &str) -> (String, String) {
    let mut parts = full_name.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or_default().to_string();
    let last = parts.next().unwrap_or_default().trim().to_string();
    (first, last)
}

/// Replace symbols that text-to-speech engines read badly.
pub fn sanitize_for_speech(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str(" and "),
            '@' => out.push_str(" at "),
            '%' => out.push_str(" percent "),
            '£' => out.push_str(" pounds "),
            '+' => out.push_str(" plus "),
            '/' => out.push_str(" or "),
            '*' | '#' | '_' | '`' => out.push(' '),
            _ => out.push(c),
        }
    }
    RegexPatterns::whitespace()
        .replace_all(out.trim(), " ")
        .into_owned()
}
