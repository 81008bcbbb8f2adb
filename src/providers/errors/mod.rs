use crate::errors::LeadlineError;
use serde_json::Value;
use tracing::warn;

/// Shared HTTP error classification for vendor clients.
///
/// Every client funnels non-2xx responses through here so the gateway sees
/// the same typed errors regardless of vendor.
pub struct ProviderErrorHandler;

impl ProviderErrorHandler {
    /// Statuses worth retrying (server faults and explicit back-off hints).
    pub fn is_retryable_status(status: u16) -> bool {
        // 529: Anthropic "overloaded"
        matches!(status, 408 | 425 | 500 | 502 | 503 | 504 | 529)
    }

    /// Build a typed error from an error status and body.
    pub fn parse_api_error(status: u16, error_text: &str) -> LeadlineError {
        let retryable = Self::is_retryable_status(status);
        if let Ok(error_json) = serde_json::from_str::<Value>(error_text) {
            // Vendors disagree on shape: {"error": {"type", "message"}}, {"message"}, {"err_msg"}
            let nested = error_json.get("error");
            let kind = nested
                .and_then(|e| e.get("type"))
                .or_else(|| error_json.get("category"))
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            let message = nested
                .and_then(|e| e.get("message"))
                .or_else(|| error_json.get("message"))
                .or_else(|| error_json.get("err_msg"))
                .or_else(|| nested.filter(|e| e.is_string()))
                .and_then(Value::as_str);
            if let Some(message) = message {
                return LeadlineError::Provider {
                    message: format!("API error {} ({}): {}", status, kind, message),
                    retryable,
                };
            }
        }

        let snippet: String = error_text.chars().take(200).collect();
        LeadlineError::Provider {
            message: format!("API error ({}): {}", status, snippet),
            retryable,
        }
    }

    /// Check HTTP status and return a typed error if the response is not
    /// successful. On error the body is consumed for details.
    pub async fn check_http_status(
        resp: reqwest::Response,
        vendor: &str,
    ) -> Result<reqwest::Response, anyhow::Error> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());
        let error_text = resp
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());

        let err = match status {
            429 => {
                warn!("{} rate limited (retry-after: {:?})", vendor, retry_after);
                LeadlineError::RateLimit { retry_after }
            }
            401 | 403 => {
                warn!("{} rejected credentials (status {})", vendor, status);
                LeadlineError::Auth(format!("{} returned {}: {}", vendor, status, error_text))
            }
            _ => {
                warn!("{} returned error status {}", vendor, status);
                Self::parse_api_error(status, &error_text)
            }
        };
        Err(err.into())
    }

    /// Check status and decode a JSON body.
    pub async fn check_json(resp: reqwest::Response, vendor: &str) -> Result<Value, anyhow::Error> {
        let resp = Self::check_http_status(resp, vendor).await?;
        resp.json::<Value>()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse {} response: {}", vendor, e))
    }
}
