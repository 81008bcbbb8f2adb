#![warn(clippy::pedantic)]
// Noisy doc/signature lints — would require annotating hundreds of pub functions
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
// Style preference — keeping format!("{}", x) over format!("{x}") for readability with complex exprs
#![allow(clippy::uninlined_format_args)]
// Intentional casts in vendor integration code (durations, scores, timestamps)
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
// Turn handling and vendor payload mapping are naturally long
#![allow(clippy::too_many_lines)]
// Module structure: voice::VoiceAdapter, booking::BookingConfig
#![allow(clippy::module_name_repetitions)]

#[macro_use]
mod macros;

pub mod booking;
pub mod channels;
pub mod cli;
pub mod config;
pub mod conversation;
pub mod errors;
pub mod providers;
pub mod scoring;
pub mod server;
pub mod store;
pub mod sweeper;
pub mod utils;

#[cfg(test)]
mod test_support;

/// Re-exports for fuzz targets. Not part of the public API.
#[doc(hidden)]
pub mod fuzz_api {
    pub use crate::scoring::parse_budget;
    pub use crate::utils::normalize_postcode;

    /// Wrapper around `channels::base::validate_signature` for fuzz targets.
    pub fn validate_webhook_signature(secret: &str, signature: &str, body: &[u8]) -> bool {
        crate::channels::base::validate_signature(secret, signature, body)
    }

    /// Parse a voice webhook body the way the voice adapter does.
    pub fn parse_voice_event(body: &[u8]) -> bool {
        crate::channels::voice::VapiEvent::parse(body).is_ok()
    }
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
