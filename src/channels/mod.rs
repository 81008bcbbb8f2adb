pub mod base;
pub mod voice;
pub mod whatsapp;

pub use base::{AdapterError, ChannelAdapter, IdentityGate};
pub use voice::VoiceAdapter;
pub use whatsapp::WhatsAppAdapter;
