//! voicelink-core – Gemeinsame Typen, Fehlertypen und Konfiguration
//!
//! Dieses Crate stellt die Bausteine bereit, die von allen anderen
//! voicelink-Crates gemeinsam genutzt werden.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use config::{CodecHint, OverflowPolicy, VoiceConfig};
pub use error::{VoiceError, VoiceResult};
pub use types::{LocalUserIndex, PcmFormat, TalkerId};
