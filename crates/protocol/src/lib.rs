//! voicelink-protocol – Paketformat der Sprach-Pipeline
//!
//! Dieses Crate definiert das Wire-Format, in dem komprimierte Frames
//! zwischen Sender und Empfaenger ausgetauscht werden, sowie den
//! Generationszaehler der Pakete.

pub mod generation;
pub mod wire;

pub use generation::{GenerationCounter, GenerationTracker};
pub use wire::{
    deframe, frame_count_lesen, header_groesse, paket_bauen, DeframedPacket, PacketFramer,
    WireError, MAX_FRAMES_PRO_PAKET,
};
