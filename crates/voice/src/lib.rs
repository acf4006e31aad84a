//! voicelink-voice – Sprach-Pipeline eines Clients
//!
//! Verbindet Aufnahme, Encoder, Paketformat, Decoder und Wiedergabe.
//!
//! ## Module
//! - [`local`] – Lokaler Sprecher: Aufnahme lesen, Rest puffern, kodieren
//! - [`remote`] – Entfernte Sprecher: Pakete dekodieren, Stille-Timeout
//! - [`talker`] – Zustand und Pull-Feed eines entfernten Sprechers
//! - [`queue`] – Begrenzte Playback-Queue zwischen Tick- und Audio-Thread
//! - [`engine`] – Fassade ueber alle Komponenten

pub mod engine;
pub mod local;
pub mod queue;
pub mod remote;
pub mod talker;

pub use engine::{EngineStats, VoiceEngine};
pub use local::{LocalEinstellungen, LocalVoiceProcessor, LocalZustand};
pub use queue::{AppendOutcome, PlaybackQueue};
pub use remote::{RemoteEinstellungen, RemoteTalkerManager};
pub use talker::{RemoteTalkerBuffer, TalkerFeed, TalkerZustand};
