//! Fehlertypen fuer voicelink
//!
//! Zentraler Fehler-Enum der Sprach-Pipeline. Codec- und Hardwarefehler
//! werden nie als Panic weitergereicht, sondern immer als `VoiceError`.
//! Untermodule definieren eigene Fehler und konvertieren via `From`.

use thiserror::Error;

use crate::types::LocalUserIndex;

/// Globaler Result-Alias fuer voicelink
pub type VoiceResult<T> = std::result::Result<T, VoiceError>;

/// Alle moeglichen Fehler der Sprach-Pipeline
#[derive(Debug, Error)]
pub enum VoiceError {
    // --- Konfiguration ---
    /// Nicht unterstuetzte Abtastrate/Kanalanzahl beim Init, es wird nichts erzeugt
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    // --- Aufnahme ---
    /// Hardware meldet Error/BufferTooSmall, gilt nur fuer diesen Tick
    #[error("Aufnahmefehler: {0}")]
    Aufnahme(String),

    // --- Pakete ---
    /// Header-Pruefung fehlgeschlagen oder Frame nicht dekodierbar
    #[error("Korruptes Paket: {0}")]
    KorruptesPaket(String),

    // --- Puffer ---
    #[error("Playback-Queue uebergelaufen: {queued} + {incoming} > {max} Bytes")]
    QueueUeberlauf {
        queued: usize,
        incoming: usize,
        max: usize,
    },

    // --- Lokaler Sprecher ---
    /// Anfrage fuer einen Slot der dem Benutzer nicht gehoert
    #[error("Benutzer {angefragt} besitzt den lokalen Sprecher-Slot nicht (Besitzer: {besitzer:?})")]
    Besitzverletzung {
        angefragt: LocalUserIndex,
        besitzer: Option<LocalUserIndex>,
    },

    #[error("Kein lokaler Sprecher registriert")]
    KeinLokalerSprecher,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl VoiceError {
    /// Gibt true zurueck wenn der naechste Tick es erneut versuchen darf
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(self, Self::Aufnahme(_))
    }
}
