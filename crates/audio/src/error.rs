//! Fehlertypen fuer die Audio-Backends

use thiserror::Error;
use voicelink_core::VoiceError;

/// Alle moeglichen Fehler der Audio-Backends
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Audio-Geraet nicht gefunden: {0}")]
    GeraetNichtGefunden(String),

    #[error("Kein Standard-Eingabegeraet verfuegbar")]
    KeinStandardEingabegeraet,

    #[error("Kein Standard-Ausgabegeraet verfuegbar")]
    KeinStandardAusgabegeraet,

    #[error("Stream-Fehler: {0}")]
    StreamFehler(String),

    #[error("Codec-Fehler: {0}")]
    CodecFehler(String),

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("Codec nicht initialisiert")]
    CodecNichtInitialisiert,

    #[error("Ausgabepuffer zu klein: {benoetigt} Bytes benoetigt, {verfuegbar} verfuegbar")]
    PufferZuKlein { benoetigt: usize, verfuegbar: usize },

    #[error("Unbekanntes Audio-Backend: {0}")]
    UnbekanntesBackend(String),

    #[error("Unbekannter Codec: {0}")]
    UnbekannterCodec(String),

    #[error("Unerwarteter Fehler: {0}")]
    Anyhow(#[from] anyhow::Error),
}

pub type AudioResult<T> = Result<T, AudioError>;

impl From<AudioError> for VoiceError {
    fn from(e: AudioError) -> Self {
        match e {
            AudioError::Konfiguration(_)
            | AudioError::UnbekanntesBackend(_)
            | AudioError::UnbekannterCodec(_) => VoiceError::Konfiguration(e.to_string()),
            AudioError::Anyhow(inner) => VoiceError::Anyhow(inner),
            andere => VoiceError::Aufnahme(andere.to_string()),
        }
    }
}
