//! Sprach-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass die Pipeline ohne Konfigurationsdatei
//! lauffaehig ist. `validieren()` muss vor dem Erzeugen von Codec-,
//! Aufnahme- oder Playback-Objekten laufen.

use serde::{Deserialize, Serialize};

use crate::error::{VoiceError, VoiceResult};
use crate::logging::{log_format_gueltig, log_level_gueltig};
use crate::types::PcmFormat;

/// Vollstaendige Sprach-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Format- und Codec-Einstellungen
    pub audio: AudioEinstellungen,
    /// Aufnahme-Einstellungen
    pub capture: CaptureEinstellungen,
    /// Playback- und Puffer-Einstellungen
    pub playback: PlaybackEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

/// Hinweis an den Codec, wofuer er optimieren soll
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecHint {
    /// Sprachverstaendlichkeit (VOIP)
    #[default]
    Voip,
    /// Allgemeine Audio-Qualitaet
    Audio,
    /// Minimale Verarbeitungsverzoegerung
    LowDelay,
}

/// Verhalten einer Playback-Queue wenn ein Chunk nicht mehr passt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Eingehenden Chunk verwerfen, Queue bleibt unveraendert
    DropNewest,
    /// Queue leeren und nur den neuesten Chunk behalten
    ResetAndReplace,
}

/// Format- und Codec-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEinstellungen {
    /// Abtastrate in Hz (8000, 12000, 16000, 24000, 48000)
    pub sample_rate: u32,
    /// Kanalanzahl (1 oder 2)
    pub channels: u16,
    /// Codec-Name: "opus" oder "pcm"
    pub codec: String,
    /// Codec-Optimierungsziel
    pub codec_hint: CodecHint,
    /// Ziel-Bitrate in Bit/s
    pub bitrate_bps: i32,
    /// Variable Bitrate
    pub vbr: bool,
    /// Komplexitaet (0–10)
    pub complexity: u8,
}

impl Default for AudioEinstellungen {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            codec: "opus".into(),
            codec_hint: CodecHint::Voip,
            bitrate_bps: 32_000,
            vbr: true,
            complexity: 6,
        }
    }
}

/// Aufnahme-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureEinstellungen {
    /// Backend: "cpal" oder "null"
    pub backend: String,
    /// Name des Eingabegeraets (None = Standard)
    pub input_device: Option<String>,
    /// Schwelle fuer den Encoder-Rest, ab der gewarnt wird (Bytes)
    pub max_remainder_bytes: usize,
    /// Groesse des rohen Aufnahmepuffers in Millisekunden
    pub capture_buffer_ms: u32,
}

impl Default for CaptureEinstellungen {
    fn default() -> Self {
        Self {
            backend: "cpal".into(),
            input_device: None,
            max_remainder_bytes: 1024,
            capture_buffer_ms: 1000,
        }
    }
}

/// Playback- und Puffer-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackEinstellungen {
    /// Name des Ausgabegeraets (None = Standard)
    pub output_device: Option<String>,
    /// Maximale Queue-Laenge pro entferntem Sprecher in Millisekunden
    pub remote_queue_ms: u32,
    /// Anteil der Queue, ab dem die Wiedergabe startet (Jitter-Schwelle)
    pub jitter_fraction: f32,
    /// Stille, nach der ein Sprecher zurueckgesetzt wird
    pub silence_timeout_ms: u32,
    /// Aufeinanderfolgende Hunger-Ticks, ab denen geloggt wird
    pub starve_log_ticks: u32,
    /// Ueberlauf-Verhalten fuer entfernte Sprecher
    pub remote_overflow: OverflowPolicy,
    /// Ueberlauf-Verhalten fuer den lokalen Ausgangspfad
    pub local_overflow: OverflowPolicy,
    /// Lokale Aufnahme dekodiert ueber den lokalen Ausgangspfad abspielen
    pub local_loopback: bool,
}

impl Default for PlaybackEinstellungen {
    fn default() -> Self {
        Self {
            output_device: None,
            remote_queue_ms: 1000,
            jitter_fraction: 0.5,
            silence_timeout_ms: 1000,
            starve_log_ticks: 1,
            remote_overflow: OverflowPolicy::ResetAndReplace,
            local_overflow: OverflowPolicy::DropNewest,
            local_loopback: false,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl VoiceConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => Self::aus_toml(&inhalt)
                .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}")),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Parst eine Konfiguration aus einem TOML-String
    pub fn aus_toml(inhalt: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(inhalt)
    }

    /// Validiert die Konfiguration (fail fast vor dem Erzeugen von Objekten)
    pub fn validieren(&self) -> VoiceResult<()> {
        self.format().validieren().map_err(VoiceError::Konfiguration)?;

        if self.audio.complexity > 10 {
            return Err(VoiceError::Konfiguration(format!(
                "Komplexitaet muss zwischen 0 und 10 liegen (war: {})",
                self.audio.complexity
            )));
        }
        // Bei 1.0 koennte die begrenzte Queue die Startschwelle nie ueberschreiten
        if !(0.0..1.0).contains(&self.playback.jitter_fraction) {
            return Err(VoiceError::Konfiguration(format!(
                "jitter_fraction muss in [0.0, 1.0) liegen (war: {})",
                self.playback.jitter_fraction
            )));
        }
        if self.max_queue_bytes() < self.format().frame_bytes() {
            return Err(VoiceError::Konfiguration(format!(
                "remote_queue_ms={} fasst nicht einmal einen Frame",
                self.playback.remote_queue_ms
            )));
        }
        if self.capture_buffer_bytes() < self.format().frame_bytes() {
            return Err(VoiceError::Konfiguration(format!(
                "capture_buffer_ms={} fasst nicht einmal einen Frame",
                self.capture.capture_buffer_ms
            )));
        }
        if !log_level_gueltig(&self.logging.level) {
            return Err(VoiceError::Konfiguration(format!(
                "Unbekannter Log-Level '{}'",
                self.logging.level
            )));
        }
        if !log_format_gueltig(&self.logging.format) {
            return Err(VoiceError::Konfiguration(format!(
                "Unbekanntes Log-Format '{}'",
                self.logging.format
            )));
        }
        Ok(())
    }

    /// PCM-Format der Sitzung
    pub fn format(&self) -> PcmFormat {
        PcmFormat::new(self.audio.sample_rate, self.audio.channels)
    }

    /// Bytes eines rohen 20ms-Frames
    pub fn frame_bytes(&self) -> usize {
        self.format().frame_bytes()
    }

    /// PCM-Bytes pro Sekunde
    pub fn bytes_per_second(&self) -> usize {
        self.format().bytes_per_second()
    }

    /// Groesster PCM-Puffer, den ein dekodiertes Paket fuellen kann
    pub fn max_packet_pcm_bytes(&self) -> usize {
        self.format().max_packet_pcm_bytes()
    }

    /// Maximale Queue-Laenge pro entferntem Sprecher in Bytes
    pub fn max_queue_bytes(&self) -> usize {
        self.format().bytes_for_ms(self.playback.remote_queue_ms)
    }

    /// Groesse des rohen Aufnahmepuffers in Bytes
    pub fn capture_buffer_bytes(&self) -> usize {
        self.format().bytes_for_ms(self.capture.capture_buffer_ms)
    }
}
