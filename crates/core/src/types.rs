//! Gemeinsame Identifikations- und Formattypen fuer voicelink
//!
//! IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! entfernten Sprechern und lokalen Benutzer-Slots auszuschliessen.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Eindeutige Kennung eines entfernten Sprechers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TalkerId(pub Uuid);

impl TalkerId {
    /// Erstellt eine neue zufaellige TalkerId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for TalkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TalkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "talker:{}", self.0)
    }
}

/// Index eines lokalen Benutzers (Controller-/Spieler-Slot)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalUserIndex(pub u32);

impl std::fmt::Display for LocalUserIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "local:{}", self.0)
    }
}

/// Unterstuetzte Abtastraten (Hz)
pub const UNTERSTUETZTE_ABTASTRATEN: [u32; 5] = [8000, 12000, 16000, 24000, 48000];

/// Bytes pro Sample (16-Bit PCM, little-endian)
pub const BYTES_PRO_SAMPLE: usize = 2;

/// Anzahl Frames pro Sekunde (20ms-Frames)
pub const FRAMES_PRO_SEKUNDE: u32 = 50;

/// Maximale Anzahl Frames in einem Paket (ein Byte im Header)
pub const MAX_FRAMES_PRO_PAKET: usize = u8::MAX as usize;

/// PCM-Format einer Sitzung (16-Bit, interleaved)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmFormat {
    /// Abtastrate in Hz
    pub sample_rate: u32,
    /// Kanalanzahl (1 = Mono, 2 = Stereo)
    pub channels: u16,
}

impl PcmFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Samples pro Kanal in einem 20ms-Frame
    pub fn samples_per_frame(&self) -> usize {
        (self.sample_rate / FRAMES_PRO_SEKUNDE) as usize
    }

    /// Bytes eines rohen 20ms-Frames ueber alle Kanaele
    pub fn frame_bytes(&self) -> usize {
        self.samples_per_frame() * self.channels as usize * BYTES_PRO_SAMPLE
    }

    /// Maximale PCM-Groesse, die ein einzelnes Paket dekodiert ergeben kann
    pub fn max_packet_pcm_bytes(&self) -> usize {
        MAX_FRAMES_PRO_PAKET * self.frame_bytes()
    }

    /// PCM-Bytes pro Sekunde
    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * BYTES_PRO_SAMPLE
    }

    /// Rechnet eine Dauer in Millisekunden in PCM-Bytes um (auf ganze Samples gerundet)
    pub fn bytes_for_ms(&self, ms: u32) -> usize {
        let block = self.channels as usize * BYTES_PRO_SAMPLE;
        let samples = self.sample_rate as usize * ms as usize / 1000;
        samples * block
    }

    /// Prueft Abtastrate und Kanalanzahl
    pub fn validieren(&self) -> Result<(), String> {
        if !UNTERSTUETZTE_ABTASTRATEN.contains(&self.sample_rate) {
            return Err(format!(
                "Abtastrate {} Hz nicht unterstuetzt (erlaubt: {:?})",
                self.sample_rate, UNTERSTUETZTE_ABTASTRATEN
            ));
        }
        if self.channels != 1 && self.channels != 2 {
            return Err(format!(
                "Kanalanzahl {} nicht unterstuetzt (erlaubt: 1 oder 2)",
                self.channels
            ));
        }
        Ok(())
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
        }
    }
}
