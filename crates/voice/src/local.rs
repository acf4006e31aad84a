//! LocalVoiceProcessor – Aufnahme und Kodierung des lokalen Sprechers
//!
//! Zustandsmaschine: `Idle -> Capturing -> StoppingDrain -> Idle`.
//! Beim Stoppen werden die bereits aufgenommenen Daten noch abgeholt und
//! kodiert, bis das Geraet `NotCapturing` meldet.

use tracing::{debug, info, warn};
use voicelink_audio::{AudioCaptureDevice, CaptureState, EncoderStats, FrameEncoder};
use voicelink_core::{LocalUserIndex, VoiceError, VoiceResult};

/// Zustand der lokalen Verarbeitung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalZustand {
    Idle,
    Capturing,
    StoppingDrain,
}

/// Grenzen des Rest-Puffers
#[derive(Debug, Clone, Copy)]
pub struct LocalEinstellungen {
    /// Schwelle, ab der ein wachsender Rest gemeldet wird
    pub max_remainder_bytes: usize,
    /// Harte Obergrenze fuer Rest plus neu gelesene Bytes
    pub capture_buffer_bytes: usize,
}

/// Ein lokaler Sprecher-Slot
pub struct LocalVoiceProcessor {
    device: Box<dyn AudioCaptureDevice>,
    encoder: FrameEncoder,
    einstellungen: LocalEinstellungen,
    zustand: LocalZustand,
    besitzer: Option<LocalUserIndex>,
    rest: Vec<u8>,
    roh: Vec<u8>,
    spricht: bool,
}

impl LocalVoiceProcessor {
    pub fn neu(
        device: Box<dyn AudioCaptureDevice>,
        encoder: FrameEncoder,
        einstellungen: LocalEinstellungen,
    ) -> Self {
        Self {
            device,
            encoder,
            roh: Vec::with_capacity(einstellungen.capture_buffer_bytes),
            einstellungen,
            zustand: LocalZustand::Idle,
            besitzer: None,
            rest: Vec::new(),
            spricht: false,
        }
    }

    pub fn zustand(&self) -> LocalZustand {
        self.zustand
    }

    pub fn besitzer(&self) -> Option<LocalUserIndex> {
        self.besitzer
    }

    /// Belegt den Slot fuer `user`
    pub fn register(&mut self, user: LocalUserIndex) -> VoiceResult<()> {
        match self.besitzer {
            Some(besitzer) if besitzer != user => Err(VoiceError::Besitzverletzung {
                angefragt: user,
                besitzer: Some(besitzer),
            }),
            _ => {
                self.besitzer = Some(user);
                info!(user = %user, "Lokaler Sprecher registriert");
                Ok(())
            }
        }
    }

    /// Gibt den Slot frei und stoppt die Aufnahme sofort
    pub fn unregister(&mut self, user: LocalUserIndex) -> VoiceResult<()> {
        self.besitz_pruefen(user)?;
        self.device.stop();
        self.zurueck_auf_idle();
        self.besitzer = None;
        info!(user = %user, "Lokaler Sprecher abgemeldet");
        Ok(())
    }

    fn besitz_pruefen(&self, user: LocalUserIndex) -> VoiceResult<()> {
        match self.besitzer {
            Some(besitzer) if besitzer == user => Ok(()),
            Some(besitzer) => Err(VoiceError::Besitzverletzung {
                angefragt: user,
                besitzer: Some(besitzer),
            }),
            None => Err(VoiceError::KeinLokalerSprecher),
        }
    }

    /// Idle/Capturing/StoppingDrain -> Capturing
    pub fn start(&mut self) -> VoiceResult<()> {
        if self.besitzer.is_none() {
            return Err(VoiceError::KeinLokalerSprecher);
        }
        if !self.device.is_capturing() {
            self.device.start().map_err(VoiceError::from)?;
        }
        if self.zustand != LocalZustand::Capturing {
            debug!(vorher = ?self.zustand, "Lokale Verarbeitung gestartet");
        }
        self.zustand = LocalZustand::Capturing;
        Ok(())
    }

    /// Capturing -> StoppingDrain; das Geraet wird gestoppt, Restdaten folgen
    pub fn stop(&mut self) {
        if self.zustand == LocalZustand::Capturing {
            self.device.stop();
            self.zustand = LocalZustand::StoppingDrain;
            debug!("Lokale Verarbeitung stoppt, Restdaten werden abgeholt");
        }
    }

    /// Liest aufgenommene Daten, kodiert sie und kopiert das Paket nach `out`
    ///
    /// Bei einem Fehler bleibt `out` unveraendert.
    pub fn read_local_voice_data(&mut self, user: LocalUserIndex, out: &mut [u8]) -> VoiceResult<usize> {
        self.besitz_pruefen(user)?;
        if self.zustand == LocalZustand::Idle {
            return Ok(0);
        }

        let status = self.device.capture_state();
        match status.state {
            CaptureState::Error => {
                self.spricht = false;
                Err(VoiceError::Aufnahme("Aufnahmegeraet meldet Fehler".into()))
            }
            CaptureState::NoData => {
                self.spricht = false;
                Ok(0)
            }
            CaptureState::NotCapturing => {
                self.spricht = false;
                if self.zustand == LocalZustand::StoppingDrain {
                    self.zurueck_auf_idle();
                    info!("Lokale Verarbeitung beendet");
                }
                Ok(0)
            }
            CaptureState::Ok => self.kodieren(status.available_bytes, out),
        }
    }

    fn kodieren(&mut self, verfuegbar: usize, out: &mut [u8]) -> VoiceResult<usize> {
        let rest_len = self.rest.len();
        let platz = self.einstellungen.capture_buffer_bytes.saturating_sub(rest_len);
        let lesen = verfuegbar.min(platz);

        self.roh.clear();
        self.roh.extend_from_slice(&self.rest);
        self.roh.resize(rest_len + lesen, 0);
        let gelesen = self.device.voice_data(&mut self.roh[rest_len..]);
        if gelesen.state == CaptureState::Error {
            self.spricht = false;
            return Err(VoiceError::Aufnahme("Aufnahmegeraet meldet Fehler beim Lesen".into()));
        }
        self.roh.truncate(rest_len + gelesen.bytes);

        let ergebnis = self.encoder.encode(&self.roh, out.len());
        self.rest.clear();
        self.rest
            .extend_from_slice(&self.roh[self.roh.len() - ergebnis.rest..]);
        if self.rest.len() > self.einstellungen.max_remainder_bytes {
            warn!(
                rest = self.rest.len(),
                schwelle = self.einstellungen.max_remainder_bytes,
                "Encoder-Rest waechst"
            );
        }

        let n = ergebnis.paket.len().min(out.len());
        out[..n].copy_from_slice(&ergebnis.paket[..n]);
        self.spricht = n > 0;
        Ok(n)
    }

    fn zurueck_auf_idle(&mut self) {
        self.zustand = LocalZustand::Idle;
        self.rest.clear();
        self.encoder.reset();
        self.spricht = false;
    }

    /// Ob Daten zum Abholen bereitliegen
    pub fn daten_bereit(&mut self) -> bool {
        if self.zustand == LocalZustand::Idle {
            return false;
        }
        let status = self.device.capture_state();
        status.state == CaptureState::Ok && status.available_bytes > 0
    }

    /// Ob der letzte Lesevorgang ein Paket ergab
    pub fn spricht(&self) -> bool {
        self.spricht && self.zustand != LocalZustand::Idle
    }

    /// Laenge des aktuellen Encoder-Rests
    pub fn rest_len(&self) -> usize {
        self.rest.len()
    }

    pub fn encoder(&self) -> &FrameEncoder {
        &self.encoder
    }

    pub fn encoder_mut(&mut self) -> &mut FrameEncoder {
        &mut self.encoder
    }

    pub fn encoder_stats(&self) -> &EncoderStats {
        self.encoder.stats()
    }

    /// Gibt das Aufnahmegeraet endgueltig frei
    pub fn shutdown(&mut self) {
        self.device.shutdown();
        self.zurueck_auf_idle();
    }
}
