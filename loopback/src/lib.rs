//! voicelink Loopback
//!
//! Nimmt ueber das konfigurierte Backend auf, kodiert, paketiert und speist
//! jedes Paket als entfernten Sprecher wieder ein. Damit laeuft die gesamte
//! Pipeline ohne Netzwerk.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use voicelink_audio::{backend_waehlen, StandardCodecFactory, VoiceBackend};
use voicelink_core::{LocalUserIndex, TalkerId, VoiceConfig, VoiceResult};
use voicelink_voice::{LocalZustand, VoiceEngine};

/// Takt der Tick-Schleife (ein Frame)
pub const TAKT: Duration = Duration::from_millis(20);

/// Obergrenze fuer das Abholen der Restdaten nach dem Stopp
const MAX_DRAIN_TICKS: u32 = 50;

const LOKALER_BENUTZER: LocalUserIndex = LocalUserIndex(0);

pub struct Loopback {
    engine: VoiceEngine,
    echo: TalkerId,
    puffer: Vec<u8>,
}

impl Loopback {
    /// Baut die Engine mit Backend und Codec aus der Konfiguration auf
    pub fn neu(config: VoiceConfig) -> Result<Self> {
        let backend: Arc<dyn VoiceBackend> = Arc::from(backend_waehlen(&config.capture.backend)?);
        let codecs = Arc::new(StandardCodecFactory::new(&config.audio.codec)?);
        let engine = VoiceEngine::init(config, backend, codecs)?;
        Ok(Self::mit_engine(engine))
    }

    pub fn mit_engine(engine: VoiceEngine) -> Self {
        let puffer = vec![0u8; engine.max_packet_bytes()];
        Self {
            engine,
            echo: TalkerId::new(),
            puffer,
        }
    }

    pub fn engine(&self) -> &VoiceEngine {
        &self.engine
    }

    /// Ein Tick: lokal lesen, als Echo einspeisen, Uhr vorstellen
    pub fn schritt(&mut self) -> VoiceResult<usize> {
        let n = match self.engine.read_local_voice_data(LOKALER_BENUTZER, &mut self.puffer) {
            Ok(n) => n,
            Err(e) if e.ist_wiederholbar() => {
                tracing::warn!(fehler = %e, "Aufnahme fehlgeschlagen, naechster Versuch im naechsten Tick");
                0
            }
            Err(e) => return Err(e),
        };
        if n > 0 {
            self.engine.submit_remote_voice_data(self.echo, &self.puffer[..n])?;
        }
        self.engine.tick_talkers(TAKT);
        Ok(n)
    }

    /// Laeuft bis Ctrl-C, holt danach die Restdaten ab und gibt alles frei
    pub async fn starten(mut self) -> Result<()> {
        self.engine.register_local_talker(LOKALER_BENUTZER)?;
        self.engine.start_local_voice_processing()?;
        tracing::info!(
            headset = self.engine.is_headset_present(),
            codec = %self.engine.dump_codec_state(),
            "Loopback laeuft. Warte auf Shutdown-Signal (Ctrl-C)..."
        );

        let mut takt = tokio::time::interval(TAKT);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        loop {
            tokio::select! {
                _ = takt.tick() => {
                    self.schritt()?;
                }
                ergebnis = &mut ctrl_c => {
                    ergebnis?;
                    tracing::info!("Shutdown-Signal empfangen, Loopback wird beendet");
                    break;
                }
            }
        }

        self.beenden()?;
        Ok(())
    }

    /// Stoppt die Aufnahme und tickt, bis der lokale Sprecher wieder Idle ist
    pub fn beenden(&mut self) -> VoiceResult<()> {
        self.engine.stop_local_voice_processing();
        let mut ticks = 0;
        while self.engine.local_state() != LocalZustand::Idle {
            if ticks >= MAX_DRAIN_TICKS {
                tracing::warn!(ticks, "Restdaten nicht vollstaendig abgeholt");
                break;
            }
            self.schritt()?;
            ticks += 1;
        }

        let stats = self.engine.stats();
        tracing::info!(
            pakete = stats.encoder.pakete,
            frames = stats.encoder.frames,
            verworfen = stats.verworfene_pakete,
            ueberlaeufe = stats.queue_ueberlaeufe,
            "Loopback-Statistik"
        );

        self.engine.unregister_local_talker(LOKALER_BENUTZER)?;
        self.engine.herunterfahren();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn null_config() -> VoiceConfig {
        let mut config = VoiceConfig::default();
        config.capture.backend = "null".to_string();
        config.audio.codec = "pcm".to_string();
        config
    }

    #[test]
    fn null_backend_laeuft_und_endet_idle() {
        let mut loopback = Loopback::neu(null_config()).unwrap();
        loopback.engine.register_local_talker(LOKALER_BENUTZER).unwrap();
        loopback.engine.start_local_voice_processing().unwrap();
        for _ in 0..5 {
            assert_eq!(loopback.schritt().unwrap(), 0);
        }
        assert_eq!(loopback.engine().remote().jetzt(), TAKT * 5);

        loopback.beenden().unwrap();
        assert_eq!(loopback.engine().local_state(), LocalZustand::Idle);
    }

    #[test]
    fn unbekannter_codec_scheitert() {
        let mut config = null_config();
        config.audio.codec = "mp3".to_string();
        assert!(Loopback::neu(config).is_err());
    }
}
