//! VoiceEngine – Fassade ueber lokalen Sprecher und entfernte Sprecher
//!
//! Die Engine gehoert dem Tick-Thread. Sie prueft die Konfiguration, bevor
//! irgendein Codec-, Aufnahme- oder Playback-Objekt erzeugt wird.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use voicelink_audio::{
    AudioSink, CodecFactory, DecoderStats, EncoderStats, FrameDecoder, FrameEncoder, VoiceBackend,
};
use voicelink_core::{LocalUserIndex, TalkerId, VoiceConfig, VoiceResult};

use crate::local::{LocalEinstellungen, LocalVoiceProcessor, LocalZustand};
use crate::queue::PlaybackQueue;
use crate::remote::{RemoteEinstellungen, RemoteTalkerManager};
use crate::talker::{TalkerFeed, TalkerZustand};

/// Lokaler Ausgangspfad: eigene Pakete dekodiert wieder abspielen
struct LocalLoopback {
    decoder: FrameDecoder,
    queue: Arc<PlaybackQueue>,
    sink: Box<dyn AudioSink>,
    scratch: Vec<u8>,
    start_schwelle: usize,
}

impl LocalLoopback {
    /// Ausgabefehler bleiben lokal, das Paket gehoert weiter dem Aufrufer
    fn einspeisen(&mut self, paket: &[u8]) {
        let n = self.decoder.decode(paket, &mut self.scratch);
        if n == 0 {
            return;
        }
        self.queue.append(&self.scratch[..n]);
        if !self.sink.is_active() && self.queue.len() > self.start_schwelle {
            match self.sink.play() {
                Ok(()) => debug!(queued = self.queue.len(), "Loopback-Wiedergabe gestartet"),
                Err(e) => warn!(fehler = %e, "Loopback-Wiedergabe konnte nicht gestartet werden"),
            }
        }
    }
}

impl Drop for LocalLoopback {
    fn drop(&mut self) {
        self.sink.stop();
        self.sink.set_pull_callback(None);
    }
}

/// Zusammengefasste Zaehler der Engine
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub encoder: EncoderStats,
    pub loopback_decoder: Option<DecoderStats>,
    pub remote_talker: usize,
    pub verworfene_pakete: u64,
    pub queue_ueberlaeufe: u64,
}

/// Sprach-Pipeline eines Clients
pub struct VoiceEngine {
    config: VoiceConfig,
    backend: Arc<dyn VoiceBackend>,
    lokal: LocalVoiceProcessor,
    remote: RemoteTalkerManager,
    loopback: Option<LocalLoopback>,
}

impl VoiceEngine {
    /// Prueft die Konfiguration und baut alle Komponenten auf
    pub fn init(
        config: VoiceConfig,
        backend: Arc<dyn VoiceBackend>,
        codecs: Arc<dyn CodecFactory>,
    ) -> VoiceResult<Self> {
        config.validieren()?;
        let format = config.format();
        let hint = config.audio.codec_hint;

        let mut encoder_codec = codecs.codec_erzeugen(format, hint)?;
        encoder_codec.set_bitrate(config.audio.bitrate_bps);
        encoder_codec.set_vbr(config.audio.vbr);
        encoder_codec.set_complexity(config.audio.complexity);
        let encoder = FrameEncoder::new(encoder_codec, format);

        let device = backend.capture_erzeugen(
            format,
            config.capture.input_device.as_deref(),
            config.capture_buffer_bytes(),
        )?;
        let lokal = LocalVoiceProcessor::neu(
            device,
            encoder,
            LocalEinstellungen {
                max_remainder_bytes: config.capture.max_remainder_bytes,
                capture_buffer_bytes: config.capture_buffer_bytes(),
            },
        );

        let loopback = if config.playback.local_loopback {
            let queue = Arc::new(PlaybackQueue::neu(
                config.max_queue_bytes(),
                config.playback.local_overflow,
            ));
            let mut sink = backend.sink_erzeugen(format, config.playback.output_device.as_deref())?;
            let feed = TalkerFeed::neu(TalkerId::new(), Arc::clone(&queue));
            sink.set_pull_callback(Some(feed.als_callback()));
            let decoder = FrameDecoder::new(codecs.codec_erzeugen(format, hint)?, format);
            Some(LocalLoopback {
                scratch: vec![0u8; decoder.max_decoded_bytes()],
                decoder,
                queue,
                sink,
                start_schwelle: RemoteEinstellungen::aus_config(&config).start_schwelle(),
            })
        } else {
            None
        };

        let remote = RemoteTalkerManager::neu(
            RemoteEinstellungen::aus_config(&config),
            codecs,
            Arc::clone(&backend),
        );

        info!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            frame_bytes = format.frame_bytes(),
            backend = backend.name(),
            loopback = loopback.is_some(),
            "VoiceEngine initialisiert"
        );

        Ok(Self {
            config,
            backend,
            lokal,
            remote,
            loopback,
        })
    }

    pub fn config(&self) -> &VoiceConfig {
        &self.config
    }

    /// Groesster Puffer, den `read_local_voice_data` fuellen kann
    pub fn max_packet_bytes(&self) -> usize {
        self.config.capture_buffer_bytes() + 2 + 2 * voicelink_protocol::MAX_FRAMES_PRO_PAKET
    }

    // -----------------------------------------------------------------------
    // Lokaler Sprecher
    // -----------------------------------------------------------------------

    pub fn register_local_talker(&mut self, user: LocalUserIndex) -> VoiceResult<()> {
        self.lokal.register(user)
    }

    pub fn unregister_local_talker(&mut self, user: LocalUserIndex) -> VoiceResult<()> {
        self.lokal.unregister(user)
    }

    pub fn start_local_voice_processing(&mut self) -> VoiceResult<()> {
        self.lokal.start()
    }

    pub fn stop_local_voice_processing(&mut self) {
        self.lokal.stop()
    }

    pub fn local_state(&self) -> LocalZustand {
        self.lokal.zustand()
    }

    /// Liest und kodiert die lokale Aufnahme; speist bei aktivem Loopback
    /// das Paket zusaetzlich in den lokalen Ausgangspfad
    pub fn read_local_voice_data(&mut self, user: LocalUserIndex, out: &mut [u8]) -> VoiceResult<usize> {
        let n = self.lokal.read_local_voice_data(user, out)?;
        if n > 0 {
            if let Some(loopback) = self.loopback.as_mut() {
                loopback.einspeisen(&out[..n]);
            }
        }
        Ok(n)
    }

    /// Bit `i` gesetzt, wenn lokaler Benutzer `i` Daten bereit hat
    pub fn get_voice_data_ready_flags(&mut self) -> u32 {
        match self.lokal.besitzer() {
            Some(user) if user.0 < 32 && self.lokal.daten_bereit() => 1 << user.0,
            _ => 0,
        }
    }

    pub fn is_headset_present(&self) -> bool {
        self.backend.headset_vorhanden()
    }

    pub fn is_local_player_talking(&self, user: LocalUserIndex) -> bool {
        self.lokal.besitzer() == Some(user) && self.lokal.spricht()
    }

    // -----------------------------------------------------------------------
    // Entfernte Sprecher
    // -----------------------------------------------------------------------

    pub fn submit_remote_voice_data(&mut self, talker_id: TalkerId, paket: &[u8]) -> VoiceResult<()> {
        self.remote.submit_remote_voice_data(talker_id, paket)
    }

    pub fn tick_talkers(&mut self, dt: Duration) {
        self.remote.tick_talkers(dt)
    }

    pub fn unregister_remote_talker(&mut self, talker_id: TalkerId) -> bool {
        self.remote.unregister_remote_talker(talker_id)
    }

    pub fn remove_all_remote_talkers(&mut self) {
        self.remote.remove_all_remote_talkers()
    }

    pub fn is_remote_player_talking(&self, talker_id: TalkerId) -> bool {
        self.remote.is_remote_player_talking(talker_id)
    }

    pub fn remote_state(&self, talker_id: TalkerId) -> Option<TalkerZustand> {
        self.remote.zustand(talker_id)
    }

    pub fn remote(&self) -> &RemoteTalkerManager {
        &self.remote
    }

    // -----------------------------------------------------------------------
    // Encoder-Tuning und Diagnose
    // -----------------------------------------------------------------------

    pub fn set_bitrate(&mut self, bits_per_second: i32) -> bool {
        self.lokal.encoder_mut().set_bitrate(bits_per_second)
    }

    pub fn set_vbr(&mut self, vbr: bool) -> bool {
        self.lokal.encoder_mut().set_vbr(vbr)
    }

    pub fn set_complexity(&mut self, complexity: u8) -> bool {
        self.lokal.encoder_mut().set_complexity(complexity)
    }

    pub fn dump_codec_state(&self) -> String {
        self.lokal.encoder().dump_state()
    }

    pub fn stats(&self) -> EngineStats {
        let remote_ueberlaeufe: u64 = self
            .remote
            .talker_ids()
            .filter_map(|id| self.remote.talker(id))
            .map(|t| t.queue().ueberlaeufe())
            .sum();
        let loopback_ueberlaeufe = self
            .loopback
            .as_ref()
            .map(|l| l.queue.ueberlaeufe())
            .unwrap_or(0);
        EngineStats {
            encoder: self.lokal.encoder_stats().clone(),
            loopback_decoder: self.loopback.as_ref().map(|l| l.decoder.stats().clone()),
            remote_talker: self.remote.anzahl(),
            verworfene_pakete: self.remote.verworfene_pakete(),
            queue_ueberlaeufe: remote_ueberlaeufe + loopback_ueberlaeufe,
        }
    }

    /// Gibt alle Geraete und Sprecher frei
    pub fn herunterfahren(&mut self) {
        self.lokal.shutdown();
        self.remote.remove_all_remote_talkers();
        self.loopback = None;
        info!("VoiceEngine heruntergefahren");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicelink_audio::{NullBackend, StandardCodecFactory};
    use voicelink_core::VoiceError;

    fn engine(config: VoiceConfig) -> VoiceResult<VoiceEngine> {
        VoiceEngine::init(
            config,
            Arc::new(NullBackend),
            Arc::new(StandardCodecFactory::new("pcm").map_err(VoiceError::from)?),
        )
    }

    #[test]
    fn ungueltige_abtastrate_erzeugt_nichts() {
        let mut config = VoiceConfig::default();
        config.audio.sample_rate = 44100;
        assert!(matches!(engine(config), Err(VoiceError::Konfiguration(_))));
    }

    #[test]
    fn lokaler_slot_lebenszyklus() {
        let mut e = engine(VoiceConfig::default()).unwrap();
        let user = LocalUserIndex(3);
        e.register_local_talker(user).unwrap();
        e.start_local_voice_processing().unwrap();
        assert_eq!(e.local_state(), LocalZustand::Capturing);

        let mut out = vec![0u8; e.max_packet_bytes()];
        assert_eq!(e.read_local_voice_data(user, &mut out).unwrap(), 0);
        assert_eq!(e.get_voice_data_ready_flags(), 0);
        assert!(!e.is_local_player_talking(user));

        e.stop_local_voice_processing();
        assert_eq!(e.read_local_voice_data(user, &mut out).unwrap(), 0);
        assert_eq!(e.local_state(), LocalZustand::Idle);
        e.unregister_local_talker(user).unwrap();
    }

    #[test]
    fn tuning_wird_durchgereicht() {
        let mut e = engine(VoiceConfig::default()).unwrap();
        // Der PCM-Codec kennt keine Bitrate
        assert!(!e.set_bitrate(16_000));
        assert!(e.dump_codec_state().starts_with("pcm"));
        assert!(!e.is_headset_present());
    }
}
