//! RemoteTalkerManager – Empfang und Pufferung entfernter Sprecher
//!
//! Nimmt Pakete beliebig vieler Sprecher entgegen, dekodiert sie in einen
//! Scratch-Puffer und haengt das PCM an die Queue des Sprechers. Der
//! Manager gehoert dem Tick-Thread; nur die Queues werden mit dem
//! Audio-Thread geteilt.
//!
//! Die Uhr ist ein Feld des Managers und wird ausschliesslich ueber
//! `tick_talkers(dt)` vorgestellt.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use voicelink_audio::{CodecFactory, FrameDecoder, VoiceBackend};
use voicelink_core::types::BYTES_PRO_SAMPLE;
use voicelink_core::{
    CodecHint, OverflowPolicy, PcmFormat, TalkerId, VoiceConfig, VoiceResult,
};
use voicelink_protocol::wire::{deframe, frame_count_lesen};

use crate::queue::{AppendOutcome, PlaybackQueue};
use crate::talker::{RemoteTalkerBuffer, TalkerZustand};

/// Einstellungen des Managers (aus `VoiceConfig` abgeleitet)
#[derive(Debug, Clone)]
pub struct RemoteEinstellungen {
    pub format: PcmFormat,
    pub codec_hint: CodecHint,
    pub max_queue_bytes: usize,
    pub jitter_fraction: f32,
    pub silence_timeout: Duration,
    pub starve_log_ticks: u32,
    pub overflow: OverflowPolicy,
    pub output_device: Option<String>,
}

impl RemoteEinstellungen {
    pub fn aus_config(config: &VoiceConfig) -> Self {
        Self {
            format: config.format(),
            codec_hint: config.audio.codec_hint,
            max_queue_bytes: config.max_queue_bytes(),
            jitter_fraction: config.playback.jitter_fraction,
            silence_timeout: Duration::from_millis(u64::from(config.playback.silence_timeout_ms)),
            starve_log_ticks: config.playback.starve_log_ticks,
            overflow: config.playback.remote_overflow,
            output_device: config.playback.output_device.clone(),
        }
    }

    /// Queue-Fuellstand, ab dem die Wiedergabe startet
    pub fn start_schwelle(&self) -> usize {
        (self.max_queue_bytes as f64 * f64::from(self.jitter_fraction)) as usize
    }
}

/// Verwaltet alle entfernten Sprecher
pub struct RemoteTalkerManager {
    talkers: HashMap<TalkerId, RemoteTalkerBuffer>,
    einstellungen: RemoteEinstellungen,
    codecs: Arc<dyn CodecFactory>,
    backend: Arc<dyn VoiceBackend>,
    jetzt: Duration,
    scratch: Vec<u8>,
    verworfene_pakete: u64,
}

impl RemoteTalkerManager {
    pub fn neu(
        einstellungen: RemoteEinstellungen,
        codecs: Arc<dyn CodecFactory>,
        backend: Arc<dyn VoiceBackend>,
    ) -> Self {
        let scratch = vec![0u8; einstellungen.format.max_packet_pcm_bytes()];
        Self {
            talkers: HashMap::new(),
            einstellungen,
            codecs,
            backend,
            jetzt: Duration::ZERO,
            scratch,
            verworfene_pakete: 0,
        }
    }

    /// Nimmt ein empfangenes Paket eines Sprechers entgegen
    ///
    /// Pakete ohne Frames, mit verletztem Header oder ohne dekodierbaren
    /// Frame legen keinen Sprecher an. Ausgabefehler werden geloggt.
    pub fn submit_remote_voice_data(&mut self, talker_id: TalkerId, paket: &[u8]) -> VoiceResult<()> {
        match frame_count_lesen(paket) {
            None | Some(0) => return Ok(()),
            Some(_) => {}
        }
        if let Err(e) = deframe(paket) {
            self.verworfene_pakete += 1;
            warn!(talker = %talker_id, bytes = paket.len(), fehler = %e, "Korruptes Sprachpaket verworfen");
            return Ok(());
        }

        let format = self.einstellungen.format;
        let n = match self.talkers.get_mut(&talker_id) {
            Some(talker) => talker.decoder.decode(paket, &mut self.scratch),
            None => {
                let codec = self.codecs.codec_erzeugen(format, self.einstellungen.codec_hint)?;
                let mut decoder = FrameDecoder::new(codec, format);
                let n = decoder.decode(paket, &mut self.scratch);
                if n == 0 {
                    debug!(talker = %talker_id, bytes = paket.len(), "Kein Frame dekodierbar, Sprecher nicht angelegt");
                    return Ok(());
                }
                let queue = PlaybackQueue::neu(
                    self.einstellungen.max_queue_bytes,
                    self.einstellungen.overflow,
                );
                info!(talker = %talker_id, "Neuer entfernter Sprecher");
                self.talkers
                    .insert(talker_id, RemoteTalkerBuffer::neu(talker_id, decoder, queue));
                n
            }
        };
        if n == 0 {
            return Ok(());
        }
        let Some(talker) = self.talkers.get_mut(&talker_id) else {
            return Ok(());
        };

        talker.gesehen(self.jetzt);
        if talker.queue().append(&self.scratch[..n]) != AppendOutcome::Angehaengt {
            debug!(talker = %talker_id, bytes = n, "Ueberlauf beim Anhaengen");
        }
        let queued = talker.queued_bytes();
        let schwelle = self.einstellungen.start_schwelle();

        // Ausgabefehler machen den Sprecher stumm, das Paket bleibt angenommen
        match talker.sink_sicherstellen(
            &*self.backend,
            format,
            self.einstellungen.output_device.as_deref(),
        ) {
            Ok(sink) if !sink.is_active() && queued > schwelle => match sink.play() {
                Ok(()) => info!(talker = %talker_id, queued, "Wiedergabe gestartet"),
                Err(e) => warn!(talker = %talker_id, fehler = %e, "Wiedergabe konnte nicht gestartet werden"),
            },
            Ok(_) => {}
            Err(e) => warn!(talker = %talker_id, fehler = %e, "Keine Ausgabesenke, Sprecher bleibt stumm"),
        }
        Ok(())
    }

    /// Stellt die Uhr um `dt` vor und prueft alle Sprecher
    ///
    /// `dt == 0` veraendert keinen Zustand.
    pub fn tick_talkers(&mut self, dt: Duration) {
        if dt.is_zero() {
            return;
        }
        self.jetzt += dt;
        let jetzt = self.jetzt;
        for talker in self.talkers.values_mut() {
            talker.tick(
                jetzt,
                self.einstellungen.silence_timeout,
                self.einstellungen.starve_log_ticks,
            );
        }
    }

    /// Entfernt einen Sprecher; gibt `false` zurueck, wenn er unbekannt war
    pub fn unregister_remote_talker(&mut self, talker_id: TalkerId) -> bool {
        match self.talkers.remove(&talker_id) {
            Some(mut talker) => {
                talker.cleanup();
                info!(talker = %talker_id, "Entfernter Sprecher abgemeldet");
                true
            }
            None => false,
        }
    }

    /// Entfernt alle Sprecher
    pub fn remove_all_remote_talkers(&mut self) {
        let anzahl = self.talkers.len();
        for (_, mut talker) in self.talkers.drain() {
            talker.cleanup();
        }
        if anzahl > 0 {
            info!(anzahl, "Alle entfernten Sprecher entfernt");
        }
    }

    /// Pull fuer einen Sprecher: genau `samples_required` Samples oder nichts
    pub fn generate_voice_data(&self, talker_id: TalkerId, samples_required: usize) -> Option<Vec<u8>> {
        self.talkers
            .get(&talker_id)
            .and_then(|t| t.queue().dequeue(samples_required * BYTES_PRO_SAMPLE))
    }

    /// Ob der Sprecher gerade hoerbar ist oder Daten puffert
    pub fn is_remote_player_talking(&self, talker_id: TalkerId) -> bool {
        self.talkers
            .get(&talker_id)
            .map(|t| t.zustand() != TalkerZustand::IdleReset && (t.sink_aktiv() || t.queued_bytes() > 0))
            .unwrap_or(false)
    }

    pub fn zustand(&self, talker_id: TalkerId) -> Option<TalkerZustand> {
        self.talkers.get(&talker_id).map(|t| t.zustand())
    }

    pub fn talker(&self, talker_id: TalkerId) -> Option<&RemoteTalkerBuffer> {
        self.talkers.get(&talker_id)
    }

    pub fn talker_ids(&self) -> impl Iterator<Item = TalkerId> + '_ {
        self.talkers.keys().copied()
    }

    pub fn anzahl(&self) -> usize {
        self.talkers.len()
    }

    /// Aktuelle Manager-Uhr
    pub fn jetzt(&self) -> Duration {
        self.jetzt
    }

    /// Pakete, deren Header-Pruefung fehlschlug
    pub fn verworfene_pakete(&self) -> u64 {
        self.verworfene_pakete
    }

    pub fn einstellungen(&self) -> &RemoteEinstellungen {
        &self.einstellungen
    }
}
