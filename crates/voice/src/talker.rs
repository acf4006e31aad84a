//! Zustand eines entfernten Sprechers
//!
//! Jeder `RemoteTalkerBuffer` besitzt exklusiv seinen Decoder und seine
//! Ausgabesenke. Die Playback-Queue wird mit dem Pull-Callback der Senke
//! geteilt (`TalkerFeed`).

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use voicelink_audio::{AudioResult, AudioSink, FrameDecoder, PullCallback, VoiceBackend};
use voicelink_core::types::BYTES_PRO_SAMPLE;
use voicelink_core::{PcmFormat, TalkerId};

use crate::queue::PlaybackQueue;

/// Lebenszyklus eines Sprechers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TalkerZustand {
    /// Pakete kommen an, Wiedergabe noch nicht gestartet
    Buffering,
    /// Senke spielt ab
    Playing,
    /// Nach Stille-Timeout zurueckgesetzt; Eintrag bleibt erhalten
    IdleReset,
}

/// Quelle fuer den Pull-Callback im Audio-Thread
#[derive(Debug, Clone)]
pub struct TalkerFeed {
    talker_id: TalkerId,
    queue: Arc<PlaybackQueue>,
}

impl TalkerFeed {
    pub fn neu(talker_id: TalkerId, queue: Arc<PlaybackQueue>) -> Self {
        Self { talker_id, queue }
    }

    /// Liefert genau `samples_required` Samples (alle Kanaele) oder nichts
    pub fn generate_voice_data(&self, samples_required: usize) -> Option<Vec<u8>> {
        self.queue.dequeue(samples_required * BYTES_PRO_SAMPLE)
    }

    pub fn talker_id(&self) -> TalkerId {
        self.talker_id
    }

    /// Verpackt den Feed als Pull-Callback fuer eine Senke
    pub fn als_callback(self) -> PullCallback {
        Box::new(move |samples| self.generate_voice_data(samples))
    }
}

/// Puffer und Wiedergabe eines entfernten Sprechers
pub struct RemoteTalkerBuffer {
    talker_id: TalkerId,
    /// `None` = nie gesehen bzw. seit dem letzten Reset kein Paket
    last_seen: Option<Duration>,
    queue: Arc<PlaybackQueue>,
    num_frames_starved: u32,
    pub(crate) decoder: FrameDecoder,
    sink: Option<Box<dyn AudioSink>>,
    resets: u64,
}

impl RemoteTalkerBuffer {
    pub fn neu(talker_id: TalkerId, decoder: FrameDecoder, queue: PlaybackQueue) -> Self {
        Self {
            talker_id,
            last_seen: None,
            queue: Arc::new(queue),
            num_frames_starved: 0,
            decoder,
            sink: None,
            resets: 0,
        }
    }

    pub fn talker_id(&self) -> TalkerId {
        self.talker_id
    }

    pub fn last_seen(&self) -> Option<Duration> {
        self.last_seen
    }

    pub(crate) fn gesehen(&mut self, jetzt: Duration) {
        self.last_seen = Some(jetzt);
    }

    pub fn queue(&self) -> &Arc<PlaybackQueue> {
        &self.queue
    }

    pub fn queued_bytes(&self) -> usize {
        self.queue.len()
    }

    pub fn num_frames_starved(&self) -> u32 {
        self.num_frames_starved
    }

    /// Anzahl der bisherigen Stille-Resets
    pub fn resets(&self) -> u64 {
        self.resets
    }

    pub fn decoder(&self) -> &FrameDecoder {
        &self.decoder
    }

    pub fn hat_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub fn sink_aktiv(&self) -> bool {
        self.sink.as_ref().map(|s| s.is_active()).unwrap_or(false)
    }

    pub fn zustand(&self) -> TalkerZustand {
        if self.last_seen.is_none() {
            TalkerZustand::IdleReset
        } else if self.sink_aktiv() {
            TalkerZustand::Playing
        } else {
            TalkerZustand::Buffering
        }
    }

    /// Erzeugt die Senke beim ersten Bedarf und haengt den Feed an
    pub(crate) fn sink_sicherstellen(
        &mut self,
        backend: &dyn VoiceBackend,
        format: PcmFormat,
        output_device: Option<&str>,
    ) -> AudioResult<&mut Box<dyn AudioSink>> {
        let sink = match self.sink.take() {
            Some(sink) => sink,
            None => {
                let mut sink = backend.sink_erzeugen(format, output_device)?;
                let feed = TalkerFeed::neu(self.talker_id, Arc::clone(&self.queue));
                sink.set_pull_callback(Some(feed.als_callback()));
                debug!(talker = %self.talker_id, backend = backend.name(), "Senke erzeugt");
                sink
            }
        };
        Ok(self.sink.insert(sink))
    }

    /// Ein Tick auf der Uhr des Managers
    pub(crate) fn tick(&mut self, jetzt: Duration, timeout: Duration, starve_log_ticks: u32) {
        if let Some(seen) = self.last_seen {
            if jetzt.saturating_sub(seen) >= timeout {
                info!(
                    talker = %self.talker_id,
                    still_ms = jetzt.saturating_sub(seen).as_millis() as u64,
                    "Sprecher still, Puffer zurueckgesetzt"
                );
                self.reset();
                return;
            }
        }

        let hungert = self
            .sink
            .as_ref()
            .map(|s| s.is_active() && s.available_byte_count() == 0)
            .unwrap_or(false);
        if hungert {
            self.num_frames_starved += 1;
            if self.num_frames_starved == starve_log_ticks + 1 {
                warn!(
                    talker = %self.talker_id,
                    ticks = self.num_frames_starved,
                    queued = self.queue.len(),
                    "Senke hungert"
                );
            }
        } else {
            self.num_frames_starved = 0;
        }
    }

    /// Stoppt die Senke und leert die Queue; der Eintrag bleibt bestehen
    pub fn reset(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            sink.stop();
        }
        self.queue.clear();
        self.last_seen = None;
        self.num_frames_starved = 0;
        self.resets += 1;
    }

    /// Stoppt und loest die Senke vor dem Entfernen
    pub fn cleanup(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            sink.stop();
            sink.set_pull_callback(None);
        }
        self.queue.clear();
    }
}

impl Drop for RemoteTalkerBuffer {
    fn drop(&mut self) {
        self.cleanup();
    }
}
