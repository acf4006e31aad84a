//! Audio-Playback
//!
//! `AudioSink` ist die Ausgabeseite eines Sprechers. Die Senke zieht ihre
//! Daten ueber einen registrierten Pull-Callback, der im Audio-Thread
//! laeuft und dort die Playback-Queue des Sprechers leert.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::device::load_cpal_output_device;
use crate::error::{AudioError, AudioResult};
use voicelink_core::types::BYTES_PRO_SAMPLE;
use voicelink_core::PcmFormat;

/// Pull-Callback: erhaelt die Anzahl benoetigter Samples (alle Kanaele),
/// liefert PCM-Bytes oder `None` wenn nicht genug gepuffert ist
pub type PullCallback = Box<dyn FnMut(usize) -> Option<Vec<u8>> + Send>;

type GeteilterCallback = Arc<Mutex<Option<PullCallback>>>;

/// Ausgabesenke eines Sprechers
pub trait AudioSink {
    fn play(&mut self) -> AudioResult<()>;

    fn stop(&mut self);

    fn is_active(&self) -> bool;

    /// Registriert (oder entfernt mit `None`) den Pull-Callback
    fn set_pull_callback(&mut self, callback: Option<PullCallback>);

    /// Bytes, die die Senke noch ohne neuen Pull abspielen kann
    fn available_byte_count(&self) -> usize;
}

// ---------------------------------------------------------------------------
// cpal
// ---------------------------------------------------------------------------

/// Wiedergabe ueber einen cpal OutputStream
///
/// Der Output-Callback haelt einen Vorrat von einem Callback-Block und
/// fragt den Pull-Callback nach, sobald dieser Vorrat unterschritten wird.
pub struct CpalAudioSink {
    geraet_name: Option<String>,
    format: PcmFormat,
    stream: Option<Stream>,
    callback: GeteilterCallback,
    verfuegbar: Arc<AtomicUsize>,
    unterlauf: Arc<AtomicBool>,
}

impl CpalAudioSink {
    pub fn new(geraet_name: Option<String>, format: PcmFormat) -> Self {
        Self {
            geraet_name,
            format,
            stream: None,
            callback: Arc::new(Mutex::new(None)),
            verfuegbar: Arc::new(AtomicUsize::new(0)),
            unterlauf: Arc::new(AtomicBool::new(false)),
        }
    }

    fn stream_oeffnen(&self) -> AudioResult<Stream> {
        let device = load_cpal_output_device(self.geraet_name.as_deref())?;
        let stream_config = StreamConfig {
            channels: self.format.channels,
            sample_rate: cpal::SampleRate(self.format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let err_fn = |err| error!("Playback-Fehler: {}", err);

        let sample_rate = self.format.sample_rate;
        let channels = self.format.channels;
        let supported = device
            .supported_output_configs()
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?
            .find(|c| {
                c.min_sample_rate().0 <= sample_rate
                    && c.max_sample_rate().0 >= sample_rate
                    && c.channels() >= channels
            });

        let sample_format = supported
            .map(|c| c.sample_format())
            .unwrap_or(SampleFormat::I16);

        let mut vorrat = Vorrat::new(
            Arc::clone(&self.callback),
            Arc::clone(&self.verfuegbar),
            Arc::clone(&self.unterlauf),
        );

        let stream = match sample_format {
            SampleFormat::I16 => device
                .build_output_stream(
                    &stream_config,
                    move |data: &mut [i16], _| {
                        vorrat.fuellen(data.len());
                        for out in data.iter_mut() {
                            *out = vorrat.naechstes();
                        }
                        vorrat.melden();
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| AudioError::StreamFehler(e.to_string()))?,
            SampleFormat::F32 => device
                .build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _| {
                        vorrat.fuellen(data.len());
                        for out in data.iter_mut() {
                            *out = vorrat.naechstes() as f32 / i16::MAX as f32;
                        }
                        vorrat.melden();
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| AudioError::StreamFehler(e.to_string()))?,
            _ => {
                return Err(AudioError::StreamFehler(format!(
                    "Nicht unterstuetztes Sample-Format: {:?}",
                    sample_format
                )))
            }
        };

        stream
            .play()
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?;
        Ok(stream)
    }

    /// Ob der letzte Output-Callback Stille einfuegen musste
    pub fn hatte_unterlauf(&self) -> bool {
        self.unterlauf.load(Ordering::Relaxed)
    }
}

impl AudioSink for CpalAudioSink {
    fn play(&mut self) -> AudioResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = self.stream_oeffnen()?;
        self.stream = Some(stream);
        info!(
            geraet = self.geraet_name.as_deref().unwrap_or("standard"),
            sample_rate = self.format.sample_rate,
            "Wiedergabe gestartet"
        );
        Ok(())
    }

    fn stop(&mut self) {
        if self.stream.take().is_some() {
            self.verfuegbar.store(0, Ordering::Relaxed);
            debug!("Wiedergabe gestoppt");
        }
    }

    fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    fn set_pull_callback(&mut self, callback: Option<PullCallback>) {
        *self.callback.lock() = callback;
    }

    fn available_byte_count(&self) -> usize {
        self.verfuegbar.load(Ordering::Relaxed)
    }
}

/// Sample-Vorrat im Output-Callback
struct Vorrat {
    samples: VecDeque<i16>,
    callback: GeteilterCallback,
    verfuegbar: Arc<AtomicUsize>,
    unterlauf: Arc<AtomicBool>,
    fehlend: bool,
}

impl Vorrat {
    fn new(
        callback: GeteilterCallback,
        verfuegbar: Arc<AtomicUsize>,
        unterlauf: Arc<AtomicBool>,
    ) -> Self {
        Self {
            samples: VecDeque::new(),
            callback,
            verfuegbar,
            unterlauf,
            fehlend: false,
        }
    }

    /// Holt nach, bis ein Block plus ein Block Vorlauf bereitliegt
    fn fuellen(&mut self, block: usize) {
        let ziel = block * 2;
        if self.samples.len() >= ziel {
            self.fehlend = false;
            return;
        }
        let fehlt = ziel - self.samples.len();
        let bytes = {
            let mut guard = self.callback.lock();
            guard.as_mut().and_then(|cb| cb(fehlt))
        };
        if let Some(bytes) = bytes {
            self.samples.extend(
                bytes
                    .chunks_exact(BYTES_PRO_SAMPLE)
                    .map(|b| i16::from_le_bytes([b[0], b[1]])),
            );
        }
        self.fehlend = self.samples.len() < block;
    }

    fn naechstes(&mut self) -> i16 {
        self.samples.pop_front().unwrap_or(0)
    }

    fn melden(&self) {
        self.verfuegbar
            .store(self.samples.len() * BYTES_PRO_SAMPLE, Ordering::Relaxed);
        self.unterlauf.store(self.fehlend, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Null
// ---------------------------------------------------------------------------

/// Senke ohne Hardware
///
/// Zieht nur auf ausdrueckliche Anforderung ueber `pull()`; dient dem
/// Loopback ohne Ausgabegeraet und Tests. Der zuletzt gezogene Block gilt
/// als Vorrat, bis der naechste Pull ihn ersetzt.
#[derive(Default)]
pub struct NullAudioSink {
    aktiv: bool,
    callback: Option<PullCallback>,
    gezogen: usize,
    vorrat: usize,
}

impl NullAudioSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fordert `samples` Samples an und verwirft sie
    pub fn pull(&mut self, samples: usize) -> Option<usize> {
        if !self.aktiv {
            return None;
        }
        let Some(bytes) = self.callback.as_mut().and_then(|cb| cb(samples)) else {
            // Unterlauf: nichts mehr abspielbar
            self.vorrat = 0;
            return None;
        };
        self.gezogen += bytes.len();
        self.vorrat = bytes.len();
        Some(bytes.len())
    }

    /// Summe aller bisher gezogenen Bytes
    pub fn gezogen(&self) -> usize {
        self.gezogen
    }
}

impl AudioSink for NullAudioSink {
    fn play(&mut self) -> AudioResult<()> {
        self.aktiv = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.aktiv = false;
        self.vorrat = 0;
    }

    fn is_active(&self) -> bool {
        self.aktiv
    }

    fn set_pull_callback(&mut self, callback: Option<PullCallback>) {
        self.callback = callback;
    }

    fn available_byte_count(&self) -> usize {
        self.vorrat
    }
}
