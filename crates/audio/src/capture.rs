//! Mikrofon-Capture
//!
//! `AudioCaptureDevice` ist die Schnittstelle, ueber die der lokale
//! Sprachprozessor rohe PCM-Bytes abholt. Die cpal-Implementierung oeffnet
//! einen InputStream und schreibt Samples in einen lock-free Ring-Buffer;
//! abgeholt wird ausschliesslich per Polling aus dem Tick-Thread.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapRb};
use tracing::{debug, error, info, warn};

use crate::device::load_cpal_input_device;
use crate::error::{AudioError, AudioResult};
use voicelink_core::types::BYTES_PRO_SAMPLE;
use voicelink_core::PcmFormat;

/// Zustand des Aufnahmegeraets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Daten liegen bereit
    Ok,
    /// Aufnahme laeuft, aber noch nichts im Puffer
    NoData,
    /// Aufnahme gestoppt und Puffer leer
    NotCapturing,
    /// Hardware- oder Stream-Fehler
    Error,
}

/// Zustand plus Anzahl abholbarer Bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStatus {
    pub state: CaptureState,
    pub available_bytes: usize,
}

impl CaptureStatus {
    pub fn new(state: CaptureState, available_bytes: usize) -> Self {
        Self {
            state,
            available_bytes,
        }
    }
}

/// Ergebnis eines `voice_data`-Aufrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRead {
    pub bytes: usize,
    pub state: CaptureState,
}

/// Plattform-Aufnahmegeraet
pub trait AudioCaptureDevice {
    /// Startet die Aufnahme
    fn start(&mut self) -> AudioResult<()>;

    /// Stoppt die Aufnahme; bereits aufgenommene Daten bleiben abholbar
    fn stop(&mut self);

    /// Gibt alle Ressourcen frei
    fn shutdown(&mut self);

    fn is_capturing(&self) -> bool;

    /// `Error` gilt nur fuer diesen Aufruf; der naechste meldet wieder den
    /// Datenstand
    fn capture_state(&mut self) -> CaptureStatus;

    /// Kopiert bis zu `out.len()` Bytes (ganze Samples) nach `out`
    fn voice_data(&mut self, out: &mut [u8]) -> CaptureRead;
}

// ---------------------------------------------------------------------------
// cpal
// ---------------------------------------------------------------------------

/// Aufnahme ueber cpal
///
/// Der Ring-Buffer wird pro `start()` neu angelegt. Nach `stop()` wird der
/// Stream geschlossen, der Consumer bleibt bis zum Leerlesen erhalten.
pub struct CpalCaptureDevice {
    geraet_name: Option<String>,
    format: PcmFormat,
    puffer_samples: usize,
    stream: Option<Stream>,
    consumer: Option<HeapCons<i16>>,
    fehler_tx: Sender<String>,
    fehler_rx: Receiver<String>,
    letzter_fehler: Option<String>,
    samples: Vec<i16>,
}

impl CpalCaptureDevice {
    /// `puffer_bytes` ist die Kapazitaet des Ring-Buffers
    pub fn new(geraet_name: Option<String>, format: PcmFormat, puffer_bytes: usize) -> Self {
        let (fehler_tx, fehler_rx) = bounded(8);
        Self {
            geraet_name,
            format,
            puffer_samples: (puffer_bytes / BYTES_PRO_SAMPLE).max(1),
            stream: None,
            consumer: None,
            fehler_tx,
            fehler_rx,
            letzter_fehler: None,
            samples: Vec::new(),
        }
    }

    fn stream_oeffnen(&mut self) -> AudioResult<(Stream, HeapCons<i16>)> {
        let device = load_cpal_input_device(self.geraet_name.as_deref())?;
        let stream_config = StreamConfig {
            channels: self.format.channels,
            sample_rate: cpal::SampleRate(self.format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let rb = HeapRb::<i16>::new(self.puffer_samples);
        let (mut producer, consumer) = rb.split();

        let fehler_tx = self.fehler_tx.clone();
        let err_fn = move |err: cpal::StreamError| {
            error!("Capture-Fehler: {}", err);
            let _ = fehler_tx.try_send(err.to_string());
        };

        let sample_rate = self.format.sample_rate;
        let channels = self.format.channels;
        let supported = device
            .supported_input_configs()
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?
            .find(|c| {
                c.min_sample_rate().0 <= sample_rate
                    && c.max_sample_rate().0 >= sample_rate
                    && c.channels() >= channels
            });

        let sample_format = supported
            .map(|c| c.sample_format())
            .unwrap_or(SampleFormat::I16);

        let stream = match sample_format {
            SampleFormat::I16 => device
                .build_input_stream(
                    &stream_config,
                    move |data: &[i16], _| {
                        let written = producer.push_slice(data);
                        if written < data.len() {
                            warn!(
                                "Capture Ring-Buffer voll, {} Samples verworfen",
                                data.len() - written
                            );
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| AudioError::StreamFehler(e.to_string()))?,
            SampleFormat::F32 => device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _| {
                        let samples: Vec<i16> = data
                            .iter()
                            .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                            .collect();
                        let written = producer.push_slice(&samples);
                        if written < samples.len() {
                            warn!("Capture Ring-Buffer voll");
                        }
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

        Ok((stream, consumer))
    }

    fn fehler_einsammeln(&mut self) {
        if let Ok(fehler) = self.fehler_rx.try_recv() {
            self.letzter_fehler = Some(fehler);
        }
    }

    fn verfuegbar(&self) -> usize {
        self.consumer
            .as_ref()
            .map(|c| c.occupied_len() * BYTES_PRO_SAMPLE)
            .unwrap_or(0)
    }
}

impl AudioCaptureDevice for CpalCaptureDevice {
    fn start(&mut self) -> AudioResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        while self.fehler_rx.try_recv().is_ok() {}
        self.letzter_fehler = None;

        let (stream, consumer) = self.stream_oeffnen()?;
        self.stream = Some(stream);
        self.consumer = Some(consumer);
        info!(
            geraet = self.geraet_name.as_deref().unwrap_or("standard"),
            sample_rate = self.format.sample_rate,
            channels = self.format.channels,
            "Aufnahme gestartet"
        );
        Ok(())
    }

    fn stop(&mut self) {
        if self.stream.take().is_some() {
            debug!(verfuegbar = self.verfuegbar(), "Aufnahme gestoppt, Restdaten bleiben abholbar");
        }
    }

    fn shutdown(&mut self) {
        self.stream = None;
        self.consumer = None;
        self.letzter_fehler = None;
    }

    fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    /// Ein Stream-Fehler wird genau einmal als `Error` gemeldet
    fn capture_state(&mut self) -> CaptureStatus {
        self.fehler_einsammeln();
        let verfuegbar = self.verfuegbar();
        let state = if let Some(fehler) = self.letzter_fehler.take() {
            warn!(fehler = %fehler, "Aufnahmefehler gemeldet");
            CaptureState::Error
        } else if verfuegbar > 0 {
            CaptureState::Ok
        } else if self.stream.is_some() {
            CaptureState::NoData
        } else {
            CaptureState::NotCapturing
        };
        CaptureStatus::new(state, verfuegbar)
    }

    fn voice_data(&mut self, out: &mut [u8]) -> CaptureRead {
        self.fehler_einsammeln();
        if let Some(fehler) = self.letzter_fehler.take() {
            warn!(fehler = %fehler, "Aufnahmefehler gemeldet");
            return CaptureRead {
                bytes: 0,
                state: CaptureState::Error,
            };
        }

        let Some(consumer) = self.consumer.as_mut() else {
            return CaptureRead {
                bytes: 0,
                state: CaptureState::NotCapturing,
            };
        };

        self.samples.clear();
        self.samples.resize(out.len() / BYTES_PRO_SAMPLE, 0);
        let gelesen = consumer.pop_slice(&mut self.samples);
        for (ziel, s) in out
            .chunks_exact_mut(BYTES_PRO_SAMPLE)
            .zip(&self.samples[..gelesen])
        {
            ziel.copy_from_slice(&s.to_le_bytes());
        }

        let state = if gelesen > 0 {
            CaptureState::Ok
        } else if self.stream.is_some() {
            CaptureState::NoData
        } else {
            CaptureState::NotCapturing
        };
        CaptureRead {
            bytes: gelesen * BYTES_PRO_SAMPLE,
            state,
        }
    }
}

// ---------------------------------------------------------------------------
// Null
// ---------------------------------------------------------------------------

/// Aufnahmegeraet ohne Hardware; liefert nie Daten
#[derive(Debug, Default)]
pub struct NullCaptureDevice {
    aktiv: bool,
}

impl NullCaptureDevice {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioCaptureDevice for NullCaptureDevice {
    fn start(&mut self) -> AudioResult<()> {
        self.aktiv = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.aktiv = false;
    }

    fn shutdown(&mut self) {
        self.aktiv = false;
    }

    fn is_capturing(&self) -> bool {
        self.aktiv
    }

    fn capture_state(&mut self) -> CaptureStatus {
        let state = if self.aktiv {
            CaptureState::NoData
        } else {
            CaptureState::NotCapturing
        };
        CaptureStatus::new(state, 0)
    }

    fn voice_data(&mut self, _out: &mut [u8]) -> CaptureRead {
        CaptureRead {
            bytes: 0,
            state: self.capture_state().state,
        }
    }
}
