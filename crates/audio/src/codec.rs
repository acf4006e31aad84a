//! Block-Codecs fuer 20ms-Frames
//!
//! Ein `BlockCodec` komprimiert genau einen rohen PCM-Frame
//! (16-Bit little-endian, interleaved) und dekodiert ihn wieder.
//! Encoder und Decoder werden beim ersten Gebrauch erzeugt, sodass eine
//! Instanz, die nur dekodiert, keinen Encoder-Zustand mitschleppt.

use audiopus::{
    coder::{Decoder, Encoder},
    Application, Bitrate, Channels, SampleRate,
};
use tracing::{debug, warn};

use crate::error::{AudioError, AudioResult};
use voicelink_core::types::BYTES_PRO_SAMPLE;
use voicelink_core::{CodecHint, PcmFormat};

/// Obergrenze fuer einen einzelnen komprimierten Frame
pub const MAX_KOMPRIMIERTER_FRAME: usize = 4000;

/// Codec fuer Frames fester Groesse
pub trait BlockCodec: Send {
    /// Setzt Format und Optimierungsziel; verwirft vorhandenen Zustand
    fn init(&mut self, sample_rate: u32, channels: u16, hint: CodecHint) -> AudioResult<()>;

    /// Komprimiert einen rohen Frame nach `out`, liefert die Anzahl Bytes
    fn encode(&mut self, pcm_frame: &[u8], out: &mut [u8]) -> AudioResult<usize>;

    /// Dekodiert einen komprimierten Frame nach `out`, liefert die Anzahl PCM-Bytes
    fn decode(&mut self, compressed: &[u8], out: &mut [u8]) -> AudioResult<usize>;

    /// Ziel-Bitrate setzen; `false` wenn der Codec das nicht unterstuetzt
    fn set_bitrate(&mut self, bits_per_second: i32) -> bool;

    fn set_vbr(&mut self, vbr: bool) -> bool;

    fn set_complexity(&mut self, complexity: u8) -> bool;

    /// Verwirft den internen Codec-Zustand
    fn reset(&mut self);

    /// Lesbare Zusammenfassung des Zustands (Debug-Kommandos)
    fn dump_state(&self) -> String;
}

// ---------------------------------------------------------------------------
// Opus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct OpusParameter {
    bitrate_bps: i32,
    vbr: bool,
    complexity: u8,
}

impl Default for OpusParameter {
    fn default() -> Self {
        Self {
            bitrate_bps: 32_000,
            vbr: true,
            complexity: 6,
        }
    }
}

/// Opus-Codec via audiopus
#[derive(Default)]
pub struct OpusBlockCodec {
    format: Option<PcmFormat>,
    hint: CodecHint,
    parameter: OpusParameter,
    encoder: Option<Encoder>,
    decoder: Option<Decoder>,
    samples: Vec<i16>,
}

impl OpusBlockCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn format(&self) -> AudioResult<PcmFormat> {
        self.format.ok_or(AudioError::CodecNichtInitialisiert)
    }

    fn encoder(&mut self) -> AudioResult<&mut Encoder> {
        if self.encoder.is_none() {
            let format = self.format()?;
            let mut encoder = Encoder::new(
                opus_rate(format.sample_rate)?,
                opus_channels(format.channels)?,
                opus_application(self.hint),
            )
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

            encoder
                .set_bitrate(Bitrate::BitsPerSecond(self.parameter.bitrate_bps))
                .map_err(|e| AudioError::CodecFehler(e.to_string()))?;
            encoder
                .set_vbr(self.parameter.vbr)
                .map_err(|e| AudioError::CodecFehler(e.to_string()))?;
            encoder
                .set_complexity(self.parameter.complexity)
                .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

            debug!(
                sample_rate = format.sample_rate,
                channels = format.channels,
                bitrate = self.parameter.bitrate_bps,
                "Opus-Encoder erstellt"
            );
            self.encoder = Some(encoder);
        }
        self.encoder.as_mut().ok_or(AudioError::CodecNichtInitialisiert)
    }

    fn decoder(&mut self) -> AudioResult<&mut Decoder> {
        if self.decoder.is_none() {
            let format = self.format()?;
            let decoder = Decoder::new(
                opus_rate(format.sample_rate)?,
                opus_channels(format.channels)?,
            )
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;
            debug!(
                sample_rate = format.sample_rate,
                channels = format.channels,
                "Opus-Decoder erstellt"
            );
            self.decoder = Some(decoder);
        }
        self.decoder.as_mut().ok_or(AudioError::CodecNichtInitialisiert)
    }
}

impl BlockCodec for OpusBlockCodec {
    fn init(&mut self, sample_rate: u32, channels: u16, hint: CodecHint) -> AudioResult<()> {
        let format = PcmFormat::new(sample_rate, channels);
        format.validieren().map_err(AudioError::Konfiguration)?;
        self.format = Some(format);
        self.hint = hint;
        self.reset();
        Ok(())
    }

    fn encode(&mut self, pcm_frame: &[u8], out: &mut [u8]) -> AudioResult<usize> {
        let frame_bytes = self.format()?.frame_bytes();
        if pcm_frame.len() != frame_bytes {
            return Err(AudioError::Konfiguration(format!(
                "PCM-Frame muss {} Bytes lang sein, war {}",
                frame_bytes,
                pcm_frame.len()
            )));
        }

        let mut samples = std::mem::take(&mut self.samples);
        bytes_zu_samples(pcm_frame, &mut samples);
        let ergebnis = self
            .encoder()
            .and_then(|enc| {
                enc.encode(&samples, out)
                    .map_err(|e| AudioError::CodecFehler(e.to_string()))
            });
        self.samples = samples;
        ergebnis
    }

    fn decode(&mut self, compressed: &[u8], out: &mut [u8]) -> AudioResult<usize> {
        let format = self.format()?;
        let max_samples = format.samples_per_frame() * format.channels as usize;

        let mut samples = std::mem::take(&mut self.samples);
        samples.clear();
        samples.resize(max_samples, 0);
        let ergebnis = self.decoder().and_then(|dec| {
            dec.decode(Some(compressed), &mut samples, false)
                .map_err(|e| AudioError::CodecFehler(e.to_string()))
        });

        let ergebnis = ergebnis.and_then(|pro_kanal| {
            let n = pro_kanal * format.channels as usize;
            samples_zu_bytes(&samples[..n.min(samples.len())], out)
        });
        self.samples = samples;
        ergebnis
    }

    fn set_bitrate(&mut self, bits_per_second: i32) -> bool {
        self.parameter.bitrate_bps = bits_per_second;
        match self.encoder.as_mut() {
            Some(enc) => match enc.set_bitrate(Bitrate::BitsPerSecond(bits_per_second)) {
                Ok(()) => true,
                Err(e) => {
                    warn!(bitrate = bits_per_second, fehler = %e, "Bitrate abgelehnt");
                    false
                }
            },
            None => true,
        }
    }

    fn set_vbr(&mut self, vbr: bool) -> bool {
        self.parameter.vbr = vbr;
        match self.encoder.as_mut() {
            Some(enc) => enc.set_vbr(vbr).is_ok(),
            None => true,
        }
    }

    fn set_complexity(&mut self, complexity: u8) -> bool {
        if complexity > 10 {
            return false;
        }
        self.parameter.complexity = complexity;
        match self.encoder.as_mut() {
            Some(enc) => enc.set_complexity(complexity).is_ok(),
            None => true,
        }
    }

    fn reset(&mut self) {
        self.encoder = None;
        self.decoder = None;
    }

    fn dump_state(&self) -> String {
        match self.format {
            Some(f) => format!(
                "opus {}Hz {}ch hint={:?} bitrate={} vbr={} complexity={} encoder={} decoder={}",
                f.sample_rate,
                f.channels,
                self.hint,
                self.parameter.bitrate_bps,
                self.parameter.vbr,
                self.parameter.complexity,
                self.encoder.is_some(),
                self.decoder.is_some()
            ),
            None => "opus (nicht initialisiert)".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Rohes PCM
// ---------------------------------------------------------------------------

/// Identitaets-Codec: Frames werden unveraendert uebertragen
///
/// Fuer Diagnose und Tests, bei denen der Inhalt bitgenau ankommen soll.
#[derive(Debug, Default)]
pub struct RawPcmCodec {
    format: Option<PcmFormat>,
}

impl RawPcmCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockCodec for RawPcmCodec {
    fn init(&mut self, sample_rate: u32, channels: u16, _hint: CodecHint) -> AudioResult<()> {
        let format = PcmFormat::new(sample_rate, channels);
        format.validieren().map_err(AudioError::Konfiguration)?;
        self.format = Some(format);
        Ok(())
    }

    fn encode(&mut self, pcm_frame: &[u8], out: &mut [u8]) -> AudioResult<usize> {
        let format = self.format.ok_or(AudioError::CodecNichtInitialisiert)?;
        if pcm_frame.len() != format.frame_bytes() {
            return Err(AudioError::Konfiguration(format!(
                "PCM-Frame muss {} Bytes lang sein, war {}",
                format.frame_bytes(),
                pcm_frame.len()
            )));
        }
        kopieren(pcm_frame, out)
    }

    fn decode(&mut self, compressed: &[u8], out: &mut [u8]) -> AudioResult<usize> {
        self.format.ok_or(AudioError::CodecNichtInitialisiert)?;
        if compressed.len() % BYTES_PRO_SAMPLE != 0 {
            return Err(AudioError::CodecFehler(format!(
                "Ungerade Frame-Laenge: {} Bytes",
                compressed.len()
            )));
        }
        kopieren(compressed, out)
    }

    fn set_bitrate(&mut self, _bits_per_second: i32) -> bool {
        false
    }

    fn set_vbr(&mut self, _vbr: bool) -> bool {
        false
    }

    fn set_complexity(&mut self, _complexity: u8) -> bool {
        false
    }

    fn reset(&mut self) {}

    fn dump_state(&self) -> String {
        match self.format {
            Some(f) => format!("pcm {}Hz {}ch", f.sample_rate, f.channels),
            None => "pcm (nicht initialisiert)".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Fabrik
// ---------------------------------------------------------------------------

/// Erzeugt initialisierte Codec-Instanzen fuer Encoder und Decoder
pub trait CodecFactory {
    fn codec_erzeugen(&self, format: PcmFormat, hint: CodecHint) -> AudioResult<Box<dyn BlockCodec>>;

    /// Name des erzeugten Codecs
    fn name(&self) -> &str;
}

/// Waehlt den Codec anhand seines Konfigurationsnamens ("opus" oder "pcm")
#[derive(Debug, Clone)]
pub struct StandardCodecFactory {
    name: String,
}

impl StandardCodecFactory {
    pub fn new(name: &str) -> AudioResult<Self> {
        match name {
            "opus" | "pcm" => Ok(Self {
                name: name.to_string(),
            }),
            andere => Err(AudioError::UnbekannterCodec(andere.to_string())),
        }
    }
}

impl CodecFactory for StandardCodecFactory {
    fn codec_erzeugen(&self, format: PcmFormat, hint: CodecHint) -> AudioResult<Box<dyn BlockCodec>> {
        let mut codec: Box<dyn BlockCodec> = match self.name.as_str() {
            "pcm" => Box::new(RawPcmCodec::new()),
            _ => Box::new(OpusBlockCodec::new()),
        };
        codec.init(format.sample_rate, format.channels, hint)?;
        Ok(codec)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// Konvertierungs-Hilfsfunktionen
// ---------------------------------------------------------------------------

fn opus_rate(rate: u32) -> AudioResult<SampleRate> {
    match rate {
        8000 => Ok(SampleRate::Hz8000),
        12000 => Ok(SampleRate::Hz12000),
        16000 => Ok(SampleRate::Hz16000),
        24000 => Ok(SampleRate::Hz24000),
        48000 => Ok(SampleRate::Hz48000),
        andere => Err(AudioError::Konfiguration(format!(
            "Abtastrate {andere} Hz von Opus nicht unterstuetzt"
        ))),
    }
}

fn opus_channels(channels: u16) -> AudioResult<Channels> {
    match channels {
        1 => Ok(Channels::Mono),
        2 => Ok(Channels::Stereo),
        andere => Err(AudioError::Konfiguration(format!(
            "Kanalanzahl {andere} von Opus nicht unterstuetzt"
        ))),
    }
}

fn opus_application(hint: CodecHint) -> Application {
    match hint {
        CodecHint::Voip => Application::Voip,
        CodecHint::Audio => Application::Audio,
        CodecHint::LowDelay => Application::LowDelay,
    }
}

/// 16-Bit little-endian Bytes -> Samples
pub fn bytes_zu_samples(bytes: &[u8], samples: &mut Vec<i16>) {
    samples.clear();
    samples.extend(
        bytes
            .chunks_exact(BYTES_PRO_SAMPLE)
            .map(|b| i16::from_le_bytes([b[0], b[1]])),
    );
}

/// Samples -> 16-Bit little-endian Bytes
pub fn samples_zu_bytes(samples: &[i16], out: &mut [u8]) -> AudioResult<usize> {
    let benoetigt = samples.len() * BYTES_PRO_SAMPLE;
    if out.len() < benoetigt {
        return Err(AudioError::PufferZuKlein {
            benoetigt,
            verfuegbar: out.len(),
        });
    }
    for (ziel, s) in out.chunks_exact_mut(BYTES_PRO_SAMPLE).zip(samples) {
        ziel.copy_from_slice(&s.to_le_bytes());
    }
    Ok(benoetigt)
}

fn kopieren(quelle: &[u8], out: &mut [u8]) -> AudioResult<usize> {
    if out.len() < quelle.len() {
        return Err(AudioError::PufferZuKlein {
            benoetigt: quelle.len(),
            verfuegbar: out.len(),
        });
    }
    out[..quelle.len()].copy_from_slice(quelle);
    Ok(quelle.len())
}
