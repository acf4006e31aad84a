//! FrameEncoder: roher Byte-Strom -> Sprachpaket
//!
//! Zerlegt beliebig grosse PCM-Bloecke in ganze 20ms-Frames, komprimiert
//! sie mit dem `BlockCodec` und verpackt sie im Wire-Format. Bytes, die
//! keinen ganzen Frame mehr ergeben, werden NICHT verbraucht; der Aufrufer
//! stellt sie dem naechsten Aufruf voran.

use bytes::Bytes;
use tracing::{debug, warn};

use crate::codec::{BlockCodec, MAX_KOMPRIMIERTER_FRAME};
use voicelink_core::PcmFormat;
use voicelink_protocol::wire::{header_groesse, PacketFramer, MAX_FRAMES_PRO_PAKET};
use voicelink_protocol::GenerationCounter;

/// Ergebnis eines Encode-Aufrufs
#[derive(Debug, Clone, Default)]
pub struct EncodeErgebnis {
    /// Fertiges Paket; leer wenn kein ganzer Frame vorlag oder der Aufruf fehlschlug
    pub paket: Bytes,
    /// Anzahl der nicht verbrauchten Bytes am Ende der Eingabe
    pub rest: usize,
    /// Anzahl kodierter Frames
    pub frames: usize,
}

/// Zaehler des Encoders
#[derive(Debug, Clone, Default)]
pub struct EncoderStats {
    pub pakete: u64,
    pub frames: u64,
    pub bytes_roh: u64,
    pub bytes_komprimiert: u64,
    pub fehlgeschlagen: u64,
}

/// Zerlegt PCM in Frames und erzeugt Pakete
pub struct FrameEncoder {
    codec: Box<dyn BlockCodec>,
    format: PcmFormat,
    generation: GenerationCounter,
    frame_puffer: Vec<u8>,
    stats: EncoderStats,
}

impl FrameEncoder {
    /// Erwartet einen bereits initialisierten Codec
    pub fn new(codec: Box<dyn BlockCodec>, format: PcmFormat) -> Self {
        Self {
            codec,
            format,
            generation: GenerationCounter::new(),
            frame_puffer: vec![0u8; MAX_KOMPRIMIERTER_FRAME],
            stats: EncoderStats::default(),
        }
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    /// Kodiert alle ganzen Frames aus `roh` (hoechstens 255)
    ///
    /// Das Paket wird nie groesser als `kapazitaet`. Scheitert ein Frame
    /// oder reicht die Kapazitaet nicht, ist das Paket leer.
    pub fn encode(&mut self, roh: &[u8], kapazitaet: usize) -> EncodeErgebnis {
        let frame_bytes = self.format.frame_bytes();
        let frames = (roh.len() / frame_bytes).min(MAX_FRAMES_PRO_PAKET);
        let rest = roh.len() - frames * frame_bytes;

        if frames == 0 {
            return EncodeErgebnis {
                paket: Bytes::new(),
                rest,
                frames: 0,
            };
        }

        let generation = self.generation.naechste();
        match self.paket_zusammensetzen(&roh[..frames * frame_bytes], frames, generation, kapazitaet) {
            Some(paket) => {
                self.stats.pakete += 1;
                self.stats.frames += frames as u64;
                self.stats.bytes_roh += (frames * frame_bytes) as u64;
                self.stats.bytes_komprimiert += paket.len() as u64;
                debug!(
                    frames,
                    rest,
                    bytes = paket.len(),
                    generation,
                    "Paket kodiert"
                );
                EncodeErgebnis {
                    paket,
                    rest,
                    frames,
                }
            }
            None => {
                self.stats.fehlgeschlagen += 1;
                EncodeErgebnis {
                    paket: Bytes::new(),
                    rest,
                    frames: 0,
                }
            }
        }
    }

    fn paket_zusammensetzen(
        &mut self,
        roh: &[u8],
        frames: usize,
        generation: u8,
        kapazitaet: usize,
    ) -> Option<Bytes> {
        let header = header_groesse(frames);
        if header > kapazitaet {
            warn!(header, kapazitaet, "Kapazitaet reicht nicht einmal fuer den Header");
            return None;
        }

        let mut framer = PacketFramer::new(frames as u8, generation, kapazitaet);
        for (index, frame) in roh.chunks_exact(self.format.frame_bytes()).enumerate() {
            let frei = kapazitaet - framer.len();
            let grenze = frei.min(self.frame_puffer.len());
            let n = match self.codec.encode(frame, &mut self.frame_puffer[..grenze]) {
                Ok(n) => n,
                Err(e) => {
                    warn!(frame = index, frei, fehler = %e, "Frame konnte nicht kodiert werden, Paket verworfen");
                    return None;
                }
            };
            if let Err(e) = framer.push_frame(&self.frame_puffer[..n]) {
                warn!(frame = index, fehler = %e, "Frame passt nicht ins Paket, Paket verworfen");
                return None;
            }
        }

        match framer.finish() {
            Ok(paket) => Some(paket),
            Err(e) => {
                warn!(fehler = %e, "Paket unvollstaendig, verworfen");
                None
            }
        }
    }

    /// Generation des zuletzt erzeugten Pakets
    pub fn generation(&self) -> u8 {
        self.generation.aktuell()
    }

    /// Setzt Codec-Zustand und Generationszaehler zurueck
    pub fn reset(&mut self) {
        self.codec.reset();
        self.generation.reset();
    }

    pub fn set_bitrate(&mut self, bits_per_second: i32) -> bool {
        self.codec.set_bitrate(bits_per_second)
    }

    pub fn set_vbr(&mut self, vbr: bool) -> bool {
        self.codec.set_vbr(vbr)
    }

    pub fn set_complexity(&mut self, complexity: u8) -> bool {
        self.codec.set_complexity(complexity)
    }

    pub fn dump_state(&self) -> String {
        format!(
            "{} generation={} pakete={} frames={}",
            self.codec.dump_state(),
            self.generation.aktuell(),
            self.stats.pakete,
            self.stats.frames
        )
    }

    pub fn stats(&self) -> &EncoderStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{OpusBlockCodec, RawPcmCodec};
    use crate::error::{AudioError, AudioResult};
    use voicelink_core::CodecHint;
    use voicelink_protocol::deframe;

    fn pcm_encoder(format: PcmFormat) -> FrameEncoder {
        let mut codec = RawPcmCodec::new();
        codec
            .init(format.sample_rate, format.channels, CodecHint::Voip)
            .unwrap();
        FrameEncoder::new(Box::new(codec), format)
    }

    /// Codec, der ab einem bestimmten Frame fehlschlaegt
    struct BrechenderCodec {
        aufrufe: usize,
        bricht_bei: usize,
    }

    impl BlockCodec for BrechenderCodec {
        fn init(&mut self, _: u32, _: u16, _: CodecHint) -> AudioResult<()> {
            Ok(())
        }
        fn encode(&mut self, _pcm: &[u8], out: &mut [u8]) -> AudioResult<usize> {
            self.aufrufe += 1;
            if self.aufrufe == self.bricht_bei {
                return Err(AudioError::CodecFehler("kaputt".into()));
            }
            out[0] = 1;
            Ok(1)
        }
        fn decode(&mut self, _: &[u8], _: &mut [u8]) -> AudioResult<usize> {
            Ok(0)
        }
        fn set_bitrate(&mut self, _: i32) -> bool {
            false
        }
        fn set_vbr(&mut self, _: bool) -> bool {
            false
        }
        fn set_complexity(&mut self, _: u8) -> bool {
            false
        }
        fn reset(&mut self) {}
        fn dump_state(&self) -> String {
            String::new()
        }
    }

    #[test]
    fn zweieinhalb_frames_stereo() {
        // 16kHz Stereo: 1280 Bytes pro Frame
        let format = PcmFormat::new(16000, 2);
        let mut encoder = pcm_encoder(format);
        let roh = vec![7u8; 1280 * 2 + 640];
        let ergebnis = encoder.encode(&roh, 20_000);
        assert_eq!(ergebnis.frames, 2);
        assert_eq!(ergebnis.rest, 640);
        let paket = deframe(&ergebnis.paket).unwrap();
        assert_eq!(paket.frame_count(), 2);
    }

    #[test]
    fn kein_ganzer_frame_kein_codec_aufruf() {
        let format = PcmFormat::new(16000, 1);
        let mut encoder = FrameEncoder::new(
            Box::new(BrechenderCodec {
                aufrufe: 0,
                bricht_bei: 1,
            }),
            format,
        );
        let ergebnis = encoder.encode(&[0u8; 639], 1000);
        assert!(ergebnis.paket.is_empty());
        assert_eq!(ergebnis.rest, 639);
        assert_eq!(encoder.stats().fehlgeschlagen, 0);
    }

    #[test]
    fn hoechstens_255_frames() {
        let format = PcmFormat::new(8000, 1);
        let mut encoder = FrameEncoder::new(
            Box::new(BrechenderCodec {
                aufrufe: 0,
                bricht_bei: usize::MAX,
            }),
            format,
        );
        let roh = vec![0u8; 320 * 300];
        let ergebnis = encoder.encode(&roh, 2000);
        assert_eq!(ergebnis.frames, 255);
        assert_eq!(ergebnis.rest, 320 * 45);
    }

    #[test]
    fn frame_fehler_verwirft_ganzes_paket() {
        let format = PcmFormat::new(16000, 1);
        let mut encoder = FrameEncoder::new(
            Box::new(BrechenderCodec {
                aufrufe: 0,
                bricht_bei: 2,
            }),
            format,
        );
        let ergebnis = encoder.encode(&[0u8; 640 * 3], 1000);
        assert!(ergebnis.paket.is_empty());
        assert_eq!(ergebnis.rest, 0);
        assert_eq!(encoder.stats().fehlgeschlagen, 1);
    }

    #[test]
    fn zu_kleine_kapazitaet_verwirft_paket() {
        let format = PcmFormat::new(16000, 1);
        let mut encoder = pcm_encoder(format);
        // Header (6) passt, zwei rohe Frames (1280) nicht
        let ergebnis = encoder.encode(&[0u8; 1280], 700);
        assert!(ergebnis.paket.is_empty());
    }

    #[test]
    fn generation_steht_im_header() {
        let format = PcmFormat::new(16000, 1);
        let mut encoder = pcm_encoder(format);
        let erstes = encoder.encode(&[0u8; 640], 2000);
        let zweites = encoder.encode(&[0u8; 640], 2000);
        assert_eq!(deframe(&erstes.paket).unwrap().generation(), 1);
        assert_eq!(deframe(&zweites.paket).unwrap().generation(), 2);
        encoder.reset();
        let drittes = encoder.encode(&[0u8; 640], 2000);
        assert_eq!(deframe(&drittes.paket).unwrap().generation(), 1);
    }

    #[test]
    fn opus_pakete_sind_kleiner_als_pcm() {
        let format = PcmFormat::new(16000, 1);
        let mut codec = OpusBlockCodec::new();
        codec.init(16000, 1, CodecHint::Voip).unwrap();
        let mut encoder = FrameEncoder::new(Box::new(codec), format);
        let roh: Vec<u8> = (0..640 * 5).map(|i| (i % 251) as u8).collect();
        let ergebnis = encoder.encode(&roh, 20_000);
        assert_eq!(ergebnis.frames, 5);
        assert!(ergebnis.paket.len() < roh.len());
        assert_eq!(encoder.stats().frames, 5);
    }
}
