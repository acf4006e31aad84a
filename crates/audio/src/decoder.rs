//! FrameDecoder: Sprachpaket -> roher PCM-Puffer
//!
//! Prueft den Header ueber `deframe` und dekodiert danach jeden Frame an
//! die laufende Schreibposition. Einzelne kaputte Frames tragen 0 Bytes
//! bei, ohne den Rest des Pakets abzubrechen.

use tracing::{debug, warn};

use crate::codec::BlockCodec;
use voicelink_core::PcmFormat;
use voicelink_protocol::wire::{deframe, MAX_FRAMES_PRO_PAKET};
use voicelink_protocol::GenerationTracker;

/// Zaehler des Decoders
#[derive(Debug, Clone, Default)]
pub struct DecoderStats {
    pub pakete: u64,
    pub frames: u64,
    pub frames_fehlgeschlagen: u64,
    pub korrupte_pakete: u64,
    pub generationen_verloren: u64,
    pub bytes_pcm: u64,
}

/// Dekodiert Pakete eines einzelnen Absenders
pub struct FrameDecoder {
    codec: Box<dyn BlockCodec>,
    format: PcmFormat,
    tracker: GenerationTracker,
    stats: DecoderStats,
}

impl FrameDecoder {
    /// Erwartet einen bereits initialisierten Codec
    pub fn new(codec: Box<dyn BlockCodec>, format: PcmFormat) -> Self {
        Self {
            codec,
            format,
            tracker: GenerationTracker::new(),
            stats: DecoderStats::default(),
        }
    }

    /// Puffergroesse, die fuer jedes gueltige Paket ausreicht
    pub fn max_decoded_bytes(&self) -> usize {
        MAX_FRAMES_PRO_PAKET * self.format.frame_bytes()
    }

    /// Dekodiert `paket` nach `out` und liefert die Anzahl geschriebener Bytes
    ///
    /// Ein Paket mit verletztem Header ergibt 0 Bytes. Sobald der naechste
    /// Frame nicht mehr in `out` passt, wird abgebrochen.
    pub fn decode(&mut self, paket: &[u8], out: &mut [u8]) -> usize {
        debug_assert!(!out.is_empty(), "Ausgabepuffer ohne Kapazitaet");

        let deframed = match deframe(paket) {
            Ok(d) => d,
            Err(e) => {
                self.stats.korrupte_pakete += 1;
                warn!(bytes = paket.len(), fehler = %e, "Korruptes Sprachpaket verworfen");
                return 0;
            }
        };
        if deframed.frame_count() == 0 {
            return 0;
        }

        if let Some(verloren) = self.tracker.beobachten(deframed.generation()) {
            self.stats.generationen_verloren += u64::from(verloren);
            debug!(
                verloren,
                generation = deframed.generation(),
                "Luecke in den Generationen"
            );
        }

        let frame_bytes = self.format.frame_bytes();
        let mut cursor = 0usize;
        for (index, frame) in deframed.frames().enumerate() {
            if out.len() - cursor < frame_bytes {
                warn!(
                    frame = index,
                    frames = deframed.frame_count(),
                    kapazitaet = out.len(),
                    "Ausgabepuffer voll, restliche Frames verworfen"
                );
                break;
            }
            match self.codec.decode(frame, &mut out[cursor..]) {
                Ok(n) => {
                    cursor += n;
                    self.stats.frames += 1;
                }
                Err(e) => {
                    self.stats.frames_fehlgeschlagen += 1;
                    warn!(frame = index, fehler = %e, "Frame konnte nicht dekodiert werden");
                }
            }
        }

        self.stats.pakete += 1;
        self.stats.bytes_pcm += cursor as u64;
        cursor
    }

    /// Verwirft Codec-Zustand und Generationsbeobachtung
    pub fn reset(&mut self) {
        self.codec.reset();
        self.tracker.reset();
    }

    pub fn stats(&self) -> &DecoderStats {
        &self.stats
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RawPcmCodec;
    use voicelink_core::CodecHint;
    use voicelink_protocol::paket_bauen;

    fn pcm_decoder(format: PcmFormat) -> FrameDecoder {
        let mut codec = RawPcmCodec::new();
        codec
            .init(format.sample_rate, format.channels, CodecHint::Voip)
            .unwrap();
        FrameDecoder::new(Box::new(codec), format)
    }

    #[test]
    fn frames_werden_hintereinander_geschrieben() {
        let format = PcmFormat::new(8000, 1);
        let mut decoder = pcm_decoder(format);
        let a = vec![1u8; 320];
        let b = vec![2u8; 320];
        let paket = paket_bauen(1, &[&a, &b]).unwrap();

        let mut out = vec![0u8; decoder.max_decoded_bytes()];
        assert_eq!(decoder.decode(&paket, &mut out), 640);
        assert_eq!(&out[..320], &a[..]);
        assert_eq!(&out[320..640], &b[..]);
    }

    #[test]
    fn null_frames_ergibt_null_bytes() {
        let mut decoder = pcm_decoder(PcmFormat::new(8000, 1));
        let mut out = vec![0u8; 1024];
        assert_eq!(decoder.decode(&[0, 0], &mut out), 0);
        assert_eq!(decoder.stats().korrupte_pakete, 0);
    }

    #[test]
    fn header_mit_fuenf_frames_aber_platz_fuer_zwei() {
        let mut decoder = pcm_decoder(PcmFormat::new(8000, 1));
        let paket = [5u8, 0, 1, 0, 2, 0];
        let mut out = vec![0u8; 1024];
        assert_eq!(decoder.decode(&paket, &mut out), 0);
        assert_eq!(decoder.stats().korrupte_pakete, 1);
    }

    #[test]
    fn kaputter_frame_traegt_null_bei() {
        let format = PcmFormat::new(8000, 1);
        let mut decoder = pcm_decoder(format);
        // Mittlerer Frame hat ungerade Laenge
        let paket = paket_bauen(1, &[&[1u8; 320], &[9u8; 3], &[2u8; 320]]).unwrap();
        let mut out = vec![0u8; 4096];
        assert_eq!(decoder.decode(&paket, &mut out), 640);
        assert_eq!(decoder.stats().frames_fehlgeschlagen, 1);
        assert_eq!(out[320], 2);
    }

    #[test]
    fn kapazitaet_begrenzt_ausgabe() {
        let format = PcmFormat::new(8000, 1);
        let mut decoder = pcm_decoder(format);
        let paket = paket_bauen(1, &[&[1u8; 320], &[2u8; 320], &[3u8; 320]]).unwrap();
        let mut out = vec![0u8; 700];
        assert_eq!(decoder.decode(&paket, &mut out), 640);
    }

    #[test]
    fn generationsluecke_wird_gezaehlt() {
        let format = PcmFormat::new(8000, 1);
        let mut decoder = pcm_decoder(format);
        let mut out = vec![0u8; 1024];
        decoder.decode(&paket_bauen(1, &[&[0u8; 320]]).unwrap(), &mut out);
        decoder.decode(&paket_bauen(4, &[&[0u8; 320]]).unwrap(), &mut out);
        assert_eq!(decoder.stats().generationen_verloren, 2);
    }
}
