//! Wire-Format der Sprachpakete
//!
//! Ein Paket buendelt 0–255 komprimierte Codec-Frames hinter einem
//! kompakten Header. Die Offsets sind kumulative End-Positionen der
//! Frames innerhalb der Nutzdaten (nicht des Pakets).
//!
//! ## Paketformat
//!
//! ```text
//! Offset      Len          Beschreibung
//! ------      ---          -----------
//!  0          1            Frame-Anzahl N
//!  1          1            Generation (mod 256, pro Encode-Aufruf)
//!  2          2*N          Offsets (u16 little-endian, End-Position von Frame i)
//!  2+2N       offsets[N-1] Nutzdaten: Frame 0 .. Frame N-1 hintereinander
//! ```
//!
//! Der Deframer prueft den Header vollstaendig, bevor ein einziges
//! Nutzdaten-Byte angefasst wird. Ein Paket einer fremden oder
//! manipulierten Gegenstelle kann so keine Lesezugriffe ausserhalb
//! des Pakets ausloesen.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use voicelink_core::VoiceError;

pub use voicelink_core::types::MAX_FRAMES_PRO_PAKET;

/// Groesse des festen Header-Teils (Frame-Anzahl + Generation)
pub const HEADER_FEST: usize = 2;

/// Bytes pro Offset-Eintrag
pub const OFFSET_GROESSE: usize = 2;

/// Header-Groesse fuer eine gegebene Frame-Anzahl
pub const fn header_groesse(frame_count: usize) -> usize {
    HEADER_FEST + OFFSET_GROESSE * frame_count
}

// ---------------------------------------------------------------------------
// Fehler
// ---------------------------------------------------------------------------

/// Verletzungen des Paketformats
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("Paket zu kurz fuer den festen Header: {0} Bytes")]
    ZuKurz(usize),

    #[error("Header ({header} Bytes) laenger als Paket ({paket} Bytes)")]
    HeaderZuLang { header: usize, paket: usize },

    #[error("Offset {index} ({offset}) kleiner als Vorgaenger ({vorher})")]
    OffsetsNichtMonoton { index: usize, offset: u16, vorher: u16 },

    #[error("Nutzdaten enden bei {ende}, Paket hat nur {paket} Bytes")]
    NutzdatenUeberlauf { ende: usize, paket: usize },

    #[error("Zu viele Frames fuer ein Paket: {0}")]
    ZuVieleFrames(usize),

    #[error("Nutzdaten ueberschreiten den u16-Offsetbereich: {0} Bytes")]
    OffsetBereich(usize),

    #[error("Header kuendigt {erwartet} Frames an, geschrieben wurden {geschrieben}")]
    Unvollstaendig { erwartet: usize, geschrieben: usize },
}

impl From<WireError> for VoiceError {
    fn from(e: WireError) -> Self {
        VoiceError::KorruptesPaket(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// PacketFramer
// ---------------------------------------------------------------------------

/// Baut ein Paket Frame fuer Frame auf
///
/// Die Frame-Anzahl steht vor dem ersten Frame fest, damit der Header-
/// Bereich reserviert und die Offsets beim Anhaengen eingetragen werden
/// koennen.
#[derive(Debug)]
pub struct PacketFramer {
    buf: BytesMut,
    frame_count: usize,
    geschrieben: usize,
}

impl PacketFramer {
    /// Reserviert den Header fuer `frame_count` Frames
    pub fn new(frame_count: u8, generation: u8, kapazitaet: usize) -> Self {
        let frame_count = frame_count as usize;
        let header = header_groesse(frame_count);
        let mut buf = BytesMut::with_capacity(kapazitaet.max(header));
        buf.put_u8(frame_count as u8);
        buf.put_u8(generation);
        buf.put_bytes(0, OFFSET_GROESSE * frame_count);
        Self {
            buf,
            frame_count,
            geschrieben: 0,
        }
    }

    /// Groesse des Headers in Bytes
    pub fn header_size(&self) -> usize {
        header_groesse(self.frame_count)
    }

    /// Aktuelle Paketgroesse inklusive Header
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Haengt einen komprimierten Frame an und traegt seinen End-Offset ein
    pub fn push_frame(&mut self, frame: &[u8]) -> Result<(), WireError> {
        if self.geschrieben >= self.frame_count {
            return Err(WireError::ZuVieleFrames(self.geschrieben + 1));
        }
        let ende = self.buf.len() - self.header_size() + frame.len();
        let offset = u16::try_from(ende).map_err(|_| WireError::OffsetBereich(ende))?;

        let pos = HEADER_FEST + OFFSET_GROESSE * self.geschrieben;
        self.buf[pos..pos + OFFSET_GROESSE].copy_from_slice(&offset.to_le_bytes());
        self.buf.extend_from_slice(frame);
        self.geschrieben += 1;
        Ok(())
    }

    /// Schliesst das Paket ab; alle angekuendigten Frames muessen geschrieben sein
    pub fn finish(self) -> Result<Bytes, WireError> {
        if self.geschrieben != self.frame_count {
            return Err(WireError::Unvollstaendig {
                erwartet: self.frame_count,
                geschrieben: self.geschrieben,
            });
        }
        Ok(self.buf.freeze())
    }
}

/// Baut ein vollstaendiges Paket aus bereits komprimierten Frames
pub fn paket_bauen(generation: u8, frames: &[&[u8]]) -> Result<Bytes, WireError> {
    if frames.len() > MAX_FRAMES_PRO_PAKET {
        return Err(WireError::ZuVieleFrames(frames.len()));
    }
    let nutzdaten: usize = frames.iter().map(|f| f.len()).sum();
    let mut framer = PacketFramer::new(
        frames.len() as u8,
        generation,
        header_groesse(frames.len()) + nutzdaten,
    );
    for frame in frames {
        framer.push_frame(frame)?;
    }
    framer.finish()
}

// ---------------------------------------------------------------------------
// Deframer
// ---------------------------------------------------------------------------

/// Validierte Sicht auf ein empfangenes Paket
///
/// Wird nur von [`deframe`] erzeugt; alle Frame-Grenzen liegen garantiert
/// innerhalb des Pakets.
#[derive(Debug, Clone, Copy)]
pub struct DeframedPacket<'a> {
    generation: u8,
    offsets: &'a [u8],
    nutzdaten: &'a [u8],
}

impl<'a> DeframedPacket<'a> {
    /// Anzahl der Frames laut Header
    pub fn frame_count(&self) -> usize {
        self.offsets.len() / OFFSET_GROESSE
    }

    /// Generation des Absenders
    pub fn generation(&self) -> u8 {
        self.generation
    }

    /// Groesse des Headers in Bytes
    pub fn header_size(&self) -> usize {
        header_groesse(self.frame_count())
    }

    fn offset(&self, index: usize) -> usize {
        let pos = index * OFFSET_GROESSE;
        u16::from_le_bytes([self.offsets[pos], self.offsets[pos + 1]]) as usize
    }

    /// Komprimierte Bytes von Frame `index`
    pub fn frame(&self, index: usize) -> Option<&'a [u8]> {
        if index >= self.frame_count() {
            return None;
        }
        let start = if index == 0 { 0 } else { self.offset(index - 1) };
        let ende = self.offset(index);
        self.nutzdaten.get(start..ende)
    }

    /// Iteriert ueber alle Frames in Reihenfolge
    pub fn frames(&self) -> impl Iterator<Item = &'a [u8]> + '_ {
        (0..self.frame_count()).filter_map(move |i| self.frame(i))
    }

    /// Laenge der belegten Nutzdaten (End-Offset des letzten Frames)
    pub fn payload_len(&self) -> usize {
        match self.frame_count() {
            0 => 0,
            n => self.offset(n - 1),
        }
    }
}

/// Liest die Frame-Anzahl, ohne den Rest des Pakets zu pruefen
pub fn frame_count_lesen(paket: &[u8]) -> Option<u8> {
    paket.first().copied()
}

/// Prueft den Header und liefert eine sichere Sicht auf die Frames
///
/// Prueft in dieser Reihenfolge:
/// 1. `2 + 2*N <= Paketlaenge`
/// 2. Offsets monoton nicht fallend
/// 3. `Headergroesse + offsets[N-1] <= Paketlaenge`
pub fn deframe(paket: &[u8]) -> Result<DeframedPacket<'_>, WireError> {
    if paket.len() < HEADER_FEST {
        return Err(WireError::ZuKurz(paket.len()));
    }

    let frame_count = paket[0] as usize;
    let generation = paket[1];
    let header = header_groesse(frame_count);
    if header > paket.len() {
        return Err(WireError::HeaderZuLang {
            header,
            paket: paket.len(),
        });
    }

    let offsets = &paket[HEADER_FEST..header];
    let mut vorher = 0u16;
    for (index, chunk) in offsets.chunks_exact(OFFSET_GROESSE).enumerate() {
        let offset = u16::from_le_bytes([chunk[0], chunk[1]]);
        if offset < vorher {
            return Err(WireError::OffsetsNichtMonoton {
                index,
                offset,
                vorher,
            });
        }
        vorher = offset;
    }

    let ende = header + vorher as usize;
    if ende > paket.len() {
        return Err(WireError::NutzdatenUeberlauf {
            ende,
            paket: paket.len(),
        });
    }

    Ok(DeframedPacket {
        generation,
        offsets,
        nutzdaten: &paket[header..],
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
