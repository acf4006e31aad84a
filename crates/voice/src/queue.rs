//! PlaybackQueue – gesperrter Byte-Puffer zwischen Decoder und Audio-Thread
//!
//! Der Tick-Thread haengt dekodiertes PCM an, der Pull-Callback der Senke
//! entnimmt es im Audio-Thread. Die Sperre wird nur fuer das Kopieren
//! gehalten, nie waehrend Encode oder Decode.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::warn;
use voicelink_core::{OverflowPolicy, VoiceError};

/// Ausgang eines `append`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Chunk wurde angehaengt
    Angehaengt,
    /// Queue war voll, Chunk verworfen (DropNewest)
    Verworfen,
    /// Queue wurde geleert und enthaelt nur noch den neuen Chunk (ResetAndReplace)
    Ersetzt,
}

/// FIFO-Byte-Puffer mit fester Obergrenze
#[derive(Debug)]
pub struct PlaybackQueue {
    inner: Mutex<VecDeque<u8>>,
    max_bytes: usize,
    policy: OverflowPolicy,
    ueberlaeufe: AtomicU64,
}

impl PlaybackQueue {
    pub fn neu(max_bytes: usize, policy: OverflowPolicy) -> Self {
        debug_assert!(max_bytes > 0, "Queue ohne Kapazitaet");
        Self {
            inner: Mutex::new(VecDeque::with_capacity(max_bytes)),
            max_bytes,
            policy,
            ueberlaeufe: AtomicU64::new(0),
        }
    }

    /// Haengt einen Chunk an; bei Ueberlauf greift die konfigurierte Policy
    pub fn append(&self, chunk: &[u8]) -> AppendOutcome {
        let mut queue = self.inner.lock();
        let queued = queue.len();
        if queued + chunk.len() <= self.max_bytes {
            queue.extend(chunk);
            return AppendOutcome::Angehaengt;
        }

        self.ueberlaeufe.fetch_add(1, Ordering::Relaxed);
        let fehler = VoiceError::QueueUeberlauf {
            queued,
            incoming: chunk.len(),
            max: self.max_bytes,
        };
        match self.policy {
            OverflowPolicy::DropNewest => {
                drop(queue);
                warn!(fehler = %fehler, "Neuer Chunk verworfen");
                AppendOutcome::Verworfen
            }
            OverflowPolicy::ResetAndReplace => {
                queue.clear();
                let start = chunk.len().saturating_sub(self.max_bytes);
                queue.extend(&chunk[start..]);
                drop(queue);
                warn!(fehler = %fehler, "Queue zurueckgesetzt, nur neuester Chunk behalten");
                AppendOutcome::Ersetzt
            }
        }
    }

    /// Entnimmt genau `n` Bytes, falls so viele gepuffert sind
    pub fn dequeue(&self, n: usize) -> Option<Vec<u8>> {
        let mut queue = self.inner.lock();
        if n == 0 || queue.len() < n {
            return None;
        }
        Some(queue.drain(..n).collect())
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Anzahl bisheriger Ueberlaeufe
    pub fn ueberlaeufe(&self) -> u64 {
        self.ueberlaeufe.load(Ordering::Relaxed)
    }
}
