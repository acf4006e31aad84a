//! voicelink-audio – Audio-Backends der Sprach-Pipeline
//!
//! - Block-Codecs (Opus, rohes PCM) hinter `BlockCodec`
//! - FrameEncoder/FrameDecoder: PCM <-> Sprachpaket
//! - Mikrofon-Capture via cpal (`AudioCaptureDevice`)
//! - Lautsprecher-Playback via cpal (`AudioSink`)
//! - Geraete-Enumeration und Backend-Auswahl

pub mod capture;
pub mod codec;
pub mod decoder;
pub mod device;
pub mod encoder;
pub mod error;
pub mod playback;

// Bequeme Re-Exporte der wichtigsten Typen
pub use capture::{AudioCaptureDevice, CaptureRead, CaptureState, CaptureStatus, CpalCaptureDevice, NullCaptureDevice};
pub use codec::{BlockCodec, CodecFactory, OpusBlockCodec, RawPcmCodec, StandardCodecFactory};
pub use decoder::{DecoderStats, FrameDecoder};
pub use device::{
    backend_waehlen, get_default_input, get_default_output, list_input_devices,
    list_output_devices, AudioDevice, CpalBackend, NullBackend, VoiceBackend,
};
pub use encoder::{EncodeErgebnis, EncoderStats, FrameEncoder};
pub use error::{AudioError, AudioResult};
pub use playback::{AudioSink, CpalAudioSink, NullAudioSink, PullCallback};
