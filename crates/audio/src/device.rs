//! Audio-Geraete und Backend-Auswahl
//!
//! Listet verfuegbare Ein-/Ausgabegeraete auf und stellt `VoiceBackend`
//! bereit: die zur Laufzeit gewaehlte Fabrik fuer Aufnahmegeraete und
//! Ausgabesenken.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::Device;
use tracing::{debug, info, warn};

use crate::capture::{AudioCaptureDevice, CpalCaptureDevice, NullCaptureDevice};
use crate::error::{AudioError, AudioResult};
use crate::playback::{AudioSink, CpalAudioSink, NullAudioSink};
use voicelink_core::types::UNTERSTUETZTE_ABTASTRATEN;
use voicelink_core::PcmFormat;

/// Repraesentiert ein Audio-Geraet mit seinen Eigenschaften
#[derive(Debug, Clone)]
pub struct AudioDevice {
    /// Anzeigename des Geraets
    pub name: String,
    /// Unterstuetzte Abtastraten (nur die vom Codec unterstuetzten)
    pub sample_rates: Vec<u32>,
    /// Maximale Kanalanzahl
    pub channels: u16,
}

/// Listet alle verfuegbaren Eingabegeraete auf
pub fn list_input_devices() -> AudioResult<Vec<AudioDevice>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

    let mut result = Vec::new();
    for device in devices {
        match device_to_audio_device(&device, Richtung::Eingabe) {
            Ok(ad) => result.push(ad),
            Err(e) => warn!("Eingabegeraet konnte nicht gelesen werden: {}", e),
        }
    }
    debug!("Gefundene Eingabegeraete: {}", result.len());
    Ok(result)
}

/// Listet alle verfuegbaren Ausgabegeraete auf
pub fn list_output_devices() -> AudioResult<Vec<AudioDevice>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

    let mut result = Vec::new();
    for device in devices {
        match device_to_audio_device(&device, Richtung::Ausgabe) {
            Ok(ad) => result.push(ad),
            Err(e) => warn!("Ausgabegeraet konnte nicht gelesen werden: {}", e),
        }
    }
    debug!("Gefundene Ausgabegeraete: {}", result.len());
    Ok(result)
}

/// Gibt das Standard-Eingabegeraet zurueck
pub fn get_default_input() -> Option<AudioDevice> {
    let host = cpal::default_host();
    host.default_input_device()
        .and_then(|d| device_to_audio_device(&d, Richtung::Eingabe).ok())
}

/// Gibt das Standard-Ausgabegeraet zurueck
pub fn get_default_output() -> Option<AudioDevice> {
    let host = cpal::default_host();
    host.default_output_device()
        .and_then(|d| device_to_audio_device(&d, Richtung::Ausgabe).ok())
}

/// Laedt ein cpal-Device anhand des Namens fuer Eingabe
pub fn load_cpal_input_device(name: Option<&str>) -> AudioResult<Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .ok_or(AudioError::KeinStandardEingabegeraet),
        Some(n) => {
            let devices = host
                .input_devices()
                .map_err(|e| AudioError::StreamFehler(e.to_string()))?;
            geraet_nach_name(devices, n)
        }
    }
}

/// Laedt ein cpal-Device anhand des Namens fuer Ausgabe
pub fn load_cpal_output_device(name: Option<&str>) -> AudioResult<Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .ok_or(AudioError::KeinStandardAusgabegeraet),
        Some(n) => {
            let devices = host
                .output_devices()
                .map_err(|e| AudioError::StreamFehler(e.to_string()))?;
            geraet_nach_name(devices, n)
        }
    }
}

fn geraet_nach_name(devices: impl Iterator<Item = Device>, name: &str) -> AudioResult<Device> {
    for device in devices {
        if let Ok(dev_name) = device.name() {
            if dev_name.contains(name) {
                return Ok(device);
            }
        }
    }
    Err(AudioError::GeraetNichtGefunden(name.to_string()))
}

#[derive(Debug, Clone, Copy)]
enum Richtung {
    Eingabe,
    Ausgabe,
}

// Hilfsfunktion: cpal Device -> AudioDevice
fn device_to_audio_device(device: &Device, richtung: Richtung) -> AudioResult<AudioDevice> {
    let name = device
        .name()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

    let bereiche: Vec<(u32, u32, u16)> = match richtung {
        Richtung::Eingabe => device
            .supported_input_configs()
            .map(|cfgs| {
                cfgs.map(|c| (c.min_sample_rate().0, c.max_sample_rate().0, c.channels()))
                    .collect()
            })
            .unwrap_or_default(),
        Richtung::Ausgabe => device
            .supported_output_configs()
            .map(|cfgs| {
                cfgs.map(|c| (c.min_sample_rate().0, c.max_sample_rate().0, c.channels()))
                    .collect()
            })
            .unwrap_or_default(),
    };

    Ok(audio_device_aus_bereichen(name, &bereiche))
}

fn audio_device_aus_bereichen(name: String, bereiche: &[(u32, u32, u16)]) -> AudioDevice {
    let mut sample_rates = Vec::new();
    let mut max_channels = 1u16;
    for &(min, max, channels) in bereiche {
        for rate in UNTERSTUETZTE_ABTASTRATEN {
            if rate >= min && rate <= max && !sample_rates.contains(&rate) {
                sample_rates.push(rate);
            }
        }
        max_channels = max_channels.max(channels);
    }
    sample_rates.sort_unstable();

    AudioDevice {
        name,
        sample_rates,
        channels: max_channels,
    }
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

/// Fabrik fuer Aufnahmegeraete und Ausgabesenken
pub trait VoiceBackend {
    fn name(&self) -> &str;

    fn capture_erzeugen(
        &self,
        format: PcmFormat,
        input_device: Option<&str>,
        puffer_bytes: usize,
    ) -> AudioResult<Box<dyn AudioCaptureDevice>>;

    fn sink_erzeugen(
        &self,
        format: PcmFormat,
        output_device: Option<&str>,
    ) -> AudioResult<Box<dyn AudioSink>>;

    /// Ob ein Eingabegeraet angeschlossen ist
    fn headset_vorhanden(&self) -> bool;
}

/// Hardware-Backend ueber cpal
#[derive(Debug, Default)]
pub struct CpalBackend;

impl VoiceBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn capture_erzeugen(
        &self,
        format: PcmFormat,
        input_device: Option<&str>,
        puffer_bytes: usize,
    ) -> AudioResult<Box<dyn AudioCaptureDevice>> {
        Ok(Box::new(CpalCaptureDevice::new(
            input_device.map(str::to_string),
            format,
            puffer_bytes,
        )))
    }

    fn sink_erzeugen(
        &self,
        format: PcmFormat,
        output_device: Option<&str>,
    ) -> AudioResult<Box<dyn AudioSink>> {
        Ok(Box::new(CpalAudioSink::new(
            output_device.map(str::to_string),
            format,
        )))
    }

    fn headset_vorhanden(&self) -> bool {
        cpal::default_host().default_input_device().is_some()
    }
}

/// Backend ohne Hardware
#[derive(Debug, Default)]
pub struct NullBackend;

impl VoiceBackend for NullBackend {
    fn name(&self) -> &str {
        "null"
    }

    fn capture_erzeugen(
        &self,
        _format: PcmFormat,
        _input_device: Option<&str>,
        _puffer_bytes: usize,
    ) -> AudioResult<Box<dyn AudioCaptureDevice>> {
        Ok(Box::new(NullCaptureDevice::new()))
    }

    fn sink_erzeugen(
        &self,
        _format: PcmFormat,
        _output_device: Option<&str>,
    ) -> AudioResult<Box<dyn AudioSink>> {
        Ok(Box::new(NullAudioSink::new()))
    }

    fn headset_vorhanden(&self) -> bool {
        false
    }
}

/// Waehlt das Backend anhand des Konfigurationsnamens
pub fn backend_waehlen(name: &str) -> AudioResult<Box<dyn VoiceBackend>> {
    let backend: Box<dyn VoiceBackend> = match name {
        "cpal" => Box::new(CpalBackend),
        "null" => Box::new(NullBackend),
        andere => return Err(AudioError::UnbekanntesBackend(andere.to_string())),
    };
    info!(backend = name, "Audio-Backend gewaehlt");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "Benoetigt Audio-Hardware"]
    fn eingabegeraete_auflistbar() {
        let devices = list_input_devices().expect("Liste sollte abrufbar sein");
        println!(
            "Eingabegeraete: {:?}",
            devices.iter().map(|d| &d.name).collect::<Vec<_>>()
        );
    }

    #[test]
    #[ignore = "Benoetigt Audio-Hardware"]
    fn ausgabegeraete_auflistbar() {
        let devices = list_output_devices().expect("Liste sollte abrufbar sein");
        println!(
            "Ausgabegeraete: {:?}",
            devices.iter().map(|d| &d.name).collect::<Vec<_>>()
        );
    }

    #[test]
    fn nur_codec_raten_werden_gemeldet() {
        let dev = audio_device_aus_bereichen(
            "Test Mikrofon".to_string(),
            &[(8000, 48000, 1), (44100, 44100, 2)],
        );
        assert_eq!(dev.sample_rates, vec![8000, 12000, 16000, 24000, 48000]);
        assert_eq!(dev.channels, 2);
    }

    #[test]
    fn backend_nach_name() {
        assert_eq!(backend_waehlen("null").unwrap().name(), "null");
        assert_eq!(backend_waehlen("cpal").unwrap().name(), "cpal");
        assert!(matches!(
            backend_waehlen("asio"),
            Err(AudioError::UnbekanntesBackend(_))
        ));
    }

    #[test]
    fn null_backend_erzeugt_geraete() {
        let backend = NullBackend;
        let format = PcmFormat::default();
        let capture = backend.capture_erzeugen(format, None, 32000).unwrap();
        assert!(!capture.is_capturing());
        let sink = backend.sink_erzeugen(format, None).unwrap();
        assert!(!sink.is_active());
        assert!(!backend.headset_vorhanden());
    }
}
