//! Integrationstests der Sprach-Pipeline ueber die oeffentliche API
//!
//! Aufnahme und Wiedergabe laufen ueber ein skriptbares Test-Backend, der
//! Audio-Thread wird durch direkte Aufrufe des Pull-Callbacks ersetzt.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use voicelink_audio::{
    AudioCaptureDevice, AudioError, AudioResult, AudioSink, CaptureRead, CaptureState, CaptureStatus,
    CodecFactory, FrameDecoder, FrameEncoder, PullCallback, StandardCodecFactory, VoiceBackend,
};
use voicelink_core::{
    CodecHint, LocalUserIndex, OverflowPolicy, PcmFormat, TalkerId, VoiceConfig, VoiceError,
};
use voicelink_protocol::deframe;
use voicelink_voice::{LocalZustand, TalkerZustand, VoiceEngine};

// ---------------------------------------------------------------------------
// Test-Backend
// ---------------------------------------------------------------------------

type Geteilt<T> = Arc<Mutex<T>>;

#[derive(Default)]
struct Mikrofon {
    daten: VecDeque<u8>,
    aktiv: bool,
}

struct TestCapture(Geteilt<Mikrofon>);

impl AudioCaptureDevice for TestCapture {
    fn start(&mut self) -> AudioResult<()> {
        self.0.lock().aktiv = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.0.lock().aktiv = false;
    }

    fn shutdown(&mut self) {
        let mut m = self.0.lock();
        m.aktiv = false;
        m.daten.clear();
    }

    fn is_capturing(&self) -> bool {
        self.0.lock().aktiv
    }

    fn capture_state(&mut self) -> CaptureStatus {
        let m = self.0.lock();
        let state = if !m.daten.is_empty() {
            CaptureState::Ok
        } else if m.aktiv {
            CaptureState::NoData
        } else {
            CaptureState::NotCapturing
        };
        CaptureStatus::new(state, m.daten.len())
    }

    fn voice_data(&mut self, out: &mut [u8]) -> CaptureRead {
        let n = {
            let mut m = self.0.lock();
            let n = out.len().min(m.daten.len());
            for (ziel, b) in out.iter_mut().zip(m.daten.drain(..n)) {
                *ziel = b;
            }
            n
        };
        CaptureRead {
            bytes: n,
            state: self.capture_state().state,
        }
    }
}

#[derive(Default)]
struct SinkZustand {
    aktiv: bool,
    callback: Option<PullCallback>,
    /// Simulierter Vorrat der Hardware
    vorrat: usize,
    starts: usize,
    /// `play()` scheitert wie ohne Ausgabegeraet
    defekt: bool,
}

struct TestSink(Geteilt<SinkZustand>);

impl AudioSink for TestSink {
    fn play(&mut self) -> AudioResult<()> {
        let mut s = self.0.lock();
        if s.defekt {
            return Err(AudioError::KeinStandardAusgabegeraet);
        }
        s.aktiv = true;
        s.starts += 1;
        Ok(())
    }

    fn stop(&mut self) {
        self.0.lock().aktiv = false;
    }

    fn is_active(&self) -> bool {
        self.0.lock().aktiv
    }

    fn set_pull_callback(&mut self, callback: Option<PullCallback>) {
        self.0.lock().callback = callback;
    }

    fn available_byte_count(&self) -> usize {
        self.0.lock().vorrat
    }
}

#[derive(Default, Clone)]
struct TestBackend {
    mikrofon: Geteilt<Mikrofon>,
    sinks: Geteilt<Vec<Geteilt<SinkZustand>>>,
    defekte_ausgabe: bool,
}

impl TestBackend {
    fn sprechen(&self, bytes: &[u8]) {
        self.mikrofon.lock().daten.extend(bytes);
    }

    fn sink(&self, index: usize) -> Geteilt<SinkZustand> {
        Arc::clone(&self.sinks.lock()[index])
    }

    fn anzahl_sinks(&self) -> usize {
        self.sinks.lock().len()
    }
}

impl VoiceBackend for TestBackend {
    fn name(&self) -> &str {
        "test"
    }

    fn capture_erzeugen(
        &self,
        _format: PcmFormat,
        _input_device: Option<&str>,
        _puffer_bytes: usize,
    ) -> AudioResult<Box<dyn AudioCaptureDevice>> {
        Ok(Box::new(TestCapture(Arc::clone(&self.mikrofon))))
    }

    fn sink_erzeugen(
        &self,
        _format: PcmFormat,
        _output_device: Option<&str>,
    ) -> AudioResult<Box<dyn AudioSink>> {
        let zustand = Arc::new(Mutex::new(SinkZustand {
            defekt: self.defekte_ausgabe,
            ..Default::default()
        }));
        self.sinks.lock().push(Arc::clone(&zustand));
        Ok(Box::new(TestSink(zustand)))
    }

    fn headset_vorhanden(&self) -> bool {
        true
    }
}

/// Ruft den Pull-Callback wie der Audio-Thread auf
fn ziehen(sink: &Geteilt<SinkZustand>, samples: usize) -> Option<Vec<u8>> {
    let mut s = sink.lock();
    let cb = s.callback.as_mut()?;
    cb(samples)
}

// ---------------------------------------------------------------------------
// Hilfsfunktionen
// ---------------------------------------------------------------------------

fn config(sample_rate: u32, channels: u16) -> VoiceConfig {
    let mut config = VoiceConfig::default();
    config.audio.sample_rate = sample_rate;
    config.audio.channels = channels;
    config.audio.codec = "pcm".to_string();
    config
}

fn engine(config: VoiceConfig) -> (VoiceEngine, TestBackend) {
    engine_mit(config, TestBackend::default())
}

fn engine_mit(config: VoiceConfig, backend: TestBackend) -> (VoiceEngine, TestBackend) {
    let codecs = StandardCodecFactory::new(&config.audio.codec).unwrap();
    let engine = VoiceEngine::init(config, Arc::new(backend.clone()), Arc::new(codecs)).unwrap();
    (engine, backend)
}

/// Sinuston als i16 LE, damit Opus echte Daten sieht
fn ton(samples: usize) -> Vec<u8> {
    (0..samples)
        .flat_map(|i| {
            let wert = ((i as f32 * 0.05).sin() * 8000.0) as i16;
            wert.to_le_bytes()
        })
        .collect()
}

/// Rohes PCM-Paket mit `frames` Frames aus einer Encoder-Instanz
fn pcm_paket(format: PcmFormat, frames: usize, fuellwert: u8) -> Vec<u8> {
    let codecs = StandardCodecFactory::new("pcm").unwrap();
    let mut encoder = FrameEncoder::new(codecs.codec_erzeugen(format, CodecHint::Voip).unwrap(), format);
    let roh = vec![fuellwert; frames * format.frame_bytes()];
    encoder.encode(&roh, 1 << 20).paket.to_vec()
}

fn frames_von(paket: &[u8]) -> Vec<Vec<u8>> {
    let sicht = deframe(paket).unwrap();
    sicht.frames().map(|f| f.to_vec()).collect()
}

// ---------------------------------------------------------------------------
// Eigenschaften
// ---------------------------------------------------------------------------

#[test]
fn aufgeteilte_eingabe_liefert_identische_frames() {
    let format = PcmFormat::new(16000, 1);
    let frame = format.frame_bytes();
    let roh = ton(format.samples_per_frame() * 7 / 2);
    let codecs = StandardCodecFactory::new("opus").unwrap();

    let mut geteilt = FrameEncoder::new(codecs.codec_erzeugen(format, CodecHint::Voip).unwrap(), format);
    let erster = geteilt.encode(&roh[..2 * frame], 20000);
    assert_eq!((erster.frames, erster.rest), (2, 0));
    let zweiter = geteilt.encode(&roh[2 * frame..], 20000);
    assert_eq!((zweiter.frames, zweiter.rest), (1, frame / 2));

    let mut am_stueck = FrameEncoder::new(codecs.codec_erzeugen(format, CodecHint::Voip).unwrap(), format);
    let ganz = am_stueck.encode(&roh, 20000);
    assert_eq!((ganz.frames, ganz.rest), (3, frame / 2));

    let mut erwartet = frames_von(&erster.paket);
    erwartet.extend(frames_von(&zweiter.paket));
    assert_eq!(frames_von(&ganz.paket), erwartet);
}

#[test]
fn dekodierte_laenge_entspricht_eingabe() {
    for codec in ["pcm", "opus"] {
        let format = PcmFormat::new(16000, 2);
        let codecs = StandardCodecFactory::new(codec).unwrap();
        let mut encoder = FrameEncoder::new(codecs.codec_erzeugen(format, CodecHint::Voip).unwrap(), format);
        let mut decoder = FrameDecoder::new(codecs.codec_erzeugen(format, CodecHint::Voip).unwrap(), format);

        let roh = ton(format.samples_per_frame() * 2 * 4);
        let ergebnis = encoder.encode(&roh, 20000);
        assert_eq!(ergebnis.rest, 0, "{codec}");

        let mut pcm = vec![0u8; decoder.max_decoded_bytes()];
        assert_eq!(decoder.decode(&ergebnis.paket, &mut pcm), roh.len(), "{codec}");
    }
}

#[test]
fn korrupte_offsets_legen_keinen_sprecher_an() {
    let (mut e, backend) = engine(config(8000, 1));
    let talker = TalkerId::new();

    // Offsets fallen: 320, dann 100
    let mut fallend = vec![2u8, 1, 0x40, 0x01, 100, 0];
    fallend.extend(vec![0u8; 320]);
    // Letzter Offset zeigt hinter das Paketende
    let mut ueberlauf = vec![2u8, 1, 0x40, 0x01, 0x0f, 0x27];
    ueberlauf.extend(vec![0u8; 640]);

    for paket in [&fallend, &ueberlauf] {
        assert!(e.submit_remote_voice_data(talker, paket).is_ok());
    }
    assert_eq!(e.remote().anzahl(), 0);
    assert_eq!(e.remote().verworfene_pakete(), 2);
    assert_eq!(backend.anzahl_sinks(), 0);

    let format = PcmFormat::new(8000, 1);
    let codecs = StandardCodecFactory::new("pcm").unwrap();
    let mut decoder = FrameDecoder::new(codecs.codec_erzeugen(format, CodecHint::Voip).unwrap(), format);
    let mut pcm = vec![0u8; decoder.max_decoded_bytes()];
    assert_eq!(decoder.decode(&fallend, &mut pcm), 0);
    assert_eq!(decoder.decode(&ueberlauf, &mut pcm), 0);
}

#[test]
fn tick_ohne_zeit_aendert_nichts() {
    let (mut e, _backend) = engine(config(8000, 1));
    let talker = TalkerId::new();
    e.tick_talkers(Duration::from_millis(300));
    e.submit_remote_voice_data(talker, &pcm_paket(PcmFormat::new(8000, 1), 2, 3)).unwrap();

    let vorher = {
        let t = e.remote().talker(talker).unwrap();
        (t.zustand(), t.queued_bytes(), t.last_seen(), t.num_frames_starved(), t.resets())
    };
    for _ in 0..100 {
        e.tick_talkers(Duration::ZERO);
    }
    let t = e.remote().talker(talker).unwrap();
    assert_eq!(
        (t.zustand(), t.queued_bytes(), t.last_seen(), t.num_frames_starved(), t.resets()),
        vorher
    );
    assert_eq!(e.remote().jetzt(), Duration::from_millis(300));
}

#[test]
fn stille_setzt_genau_einmal_zurueck() {
    let (mut e, _backend) = engine(config(8000, 1));
    let talker = TalkerId::new();
    let paket = pcm_paket(PcmFormat::new(8000, 1), 2, 3);
    e.submit_remote_voice_data(talker, &paket).unwrap();
    assert_eq!(e.remote_state(talker), Some(TalkerZustand::Buffering));

    for _ in 0..49 {
        e.tick_talkers(Duration::from_millis(20));
    }
    assert_eq!(e.remote_state(talker), Some(TalkerZustand::Buffering));

    e.tick_talkers(Duration::from_millis(20));
    assert_eq!(e.remote_state(talker), Some(TalkerZustand::IdleReset));
    assert_eq!(e.remote().talker(talker).unwrap().resets(), 1);
    assert_eq!(e.remote().talker(talker).unwrap().queued_bytes(), 0);

    for _ in 0..200 {
        e.tick_talkers(Duration::from_millis(20));
    }
    assert_eq!(e.remote().talker(talker).unwrap().resets(), 1);
    assert_eq!(e.remote().anzahl(), 1);

    e.submit_remote_voice_data(talker, &paket).unwrap();
    assert_eq!(e.remote_state(talker), Some(TalkerZustand::Buffering));
}

// ---------------------------------------------------------------------------
// Szenarien
// ---------------------------------------------------------------------------

#[test]
fn paket_ohne_frames_wird_ignoriert() {
    let (mut e, backend) = engine(config(8000, 1));
    let talker = TalkerId::new();
    assert!(e.submit_remote_voice_data(talker, &[0u8, 7]).is_ok());
    assert_eq!(e.remote().anzahl(), 0);
    assert_eq!(backend.anzahl_sinks(), 0);
    assert!(!e.is_remote_player_talking(talker));
}

#[test]
fn ueberlauf_behaelt_nur_neuestes_paket() {
    let mut c = config(8000, 1);
    // 100ms bei 8kHz mono = 1600 Bytes = 5 Frames
    c.playback.remote_queue_ms = 100;
    c.playback.remote_overflow = OverflowPolicy::ResetAndReplace;
    let (mut e, backend) = engine(c);
    let format = PcmFormat::new(8000, 1);
    let talker = TalkerId::new();

    e.submit_remote_voice_data(talker, &pcm_paket(format, 4, 1)).unwrap();
    // Wiedergabe laeuft, die Test-Senke zieht aber nur auf Anforderung
    assert!(backend.sink(0).lock().aktiv);
    e.submit_remote_voice_data(talker, &pcm_paket(format, 2, 2)).unwrap();

    let t = e.remote().talker(talker).unwrap();
    assert_eq!(t.queued_bytes(), 640);
    assert_eq!(t.queue().ueberlaeufe(), 1);
    assert_eq!(e.remote().generate_voice_data(talker, 320), Some(vec![2u8; 640]));
}

#[test]
fn stereo_rest_wird_zurueckgegeben() {
    let format = PcmFormat::new(16000, 2);
    assert_eq!(format.frame_bytes(), 1280);
    let codecs = StandardCodecFactory::new("pcm").unwrap();
    let mut encoder = FrameEncoder::new(codecs.codec_erzeugen(format, CodecHint::Voip).unwrap(), format);

    let ergebnis = encoder.encode(&vec![9u8; 3200], 20000);
    assert_eq!(ergebnis.frames, 2);
    assert_eq!(ergebnis.rest, 640);
    assert_eq!(deframe(&ergebnis.paket).unwrap().frame_count(), 2);
}

#[test]
fn fremder_benutzer_liest_nicht() {
    let (mut e, backend) = engine(config(8000, 1));
    e.register_local_talker(LocalUserIndex(1)).unwrap();
    e.start_local_voice_processing().unwrap();
    backend.sprechen(&[5u8; 640]);

    let mut out = vec![0xAAu8; e.max_packet_bytes()];
    let fehler = e.read_local_voice_data(LocalUserIndex(2), &mut out).unwrap_err();
    assert!(matches!(
        fehler,
        VoiceError::Besitzverletzung {
            angefragt: LocalUserIndex(2),
            besitzer: Some(LocalUserIndex(1)),
        }
    ));
    assert!(out.iter().all(|&b| b == 0xAA));
    assert_eq!(e.get_voice_data_ready_flags(), 1 << 1);
}

#[test]
fn zu_kurzer_header_wird_verworfen() {
    let format = PcmFormat::new(8000, 1);
    // Fuenf Frames angekuendigt, aber nur Platz fuer zwei Offsets
    let paket = [5u8, 1, 10, 0, 20, 0];
    let codecs = StandardCodecFactory::new("pcm").unwrap();
    let mut decoder = FrameDecoder::new(codecs.codec_erzeugen(format, CodecHint::Voip).unwrap(), format);
    let mut pcm = vec![0u8; decoder.max_decoded_bytes()];
    assert_eq!(decoder.decode(&paket, &mut pcm), 0);

    let (mut e, _backend) = engine(config(8000, 1));
    assert!(e.submit_remote_voice_data(TalkerId::new(), &paket).is_ok());
    assert_eq!(e.remote().anzahl(), 0);
}

// ---------------------------------------------------------------------------
// Ende-zu-Ende
// ---------------------------------------------------------------------------

#[test]
fn lokale_aufnahme_wird_remote_abgespielt() {
    let mut c = config(8000, 1);
    c.playback.jitter_fraction = 0.0;
    let (mut e, backend) = engine(c);
    let user = LocalUserIndex(0);
    let talker = TalkerId::new();

    e.register_local_talker(user).unwrap();
    e.start_local_voice_processing().unwrap();
    let mut roh = vec![1u8; 320];
    roh.extend(vec![2u8; 320]);
    roh.extend(vec![3u8; 160]);
    backend.sprechen(&roh);
    assert_eq!(e.get_voice_data_ready_flags(), 1);

    let mut out = vec![0u8; e.max_packet_bytes()];
    let n = e.read_local_voice_data(user, &mut out).unwrap();
    assert!(n > 0);
    assert_eq!(out[1], 1, "erste Generation");
    assert!(e.is_local_player_talking(user));

    e.submit_remote_voice_data(talker, &out[..n]).unwrap();
    assert_eq!(e.remote_state(talker), Some(TalkerZustand::Playing));
    assert!(e.is_remote_player_talking(talker));

    let sink = backend.sink(0);
    assert_eq!(sink.lock().starts, 1);
    assert_eq!(ziehen(&sink, 160), Some(vec![1u8; 320]));
    assert_eq!(ziehen(&sink, 160), Some(vec![2u8; 320]));
    assert_eq!(ziehen(&sink, 160), None);

    // Leere Hardware bei aktiver Senke zaehlt als Hunger
    e.tick_talkers(Duration::from_millis(20));
    e.tick_talkers(Duration::from_millis(20));
    assert_eq!(e.remote().talker(talker).unwrap().num_frames_starved(), 2);
    sink.lock().vorrat = 640;
    e.tick_talkers(Duration::from_millis(20));
    assert_eq!(e.remote().talker(talker).unwrap().num_frames_starved(), 0);

    assert!(e.unregister_remote_talker(talker));
    assert!(!e.unregister_remote_talker(talker));
    assert!(sink.lock().callback.is_none());
    assert!(!sink.lock().aktiv);
}

#[test]
fn stop_leert_rest_und_beginnt_neue_generation() {
    let (mut e, backend) = engine(config(8000, 1));
    let user = LocalUserIndex(0);
    e.register_local_talker(user).unwrap();
    e.start_local_voice_processing().unwrap();

    let mut out = vec![0u8; e.max_packet_bytes()];
    backend.sprechen(&[4u8; 320]);
    e.read_local_voice_data(user, &mut out).unwrap();
    backend.sprechen(&[4u8; 800]);
    e.read_local_voice_data(user, &mut out).unwrap();
    assert_eq!(out[1], 2);

    e.stop_local_voice_processing();
    assert_eq!(e.local_state(), LocalZustand::StoppingDrain);
    backend.sprechen(&[4u8; 320]);
    // 160 Bytes Rest plus 320 neue Bytes ergeben einen Frame
    assert!(e.read_local_voice_data(user, &mut out).unwrap() > 0);
    assert_eq!(e.read_local_voice_data(user, &mut out).unwrap(), 0);
    assert_eq!(e.local_state(), LocalZustand::Idle);

    e.start_local_voice_processing().unwrap();
    backend.sprechen(&[4u8; 320]);
    e.read_local_voice_data(user, &mut out).unwrap();
    assert_eq!(out[1], 1);
}

#[test]
fn loopback_spielt_eigene_stimme() {
    let mut c = config(8000, 1);
    c.playback.local_loopback = true;
    c.playback.jitter_fraction = 0.0;
    let (mut e, backend) = engine(c);
    assert_eq!(backend.anzahl_sinks(), 1);

    let user = LocalUserIndex(0);
    e.register_local_talker(user).unwrap();
    e.start_local_voice_processing().unwrap();
    backend.sprechen(&[6u8; 640]);
    let mut out = vec![0u8; e.max_packet_bytes()];
    e.read_local_voice_data(user, &mut out).unwrap();

    let sink = backend.sink(0);
    assert!(sink.lock().aktiv);
    assert_eq!(ziehen(&sink, 320), Some(vec![6u8; 640]));

    let stats = e.stats();
    assert_eq!(stats.encoder.frames, 2);
    assert_eq!(stats.loopback_decoder.map(|d| d.frames), Some(2));

    e.herunterfahren();
    assert!(sink.lock().callback.is_none());
}

#[test]
fn entfernen_aller_sprecher() {
    let (mut e, backend) = engine(config(8000, 1));
    let format = PcmFormat::new(8000, 1);
    for _ in 0..3 {
        e.submit_remote_voice_data(TalkerId::new(), &pcm_paket(format, 1, 0)).unwrap();
    }
    assert_eq!(e.remote().anzahl(), 3);
    assert_eq!(backend.anzahl_sinks(), 3);
    e.remove_all_remote_talkers();
    assert_eq!(e.remote().anzahl(), 0);
    assert!(backend.sinks.lock().iter().all(|s| s.lock().callback.is_none()));
}

#[test]
fn loopback_ausgabefehler_verliert_keine_pakete() {
    let mut c = config(8000, 1);
    c.playback.local_loopback = true;
    c.playback.jitter_fraction = 0.0;
    let (mut e, backend) = engine_mit(
        c,
        TestBackend {
            defekte_ausgabe: true,
            ..Default::default()
        },
    );
    let user = LocalUserIndex(0);
    e.register_local_talker(user).unwrap();
    e.start_local_voice_processing().unwrap();

    let mut out = vec![0u8; e.max_packet_bytes()];
    for generation in 1..=5u8 {
        backend.sprechen(&[6u8; 640]);
        let n = e.read_local_voice_data(user, &mut out).unwrap();
        assert_eq!(n, 2 + 4 + 640);
        assert_eq!(out[1], generation);
    }
    assert_eq!(e.stats().encoder.pakete, 5);
    assert!(!backend.sink(0).lock().aktiv);
}

#[test]
fn remote_ausgabefehler_nimmt_paket_an() {
    let mut c = config(8000, 1);
    c.playback.jitter_fraction = 0.0;
    let (mut e, backend) = engine_mit(
        c,
        TestBackend {
            defekte_ausgabe: true,
            ..Default::default()
        },
    );
    let talker = TalkerId::new();
    let paket = pcm_paket(PcmFormat::new(8000, 1), 2, 8);

    assert!(e.submit_remote_voice_data(talker, &paket).is_ok());
    assert!(e.submit_remote_voice_data(talker, &paket).is_ok());
    assert_eq!(e.remote_state(talker), Some(TalkerZustand::Buffering));
    assert_eq!(e.remote().talker(talker).unwrap().queued_bytes(), 1280);
    assert_eq!(backend.anzahl_sinks(), 1);
}

#[test]
fn undekodierbares_paket_legt_keinen_sprecher_an() {
    let (mut e, backend) = engine(config(8000, 1));
    let paket = voicelink_protocol::paket_bauen(1, &[&[9u8; 3]]).unwrap();
    assert!(e.submit_remote_voice_data(TalkerId::new(), &paket).is_ok());
    assert_eq!(e.remote().anzahl(), 0);
    assert_eq!(backend.anzahl_sinks(), 0);
}
