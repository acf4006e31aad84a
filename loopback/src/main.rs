//! voicelink Loopback – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet den Loopback.
//! Mit `--list-devices` werden nur die Audio-Geraete aufgelistet.

use anyhow::Result;
use voicelink_audio::{get_default_input, get_default_output, list_input_devices, list_output_devices};
use voicelink_core::logging::logging_initialisieren;
use voicelink_core::VoiceConfig;
use voicelink_loopback::Loopback;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var("VOICELINK_CONFIG").unwrap_or_else(|_| "voicelink.toml".into());

    // Konfiguration laden (Standardwerte falls Datei fehlt)
    let config = VoiceConfig::laden(&config_pfad)?;

    logging_initialisieren(&config.logging.level, &config.logging.format);

    if std::env::args().any(|a| a == "--list-devices") {
        return geraete_auflisten();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        backend = %config.capture.backend,
        codec = %config.audio.codec,
        "voicelink Loopback wird initialisiert"
    );

    Loopback::neu(config)?.starten().await
}

fn geraete_auflisten() -> Result<()> {
    let standard_ein = get_default_input().map(|d| d.name);
    let standard_aus = get_default_output().map(|d| d.name);

    println!("Eingabegeraete:");
    for d in list_input_devices()? {
        let markierung = if standard_ein.as_deref() == Some(d.name.as_str()) { "*" } else { " " };
        println!("  {markierung} {} ({} Kanaele, {:?} Hz)", d.name, d.channels, d.sample_rates);
    }
    println!("Ausgabegeraete:");
    for d in list_output_devices()? {
        let markierung = if standard_aus.as_deref() == Some(d.name.as_str()) { "*" } else { " " };
        println!("  {markierung} {} ({} Kanaele, {:?} Hz)", d.name, d.channels, d.sample_rates);
    }
    Ok(())
}
