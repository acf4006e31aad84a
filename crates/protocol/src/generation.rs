//! Generationszaehler der Sprachpakete
//!
//! Der Sender erhoeht die Generation einmal pro Encode-Aufruf (mod 256).
//! Der Empfaenger nutzt sie nur fuer Diagnose: Luecken werden geloggt,
//! aber nicht repariert.

/// Sendeseitiger Zaehler
#[derive(Debug, Default, Clone)]
pub struct GenerationCounter {
    aktuell: u8,
}

impl GenerationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Erhoeht den Zaehler und liefert den neuen Wert (erstes Paket = 1)
    pub fn naechste(&mut self) -> u8 {
        self.aktuell = self.aktuell.wrapping_add(1);
        self.aktuell
    }

    /// Zuletzt vergebene Generation
    pub fn aktuell(&self) -> u8 {
        self.aktuell
    }

    pub fn reset(&mut self) {
        self.aktuell = 0;
    }
}

/// Empfangsseitige Beobachtung der Generationen eines Absenders
#[derive(Debug, Default, Clone)]
pub struct GenerationTracker {
    letzte: Option<u8>,
    verloren: u64,
}

impl GenerationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registriert eine empfangene Generation
    ///
    /// Gibt die Anzahl uebersprungener Generationen zurueck, falls eine
    /// Luecke erkannt wurde. Wiederholungen und das erste Paket liefern `None`.
    pub fn beobachten(&mut self, generation: u8) -> Option<u8> {
        let luecke = match self.letzte {
            None => None,
            Some(letzte) => {
                let abstand = generation.wrapping_sub(letzte);
                if abstand > 1 {
                    Some(abstand - 1)
                } else {
                    None
                }
            }
        };
        self.letzte = Some(generation);
        if let Some(n) = luecke {
            self.verloren += u64::from(n);
        }
        luecke
    }

    /// Summe aller bisher erkannten Luecken
    pub fn verloren(&self) -> u64 {
        self.verloren
    }

    pub fn reset(&mut self) {
        self.letzte = None;
    }
}
