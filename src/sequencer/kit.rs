// Drum kits - fixed tables mapping the 16 drum slots to MIDI notes
//
// Slot layout: 0 kick, 1 snare, 2 closed hh, 3 open hh, 4-6 low/mid/high tom,
// 7 crash, 8 ride, 9 clap, 10 rimshot, 11 cowbell, 12 clave, 13 maracas,
// 14-15 low/high conga.

/// A 16-entry drum slot -> MIDI note mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrumKit {
    pub name: &'static str,
    pub notes: [u8; 16],
}

pub const DEFAULT_KIT: &str = "gm";

const KITS: &[(&str, DrumKit)] = &[
    (
        "gm",
        DrumKit {
            name: "General MIDI",
            notes: [
                36, 38, 42, 46, 41, 43, 45, 49, 51, 39, 37, 56, 75, 70, 64, 63,
            ],
        },
    ),
    (
        "rd8",
        DrumKit {
            name: "Behringer RD-8",
            // RD-8 snare is note 40, not the GM 38
            notes: [
                36, 40, 42, 46, 45, 48, 50, 49, 51, 39, 37, 56, 75, 70, 64, 63,
            ],
        },
    ),
    (
        "tr8s",
        DrumKit {
            name: "Roland TR-8S",
            notes: [
                36, 38, 42, 46, 41, 43, 45, 49, 51, 39, 37, 56, 75, 70, 62, 63,
            ],
        },
    ),
    (
        "er1",
        DrumKit {
            name: "Korg ER-1",
            notes: [
                36, 38, 42, 46, 40, 41, 43, 49, 45, 39, 37, 56, 75, 70, 64, 63,
            ],
        },
    ),
];

/// Look up a kit by short name, falling back to General MIDI
pub fn get_kit(name: &str) -> DrumKit {
    KITS.iter()
        .find(|(n, _)| *n == name)
        .map(|(_, k)| *k)
        .unwrap_or_else(|| get_kit(DEFAULT_KIT))
}

/// Short names of all available kits
pub fn kit_names() -> Vec<&'static str> {
    KITS.iter().map(|(n, _)| *n).collect()
}
