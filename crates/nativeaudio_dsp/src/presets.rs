//! Built-in Reverb Presets

use crate::error::DspError;
use crate::reverb::ReverbSettings;

/// Named reverb preset
pub type Preset = (&'static str, ReverbSettings);

/// Preset used when nothing else is configured
pub const DEFAULT_PRESET: &str = "Stone Corridor";

/// List of built-in presets
pub const REVERB_PRESETS: &[Preset] = &[
    // Long, bright and fairly dense: hard walls, little absorption
    (
        "Stone Corridor",
        ReverbSettings { room_size: 0.82, damping: 0.25, wet_level: 0.35, tone_hz: 7000.0 },
    ),
    (
        "Small Room",
        ReverbSettings { room_size: 0.45, damping: 0.55, wet_level: 0.25, tone_hz: 5000.0 },
    ),
    (
        "Large Hall",
        ReverbSettings { room_size: 0.92, damping: 0.45, wet_level: 0.40, tone_hz: 6000.0 },
    ),
    (
        "Plate",
        ReverbSettings { room_size: 0.70, damping: 0.10, wet_level: 0.30, tone_hz: 9000.0 },
    ),
];

/// Look up a preset by name (case-insensitive)
pub fn find_preset(name: &str) -> Result<ReverbSettings, DspError> {
    REVERB_PRESETS
        .iter()
        .find(|(preset_name, _)| preset_name.eq_ignore_ascii_case(name))
        .map(|(_, settings)| *settings)
        .ok_or_else(|| DspError::UnknownPreset(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_preset_exists() {
        assert!(find_preset(DEFAULT_PRESET).is_ok());
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let a = find_preset("large hall").unwrap();
        let b = find_preset("LARGE HALL").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unknown_preset() {
        assert!(matches!(find_preset("Cathedral"), Err(DspError::UnknownPreset(_))));
    }

    #[test]
    fn test_presets_in_range() {
        for (name, settings) in REVERB_PRESETS {
            assert!((0.0..=1.0).contains(&settings.room_size), "{}", name);
            assert!((0.0..=1.0).contains(&settings.damping), "{}", name);
            assert!((0.0..=1.0).contains(&settings.wet_level), "{}", name);
        }
    }
}
