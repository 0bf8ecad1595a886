//! Gain and Stereo Position Units
//!
//! Volume is expressed in millibel (1/100 dB, 0 = unity) and stereo
//! position in permille (-1000 = hard left, 0 = center, 1000 = hard right).

/// Volume level treated as silence
pub const MILLIBEL_MIN: i32 = -32768;

/// Highest volume level a player accepts (unity gain)
pub const MAX_VOLUME_MILLIBEL: i32 = 0;

/// Stereo position range limit in permille
pub const PERMILLE_MAX: i32 = 1000;

/// Clamp a requested volume level into the accepted range
#[inline]
pub fn clamp_millibel(millibel: i32) -> i32 {
    millibel.clamp(MILLIBEL_MIN, MAX_VOLUME_MILLIBEL)
}

/// Convert millibel to linear amplitude
///
/// Formula: amplitude = 10^(mB / 2000). `MILLIBEL_MIN` and below are silent.
#[inline]
pub fn millibel_to_amplitude(millibel: i32) -> f32 {
    if millibel <= MILLIBEL_MIN {
        return 0.0;
    }
    10.0_f32.powf(millibel as f32 / 2000.0)
}

/// Per-side gains derived from a stereo position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoGains {
    pub left: f32,
    pub right: f32,
}

impl StereoGains {
    pub const UNITY: StereoGains = StereoGains {
        left: 1.0,
        right: 1.0,
    };

    /// Balance law: the side the position moves toward stays at unity,
    /// the opposite side attenuates linearly to zero at the extreme.
    pub fn from_permille(permille: i32) -> Self {
        let p = permille.clamp(-PERMILLE_MAX, PERMILLE_MAX) as f32 / PERMILLE_MAX as f32;
        Self {
            left: (1.0 - p).min(1.0),
            right: (1.0 + p).min(1.0),
        }
    }
}

impl Default for StereoGains {
    fn default() -> Self {
        Self::UNITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unity_and_silence() {
        assert_eq!(millibel_to_amplitude(0), 1.0);
        assert_eq!(millibel_to_amplitude(MILLIBEL_MIN), 0.0);
        assert_eq!(millibel_to_amplitude(i32::MIN), 0.0);
    }

    #[test]
    fn test_minus_six_db() {
        // -600 mB = -6 dB ≈ 0.501
        let amp = millibel_to_amplitude(-600);
        assert!((amp - 0.501).abs() < 0.001);
    }

    #[test]
    fn test_amplitude_monotonic() {
        let mut last = 0.0;
        for mb in (-5000..=0).step_by(50) {
            let amp = millibel_to_amplitude(mb);
            assert!(amp > last);
            last = amp;
        }
    }

    #[test]
    fn test_clamp_millibel() {
        assert_eq!(clamp_millibel(500), 0);
        assert_eq!(clamp_millibel(-40000), MILLIBEL_MIN);
        assert_eq!(clamp_millibel(-2500), -2500);
    }

    #[test]
    fn test_pan_center_is_unity() {
        assert_eq!(StereoGains::from_permille(0), StereoGains::UNITY);
    }

    #[test]
    fn test_pan_extremes() {
        let left = StereoGains::from_permille(-1000);
        assert_eq!((left.left, left.right), (1.0, 0.0));

        let right = StereoGains::from_permille(1000);
        assert_eq!((right.left, right.right), (0.0, 1.0));

        // Out-of-range positions clamp to the extremes
        assert_eq!(StereoGains::from_permille(5000), right);
    }

    #[test]
    fn test_pan_half_right() {
        let gains = StereoGains::from_permille(500);
        assert!((gains.left - 0.5).abs() < 1e-6);
        assert_eq!(gains.right, 1.0);
    }
}
