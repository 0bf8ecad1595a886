//! UI Unit Conversion
//!
//! Slider positions (0 - 100) to engine units. Out-of-range positions are a
//! UI contract violation and panic.

/// Lowest volume reachable from the slider
pub const VOLUME_SLIDER_FLOOR_MILLIBEL: i32 = -5000;

/// Volume slider to millibel: 100 is unity (0 mB), 0 is -5000 mB
pub fn volume_slider_to_millibel(progress: i32) -> i32 {
    assert!(
        (0..=100).contains(&progress),
        "volume slider out of range: {}",
        progress
    );
    (100 - progress) * -50
}

/// Pan slider to permille: 0 is -500 (left), 50 is center, 100 is 500 (right)
pub fn pan_slider_to_permille(progress: i32) -> i32 {
    assert!(
        (0..=100).contains(&progress),
        "pan slider out of range: {}",
        progress
    );
    (progress - 50) * 10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_boundaries() {
        assert_eq!(volume_slider_to_millibel(100), 0);
        assert_eq!(volume_slider_to_millibel(0), VOLUME_SLIDER_FLOOR_MILLIBEL);
        assert_eq!(volume_slider_to_millibel(50), -2500);
    }

    #[test]
    fn test_volume_monotonic() {
        for p in 0..100 {
            assert!(volume_slider_to_millibel(p + 1) > volume_slider_to_millibel(p));
        }
    }

    #[test]
    fn test_pan_boundaries() {
        assert_eq!(pan_slider_to_permille(0), -500);
        assert_eq!(pan_slider_to_permille(50), 0);
        assert_eq!(pan_slider_to_permille(100), 500);
    }

    #[test]
    fn test_pan_monotonic() {
        for p in 0..100 {
            assert!(pan_slider_to_permille(p + 1) > pan_slider_to_permille(p));
        }
    }

    #[test]
    #[should_panic(expected = "volume slider out of range")]
    fn test_volume_out_of_range_panics() {
        volume_slider_to_millibel(101);
    }

    #[test]
    #[should_panic(expected = "pan slider out of range")]
    fn test_pan_out_of_range_panics() {
        pan_slider_to_permille(-1);
    }
}
