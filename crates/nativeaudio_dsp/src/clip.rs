//! Bus Clipping Policy
//!
//! Summing several loud sources easily exceeds ±1.0. The mix bus always
//! applies one of these policies before the signal reaches the device:
//!
//! - `HardClamp`: samples outside ±1.0 are clamped to the limit
//! - `SoftKnee`: linear below the threshold, tanh saturation above it,
//!   asymptotically approaching ±1.0
//!
//! Either way the output never exceeds ±1.0 and never changes sign, so a
//! later integer conversion cannot wrap around.

/// How the mix bus keeps samples inside the representable range
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClipPolicy {
    /// Clamp to [-1.0, 1.0]
    HardClamp,
    /// Smooth saturation starting `threshold_db` below full scale
    SoftKnee { threshold_db: f32 },
}

impl Default for ClipPolicy {
    fn default() -> Self {
        ClipPolicy::HardClamp
    }
}

/// Applies a `ClipPolicy` to buffers in place
#[derive(Debug, Clone, Copy)]
pub struct Clipper {
    policy: ClipPolicy,
    /// Linear knee threshold (only meaningful for `SoftKnee`)
    threshold: f32,
}

impl Clipper {
    pub fn new(policy: ClipPolicy) -> Self {
        let threshold = match policy {
            ClipPolicy::HardClamp => 1.0,
            ClipPolicy::SoftKnee { threshold_db } => db_to_linear(threshold_db.min(0.0)),
        };
        Self { policy, threshold }
    }

    pub fn policy(&self) -> ClipPolicy {
        self.policy
    }

    /// Process a single sample
    #[inline]
    pub fn process_sample(&self, sample: f32) -> f32 {
        match self.policy {
            ClipPolicy::HardClamp => sample.clamp(-1.0, 1.0),
            ClipPolicy::SoftKnee { .. } => soft_clip(sample, self.threshold),
        }
    }

    /// Process a buffer in place
    ///
    /// Returns how many samples were outside [-1.0, 1.0] before the policy
    /// was applied.
    ///
    /// # Real-time Safety
    /// No allocations, O(n) time.
    #[inline]
    pub fn process(&self, buffer: &mut [f32]) -> usize {
        let mut over = 0;
        for sample in buffer.iter_mut() {
            if sample.abs() > 1.0 {
                over += 1;
            }
            *sample = self.process_sample(*sample);
        }
        over
    }
}

impl Default for Clipper {
    fn default() -> Self {
        Self::new(ClipPolicy::default())
    }
}

/// Saturating conversion for 16-bit device formats
#[inline]
pub fn to_i16(sample: f32) -> i16 {
    let scaled = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round();
    scaled as i16
}

#[inline]
fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// tanh saturation above `threshold`, unity below
///
/// The excess over the threshold is squashed into the remaining headroom so
/// the curve is continuous at the threshold and approaches ±1.0.
#[inline]
fn soft_clip(sample: f32, threshold: f32) -> f32 {
    let abs_sample = sample.abs();
    if abs_sample <= threshold {
        return sample;
    }

    let headroom = (1.0 - threshold).max(0.001);
    let excess = (abs_sample - threshold) / headroom;
    let out = threshold + headroom * excess.tanh();
    sample.signum() * out.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hard_clamp_limits() {
        let clipper = Clipper::new(ClipPolicy::HardClamp);
        let mut buffer = vec![0.25, -0.25, 1.5, -1.5, 2.0, 1.0];
        let over = clipper.process(&mut buffer);

        assert_eq!(over, 3);
        assert_eq!(buffer, vec![0.25, -0.25, 1.0, -1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_two_full_scale_sources_do_not_wrap() {
        let clipper = Clipper::default();
        let mut bus = vec![1.0 + 1.0, -1.0 - 1.0];
        clipper.process(&mut bus);

        assert_eq!(bus, vec![1.0, -1.0]);
        assert_eq!(to_i16(bus[0]), i16::MAX);
        assert_eq!(to_i16(bus[1]), -i16::MAX);
    }

    #[test]
    fn test_to_i16_saturates() {
        assert_eq!(to_i16(0.0), 0);
        assert_eq!(to_i16(4.0), i16::MAX);
        assert_eq!(to_i16(-4.0), -i16::MAX);
        assert!(to_i16(0.5) > 16000);
    }

    #[test]
    fn test_soft_knee_below_threshold_passthrough() {
        let clipper = Clipper::new(ClipPolicy::SoftKnee { threshold_db: -6.0 });
        assert_eq!(clipper.process_sample(0.25), 0.25);
        assert_eq!(clipper.process_sample(-0.25), -0.25);
    }

    #[test]
    fn test_soft_knee_never_exceeds_one() {
        let clipper = Clipper::new(ClipPolicy::SoftKnee { threshold_db: -3.0 });
        for input in [1.2, 2.0, 10.0, 1000.0, -1.2, -10.0, -1000.0] {
            let output = clipper.process_sample(input);
            assert!(output.abs() <= 1.0, "{} -> {}", input, output);
            assert_eq!(output.signum(), input.signum());
        }
    }

    #[test]
    fn test_soft_knee_continuous_at_threshold() {
        let clipper = Clipper::new(ClipPolicy::SoftKnee { threshold_db: -3.0 });
        let threshold = db_to_linear(-3.0);
        let below = clipper.process_sample(threshold - 0.001);
        let above = clipper.process_sample(threshold + 0.001);
        assert!((above - below).abs() < 0.01);
    }
}
