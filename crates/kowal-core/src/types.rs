//! Common types for kowal
//!
//! Sample types, the fixed PCM conversion constants and the gain mapping
//! shared by the control and mixer sides of the engine.

/// Audio sample type used by the mixer (interleaved, in [-1, 1])
pub type Sample = f32;

/// Maximum number of output or input channels the mixer renders
pub const MAX_CHANNELS: usize = 2;

/// Divisor used when converting 16-bit PCM to float
pub const PCM_TO_FLOAT: Sample = 1.0 / 32767.0;

/// Multiplier used when converting float output to 16-bit PCM
pub const FLOAT_TO_PCM: Sample = 32767.0;

/// Smallest pitch the renderer accepts
///
/// Pitch values below this are clamped so resampling never stalls.
/// Pitch within this distance of 1.0 takes the direct copy path.
pub const PITCH_EPSILON: f32 = 0.001;

/// Convert a logarithmic gain control value to linear gain
///
/// The mapping is `linear = log^4`. Existing engine data is authored
/// against it, so it is not a decibel conversion.
#[inline]
pub fn log_gain_to_linear(log_gain: f32) -> f32 {
    let squared = log_gain * log_gain;
    squared * squared
}

/// Convert a float sample in [-1, 1] to 16-bit PCM
#[inline]
pub fn float_to_i16(sample: Sample) -> i16 {
    (sample.clamp(-1.0, 1.0) * FLOAT_TO_PCM) as i16
}

/// A single stereo sample (left and right channels)
///
/// `#[repr(C)]` gives the layout `[left, right]`, so `&[StereoSample]` can be
/// viewed as interleaved `&[f32]` with bytemuck.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StereoSample {
    pub left: Sample,
    pub right: Sample,
}

impl StereoSample {
    #[inline]
    pub fn new(left: Sample, right: Sample) -> Self {
        Self { left, right }
    }

    /// Read one frame from an interleaved buffer with `channels` channels
    ///
    /// Mono frames are duplicated to both sides.
    #[inline]
    pub fn from_frame(frame: &[Sample]) -> Self {
        match frame {
            [mono] => Self::new(*mono, *mono),
            [left, right, ..] => Self::new(*left, *right),
            [] => Self::default(),
        }
    }

    /// Write this sample into an interleaved frame of any width
    ///
    /// Extra channels beyond the second are silenced.
    #[inline]
    pub fn write_frame(&self, frame: &mut [Sample]) {
        match frame.len() {
            0 => {}
            1 => frame[0] = 0.5 * (self.left + self.right),
            _ => {
                frame[0] = self.left;
                frame[1] = self.right;
                for ch in frame.iter_mut().skip(2) {
                    *ch = 0.0;
                }
            }
        }
    }
}

/// View a stereo slice as interleaved samples `[L, R, L, R, ...]`
#[inline]
pub fn as_interleaved(samples: &[StereoSample]) -> &[Sample] {
    bytemuck::cast_slice(samples)
}

/// Mutable interleaved view of a stereo slice
#[inline]
pub fn as_interleaved_mut(samples: &mut [StereoSample]) -> &mut [Sample] {
    bytemuck::cast_slice_mut(samples)
}
