//! Output buffer planning and shape reconciliation.

use ndarray::{ArrayD, ArrayViewD, CowArray, IxDyn};

use crate::error::{Error, Result};

/// Extra output frames reserved on every conversion.
///
/// Covers what a converter may flush at end of input or emit because of
/// filter latency. Empirical; raise it if the invariant check ever trips.
pub const SAFETY_MARGIN: usize = 10_000;

/// Output capacity in frames for `frames` input frames at `ratio`.
///
/// Saturates at `usize::MAX`; a NaN or negative product counts as zero.
pub fn capacity(frames: usize, ratio: f64) -> usize {
    ((frames as f64 * ratio).ceil() as usize).saturating_add(SAFETY_MARGIN)
}

/// Dimensionality of an audio buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rank {
    /// `[frames]`, single channel.
    One,
    /// `[frames, channels]`, row major.
    Two,
}

/// Channel layout of an audio buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLayout {
    pub channels: usize,
    pub rank: Rank,
}

impl ChannelLayout {
    /// Layout of a rank-1 buffer.
    pub const MONO: ChannelLayout = ChannelLayout {
        channels: 1,
        rank: Rank::One,
    };

    /// Rank-2 layout with the given channel count.
    pub const fn interleaved(channels: usize) -> Self {
        Self {
            channels,
            rank: Rank::Two,
        }
    }

    /// Derives the layout from an array shape.
    pub fn of(shape: &[usize]) -> Result<Self> {
        let layout = match *shape {
            [_] => Self::MONO,
            [_, channels] => Self::interleaved(channels),
            _ => {
                return Err(Error::Usage(format!(
                    "input array should have 1 or 2 dimensions, got {}",
                    shape.len()
                )));
            }
        };
        if layout.channels == 0 {
            return Err(Error::Usage(
                "invalid number of channels (0) in input data".into(),
            ));
        }
        Ok(layout)
    }

    /// Shape of a buffer holding `frames` frames in this layout.
    pub fn shape(&self, frames: usize) -> IxDyn {
        match self.rank {
            Rank::One => IxDyn(&[frames]),
            Rank::Two => IxDyn(&[frames, self.channels]),
        }
    }
}

/// Capacity plan for one conversion call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPlan {
    pub layout: ChannelLayout,
    /// Input frames.
    pub frames: usize,
    /// Output capacity in frames.
    pub capacity: usize,
}

impl BufferPlan {
    /// Plans a conversion of `input` at `ratio`.
    pub fn new(input: &ArrayViewD<'_, f32>, ratio: f64) -> Result<Self> {
        let layout = ChannelLayout::of(input.shape())?;
        let frames = input.shape()[0];
        Ok(Self::with_capacity(layout, frames, capacity(frames, ratio)))
    }

    /// Plans with an explicit capacity.
    pub fn with_capacity(layout: ChannelLayout, frames: usize, capacity: usize) -> Self {
        Self {
            layout,
            frames,
            capacity,
        }
    }

    /// Allocates the zeroed, interleaved output buffer.
    ///
    /// Returns `None` if the sample count overflows or cannot be reserved.
    pub fn allocate(&self) -> Option<Vec<f32>> {
        let len = self.capacity.checked_mul(self.layout.channels)?;
        let mut output = Vec::new();
        output.try_reserve_exact(len).ok()?;
        output.resize(len, 0.0);
        Some(output)
    }

    /// Wraps the first `generated` frames of `output` into an array.
    ///
    /// Fails if the engine claims more frames than were planned.
    pub fn finish(&self, mut output: Vec<f32>, generated: usize) -> Result<ArrayD<f32>> {
        if generated > self.capacity {
            return Err(Error::InternalInvariant {
                generated,
                capacity: self.capacity,
            });
        }
        output.truncate(generated * self.layout.channels);
        Ok(ArrayD::from_shape_vec(self.layout.shape(generated), output)?)
    }
}

/// Returns `input` in row-major order, copying only when needed.
pub(crate) fn row_major<'a>(input: &'a ArrayViewD<'_, f32>) -> CowArray<'a, f32, IxDyn> {
    input.as_standard_layout()
}

/// Borrows the samples of a row-major array.
pub(crate) fn samples<'a>(input: &'a CowArray<'_, f32, IxDyn>) -> Result<&'a [f32]> {
    input
        .as_slice()
        .ok_or_else(|| Error::Usage("input array is not contiguous".into()))
}
