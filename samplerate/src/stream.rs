//! Block-wise streaming resampler.

use ndarray::{ArrayD, ArrayViewD};
use tracing::debug;

use crate::config::StreamConfig;
use crate::converter::{ConverterKind, ConverterSelector};
use crate::engine::{Engine, NativeEngine, Status};
use crate::error::{check, Error, Result};
use crate::plan::{self, BufferPlan, ChannelLayout};

/// Resampler that keeps engine state across `process` calls.
///
/// Every input block must carry exactly the channel count given at
/// construction. The ratio may change from call to call.
///
/// # Example
///
/// ```
/// use giztoy_samplerate::StreamResampler;
/// use ndarray::Array2;
///
/// let mut resampler = StreamResampler::new("linear", 2).unwrap();
/// let block = Array2::<f32>::zeros((480, 2)).into_dyn();
/// let out = resampler.process(&block.view(), 2.0, false).unwrap();
/// assert_eq!(out.ndim(), 2);
/// assert_eq!(out.shape()[1], 2);
/// ```
#[derive(Debug)]
pub struct StreamResampler<E: Engine = NativeEngine> {
    engine: Option<E>,
    kind: ConverterKind,
    channels: usize,
}

impl StreamResampler {
    /// Creates a resampler backed by the bundled engine.
    pub fn new(converter: impl Into<ConverterSelector>, channels: usize) -> Result<Self> {
        Self::with_engine(converter, channels)
    }

    /// Creates a resampler from configuration.
    pub fn from_config(config: &StreamConfig) -> Result<Self> {
        Self::new(config.converter_kind, config.channels)
    }
}

impl<E: Engine> StreamResampler<E> {
    /// Creates a resampler backed by engine `E`.
    pub fn with_engine(converter: impl Into<ConverterSelector>, channels: usize) -> Result<Self> {
        let kind = converter.into().resolve()?;
        if channels == 0 {
            return Err(Error::Usage("channel count must be at least 1".into()));
        }
        let engine = E::create(kind, channels).map_err(status_error::<E>)?;
        debug!(%kind, channels, "samplerate: stream engine created");
        Ok(Self {
            engine: Some(engine),
            kind,
            channels,
        })
    }

    /// Converter kind. A moved-from resampler reports code 0.
    pub fn converter_kind(&self) -> ConverterKind {
        self.kind
    }

    /// Channel count. A moved-from resampler reports 0.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Returns false once the engine has been moved out.
    pub fn is_active(&self) -> bool {
        self.engine.is_some()
    }

    fn engine_mut(&mut self) -> Result<&mut E> {
        match self.engine.as_mut() {
            Some(engine) => Ok(engine),
            None => Err(missing_engine::<E>()),
        }
    }

    /// Resamples one block.
    ///
    /// The output has the same rank as `input`. Channel count mismatches are
    /// rejected before the engine is touched.
    pub fn process(
        &mut self,
        input: &ArrayViewD<'_, f32>,
        ratio: f64,
        end_of_input: bool,
    ) -> Result<ArrayD<f32>> {
        let layout = ChannelLayout::of(input.shape())?;
        if layout.channels != self.channels {
            return Err(Error::Usage(format!(
                "invalid number of channels in input data: expected {}, got {}",
                self.channels, layout.channels
            )));
        }
        let plan = BufferPlan::new(input, ratio)?;
        let input = plan::row_major(input);
        let samples = plan::samples(&input)?;

        let mut output = output_buffer::<E>(&plan, ratio)?;
        let result = self
            .engine_mut()?
            .process(samples, &mut output, ratio, end_of_input);
        check::<E>(result.status)?;
        plan.finish(output, result.frames_generated)
    }

    /// Sets the engine ratio immediately.
    ///
    /// This is independent of the ratio passed to the next `process` call;
    /// the engine ramps from this value to that one.
    pub fn set_ratio(&mut self, ratio: f64) -> Result<()> {
        let status = self.engine_mut()?.set_ratio(ratio);
        check::<E>(status)
    }

    /// Clears filter history. The engine handle is kept.
    pub fn reset(&mut self) -> Result<()> {
        let status = self.engine_mut()?.reset();
        check::<E>(status)
    }

    /// Duplicates the resampler, including filter history.
    pub fn try_clone(&self) -> Result<Self> {
        let engine = match &self.engine {
            Some(engine) => engine.try_clone().map_err(status_error::<E>)?,
            None => return Err(missing_engine::<E>()),
        };
        Ok(Self {
            engine: Some(engine),
            kind: self.kind,
            channels: self.channels,
        })
    }

    /// Moves the engine into a new resampler.
    ///
    /// `self` is left inert: it has no engine, reports converter code 0 and
    /// zero channels, and can still be dropped.
    pub fn take(&mut self) -> Self {
        let moved = Self {
            engine: self.engine.take(),
            kind: self.kind,
            channels: self.channels,
        };
        self.kind = ConverterKind::SincBest;
        self.channels = 0;
        moved
    }
}

fn missing_engine<E: Engine>() -> Error {
    status_error::<E>(Status::BAD_STATE)
}

/// Allocates the planned output buffer.
///
/// When that is impossible the engine decides whether `ratio` was the
/// problem; otherwise the failure is reported as an allocation failure.
pub(crate) fn output_buffer<E: Engine>(plan: &BufferPlan, ratio: f64) -> Result<Vec<f32>> {
    plan.allocate().ok_or_else(|| {
        let status = if E::is_valid_ratio(ratio) {
            Status::MALLOC_FAILED
        } else {
            Status::BAD_SRC_RATIO
        };
        status_error::<E>(status)
    })
}

/// Converts a failing status into an error.
pub(crate) fn status_error<E: Engine>(status: Status) -> Error {
    match check::<E>(status) {
        Err(err) => err,
        Ok(()) => Error::UnknownStatus(status.code()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2, Array3};

    fn sine(frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| (i as f32 * 0.05).sin())
            .collect()
    }

    #[test]
    fn test_new_validates() {
        assert!(matches!(
            StreamResampler::new("nope", 1),
            Err(Error::Usage(_))
        ));
        assert!(matches!(StreamResampler::new(0, 0), Err(Error::Usage(_))));
        let r = StreamResampler::new(ConverterKind::Linear, 3).unwrap();
        assert_eq!(r.converter_kind(), ConverterKind::Linear);
        assert_eq!(r.channels(), 3);
        assert!(r.is_active());
    }

    #[test]
    fn test_process_preserves_rank() {
        let mut r = StreamResampler::new("zero_order_hold", 1).unwrap();
        let mono = Array1::from(sine(64)).into_dyn();
        let out = r.process(&mono.view(), 1.0, true).unwrap();
        assert_eq!(out.shape(), &[64]);
        assert_eq!(out.as_slice().unwrap(), mono.as_slice().unwrap());

        let mut r = StreamResampler::new("zero_order_hold", 3).unwrap();
        let multi = Array2::<f32>::ones((64, 3)).into_dyn();
        let out = r.process(&multi.view(), 1.0, false).unwrap();
        assert_eq!(out.ndim(), 2);
        assert_eq!(out.shape()[1], 3);
        let out = r.process(&multi.view(), 1.0, true).unwrap();
        assert_eq!(out.shape(), &[128, 3]);
    }

    #[test]
    fn test_process_channel_mismatch() {
        let mut r = StreamResampler::new("linear", 2).unwrap();
        let input = Array2::<f32>::zeros((10, 3)).into_dyn();
        assert!(matches!(
            r.process(&input.view(), 1.0, false),
            Err(Error::Usage(_))
        ));
        let mono = Array1::<f32>::zeros(10).into_dyn();
        assert!(matches!(
            r.process(&mono.view(), 1.0, false),
            Err(Error::Usage(_))
        ));
        let cube = Array3::<f32>::zeros((10, 2, 1)).into_dyn();
        assert!(matches!(
            r.process(&cube.view(), 1.0, false),
            Err(Error::Usage(_))
        ));
    }

    #[test]
    fn test_process_bad_ratio_is_conversion_error() {
        let mut r = StreamResampler::new("linear", 1).unwrap();
        let input = Array1::from(sine(16)).into_dyn();
        let err = r.process(&input.view(), 0.0, false).unwrap_err();
        assert_eq!(err.status(), Some(Status::BAD_SRC_RATIO.code()));
    }

    #[test]
    fn test_process_unplannable_ratio_is_conversion_error() {
        let mut r = StreamResampler::new("linear", 2).unwrap();
        let input = Array2::<f32>::zeros((16, 2)).into_dyn();
        for ratio in [f64::INFINITY, 1e30] {
            let err = r.process(&input.view(), ratio, false).unwrap_err();
            assert!(matches!(err, Error::Conversion { status: 6, .. }), "{err:?}");
        }
        assert!(r.process(&input.view(), 1.0, false).is_ok());
    }

    #[test]
    fn test_set_ratio_and_reset() {
        let mut r = StreamResampler::new("sinc_fastest", 1).unwrap();
        r.set_ratio(2.0).unwrap();
        assert!(r.set_ratio(-2.0).is_err());
        let input = Array1::from(sine(128)).into_dyn();
        r.process(&input.view(), 2.0, false).unwrap();
        r.reset().unwrap();
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut twice = StreamResampler::new("sinc_fastest", 2).unwrap();
        let warmup = Array2::from_shape_vec((3000, 2), sine(6000)).unwrap().into_dyn();
        twice.process(&warmup.view(), 1.5, false).unwrap();

        let mut once = twice.try_clone().unwrap();
        twice.reset().unwrap();
        twice.reset().unwrap();
        once.reset().unwrap();

        let input = Array2::from_shape_vec((2500, 2), sine(5000)).unwrap().into_dyn();
        let out_twice = twice.process(&input.view(), 0.75, true).unwrap();
        let out_once = once.process(&input.view(), 0.75, true).unwrap();
        assert_eq!(out_twice.shape(), &[1875, 2]);
        assert_eq!(out_twice, out_once);
    }

    #[test]
    fn test_total_output_length() {
        let mut r = StreamResampler::new("linear", 1).unwrap();
        let input = sine(1000);
        let mut total = 0;
        for chunk in input.chunks(100) {
            let block = Array1::from(chunk.to_vec()).into_dyn();
            total += r.process(&block.view(), 2.0, false).unwrap().len();
        }
        let empty = Array1::<f32>::zeros(0).into_dyn();
        total += r.process(&empty.view(), 2.0, true).unwrap().len();
        assert_eq!(total, 2000);
    }

    #[test]
    fn test_clone_independent() {
        let mut a = StreamResampler::new("sinc_medium", 1).unwrap();
        let warmup = Array1::from(sine(3000)).into_dyn();
        a.process(&warmup.view(), 1.25, false).unwrap();

        let mut b = a.try_clone().unwrap();
        assert_eq!(b.converter_kind(), ConverterKind::SincMedium);
        assert_eq!(b.channels(), 1);
        let noise = Array1::from(vec![0.7f32; 300]).into_dyn();
        b.process(&noise.view(), 0.5, true).unwrap();

        let mut reference = a.try_clone().unwrap();
        let next = Array1::from(sine(2000)).into_dyn();
        let out_a = a.process(&next.view(), 1.25, false).unwrap();
        let out_ref = reference.process(&next.view(), 1.25, false).unwrap();
        assert!(!out_a.is_empty());
        assert_eq!(out_a, out_ref);
    }

    #[test]
    fn test_take_leaves_inert_source() {
        let mut a = StreamResampler::new("linear", 2).unwrap();
        let mut b = a.take();
        assert!(!a.is_active());
        assert_eq!(a.channels(), 0);
        assert_eq!(a.converter_kind().code(), 0);
        assert_eq!(b.channels(), 2);
        assert_eq!(b.converter_kind(), ConverterKind::Linear);

        let input = Array2::<f32>::zeros((8, 2)).into_dyn();
        assert!(matches!(
            a.process(&input.view(), 1.0, false),
            Err(Error::Usage(_))
        ));
        assert_eq!(
            a.reset().unwrap_err().status(),
            Some(Status::BAD_STATE.code())
        );
        assert!(a.set_ratio(1.0).is_err());
        assert!(a.try_clone().is_err());
        assert!(b.process(&input.view(), 1.0, false).is_ok());
    }

    #[test]
    fn test_from_config() {
        let config = StreamConfig {
            converter_kind: ConverterKind::ZeroOrderHold,
            channels: 2,
        };
        let r = StreamResampler::from_config(&config).unwrap();
        assert_eq!(r.converter_kind(), ConverterKind::ZeroOrderHold);
        assert_eq!(r.channels(), 2);
    }
}
