//! One-shot conversion.

use ndarray::{ArrayD, ArrayViewD};
use tracing::info;

use crate::converter::ConverterSelector;
use crate::engine::{Engine, NativeEngine};
use crate::error::{check, Result};
use crate::plan::{self, BufferPlan};
use crate::stream::{output_buffer, status_error};

/// Resamples `input` in a single call.
///
/// `input` is `[frames]` for mono or `[frames, channels]`; the output has the
/// same rank. The engine is created, run once with end of input set, and
/// released before returning. With `verbose`, frame counts are logged.
///
/// For chunked input or variable ratios use
/// [`StreamResampler`](crate::StreamResampler) or
/// [`PullResampler`](crate::PullResampler).
///
/// # Example
///
/// ```
/// use giztoy_samplerate::{resample, ConverterKind};
/// use ndarray::Array1;
///
/// let input = Array1::from(vec![0.0f32, 1.0, 2.0, 3.0]).into_dyn();
/// let out = resample(&input.view(), 2.0, ConverterKind::Linear, false).unwrap();
/// assert_eq!(out.shape(), &[8]);
/// ```
pub fn resample(
    input: &ArrayViewD<'_, f32>,
    ratio: f64,
    converter: impl Into<ConverterSelector>,
    verbose: bool,
) -> Result<ArrayD<f32>> {
    resample_with::<NativeEngine>(input, ratio, converter, verbose)
}

/// [`resample`] with an explicit engine.
pub fn resample_with<E: Engine>(
    input: &ArrayViewD<'_, f32>,
    ratio: f64,
    converter: impl Into<ConverterSelector>,
    verbose: bool,
) -> Result<ArrayD<f32>> {
    let kind = converter.into().resolve()?;
    let plan = BufferPlan::new(input, ratio)?;
    let input = plan::row_major(input);
    let samples = plan::samples(&input)?;

    let mut output = output_buffer::<E>(&plan, ratio)?;
    let result = {
        let mut engine = E::create(kind, plan.layout.channels).map_err(status_error::<E>)?;
        engine.process(samples, &mut output, ratio, true)
    };
    check::<E>(result.status)?;
    let output = plan.finish(output, result.frames_generated)?;

    if verbose {
        info!("samplerate: {} input frames used", result.frames_used);
        info!("samplerate: {} output frames generated", result.frames_generated);
    }
    Ok(output)
}
