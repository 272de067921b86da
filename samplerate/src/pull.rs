//! Pull-mode resampler driven by a producer callback.
//!
//! The engine decides when it needs input and asks for it through a C-ABI
//! callback. The callback calls the user's producer, validates the block and
//! hands the engine a pointer to it. Nothing may unwind across that boundary,
//! so validation failures and producer panics are parked in a deferred error
//! slot and raised by [`PullResampler::read`] once the engine returns.

use std::any::Any;
use std::ops::{Deref, DerefMut};
use std::os::raw::{c_long, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use ndarray::ArrayD;
use tracing::debug;

use crate::config::PullConfig;
use crate::converter::{ConverterKind, ConverterSelector};
use crate::engine::{Engine, NativeEngine, ProducerCallback, Status};
use crate::error::{check, Error, Result};
use crate::plan::{BufferPlan, ChannelLayout, Rank};
use crate::stream::{output_buffer, status_error};

/// Engine handle presence.
#[derive(Debug)]
enum EngineState<E> {
    Active(E),
    Disposed,
}

/// Resampler that pulls its input from a producer.
///
/// The producer returns the next input block, `[frames]` or
/// `[frames, channels]`, or `None` at end of stream. An empty block also ends
/// the stream for the current read.
///
/// # Example
///
/// ```
/// use giztoy_samplerate::PullResampler;
/// use ndarray::{Array1, ArrayD};
///
/// let mut blocks = vec![Array1::from(vec![0.5f32; 256]).into_dyn()];
/// let producer = move || -> Option<ArrayD<f32>> { blocks.pop() };
///
/// let mut resampler = PullResampler::new(producer, 2.0, "linear", 1).unwrap();
/// let out = resampler.read(128).unwrap();
/// assert_eq!(out.shape(), &[128]);
/// ```
pub struct PullResampler<P, E: Engine = NativeEngine> {
    producer: P,
    ratio: f64,
    kind: ConverterKind,
    channels: usize,
    engine: EngineState<E>,
    deferred: Option<String>,
    last_rank: Option<Rank>,
}

impl<P> PullResampler<P>
where
    P: FnMut() -> Option<ArrayD<f32>>,
{
    /// Creates a pull resampler backed by the bundled engine.
    pub fn new(
        producer: P,
        ratio: f64,
        converter: impl Into<ConverterSelector>,
        channels: usize,
    ) -> Result<Self> {
        Self::with_engine(producer, ratio, converter, channels)
    }

    /// Creates a pull resampler from configuration.
    pub fn from_config(producer: P, config: &PullConfig) -> Result<Self> {
        Self::new(producer, config.ratio, config.converter_kind, config.channels)
    }
}

impl<P, E> PullResampler<P, E>
where
    P: FnMut() -> Option<ArrayD<f32>>,
    E: Engine,
{
    /// Creates a pull resampler backed by engine `E`.
    pub fn with_engine(
        producer: P,
        ratio: f64,
        converter: impl Into<ConverterSelector>,
        channels: usize,
    ) -> Result<Self> {
        let kind = converter.into().resolve()?;
        if channels == 0 {
            return Err(Error::Usage("channel count must be at least 1".into()));
        }
        let engine = create_engine::<P, E>(kind, channels)?;
        Ok(Self {
            producer,
            ratio,
            kind,
            channels,
            engine: EngineState::Active(engine),
            deferred: None,
            last_rank: None,
        })
    }

    /// Converter kind.
    pub fn converter_kind(&self) -> ConverterKind {
        self.kind
    }

    /// Channel count.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Ratio used by subsequent reads.
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Changes the ratio used by subsequent reads.
    ///
    /// The engine ramps towards it; use
    /// [`set_starting_ratio`](Self::set_starting_ratio) for a step change.
    pub fn set_ratio(&mut self, ratio: f64) {
        self.ratio = ratio;
    }

    /// Returns true while an engine handle is held.
    pub fn is_active(&self) -> bool {
        matches!(self.engine, EngineState::Active(_))
    }

    /// Producer error recorded by the most recent read, if any.
    pub fn deferred_error(&self) -> Option<&str> {
        self.deferred.as_deref()
    }

    /// Reads up to `frames` output frames.
    ///
    /// Fewer frames mean the producer is exhausted; an empty result at end of
    /// stream is not an error. A disposed resampler recreates its engine
    /// first, keeping ratio and shape memory.
    pub fn read(&mut self, frames: usize) -> Result<ArrayD<f32>> {
        self.deferred = None;
        self.ensure_active()?;

        let Self {
            producer,
            ratio,
            channels,
            engine,
            deferred,
            last_rank,
            ..
        } = &mut *self;
        let EngineState::Active(engine) = engine else {
            return Err(status_error::<E>(Status::BAD_STATE));
        };
        let channels = *channels;

        let plan = BufferPlan::with_capacity(ChannelLayout::interleaved(channels), frames, frames);
        let mut output = output_buffer::<E>(&plan, *ratio)?;
        let generated = {
            let mut slot = ProducerSlot {
                producer: &mut *producer,
                channels,
                deferred: &mut *deferred,
                last_rank: &mut *last_rank,
                current: None,
            };
            let ctx = &mut slot as *mut ProducerSlot<'_, P> as *mut c_void;
            engine.pull_read(*ratio, &mut output, ctx)
        };

        if let Some(msg) = deferred.as_ref() {
            return Err(Error::Producer(msg.clone()));
        }
        if generated == 0 {
            check::<E>(engine.last_status())?;
        }

        let layout = match (channels, *last_rank) {
            (1, Some(Rank::One)) => ChannelLayout::MONO,
            (channels, _) => ChannelLayout::interleaved(channels),
        };
        BufferPlan::with_capacity(layout, frames, frames).finish(output, generated)
    }

    /// Sets the ratio for subsequent reads and steps the engine to it.
    pub fn set_starting_ratio(&mut self, ratio: f64) -> Result<()> {
        if let EngineState::Active(engine) = &mut self.engine {
            check::<E>(engine.set_ratio(ratio))?;
        }
        self.ratio = ratio;
        Ok(())
    }

    /// Clears filter history.
    ///
    /// The deferred error and shape memory are kept. A disposed resampler has
    /// no history, so this is a no-op there.
    pub fn reset(&mut self) -> Result<()> {
        match &mut self.engine {
            EngineState::Active(engine) => check::<E>(engine.reset()),
            EngineState::Disposed => Ok(()),
        }
    }

    /// Duplicates engine state, ratio, kind and channels.
    ///
    /// The copy starts with no deferred error and no shape memory.
    pub fn try_clone(&self) -> Result<Self>
    where
        P: Clone,
    {
        let engine = match &self.engine {
            EngineState::Active(engine) => {
                EngineState::Active(engine.try_clone().map_err(status_error::<E>)?)
            }
            EngineState::Disposed => EngineState::Disposed,
        };
        Ok(Self {
            producer: self.producer.clone(),
            ratio: self.ratio,
            kind: self.kind,
            channels: self.channels,
            engine,
            deferred: None,
            last_rank: None,
        })
    }

    /// Releases the engine handle. The next read recreates it.
    pub fn dispose(&mut self) {
        if let EngineState::Active(_) = std::mem::replace(&mut self.engine, EngineState::Disposed) {
            debug!(kind = %self.kind, "samplerate: pull engine disposed");
        }
    }

    /// Enters a scope that disposes the engine when the guard drops.
    pub fn scoped(&mut self) -> Scoped<'_, P, E> {
        Scoped { inner: self }
    }

    /// Runs `f` inside a scope; the engine is released however `f` exits.
    pub fn with_scope<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let mut scope = self.scoped();
        f(&mut scope)
    }

    fn ensure_active(&mut self) -> Result<()> {
        if let EngineState::Disposed = self.engine {
            let engine = create_engine::<P, E>(self.kind, self.channels)?;
            self.engine = EngineState::Active(engine);
            debug!(kind = %self.kind, "samplerate: pull engine recreated");
        }
        Ok(())
    }
}

impl<P, E: Engine + std::fmt::Debug> std::fmt::Debug for PullResampler<P, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullResampler")
            .field("ratio", &self.ratio)
            .field("kind", &self.kind)
            .field("channels", &self.channels)
            .field("engine", &self.engine)
            .field("deferred", &self.deferred)
            .field("last_rank", &self.last_rank)
            .finish()
    }
}

/// Guard returned by [`PullResampler::scoped`].
///
/// Derefs to the resampler and disposes its engine on drop, including
/// during unwinding.
pub struct Scoped<'a, P, E>
where
    P: FnMut() -> Option<ArrayD<f32>>,
    E: Engine,
{
    inner: &'a mut PullResampler<P, E>,
}

impl<P, E> Deref for Scoped<'_, P, E>
where
    P: FnMut() -> Option<ArrayD<f32>>,
    E: Engine,
{
    type Target = PullResampler<P, E>;

    fn deref(&self) -> &Self::Target {
        self.inner
    }
}

impl<P, E> DerefMut for Scoped<'_, P, E>
where
    P: FnMut() -> Option<ArrayD<f32>>,
    E: Engine,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner
    }
}

impl<P, E> Drop for Scoped<'_, P, E>
where
    P: FnMut() -> Option<ArrayD<f32>>,
    E: Engine,
{
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

fn create_engine<P, E>(kind: ConverterKind, channels: usize) -> Result<E>
where
    P: FnMut() -> Option<ArrayD<f32>>,
    E: Engine,
{
    let callback: ProducerCallback = producer_callback::<P>;
    let engine = E::create_pull(kind, channels, callback).map_err(status_error::<E>)?;
    debug!(%kind, channels, "samplerate: pull engine created");
    Ok(engine)
}

/// Callback context: the pieces of a [`PullResampler`] the callback touches
/// during one read.
struct ProducerSlot<'a, P> {
    producer: &'a mut P,
    channels: usize,
    deferred: &'a mut Option<String>,
    last_rank: &'a mut Option<Rank>,
    /// Block handed to the engine; kept alive until the next refill.
    current: Option<ArrayD<f32>>,
}

impl<P> ProducerSlot<'_, P>
where
    P: FnMut() -> Option<ArrayD<f32>>,
{
    /// Fetches, validates and stores the next block. Returns its frame count.
    fn refill(&mut self) -> usize {
        self.current = None;
        if self.deferred.is_some() {
            return 0;
        }

        let producer = &mut *self.producer;
        let block = match panic::catch_unwind(AssertUnwindSafe(producer)) {
            Ok(Some(block)) => block,
            Ok(None) => return 0,
            Err(payload) => {
                self.defer(format!("producer panicked: {}", panic_message(&*payload)));
                return 0;
            }
        };
        if block.is_empty() {
            return 0;
        }

        let layout = match ChannelLayout::of(block.shape()) {
            Ok(layout) => layout,
            Err(err) => {
                self.defer(err.to_string());
                return 0;
            }
        };
        if layout.channels != self.channels {
            self.defer(format!(
                "invalid number of channels in producer output: expected {}, got {}",
                self.channels, layout.channels
            ));
            return 0;
        }
        *self.last_rank = Some(layout.rank);

        let frames = block.shape()[0];
        let block = if block.is_standard_layout() {
            block
        } else {
            block.as_standard_layout().into_owned()
        };
        self.current = Some(block);
        frames
    }

    /// Frame count reported to the engine.
    ///
    /// A block too long for the callback's return type is dropped and
    /// deferred as a producer error rather than read as end of stream.
    fn block_len(&mut self, frames: usize) -> c_long {
        match c_long::try_from(frames) {
            Ok(len) => len,
            Err(_) => {
                self.current = None;
                self.defer(format!(
                    "producer block of {frames} frames is longer than the engine accepts"
                ));
                0
            }
        }
    }

    fn defer(&mut self, msg: String) {
        debug!(error = %msg, "samplerate: producer error deferred");
        *self.deferred = Some(msg);
    }

    fn data(&self) -> *const f32 {
        self.current
            .as_ref()
            .map_or(ptr::null(), |block| block.as_ptr())
    }
}

/// Engine-facing trampoline into [`ProducerSlot::refill`].
unsafe extern "C" fn producer_callback<P>(ctx: *mut c_void, data: *mut *const f32) -> c_long
where
    P: FnMut() -> Option<ArrayD<f32>>,
{
    if ctx.is_null() || data.is_null() {
        return 0;
    }
    // SAFETY: `ctx` is the `ProducerSlot` that `read` passed to `pull_read`,
    // alive and exclusively borrowed for the duration of that call.
    let slot = unsafe { &mut *(ctx as *mut ProducerSlot<'_, P>) };
    let frames = slot.refill();
    let len = slot.block_len(frames);
    // SAFETY: `data` is a valid out-pointer supplied by the engine.
    unsafe {
        *data = if len == 0 { ptr::null() } else { slot.data() };
    }
    len
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2, Array3};

    fn blocks_producer(
        mut blocks: Vec<ArrayD<f32>>,
    ) -> impl FnMut() -> Option<ArrayD<f32>> + Clone {
        blocks.reverse();
        move || blocks.pop()
    }

    fn mono(frames: usize, value: f32) -> ArrayD<f32> {
        Array1::from(vec![value; frames]).into_dyn()
    }

    #[test]
    fn test_read_mono_rank() {
        let producer = blocks_producer(vec![mono(100, 0.5)]);
        let mut r = PullResampler::new(producer, 1.0, "zero_order_hold", 1).unwrap();
        let out = r.read(40).unwrap();
        assert_eq!(out.shape(), &[40]);
        assert!(out.iter().all(|&x| x == 0.5));
    }

    #[test]
    fn test_read_multichannel_rank() {
        let block = Array2::<f32>::ones((50, 2)).into_dyn();
        let producer = blocks_producer(vec![block]);
        let mut r = PullResampler::new(producer, 1.0, "zero_order_hold", 2).unwrap();
        let out = r.read(20).unwrap();
        assert_eq!(out.shape(), &[20, 2]);
    }

    #[test]
    fn test_mono_rank_two_producer_gives_rank_two() {
        let block = Array2::<f32>::ones((50, 1)).into_dyn();
        let producer = blocks_producer(vec![block]);
        let mut r = PullResampler::new(producer, 1.0, "zero_order_hold", 1).unwrap();
        assert_eq!(r.read(20).unwrap().shape(), &[20, 1]);
    }

    #[test]
    fn test_exhaustion_is_not_an_error() {
        let producer = blocks_producer(vec![mono(100, 1.0)]);
        let mut r = PullResampler::new(producer, 1.0, "zero_order_hold", 1).unwrap();
        let first = r.read(1000).unwrap();
        assert!(first.len() <= 100);
        assert!(!first.is_empty());
        let second = r.read(1000).unwrap();
        assert_eq!(second.len(), 0);
        assert_eq!(second.shape(), &[0]);
    }

    #[test]
    fn test_shape_violation_is_producer_error() {
        let cube = Array3::<f32>::ones((10, 1, 1)).into_dyn();
        let producer = blocks_producer(vec![cube]);
        let mut r = PullResampler::new(producer, 1.0, "linear", 1).unwrap();
        let err = r.read(10).unwrap_err();
        assert!(matches!(err, Error::Producer(_)));
        assert!(r.deferred_error().is_some());
    }

    #[test]
    fn test_channel_violation_is_producer_error() {
        let block = Array2::<f32>::ones((10, 3)).into_dyn();
        let producer = blocks_producer(vec![block]);
        let mut r = PullResampler::new(producer, 1.0, "linear", 2).unwrap();
        let err = r.read(10).unwrap_err();
        match err {
            Error::Producer(msg) => assert!(msg.contains("expected 2, got 3")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_producer_panic_is_deferred() {
        let producer = || -> Option<ArrayD<f32>> { panic!("device unplugged") };
        let mut r = PullResampler::new(producer, 1.0, "linear", 1).unwrap();
        match r.read(10).unwrap_err() {
            Error::Producer(msg) => assert!(msg.contains("device unplugged")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_deferred_error_cleared_on_next_read() {
        let producer = blocks_producer(vec![
            Array3::<f32>::ones((4, 1, 1)).into_dyn(),
            mono(50, 0.25),
        ]);
        let mut r = PullResampler::new(producer, 1.0, "zero_order_hold", 1).unwrap();
        assert!(r.read(10).is_err());
        r.reset().unwrap();
        assert!(r.deferred_error().is_some());
        let out = r.read(10).unwrap();
        assert!(r.deferred_error().is_none());
        assert_eq!(out.len(), 10);
    }

    #[test]
    fn test_empty_block_ends_read() {
        let producer = blocks_producer(vec![mono(0, 0.0), mono(30, 1.0)]);
        let mut r = PullResampler::new(producer, 1.0, "zero_order_hold", 1).unwrap();
        assert_eq!(r.read(10).unwrap().len(), 0);
        assert_eq!(r.read(10).unwrap().len(), 10);
    }

    #[test]
    fn test_ratio_accessors() {
        let producer = blocks_producer(vec![]);
        let mut r = PullResampler::new(producer, 1.5, "linear", 1).unwrap();
        assert_eq!(r.ratio(), 1.5);
        r.set_ratio(2.0);
        assert_eq!(r.ratio(), 2.0);
        r.set_starting_ratio(0.5).unwrap();
        assert_eq!(r.ratio(), 0.5);
        assert!(r.set_starting_ratio(0.0).is_err());
        assert_eq!(r.ratio(), 0.5);
    }

    #[test]
    fn test_bad_ratio_with_no_output_is_conversion_error() {
        let producer = blocks_producer(vec![mono(10, 1.0)]);
        let mut r = PullResampler::new(producer, 0.0, "linear", 1).unwrap();
        let err = r.read(10).unwrap_err();
        assert_eq!(err.status(), Some(Status::BAD_SRC_RATIO.code()));
    }

    #[test]
    fn test_scoped_disposes_and_read_recreates() {
        let producer = blocks_producer(vec![mono(2048, 1.0), mono(2048, 1.0)]);
        let mut r = PullResampler::new(producer, 1.0, "zero_order_hold", 1).unwrap();
        {
            let mut scope = r.scoped();
            assert_eq!(scope.read(10).unwrap().shape(), &[10]);
            assert!(scope.is_active());
        }
        assert!(!r.is_active());
        assert_eq!(r.ratio(), 1.0);

        // Shape memory survives re-creation.
        let out = r.read(10).unwrap();
        assert!(r.is_active());
        assert_eq!(out.shape(), &[10]);
    }

    #[test]
    fn test_with_scope_disposes_on_error() {
        let producer = blocks_producer(vec![Array3::<f32>::ones((2, 1, 1)).into_dyn()]);
        let mut r = PullResampler::new(producer, 1.0, "linear", 1).unwrap();
        let result = r.with_scope(|r| r.read(5));
        assert!(result.is_err());
        assert!(!r.is_active());
    }

    #[test]
    fn test_read_unallocatable_frames_is_conversion_error() {
        let block = Array2::<f32>::ones((10, 2)).into_dyn();
        let producer = blocks_producer(vec![block]);
        let mut r = PullResampler::new(producer, 1.0, "linear", 2).unwrap();
        let err = r.read(usize::MAX).unwrap_err();
        assert_eq!(err.status(), Some(Status::MALLOC_FAILED.code()));
        assert_eq!(r.read(10).unwrap().shape(), &[10, 2]);
    }

    #[test]
    fn test_overlong_block_is_deferred() {
        let mut producer = blocks_producer(vec![]);
        let mut deferred = None;
        let mut last_rank = None;
        let mut slot = ProducerSlot {
            producer: &mut producer,
            channels: 1,
            deferred: &mut deferred,
            last_rank: &mut last_rank,
            current: Some(mono(4, 1.0)),
        };
        assert_eq!(slot.block_len(4), 4);
        assert!(slot.current.is_some());
        assert_eq!(slot.block_len(usize::MAX), 0);
        assert!(slot.current.is_none());
        assert!(deferred.is_some_and(|msg| msg.contains("longer than the engine accepts")));
    }

    #[test]
    fn test_reset_is_idempotent() {
        let sine = |frames: usize, step: f32| {
            Array1::from_iter((0..frames).map(|i| (i as f32 * step).sin())).into_dyn()
        };
        let producer = blocks_producer(vec![
            sine(1500, 0.02),
            sine(1500, 0.03),
            sine(1500, 0.05),
        ]);
        let mut twice = PullResampler::new(producer, 1.5, "sinc_fastest", 1).unwrap();
        assert_eq!(twice.read(500).unwrap().len(), 500);

        let mut once = twice.try_clone().unwrap();
        twice.reset().unwrap();
        twice.reset().unwrap();
        once.reset().unwrap();

        let out_twice = twice.read(4000).unwrap();
        let out_once = once.read(4000).unwrap();
        assert_eq!(out_twice.len(), 4000);
        assert_eq!(out_twice, out_once);
    }

    #[test]
    fn test_reset_on_disposed_is_noop() {
        let producer = blocks_producer(vec![]);
        let mut r = PullResampler::new(producer, 1.0, "linear", 1).unwrap();
        r.dispose();
        r.dispose();
        r.reset().unwrap();
        assert!(!r.is_active());
    }

    #[test]
    fn test_clone_starts_clean() {
        let producer = blocks_producer(vec![
            Array3::<f32>::ones((2, 1, 1)).into_dyn(),
            mono(100, 1.0),
        ]);
        let mut a = PullResampler::new(producer, 1.0, "zero_order_hold", 1).unwrap();
        assert!(a.read(5).is_err());
        let b = a.try_clone().unwrap();
        assert!(b.deferred_error().is_none());
        assert_eq!(b.ratio(), 1.0);
        assert_eq!(b.channels(), 1);
        assert_eq!(b.converter_kind(), ConverterKind::ZeroOrderHold);
        assert!(a.deferred_error().is_some());
    }

    #[test]
    fn test_clone_has_independent_engine() {
        let producer = blocks_producer(vec![mono(100, 1.0)]);
        let mut a = PullResampler::new(producer, 1.0, "zero_order_hold", 1).unwrap();
        assert_eq!(a.read(60).unwrap().len(), 60);
        let mut b = a.try_clone().unwrap();
        // The clone carries the 40 buffered frames; its producer copy is
        // already drained.
        assert_eq!(b.read(100).unwrap().len(), 40);
        assert_eq!(a.read(100).unwrap().len(), 40);
    }
}
