//! Conversion engine backed by `rubato`.
//!
//! Sinc converters run on [`SincFixedIn`], ZOH and linear on [`FastFixedIn`]
//! with a nearest or linear polynomial. Rubato consumes fixed chunks of
//! [`CHUNK`] frames, so input is buffered until a chunk is complete and
//! output is buffered until the caller has room for it. At end of input the
//! tail is padded with silence and the output trimmed to the frame count the
//! accumulated ratio asks for.
//!
//! Rubato resamplers cannot be duplicated, so [`NativeEngine::try_clone`]
//! rebuilds one from a journal of ratio changes and chunk counts. Only the
//! last chunks carry real audio; older chunks are replayed as silence, which
//! leaves the read position and filter buffer in the same state because
//! neither depends on sample values outside the filter window.

use std::collections::VecDeque;
use std::fmt;
use std::os::raw::c_void;
use std::ptr;

use rubato::{
    FastFixedIn, PolynomialDegree, Resampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};
use tracing::{debug, warn};

use super::{Engine, Processed, ProducerCallback, Status};
use crate::converter::ConverterKind;

const MIN_RATIO: f64 = 1.0 / 256.0;
const MAX_RATIO: f64 = 256.0;

/// Frames per channel handed to rubato in one call.
const CHUNK: usize = 1024;

/// Chunks of real input kept for rebuilding filter state.
const RECENT_CHUNKS: usize = 2;

/// Whether `ratio` is inside the supported range.
fn valid_ratio(ratio: f64) -> bool {
    ratio.is_finite() && (MIN_RATIO..=MAX_RATIO).contains(&ratio)
}

fn sinc_parameters(kind: ConverterKind) -> SincInterpolationParameters {
    match kind {
        ConverterKind::SincBest => SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            oversampling_factor: 512,
            interpolation: SincInterpolationType::Cubic,
            window: WindowFunction::BlackmanHarris2,
        },
        ConverterKind::SincMedium => SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            oversampling_factor: 256,
            interpolation: SincInterpolationType::Cubic,
            window: WindowFunction::BlackmanHarris,
        },
        _ => SincInterpolationParameters {
            sinc_len: 64,
            f_cutoff: 0.9,
            oversampling_factor: 128,
            interpolation: SincInterpolationType::Linear,
            window: WindowFunction::Blackman,
        },
    }
}

/// Output frames to discard at stream start.
///
/// Polynomial output frame `n` sits at input time `(n + 1) / ratio - 4`.
fn lead_in(kind: ConverterKind, ratio: f64) -> usize {
    if kind.is_sinc() {
        0
    } else {
        ((4.0 * ratio).round() as usize).saturating_sub(1)
    }
}

enum Backend {
    Sinc(SincFixedIn<f32>),
    Poly(FastFixedIn<f32>),
}

impl Backend {
    fn new(kind: ConverterKind, channels: usize, ratio: f64) -> Result<Self, Status> {
        // Any ratio in the supported range stays reachable from the start ratio.
        let max_relative = (MAX_RATIO / ratio).max(ratio / MIN_RATIO) * (1.0 + 1e-9);
        let backend = if kind.is_sinc() {
            SincFixedIn::new(ratio, max_relative, sinc_parameters(kind), CHUNK, channels)
                .map(Backend::Sinc)
        } else {
            let degree = match kind {
                ConverterKind::ZeroOrderHold => PolynomialDegree::Nearest,
                _ => PolynomialDegree::Linear,
            };
            FastFixedIn::new(ratio, max_relative, degree, CHUNK, channels).map(Backend::Poly)
        };
        backend.map_err(|err| {
            warn!(%err, "samplerate: rubato construction failed");
            Status::BAD_SRC_RATIO
        })
    }

    fn set_ratio(&mut self, ratio: f64, ramp: bool) -> Result<(), Status> {
        let result = match self {
            Backend::Sinc(r) => r.set_resample_ratio(ratio, ramp),
            Backend::Poly(r) => r.set_resample_ratio(ratio, ramp),
        };
        result.map_err(|err| {
            warn!(%err, "samplerate: ratio rejected");
            Status::BAD_SRC_RATIO
        })
    }

    fn output_frames_next(&self) -> usize {
        match self {
            Backend::Sinc(r) => r.output_frames_next(),
            Backend::Poly(r) => r.output_frames_next(),
        }
    }

    /// Runs one chunk from `planar.input`; returns the frames generated.
    fn process(&mut self, planar: &mut Planar) -> Result<usize, Status> {
        planar.size_output(self.output_frames_next());
        let result = match self {
            Backend::Sinc(r) => r.process_into_buffer(&planar.input, &mut planar.output, None),
            Backend::Poly(r) => r.process_into_buffer(&planar.input, &mut planar.output, None),
        };
        result.map(|(_, generated)| generated).map_err(|err| {
            warn!(%err, "samplerate: rubato process failed");
            Status::BAD_INTERNAL_STATE
        })
    }
}

/// Per-channel scratch buffers for one rubato call.
struct Planar {
    input: Vec<Vec<f32>>,
    output: Vec<Vec<f32>>,
}

impl Planar {
    fn new(channels: usize) -> Self {
        Self {
            input: vec![vec![0.0; CHUNK]; channels],
            output: vec![Vec::new(); channels],
        }
    }

    fn load(&mut self, interleaved: &[f32]) {
        let channels = self.input.len();
        for (frame, samples) in interleaved.chunks_exact(channels).enumerate() {
            for (channel, sample) in samples.iter().enumerate() {
                self.input[channel][frame] = *sample;
            }
        }
    }

    fn silence(&mut self) {
        for channel in &mut self.input {
            channel.fill(0.0);
        }
    }

    fn size_output(&mut self, frames: usize) {
        for channel in &mut self.output {
            channel.resize(frames, 0.0);
        }
    }

    /// Appends output frames `from..to` to `dst`, interleaved.
    fn interleave(&self, from: usize, to: usize, dst: &mut Vec<f32>) {
        dst.reserve((to - from) * self.output.len());
        for frame in from..to {
            for channel in &self.output {
                dst.push(channel[frame]);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Event {
    Chunks(usize),
    Ratio { ratio: f64, ramp: bool },
}

/// What happened to the backend since it was built.
#[derive(Debug, Clone, Default)]
struct Journal {
    start_ratio: f64,
    events: Vec<Event>,
    chunks: usize,
    recent: VecDeque<Vec<f32>>,
}

impl Journal {
    fn new(start_ratio: f64) -> Self {
        Self {
            start_ratio,
            ..Self::default()
        }
    }

    fn record_chunk(&mut self, chunk: Vec<f32>) {
        match self.events.last_mut() {
            Some(Event::Chunks(count)) => *count += 1,
            _ => self.events.push(Event::Chunks(1)),
        }
        self.chunks += 1;
        self.recent.push_back(chunk);
        if self.recent.len() > RECENT_CHUNKS {
            self.recent.pop_front();
        }
    }

    fn record_ratio(&mut self, ratio: f64, ramp: bool) {
        // Ratio changes with no chunk in between collapse: a step overrides
        // everything pending, a ramp only overrides an earlier ramp target.
        while let Some(Event::Ratio { ramp: pending, .. }) = self.events.last() {
            if ramp && !*pending {
                break;
            }
            self.events.pop();
        }
        self.events.push(Event::Ratio { ratio, ramp });
    }

    /// Builds a backend in the state this journal describes.
    fn replay(&self, kind: ConverterKind, channels: usize) -> Result<Backend, Status> {
        let mut backend = Backend::new(kind, channels, self.start_ratio)?;
        let mut planar = Planar::new(channels);
        let silent = self.chunks - self.recent.len();
        let mut index: usize = 0;
        for event in &self.events {
            match *event {
                Event::Ratio { ratio, ramp } => backend.set_ratio(ratio, ramp)?,
                Event::Chunks(count) => {
                    for _ in 0..count {
                        match index.checked_sub(silent) {
                            Some(recent) => planar.load(&self.recent[recent]),
                            None => planar.silence(),
                        }
                        backend.process(&mut planar)?;
                        index += 1;
                    }
                }
            }
        }
        Ok(backend)
    }
}

/// Bundled engine implementing every [`ConverterKind`] on top of `rubato`.
///
/// The rubato resampler is built on the first full chunk, with the ratio in
/// effect at that time. Ratio changes passed to `process` or `pull_read`
/// ramp across the next chunk; [`Engine::set_ratio`] steps.
pub struct NativeEngine {
    kind: ConverterKind,
    channels: usize,
    callback: Option<ProducerCallback>,
    status: Status,
    ratio: Option<f64>,
    backend: Option<Backend>,
    journal: Journal,
    planar: Planar,
    /// Interleaved input short of a full chunk.
    pending: Vec<f32>,
    /// Interleaved output not yet handed out.
    ready: Vec<f32>,
    lead_in: usize,
    /// Output frames owed for the input seen since the stream started.
    out_time: f64,
    /// Output frames appended to `ready` since the stream started.
    produced: usize,
    finished: bool,
}

impl fmt::Debug for NativeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeEngine")
            .field("kind", &self.kind)
            .field("channels", &self.channels)
            .field("ratio", &self.ratio)
            .field("started", &self.backend.is_some())
            .field("chunks", &self.journal.chunks)
            .field("pending_frames", &(self.pending.len() / self.channels))
            .field("ready_frames", &(self.ready.len() / self.channels))
            .field("finished", &self.finished)
            .field("pull_mode", &self.callback.is_some())
            .finish()
    }
}

impl NativeEngine {
    fn new(
        kind: ConverterKind,
        channels: usize,
        callback: Option<ProducerCallback>,
    ) -> Result<Self, Status> {
        if channels < 1 {
            return Err(Status::BAD_CHANNEL_COUNT);
        }
        Ok(Self {
            kind,
            channels,
            callback,
            status: Status::NO_ERROR,
            ratio: None,
            backend: None,
            journal: Journal::default(),
            planar: Planar::new(channels),
            pending: Vec::new(),
            ready: Vec::new(),
            lead_in: 0,
            out_time: 0.0,
            produced: 0,
            finished: false,
        })
    }

    /// Starts a new stream. Undelivered output and the ratio are kept.
    fn restart(&mut self) {
        self.backend = None;
        self.journal = Journal::default();
        self.pending.clear();
        self.lead_in = 0;
        self.out_time = 0.0;
        self.produced = 0;
        self.finished = false;
    }

    fn apply_ratio(&mut self, ratio: f64, ramp: bool) -> Result<(), Status> {
        if ramp && self.ratio == Some(ratio) {
            return Ok(());
        }
        if let Some(backend) = self.backend.as_mut() {
            backend.set_ratio(ratio, ramp)?;
            self.journal.record_ratio(ratio, ramp);
        }
        self.ratio = Some(ratio);
        Ok(())
    }

    fn accept(&mut self, input: &[f32], ratio: f64) {
        if input.is_empty() {
            return;
        }
        if self.finished {
            self.restart();
        }
        self.pending.extend_from_slice(input);
        self.out_time += (input.len() / self.channels) as f64 * ratio;
    }

    fn has_chunk(&self) -> bool {
        self.pending.len() >= CHUNK * self.channels
    }

    /// Feeds one chunk of pending input, padding it with silence if short.
    fn feed_chunk(&mut self) -> Result<(), Status> {
        let len = CHUNK * self.channels;
        if self.backend.is_none() {
            let ratio = self.ratio.unwrap_or(1.0);
            self.backend = Some(Backend::new(self.kind, self.channels, ratio)?);
            self.journal = Journal::new(ratio);
            self.lead_in = lead_in(self.kind, ratio);
            debug!(kind = %self.kind, ratio, "samplerate: rubato resampler built");
        }
        let Some(backend) = self.backend.as_mut() else {
            return Err(Status::BAD_INTERNAL_STATE);
        };
        let mut chunk: Vec<f32> = self.pending.drain(..len.min(self.pending.len())).collect();
        chunk.resize(len, 0.0);
        self.planar.load(&chunk);
        let generated = backend.process(&mut self.planar)?;
        self.journal.record_chunk(chunk);

        let skip = self.lead_in.min(generated);
        self.lead_in -= skip;
        self.planar.interleave(skip, generated, &mut self.ready);
        self.produced += generated - skip;
        Ok(())
    }

    fn feed_chunks(&mut self) -> Result<(), Status> {
        while self.has_chunk() {
            self.feed_chunk()?;
        }
        Ok(())
    }

    /// Drains the input at end of stream and trims the output to length.
    fn flush(&mut self) -> Result<(), Status> {
        if self.finished {
            return Ok(());
        }
        self.feed_chunks()?;
        let expected = self.out_time.round() as usize;
        if !self.pending.is_empty() {
            self.feed_chunk()?;
        }
        while self.backend.is_some() && self.produced < expected {
            self.feed_chunk()?;
        }
        let excess = self.produced.saturating_sub(expected) * self.channels;
        self.ready.truncate(self.ready.len().saturating_sub(excess));
        self.produced = self.produced.min(expected);
        self.finished = true;
        Ok(())
    }

    /// Moves ready frames into `output`; returns the frame count.
    fn deliver(&mut self, output: &mut [f32]) -> usize {
        let len = output.len().min(self.ready.len());
        let len = len - len % self.channels;
        output[..len].copy_from_slice(&self.ready[..len]);
        self.ready.drain(..len);
        len / self.channels
    }

    /// Calls the producer once. Returns false at end of stream.
    fn refill(&mut self, callback: ProducerCallback, ctx: *mut c_void, ratio: f64) -> bool {
        let mut data: *const f32 = ptr::null();
        // SAFETY: the callback contract guarantees `data` points at
        // `frames * channels` samples until the next invocation.
        let frames = unsafe { callback(ctx, &mut data) };
        let frames = match usize::try_from(frames) {
            Ok(frames) if frames > 0 && !data.is_null() => frames,
            _ => return false,
        };
        let block = unsafe { std::slice::from_raw_parts(data, frames * self.channels) };
        self.accept(block, ratio);
        true
    }
}

impl Engine for NativeEngine {
    fn create(kind: ConverterKind, channels: usize) -> Result<Self, Status> {
        Self::new(kind, channels, None)
    }

    fn create_pull(
        kind: ConverterKind,
        channels: usize,
        callback: ProducerCallback,
    ) -> Result<Self, Status> {
        Self::new(kind, channels, Some(callback))
    }

    fn try_clone(&self) -> Result<Self, Status> {
        let backend = match self.backend {
            Some(_) => Some(self.journal.replay(self.kind, self.channels)?),
            None => None,
        };
        Ok(Self {
            kind: self.kind,
            channels: self.channels,
            callback: self.callback,
            status: self.status,
            ratio: self.ratio,
            backend,
            journal: self.journal.clone(),
            planar: Planar::new(self.channels),
            pending: self.pending.clone(),
            ready: self.ready.clone(),
            lead_in: self.lead_in,
            out_time: self.out_time,
            produced: self.produced,
            finished: self.finished,
        })
    }

    fn process(
        &mut self,
        input: &[f32],
        output: &mut [f32],
        ratio: f64,
        end_of_input: bool,
    ) -> Processed {
        if self.callback.is_some() {
            return Processed::failed(Status::BAD_MODE);
        }
        if !valid_ratio(ratio) {
            return Processed::failed(Status::BAD_SRC_RATIO);
        }
        if input.len() % self.channels != 0 || output.len() % self.channels != 0 {
            return Processed::failed(Status::BAD_DATA);
        }
        if let Err(status) = self.apply_ratio(ratio, true) {
            return Processed::failed(status);
        }
        self.accept(input, ratio);
        let converted = if end_of_input {
            self.flush()
        } else {
            self.feed_chunks()
        };
        if let Err(status) = converted {
            return Processed::failed(status);
        }
        Processed {
            frames_used: input.len() / self.channels,
            frames_generated: self.deliver(output),
            status: Status::NO_ERROR,
        }
    }

    fn pull_read(&mut self, ratio: f64, output: &mut [f32], ctx: *mut c_void) -> usize {
        self.status = Status::NO_ERROR;
        let Some(callback) = self.callback else {
            self.status = Status::BAD_MODE;
            return 0;
        };
        if !valid_ratio(ratio) {
            self.status = Status::BAD_SRC_RATIO;
            return 0;
        }
        if let Err(status) = self.apply_ratio(ratio, true) {
            self.status = status;
            return 0;
        }
        let ch = self.channels;
        let capacity = output.len() / ch;
        let mut generated = 0;
        let mut exhausted = false;
        loop {
            generated += self.deliver(&mut output[generated * ch..capacity * ch]);
            if generated == capacity {
                break;
            }
            let step = if self.has_chunk() {
                self.feed_chunk()
            } else if !exhausted {
                exhausted = !self.refill(callback, ctx, ratio);
                Ok(())
            } else if !self.finished {
                self.flush()
            } else {
                break;
            };
            if let Err(status) = step {
                self.status = status;
                break;
            }
        }
        generated
    }

    fn last_status(&self) -> Status {
        self.status
    }

    fn set_ratio(&mut self, ratio: f64) -> Status {
        if !valid_ratio(ratio) {
            return Status::BAD_SRC_RATIO;
        }
        match self.apply_ratio(ratio, false) {
            Ok(()) => Status::NO_ERROR,
            Err(status) => status,
        }
    }

    fn reset(&mut self) -> Status {
        self.restart();
        self.ready.clear();
        self.ratio = None;
        self.status = Status::NO_ERROR;
        Status::NO_ERROR
    }

    fn is_valid_ratio(ratio: f64) -> bool {
        valid_ratio(ratio)
    }
}
