//! Conversion engine interface.
//!
//! The adapters in this crate never interpolate samples themselves. They
//! drive an [`Engine`], a stateful per-instance converter created for one
//! converter kind and a fixed channel count. [`NativeEngine`] is the bundled
//! implementation; tests and embedders may supply their own.
//!
//! Pull mode crosses a C-ABI boundary: the engine calls a
//! [`ProducerCallback`] whenever it needs more input. Nothing may unwind
//! through that call, so failures on the producer side have to be reported
//! out of band by whoever owns the callback context.

mod native;
mod status;

use std::os::raw::{c_long, c_void};

use crate::converter::ConverterKind;

pub use native::NativeEngine;
pub use status::Status;

/// Producer callback used in pull mode.
///
/// The engine passes back the context it was given in [`Engine::pull_read`]
/// together with a slot for the data pointer. The callback stores the address
/// of the next interleaved input block in `data` and returns its length in
/// frames. Returning zero signals end of stream. The block must stay valid
/// until the callback is invoked again or `pull_read` returns.
pub type ProducerCallback = unsafe extern "C" fn(ctx: *mut c_void, data: *mut *const f32) -> c_long;

/// Outcome of a single [`Engine::process`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Processed {
    /// Input frames consumed.
    pub frames_used: usize,
    /// Output frames written.
    pub frames_generated: usize,
    /// Engine status.
    pub status: Status,
}

impl Processed {
    /// A result that consumed and produced nothing.
    pub fn failed(status: Status) -> Self {
        Self {
            frames_used: 0,
            frames_generated: 0,
            status,
        }
    }
}

/// A sample rate conversion engine.
///
/// Instances are exclusively owned. Dropping an engine releases it.
pub trait Engine: Sized {
    /// Creates an engine for block processing.
    fn create(kind: ConverterKind, channels: usize) -> Result<Self, Status>;

    /// Creates an engine for pull mode that refills through `callback`.
    fn create_pull(
        kind: ConverterKind,
        channels: usize,
        callback: ProducerCallback,
    ) -> Result<Self, Status>;

    /// Duplicates the engine including its filter history.
    fn try_clone(&self) -> Result<Self, Status>;

    /// Converts interleaved `input` into interleaved `output`.
    ///
    /// `output.len() / channels` is the output capacity in frames.
    fn process(
        &mut self,
        input: &[f32],
        output: &mut [f32],
        ratio: f64,
        end_of_input: bool,
    ) -> Processed;

    /// Fills `output` by pulling input through the producer callback.
    ///
    /// `ctx` is handed unchanged to every callback invocation made during
    /// this call. Returns the number of frames generated; the status of the
    /// call is available from [`Engine::last_status`].
    fn pull_read(&mut self, ratio: f64, output: &mut [f32], ctx: *mut c_void) -> usize;

    /// Status recorded by the last `pull_read`.
    fn last_status(&self) -> Status;

    /// Sets the conversion ratio immediately, without ramping.
    fn set_ratio(&mut self, ratio: f64) -> Status;

    /// Clears filter history.
    fn reset(&mut self) -> Status;

    /// Whether `ratio` would be accepted.
    ///
    /// Only consulted when no output buffer can be planned for `ratio`, to
    /// tell a rejected ratio from an allocation failure.
    fn is_valid_ratio(_ratio: f64) -> bool {
        true
    }

    /// Renders a recognized status code.
    fn strerror(status: Status) -> String {
        status
            .description()
            .unwrap_or("Unknown error.")
            .to_string()
    }
}
