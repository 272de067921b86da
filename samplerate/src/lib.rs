//! Sample rate conversion for multi-channel audio buffers.
//!
//! This crate provides three ways to resample `f32` audio held in `ndarray`
//! arrays (`[frames]` for mono, `[frames, channels]` row major otherwise):
//!
//! - [`resample`]: convert a whole buffer in one call
//! - [`StreamResampler`]: convert block by block, keeping filter state
//! - [`PullResampler`]: let the engine pull input from a producer closure
//!
//! The interpolation itself is done by an [`Engine`]. [`NativeEngine`] is
//! bundled, runs on `rubato` and supports every [`ConverterKind`]; other
//! engines plug in through the `*_with` / `with_engine` constructors.
//!
//! # Example
//!
//! ```rust
//! use giztoy_samplerate::{resample, ConverterKind, StreamResampler};
//! use ndarray::Array1;
//!
//! let input = Array1::from(vec![0.0f32; 441]).into_dyn();
//!
//! // 44.1kHz -> 48kHz in one go
//! let out = resample(&input.view(), 48_000.0 / 44_100.0, "sinc_fastest", false).unwrap();
//! assert_eq!(out.ndim(), 1);
//!
//! // Same thing, block by block
//! let mut stream = StreamResampler::new(ConverterKind::Linear, 1).unwrap();
//! let first = stream.process(&input.view(), 2.0, false).unwrap();
//! let tail = stream.process(&Array1::<f32>::zeros(0).into_dyn().view(), 2.0, true).unwrap();
//! assert_eq!(first.len() + tail.len(), 882);
//! ```

pub mod config;
pub mod converter;
pub mod engine;
pub mod error;
mod oneshot;
pub mod plan;
mod pull;
mod stream;

pub use config::{PullConfig, StreamConfig};
pub use converter::{ConverterKind, ConverterSelector};
pub use engine::{Engine, NativeEngine, Processed, ProducerCallback, Status};
pub use error::{check, Error, Result};
pub use oneshot::{resample, resample_with};
pub use plan::{BufferPlan, ChannelLayout, Rank, SAFETY_MARGIN};
pub use pull::{PullResampler, Scoped};
pub use stream::StreamResampler;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the bundled engine.
pub const ENGINE_NAME: &str = "rubato (sinc, nearest, linear)";
