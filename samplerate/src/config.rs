//! Resampler configuration.
//!
//! Both structs deserialize from YAML or JSON. The converter kind may be given
//! by name or by integer code; omitted fields take their defaults.

use serde::{Deserialize, Serialize};

use crate::converter::ConverterKind;

fn default_channels() -> usize {
    1
}

/// Configuration for a [`StreamResampler`](crate::StreamResampler).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default, alias = "converter_type")]
    pub converter_kind: ConverterKind,
    #[serde(default = "default_channels")]
    pub channels: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            converter_kind: ConverterKind::default(),
            channels: default_channels(),
        }
    }
}

/// Configuration for a [`PullResampler`](crate::PullResampler).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullConfig {
    /// Output rate divided by input rate.
    pub ratio: f64,
    #[serde(default, alias = "converter_type")]
    pub converter_kind: ConverterKind,
    #[serde(default = "default_channels")]
    pub channels: usize,
}

impl PullConfig {
    /// Creates a config with the given ratio and default kind and channels.
    pub fn with_ratio(ratio: f64) -> Self {
        Self {
            ratio,
            converter_kind: ConverterKind::default(),
            channels: default_channels(),
        }
    }
}
