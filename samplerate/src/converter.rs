//! Converter kinds and selectors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Interpolation algorithm used by the conversion engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "SelectorRepr")]
pub enum ConverterKind {
    /// Band limited sinc interpolation, highest quality.
    #[default]
    SincBest,
    /// Band limited sinc interpolation, medium quality.
    SincMedium,
    /// Band limited sinc interpolation, fastest.
    SincFastest,
    /// Zero order hold.
    ZeroOrderHold,
    /// Linear interpolation.
    Linear,
}

impl ConverterKind {
    /// All kinds, ordered by code.
    pub const ALL: [ConverterKind; 5] = [
        ConverterKind::SincBest,
        ConverterKind::SincMedium,
        ConverterKind::SincFastest,
        ConverterKind::ZeroOrderHold,
        ConverterKind::Linear,
    ];

    /// Returns the integer code (0-4).
    pub fn code(self) -> i32 {
        match self {
            Self::SincBest => 0,
            Self::SincMedium => 1,
            Self::SincFastest => 2,
            Self::ZeroOrderHold => 3,
            Self::Linear => 4,
        }
    }

    /// Returns the canonical name.
    pub fn name(self) -> &'static str {
        match self {
            Self::SincBest => "sinc_best",
            Self::SincMedium => "sinc_medium",
            Self::SincFastest => "sinc_fastest",
            Self::ZeroOrderHold => "zero_order_hold",
            Self::Linear => "linear",
        }
    }

    /// Returns true for the sinc family.
    pub fn is_sinc(self) -> bool {
        matches!(self, Self::SincBest | Self::SincMedium | Self::SincFastest)
    }
}

impl fmt::Display for ConverterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ConverterKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| Error::Usage(format!("unsupported converter type: {s:?}")))
    }
}

impl TryFrom<i32> for ConverterKind {
    type Error = Error;

    fn try_from(code: i32) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.code() == code)
            .ok_or_else(|| Error::Usage(format!("unsupported converter type: {code}")))
    }
}

/// Anything accepted where a converter kind is expected: the kind itself,
/// its canonical name, or its integer code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConverterSelector {
    Kind(ConverterKind),
    Name(String),
    Code(i32),
}

impl ConverterSelector {
    /// Resolves the selector to a kind.
    pub fn resolve(&self) -> Result<ConverterKind> {
        match self {
            Self::Kind(kind) => Ok(*kind),
            Self::Name(name) => name.parse(),
            Self::Code(code) => ConverterKind::try_from(*code),
        }
    }
}

impl Default for ConverterSelector {
    fn default() -> Self {
        Self::Kind(ConverterKind::default())
    }
}

impl From<ConverterKind> for ConverterSelector {
    fn from(kind: ConverterKind) -> Self {
        Self::Kind(kind)
    }
}

impl From<&str> for ConverterSelector {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for ConverterSelector {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<i32> for ConverterSelector {
    fn from(code: i32) -> Self {
        Self::Code(code)
    }
}

impl TryFrom<ConverterSelector> for ConverterKind {
    type Error = Error;

    fn try_from(selector: ConverterSelector) -> Result<Self> {
        selector.resolve()
    }
}

/// Wire form of a converter kind in configuration files.
#[derive(Deserialize)]
#[serde(untagged)]
enum SelectorRepr {
    Name(String),
    Code(i64),
}

impl TryFrom<SelectorRepr> for ConverterKind {
    type Error = Error;

    fn try_from(repr: SelectorRepr) -> Result<Self> {
        match repr {
            SelectorRepr::Name(name) => name.parse(),
            SelectorRepr::Code(code) => i32::try_from(code)
                .map_err(|_| Error::Usage(format!("unsupported converter type: {code}")))
                .and_then(ConverterKind::try_from),
        }
    }
}
