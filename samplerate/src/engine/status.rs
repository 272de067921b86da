//! Engine status codes.

use std::fmt;

/// Status code reported by a conversion engine.
///
/// Codes follow the libsamplerate numbering: zero is success, `1..=23` is the
/// recognized error range, and anything else is unknown to this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Status(pub i32);

impl Status {
    pub const NO_ERROR: Status = Status(0);
    pub const MALLOC_FAILED: Status = Status(1);
    pub const BAD_STATE: Status = Status(2);
    pub const BAD_DATA: Status = Status(3);
    pub const BAD_DATA_PTR: Status = Status(4);
    pub const NO_PRIVATE: Status = Status(5);
    pub const BAD_SRC_RATIO: Status = Status(6);
    pub const BAD_PROC_PTR: Status = Status(7);
    pub const SHIFT_BITS: Status = Status(8);
    pub const FILTER_LEN: Status = Status(9);
    pub const BAD_CONVERTER: Status = Status(10);
    pub const BAD_CHANNEL_COUNT: Status = Status(11);
    pub const SINC_BAD_BUFFER_LEN: Status = Status(12);
    pub const SIZE_INCOMPATIBILITY: Status = Status(13);
    pub const BAD_PRIV_PTR: Status = Status(14);
    pub const BAD_SINC_STATE: Status = Status(15);
    pub const DATA_OVERLAP: Status = Status(16);
    pub const BAD_CALLBACK: Status = Status(17);
    pub const BAD_MODE: Status = Status(18);
    pub const NULL_CALLBACK: Status = Status(19);
    pub const NO_VARIABLE_RATIO: Status = Status(20);
    pub const SINC_PREPARE_DATA_BAD_LEN: Status = Status(21);
    pub const BAD_INTERNAL_STATE: Status = Status(22);
    pub const MAX_ERROR: Status = Status(23);

    /// Returns the raw code.
    pub fn code(self) -> i32 {
        self.0
    }

    /// Returns true for the success code.
    pub fn is_ok(self) -> bool {
        self.0 == 0
    }

    /// Returns true if the code lies in the recognized error range.
    pub fn is_recognized_error(self) -> bool {
        (1..=Self::MAX_ERROR.0).contains(&self.0)
    }

    /// Returns the message for a known code, or `None` for unknown codes.
    pub fn description(self) -> Option<&'static str> {
        let msg = match self.0 {
            0 => "No error.",
            1 => "Malloc failed.",
            2 => "Engine state is missing.",
            3 => "Conversion data is missing.",
            4 => "Input or output buffer is missing.",
            5 => "Internal error. No private data.",
            6 => "Conversion ratio outside [1/256, 256] range.",
            7 => "Internal error. No process pointer.",
            8 => "Internal error. Shift bits too large.",
            9 => "Internal error. Filter length too large.",
            10 => "Bad converter number.",
            11 => "Channel count must be >= 1.",
            12 => "Internal error. Bad buffer length.",
            13 => "Internal error. Input data / internal buffer size difference.",
            14 => "Internal error. Private pointer is NULL.",
            15 => "Internal error. Bad sinc state.",
            16 => "Input and output data arrays overlap.",
            17 => "Supplied callback function is invalid for this operation.",
            18 => "Calling mode differs from initialisation mode (ie process v callback).",
            19 => "Callback function pointer is NULL in callback mode.",
            20 => "This converter only allows constant conversion ratios.",
            21 => "Internal error : Bad length in prepare_data ().",
            22 => "Error : Someone is trampling on my internal state.",
            23 => "Placeholder. No error defined for this error number.",
            _ => return None,
        };
        Some(msg)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
