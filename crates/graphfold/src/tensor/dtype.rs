//! Enumerates the scalar element types a folded tensor can carry.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical dtype identifier shared between tensors, value types and the text IR.
///
/// There are no unsigned types wider than a byte: exported graphs that declare them are
/// mapped to the next wider signed type (see [`DType::from_onnx_code`]). In particular there is
/// no `U16`; uint16 is carried as `I32` so that cast codes 4 and 6 produce the same dtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 8-bit unsigned integer.
    U8,
    /// 8-bit signed integer.
    I8,
    /// 16-bit signed integer.
    I16,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer, used for shapes and index operands.
    I64,
    /// 32-bit IEEE-754 floating point.
    F32,
    /// 64-bit IEEE-754 floating point.
    F64,
}

impl DType {
    pub const ALL: [DType; 7] = [
        DType::U8,
        DType::I8,
        DType::I16,
        DType::I32,
        DType::I64,
        DType::F32,
        DType::F64,
    ];

    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::U8 | DType::I8 => 1,
            DType::I16 => 2,
            DType::I32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }

    pub fn is_integer(self) -> bool {
        !self.is_float()
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    /// Short lowercase spelling used by the text IR and JSON parameter tables.
    pub fn as_str(self) -> &'static str {
        match self {
            DType::U8 => "u8",
            DType::I8 => "i8",
            DType::I16 => "i16",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }

    pub fn parse(src: &str) -> Option<Self> {
        DType::ALL.into_iter().find(|dtype| dtype.as_str() == src)
    }

    /// Maps an ONNX `TensorProto` element-type code to a tensor dtype.
    ///
    /// Only numeric codes are covered. Unsigned codes map to the next wider signed type, and
    /// float16 widens to `F32`; 4 (uint16) and 6 (int32) both land on `I32`.
    pub fn from_onnx_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(DType::F32),
            2 => Some(DType::U8),
            3 => Some(DType::I8),
            4 => Some(DType::I32),
            5 => Some(DType::I16),
            6 => Some(DType::I32),
            7 => Some(DType::I64),
            10 => Some(DType::F32),
            11 => Some(DType::F64),
            12 => Some(DType::I64),
            _ => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
