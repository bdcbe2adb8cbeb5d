//! Column type descriptors shared by the expression tree and the block reader.
//!
//! A `ColType` pins down everything evaluation needs to know about a value:
//! the data type tag, physical width, decimal scale/precision and the on-disk
//! compression of the backing column.

use serde::{Deserialize, Serialize};

/// Decimal precision bounds for the two physical widths.
pub const MAX_LEGACY_PRECISION: i32 = 18;
pub const MAX_WIDE_PRECISION: i32 = 38;

/// Storage width in bytes of a wide (128-bit) decimal column.
pub const WIDE_DECIMAL_WIDTH: u32 = 16;

/// Data type tag carried by every column and operator result descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    /// Extended-precision float slot; carried as f64 in this implementation.
    LongDouble,
    Decimal,
    UDecimal,
    Char,
    Varchar,
    Text,
    Bool,
}

impl DataType {
    pub fn is_signed_integer(self) -> bool {
        matches!(
            self,
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64
        )
    }

    pub fn is_unsigned_integer(self) -> bool {
        matches!(
            self,
            DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    pub fn is_long_double(self) -> bool {
        matches!(self, DataType::LongDouble)
    }

    pub fn is_decimal(self) -> bool {
        matches!(self, DataType::Decimal | DataType::UDecimal)
    }

    pub fn is_string(self) -> bool {
        matches!(self, DataType::Char | DataType::Varchar | DataType::Text)
    }

    /// Stable tag used by the wire codec.
    pub fn wire_tag(self) -> u8 {
        match self {
            DataType::Int8 => 0,
            DataType::Int16 => 1,
            DataType::Int32 => 2,
            DataType::Int64 => 3,
            DataType::UInt8 => 4,
            DataType::UInt16 => 5,
            DataType::UInt32 => 6,
            DataType::UInt64 => 7,
            DataType::Float32 => 8,
            DataType::Float64 => 9,
            DataType::LongDouble => 10,
            DataType::Decimal => 11,
            DataType::UDecimal => 12,
            DataType::Char => 13,
            DataType::Varchar => 14,
            DataType::Text => 15,
            DataType::Bool => 16,
        }
    }

    pub fn from_wire_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => DataType::Int8,
            1 => DataType::Int16,
            2 => DataType::Int32,
            3 => DataType::Int64,
            4 => DataType::UInt8,
            5 => DataType::UInt16,
            6 => DataType::UInt32,
            7 => DataType::UInt64,
            8 => DataType::Float32,
            9 => DataType::Float64,
            10 => DataType::LongDouble,
            11 => DataType::Decimal,
            12 => DataType::UDecimal,
            13 => DataType::Char,
            14 => DataType::Varchar,
            15 => DataType::Text,
            16 => DataType::Bool,
            _ => return None,
        })
    }
}

/// On-disk compression of a column segment.
///
/// The numbering matches the segment file header: 0 none, 2 snappy, 3 lz4,
/// 4 zstd. Slot 1 belonged to a retired codec and is rejected on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompressionKind {
    None,
    Snappy,
    Lz4,
    Zstd,
}

impl CompressionKind {
    pub fn code(self) -> u8 {
        match self {
            CompressionKind::None => 0,
            CompressionKind::Snappy => 2,
            CompressionKind::Lz4 => 3,
            CompressionKind::Zstd => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(CompressionKind::None),
            2 => Some(CompressionKind::Snappy),
            3 => Some(CompressionKind::Lz4),
            4 => Some(CompressionKind::Zstd),
            _ => None,
        }
    }

    pub fn is_compressed(self) -> bool {
        !matches!(self, CompressionKind::None)
    }
}

/// Full column/result type descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColType {
    pub data_type: DataType,
    /// Physical width in bytes; selects the decimal representation.
    pub width: u32,
    pub scale: i32,
    pub precision: i32,
    pub compression: CompressionKind,
}

impl ColType {
    pub fn new(data_type: DataType, width: u32) -> Self {
        ColType {
            data_type,
            width,
            scale: 0,
            precision: 0,
            compression: CompressionKind::None,
        }
    }

    pub fn bigint() -> Self {
        ColType::new(DataType::Int64, 8)
    }

    pub fn ubigint() -> Self {
        ColType::new(DataType::UInt64, 8)
    }

    pub fn double() -> Self {
        ColType::new(DataType::Float64, 8)
    }

    pub fn long_double() -> Self {
        ColType::new(DataType::LongDouble, 16)
    }

    pub fn varchar(width: u32) -> Self {
        ColType::new(DataType::Varchar, width)
    }

    pub fn boolean() -> Self {
        ColType::new(DataType::Bool, 1)
    }

    pub fn decimal(precision: i32, scale: i32) -> Self {
        let width = if precision > MAX_LEGACY_PRECISION {
            WIDE_DECIMAL_WIDTH
        } else {
            8
        };
        ColType {
            data_type: DataType::Decimal,
            width,
            scale,
            precision,
            compression: CompressionKind::None,
        }
    }

    /// Wide decimals are selected by declared precision 19..=38.
    pub fn is_wide_decimal(&self) -> bool {
        self.data_type.is_decimal() && self.width == WIDE_DECIMAL_WIDTH
    }
}

impl Default for ColType {
    fn default() -> Self {
        ColType::bigint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_width_follows_precision() {
        assert_eq!(ColType::decimal(18, 2).width, 8);
        assert_eq!(ColType::decimal(19, 2).width, WIDE_DECIMAL_WIDTH);
        assert!(ColType::decimal(38, 0).is_wide_decimal());
        assert!(!ColType::decimal(9, 4).is_wide_decimal());
    }

    #[test]
    fn compression_codes_round_trip_and_reject_retired_slot() {
        for kind in [
            CompressionKind::None,
            CompressionKind::Snappy,
            CompressionKind::Lz4,
            CompressionKind::Zstd,
        ] {
            assert_eq!(CompressionKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(CompressionKind::from_code(1), None);
        assert_eq!(CompressionKind::from_code(9), None);
    }

    #[test]
    fn family_predicates_are_disjoint() {
        assert!(DataType::Int32.is_signed_integer());
        assert!(!DataType::Int32.is_unsigned_integer());
        assert!(DataType::UInt16.is_unsigned_integer());
        assert!(DataType::Float32.is_float());
        assert!(DataType::LongDouble.is_long_double());
        assert!(!DataType::LongDouble.is_float());
        assert!(DataType::UDecimal.is_decimal());
        assert!(DataType::Text.is_string());
    }
}
