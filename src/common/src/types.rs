// Copyright 2023 RisingWave Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The data type model and the runtime value representation.

use std::cmp::Ordering;

use bytes::Bytes;
use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::{CommonError, Result};

/// The closed family of field types.
///
/// All types except [`DataType::VarSized`] are fixed width. A `VarSized`
/// field occupies 8 bytes inline: a packed
/// [`VariableSizedAccess`](crate::buffer::VariableSizedAccess) pointing into
/// a child buffer.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum DataType {
    Bool,
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
    Char,
    VarSized,
}

impl DataType {
    /// The inline width of a field of this type.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DataType::Bool | DataType::Int8 | DataType::UInt8 | DataType::Char => 1,
            DataType::Int16 | DataType::UInt16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::UInt64 | DataType::Float64 | DataType::VarSized => 8,
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, DataType::Bool | DataType::Char | DataType::VarSized)
    }

    pub fn is_integer(&self) -> bool {
        self.is_numeric() && !self.is_float()
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64
        ) || self.is_float()
    }

    /// Numeric promotion: the narrowest type both operands convert to without
    /// loss of rank. Floats beat integers; at equal width, signed beats
    /// unsigned.
    pub fn join(&self, other: &DataType) -> Result<DataType> {
        if self == other {
            return Ok(*self);
        }
        if !self.is_numeric() || !other.is_numeric() {
            return Err(CommonError::IncompatibleTypes {
                op: "join",
                lhs: *self,
                rhs: *other,
            });
        }
        if self.is_float() || other.is_float() {
            let width = self.size_in_bytes().max(other.size_in_bytes());
            return Ok(if width > 4 {
                DataType::Float64
            } else {
                DataType::Float32
            });
        }
        let width = self.size_in_bytes().max(other.size_in_bytes());
        let signed = self.is_signed() || other.is_signed();
        Ok(match (width, signed) {
            (1, true) => DataType::Int8,
            (1, false) => DataType::UInt8,
            (2, true) => DataType::Int16,
            (2, false) => DataType::UInt16,
            (4, true) => DataType::Int32,
            (4, false) => DataType::UInt32,
            (_, true) => DataType::Int64,
            (_, false) => DataType::UInt64,
        })
    }
}

/// A variable-sized payload that has been resolved out of its child buffer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VariableSizedData {
    pub bytes: Bytes,
}

impl VariableSizedData {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A runtime value: the tagged union over every field type.
#[derive(Clone, Debug, PartialEq, EnumAsInner)]
pub enum VarVal {
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Char(u8),
    VarSized(VariableSizedData),
}

impl VarVal {
    pub fn data_type(&self) -> DataType {
        match self {
            VarVal::Bool(_) => DataType::Bool,
            VarVal::Int8(_) => DataType::Int8,
            VarVal::Int16(_) => DataType::Int16,
            VarVal::Int32(_) => DataType::Int32,
            VarVal::Int64(_) => DataType::Int64,
            VarVal::UInt8(_) => DataType::UInt8,
            VarVal::UInt16(_) => DataType::UInt16,
            VarVal::UInt32(_) => DataType::UInt32,
            VarVal::UInt64(_) => DataType::UInt64,
            VarVal::Float32(_) => DataType::Float32,
            VarVal::Float64(_) => DataType::Float64,
            VarVal::Char(_) => DataType::Char,
            VarVal::VarSized(_) => DataType::VarSized,
        }
    }

    /// The zero value of `data_type`, used to initialize aggregation state.
    pub fn zero_of(data_type: DataType) -> Result<VarVal> {
        VarVal::Int64(0).cast_to(data_type)
    }

    fn as_i128(&self) -> Option<i128> {
        Some(match self {
            VarVal::Int8(v) => *v as i128,
            VarVal::Int16(v) => *v as i128,
            VarVal::Int32(v) => *v as i128,
            VarVal::Int64(v) => *v as i128,
            VarVal::UInt8(v) => *v as i128,
            VarVal::UInt16(v) => *v as i128,
            VarVal::UInt32(v) => *v as i128,
            VarVal::UInt64(v) => *v as i128,
            _ => return None,
        })
    }

    fn as_f64_lossy(&self) -> Option<f64> {
        Some(match self {
            VarVal::Float32(v) => *v as f64,
            VarVal::Float64(v) => *v,
            other => other.as_i128()? as f64,
        })
    }

    /// Converts to `target`. Integer casts truncate like `as`; only numeric
    /// conversions are defined.
    pub fn cast_to(&self, target: DataType) -> Result<VarVal> {
        if self.data_type() == target {
            return Ok(self.clone());
        }
        let incompatible = || CommonError::IncompatibleTypes {
            op: "cast",
            lhs: self.data_type(),
            rhs: target,
        };
        if target.is_float() {
            let v = self.as_f64_lossy().ok_or_else(incompatible)?;
            return Ok(match target {
                DataType::Float32 => VarVal::Float32(v as f32),
                _ => VarVal::Float64(v),
            });
        }
        if target.is_integer() {
            let v = match self {
                VarVal::Float32(f) => *f as i128,
                VarVal::Float64(f) => *f as i128,
                other => other.as_i128().ok_or_else(incompatible)?,
            };
            return Ok(match target {
                DataType::Int8 => VarVal::Int8(v as i8),
                DataType::Int16 => VarVal::Int16(v as i16),
                DataType::Int32 => VarVal::Int32(v as i32),
                DataType::Int64 => VarVal::Int64(v as i64),
                DataType::UInt8 => VarVal::UInt8(v as u8),
                DataType::UInt16 => VarVal::UInt16(v as u16),
                DataType::UInt32 => VarVal::UInt32(v as u32),
                _ => VarVal::UInt64(v as u64),
            });
        }
        Err(incompatible())
    }

    fn binary_numeric(
        &self,
        other: &VarVal,
        op: &'static str,
        int_op: impl Fn(i128, i128) -> i128,
        float_op: impl Fn(f64, f64) -> f64,
    ) -> Result<VarVal> {
        let result_type = self.data_type().join(&other.data_type()).map_err(|_| {
            CommonError::IncompatibleTypes {
                op,
                lhs: self.data_type(),
                rhs: other.data_type(),
            }
        })?;
        if result_type.is_float() {
            // Unwraps cannot fire: join succeeded, so both sides are numeric.
            let l = self.as_f64_lossy().unwrap_or_default();
            let r = other.as_f64_lossy().unwrap_or_default();
            VarVal::Float64(float_op(l, r)).cast_to(result_type)
        } else {
            let l = self.as_i128().unwrap_or_default();
            let r = other.as_i128().unwrap_or_default();
            VarVal::Int64(int_op(l, r) as i64).cast_to(result_type)
        }
    }

    pub fn add(&self, other: &VarVal) -> Result<VarVal> {
        self.binary_numeric(other, "add", |l, r| l.wrapping_add(r), |l, r| l + r)
    }

    pub fn sub(&self, other: &VarVal) -> Result<VarVal> {
        self.binary_numeric(other, "sub", |l, r| l.wrapping_sub(r), |l, r| l - r)
    }

    pub fn mul(&self, other: &VarVal) -> Result<VarVal> {
        self.binary_numeric(other, "mul", |l, r| l.wrapping_mul(r), |l, r| l * r)
    }

    pub fn div(&self, other: &VarVal) -> Result<VarVal> {
        self.binary_numeric(
            other,
            "div",
            |l, r| if r == 0 { 0 } else { l.wrapping_div(r) },
            |l, r| l / r,
        )
    }

    /// Numeric or like-typed comparison with promotion.
    pub fn compare(&self, other: &VarVal) -> Result<Ordering> {
        match (self, other) {
            (VarVal::Bool(l), VarVal::Bool(r)) => Ok(l.cmp(r)),
            (VarVal::Char(l), VarVal::Char(r)) => Ok(l.cmp(r)),
            (VarVal::VarSized(l), VarVal::VarSized(r)) => Ok(l.bytes.cmp(&r.bytes)),
            _ => {
                let joined = self.data_type().join(&other.data_type()).map_err(|_| {
                    CommonError::IncompatibleTypes {
                        op: "compare",
                        lhs: self.data_type(),
                        rhs: other.data_type(),
                    }
                })?;
                if joined.is_float() {
                    let l = self.as_f64_lossy().unwrap_or_default();
                    let r = other.as_f64_lossy().unwrap_or_default();
                    Ok(l.partial_cmp(&r).unwrap_or(Ordering::Equal))
                } else {
                    let l = self.as_i128().unwrap_or_default();
                    let r = other.as_i128().unwrap_or_default();
                    Ok(l.cmp(&r))
                }
            }
        }
    }

    /// Encodes the value into its fixed-width little-endian representation.
    /// `VarSized` values are not inline encodable: callers store the packed
    /// access id instead.
    pub fn write_le_bytes(&self, dst: &mut [u8]) {
        match self {
            VarVal::Bool(v) => dst[0] = *v as u8,
            VarVal::Int8(v) => dst[0] = *v as u8,
            VarVal::UInt8(v) | VarVal::Char(v) => dst[0] = *v,
            VarVal::Int16(v) => dst.copy_from_slice(&v.to_le_bytes()),
            VarVal::UInt16(v) => dst.copy_from_slice(&v.to_le_bytes()),
            VarVal::Int32(v) => dst.copy_from_slice(&v.to_le_bytes()),
            VarVal::UInt32(v) => dst.copy_from_slice(&v.to_le_bytes()),
            VarVal::Float32(v) => dst.copy_from_slice(&v.to_le_bytes()),
            VarVal::Int64(v) => dst.copy_from_slice(&v.to_le_bytes()),
            VarVal::UInt64(v) => dst.copy_from_slice(&v.to_le_bytes()),
            VarVal::Float64(v) => dst.copy_from_slice(&v.to_le_bytes()),
            VarVal::VarSized(_) => unreachable!("varsized values are stored via child buffers"),
        }
    }

    /// Decodes a fixed-width value from its little-endian representation.
    pub fn read_le_bytes(data_type: DataType, src: &[u8]) -> VarVal {
        match data_type {
            DataType::Bool => VarVal::Bool(src[0] != 0),
            DataType::Int8 => VarVal::Int8(src[0] as i8),
            DataType::UInt8 => VarVal::UInt8(src[0]),
            DataType::Char => VarVal::Char(src[0]),
            DataType::Int16 => VarVal::Int16(i16::from_le_bytes([src[0], src[1]])),
            DataType::UInt16 => VarVal::UInt16(u16::from_le_bytes([src[0], src[1]])),
            DataType::Int32 => {
                VarVal::Int32(i32::from_le_bytes([src[0], src[1], src[2], src[3]]))
            }
            DataType::UInt32 => {
                VarVal::UInt32(u32::from_le_bytes([src[0], src[1], src[2], src[3]]))
            }
            DataType::Float32 => {
                VarVal::Float32(f32::from_le_bytes([src[0], src[1], src[2], src[3]]))
            }
            DataType::Int64 => VarVal::Int64(i64::from_le_bytes(
                src[..8].try_into().expect("8 byte field"),
            )),
            DataType::UInt64 => VarVal::UInt64(u64::from_le_bytes(
                src[..8].try_into().expect("8 byte field"),
            )),
            DataType::Float64 => VarVal::Float64(f64::from_le_bytes(
                src[..8].try_into().expect("8 byte field"),
            )),
            DataType::VarSized => unreachable!("varsized values are resolved via child buffers"),
        }
    }

    /// Parses a textual field per `data_type`, as CSV-style sources deliver it.
    pub fn parse_str(data_type: DataType, text: &str) -> Result<VarVal> {
        fn parse_error(data_type: DataType, text: &str) -> CommonError {
            CommonError::InvalidConfigParameter {
                name: data_type.to_string(),
                reason: format!("cannot parse {text:?}"),
            }
        }

        let t = text.trim();
        let err = || parse_error(data_type, t);
        Ok(match data_type {
            DataType::Bool => VarVal::Bool(matches!(t, "1" | "true" | "TRUE")),
            DataType::Int8 => VarVal::Int8(t.parse().map_err(|_| err())?),
            DataType::Int16 => VarVal::Int16(t.parse().map_err(|_| err())?),
            DataType::Int32 => VarVal::Int32(t.parse().map_err(|_| err())?),
            DataType::Int64 => VarVal::Int64(t.parse().map_err(|_| err())?),
            DataType::UInt8 => VarVal::UInt8(t.parse().map_err(|_| err())?),
            DataType::UInt16 => VarVal::UInt16(t.parse().map_err(|_| err())?),
            DataType::UInt32 => VarVal::UInt32(t.parse().map_err(|_| err())?),
            DataType::UInt64 => VarVal::UInt64(t.parse().map_err(|_| err())?),
            DataType::Float32 => VarVal::Float32(t.parse().map_err(|_| err())?),
            DataType::Float64 => VarVal::Float64(t.parse().map_err(|_| err())?),
            DataType::Char => VarVal::Char(*t.as_bytes().first().unwrap_or(&0)),
            DataType::VarSized => {
                VarVal::VarSized(VariableSizedData::new(t.as_bytes().to_vec()))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_prefers_width_then_float_then_signedness() {
        assert_eq!(
            DataType::Int32.join(&DataType::Int64).unwrap(),
            DataType::Int64
        );
        assert_eq!(
            DataType::UInt32.join(&DataType::Int32).unwrap(),
            DataType::Int32
        );
        assert_eq!(
            DataType::Int64.join(&DataType::Float32).unwrap(),
            DataType::Float64
        );
        assert!(DataType::Bool.join(&DataType::Int8).is_err());
    }

    #[test]
    fn arithmetic_promotes() {
        let sum = VarVal::Int32(40).add(&VarVal::Int64(2)).unwrap();
        assert_eq!(sum, VarVal::Int64(42));

        let product = VarVal::UInt8(3).mul(&VarVal::Float32(1.5)).unwrap();
        assert_eq!(product, VarVal::Float32(4.5));
    }

    #[test]
    fn comparison_across_widths() {
        assert_eq!(
            VarVal::Int16(7).compare(&VarVal::UInt64(9)).unwrap(),
            Ordering::Less
        );
        assert!(VarVal::Bool(true).compare(&VarVal::Int8(1)).is_err());
    }

    #[test]
    fn fixed_width_round_trip() {
        let mut buf = [0u8; 8];
        VarVal::Int64(-77).write_le_bytes(&mut buf);
        assert_eq!(
            VarVal::read_le_bytes(DataType::Int64, &buf),
            VarVal::Int64(-77)
        );

        let mut buf = [0u8; 4];
        VarVal::Float32(2.25).write_le_bytes(&mut buf);
        assert_eq!(
            VarVal::read_le_bytes(DataType::Float32, &buf),
            VarVal::Float32(2.25)
        );
    }

    #[test]
    fn data_type_names_round_trip() {
        let parsed: DataType = "INT32".parse().unwrap();
        assert_eq!(parsed, DataType::Int32);
        assert_eq!(DataType::VarSized.to_string(), "VARSIZED");
        assert!("INT128".parse::<DataType>().is_err());
    }
}
