//! Untyped values carried by tuples, plus the coercion table used when a
//! column has a declared type.
//!
//! `FieldType::nullable == false` behaves like a primitive slot: a `Null`
//! coerces to the zero value of the type. Nullable slots keep `Null`.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int32,
    Int64,
    Float32,
    Float64,
    Utf8,
    Binary,
}

impl DataType {
    /// Zero value used when a `Null` lands in a non-nullable slot.
    fn zero(self) -> Scalar {
        match self {
            DataType::Boolean => Scalar::Bool(false),
            DataType::Int32 => Scalar::I32(0),
            DataType::Int64 => Scalar::I64(0),
            DataType::Float32 => Scalar::F32(0.0),
            DataType::Float64 => Scalar::F64(0.0),
            DataType::Utf8 | DataType::Binary => Scalar::Null,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::Boolean => "boolean",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::Utf8 => "utf8",
            DataType::Binary => "binary",
        };
        f.write_str(s)
    }
}

/// Declared type of one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldType {
    pub data_type: DataType,
    pub nullable: bool,
}

impl FieldType {
    /// A non-nullable ("primitive") slot.
    pub const fn required(data_type: DataType) -> Self {
        Self {
            data_type,
            nullable: false,
        }
    }

    /// A nullable ("boxed") slot.
    pub const fn nullable(data_type: DataType) -> Self {
        Self {
            data_type,
            nullable: true,
        }
    }

    /// The boxed equivalent of this type. Key type checks compare widened types.
    pub fn widened(self) -> Self {
        Self::nullable(self.data_type)
    }

    /// Coerce `value` into this slot.
    pub fn coerce(&self, value: &Scalar) -> Result<Scalar> {
        if value.is_null() {
            return Ok(if self.nullable {
                Scalar::Null
            } else {
                self.data_type.zero()
            });
        }
        value.coerce_to(self.data_type)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nullable {
            write!(f, "{}?", self.data_type)
        } else {
            write!(f, "{}", self.data_type)
        }
    }
}

impl From<DataType> for FieldType {
    fn from(data_type: DataType) -> Self {
        FieldType::nullable(data_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    Bin(Vec<u8>),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Natural type of a non-null value.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Scalar::Null => None,
            Scalar::Bool(_) => Some(DataType::Boolean),
            Scalar::I32(_) => Some(DataType::Int32),
            Scalar::I64(_) => Some(DataType::Int64),
            Scalar::F32(_) => Some(DataType::Float32),
            Scalar::F64(_) => Some(DataType::Float64),
            Scalar::Str(_) => Some(DataType::Utf8),
            Scalar::Bin(_) => Some(DataType::Binary),
        }
    }

    /// Coerce a value to `target`. `Null` stays `Null`.
    ///
    /// Floats convert to integers only when they are integral and in range;
    /// a fractional, non-finite or out-of-range float is a `Coercion` error.
    pub fn coerce_to(&self, target: DataType) -> Result<Scalar> {
        use Scalar::*;

        if self.data_type() == Some(target) || self.is_null() {
            return Ok(self.clone());
        }

        let fail = || Error::Coercion {
            value: self.to_string(),
            target: target.to_string(),
        };

        let coerced = match (self, target) {
            (I32(v), DataType::Int64) => I64(*v as i64),
            (I32(v), DataType::Float32) => F32(*v as f32),
            (I32(v), DataType::Float64) => F64(*v as f64),
            (I64(v), DataType::Int32) => I32(i32::try_from(*v).map_err(|_| fail())?),
            (I64(v), DataType::Float32) => F32(*v as f32),
            (I64(v), DataType::Float64) => F64(*v as f64),
            (F32(v), DataType::Float64) => F64(*v as f64),
            (F32(v), DataType::Int32) => {
                I32(float_to_i64(*v as f64).and_then(|i| i32::try_from(i).ok()).ok_or_else(fail)?)
            }
            (F32(v), DataType::Int64) => I64(float_to_i64(*v as f64).ok_or_else(fail)?),
            (F64(v), DataType::Float32) => F32(*v as f32),
            (F64(v), DataType::Int32) => {
                I32(float_to_i64(*v).and_then(|i| i32::try_from(i).ok()).ok_or_else(fail)?)
            }
            (F64(v), DataType::Int64) => I64(float_to_i64(*v).ok_or_else(fail)?),
            (Str(s), DataType::Boolean) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Bool(true),
                "false" => Bool(false),
                _ => return Err(fail()),
            },
            (Str(s), DataType::Int32) => I32(s.trim().parse().map_err(|_| fail())?),
            (Str(s), DataType::Int64) => I64(s.trim().parse().map_err(|_| fail())?),
            (Str(s), DataType::Float32) => F32(s.trim().parse().map_err(|_| fail())?),
            (Str(s), DataType::Float64) => F64(s.trim().parse().map_err(|_| fail())?),
            (Str(s), DataType::Binary) => Bin(s.as_bytes().to_vec()),
            (Bool(_) | I32(_) | I64(_) | F32(_) | F64(_), DataType::Utf8) => Str(self.to_string()),
            _ => return Err(fail()),
        };
        Ok(coerced)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::I32(v) => Some(*v as i64),
            Scalar::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::I32(v) => Some(*v as f64),
            Scalar::I64(v) => Some(*v as f64),
            Scalar::F32(v) => Some(*v as f64),
            Scalar::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => f.write_str("null"),
            Scalar::Bool(v) => write!(f, "{v}"),
            Scalar::I32(v) => write!(f, "{v}"),
            Scalar::I64(v) => write!(f, "{v}"),
            Scalar::F32(v) => write!(f, "{v}"),
            Scalar::F64(v) => write!(f, "{v}"),
            Scalar::Str(v) => f.write_str(v),
            Scalar::Bin(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::I32(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::I64(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::F64(v)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Str(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Str(v)
    }
}

// 2^63 is exactly representable; every f64 in [-2^63, 2^63) fits an i64.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// Exact conversion of an integral float, `None` for anything lossy.
fn float_to_i64(v: f64) -> Option<i64> {
    if v.is_finite() && v.fract() == 0.0 && (-I64_BOUND..I64_BOUND).contains(&v) {
        Some(v as i64)
    } else {
        None
    }
}

/// Floats order numerically, NaN after every number.
fn float_cmp(x: f64, y: f64) -> Ordering {
    match (x.is_nan(), y.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
    }
}

/// Integer against float without rounding the integer through `f64`.
fn int_float_cmp(i: i64, f: f64) -> Ordering {
    if f.is_nan() || f >= I64_BOUND {
        return Ordering::Less;
    }
    if f < -I64_BOUND {
        return Ordering::Greater;
    }
    let whole = f.trunc();
    match i.cmp(&(whole as i64)) {
        Ordering::Equal => float_cmp(whole, f),
        other => other,
    }
}

/// Total order over scalars used for grouping and sorting.
///
/// Nulls sort first. Integers and floats compare numerically across widths;
/// other mixed types order by variant.
pub fn scalar_cmp(a: &Scalar, b: &Scalar) -> Ordering {
    use Scalar::*;

    match (a, b) {
        (Null, Null) => Ordering::Equal,
        (Null, _) => Ordering::Less,
        (_, Null) => Ordering::Greater,
        (Bool(x), Bool(y)) => x.cmp(y),
        (I32(_) | I64(_), I32(_) | I64(_)) => a.as_i64().cmp(&b.as_i64()),
        (F32(_) | F64(_), F32(_) | F64(_)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => float_cmp(x, y),
            _ => Ordering::Equal,
        },
        (I32(_) | I64(_), F32(_) | F64(_)) => match (a.as_i64(), b.as_f64()) {
            (Some(i), Some(f)) => int_float_cmp(i, f),
            _ => Ordering::Equal,
        },
        (F32(_) | F64(_), I32(_) | I64(_)) => match (b.as_i64(), a.as_f64()) {
            (Some(i), Some(f)) => int_float_cmp(i, f).reverse(),
            _ => Ordering::Equal,
        },
        (Str(x), Str(y)) => x.cmp(y),
        (Bin(x), Bin(y)) => x.cmp(y),
        _ => scalar_type_order(a).cmp(&scalar_type_order(b)),
    }
}

fn scalar_type_order(s: &Scalar) -> u8 {
    use Scalar::*;
    match s {
        Null => 0,
        Bool(_) => 1,
        I32(_) | I64(_) | F32(_) | F64(_) => 2,
        Str(_) => 3,
        Bin(_) => 4,
    }
}
