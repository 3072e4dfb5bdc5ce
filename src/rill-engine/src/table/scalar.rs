//! Single values: group-key entries, literals and test-table cells.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, Float64Array, Int64Array, StringArray,
    TimestampNanosecondArray, UInt64Array, new_null_array,
};
use arrow::datatypes::{
    DataType, Float64Type, Int64Type, TimeUnit, TimestampNanosecondType, UInt64Type,
};
use serde::{Deserialize, Serialize};

use common_error::{RillError, RillResult};

use super::Time;

/// A single typed value.
///
/// Values are totally ordered so they can take part in group keys: variants
/// order by kind first, floats compare with `total_cmp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Time(Time),
}

impl ScalarValue {
    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) => 2,
            Self::UInt(_) => 3,
            Self::Float(_) => 4,
            Self::String(_) => 5,
            Self::Time(_) => 6,
        }
    }

    /// Whether the value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The value as a time, if it is one.
    pub fn as_time(&self) -> Option<Time> {
        match self {
            Self::Time(t) => Some(*t),
            _ => None,
        }
    }

    /// Arrow type of this value.
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Null => DataType::Null,
            Self::Bool(_) => DataType::Boolean,
            Self::Int(_) => DataType::Int64,
            Self::UInt(_) => DataType::UInt64,
            Self::Float(_) => DataType::Float64,
            Self::String(_) => DataType::Utf8,
            Self::Time(_) => time_data_type(),
        }
    }

    /// Read the value at `index` of an arrow array.
    pub fn try_from_array(array: &dyn Array, index: usize) -> RillResult<Self> {
        if index >= array.len() {
            return Err(RillError::internal(format!(
                "row {index} out of bounds for array of length {}",
                array.len()
            )));
        }
        if array.is_null(index) {
            return Ok(Self::Null);
        }
        let value = match array.data_type() {
            DataType::Boolean => Self::Bool(array.as_boolean().value(index)),
            DataType::Int64 => Self::Int(array.as_primitive::<Int64Type>().value(index)),
            DataType::UInt64 => Self::UInt(array.as_primitive::<UInt64Type>().value(index)),
            DataType::Float64 => Self::Float(array.as_primitive::<Float64Type>().value(index)),
            DataType::Utf8 => Self::String(array.as_string::<i32>().value(index).to_string()),
            DataType::Timestamp(TimeUnit::Nanosecond, _) => Self::Time(Time::new(
                array.as_primitive::<TimestampNanosecondType>().value(index),
            )),
            other => {
                return Err(RillError::type_error(format!(
                    "unsupported column type {other}"
                )));
            }
        };
        Ok(value)
    }

    /// Repeat this value into an array of length `len`.
    pub fn to_array(&self, len: usize) -> RillResult<ArrayRef> {
        if self.is_null() {
            return Ok(new_null_array(&DataType::Null, len));
        }
        iter_to_array(&self.data_type(), std::iter::repeat_n(self, len))
    }
}

/// Arrow type used for time columns.
pub fn time_data_type() -> DataType {
    DataType::Timestamp(TimeUnit::Nanosecond, None)
}

/// Build an array of `data_type` from values. Nulls are accepted for every type.
pub fn iter_to_array<'a>(
    data_type: &DataType,
    values: impl IntoIterator<Item = &'a ScalarValue>,
) -> RillResult<ArrayRef> {
    let array: ArrayRef = match data_type {
        DataType::Boolean => Arc::new(BooleanArray::from(collect(values, data_type, |v| {
            match v {
                ScalarValue::Bool(b) => Some(*b),
                _ => None,
            }
        })?)),
        DataType::Int64 => Arc::new(Int64Array::from(collect(values, data_type, |v| match v {
            ScalarValue::Int(i) => Some(*i),
            _ => None,
        })?)),
        DataType::UInt64 => Arc::new(UInt64Array::from(collect(values, data_type, |v| {
            match v {
                ScalarValue::UInt(u) => Some(*u),
                _ => None,
            }
        })?)),
        DataType::Float64 => Arc::new(Float64Array::from(collect(values, data_type, |v| {
            match v {
                ScalarValue::Float(f) => Some(*f),
                _ => None,
            }
        })?)),
        DataType::Utf8 => Arc::new(StringArray::from(collect(values, data_type, |v| {
            match v {
                ScalarValue::String(s) => Some(s.clone()),
                _ => None,
            }
        })?)),
        DataType::Timestamp(TimeUnit::Nanosecond, tz) => Arc::new(
            TimestampNanosecondArray::from(collect(values, data_type, |v| match v {
                ScalarValue::Time(t) => Some(t.nanos()),
                _ => None,
            })?)
            .with_timezone_opt(tz.clone()),
        ),
        other => {
            return Err(RillError::type_error(format!(
                "unsupported column type {other}"
            )));
        }
    };
    Ok(array)
}

fn collect<'a, T>(
    values: impl IntoIterator<Item = &'a ScalarValue>,
    data_type: &DataType,
    extract: impl Fn(&ScalarValue) -> Option<T>,
) -> RillResult<Vec<Option<T>>> {
    values
        .into_iter()
        .map(|v| {
            if v.is_null() {
                return Ok(None);
            }
            extract(v).map(Some).ok_or_else(|| {
                RillError::type_error(format!(
                    "value {v} does not fit column type {data_type}"
                ))
            })
        })
        .collect()
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScalarValue {}

impl PartialOrd for ScalarValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScalarValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::UInt(a), Self::UInt(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Time(a), Self::Time(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Self::Null => {}
            Self::Bool(b) => b.hash(state),
            Self::Int(i) => i.hash(state),
            Self::UInt(u) => u.hash(state),
            Self::Float(f) => f.to_bits().hash(state),
            Self::String(s) => s.hash(state),
            Self::Time(t) => t.hash(state),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::UInt(u) => write!(f, "{u}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Time(t) => write!(f, "{t}"),
        }
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for ScalarValue {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Time> for ScalarValue {
    fn from(v: Time) -> Self {
        Self::Time(v)
    }
}
