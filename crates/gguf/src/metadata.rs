//! The metadata directory: a self-describing key-value section at the start
//! of the container, holding hyperparameters and other model configuration.

use std::{collections::HashMap, io::BufRead};

use thiserror::Error;

use crate::{
    container::{read_string, GgufContext},
    util, GgufLoadError,
};

/// The type tag of a metadata value.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataValueType {
    /// The value is a 8-bit unsigned integer.
    UInt8 = 0,
    /// The value is a 8-bit signed integer.
    Int8 = 1,
    /// The value is a 16-bit unsigned little-endian integer.
    UInt16 = 2,
    /// The value is a 16-bit signed little-endian integer.
    Int16 = 3,
    /// The value is a 32-bit unsigned little-endian integer.
    UInt32 = 4,
    /// The value is a 32-bit signed little-endian integer.
    Int32 = 5,
    /// The value is a 32-bit IEEE754 floating point number.
    Float32 = 6,
    /// The value is a boolean. 1-byte value where 0 is false and 1 is true.
    /// Anything else is invalid.
    Bool = 7,
    /// The value is a UTF-8 non-null-terminated string, with length prepended.
    String = 8,
    /// The value is an array of other values, with the element type and
    /// length prepended. The length is the number of elements, not bytes.
    Array = 9,
    /// The value is a 64-bit unsigned little-endian integer.
    UInt64 = 10,
    /// The value is a 64-bit signed little-endian integer.
    Int64 = 11,
    /// The value is a 64-bit IEEE754 floating point number.
    Float64 = 12,
}

macro_rules! impl_value_boilerplate {
    ($($value_type:ident($rust_type:ty)),*) => {
        impl TryFrom<u32> for MetadataValueType {
            type Error = ();

            fn try_from(value: u32) -> Result<Self, Self::Error> {
                for test_value in [
                    $(MetadataValueType::$value_type),*
                ] {
                    if value == test_value as u32 {
                        return Ok(test_value);
                    }
                }
                Err(())
            }
        }

        /// A typed metadata value.
        #[derive(Debug, Clone, PartialEq)]
        pub enum MetadataValue {
            $(
                #[allow(missing_docs)]
                $value_type($rust_type),
            )*
        }

        impl MetadataValue {
            /// The type tag of this value.
            pub fn value_type(&self) -> MetadataValueType {
                match self {
                    $(MetadataValue::$value_type(_) => MetadataValueType::$value_type),*
                }
            }
        }
    };
}
impl_value_boilerplate! {
    UInt8(u8),
    Int8(i8),
    UInt16(u16),
    Int16(i16),
    UInt32(u32),
    Int32(i32),
    Float32(f32),
    Bool(bool),
    String(String),
    Array(MetadataArrayValue),
    UInt64(u64),
    Int64(i64),
    Float64(f64)
}

// Public
impl MetadataValue {
    /// Returns the value if it is a `u32`.
    pub fn as_uint32(&self) -> Option<u32> {
        match self {
            Self::UInt32(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value if it is a `f32`.
    pub fn as_float32(&self) -> Option<f32> {
        match self {
            Self::Float32(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value if it is a `bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value if it is a string.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the value if it is an array.
    pub fn as_array(&self) -> Option<&MetadataArrayValue> {
        match self {
            Self::Array(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the value if it is a `u64`.
    pub fn as_uint64(&self) -> Option<u64> {
        match self {
            Self::UInt64(v) => Some(*v),
            _ => None,
        }
    }
}
// Private
impl MetadataValue {
    pub(crate) fn read_key_value(
        ctx: &GgufContext,
        reader: &mut dyn BufRead,
    ) -> Result<(String, Self), GgufLoadError> {
        let key = read_string(ctx, reader)?;
        let raw_type = util::read_u32(reader)?;
        let value_type = MetadataValueType::try_from(raw_type)
            .map_err(|()| GgufLoadError::UnsupportedValueType {
                value_type: raw_type,
            })?;
        let value = Self::read_value(ctx, reader, value_type)?;

        Ok((key, value))
    }

    fn read_value(
        ctx: &GgufContext,
        reader: &mut dyn BufRead,
        value_type: MetadataValueType,
    ) -> Result<MetadataValue, GgufLoadError> {
        match value_type {
            MetadataValueType::UInt8 => Self::read_u8(ctx, reader).map(MetadataValue::UInt8),
            MetadataValueType::Int8 => Self::read_i8(ctx, reader).map(MetadataValue::Int8),
            MetadataValueType::UInt16 => Self::read_u16(ctx, reader).map(MetadataValue::UInt16),
            MetadataValueType::Int16 => Self::read_i16(ctx, reader).map(MetadataValue::Int16),
            MetadataValueType::UInt32 => Self::read_u32(ctx, reader).map(MetadataValue::UInt32),
            MetadataValueType::Int32 => Self::read_i32(ctx, reader).map(MetadataValue::Int32),
            MetadataValueType::Float32 => Self::read_f32(ctx, reader).map(MetadataValue::Float32),
            MetadataValueType::Bool => Self::read_bool(ctx, reader).map(MetadataValue::Bool),
            MetadataValueType::String => Self::read_string(ctx, reader).map(MetadataValue::String),
            MetadataValueType::Array => Self::read_array(ctx, reader).map(MetadataValue::Array),
            MetadataValueType::UInt64 => Self::read_u64(ctx, reader).map(MetadataValue::UInt64),
            MetadataValueType::Int64 => Self::read_i64(ctx, reader).map(MetadataValue::Int64),
            MetadataValueType::Float64 => Self::read_f64(ctx, reader).map(MetadataValue::Float64),
        }
    }

    fn read_u8(_ctx: &GgufContext, reader: &mut dyn BufRead) -> Result<u8, GgufLoadError> {
        Ok(util::read_u8(reader)?)
    }

    fn read_i8(_ctx: &GgufContext, reader: &mut dyn BufRead) -> Result<i8, GgufLoadError> {
        Ok(util::read_i8(reader)?)
    }

    fn read_u16(_ctx: &GgufContext, reader: &mut dyn BufRead) -> Result<u16, GgufLoadError> {
        Ok(util::read_u16(reader)?)
    }

    fn read_i16(_ctx: &GgufContext, reader: &mut dyn BufRead) -> Result<i16, GgufLoadError> {
        Ok(util::read_i16(reader)?)
    }

    fn read_u32(_ctx: &GgufContext, reader: &mut dyn BufRead) -> Result<u32, GgufLoadError> {
        Ok(util::read_u32(reader)?)
    }

    fn read_i32(_ctx: &GgufContext, reader: &mut dyn BufRead) -> Result<i32, GgufLoadError> {
        Ok(util::read_i32(reader)?)
    }

    fn read_f32(_ctx: &GgufContext, reader: &mut dyn BufRead) -> Result<f32, GgufLoadError> {
        Ok(util::read_f32(reader)?)
    }

    fn read_bool(_ctx: &GgufContext, reader: &mut dyn BufRead) -> Result<bool, GgufLoadError> {
        Ok(util::read_bool(reader)?)
    }

    fn read_string(ctx: &GgufContext, reader: &mut dyn BufRead) -> Result<String, GgufLoadError> {
        read_string(ctx, reader)
    }

    fn read_array(
        ctx: &GgufContext,
        reader: &mut dyn BufRead,
    ) -> Result<MetadataArrayValue, GgufLoadError> {
        MetadataArrayValue::read_value(ctx, reader)
    }

    fn read_u64(_ctx: &GgufContext, reader: &mut dyn BufRead) -> Result<u64, GgufLoadError> {
        Ok(util::read_u64(reader)?)
    }

    fn read_i64(_ctx: &GgufContext, reader: &mut dyn BufRead) -> Result<i64, GgufLoadError> {
        Ok(util::read_i64(reader)?)
    }

    fn read_f64(_ctx: &GgufContext, reader: &mut dyn BufRead) -> Result<f64, GgufLoadError> {
        Ok(util::read_f64(reader)?)
    }
}

/// A homogeneous array of metadata values.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum MetadataArrayValue {
    UInt8(Vec<u8>),
    Int8(Vec<i8>),
    UInt16(Vec<u16>),
    Int16(Vec<i16>),
    UInt32(Vec<u32>),
    Int32(Vec<i32>),
    Float32(Vec<f32>),
    Bool(Vec<bool>),
    String(Vec<String>),
    Array(Vec<MetadataArrayValue>),
    UInt64(Vec<u64>),
    Int64(Vec<i64>),
    Float64(Vec<f64>),
}
// Public
impl MetadataArrayValue {
    /// Returns the elements if this is a `f32` array.
    pub fn as_float32_array(&self) -> Option<&[f32]> {
        match self {
            Self::Float32(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the elements if this is a `u32` array.
    pub fn as_uint32_array(&self) -> Option<&[u32]> {
        match self {
            Self::UInt32(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the elements if this is a string array.
    pub fn as_string_array(&self) -> Option<&[String]> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// The type tag of the array's elements.
    pub fn element_type(&self) -> MetadataValueType {
        match self {
            Self::UInt8(_) => MetadataValueType::UInt8,
            Self::Int8(_) => MetadataValueType::Int8,
            Self::UInt16(_) => MetadataValueType::UInt16,
            Self::Int16(_) => MetadataValueType::Int16,
            Self::UInt32(_) => MetadataValueType::UInt32,
            Self::Int32(_) => MetadataValueType::Int32,
            Self::Float32(_) => MetadataValueType::Float32,
            Self::Bool(_) => MetadataValueType::Bool,
            Self::String(_) => MetadataValueType::String,
            Self::Array(_) => MetadataValueType::Array,
            Self::UInt64(_) => MetadataValueType::UInt64,
            Self::Int64(_) => MetadataValueType::Int64,
            Self::Float64(_) => MetadataValueType::Float64,
        }
    }

    /// Returns the number of elements in the array.
    pub fn len(&self) -> usize {
        match self {
            Self::UInt8(v) => v.len(),
            Self::Int8(v) => v.len(),
            Self::UInt16(v) => v.len(),
            Self::Int16(v) => v.len(),
            Self::UInt32(v) => v.len(),
            Self::Int32(v) => v.len(),
            Self::Float32(v) => v.len(),
            Self::Bool(v) => v.len(),
            Self::String(v) => v.len(),
            Self::Array(v) => v.len(),
            Self::UInt64(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::Float64(v) => v.len(),
        }
    }

    /// Returns true if the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
impl MetadataArrayValue {
    fn read_value(ctx: &GgufContext, reader: &mut dyn BufRead) -> Result<Self, GgufLoadError> {
        let raw_type = util::read_u32(reader)?;
        let value_type = MetadataValueType::try_from(raw_type)
            .map_err(|()| GgufLoadError::UnsupportedValueType {
                value_type: raw_type,
            })?;
        let length = usize::try_from(util::read_length(reader, ctx.use_64_bit_length)?)?;

        struct ArrayReader<'a> {
            ctx: &'a GgufContext,
            reader: &'a mut dyn BufRead,
            length: usize,
        }
        impl ArrayReader<'_> {
            fn read<T>(
                &mut self,
                value_reader: impl Fn(&GgufContext, &mut dyn BufRead) -> Result<T, GgufLoadError>,
                value_constructor: impl Fn(Vec<T>) -> MetadataArrayValue,
            ) -> Result<MetadataArrayValue, GgufLoadError> {
                (0..self.length)
                    .map(|_| value_reader(self.ctx, self.reader))
                    .collect::<Result<Vec<T>, _>>()
                    .map(value_constructor)
            }
        }

        let mut reader = ArrayReader {
            ctx,
            reader,
            length,
        };
        use MetadataValue as MV;
        use MetadataValueType as MVT;
        match value_type {
            MVT::UInt8 => reader.read(MV::read_u8, Self::UInt8),
            MVT::Int8 => reader.read(MV::read_i8, Self::Int8),
            MVT::UInt16 => reader.read(MV::read_u16, Self::UInt16),
            MVT::Int16 => reader.read(MV::read_i16, Self::Int16),
            MVT::UInt32 => reader.read(MV::read_u32, Self::UInt32),
            MVT::Int32 => reader.read(MV::read_i32, Self::Int32),
            MVT::Float32 => reader.read(MV::read_f32, Self::Float32),
            MVT::Bool => reader.read(MV::read_bool, Self::Bool),
            MVT::String => reader.read(MV::read_string, Self::String),
            MVT::Array => reader.read(MV::read_array, Self::Array),
            MVT::UInt64 => reader.read(MV::read_u64, Self::UInt64),
            MVT::Int64 => reader.read(MV::read_i64, Self::Int64),
            MVT::Float64 => reader.read(MV::read_f64, Self::Float64),
        }
    }
}

/// The parsed metadata section: entries in file order, with exact-key lookup.
///
/// Keys are unique within a container; the entry order is preserved for
/// introspection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    entries: Vec<(String, MetadataValue)>,
    index: HashMap<String, usize>,
}

impl Metadata {
    pub(crate) fn read(
        ctx: &GgufContext,
        reader: &mut dyn BufRead,
        count: usize,
    ) -> Result<Self, GgufLoadError> {
        let mut metadata = Self {
            entries: Vec::with_capacity(count),
            index: HashMap::with_capacity(count),
        };
        for _ in 0..count {
            let (key, value) = MetadataValue::read_key_value(ctx, reader)?;
            metadata.insert(key, value);
        }
        Ok(metadata)
    }

    pub(crate) fn insert(&mut self, key: String, value: MetadataValue) {
        match self.index.get(&key) {
            // Later duplicates win, matching a map-backed reader.
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    /// Returns the position of `key` in the entry list, if present.
    pub fn find(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Returns the entries in file order.
    pub fn entries(&self) -> &[(String, MetadataValue)] {
        &self.entries
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Gets the value for `key`, if present.
    pub fn get_optional(&self, key: &str) -> Option<&MetadataValue> {
        self.find(key).map(|i| &self.entries[i].1)
    }

    /// Gets the value for `key`, failing if it is absent.
    pub fn get(&self, key: &str) -> Result<&MetadataValue, MetadataError> {
        self.get_optional(key).ok_or_else(|| MetadataError::MissingKey {
            key: key.to_owned(),
        })
    }

    /// Gets a `u32` value, failing if the key is absent or the value has
    /// another type.
    pub fn get_uint32(&self, key: &str) -> Result<u32, MetadataError> {
        let value = self.get(key)?;
        value
            .as_uint32()
            .ok_or_else(|| invalid_type(key, MetadataValueType::UInt32, value))
    }

    /// Gets a `f32` value, failing if the key is absent or the value has
    /// another type.
    pub fn get_float32(&self, key: &str) -> Result<f32, MetadataError> {
        let value = self.get(key)?;
        value
            .as_float32()
            .ok_or_else(|| invalid_type(key, MetadataValueType::Float32, value))
    }

    /// Gets a `bool` value, failing if the key is absent or the value has
    /// another type.
    pub fn get_bool(&self, key: &str) -> Result<bool, MetadataError> {
        let value = self.get(key)?;
        value
            .as_bool()
            .ok_or_else(|| invalid_type(key, MetadataValueType::Bool, value))
    }

    /// Gets a string value, failing if the key is absent or the value has
    /// another type.
    pub fn get_str(&self, key: &str) -> Result<&str, MetadataError> {
        let value = self.get(key)?;
        value
            .as_string()
            .ok_or_else(|| invalid_type(key, MetadataValueType::String, value))
    }

    /// Gets an unsigned count (`u32` or `u64`) as a `usize`.
    pub fn get_countable(&self, key: &str) -> Result<usize, MetadataError> {
        let value = self.get(key)?;
        match value {
            MetadataValue::UInt32(v) => Ok(usize::try_from(*v)?),
            MetadataValue::UInt64(v) => Ok(usize::try_from(*v)?),
            _ => Err(MetadataError::InvalidType {
                key: key.to_owned(),
                expected_type: MetadataValueType::UInt64,
                actual_type: value.value_type(),
            }),
        }
    }

    /// Gets a `f32` array value, failing if the key is absent or the value
    /// is not an array of `f32`.
    pub fn get_float32_array(&self, key: &str) -> Result<&[f32], MetadataError> {
        let value = self.get(key)?;
        value
            .as_array()
            .and_then(|a| a.as_float32_array())
            .ok_or_else(|| invalid_type(key, MetadataValueType::Array, value))
    }

    /// Gets a string array value, failing if the key is absent or the value
    /// is not an array of strings.
    pub fn get_string_array(&self, key: &str) -> Result<&[String], MetadataError> {
        let value = self.get(key)?;
        value
            .as_array()
            .and_then(|a| a.as_string_array())
            .ok_or_else(|| invalid_type(key, MetadataValueType::Array, value))
    }
}

fn invalid_type(
    key: &str,
    expected_type: MetadataValueType,
    value: &MetadataValue,
) -> MetadataError {
    MetadataError::InvalidType {
        key: key.to_owned(),
        expected_type,
        actual_type: value.value_type(),
    }
}

#[derive(Error, Debug)]
/// Errors encountered when reading typed values from the metadata directory.
pub enum MetadataError {
    /// The model expected a metadata key-value pair, but the key was missing.
    #[error("missing metadata key {key:?}")]
    MissingKey {
        /// The key that was missing.
        key: String,
    },
    /// The metadata key-value pair was not of the expected type.
    #[error("metadata key {key:?} was not of the expected type")]
    InvalidType {
        /// The key with the invalid type.
        key: String,
        /// The expected type.
        expected_type: MetadataValueType,
        /// The actual type.
        actual_type: MetadataValueType,
    },
    #[error("invalid integer conversion")]
    /// One of the integers encountered could not be converted to a more
    /// appropriate type.
    InvalidIntegerConversion(#[from] std::num::TryFromIntError),
}
