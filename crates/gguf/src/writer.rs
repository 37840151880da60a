//! Writing GGUF containers.
//!
//! Builds the metadata section and tensor directory in memory, assigning
//! cumulative aligned payload offsets, then serializes everything in one
//! pass. Containers written here satisfy the directory invariants the
//! reader relies on: payloads appear in directory order and
//! `offset(i + 1) == offset(i) + padded_len(i)`.

use std::io::{Seek, Write};

use crate::{
    container::{DEFAULT_ALIGNMENT, FILE_MAGIC_GGUF},
    metadata::{MetadataArrayValue, MetadataValue},
    util, Type,
};

/// The container version written by [GgufWriter].
const WRITE_VERSION: u32 = 2;

#[derive(Debug, thiserror::Error)]
/// Errors that can occur while writing a container.
pub enum SaveError {
    #[error("non-specific I/O error")]
    /// A non-specific IO error.
    Io(#[from] std::io::Error),
    #[error("invalid integer conversion")]
    /// One of the integers encountered could not be converted to a more
    /// appropriate type.
    InvalidIntegerConversion(#[from] std::num::TryFromIntError),
    #[error("invariant broken: {0}")]
    /// An invariant was broken.
    InvariantBroken(String),
}

struct PendingTensor {
    name: String,
    dimensions: Vec<usize>,
    element_type: Type,
    offset: u64,
    data: Vec<u8>,
}

/// Builder for a GGUF container.
pub struct GgufWriter {
    metadata: Vec<(String, MetadataValue)>,
    tensors: Vec<PendingTensor>,
    alignment: u64,
    next_offset: u64,
}

impl Default for GgufWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl GgufWriter {
    /// Creates a writer using the default data-section alignment.
    pub fn new() -> Self {
        Self {
            metadata: Vec::new(),
            tensors: Vec::new(),
            alignment: u64::from(DEFAULT_ALIGNMENT),
            next_offset: 0,
        }
    }

    /// Adds a metadata entry. Re-adding a key overwrites the earlier value.
    pub fn add_value(&mut self, key: impl Into<String>, value: MetadataValue) {
        let key = key.into();
        match self.metadata.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.metadata.push((key, value)),
        }
    }

    /// Adds a `u32` metadata entry.
    pub fn add_uint32(&mut self, key: impl Into<String>, value: u32) {
        self.add_value(key, MetadataValue::UInt32(value));
    }

    /// Adds a `f32` metadata entry.
    pub fn add_float32(&mut self, key: impl Into<String>, value: f32) {
        self.add_value(key, MetadataValue::Float32(value));
    }

    /// Adds a `bool` metadata entry.
    pub fn add_bool(&mut self, key: impl Into<String>, value: bool) {
        self.add_value(key, MetadataValue::Bool(value));
    }

    /// Adds a string metadata entry.
    pub fn add_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.add_value(key, MetadataValue::String(value.into()));
    }

    /// Adds a `f32` array metadata entry.
    pub fn add_float32_array(&mut self, key: impl Into<String>, values: &[f32]) {
        self.add_value(
            key,
            MetadataValue::Array(MetadataArrayValue::Float32(values.to_vec())),
        );
    }

    /// Adds a string array metadata entry.
    pub fn add_string_array(&mut self, key: impl Into<String>, values: &[String]) {
        self.add_value(
            key,
            MetadataValue::Array(MetadataArrayValue::String(values.to_vec())),
        );
    }

    /// Removes a metadata entry, if present.
    pub fn remove(&mut self, key: &str) {
        self.metadata.retain(|(k, _)| k != key);
    }

    /// Registers a tensor. Payloads are laid out in registration order,
    /// each padded to the alignment.
    pub fn add_tensor(
        &mut self,
        name: impl Into<String>,
        dimensions: &[usize],
        element_type: Type,
        data: &[u8],
    ) -> Result<(), SaveError> {
        let name = name.into();
        let n_elements: usize = dimensions.iter().product();
        let expected = n_elements * element_type.element_size();
        if data.len() != expected {
            return Err(SaveError::InvariantBroken(format!(
                "tensor {name}: {} data bytes given, shape requires {expected}",
                data.len()
            )));
        }

        let padded =
            (data.len() as u64 + self.alignment - 1) / self.alignment * self.alignment;
        let offset = self.next_offset;
        self.next_offset += padded;

        self.tensors.push(PendingTensor {
            name,
            dimensions: dimensions.to_vec(),
            element_type,
            offset,
            data: data.to_vec(),
        });
        Ok(())
    }

    /// Removes a registered tensor by name and re-assigns the offsets of
    /// the tensors after it, keeping the directory invariants intact.
    pub fn remove_tensor(&mut self, name: &str) {
        self.tensors.retain(|t| t.name != name);
        self.next_offset = 0;
        for tensor in &mut self.tensors {
            tensor.offset = self.next_offset;
            let padded = (tensor.data.len() as u64 + self.alignment - 1) / self.alignment
                * self.alignment;
            self.next_offset += padded;
        }
    }

    /// Serializes the container.
    pub fn write_to<W: Write + Seek>(&self, writer: &mut W) -> Result<(), SaveError> {
        util::write_u32(writer, FILE_MAGIC_GGUF)?;
        util::write_u32(writer, WRITE_VERSION)?;
        util::write_u64(writer, self.tensors.len() as u64)?;
        util::write_u64(writer, self.metadata.len() as u64)?;

        for (key, value) in &self.metadata {
            util::write_string(writer, true, key)?;
            util::write_u32(writer, value.value_type() as u32)?;
            write_value(writer, value)?;
        }

        for tensor in &self.tensors {
            util::write_string(writer, true, &tensor.name)?;
            util::write_u32(writer, tensor.dimensions.len().try_into()?)?;
            for &dim in &tensor.dimensions {
                util::write_u64(writer, dim as u64)?;
            }
            util::write_u32(writer, tensor.element_type.into())?;
            util::write_u64(writer, tensor.offset)?;
        }

        // Data section starts at the next aligned position.
        let position = writer.stream_position()?;
        let padding = (self.alignment - position % self.alignment) % self.alignment;
        util::write_zero_bytes(writer, usize::try_from(padding)?)?;

        for tensor in &self.tensors {
            writer.write_all(&tensor.data)?;
            let padded = (tensor.data.len() as u64 + self.alignment - 1) / self.alignment
                * self.alignment;
            util::write_zero_bytes(writer, usize::try_from(padded)? - tensor.data.len())?;
        }

        Ok(())
    }
}

fn write_value(writer: &mut dyn Write, value: &MetadataValue) -> Result<(), SaveError> {
    match value {
        MetadataValue::UInt8(v) => util::write_u8(writer, *v)?,
        MetadataValue::Int8(v) => util::write_i8(writer, *v)?,
        MetadataValue::UInt16(v) => util::write_u16(writer, *v)?,
        MetadataValue::Int16(v) => util::write_i16(writer, *v)?,
        MetadataValue::UInt32(v) => util::write_u32(writer, *v)?,
        MetadataValue::Int32(v) => util::write_i32(writer, *v)?,
        MetadataValue::Float32(v) => util::write_f32(writer, *v)?,
        MetadataValue::Bool(v) => util::write_bool(writer, *v)?,
        MetadataValue::String(v) => util::write_string(writer, true, v)?,
        MetadataValue::Array(v) => write_array_value(writer, v)?,
        MetadataValue::UInt64(v) => util::write_u64(writer, *v)?,
        MetadataValue::Int64(v) => util::write_i64(writer, *v)?,
        MetadataValue::Float64(v) => util::write_f64(writer, *v)?,
    }
    Ok(())
}

fn write_array_value(
    writer: &mut dyn Write,
    value: &MetadataArrayValue,
) -> Result<(), SaveError> {
    util::write_u32(writer, value.element_type() as u32)?;
    util::write_u64(writer, value.len() as u64)?;
    use MetadataArrayValue as MAV;
    match value {
        MAV::UInt8(vs) => vs.iter().try_for_each(|v| util::write_u8(writer, *v))?,
        MAV::Int8(vs) => vs.iter().try_for_each(|v| util::write_i8(writer, *v))?,
        MAV::UInt16(vs) => vs.iter().try_for_each(|v| util::write_u16(writer, *v))?,
        MAV::Int16(vs) => vs.iter().try_for_each(|v| util::write_i16(writer, *v))?,
        MAV::UInt32(vs) => vs.iter().try_for_each(|v| util::write_u32(writer, *v))?,
        MAV::Int32(vs) => vs.iter().try_for_each(|v| util::write_i32(writer, *v))?,
        MAV::Float32(vs) => vs.iter().try_for_each(|v| util::write_f32(writer, *v))?,
        MAV::Bool(vs) => vs.iter().try_for_each(|v| util::write_bool(writer, *v))?,
        MAV::String(vs) => vs
            .iter()
            .try_for_each(|v| util::write_string(writer, true, v))?,
        MAV::Array(vs) => vs.iter().try_for_each(|v| write_array_value(writer, v))?,
        MAV::UInt64(vs) => vs.iter().try_for_each(|v| util::write_u64(writer, *v))?,
        MAV::Int64(vs) => vs.iter().try_for_each(|v| util::write_i64(writer, *v))?,
        MAV::Float64(vs) => vs.iter().try_for_each(|v| util::write_f64(writer, *v))?,
    }
    Ok(())
}
