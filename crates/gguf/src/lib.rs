//! Pure-Rust support for the GGUF model container format: a single binary
//! file holding a self-describing key-value metadata section, a tensor
//! directory, and a contiguous blob of tensor payload bytes.
//!
//! The crate splits loading into the phases a model loader needs to drive
//! separately: [Gguf::load] parses the metadata and tensor directories
//! without touching payload bytes, [Arena] reserves one contiguous region
//! sized from the directory, and [Tensor] views are carved out of the
//! frozen arena once payloads have been copied in. [writer::GgufWriter]
//! produces containers with the same layout, which is also how the test
//! suite builds its fixtures.
#![deny(missing_docs)]

mod arena;
mod container;
mod tensor;

pub mod metadata;
pub mod util;
pub mod writer;

pub use arena::{AllocationError, Arena};
pub use container::{
    FileMagic, Gguf, TensorInfo, DEFAULT_ALIGNMENT, FILE_MAGIC_GGUF, MAX_DIMENSIONS,
};
pub use metadata::{Metadata, MetadataArrayValue, MetadataError, MetadataValue, MetadataValueType};
pub use tensor::Tensor;
pub use writer::GgufWriter;

#[cfg(test)]
mod tests;

/// The type of a tensor element.
///
/// Type ids follow the GGML numbering; quantized ids are recognized but not
/// supported by this crate and are reported as such rather than misread.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// Float 32-bit.
    F32,
    /// Float 16-bit.
    F16,
    /// Integer 8-bit.
    I8,
    /// Integer 16-bit.
    I16,
    /// Integer 32-bit.
    I32,
}

impl Type {
    /// Size of one element in bytes.
    pub fn element_size(self) -> usize {
        match self {
            Type::F32 => 4,
            Type::F16 => 2,
            Type::I8 => 1,
            Type::I16 => 2,
            Type::I32 => 4,
        }
    }
}

impl TryFrom<u32> for Type {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Type::F32),
            1 => Ok(Type::F16),
            16 => Ok(Type::I8),
            17 => Ok(Type::I16),
            18 => Ok(Type::I32),
            _ => Err(()),
        }
    }
}

impl From<Type> for u32 {
    fn from(value: Type) -> Self {
        match value {
            Type::F32 => 0,
            Type::F16 => 1,
            Type::I8 => 16,
            Type::I16 => 17,
            Type::I32 => 18,
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Type::F32 => "f32",
                Type::F16 => "f16",
                Type::I8 => "i8",
                Type::I16 => "i16",
                Type::I32 => "i32",
            }
        )
    }
}

#[derive(Debug, thiserror::Error)]
/// Errors that can occur while parsing a container.
pub enum GgufLoadError {
    #[error("invalid file magic number: {0}")]
    /// The file magic number is invalid.
    InvalidMagic(FileMagic),
    #[error("unsupported format version {0}")]
    /// An unsupported format version was found.
    InvalidFormatVersion(u32),
    #[error("non-specific I/O error")]
    /// A non-specific IO error.
    Io(#[from] std::io::Error),
    #[error("could not convert bytes to a UTF-8 string")]
    /// One of the strings encountered was not valid UTF-8.
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("invalid integer conversion")]
    /// One of the integers encountered could not be converted to a more
    /// appropriate type.
    InvalidIntegerConversion(#[from] std::num::TryFromIntError),
    #[error("unsupported metadata value type {value_type}")]
    /// A metadata value had a type tag this crate does not know.
    UnsupportedValueType {
        /// The type tag that was encountered.
        value_type: u32,
    },
    #[error("unsupported tensor type {ftype} for tensor {tensor_name}")]
    /// One of the tensors encountered had an unsupported data type.
    UnsupportedElementType {
        /// The name of the tensor.
        tensor_name: String,
        /// The format type that was encountered.
        ftype: u32,
    },
    #[error(
        "tensor {tensor_name} has {dimensions} dimensions, but at most {MAX_DIMENSIONS} are supported"
    )]
    /// A tensor declared more dimensions than the format allows.
    UnsupportedDimensionCount {
        /// The name of the tensor.
        tensor_name: String,
        /// The number of dimensions that were encountered.
        dimensions: usize,
    },
    #[error("invariant broken: {0}")]
    /// An invariant was broken.
    InvariantBroken(String),
}
