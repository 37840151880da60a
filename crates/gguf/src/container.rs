//! Parsing of the container header and tensor directory.

use std::{
    collections::HashMap,
    io::{BufRead, Seek, SeekFrom},
};

use crate::{metadata::Metadata, util, GgufLoadError, Type};

/// Magic constant for GGUF files (`GGUF` in little-endian byte order).
pub const FILE_MAGIC_GGUF: u32 = 0x4655_4747;

/// Default data-section alignment, used when the container does not declare
/// one via the `general.alignment` metadata key.
pub const DEFAULT_ALIGNMENT: u32 = 32;

/// The maximum number of dimensions a tensor may declare. Trailing
/// dimensions of size 1 may be omitted.
pub const MAX_DIMENSIONS: usize = 4;

/// State shared between the container codepaths while reading; GGUF version
/// 1 uses 32-bit lengths and counts, later versions 64-bit.
pub(crate) struct GgufContext {
    pub use_64_bit_length: bool,
}

pub(crate) fn read_string(
    ctx: &GgufContext,
    reader: &mut dyn BufRead,
) -> Result<String, GgufLoadError> {
    let len = usize::try_from(util::read_length(reader, ctx.use_64_bit_length)?)?;
    let mut bytes = util::read_bytes_with_len(reader, len)?;
    // Some early GGUF writers null-terminated their strings; strip it.
    if bytes.last() == Some(&0) {
        bytes.pop();
    }
    Ok(String::from_utf8(bytes)?)
}

fn align_offset(offset: u64, alignment: u64) -> u64 {
    offset + (alignment - offset % alignment) % alignment
}

/// A parsed container: the metadata directory, the tensor directory, and the
/// position of the data section. No payload bytes are read at parse time.
#[derive(Debug, Clone, PartialEq)]
pub struct Gguf {
    /// The metadata directory.
    pub metadata: Metadata,
    tensor_infos: Vec<TensorInfo>,
    tensor_index: HashMap<String, usize>,
    alignment: u64,
    tensor_data_position: u64,
}

impl Gguf {
    /// Parses a container from `reader`, leaving payload bytes untouched.
    pub fn load<R: BufRead + Seek>(reader: &mut R) -> Result<Self, GgufLoadError> {
        let magic = util::read_u32(reader)?;
        if magic != FILE_MAGIC_GGUF {
            return Err(GgufLoadError::InvalidMagic(FileMagic(magic)));
        }
        let version = util::read_u32(reader)?;
        let ctx = match version {
            1 => GgufContext {
                use_64_bit_length: false,
            },
            2 | 3 => GgufContext {
                use_64_bit_length: true,
            },
            _ => return Err(GgufLoadError::InvalidFormatVersion(version)),
        };

        let tensor_count = usize::try_from(util::read_length(reader, ctx.use_64_bit_length)?)?;
        let metadata_kv_count = usize::try_from(util::read_length(reader, ctx.use_64_bit_length)?)?;

        let metadata = Metadata::read(&ctx, reader, metadata_kv_count)?;

        let alignment = u64::from(
            metadata
                .get_optional("general.alignment")
                .and_then(|v| v.as_uint32())
                .unwrap_or(DEFAULT_ALIGNMENT),
        );

        let mut tensor_infos = Vec::with_capacity(tensor_count);
        let mut tensor_index = HashMap::with_capacity(tensor_count);
        for _ in 0..tensor_count {
            let info = TensorInfo::read(&ctx, reader)?;
            if tensor_index
                .insert(info.name.clone(), tensor_infos.len())
                .is_some()
            {
                return Err(GgufLoadError::InvariantBroken(format!(
                    "duplicate tensor name {}",
                    info.name
                )));
            }
            tensor_infos.push(info);
        }

        let tensor_data_position = align_offset(reader.stream_position()?, alignment);

        Ok(Gguf {
            metadata,
            tensor_infos,
            tensor_index,
            alignment,
            tensor_data_position,
        })
    }

    /// The data-section alignment in bytes. Payloads are padded to this.
    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    /// Absolute file position where tensor payload bytes begin. A tensor's
    /// payload lives at `tensor_data_position() + info.offset`.
    pub fn tensor_data_position(&self) -> u64 {
        self.tensor_data_position
    }

    /// The number of tensors in the directory.
    pub fn tensor_count(&self) -> usize {
        self.tensor_infos.len()
    }

    /// The tensor descriptors, in the order their payloads appear in the
    /// data section.
    pub fn tensor_infos(&self) -> &[TensorInfo] {
        &self.tensor_infos
    }

    /// Looks up a tensor descriptor by exact name.
    pub fn tensor_info(&self, name: &str) -> Option<&TensorInfo> {
        self.tensor_index.get(name).map(|&i| &self.tensor_infos[i])
    }

    /// Total bytes occupied by all payloads, each padded to the alignment.
    /// This is the figure to budget with; the data section is physically
    /// padded between tensors.
    pub fn total_padded_size(&self) -> usize {
        self.tensor_infos
            .iter()
            .map(|info| info.n_bytes_padded(self.alignment))
            .sum()
    }
}

/// Information about one tensor in the directory. Describes where the
/// payload lives and how large it is; holds no payload bytes itself.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorInfo {
    /// The name of the tensor. Unique within a container.
    pub name: String,
    /// The dimensions of the tensor, fastest-varying first.
    pub dimensions: Vec<usize>,
    /// The type of the tensor's elements.
    pub element_type: Type,
    /// Start of the payload, relative to the start of the data section.
    pub offset: u64,
}

impl TensorInfo {
    fn read(ctx: &GgufContext, reader: &mut dyn BufRead) -> Result<Self, GgufLoadError> {
        let name = read_string(ctx, reader)?;

        let dimension_count = usize::try_from(util::read_u32(reader)?)?;
        if dimension_count > MAX_DIMENSIONS {
            return Err(GgufLoadError::UnsupportedDimensionCount {
                tensor_name: name,
                dimensions: dimension_count,
            });
        }
        let dimensions = (0..dimension_count)
            .map(|_| Ok(usize::try_from(util::read_length(reader, ctx.use_64_bit_length)?)?))
            .collect::<Result<Vec<_>, GgufLoadError>>()?;

        let ftype = util::read_u32(reader)?;
        let element_type = Type::try_from(ftype).map_err(|()| {
            GgufLoadError::UnsupportedElementType {
                tensor_name: name.clone(),
                ftype,
            }
        })?;

        let offset = util::read_u64(reader)?;

        Ok(Self {
            name,
            dimensions,
            element_type,
            offset,
        })
    }

    /// The number of elements in the tensor.
    pub fn n_elements(&self) -> usize {
        self.dimensions.iter().product()
    }

    /// The size of the tensor's payload in bytes.
    pub fn n_bytes(&self) -> usize {
        self.n_elements() * self.element_type.element_size()
    }

    /// The payload size rounded up to the container alignment. The next
    /// tensor's payload starts this many bytes after this one's offset.
    pub fn n_bytes_padded(&self, alignment: u64) -> usize {
        let alignment = alignment as usize;
        (self.n_bytes() + alignment - 1) / alignment * alignment
    }

    /// Reads the tensor's payload from `reader` into an owned buffer, given
    /// the container's data-section position.
    pub fn read_data<R: BufRead + Seek>(
        &self,
        reader: &mut R,
        data_position: u64,
    ) -> std::io::Result<Vec<u8>> {
        let mut data = vec![0; self.n_bytes()];
        reader.seek(SeekFrom::Start(data_position + self.offset))?;
        reader.read_exact(&mut data)?;
        Ok(data)
    }
}

/// Helper struct that wraps the magic number of a file format, so that it
/// can be printed in a human-readable format.
pub struct FileMagic(pub u32);
impl std::fmt::Display for FileMagic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:x} ({})",
            self.0,
            String::from_utf8_lossy(&self.0.to_le_bytes())
        )
    }
}
impl std::fmt::Debug for FileMagic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}
