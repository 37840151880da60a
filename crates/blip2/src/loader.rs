//! Loading a model from a container file on disk.
//!
//! Loading is single-threaded and synchronous: directory parsing, sizing,
//! allocation, and payload reads run strictly in sequence, and a load either
//! completes fully or fails without exposing partial state.

use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader, Seek, SeekFrom},
    path::Path,
    sync::Arc,
};

use gguf::{
    AllocationError, Arena, FileMagic, Gguf, GgufLoadError, MetadataError, Tensor,
};
use thiserror::Error;

use crate::{
    names, Blip2, QFormerHyperparameters, QFormerModel, TextHyperparameters, TextModel,
    VisionHyperparameters, VisionModel, Vocabulary,
};

/// Helper trait that implements traits required for reading.
pub trait Source: BufRead + Seek {}
impl<S: BufRead + Seek> Source for S {}

/// Each variant represents a step within the process of loading the model.
/// These can be used to report progress to the user.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum LoadProgress {
    /// The hyperparameters have been loaded from the model.
    HyperparametersLoaded,
    /// The tensor arena has been sized.
    ContextSize {
        /// The size of the arena backing all tensors.
        bytes: usize,
    },
    /// A tensor's payload has been copied into the arena.
    TensorLoaded {
        /// The current tensor (0-indexed).
        current_tensor: usize,
        /// The number of total tensors.
        tensor_count: usize,
    },
    /// The model has finished fully loading.
    Loaded {
        /// The number of bytes in the file.
        file_size: u64,
        /// The number of tensors in the container.
        tensor_count: usize,
    },
}

#[derive(Error, Debug)]
/// Errors encountered during the loading process.
pub enum LoadError {
    #[error("the file does not exist")]
    /// The file does not exist.
    FileDoesNotExist,
    #[error("could not open file")]
    /// A file failed to open.
    OpenFileFailed {
        /// The original error.
        source: std::io::Error,
    },
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
    #[error("invalid magic value {magic}")]
    /// An invalid magic value was encountered during the loading process.
    InvalidMagic {
        /// The magic value that was encountered.
        magic: FileMagic,
    },
    #[error("unsupported container format version {version}")]
    /// The version of the format is not supported.
    InvalidFormatVersion {
        /// The version that was encountered.
        version: u32,
    },
    #[error("invalid element type {element_type} for tensor `{tensor_name}`")]
    /// The tensor `tensor_name` had an unsupported element type.
    UnsupportedElementType {
        /// The name of the tensor.
        tensor_name: String,
        /// The element type that was encountered.
        element_type: u32,
    },
    #[error("tensor {tensor_name} has an unsupported number of dimensions ({dimensions})")]
    /// A tensor declared more dimensions than the format allows.
    UnsupportedDimensionCount {
        /// The name of the tensor.
        tensor_name: String,
        /// The number of dimensions that were encountered.
        dimensions: usize,
    },
    #[error("{0}")]
    /// A metadata key was missing or held a value of the wrong type.
    Metadata(#[from] MetadataError),
    #[error("unknown tensor `{tensor_name}`")]
    /// The tensor `tensor_name` is required for this model architecture,
    /// but was not found in the container.
    UnknownTensor {
        /// The full formatted name of the tensor.
        tensor_name: String,
    },
    #[error("{0}")]
    /// The arena's backing allocation failed.
    AllocationFailed(#[from] AllocationError),
    #[error("failed to read tensor `{tensor_name}` at file offset {offset}")]
    /// A tensor's payload could not be read from the file.
    TensorRead {
        /// The name of the tensor whose payload failed to read.
        tensor_name: String,
        /// The absolute file offset of the payload.
        offset: u64,
        /// The original error.
        #[source]
        source: std::io::Error,
    },
    #[error("invariant broken: {0}")]
    /// An invariant was broken.
    InvariantBroken(String),
}

impl From<GgufLoadError> for LoadError {
    fn from(value: GgufLoadError) -> Self {
        match value {
            GgufLoadError::InvalidMagic(magic) => LoadError::InvalidMagic { magic },
            GgufLoadError::InvalidFormatVersion(version) => {
                LoadError::InvalidFormatVersion { version }
            }
            GgufLoadError::Io(err) => LoadError::Io(err),
            GgufLoadError::InvalidUtf8(err) => LoadError::InvalidUtf8(err),
            GgufLoadError::InvalidIntegerConversion(err) => {
                LoadError::InvalidIntegerConversion(err)
            }
            GgufLoadError::UnsupportedValueType { value_type } => LoadError::InvariantBroken(
                format!("unsupported metadata value type {value_type}"),
            ),
            GgufLoadError::UnsupportedElementType { tensor_name, ftype } => {
                LoadError::UnsupportedElementType {
                    tensor_name,
                    element_type: ftype,
                }
            }
            GgufLoadError::UnsupportedDimensionCount {
                tensor_name,
                dimensions,
            } => LoadError::UnsupportedDimensionCount {
                tensor_name,
                dimensions,
            },
            GgufLoadError::InvariantBroken(message) => LoadError::InvariantBroken(message),
        }
    }
}

/// Loads the model from the container at `path`.
///
/// `load_progress_callback` is a diagnostic hook; it receives a
/// [LoadProgress] event at each stage and may do nothing.
pub fn load(
    path: &Path,
    mut load_progress_callback: impl FnMut(LoadProgress),
) -> Result<Blip2, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileDoesNotExist);
    }

    let file = File::open(path).map_err(|e| LoadError::OpenFileFailed { source: e })?;
    let file_size = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    tracing::trace!("Opened model file at {:?}", path);

    let gguf = Gguf::load(&mut reader)?;
    tracing::trace!(
        "Parsed container directories: {} metadata entries, {} tensors",
        gguf.metadata.len(),
        gguf.tensor_count()
    );

    let metadata = &gguf.metadata;
    let vision_gelu = metadata.get_bool(names::KEY_VISION_USE_GELU)?;
    let qformer_gelu = metadata.get_bool(names::KEY_QFORMER_USE_GELU)?;
    let num_query_tokens = metadata.get_uint32(names::KEY_NUM_QUERY_TOKENS)?;
    let cross_attention_frequency =
        metadata.get_uint32(names::KEY_CROSS_ATTENTION_FREQUENCY)?;
    let image_mean = read_normalization(metadata, names::KEY_IMAGE_MEAN)?;
    let image_std = read_normalization(metadata, names::KEY_IMAGE_STD)?;

    let vision_hyperparameters = VisionHyperparameters::read(metadata)?;
    let qformer_hyperparameters = QFormerHyperparameters::read(metadata)?;
    let text_hyperparameters = TextHyperparameters::read(metadata)?;
    let vocabulary = Vocabulary::read(metadata)?;
    (load_progress_callback)(LoadProgress::HyperparametersLoaded);

    let ctx_size = context_size(&gguf, |_| true);
    let vision_size = context_size(&gguf, |name| name.starts_with("vision_model."));
    tracing::debug!(
        "Context size: {ctx_size} bytes, of which {vision_size} for the vision tower"
    );
    (load_progress_callback)(LoadProgress::ContextSize { bytes: ctx_size });

    let arena = Arena::reserve(ctx_size)?;
    let tensors = TensorLoader {
        source: &mut reader,
        gguf: &gguf,
        arena,
    }
    .load_all(&mut load_progress_callback)?;

    let vision_model = VisionModel::new(vision_hyperparameters, &tensors)?;
    let qformer_model = QFormerModel {
        hyperparameters: qformer_hyperparameters,
    };
    let text_model = TextModel {
        hyperparameters: text_hyperparameters,
    };

    (load_progress_callback)(LoadProgress::Loaded {
        file_size,
        tensor_count: gguf.tensor_count(),
    });
    tracing::trace!("Loaded model");

    Ok(Blip2 {
        vision_gelu,
        qformer_gelu,
        num_query_tokens,
        cross_attention_frequency,
        image_mean,
        image_std,
        vision_model,
        qformer_model,
        text_model,
        vocabulary,
        arena: tensors.finish(),
        container: gguf,
    })
}

/// A implementation for `load_progress_callback` that outputs to `stdout`.
pub fn load_progress_callback_stdout(progress: LoadProgress) {
    match progress {
        LoadProgress::HyperparametersLoaded => println!("Loaded hyperparameters"),
        LoadProgress::ContextSize { bytes } => println!(
            "Arena size = {:.2} MB",
            bytes as f64 / (1024.0 * 1024.0)
        ),
        LoadProgress::TensorLoaded {
            current_tensor,
            tensor_count,
        } => {
            let current_tensor = current_tensor + 1;
            if current_tensor % 8 == 0 {
                println!("Loaded tensor {current_tensor}/{tensor_count}");
            }
        }
        LoadProgress::Loaded {
            file_size,
            tensor_count,
        } => {
            println!("Loading of model complete");
            println!(
                "Model size = {:.2} MB / num tensors = {}",
                file_size as f64 / 1024.0 / 1024.0,
                tensor_count
            );
        }
    };
}

/// Bytes needed to hold the selected tensors: padded payloads plus the
/// fixed per-tensor bookkeeping charge.
fn context_size(gguf: &Gguf, select: impl Fn(&str) -> bool) -> usize {
    gguf.tensor_infos()
        .iter()
        .filter(|info| select(&info.name))
        .map(|info| info.n_bytes_padded(gguf.alignment()) + Arena::TENSOR_OVERHEAD)
        .sum()
}

fn read_normalization(
    metadata: &gguf::Metadata,
    key: &str,
) -> Result<[f32; 3], LoadError> {
    let values = metadata.get_float32_array(key)?;
    <[f32; 3]>::try_from(values).map_err(|_| {
        LoadError::InvariantBroken(format!(
            "{key} must have exactly 3 entries, found {}",
            values.len()
        ))
    })
}

struct TensorLoader<'a> {
    source: &'a mut dyn Source,
    gguf: &'a Gguf,
    arena: Arena,
}

impl TensorLoader<'_> {
    /// Copies every payload into the arena in directory order, then freezes
    /// the arena and hands out name-addressable views. A seek or read
    /// failure aborts the whole load; the partially filled arena is
    /// released with the loader.
    fn load_all(
        mut self,
        progress_callback: &mut dyn FnMut(LoadProgress),
    ) -> Result<TensorBinder, LoadError> {
        let tensor_count = self.gguf.tensor_count();
        let alignment = self.gguf.alignment();
        let data_position = self.gguf.tensor_data_position();

        let mut slots = Vec::with_capacity(tensor_count);
        for (current_tensor, info) in self.gguf.tensor_infos().iter().enumerate() {
            let slot = self.arena.alloc(info.n_bytes_padded(alignment))?;
            let offset = data_position + info.offset;

            self.source
                .seek(SeekFrom::Start(offset))
                .and_then(|_| {
                    self.source
                        .read_exact(self.arena.slot_mut(slot, info.n_bytes()))
                })
                .map_err(|source| LoadError::TensorRead {
                    tensor_name: info.name.clone(),
                    offset,
                    source,
                })?;

            slots.push(slot);
            (progress_callback)(LoadProgress::TensorLoaded {
                current_tensor,
                tensor_count,
            });
        }

        let data = self.arena.freeze();
        let tensors = self
            .gguf
            .tensor_infos()
            .iter()
            .zip(slots)
            .map(|(info, slot)| {
                (
                    info.name.clone(),
                    Tensor::new(
                        info.name.clone(),
                        &info.dimensions,
                        info.element_type,
                        Arc::clone(&data),
                        slot,
                    ),
                )
            })
            .collect();

        Ok(TensorBinder { tensors, data })
    }
}

/// Name-addressable tensor views over the frozen arena, used to wire the
/// model structure together.
pub(crate) struct TensorBinder {
    tensors: HashMap<String, Tensor>,
    data: Arc<[u8]>,
}

impl TensorBinder {
    /// Resolves a fully-qualified tensor name to its view.
    pub(crate) fn bind(&self, name: &str) -> Result<Tensor, LoadError> {
        self.tensors
            .get(name)
            .cloned()
            .ok_or_else(|| LoadError::UnknownTensor {
                tensor_name: name.to_owned(),
            })
    }

    /// Hands back the arena storage once binding is complete.
    pub(crate) fn finish(self) -> Arc<[u8]> {
        self.data
    }
}
