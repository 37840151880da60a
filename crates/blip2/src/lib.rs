//! A loader for BLIP2-style image-captioning models stored in a single GGUF
//! container.
//!
//! The container interleaves a key-value metadata section, a tensor
//! directory, and a contiguous tensor-data blob. [load] parses the
//! directories, sizes and reserves one arena for every payload, streams the
//! payload bytes in, and wires the named tensors into a typed model
//! structure: the vision tower fully bound, the Q-Former and text decoder
//! carrying their hyperparameters. Everything is read eagerly; a returned
//! [Blip2] is immutable and self-contained.
//!
//! Image preprocessing for the vision tower lives in [image]; it is
//! independent of model loading, and a decode failure never affects an
//! already-loaded model.
#![deny(missing_docs)]

pub use gguf;

use gguf::{Gguf, Metadata, MetadataError, Tensor};

mod loader;
mod names;
mod vocabulary;

pub mod image;

pub use loader::{load, load_progress_callback_stdout, LoadError, LoadProgress};
pub use vocabulary::{TokenId, Vocabulary};

use loader::TensorBinder;
use names::Submodel;

/// Structural configuration of the vision tower, read once at load time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisionHyperparameters {
    /// Side length of the square input image, in pixels.
    pub image_size: usize,
    /// Side length of one image patch, in pixels.
    pub patch_size: usize,
    /// Size of the per-patch embedding.
    pub embedding_length: usize,
    /// Number of encoder blocks.
    pub block_count: usize,
    /// Number of attention heads.
    pub head_count: usize,
    /// Size of the feed-forward hidden layer.
    pub feed_forward_length: usize,
    /// Size of the image-text projection.
    pub projection_dim: usize,
    /// Epsilon used by the layer norms.
    pub layer_norm_epsilon: f32,
}

impl VisionHyperparameters {
    fn read(metadata: &Metadata) -> Result<Self, MetadataError> {
        let arch = Submodel::Vision;
        Ok(Self {
            image_size: metadata.get_countable(names::KEY_IMAGE_SIZE)?,
            patch_size: metadata.get_countable(names::KEY_PATCH_SIZE)?,
            embedding_length: metadata
                .get_countable(&names::submodel_key(names::KEY_EMBEDDING_LENGTH, arch))?,
            block_count: metadata
                .get_countable(&names::submodel_key(names::KEY_BLOCK_COUNT, arch))?,
            head_count: metadata
                .get_countable(&names::submodel_key(names::KEY_ATTENTION_HEAD_COUNT, arch))?,
            feed_forward_length: metadata
                .get_countable(&names::submodel_key(names::KEY_FEED_FORWARD_LENGTH, arch))?,
            projection_dim: metadata.get_countable(names::KEY_PROJECTION_DIM)?,
            layer_norm_epsilon: metadata
                .get_float32(&names::submodel_key(names::KEY_ATTENTION_LAYERNORM_EPS, arch))?,
        })
    }
}

/// Structural configuration of the Q-Former bridge, read once at load time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QFormerHyperparameters {
    /// Size of the vision features the Q-Former cross-attends into.
    pub encoder_hidden_size: usize,
    /// Size of the query embedding.
    pub embedding_length: usize,
    /// Number of blocks.
    pub block_count: usize,
    /// Number of attention heads.
    pub head_count: usize,
    /// Size of the feed-forward hidden layer.
    pub feed_forward_length: usize,
    /// Maximum number of positions.
    pub context_length: usize,
    /// Epsilon used by the layer norms.
    pub layer_norm_epsilon: f32,
}

impl QFormerHyperparameters {
    fn read(metadata: &Metadata) -> Result<Self, MetadataError> {
        let arch = Submodel::QFormer;
        Ok(Self {
            encoder_hidden_size: metadata.get_countable(names::KEY_ENCODER_HIDDEN_SIZE)?,
            embedding_length: metadata
                .get_countable(&names::submodel_key(names::KEY_EMBEDDING_LENGTH, arch))?,
            block_count: metadata
                .get_countable(&names::submodel_key(names::KEY_BLOCK_COUNT, arch))?,
            head_count: metadata
                .get_countable(&names::submodel_key(names::KEY_ATTENTION_HEAD_COUNT, arch))?,
            feed_forward_length: metadata
                .get_countable(&names::submodel_key(names::KEY_FEED_FORWARD_LENGTH, arch))?,
            context_length: metadata
                .get_countable(&names::submodel_key(names::KEY_CONTEXT_LENGTH, arch))?,
            layer_norm_epsilon: metadata
                .get_float32(&names::submodel_key(names::KEY_ATTENTION_LAYERNORM_EPS, arch))?,
        })
    }
}

/// Structural configuration of the text decoder, read once at load time.
///
/// The container carries only the fields below for the text submodel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextHyperparameters {
    /// Maximum number of positions.
    pub context_length: usize,
    /// Size of the token embedding.
    pub embedding_length: usize,
    /// Size of the word-embedding projection.
    pub word_embed_proj_dim: usize,
    /// Number of attention heads.
    pub head_count: usize,
    /// Number of decoder blocks.
    pub block_count: usize,
}

impl TextHyperparameters {
    fn read(metadata: &Metadata) -> Result<Self, MetadataError> {
        let arch = Submodel::Text;
        Ok(Self {
            context_length: metadata
                .get_countable(&names::submodel_key(names::KEY_CONTEXT_LENGTH, arch))?,
            embedding_length: metadata
                .get_countable(&names::submodel_key(names::KEY_EMBEDDING_LENGTH, arch))?,
            word_embed_proj_dim: metadata.get_countable(names::KEY_WORD_EMBED_PROJ_DIM)?,
            head_count: metadata
                .get_countable(&names::submodel_key(names::KEY_ATTENTION_HEAD_COUNT, arch))?,
            block_count: metadata
                .get_countable(&names::submodel_key(names::KEY_BLOCK_COUNT, arch))?,
        })
    }
}

/// The weights of one vision encoder block.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct VisionLayer {
    // attention
    pub qkv_weight: Tensor,
    pub qkv_bias: Tensor,
    pub projection_weight: Tensor,
    pub projection_bias: Tensor,

    // layernorm 1
    pub layer_norm1_weight: Tensor,
    pub layer_norm1_bias: Tensor,

    // ff
    pub fc1_weight: Tensor,
    pub fc1_bias: Tensor,
    pub fc2_weight: Tensor,
    pub fc2_bias: Tensor,

    // layernorm 2
    pub layer_norm2_weight: Tensor,
    pub layer_norm2_bias: Tensor,
}

/// The vision tower: embeddings, encoder blocks, and the post layer norm.
#[derive(Debug, Clone)]
pub struct VisionModel {
    /// The tower's structural configuration.
    pub hyperparameters: VisionHyperparameters,

    /// Patch embedding convolution weight.
    pub patch_embedding_weight: Tensor,
    /// Patch embedding bias.
    pub patch_embedding_bias: Tensor,
    /// The learned class token embedding.
    pub class_embedding: Tensor,
    /// Position embeddings for the class token and every patch.
    pub position_embedding: Tensor,

    /// Encoder blocks, index-addressed; `layers[i]` was bound from the
    /// container names formatted with index `i`.
    pub layers: Vec<VisionLayer>,

    /// Final layer norm weight.
    pub post_layernorm_weight: Tensor,
    /// Final layer norm bias.
    pub post_layernorm_bias: Tensor,
}

impl VisionModel {
    fn new(
        hyperparameters: VisionHyperparameters,
        tensors: &TensorBinder,
    ) -> Result<Self, LoadError> {
        let patch_embedding_weight =
            tensors.bind(&names::weight(names::VISION_PATCH_EMBEDDING))?;
        let patch_embedding_bias = tensors.bind(&names::bias(names::VISION_PATCH_EMBEDDING))?;
        let class_embedding = tensors.bind(names::VISION_CLASS_EMBEDDING)?;
        let position_embedding = tensors.bind(names::VISION_POSITION_EMBEDDING)?;

        let mut layers = Vec::with_capacity(hyperparameters.block_count);
        for i in 0..hyperparameters.block_count {
            layers.push(VisionLayer {
                qkv_weight: tensors
                    .bind(&names::weight(&names::vision_layer(i, names::SELF_ATTN_QKV)))?,
                qkv_bias: tensors
                    .bind(&names::bias(&names::vision_layer(i, names::SELF_ATTN_QKV)))?,
                projection_weight: tensors.bind(&names::weight(&names::vision_layer(
                    i,
                    names::SELF_ATTN_PROJECTION,
                )))?,
                projection_bias: tensors.bind(&names::bias(&names::vision_layer(
                    i,
                    names::SELF_ATTN_PROJECTION,
                )))?,
                layer_norm1_weight: tensors
                    .bind(&names::weight(&names::vision_layer(i, names::LAYER_NORM_1)))?,
                layer_norm1_bias: tensors
                    .bind(&names::bias(&names::vision_layer(i, names::LAYER_NORM_1)))?,
                fc1_weight: tensors
                    .bind(&names::weight(&names::vision_layer(i, names::MLP_FC1)))?,
                fc1_bias: tensors.bind(&names::bias(&names::vision_layer(i, names::MLP_FC1)))?,
                fc2_weight: tensors
                    .bind(&names::weight(&names::vision_layer(i, names::MLP_FC2)))?,
                fc2_bias: tensors.bind(&names::bias(&names::vision_layer(i, names::MLP_FC2)))?,
                layer_norm2_weight: tensors
                    .bind(&names::weight(&names::vision_layer(i, names::LAYER_NORM_2)))?,
                layer_norm2_bias: tensors
                    .bind(&names::bias(&names::vision_layer(i, names::LAYER_NORM_2)))?,
            });
        }

        let post_layernorm_weight = tensors.bind(&names::weight(names::VISION_POST_LAYERNORM))?;
        let post_layernorm_bias = tensors.bind(&names::bias(names::VISION_POST_LAYERNORM))?;

        Ok(Self {
            hyperparameters,
            patch_embedding_weight,
            patch_embedding_bias,
            class_embedding,
            position_embedding,
            layers,
            post_layernorm_weight,
            post_layernorm_bias,
        })
    }
}

/// The Q-Former bridge between vision features and the text decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct QFormerModel {
    /// The bridge's structural configuration.
    pub hyperparameters: QFormerHyperparameters,
}

/// The text decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct TextModel {
    /// The decoder's structural configuration.
    pub hyperparameters: TextHyperparameters,
}

/// A fully-loaded model: configuration, bound tensors, and the storage
/// backing them.
///
/// The struct is immutable after [load] returns and may be shared freely
/// across threads. Dropping it releases the tensor arena first and the
/// parsed container directory after it, on every path.
pub struct Blip2 {
    /// Whether the vision tower uses the exact GELU activation.
    pub vision_gelu: bool,
    /// Whether the Q-Former uses the exact GELU activation.
    pub qformer_gelu: bool,
    /// Number of learned query tokens fed to the Q-Former.
    pub num_query_tokens: u32,
    /// Every how many Q-Former blocks a cross-attention block appears.
    pub cross_attention_frequency: u32,
    /// Per-channel mean subtracted during preprocessing.
    pub image_mean: [f32; 3],
    /// Per-channel standard deviation divided out during preprocessing.
    pub image_std: [f32; 3],

    /// The vision tower.
    pub vision_model: VisionModel,
    /// The Q-Former bridge.
    pub qformer_model: QFormerModel,
    /// The text decoder.
    pub text_model: TextModel,

    /// The vocabulary embedded in the container.
    pub vocabulary: Vocabulary,

    // Field order is teardown order: the arena handle goes before the
    // parsed container.
    arena: std::sync::Arc<[u8]>,
    container: Gguf,
}

impl Blip2 {
    /// The size in bytes of the arena backing all model tensors.
    pub fn context_size(&self) -> usize {
        self.arena.len()
    }

    /// The parsed container directories, for introspection.
    pub fn container(&self) -> &Gguf {
        &self.container
    }

    /// Resizes and normalizes `image` into the vision tower's expected
    /// input, using the container's normalization constants.
    pub fn preprocess_image(&self, source: &image::ImageU8) -> image::ImageF32 {
        image::preprocess(
            source,
            self.vision_model.hyperparameters.image_size,
            self.image_mean,
            self.image_std,
        )
    }
}
