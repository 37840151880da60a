//! The key and tensor name schemes of the container.
//!
//! Metadata keys use a dotted `blip2.<submodel>.<field>` namespace; keys
//! shared between submodels are kept as `{arch}` templates and formatted at
//! lookup time. Tensor names are formatted from the layer index and the
//! per-field stems below. Formatting is a pure function of its inputs, so a
//! given (template, submodel, index, part) always produces the same name.

use std::fmt;

/// The three submodels of a BLIP2 checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Submodel {
    Vision,
    QFormer,
    Text,
}

impl Submodel {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Submodel::Vision => "vision",
            Submodel::QFormer => "q_former",
            Submodel::Text => "text",
        }
    }
}

impl fmt::Display for Submodel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Fixed metadata keys.
pub(crate) const KEY_VISION_USE_GELU: &str = "blip2.vision.use_gelu";
pub(crate) const KEY_QFORMER_USE_GELU: &str = "blip2.q_former.use_gelu";
pub(crate) const KEY_IMAGE_SIZE: &str = "blip2.vision.image_size";
pub(crate) const KEY_PATCH_SIZE: &str = "blip2.vision.patch_size";
pub(crate) const KEY_PROJECTION_DIM: &str = "blip2.vision.projection_dim";
pub(crate) const KEY_IMAGE_MEAN: &str = "blip2.vision.image_mean";
pub(crate) const KEY_IMAGE_STD: &str = "blip2.vision.image_std";
pub(crate) const KEY_NUM_QUERY_TOKENS: &str = "blip2.q_former.num_query_tokens";
pub(crate) const KEY_CROSS_ATTENTION_FREQUENCY: &str =
    "blip2.q_former.cross_attention_frequency";
pub(crate) const KEY_ENCODER_HIDDEN_SIZE: &str = "blip2.q_former.encoder_hidden_size";
pub(crate) const KEY_WORD_EMBED_PROJ_DIM: &str = "blip2.text.word_embed_proj_dim";
pub(crate) const KEY_TOKEN_LIST: &str = "tokenizer.ggml.tokens";

// Metadata keys namespaced by submodel.
pub(crate) const KEY_EMBEDDING_LENGTH: &str = "blip2.{arch}.embedding_length";
pub(crate) const KEY_BLOCK_COUNT: &str = "blip2.{arch}.block_count";
pub(crate) const KEY_ATTENTION_HEAD_COUNT: &str = "blip2.{arch}.attention.head_count";
pub(crate) const KEY_FEED_FORWARD_LENGTH: &str = "blip2.{arch}.feed_forward_length";
pub(crate) const KEY_ATTENTION_LAYERNORM_EPS: &str =
    "blip2.{arch}.attention.layer_norm_epsilon";
pub(crate) const KEY_CONTEXT_LENGTH: &str = "blip2.{arch}.context_length";

/// Substitutes the submodel name into a `{arch}` key template.
pub(crate) fn submodel_key(template: &str, submodel: Submodel) -> String {
    template.replace("{arch}", submodel.as_str())
}

// Model-level vision tensors.
pub(crate) const VISION_PATCH_EMBEDDING: &str = "vision_model.embeddings.patch_embedding";
pub(crate) const VISION_CLASS_EMBEDDING: &str = "vision_model.embeddings.class_embedding";
pub(crate) const VISION_POSITION_EMBEDDING: &str = "vision_model.embeddings.position_embedding";
pub(crate) const VISION_POST_LAYERNORM: &str = "vision_model.post_layernorm";

// Per-layer vision tensor stems.
pub(crate) const SELF_ATTN_QKV: &str = "self_attn.qkv";
pub(crate) const SELF_ATTN_PROJECTION: &str = "self_attn.projection";
pub(crate) const LAYER_NORM_1: &str = "layer_norm1";
pub(crate) const MLP_FC1: &str = "mlp.fc1";
pub(crate) const MLP_FC2: &str = "mlp.fc2";
pub(crate) const LAYER_NORM_2: &str = "layer_norm2";

/// Formats the name of a per-layer vision tensor stem for layer `i`.
pub(crate) fn vision_layer(i: usize, stem: &str) -> String {
    format!("vision_model.encoder.layers.{i}.{stem}")
}

/// Appends the `.weight` part to a tensor stem.
pub(crate) fn weight(stem: &str) -> String {
    format!("{stem}.weight")
}

/// Appends the `.bias` part to a tensor stem.
pub(crate) fn bias(stem: &str) -> String {
    format!("{stem}.bias")
}
