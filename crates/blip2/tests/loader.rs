//! End-to-end loading tests over synthetic containers.

use std::{
    io::Cursor,
    path::PathBuf,
    sync::atomic::{AtomicUsize, Ordering},
};

use blip2::{LoadError, LoadProgress};
use gguf::{GgufWriter, MetadataError, Type};

const EMBD: usize = 8;
const FF: usize = 16;
const PATCH: usize = 2;
const IMAGE_SIZE: usize = 8;
const IMAGE_MEAN: [f32; 3] = [0.48145467, 0.4578275, 0.40821072];
const IMAGE_STD: [f32; 3] = [0.26862955, 0.2613026, 0.2757771];

/// Deterministic per-tensor payload so independent loads can be compared
/// byte-for-byte.
fn payload(name: &str, n_bytes: usize) -> Vec<u8> {
    let seed = name
        .bytes()
        .fold(0u8, |acc, byte| acc.wrapping_mul(31).wrapping_add(byte));
    (0..n_bytes)
        .map(|i| seed.wrapping_add(i as u8))
        .collect()
}

fn add_tensor(writer: &mut GgufWriter, name: &str, dims: &[usize]) {
    let n_bytes = dims.iter().product::<usize>() * Type::F32.element_size();
    writer
        .add_tensor(name, dims, Type::F32, &payload(name, n_bytes))
        .unwrap();
}

/// A well-formed container with `block_count` vision layers.
fn model_writer(block_count: usize) -> GgufWriter {
    let mut writer = GgufWriter::new();

    writer.add_bool("blip2.vision.use_gelu", false);
    writer.add_uint32("blip2.vision.image_size", IMAGE_SIZE as u32);
    writer.add_uint32("blip2.vision.patch_size", PATCH as u32);
    writer.add_uint32("blip2.vision.embedding_length", EMBD as u32);
    writer.add_uint32("blip2.vision.feed_forward_length", FF as u32);
    writer.add_uint32("blip2.vision.projection_dim", 4);
    writer.add_uint32("blip2.vision.attention.head_count", 2);
    writer.add_float32("blip2.vision.attention.layer_norm_epsilon", 1e-5);
    writer.add_uint32("blip2.vision.block_count", block_count as u32);
    writer.add_float32_array("blip2.vision.image_mean", &IMAGE_MEAN);
    writer.add_float32_array("blip2.vision.image_std", &IMAGE_STD);

    writer.add_bool("blip2.q_former.use_gelu", true);
    writer.add_uint32("blip2.q_former.num_query_tokens", 32);
    writer.add_uint32("blip2.q_former.cross_attention_frequency", 2);
    writer.add_uint32("blip2.q_former.encoder_hidden_size", EMBD as u32);
    writer.add_uint32("blip2.q_former.embedding_length", 6);
    writer.add_uint32("blip2.q_former.feed_forward_length", 12);
    writer.add_float32("blip2.q_former.attention.layer_norm_epsilon", 1e-12);
    writer.add_uint32("blip2.q_former.context_length", 64);
    writer.add_uint32("blip2.q_former.attention.head_count", 2);
    writer.add_uint32("blip2.q_former.block_count", 2);

    writer.add_uint32("blip2.text.context_length", 32);
    writer.add_uint32("blip2.text.embedding_length", 10);
    writer.add_uint32("blip2.text.word_embed_proj_dim", 5);
    writer.add_uint32("blip2.text.attention.head_count", 2);
    writer.add_uint32("blip2.text.block_count", 2);

    writer.add_string_array(
        "tokenizer.ggml.tokens",
        &["</s>".to_string(), "a".to_string(), "panda".to_string()],
    );

    add_tensor(
        &mut writer,
        "vision_model.embeddings.patch_embedding.weight",
        &[PATCH, PATCH, 3, EMBD],
    );
    add_tensor(
        &mut writer,
        "vision_model.embeddings.patch_embedding.bias",
        &[EMBD],
    );
    add_tensor(&mut writer, "vision_model.embeddings.class_embedding", &[EMBD]);
    let n_positions = (IMAGE_SIZE / PATCH) * (IMAGE_SIZE / PATCH) + 1;
    add_tensor(
        &mut writer,
        "vision_model.embeddings.position_embedding",
        &[EMBD, n_positions],
    );

    for i in 0..block_count {
        let layer = |stem: &str| format!("vision_model.encoder.layers.{i}.{stem}");
        add_tensor(&mut writer, &layer("self_attn.qkv.weight"), &[EMBD, 3 * EMBD]);
        add_tensor(&mut writer, &layer("self_attn.qkv.bias"), &[3 * EMBD]);
        add_tensor(
            &mut writer,
            &layer("self_attn.projection.weight"),
            &[EMBD, EMBD],
        );
        add_tensor(&mut writer, &layer("self_attn.projection.bias"), &[EMBD]);
        add_tensor(&mut writer, &layer("layer_norm1.weight"), &[EMBD]);
        add_tensor(&mut writer, &layer("layer_norm1.bias"), &[EMBD]);
        add_tensor(&mut writer, &layer("mlp.fc1.weight"), &[EMBD, FF]);
        add_tensor(&mut writer, &layer("mlp.fc1.bias"), &[FF]);
        add_tensor(&mut writer, &layer("mlp.fc2.weight"), &[FF, EMBD]);
        add_tensor(&mut writer, &layer("mlp.fc2.bias"), &[EMBD]);
        add_tensor(&mut writer, &layer("layer_norm2.weight"), &[EMBD]);
        add_tensor(&mut writer, &layer("layer_norm2.bias"), &[EMBD]);
    }

    add_tensor(&mut writer, "vision_model.post_layernorm.weight", &[EMBD]);
    add_tensor(&mut writer, "vision_model.post_layernorm.bias", &[EMBD]);

    writer
}

fn container_bytes(writer: &GgufWriter) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    writer.write_to(&mut cursor).unwrap();
    cursor.into_inner()
}

/// Writes container bytes to a fresh temp file and returns its path.
fn write_model_file(bytes: &[u8]) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let path = std::env::temp_dir().join(format!(
        "blip2-loader-test-{}-{}.gguf",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::write(&path, bytes).unwrap();
    path
}

fn load_writer(writer: &GgufWriter) -> Result<blip2::Blip2, LoadError> {
    let path = write_model_file(&container_bytes(writer));
    let result = blip2::load(&path, |_| {});
    std::fs::remove_file(&path).ok();
    result
}

#[test]
fn loads_a_well_formed_container() {
    let model = load_writer(&model_writer(2)).unwrap();

    assert!(!model.vision_gelu);
    assert!(model.qformer_gelu);
    assert_eq!(model.num_query_tokens, 32);
    assert_eq!(model.cross_attention_frequency, 2);
    assert_eq!(model.image_mean, IMAGE_MEAN);
    assert_eq!(model.image_std, IMAGE_STD);

    let vision = &model.vision_model;
    assert_eq!(vision.hyperparameters.image_size, IMAGE_SIZE);
    assert_eq!(vision.hyperparameters.patch_size, PATCH);
    assert_eq!(vision.hyperparameters.embedding_length, EMBD);
    assert_eq!(vision.hyperparameters.block_count, 2);
    assert_eq!(vision.hyperparameters.head_count, 2);
    assert_eq!(vision.hyperparameters.feed_forward_length, FF);
    assert_eq!(vision.hyperparameters.layer_norm_epsilon, 1e-5);
    assert_eq!(vision.layers.len(), 2);

    assert_eq!(
        vision.patch_embedding_weight.dims(),
        &[PATCH, PATCH, 3, EMBD]
    );
    assert_eq!(vision.position_embedding.dims(), &[EMBD, 17]);
    assert_eq!(vision.layers[0].qkv_weight.dims(), &[EMBD, 3 * EMBD]);
    assert_eq!(vision.layers[1].fc2_weight.dims(), &[FF, EMBD]);

    // Payloads land in the arena byte-for-byte.
    assert_eq!(
        vision.class_embedding.data(),
        payload(
            "vision_model.embeddings.class_embedding",
            EMBD * Type::F32.element_size()
        )
    );
    assert_eq!(
        vision.layers[1].layer_norm2_bias.data(),
        payload(
            "vision_model.encoder.layers.1.layer_norm2.bias",
            EMBD * Type::F32.element_size()
        )
    );

    assert_eq!(model.qformer_model.hyperparameters.embedding_length, 6);
    assert_eq!(model.qformer_model.hyperparameters.context_length, 64);
    assert_eq!(model.text_model.hyperparameters.word_embed_proj_dim, 5);

    assert_eq!(model.vocabulary.len(), 3);
    assert_eq!(model.vocabulary.id("panda"), Some(2));
    assert_eq!(model.vocabulary.token(0), Some("</s>"));
}

#[test]
fn loading_twice_yields_identical_contexts() {
    let writer = model_writer(2);
    let first = load_writer(&writer).unwrap();
    let second = load_writer(&writer).unwrap();

    assert_eq!(
        first.vision_model.hyperparameters,
        second.vision_model.hyperparameters
    );
    assert_eq!(first.qformer_model, second.qformer_model);
    assert_eq!(first.text_model, second.text_model);
    assert_eq!(first.vocabulary, second.vocabulary);
    assert_eq!(first.context_size(), second.context_size());

    let pairs = [
        (
            &first.vision_model.patch_embedding_weight,
            &second.vision_model.patch_embedding_weight,
        ),
        (
            &first.vision_model.position_embedding,
            &second.vision_model.position_embedding,
        ),
        (
            &first.vision_model.layers[0].fc1_weight,
            &second.vision_model.layers[0].fc1_weight,
        ),
        (
            &first.vision_model.post_layernorm_bias,
            &second.vision_model.post_layernorm_bias,
        ),
    ];
    for (a, b) in pairs {
        assert_eq!(a.dims(), b.dims());
        assert_eq!(a.data(), b.data());
    }
}

#[test]
fn missing_activation_flag_fails_before_any_binding() {
    let mut writer = model_writer(2);
    writer.remove("blip2.vision.use_gelu");

    match load_writer(&writer) {
        Err(LoadError::Metadata(MetadataError::MissingKey { key })) => {
            assert_eq!(key, "blip2.vision.use_gelu");
        }
        other => panic!("expected MissingKey, got {:?}", other.err()),
    }
}

#[test]
fn mistyped_hyperparameter_names_the_key() {
    let mut writer = model_writer(2);
    writer.add_string("blip2.vision.image_size", "224");

    match load_writer(&writer) {
        Err(LoadError::Metadata(MetadataError::InvalidType { key, .. })) => {
            assert_eq!(key, "blip2.vision.image_size");
        }
        other => panic!("expected InvalidType, got {:?}", other.err()),
    }
}

#[test]
fn missing_layer_tensor_names_the_exact_tensor() {
    let mut writer = model_writer(4);
    writer.remove_tensor("vision_model.encoder.layers.3.layer_norm2.bias");

    match load_writer(&writer) {
        Err(LoadError::UnknownTensor { tensor_name }) => {
            assert_eq!(
                tensor_name,
                "vision_model.encoder.layers.3.layer_norm2.bias"
            );
        }
        other => panic!("expected UnknownTensor, got {:?}", other.err()),
    }
}

#[test]
fn wrong_normalization_length_is_rejected() {
    let mut writer = model_writer(2);
    writer.add_float32_array("blip2.vision.image_mean", &[0.5, 0.5]);

    match load_writer(&writer) {
        Err(LoadError::InvariantBroken(message)) => {
            assert!(message.contains("blip2.vision.image_mean"), "{message}");
        }
        other => panic!("expected InvariantBroken, got {:?}", other.err()),
    }
}

#[test]
fn truncated_data_section_fails_atomically() {
    let writer = model_writer(2);
    let bytes = container_bytes(&writer);

    // Cut into the last tensor's payload.
    let truncated = &bytes[..bytes.len() - 16];
    let path = write_model_file(truncated);
    match blip2::load(&path, |_| {}) {
        Err(LoadError::TensorRead { tensor_name, .. }) => {
            assert_eq!(tensor_name, "vision_model.post_layernorm.bias");
        }
        other => panic!("expected TensorRead, got {:?}", other.err()),
    }
    std::fs::remove_file(&path).ok();

    // The failure poisons nothing; the intact container still loads.
    load_writer(&writer).unwrap();
}

#[test]
fn nonexistent_file_is_reported() {
    let path = std::env::temp_dir().join("blip2-loader-test-does-not-exist.gguf");
    assert!(matches!(
        blip2::load(&path, |_| {}),
        Err(LoadError::FileDoesNotExist)
    ));
}

#[test]
fn progress_reports_every_stage_in_order() {
    let writer = model_writer(2);
    let path = write_model_file(&container_bytes(&writer));
    let mut events = Vec::new();
    let model = blip2::load(&path, |progress| events.push(progress)).unwrap();
    std::fs::remove_file(&path).ok();

    let tensor_count = model.container().tensor_count();
    assert_eq!(events[0], LoadProgress::HyperparametersLoaded);
    assert_eq!(
        events[1],
        LoadProgress::ContextSize {
            bytes: model.context_size()
        }
    );
    let loaded: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, LoadProgress::TensorLoaded { .. }))
        .collect();
    assert_eq!(loaded.len(), tensor_count);
    assert!(matches!(
        events.last(),
        Some(LoadProgress::Loaded { .. })
    ));
}
