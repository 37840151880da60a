use std::io::Cursor;

use rand::{distributions::Standard, Rng, SeedableRng};

use crate::{
    metadata::{MetadataArrayValue, MetadataError, MetadataValue},
    util, Arena, Gguf, GgufLoadError, GgufWriter, Tensor, Type, DEFAULT_ALIGNMENT,
    FILE_MAGIC_GGUF,
};

fn rng() -> rand::rngs::StdRng {
    rand::rngs::StdRng::seed_from_u64(0x5eed)
}

fn sample_writer() -> GgufWriter {
    let mut rng = rng();
    let mut writer = GgufWriter::new();
    writer.add_uint32("example.block_count", 12);
    writer.add_float32("example.layer_norm_epsilon", 1e-5);
    writer.add_bool("example.use_gelu", true);
    writer.add_string("general.architecture", "example");
    writer.add_float32_array("example.image_mean", &[0.48145467, 0.4578275, 0.40821072]);
    writer.add_string_array(
        "tokenizer.ggml.tokens",
        &["<s>".to_string(), "</s>".to_string(), "hello".to_string()],
    );

    for (i, dims) in [vec![4usize], vec![3, 5], vec![2, 2, 2]].iter().enumerate() {
        let n_bytes = dims.iter().product::<usize>() * Type::F32.element_size();
        let data: Vec<u8> = (&mut rng).sample_iter(Standard).take(n_bytes).collect();
        writer
            .add_tensor(format!("tensor_{i}"), dims, Type::F32, &data)
            .unwrap();
    }
    writer
}

fn load(writer: &GgufWriter) -> (Gguf, Cursor<Vec<u8>>) {
    let mut cursor = Cursor::new(Vec::new());
    writer.write_to(&mut cursor).unwrap();
    cursor.set_position(0);
    let gguf = Gguf::load(&mut cursor).unwrap();
    (gguf, cursor)
}

#[test]
fn can_roundtrip_metadata_and_directory() {
    let writer = sample_writer();
    let (gguf, mut cursor) = load(&writer);

    // Entry order is preserved and lookup is by exact key.
    assert_eq!(gguf.metadata.len(), 6);
    assert_eq!(gguf.metadata.find("example.block_count"), Some(0));
    assert_eq!(gguf.metadata.entries()[3].0, "general.architecture");

    assert_eq!(gguf.metadata.get_uint32("example.block_count").unwrap(), 12);
    assert_eq!(
        gguf.metadata
            .get_float32("example.layer_norm_epsilon")
            .unwrap(),
        1e-5
    );
    assert!(gguf.metadata.get_bool("example.use_gelu").unwrap());
    assert_eq!(
        gguf.metadata.get_str("general.architecture").unwrap(),
        "example"
    );
    assert_eq!(
        gguf.metadata.get_float32_array("example.image_mean").unwrap(),
        &[0.48145467, 0.4578275, 0.40821072]
    );
    assert_eq!(
        gguf.metadata
            .get_string_array("tokenizer.ggml.tokens")
            .unwrap()
            .len(),
        3
    );
    assert_eq!(gguf.metadata.get_countable("example.block_count").unwrap(), 12);

    assert_eq!(gguf.tensor_count(), 3);
    let infos = gguf.tensor_infos();
    assert_eq!(infos[0].name, "tensor_0");
    assert_eq!(infos[1].dimensions, vec![3, 5]);
    assert_eq!(infos[2].element_type, Type::F32);

    // Payloads come back byte-for-byte.
    let mut rng = rng();
    for info in infos {
        let expected: Vec<u8> = (&mut rng)
            .sample_iter(Standard)
            .take(info.n_bytes())
            .collect();
        let data = info
            .read_data(&mut cursor, gguf.tensor_data_position())
            .unwrap();
        assert_eq!(data, expected, "payload mismatch for {}", info.name);
    }
}

#[test]
fn directory_offsets_are_cumulative_padded_sizes() {
    let writer = sample_writer();
    let (gguf, _) = load(&writer);

    let alignment = gguf.alignment();
    assert_eq!(alignment, u64::from(DEFAULT_ALIGNMENT));

    let infos = gguf.tensor_infos();
    let mut expected_offset = 0u64;
    for info in infos {
        assert_eq!(info.offset, expected_offset);
        expected_offset += info.n_bytes_padded(alignment) as u64;
    }
    assert_eq!(gguf.total_padded_size() as u64, expected_offset);

    // The data section itself starts at an aligned position.
    assert_eq!(gguf.tensor_data_position() % alignment, 0);
}

#[test]
fn missing_key_and_type_mismatch_name_the_key() {
    let writer = sample_writer();
    let (gguf, _) = load(&writer);

    match gguf.metadata.get_uint32("example.head_count") {
        Err(MetadataError::MissingKey { key }) => assert_eq!(key, "example.head_count"),
        other => panic!("expected MissingKey, got {other:?}"),
    }

    match gguf.metadata.get_uint32("general.architecture") {
        Err(MetadataError::InvalidType { key, .. }) => assert_eq!(key, "general.architecture"),
        other => panic!("expected InvalidType, got {other:?}"),
    }

    match gguf.metadata.get_float32_array("example.block_count") {
        Err(MetadataError::InvalidType { key, .. }) => assert_eq!(key, "example.block_count"),
        other => panic!("expected InvalidType, got {other:?}"),
    }
}

#[test]
fn rejects_invalid_magic() {
    let mut cursor = Cursor::new(Vec::new());
    util::write_u32(&mut cursor, 0x6767_6d6c).unwrap();
    util::write_u32(&mut cursor, 2).unwrap();
    cursor.set_position(0);
    assert!(matches!(
        Gguf::load(&mut cursor),
        Err(GgufLoadError::InvalidMagic(_))
    ));
}

#[test]
fn rejects_unknown_version() {
    let mut cursor = Cursor::new(Vec::new());
    util::write_u32(&mut cursor, FILE_MAGIC_GGUF).unwrap();
    util::write_u32(&mut cursor, 99).unwrap();
    cursor.set_position(0);
    assert!(matches!(
        Gguf::load(&mut cursor),
        Err(GgufLoadError::InvalidFormatVersion(99))
    ));
}

#[test]
fn reads_version_1_lengths() {
    // Version 1 uses 32-bit counts and lengths throughout.
    let mut cursor = Cursor::new(Vec::new());
    util::write_u32(&mut cursor, FILE_MAGIC_GGUF).unwrap();
    util::write_u32(&mut cursor, 1).unwrap();
    util::write_u32(&mut cursor, 0).unwrap(); // tensors
    util::write_u32(&mut cursor, 1).unwrap(); // metadata entries
    util::write_string(&mut cursor, false, "example.block_count").unwrap();
    util::write_u32(&mut cursor, 4).unwrap(); // UInt32 tag
    util::write_u32(&mut cursor, 7).unwrap();
    cursor.set_position(0);

    let gguf = Gguf::load(&mut cursor).unwrap();
    assert_eq!(gguf.metadata.get_uint32("example.block_count").unwrap(), 7);
    assert_eq!(gguf.tensor_count(), 0);
}

#[test]
fn rejects_unsupported_element_type() {
    // Hand-assemble a directory entry with a quantized type id.
    let mut cursor = Cursor::new(Vec::new());
    util::write_u32(&mut cursor, FILE_MAGIC_GGUF).unwrap();
    util::write_u32(&mut cursor, 2).unwrap();
    util::write_u64(&mut cursor, 1).unwrap(); // tensors
    util::write_u64(&mut cursor, 0).unwrap(); // metadata entries
    util::write_string(&mut cursor, true, "blk.0.attn_q.weight").unwrap();
    util::write_u32(&mut cursor, 1).unwrap(); // one dimension
    util::write_u64(&mut cursor, 64).unwrap();
    util::write_u32(&mut cursor, 2).unwrap(); // Q4_0
    util::write_u64(&mut cursor, 0).unwrap();
    cursor.set_position(0);

    match Gguf::load(&mut cursor) {
        Err(GgufLoadError::UnsupportedElementType { tensor_name, ftype }) => {
            assert_eq!(tensor_name, "blk.0.attn_q.weight");
            assert_eq!(ftype, 2);
        }
        other => panic!("expected UnsupportedElementType, got {other:?}"),
    }
}

#[test]
fn rejects_too_many_dimensions() {
    let mut cursor = Cursor::new(Vec::new());
    util::write_u32(&mut cursor, FILE_MAGIC_GGUF).unwrap();
    util::write_u32(&mut cursor, 2).unwrap();
    util::write_u64(&mut cursor, 1).unwrap(); // tensors
    util::write_u64(&mut cursor, 0).unwrap(); // metadata entries
    util::write_string(&mut cursor, true, "overgrown").unwrap();
    util::write_u32(&mut cursor, 5).unwrap(); // five dimensions
    for _ in 0..5 {
        util::write_u64(&mut cursor, 2).unwrap();
    }
    util::write_u32(&mut cursor, 0).unwrap(); // F32
    util::write_u64(&mut cursor, 0).unwrap();
    cursor.set_position(0);

    match Gguf::load(&mut cursor) {
        Err(GgufLoadError::UnsupportedDimensionCount {
            tensor_name,
            dimensions,
        }) => {
            assert_eq!(tensor_name, "overgrown");
            assert_eq!(dimensions, 5);
        }
        other => panic!("expected UnsupportedDimensionCount, got {other:?}"),
    }
}

#[test]
fn arena_accounting_and_views() {
    let payloads: [&[u8]; 2] = [&[1u8; 64], &[2u8; 40]];
    let alignment = u64::from(DEFAULT_ALIGNMENT);
    let padded: usize = payloads
        .iter()
        .map(|p| (p.len() + alignment as usize - 1) / alignment as usize * alignment as usize)
        .sum();
    let total = padded + payloads.len() * Arena::TENSOR_OVERHEAD;

    let mut arena = Arena::reserve(total).unwrap();
    assert_eq!(arena.capacity(), total);
    assert_eq!(arena.used(), 0);

    let mut offsets = Vec::new();
    for payload in payloads {
        let padded_len =
            (payload.len() + alignment as usize - 1) / alignment as usize * alignment as usize;
        let offset = arena.alloc(padded_len).unwrap();
        arena.slot_mut(offset, payload.len()).copy_from_slice(payload);
        offsets.push(offset);
    }
    assert_eq!(arena.used(), total);

    // A further allocation does not fit and reports what it would need.
    let err = arena.alloc(1).unwrap_err();
    assert!(err.required > total);

    let frozen = arena.freeze();
    let first = Tensor::new("first", &[64], Type::I8, frozen.clone(), offsets[0]);
    let second = Tensor::new("second", &[10], Type::F32, frozen, offsets[1]);
    assert_eq!(first.data(), &[1u8; 64]);
    assert_eq!(second.data(), &[2u8; 40]);
    assert_eq!(second.dims(), &[10]);
    assert_eq!(second.n_elements(), 10);
    assert_eq!(second.nbytes(), 40);
}

#[test]
fn arena_reserve_failure_carries_required_bytes() {
    // An allocation far beyond addressable memory must fail up front.
    let required = usize::MAX / 2;
    let err = Arena::reserve(required).unwrap_err();
    assert_eq!(err.required, required);
}

#[test]
fn removing_a_tensor_reassigns_offsets() {
    let mut writer = sample_writer();
    writer.remove_tensor("tensor_1");
    let (gguf, _) = load(&writer);

    assert_eq!(gguf.tensor_count(), 2);
    let infos = gguf.tensor_infos();
    assert_eq!(infos[0].name, "tensor_0");
    assert_eq!(infos[1].name, "tensor_2");
    assert_eq!(
        infos[1].offset,
        infos[0].n_bytes_padded(gguf.alignment()) as u64
    );
}

#[test]
fn metadata_value_types_survive_a_roundtrip() {
    let mut writer = GgufWriter::new();
    writer.add_value("a.u8", MetadataValue::UInt8(8));
    writer.add_value("a.i8", MetadataValue::Int8(-8));
    writer.add_value("a.u16", MetadataValue::UInt16(16));
    writer.add_value("a.i16", MetadataValue::Int16(-16));
    writer.add_value("a.i32", MetadataValue::Int32(-32));
    writer.add_value("a.u64", MetadataValue::UInt64(1 << 40));
    writer.add_value("a.i64", MetadataValue::Int64(-(1 << 40)));
    writer.add_value("a.f64", MetadataValue::Float64(0.5));
    writer.add_value(
        "a.u32s",
        MetadataValue::Array(MetadataArrayValue::UInt32(vec![1, 2, 3])),
    );

    let (gguf, _) = load(&writer);
    assert_eq!(
        gguf.metadata.get_optional("a.u8"),
        Some(&MetadataValue::UInt8(8))
    );
    assert_eq!(
        gguf.metadata.get_optional("a.i64"),
        Some(&MetadataValue::Int64(-(1 << 40)))
    );
    assert_eq!(
        gguf.metadata.get_optional("a.f64"),
        Some(&MetadataValue::Float64(0.5))
    );
    assert_eq!(
        gguf.metadata.get_optional("a.u32s"),
        Some(&MetadataValue::Array(MetadataArrayValue::UInt32(vec![
            1, 2, 3
        ])))
    );
}
