use std::path::Path;

fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .expect("need a model file to read");

    let model = blip2::load(Path::new(&path), blip2::load_progress_callback_stdout)?;

    let vision = &model.vision_model;
    println!();
    println!("vision: {:?}", vision.hyperparameters);
    println!("q_former: {:?}", model.qformer_model.hyperparameters);
    println!("text: {:?}", model.text_model.hyperparameters);
    println!(
        "flags: vision_gelu={} qformer_gelu={} num_query_tokens={} cross_attention_frequency={}",
        model.vision_gelu,
        model.qformer_gelu,
        model.num_query_tokens,
        model.cross_attention_frequency
    );
    println!(
        "normalization: mean={:?} std={:?}",
        model.image_mean, model.image_std
    );
    println!("vocabulary: {} tokens", model.vocabulary.len());
    println!("arena: {} bytes", model.context_size());

    println!();
    for info in model.container().tensor_infos() {
        println!(
            "{}: {:?} {} @ {}",
            info.name,
            info.dimensions,
            info.element_type,
            info.offset
        );
    }

    Ok(())
}
