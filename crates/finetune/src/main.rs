use anyhow::Result;
use std::path::Path;
use tch::{nn, Device};

use finetune::{
    ConsoleLogger, Engine, FinetuneConfig, FinetuneModule, SingleProcess, SummarizationDataset,
};
use summa_core::{ModelConfig, SummaTransformer};
use tokenizer::Bpe;

fn main() -> Result<()> {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "configs/finetune.yaml".to_string());
    let config = FinetuneConfig::load_or_default(&config_path)?;
    config.validate()?;

    // The module loads its own tokenizer by identifier; this one is only
    // for sizing the model vocabulary.
    let tokenizer = Bpe::load(&config.tokenizer_path)?;

    let model_config_path = "configs/model.yaml";
    let mut model_config: ModelConfig = if Path::new(model_config_path).exists() {
        serde_yaml::from_str(&std::fs::read_to_string(model_config_path)?)?
    } else {
        ModelConfig::default()
    };
    model_config.vocab_size = tokenizer.vocab_size() as i64;
    model_config.pad_token_id = tokenizer.pad_id().map(i64::from).unwrap_or(0);
    model_config.decoder_start_token_id = tokenizer.bos_id().map(i64::from).unwrap_or(1);
    model_config.eos_token_id = tokenizer.eos_id().map(i64::from).unwrap_or(2);

    let device = Device::cuda_if_available();
    println!("Using device: {:?}", device);

    let vs = nn::VarStore::new(device);
    let model = SummaTransformer::new(&vs.root(), &model_config);
    let mut module = FinetuneModule::new(model, &config)?;

    let checkpoint_dir = Path::new(&config.checkpoint_dir);
    if !checkpoint_dir.exists() {
        std::fs::create_dir_all(checkpoint_dir)?;
    }
    std::fs::write(
        checkpoint_dir.join("config.json"),
        serde_json::to_string_pretty(&model_config)?,
    )?;

    let train = SummarizationDataset::from_jsonl(
        &config.train_path,
        &tokenizer,
        config.max_source_len,
        config.max_target_len,
        device,
    )?;
    let val = config
        .val_path
        .as_ref()
        .map(|path| {
            SummarizationDataset::from_jsonl(
                path,
                &tokenizer,
                config.max_source_len,
                config.max_target_len,
                device,
            )
        })
        .transpose()?;

    let engine = Engine::from_config(&config);
    let mut logger = ConsoleLogger;

    engine.fit(&mut module, &vs, &train, val.as_ref(), &mut logger)?;

    if let Some(test_path) = &config.test_path {
        let test = SummarizationDataset::from_jsonl(
            test_path,
            &tokenizer,
            config.max_source_len,
            config.max_target_len,
            device,
        )?;
        engine.test(&mut module, &test, &mut logger)?;

        let predictions = engine.predict(&module, &test, &SingleProcess)?;
        let output_path = checkpoint_dir.join("predictions.json");
        std::fs::write(&output_path, serde_json::to_string_pretty(&predictions)?)?;
        println!("Wrote {} predictions to {:?}", predictions.len(), output_path);
    }

    println!("Fine-tuning complete!");
    Ok(())
}
