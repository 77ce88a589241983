use std::fs;
use std::path::PathBuf;

use clap::Parser;
use serde_json::json;
use tch::{nn, Device};

use summa_core::safetensors_util::{tensor_data, write_safetensors, OwnedTensorData};
use summa_core::{ModelConfig, SummaTransformer};

/// Convert a trained checkpoint into upload-ready sharded safetensors
/// files plus a weight-map index.
#[derive(Parser)]
struct Cli {
    /// Checkpoint saved by the trainer (.ot).
    #[arg(short, long)]
    checkpoint: PathBuf,
    /// Model config JSON written next to the checkpoints.
    #[arg(short, long)]
    model_config: PathBuf,
    #[arg(short, long)]
    output_dir: PathBuf,
    #[arg(short, long, default_value_t = 2)]
    num_shards: usize,
    /// Tokenizer JSON to copy alongside the weights.
    #[arg(short, long)]
    tokenizer: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config: ModelConfig = serde_json::from_str(&fs::read_to_string(&cli.model_config)?)?;
    let mut vs = nn::VarStore::new(Device::Cpu);
    let _model = SummaTransformer::new(&vs.root(), &config);
    vs.load(&cli.checkpoint)?;

    if !cli.output_dir.exists() {
        fs::create_dir_all(&cli.output_dir)?;
    }

    let variables = vs.variables();
    let mut names: Vec<String> = variables.keys().cloned().collect();
    names.sort();

    let requested = cli.num_shards.clamp(1, names.len().max(1));
    let shard_size = (names.len() + requested - 1) / requested;
    let shards: Vec<&[String]> = names.chunks(shard_size.max(1)).collect();
    let num_shards = shards.len();

    let mut weight_map = serde_json::Map::new();
    let mut total_size = 0u64;

    for (shard_idx, chunk) in shards.into_iter().enumerate() {
        let file_name = format!(
            "model-{:05}-of-{:05}.safetensors",
            shard_idx + 1,
            num_shards
        );

        let mut entries: Vec<(String, OwnedTensorData)> = Vec::with_capacity(chunk.len());
        for name in chunk {
            let data = tensor_data(&variables[name])?;
            total_size += data.byte_len() as u64;
            weight_map.insert(name.clone(), json!(file_name));
            entries.push((name.clone(), data));
        }

        write_safetensors(&entries, cli.output_dir.join(&file_name))?;
        println!("Wrote {} ({} tensors)", file_name, chunk.len());
    }

    let index = json!({
        "metadata": { "total_size": total_size },
        "weight_map": weight_map,
    });
    let index_path = cli.output_dir.join("model.safetensors.index.json");
    fs::write(&index_path, serde_json::to_string_pretty(&index)?)?;
    println!("Wrote index with {} entries to {:?}", names.len(), index_path);

    if let Some(tokenizer) = &cli.tokenizer {
        fs::copy(tokenizer, cli.output_dir.join("tokenizer.json"))?;
        println!("Copied tokenizer from {:?}", tokenizer);
    }

    Ok(())
}
