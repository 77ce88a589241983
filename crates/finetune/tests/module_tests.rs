use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tch::{nn, Device, Kind, Tensor};

use finetune::{
    FinetuneConfig, FinetuneModule, MemoryLogger, OptimizerStrategy, SingleProcess,
};
use summa_core::{Batch, Encoded, Mode, Seq2SeqModel, Seq2SeqOutput};
use tokenizer::{Bpe, Vocab};

/// Deterministic model double: fixed loss, zero logits, canned
/// generation, and a call counter on the generation path.
struct StubModel {
    vocab_size: i64,
    generation: Vec<i64>,
    generate_calls: Arc<AtomicUsize>,
}

impl StubModel {
    fn new(vocab_size: i64, generation: Vec<i64>) -> (Self, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let model = Self {
            vocab_size,
            generation,
            generate_calls: Arc::clone(&counter),
        };
        (model, counter)
    }
}

impl Seq2SeqModel for StubModel {
    fn apply(&self, encoded: &Encoded, _mode: Mode) -> Result<Seq2SeqOutput> {
        let (b, t) = encoded.labels.size2()?;
        Ok(Seq2SeqOutput {
            logits: Tensor::zeros(&[b, t, self.vocab_size], (Kind::Float, Device::Cpu)),
            loss: Tensor::from(1.25f64),
        })
    }

    fn generate(&self, encoded: &Encoded) -> Result<Vec<Vec<i64>>> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        let b = encoded.batch_size() as usize;
        Ok(vec![self.generation.clone(); b])
    }
}

fn fixture_tokenizer() -> Bpe {
    let mut vocab = Vocab::new();
    for (id, token) in ["<pad>", "<s>", "</s>", "hello", " world", " there"]
        .iter()
        .enumerate()
    {
        vocab.insert(token.to_string(), id as u32);
    }
    Bpe::from_parts(
        vocab,
        Vec::new(),
        vec!["<pad>".to_string(), "<s>".to_string(), "</s>".to_string()],
    )
}

fn write_tokenizer(tag: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "summa-module-tok-{}-{}.json",
        std::process::id(),
        tag
    ));
    fixture_tokenizer().save(&path).unwrap();
    path
}

fn fixture_config(tokenizer_path: &PathBuf) -> FinetuneConfig {
    let mut config = FinetuneConfig::default();
    config.tokenizer_path = tokenizer_path.display().to_string();
    config
}

fn fixture_batch() -> Batch {
    // Row 0 labels decode to "hello world", row 1 to "hello".
    let input_ids = Tensor::from_slice(&[3i64, 4, 3, 0]).view([2, 2]);
    let attention_mask = Tensor::from_slice(&[1i64, 1, 1, 0]).view([2, 2]);
    let labels = Tensor::from_slice(&[3i64, 4, 2, 3, 2, -100]).view([2, 3]);
    Batch {
        encoded: Encoded {
            input_ids,
            attention_mask,
            labels,
        },
        index: vec![7, 9],
    }
}

fn fixture_module(tag: &str) -> (FinetuneModule<StubModel>, Arc<AtomicUsize>, PathBuf) {
    let tokenizer_path = write_tokenizer(tag);
    let (model, counter) = StubModel::new(16, vec![3, 4, 2]);
    let module = FinetuneModule::new(model, &fixture_config(&tokenizer_path)).unwrap();
    (module, counter, tokenizer_path)
}

#[test]
fn construction_fails_fast_on_unresolvable_tokenizer() {
    let (model, _) = StubModel::new(16, vec![3]);
    let mut config = FinetuneConfig::default();
    config.tokenizer_path = "/nonexistent/summa/tokenizer.json".to_string();

    let err = FinetuneModule::new(model, &config).unwrap_err();
    assert!(matches!(err, finetune::FinetuneError::Configuration(_)));
}

#[test]
fn train_step_never_generates() {
    let (mut module, counter, path) = fixture_module("train");
    let output = module.step(&fixture_batch(), Mode::Train).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert!(output.generation.is_none());
    assert!(output.decoded_generation.is_none());
    assert!(output.decoded_label.is_none());
    assert_eq!(output.index, vec![7, 9]);
    assert_eq!(output.pred.size(), vec![2, 3]);
}

#[test]
fn eval_step_decodes_generation_and_labels() {
    let (mut module, counter, path) = fixture_module("eval");
    let output = module.step(&fixture_batch(), Mode::Eval).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    let decoded_generation = output.decoded_generation.unwrap();
    let decoded_label = output.decoded_label.unwrap();
    assert_eq!(decoded_generation.len(), 2);
    assert_eq!(decoded_label.len(), 2);
    assert_eq!(decoded_generation[0], "hello world");
    assert_eq!(decoded_label[0], "hello world");
    assert_eq!(decoded_label[1], "hello");
}

#[test]
fn validation_metrics_accumulate_and_reset() {
    let (mut module, _counter, path) = fixture_module("val");
    let mut logger = MemoryLogger::new();

    module.validation_step(&fixture_batch(), &mut logger).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(module.validation_metrics().samples(), 2);
    assert!(module.test_metrics().is_empty());
    assert_eq!(logger.values_for("val_loss"), vec![1.25]);
    assert_eq!(logger.values_for("val_rouge1").len(), 1);

    module.on_validation_epoch_end();
    assert!(module.validation_metrics().is_empty());
}

#[test]
fn test_metrics_are_independent_of_validation() {
    let (mut module, _counter, path) = fixture_module("test");
    let mut logger = MemoryLogger::new();

    module.test_step(&fixture_batch(), &mut logger).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(module.test_metrics().samples(), 2);
    assert!(module.validation_metrics().is_empty());

    module.on_test_epoch_end();
    assert!(module.test_metrics().is_empty());
}

#[test]
fn train_loss_logged_synced_metrics_logged_for_progress() {
    let (mut module, _counter, path) = fixture_module("flags");
    let mut logger = MemoryLogger::new();

    module.training_step(&fixture_batch(), &mut logger).unwrap();
    module.validation_step(&fixture_batch(), &mut logger).unwrap();
    std::fs::remove_file(&path).ok();

    let train_loss = logger
        .entries
        .iter()
        .find(|entry| entry.key == "train_loss")
        .unwrap();
    assert!(train_loss.options.sync_dist);
    assert!(!train_loss.options.prog_bar);

    let rouge = logger
        .entries
        .iter()
        .find(|entry| entry.key == "val_rouge1")
        .unwrap();
    assert!(rouge.options.prog_bar);
    assert!(!rouge.options.sync_dist);
}

#[test]
fn predict_step_maps_every_index_to_nonempty_text() {
    let (module, counter, path) = fixture_module("predict");
    let batch = fixture_batch();
    let predictions = module.predict_step(&batch, &SingleProcess).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    let mut keys: Vec<i64> = predictions.keys().copied().collect();
    keys.sort_unstable();
    assert_eq!(keys, vec![7, 9]);
    for text in predictions.values() {
        assert!(!text.is_empty());
    }
}

#[test]
fn strategy_tag_threads_through_to_optimizer_setup() {
    let tokenizer_path = write_tokenizer("strategy");
    let (model, _) = StubModel::new(16, vec![3]);
    let mut config = fixture_config(&tokenizer_path);
    config.strategy = "deepspeed_stage_3".to_string();

    let module = FinetuneModule::new(model, &config).unwrap();
    assert_eq!(module.strategy(), OptimizerStrategy::FusedAdam);

    let vs = nn::VarStore::new(Device::Cpu);
    let _w = vs.root().var("w", &[4, 4], nn::Init::Const(0.5));
    let setup = module.configure_optimizers(&vs, 100).unwrap();
    std::fs::remove_file(&tokenizer_path).ok();

    assert_eq!(setup.lr_scheduler.schedule.warmup_steps(), 10);
    assert_eq!(setup.lr_scheduler.schedule.t_max(), 90);
    assert_eq!(
        setup.lr_scheduler.interval,
        finetune::SchedulerInterval::Step
    );
}

#[test]
fn invalid_mode_tag_is_rejected() {
    assert!(Mode::from_tag("train").is_ok());
    assert!(Mode::from_tag("eval").is_ok());
    assert!(Mode::from_tag("test").is_err());
}
