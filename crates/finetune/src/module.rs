use std::collections::HashMap;

use tch::{nn, IndexOp, Tensor};

use summa_core::{Batch, Encoded, Mode, Seq2SeqModel, Seq2SeqOutput};
use tokenizer::Bpe;

use crate::config::FinetuneConfig;
use crate::distributed::Collective;
use crate::error::{FinetuneError, Result};
use crate::logging::{LogOptions, MetricLogger};
use crate::metrics::RougeAccumulator;
use crate::optim::OptimizerStrategy;
use crate::scheduler::{ScheduleDescriptor, SchedulerInterval, WarmupCosineSchedule};

/// Per-batch result of `step`. The generation fields are populated in
/// eval mode only; autoregressive decoding never runs on the training
/// path.
#[derive(Debug)]
pub struct StepOutput {
    pub loss: Tensor,
    pub logits: Tensor,
    pub pred: Tensor,
    pub label: Tensor,
    pub index: Vec<i64>,
    pub generation: Option<Vec<Vec<i64>>>,
    pub decoded_generation: Option<Vec<String>>,
    pub decoded_label: Option<Vec<String>>,
}

/// Optimizer plus the schedule descriptor the driver advances.
pub struct OptimizerSetup {
    pub optimizer: nn::Optimizer,
    pub lr_scheduler: ScheduleDescriptor,
}

/// Step coordinator for fine-tuning a seq2seq model: owns the tokenizer
/// and the per-phase metric accumulators, turns batches into step
/// results, and wires up the optimizer and learning-rate schedule. An
/// external driver invokes the hook methods; nothing here runs a loop.
pub struct FinetuneModule<M> {
    model: M,
    tokenizer: Bpe,
    strategy: OptimizerStrategy,
    lr: f64,
    weight_decay: f64,
    warmup_ratio: f64,
    eta_min_ratio: f64,
    interval: SchedulerInterval,
    val_metrics: RougeAccumulator,
    test_metrics: RougeAccumulator,
}

impl<M: Seq2SeqModel> FinetuneModule<M> {
    /// Loads the tokenizer named by the config and sets up fresh metric
    /// accumulators. An unresolvable tokenizer identifier fails here,
    /// before any training starts.
    pub fn new(model: M, config: &FinetuneConfig) -> Result<Self> {
        config.validate()?;
        let tokenizer = Bpe::load(&config.tokenizer_path).map_err(|err| {
            FinetuneError::Configuration(format!(
                "failed to load tokenizer {:?}: {}",
                config.tokenizer_path, err
            ))
        })?;

        Ok(Self {
            model,
            tokenizer,
            strategy: OptimizerStrategy::from_tag(&config.strategy),
            lr: config.lr,
            weight_decay: config.weight_decay,
            warmup_ratio: config.warmup_ratio,
            eta_min_ratio: config.eta_min_ratio,
            interval: config.interval,
            val_metrics: RougeAccumulator::new(),
            test_metrics: RougeAccumulator::new(),
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn tokenizer(&self) -> &Bpe {
        &self.tokenizer
    }

    pub fn strategy(&self) -> OptimizerStrategy {
        self.strategy
    }

    pub fn validation_metrics(&self) -> &RougeAccumulator {
        &self.val_metrics
    }

    pub fn test_metrics(&self) -> &RougeAccumulator {
        &self.test_metrics
    }

    /// Forward pass in an explicit mode.
    pub fn forward(&self, encoded: &Encoded, mode: Mode) -> Result<Seq2SeqOutput> {
        Ok(self.model.apply(encoded, mode)?)
    }

    /// Core per-batch logic shared by every phase. Training returns the
    /// teacher-forced quantities only; evaluation additionally generates
    /// and decodes (special tokens stripped, no whitespace cleanup).
    pub fn step(&mut self, batch: &Batch, mode: Mode) -> Result<StepOutput> {
        let encoded = &batch.encoded;
        let label = encoded.labels.shallow_clone();
        let index = batch.index.clone();

        let output = self.forward(encoded, mode)?;
        let pred = output.logits.argmax(-1, false);

        if mode.is_train() {
            return Ok(StepOutput {
                loss: output.loss,
                logits: output.logits,
                pred,
                label,
                index,
                generation: None,
                decoded_generation: None,
                decoded_label: None,
            });
        }

        let generation = self.model.generate(encoded)?;
        let decoded_generation = self.decode_sequences(&generation);
        let label_rows = tensor_rows(&label)?;
        let decoded_label = self.decode_sequences(&label_rows);

        Ok(StepOutput {
            loss: output.loss,
            logits: output.logits,
            pred,
            label,
            index,
            generation: Some(generation),
            decoded_generation: Some(decoded_generation),
            decoded_label: Some(decoded_label),
        })
    }

    /// Optimizer for the variables of `vs` plus the composed two-phase
    /// learning-rate schedule and its advance interval.
    pub fn configure_optimizers(
        &self,
        vs: &nn::VarStore,
        total_steps: usize,
    ) -> Result<OptimizerSetup> {
        let optimizer = self.strategy.build(vs, self.lr, self.weight_decay)?;
        let schedule =
            WarmupCosineSchedule::new(self.lr, total_steps, self.warmup_ratio, self.eta_min_ratio)?;
        Ok(OptimizerSetup {
            optimizer,
            lr_scheduler: ScheduleDescriptor {
                schedule,
                interval: self.interval,
            },
        })
    }

    pub fn training_step(
        &mut self,
        batch: &Batch,
        logger: &mut dyn MetricLogger,
    ) -> Result<StepOutput> {
        let output = self.step(batch, Mode::Train)?;
        logger.log_scalar(
            "train_loss",
            output.loss.double_value(&[]),
            LogOptions::epoch_synced(),
        );
        Ok(output)
    }

    pub fn validation_step(
        &mut self,
        batch: &Batch,
        logger: &mut dyn MetricLogger,
    ) -> Result<StepOutput> {
        let output = self.step(batch, Mode::Eval)?;
        logger.log_scalar(
            "val_loss",
            output.loss.double_value(&[]),
            LogOptions::epoch_synced(),
        );
        if let (Some(generation), Some(reference)) =
            (&output.decoded_generation, &output.decoded_label)
        {
            let scores = self.val_metrics.update(generation, reference);
            logger.log_scores("val_", &scores, LogOptions::epoch_progress());
        }
        Ok(output)
    }

    pub fn test_step(
        &mut self,
        batch: &Batch,
        logger: &mut dyn MetricLogger,
    ) -> Result<StepOutput> {
        let output = self.step(batch, Mode::Eval)?;
        logger.log_scalar(
            "test_loss",
            output.loss.double_value(&[]),
            LogOptions::epoch_synced(),
        );
        if let (Some(generation), Some(reference)) =
            (&output.decoded_generation, &output.decoded_label)
        {
            let scores = self.test_metrics.update(generation, reference);
            logger.log_scores("test_", &scores, LogOptions::epoch_progress());
        }
        Ok(output)
    }

    /// Generation-only step: no loss, no metrics. Returns the union of
    /// every worker's index -> decoded text map.
    pub fn predict_step(
        &self,
        batch: &Batch,
        collective: &dyn Collective,
    ) -> Result<HashMap<i64, String>> {
        let generation = self.model.generate(&batch.encoded)?;
        let decoded = self.decode_sequences(&generation);

        let mut local = HashMap::with_capacity(batch.index.len());
        for (index, text) in batch.index.iter().zip(decoded) {
            local.insert(*index, text);
        }
        Ok(collective.all_gather_predictions(local)?)
    }

    pub fn on_train_epoch_end(&mut self) {}

    pub fn on_validation_epoch_end(&mut self) {
        self.val_metrics.reset();
    }

    pub fn on_test_epoch_end(&mut self) {
        self.test_metrics.reset();
    }

    fn decode_sequences(&self, sequences: &[Vec<i64>]) -> Vec<String> {
        let sequences: Vec<Vec<u32>> = sequences
            .iter()
            .map(|ids| {
                ids.iter()
                    .filter(|&&id| id >= 0)
                    .map(|&id| id as u32)
                    .collect()
            })
            .collect();
        self.tokenizer.batch_decode(&sequences, true, false)
    }
}

fn tensor_rows(tensor: &Tensor) -> Result<Vec<Vec<i64>>> {
    let (b, _t) = tensor.size2()?;
    let mut rows = Vec::with_capacity(b as usize);
    for i in 0..b {
        let row = tensor.i((i, ..));
        rows.push(Vec::<i64>::try_from(&row)?);
    }
    Ok(rows)
}
