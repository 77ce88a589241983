use std::collections::HashMap;
use std::path::PathBuf;

use tch::nn;

use summa_core::Seq2SeqModel;

use crate::config::FinetuneConfig;
use crate::data::SummarizationDataset;
use crate::distributed::Collective;
use crate::error::Result;
use crate::logging::MetricLogger;
use crate::module::{FinetuneModule, OptimizerSetup};
use crate::scheduler::SchedulerInterval;

/// Single-process driver loop. This is the stand-in for the external
/// training engine: it calls the module's hook methods and owns the
/// backward pass, schedule advancement and checkpoint cadence. Nothing
/// about the step logic lives here.
pub struct Engine {
    epochs: usize,
    batch_size: usize,
    grad_clip: Option<f64>,
    log_every: usize,
    save_every: usize,
    checkpoint_dir: PathBuf,
}

impl Engine {
    pub fn from_config(config: &FinetuneConfig) -> Self {
        Self {
            epochs: config.epochs,
            batch_size: config.batch_size,
            grad_clip: config.grad_clip,
            log_every: config.log_every.max(1),
            save_every: config.save_every.max(1),
            checkpoint_dir: PathBuf::from(&config.checkpoint_dir),
        }
    }

    /// Estimated optimizer steps for the whole run; what the schedule is
    /// sized against.
    pub fn total_steps(&self, dataset_len: usize) -> usize {
        let steps_per_epoch = (dataset_len + self.batch_size - 1) / self.batch_size;
        steps_per_epoch.max(1) * self.epochs
    }

    pub fn fit<M: Seq2SeqModel>(
        &self,
        module: &mut FinetuneModule<M>,
        vs: &nn::VarStore,
        train: &SummarizationDataset,
        val: Option<&SummarizationDataset>,
        logger: &mut dyn MetricLogger,
    ) -> Result<()> {
        let total_steps = self.total_steps(train.len());
        let OptimizerSetup {
            mut optimizer,
            lr_scheduler,
        } = module.configure_optimizers(vs, total_steps)?;
        let (mut schedule, interval) = (lr_scheduler.schedule, lr_scheduler.interval);
        optimizer.set_lr(schedule.learning_rate());

        println!(
            "Starting fine-tuning: {} examples, {} epochs, {} total steps ({} warmup)",
            train.len(),
            self.epochs,
            total_steps,
            schedule.warmup_steps()
        );

        for epoch in 0..self.epochs {
            let mut epoch_loss = 0.0;
            let mut num_batches = 0usize;

            for batch in train.epoch_batches(self.batch_size, true) {
                let output = module.training_step(&batch, logger)?;

                match self.grad_clip {
                    Some(max_norm) => optimizer.backward_step_clip_norm(&output.loss, max_norm),
                    None => optimizer.backward_step(&output.loss),
                }
                if interval == SchedulerInterval::Step {
                    optimizer.set_lr(schedule.step());
                }

                let loss_val = output.loss.double_value(&[]);
                epoch_loss += loss_val;
                num_batches += 1;

                if num_batches % self.log_every == 0 {
                    println!(
                        "Epoch {} | Batch {} | Loss: {:.4} | LR: {:.3e}",
                        epoch,
                        num_batches,
                        loss_val,
                        schedule.learning_rate()
                    );
                }
            }

            if interval == SchedulerInterval::Epoch {
                optimizer.set_lr(schedule.step());
            }
            module.on_train_epoch_end();

            println!(
                "Epoch {} Average Loss: {:.4}",
                epoch,
                epoch_loss / num_batches.max(1) as f64
            );

            if let Some(val) = val {
                self.run_validation(module, val, logger)?;
            }

            if (epoch + 1) % self.save_every == 0 {
                self.save_checkpoint(vs, epoch)?;
            }
        }

        Ok(())
    }

    fn run_validation<M: Seq2SeqModel>(
        &self,
        module: &mut FinetuneModule<M>,
        val: &SummarizationDataset,
        logger: &mut dyn MetricLogger,
    ) -> Result<()> {
        let mut val_loss = 0.0;
        let mut num_batches = 0usize;
        for batch in val.epoch_batches(self.batch_size, false) {
            let output = module.validation_step(&batch, logger)?;
            val_loss += output.loss.double_value(&[]);
            num_batches += 1;
        }

        if let Some(scores) = module.validation_metrics().compute() {
            println!(
                "Validation | Loss: {:.4} | ROUGE-1: {:.4} | ROUGE-2: {:.4} | ROUGE-L: {:.4}",
                val_loss / num_batches.max(1) as f64,
                scores.rouge1,
                scores.rouge2,
                scores.rouge_l
            );
        }
        module.on_validation_epoch_end();
        Ok(())
    }

    pub fn test<M: Seq2SeqModel>(
        &self,
        module: &mut FinetuneModule<M>,
        test: &SummarizationDataset,
        logger: &mut dyn MetricLogger,
    ) -> Result<()> {
        let mut test_loss = 0.0;
        let mut num_batches = 0usize;
        for batch in test.epoch_batches(self.batch_size, false) {
            let output = module.test_step(&batch, logger)?;
            test_loss += output.loss.double_value(&[]);
            num_batches += 1;
        }

        if let Some(scores) = module.test_metrics().compute() {
            println!(
                "Test | Loss: {:.4} | ROUGE-1: {:.4} | ROUGE-2: {:.4} | ROUGE-L: {:.4}",
                test_loss / num_batches.max(1) as f64,
                scores.rouge1,
                scores.rouge2,
                scores.rouge_l
            );
        }
        module.on_test_epoch_end();
        Ok(())
    }

    /// Runs generation over the corpus and returns the merged
    /// index -> decoded text map from all workers.
    pub fn predict<M: Seq2SeqModel>(
        &self,
        module: &FinetuneModule<M>,
        data: &SummarizationDataset,
        collective: &dyn Collective,
    ) -> Result<HashMap<i64, String>> {
        let mut merged = HashMap::with_capacity(data.len());
        for batch in data.epoch_batches(self.batch_size, false) {
            merged.extend(module.predict_step(&batch, collective)?);
        }
        Ok(merged)
    }

    fn save_checkpoint(&self, vs: &nn::VarStore, epoch: usize) -> Result<()> {
        if !self.checkpoint_dir.exists() {
            std::fs::create_dir_all(&self.checkpoint_dir)?;
        }
        let filename = self
            .checkpoint_dir
            .join(format!("checkpoint_epoch_{}.ot", epoch));
        vs.save(&filename)?;
        println!("Saved checkpoint to {:?}", filename);
        Ok(())
    }
}
