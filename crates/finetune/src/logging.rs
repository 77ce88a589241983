use crate::metrics::RougeScores;

/// How a submitted value should be treated by the logging sink:
/// per-step vs per-epoch aggregation, progress-display visibility, and
/// cross-worker synchronization. Reduction across workers is the outer
/// engine's job; the flags are carried, not interpreted, here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    pub on_step: bool,
    pub on_epoch: bool,
    pub prog_bar: bool,
    pub sync_dist: bool,
}

impl LogOptions {
    /// Epoch-aggregated, synchronized, kept off the progress display
    /// (loss reporting).
    pub const fn epoch_synced() -> Self {
        Self {
            on_step: false,
            on_epoch: true,
            prog_bar: false,
            sync_dist: true,
        }
    }

    /// Epoch-aggregated, worker-local, shown on the progress display
    /// (metric reporting).
    pub const fn epoch_progress() -> Self {
        Self {
            on_step: false,
            on_epoch: true,
            prog_bar: true,
            sync_dist: false,
        }
    }
}

pub trait MetricLogger {
    fn log_scalar(&mut self, key: &str, value: f64, options: LogOptions);

    fn log_scores(&mut self, prefix: &str, scores: &RougeScores, options: LogOptions) {
        self.log_scalar(&format!("{}rouge1", prefix), scores.rouge1, options);
        self.log_scalar(&format!("{}rouge2", prefix), scores.rouge2, options);
        self.log_scalar(&format!("{}rougeL", prefix), scores.rouge_l, options);
    }
}

/// Forwards submissions to the `log` facade.
#[derive(Debug, Default)]
pub struct ConsoleLogger;

impl MetricLogger for ConsoleLogger {
    fn log_scalar(&mut self, key: &str, value: f64, options: LogOptions) {
        log::info!(
            "{} = {:.6} (on_epoch={}, sync_dist={})",
            key,
            value,
            options.on_epoch,
            options.sync_dist
        );
    }
}

/// Records every submission; used by tests and reporting.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    pub entries: Vec<LogEntry>,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub key: String,
    pub value: f64,
    pub options: LogOptions,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn values_for(&self, key: &str) -> Vec<f64> {
        self.entries
            .iter()
            .filter(|entry| entry.key == key)
            .map(|entry| entry.value)
            .collect()
    }
}

impl MetricLogger for MemoryLogger {
    fn log_scalar(&mut self, key: &str, value: f64, options: LogOptions) {
        self.entries.push(LogEntry {
            key: key.to_string(),
            value,
            options,
        });
    }
}
