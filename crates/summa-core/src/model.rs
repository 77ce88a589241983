use anyhow::Result;

use crate::batch::{Encoded, Seq2SeqOutput};
use crate::mode::Mode;

/// Contract between the step coordinator and the network: one
/// teacher-forced forward pass and one autoregressive decode. Mode is an
/// explicit argument, never ambient state.
pub trait Seq2SeqModel {
    /// Forward pass over the encoded batch, returning logits and the
    /// scalar loss against `encoded.labels`.
    fn apply(&self, encoded: &Encoded, mode: Mode) -> Result<Seq2SeqOutput>;

    /// Autoregressive generation for every row of the batch. Returned
    /// sequences carry content token ids only (no start token, no EOS).
    fn generate(&self, encoded: &Encoded) -> Result<Vec<Vec<i64>>>;
}
