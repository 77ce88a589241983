use tch::{Device, Kind, Tensor};

/// Label value ignored by the loss (padding positions in `labels`).
pub const LABEL_IGNORE_ID: i64 = -100;

/// Encoded model inputs for one batch.
/// `input_ids`/`attention_mask`: [batch, source_len], `labels`: [batch, target_len].
/// `attention_mask` is 1 for real tokens and 0 for padding; padded label
/// positions hold `LABEL_IGNORE_ID`.
#[derive(Debug)]
pub struct Encoded {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
    pub labels: Tensor,
}

impl Encoded {
    pub fn batch_size(&self) -> i64 {
        self.input_ids.size()[0]
    }

    /// Right-shift of `labels` into decoder inputs: the start token is
    /// prepended, the last label dropped, and ignored positions replaced
    /// by the pad token.
    pub fn decoder_inputs(&self, decoder_start_token_id: i64, pad_token_id: i64) -> Tensor {
        let size = self.labels.size();
        let (b, t) = (size[0], size[1]);
        let cleaned = self
            .labels
            .masked_fill(&self.labels.eq(LABEL_IGNORE_ID), pad_token_id);
        let start = Tensor::full(
            &[b, 1],
            decoder_start_token_id,
            (Kind::Int64, self.labels.device()),
        );
        Tensor::cat(&[&start, &cleaned.narrow(1, 0, t - 1)], 1)
    }

    pub fn shallow_clone(&self) -> Self {
        Self {
            input_ids: self.input_ids.shallow_clone(),
            attention_mask: self.attention_mask.shallow_clone(),
            labels: self.labels.shallow_clone(),
        }
    }

    pub fn to_device(&self, device: Device) -> Self {
        Self {
            input_ids: self.input_ids.to_device(device),
            attention_mask: self.attention_mask.to_device(device),
            labels: self.labels.to_device(device),
        }
    }
}

/// One batch as handed to the step functions: encoded tensors plus the
/// integer sample identifiers of its rows.
#[derive(Debug)]
pub struct Batch {
    pub encoded: Encoded,
    pub index: Vec<i64>,
}

/// Forward-pass result: token logits [batch, target_len, vocab] and the
/// scalar teacher-forced loss.
#[derive(Debug)]
pub struct Seq2SeqOutput {
    pub logits: Tensor,
    pub loss: Tensor,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_inputs_shift_right() {
        let labels = Tensor::from_slice(&[5i64, 6, LABEL_IGNORE_ID]).view([1, 3]);
        let encoded = Encoded {
            input_ids: Tensor::from_slice(&[3i64, 4]).view([1, 2]),
            attention_mask: Tensor::from_slice(&[1i64, 1]).view([1, 2]),
            labels,
        };
        let shifted = encoded.decoder_inputs(1, 0);
        let row = Vec::<i64>::try_from(&shifted.squeeze_dim(0)).unwrap();
        assert_eq!(row, vec![1, 5, 6]);
    }
}
