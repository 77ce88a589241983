use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use rand::seq::SliceRandom;
use rand::thread_rng;
use serde::Deserialize;
use tch::{Device, Tensor};

use summa_core::{Batch, Encoded, LABEL_IGNORE_ID};
use tokenizer::Bpe;

use crate::error::{FinetuneError, Result};

/// One JSONL record of the summarization corpus.
#[derive(Debug, Deserialize)]
pub struct Example {
    pub index: i64,
    pub source: String,
    pub target: String,
}

struct EncodedExample {
    index: i64,
    source_ids: Vec<i64>,
    target_ids: Vec<i64>,
}

/// Pre-encoded summarization corpus, batched on demand. Source rows pad
/// with the tokenizer's pad id; label rows pad with the ignored label id
/// so padding never contributes to the loss.
pub struct SummarizationDataset {
    examples: Vec<EncodedExample>,
    pad_id: i64,
    device: Device,
}

impl SummarizationDataset {
    pub fn from_jsonl<P: AsRef<Path>>(
        path: P,
        tokenizer: &Bpe,
        max_source_len: usize,
        max_target_len: usize,
        device: Device,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| {
            FinetuneError::Configuration(format!("failed to open dataset {:?}: {}", path, err))
        })?;
        let reader = BufReader::new(file);

        let eos = tokenizer.eos_id();
        let mut examples = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let example: Example = serde_json::from_str(&line)?;

            let mut source_ids: Vec<i64> = tokenizer
                .encode(&example.source)
                .into_iter()
                .map(i64::from)
                .collect();
            source_ids.truncate(max_source_len);
            if source_ids.is_empty() {
                continue;
            }

            let mut target_ids: Vec<i64> = tokenizer
                .encode(&example.target)
                .into_iter()
                .map(i64::from)
                .collect();
            target_ids.truncate(max_target_len.saturating_sub(1).max(1));
            if let Some(eos) = eos {
                target_ids.push(i64::from(eos));
            }

            examples.push(EncodedExample {
                index: example.index,
                source_ids,
                target_ids,
            });
        }

        if examples.is_empty() {
            return Err(FinetuneError::Configuration(format!(
                "dataset {:?} contains no usable examples",
                path
            )));
        }

        Ok(Self {
            examples,
            pad_id: tokenizer.pad_id().map(i64::from).unwrap_or(0),
            device,
        })
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Batches covering the whole corpus once, optionally shuffled.
    pub fn epoch_batches(&self, batch_size: usize, shuffle: bool) -> Vec<Batch> {
        let batch_size = batch_size.max(1);
        let mut order: Vec<usize> = (0..self.examples.len()).collect();
        if shuffle {
            order.shuffle(&mut thread_rng());
        }

        order
            .chunks(batch_size)
            .map(|chunk| self.build_batch(chunk))
            .collect()
    }

    fn build_batch(&self, rows: &[usize]) -> Batch {
        let b = rows.len();
        let source_len = rows
            .iter()
            .map(|&i| self.examples[i].source_ids.len())
            .max()
            .unwrap_or(1);
        let target_len = rows
            .iter()
            .map(|&i| self.examples[i].target_ids.len())
            .max()
            .unwrap_or(1);

        let mut input_ids = Vec::with_capacity(b * source_len);
        let mut attention_mask = Vec::with_capacity(b * source_len);
        let mut labels = Vec::with_capacity(b * target_len);
        let mut index = Vec::with_capacity(b);

        for &row in rows {
            let example = &self.examples[row];
            index.push(example.index);

            input_ids.extend_from_slice(&example.source_ids);
            attention_mask.extend(std::iter::repeat(1i64).take(example.source_ids.len()));
            let pad = source_len - example.source_ids.len();
            input_ids.extend(std::iter::repeat(self.pad_id).take(pad));
            attention_mask.extend(std::iter::repeat(0i64).take(pad));

            labels.extend_from_slice(&example.target_ids);
            labels.extend(
                std::iter::repeat(LABEL_IGNORE_ID).take(target_len - example.target_ids.len()),
            );
        }

        let encoded = Encoded {
            input_ids: Tensor::from_slice(&input_ids)
                .view([b as i64, source_len as i64])
                .to(self.device),
            attention_mask: Tensor::from_slice(&attention_mask)
                .view([b as i64, source_len as i64])
                .to(self.device),
            labels: Tensor::from_slice(&labels)
                .view([b as i64, target_len as i64])
                .to(self.device),
        };

        Batch { encoded, index }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokenizer::Vocab;

    fn tiny_tokenizer() -> Bpe {
        let mut vocab = Vocab::new();
        for (id, token) in ["<pad>", "<s>", "</s>", "aa", "bb", " aa", " bb"]
            .iter()
            .enumerate()
        {
            vocab.insert(token.to_string(), id as u32);
        }
        Bpe::from_parts(
            vocab,
            vec![
                ("a".to_string(), "a".to_string()),
                ("b".to_string(), "b".to_string()),
                (" ".to_string(), "aa".to_string()),
                (" ".to_string(), "bb".to_string()),
            ],
            vec!["<pad>".to_string(), "<s>".to_string(), "</s>".to_string()],
        )
    }

    fn write_corpus(lines: &[&str]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "summa-data-{}-{}.jsonl",
            std::process::id(),
            lines.len()
        ));
        let mut file = File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        path
    }

    #[test]
    fn batches_pad_sources_and_labels() {
        let tokenizer = tiny_tokenizer();
        let path = write_corpus(&[
            r#"{"index": 0, "source": "aa bb aa", "target": "aa"}"#,
            r#"{"index": 1, "source": "aa", "target": "aa bb"}"#,
        ]);
        let dataset =
            SummarizationDataset::from_jsonl(&path, &tokenizer, 16, 8, Device::Cpu).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(dataset.len(), 2);
        let batches = dataset.epoch_batches(2, false);
        assert_eq!(batches.len(), 1);

        let batch = &batches[0];
        assert_eq!(batch.index, vec![0, 1]);
        assert_eq!(batch.encoded.input_ids.size(), vec![2, 3]);

        // Row 1 is one source token long: two pad columns, mask zeros.
        let mask = Vec::<i64>::try_from(&batch.encoded.attention_mask.get(1)).unwrap();
        assert_eq!(mask, vec![1, 0, 0]);

        // Labels end with EOS and pad with the ignored id.
        let labels0 = Vec::<i64>::try_from(&batch.encoded.labels.get(0)).unwrap();
        assert_eq!(labels0, vec![3, 2, LABEL_IGNORE_ID]);
        let labels1 = Vec::<i64>::try_from(&batch.encoded.labels.get(1)).unwrap();
        assert_eq!(labels1, vec![3, 6, 2]);
    }

    #[test]
    fn rejects_empty_corpus() {
        let tokenizer = tiny_tokenizer();
        let path = write_corpus(&[]);
        let result = SummarizationDataset::from_jsonl(&path, &tokenizer, 16, 8, Device::Cpu);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(FinetuneError::Configuration(_))));
    }
}
