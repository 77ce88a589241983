use std::collections::HashMap;

/// F1 overlap scores for one sample or an aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RougeScores {
    pub rouge1: f64,
    pub rouge2: f64,
    pub rouge_l: f64,
}

/// Running per-phase aggregation of ROUGE over decoded
/// (hypothesis, reference) pairs. Reset at each evaluation epoch end.
#[derive(Debug, Default)]
pub struct RougeAccumulator {
    sum_rouge1: f64,
    sum_rouge2: f64,
    sum_rouge_l: f64,
    samples: usize,
}

impl RougeAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score a batch of decoded generations against references, fold the
    /// per-sample scores into the running aggregate, and return the
    /// batch means.
    pub fn update(&mut self, hypotheses: &[String], references: &[String]) -> RougeScores {
        let n = hypotheses.len().min(references.len());
        let mut batch = RougeScores::default();

        for (hypothesis, reference) in hypotheses.iter().zip(references.iter()).take(n) {
            let sample = score_pair(reference, hypothesis);
            batch.rouge1 += sample.rouge1;
            batch.rouge2 += sample.rouge2;
            batch.rouge_l += sample.rouge_l;
            self.sum_rouge1 += sample.rouge1;
            self.sum_rouge2 += sample.rouge2;
            self.sum_rouge_l += sample.rouge_l;
        }
        self.samples += n;

        if n > 0 {
            batch.rouge1 /= n as f64;
            batch.rouge2 /= n as f64;
            batch.rouge_l /= n as f64;
        }
        batch
    }

    /// Mean scores over everything recorded since the last reset.
    pub fn compute(&self) -> Option<RougeScores> {
        if self.samples == 0 {
            return None;
        }
        let n = self.samples as f64;
        Some(RougeScores {
            rouge1: self.sum_rouge1 / n,
            rouge2: self.sum_rouge2 / n,
            rouge_l: self.sum_rouge_l / n,
        })
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples == 0
    }
}

fn score_pair(reference: &str, hypothesis: &str) -> RougeScores {
    RougeScores {
        rouge1: rouge_n(reference, hypothesis, 1),
        rouge2: rouge_n(reference, hypothesis, 2),
        rouge_l: rouge_l(reference, hypothesis),
    }
}

/// ROUGE-N F1: clipped n-gram overlap between reference and hypothesis.
pub fn rouge_n(reference: &str, hypothesis: &str, n: usize) -> f64 {
    let ref_tokens: Vec<&str> = reference.split_whitespace().collect();
    let hyp_tokens: Vec<&str> = hypothesis.split_whitespace().collect();
    if ref_tokens.len() < n || hyp_tokens.len() < n {
        return 0.0;
    }

    let ref_counts = ngram_counts(&ref_tokens, n);
    let hyp_counts = ngram_counts(&hyp_tokens, n);

    let mut overlap = 0usize;
    for (ngram, hyp_count) in &hyp_counts {
        let ref_count = ref_counts.get(ngram).copied().unwrap_or(0);
        overlap += (*hyp_count).min(ref_count);
    }

    let ref_total = ref_tokens.len() + 1 - n;
    let hyp_total = hyp_tokens.len() + 1 - n;
    f1(
        overlap as f64 / hyp_total as f64,
        overlap as f64 / ref_total as f64,
    )
}

/// ROUGE-L F1 from the longest common subsequence of the token streams.
pub fn rouge_l(reference: &str, hypothesis: &str) -> f64 {
    let ref_tokens: Vec<&str> = reference.split_whitespace().collect();
    let hyp_tokens: Vec<&str> = hypothesis.split_whitespace().collect();
    if ref_tokens.is_empty() || hyp_tokens.is_empty() {
        return 0.0;
    }

    let lcs = lcs_length(&ref_tokens, &hyp_tokens) as f64;
    f1(lcs / hyp_tokens.len() as f64, lcs / ref_tokens.len() as f64)
}

fn ngram_counts<'t>(tokens: &'t [&'t str], n: usize) -> HashMap<&'t [&'t str], usize> {
    let mut counts = HashMap::new();
    for window in tokens.windows(n) {
        *counts.entry(window).or_insert(0) += 1;
    }
    counts
}

fn lcs_length(a: &[&str], b: &[&str]) -> usize {
    let mut dp = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            dp[i][j] = if a[i - 1] == b[j - 1] {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i - 1][j].max(dp[i][j - 1])
            };
        }
    }
    dp[a.len()][b.len()]
}

fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        return 0.0;
    }
    2.0 * precision * recall / (precision + recall)
}
