use tch::{nn, Kind, Tensor};

use crate::config::ModelConfig;
use crate::rotary::RotaryEmbedding;

/// Multi-head attention over either the input sequence itself or an
/// external memory (encoder states). Causal masking is fixed at
/// construction; padding of the key side is masked per call.
pub struct MultiHeadAttention {
    q_proj: nn::Linear,
    k_proj: nn::Linear,
    v_proj: nn::Linear,
    out_proj: nn::Linear,
    n_head: i64,
    dropout: f64,
    causal: bool,
    rotary_emb: Option<RotaryEmbedding>,
}

impl MultiHeadAttention {
    pub fn new(vs: &nn::Path, config: &ModelConfig, causal: bool, rotary: bool) -> Self {
        let n_embd = config.n_embd;
        let linear_config = nn::LinearConfig {
            bias: config.use_bias,
            ..Default::default()
        };

        let q_proj = nn::linear(vs / "q_proj", n_embd, n_embd, linear_config);
        let k_proj = nn::linear(vs / "k_proj", n_embd, n_embd, linear_config);
        let v_proj = nn::linear(vs / "v_proj", n_embd, n_embd, linear_config);
        let out_proj = nn::linear(vs / "out_proj", n_embd, n_embd, linear_config);

        let rotary_emb = rotary.then(|| RotaryEmbedding::new(config.head_size(), vs.device()));

        Self {
            q_proj,
            k_proj,
            v_proj,
            out_proj,
            n_head: config.n_head,
            dropout: config.dropout,
            causal,
            rotary_emb,
        }
    }

    /// x: [batch, t, n_embd]. With `memory` set, keys/values come from it
    /// (cross-attention); otherwise from `x`. `key_padding_mask` is the
    /// [batch, s] 1/0 mask of the key side.
    pub fn forward(
        &self,
        x: &Tensor,
        memory: Option<&Tensor>,
        key_padding_mask: Option<&Tensor>,
        train: bool,
    ) -> Tensor {
        let (b, t, c) = x.size3().unwrap();
        let source = memory.unwrap_or(x);
        let s = source.size()[1];
        let head_size = c / self.n_head;

        let mut q = x
            .apply(&self.q_proj)
            .view([b, t, self.n_head, head_size])
            .transpose(1, 2);
        let mut k = source
            .apply(&self.k_proj)
            .view([b, s, self.n_head, head_size])
            .transpose(1, 2);
        let v = source
            .apply(&self.v_proj)
            .view([b, s, self.n_head, head_size])
            .transpose(1, 2);

        if let Some(rotary) = &self.rotary_emb {
            q = rotary.forward(&q);
            k = rotary.forward(&k);
        }

        let mut att = q.matmul(&k.transpose(-2, -1)) * (1.0 / (head_size as f64).sqrt());

        if self.causal && t > 1 {
            let keep = Tensor::ones(&[t, s], (Kind::Bool, x.device())).tril(0);
            att = att.masked_fill(&keep.logical_not(), f64::NEG_INFINITY);
        }
        if let Some(mask) = key_padding_mask {
            // [batch, s] -> [batch, 1, 1, s]
            let mask = mask.unsqueeze(1).unsqueeze(1);
            att = att.masked_fill(&mask.eq(0), f64::NEG_INFINITY);
        }

        let att = att.softmax(-1, Kind::Float).dropout(self.dropout, train);
        let y = att.matmul(&v).transpose(1, 2).contiguous().view([b, t, c]);
        y.apply(&self.out_proj)
    }
}

unsafe impl Send for MultiHeadAttention {}
unsafe impl Sync for MultiHeadAttention {}
