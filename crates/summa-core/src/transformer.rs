use anyhow::Result;
use tch::{nn, IndexOp, Kind, Tensor};

use crate::attention::MultiHeadAttention;
use crate::batch::{Encoded, Seq2SeqOutput, LABEL_IGNORE_ID};
use crate::config::ModelConfig;
use crate::layer_norm::RmsNorm;
use crate::mode::Mode;
use crate::model::Seq2SeqModel;

/// FeedForward block (MLP)
pub struct Mlp {
    c_fc: nn::Linear,
    c_proj: nn::Linear,
    dropout: f64,
}

impl Mlp {
    pub fn new(vs: &nn::Path, config: &ModelConfig) -> Self {
        let n_embd = config.n_embd;
        let n_hidden = 4 * n_embd;

        let c_fc = nn::linear(vs / "c_fc", n_embd, n_hidden, Default::default());
        let c_proj = nn::linear(vs / "c_proj", n_hidden, n_embd, Default::default());

        Self {
            c_fc,
            c_proj,
            dropout: config.dropout,
        }
    }

    pub fn forward(&self, x: &Tensor, train: bool) -> Tensor {
        x.apply(&self.c_fc)
            .gelu("none")
            .apply(&self.c_proj)
            .dropout(self.dropout, train)
    }
}

/// Encoder block: bidirectional self-attention + MLP, pre-norm.
pub struct EncoderBlock {
    ln_1: RmsNorm,
    attn: MultiHeadAttention,
    ln_2: RmsNorm,
    mlp: Mlp,
}

impl EncoderBlock {
    pub fn new(vs: &nn::Path, config: &ModelConfig) -> Self {
        let eps = config.layer_norm_epsilon;
        Self {
            ln_1: RmsNorm::new(&(vs / "ln_1"), config.n_embd, eps),
            attn: MultiHeadAttention::new(&(vs / "attn"), config, false, true),
            ln_2: RmsNorm::new(&(vs / "ln_2"), config.n_embd, eps),
            mlp: Mlp::new(&(vs / "mlp"), config),
        }
    }

    pub fn forward(&self, x: &Tensor, padding_mask: Option<&Tensor>, train: bool) -> Tensor {
        let x = x + self
            .attn
            .forward(&self.ln_1.forward(x), None, padding_mask, train);
        &x + self.mlp.forward(&self.ln_2.forward(&x), train)
    }
}

/// Decoder block: causal self-attention, cross-attention over the
/// encoder states, then MLP.
pub struct DecoderBlock {
    ln_1: RmsNorm,
    self_attn: MultiHeadAttention,
    ln_2: RmsNorm,
    cross_attn: MultiHeadAttention,
    ln_3: RmsNorm,
    mlp: Mlp,
}

impl DecoderBlock {
    pub fn new(vs: &nn::Path, config: &ModelConfig) -> Self {
        let eps = config.layer_norm_epsilon;
        Self {
            ln_1: RmsNorm::new(&(vs / "ln_1"), config.n_embd, eps),
            self_attn: MultiHeadAttention::new(&(vs / "self_attn"), config, true, true),
            ln_2: RmsNorm::new(&(vs / "ln_2"), config.n_embd, eps),
            cross_attn: MultiHeadAttention::new(&(vs / "cross_attn"), config, false, false),
            ln_3: RmsNorm::new(&(vs / "ln_3"), config.n_embd, eps),
            mlp: Mlp::new(&(vs / "mlp"), config),
        }
    }

    pub fn forward(
        &self,
        x: &Tensor,
        memory: &Tensor,
        memory_mask: Option<&Tensor>,
        train: bool,
    ) -> Tensor {
        let x = x + self
            .self_attn
            .forward(&self.ln_1.forward(x), None, None, train);
        let x = &x
            + self
                .cross_attn
                .forward(&self.ln_2.forward(&x), Some(memory), memory_mask, train);
        &x + self.mlp.forward(&self.ln_3.forward(&x), train)
    }
}

/// Encoder–decoder transformer with a shared token embedding and a
/// linear LM head.
pub struct SummaTransformer {
    wte: nn::Embedding,
    drop: f64,
    encoder: Vec<EncoderBlock>,
    decoder: Vec<DecoderBlock>,
    ln_enc: RmsNorm,
    ln_dec: RmsNorm,
    lm_head: nn::Linear,
    pub config: ModelConfig,
}

impl SummaTransformer {
    pub fn new(vs: &nn::Path, config: &ModelConfig) -> Self {
        let wte = nn::embedding(
            vs / "wte",
            config.vocab_size,
            config.n_embd,
            Default::default(),
        );

        let mut encoder = Vec::new();
        for i in 0..config.n_encoder_layer {
            encoder.push(EncoderBlock::new(&(vs / "encoder" / i), config));
        }
        let mut decoder = Vec::new();
        for i in 0..config.n_decoder_layer {
            decoder.push(DecoderBlock::new(&(vs / "decoder" / i), config));
        }

        let eps = config.layer_norm_epsilon;
        let ln_enc = RmsNorm::new(&(vs / "ln_enc"), config.n_embd, eps);
        let ln_dec = RmsNorm::new(&(vs / "ln_dec"), config.n_embd, eps);
        let lm_head = nn::linear(
            vs / "lm_head",
            config.n_embd,
            config.vocab_size,
            nn::LinearConfig {
                bias: false,
                ..Default::default()
            },
        );

        Self {
            wte,
            drop: config.dropout,
            encoder,
            decoder,
            ln_enc,
            ln_dec,
            lm_head,
            config: config.clone(),
        }
    }

    /// input_ids: [batch, source_len]. Returns encoder states of the same
    /// sequence shape.
    pub fn encode(&self, input_ids: &Tensor, attention_mask: Option<&Tensor>, train: bool) -> Tensor {
        let mut x = input_ids.apply(&self.wte).dropout(self.drop, train);
        for block in &self.encoder {
            x = block.forward(&x, attention_mask, train);
        }
        self.ln_enc.forward(&x)
    }

    /// decoder_input_ids: [batch, target_len]. Returns logits
    /// [batch, target_len, vocab].
    pub fn decode(
        &self,
        decoder_input_ids: &Tensor,
        memory: &Tensor,
        memory_mask: Option<&Tensor>,
        train: bool,
    ) -> Tensor {
        let mut x = decoder_input_ids.apply(&self.wte).dropout(self.drop, train);
        for block in &self.decoder {
            x = block.forward(&x, memory, memory_mask, train);
        }
        let x = self.ln_dec.forward(&x);
        x.apply(&self.lm_head)
    }
}

impl Seq2SeqModel for SummaTransformer {
    fn apply(&self, encoded: &Encoded, mode: Mode) -> Result<Seq2SeqOutput> {
        let train = mode.is_train();
        let memory = self.encode(&encoded.input_ids, Some(&encoded.attention_mask), train);
        let decoder_inputs =
            encoded.decoder_inputs(self.config.decoder_start_token_id, self.config.pad_token_id);
        let logits = self.decode(&decoder_inputs, &memory, Some(&encoded.attention_mask), train);

        let (b, t, v) = logits.size3()?;
        let loss = logits.view([b * t, v]).cross_entropy_loss::<Tensor>(
            &encoded.labels.view([b * t]),
            None,
            tch::Reduction::Mean,
            LABEL_IGNORE_ID,
            0.0,
        );

        Ok(Seq2SeqOutput { logits, loss })
    }

    fn generate(&self, encoded: &Encoded) -> Result<Vec<Vec<i64>>> {
        let _guard = tch::no_grad_guard();
        let device = encoded.input_ids.device();
        let b = encoded.batch_size();

        let memory = self.encode(&encoded.input_ids, Some(&encoded.attention_mask), false);

        let mut tokens = Tensor::full(
            &[b, 1],
            self.config.decoder_start_token_id,
            (Kind::Int64, device),
        );
        let mut finished = vec![false; b as usize];
        let mut outputs: Vec<Vec<i64>> = vec![Vec::new(); b as usize];

        for _ in 0..self.config.max_gen_len {
            let logits = self.decode(&tokens, &memory, Some(&encoded.attention_mask), false);
            let next = logits.i((.., -1, ..)).argmax(-1, false);

            for row in 0..b {
                if finished[row as usize] {
                    continue;
                }
                let id = next.int64_value(&[row]);
                if id == self.config.eos_token_id {
                    finished[row as usize] = true;
                } else {
                    outputs[row as usize].push(id);
                }
            }
            if finished.iter().all(|f| *f) {
                break;
            }
            tokens = Tensor::cat(&[&tokens, &next.unsqueeze(1)], 1);
        }

        Ok(outputs)
    }
}

unsafe impl Send for SummaTransformer {}
unsafe impl Sync for SummaTransformer {}
