use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Dimension of the token embeddings (and internal transformer states).
    pub n_embd: i64,
    /// Number of attention heads.
    pub n_head: i64,
    /// Number of encoder layers.
    pub n_encoder_layer: i64,
    /// Number of decoder layers.
    pub n_decoder_layer: i64,
    /// Size of the vocabulary.
    pub vocab_size: i64,
    /// Maximum source sequence length.
    pub max_source_len: i64,
    /// Maximum target sequence length.
    pub max_target_len: i64,
    /// Dropout probability (applied to attention, residuals and embeddings).
    pub dropout: f64,
    /// RMSNorm epsilon value (for numerical stability).
    pub layer_norm_epsilon: f64,
    /// Whether to use bias in linear layers.
    pub use_bias: bool,
    /// Padding token id.
    pub pad_token_id: i64,
    /// Token the decoder is primed with at generation time.
    pub decoder_start_token_id: i64,
    /// End-of-sequence token id; generation stops when a row emits it.
    pub eos_token_id: i64,
    /// Hard cap on the number of generated tokens per sequence.
    pub max_gen_len: i64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_embd: 512,
            n_head: 8,
            n_encoder_layer: 6,
            n_decoder_layer: 6,
            vocab_size: 32000,
            max_source_len: 1024,
            max_target_len: 256,
            dropout: 0.1,
            layer_norm_epsilon: 1e-5,
            use_bias: false,
            pad_token_id: 0,
            decoder_start_token_id: 1,
            eos_token_id: 2,
            max_gen_len: 128,
        }
    }
}

impl ModelConfig {
    pub fn head_size(&self) -> i64 {
        self.n_embd / self.n_head
    }
}
