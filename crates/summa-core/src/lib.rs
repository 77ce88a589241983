pub mod attention;
pub mod batch;
pub mod config;
pub mod layer_norm;
pub mod mode;
pub mod model;
pub mod rotary;
pub mod safetensors_util;
pub mod transformer;

pub use batch::{Batch, Encoded, Seq2SeqOutput, LABEL_IGNORE_ID};
pub use config::ModelConfig;
pub use mode::{InvalidModeError, Mode};
pub use model::Seq2SeqModel;
pub use transformer::SummaTransformer;
