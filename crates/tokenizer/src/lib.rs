pub mod bpe;
pub mod error;
pub mod vocab;

pub use bpe::Bpe;
pub use error::TokenizerError;
pub use vocab::Vocab;
