use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::{Result, TokenizerError};
use crate::vocab::Vocab;

const PAD_TOKEN: &str = "<pad>";
const BOS_TOKEN: &str = "<s>";
const EOS_TOKEN: &str = "</s>";
const UNK_TOKEN: &str = "<unk>";

/// Serialized form: merges are kept as a ranked list so the file stays
/// valid JSON (pair keys cannot be JSON object keys).
#[derive(Serialize, Deserialize)]
struct BpeFile {
    vocab: HashMap<String, u32>,
    merges: Vec<(String, String)>,
    special_tokens: Vec<String>,
}

pub struct Bpe {
    vocab: Vocab,
    merges: HashMap<(String, String), u32>,
    special_tokens: Vec<String>,
    special_ids: HashSet<u32>,
    regex: Regex,
}

fn default_regex() -> Regex {
    Regex::new(r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+").unwrap()
}

impl std::fmt::Debug for Bpe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bpe")
            .field("vocab_size", &self.vocab.len())
            .field("merges_count", &self.merges.len())
            .field("special_tokens", &self.special_tokens)
            .finish()
    }
}

impl Bpe {
    pub fn from_parts(
        vocab: Vocab,
        ranked_merges: Vec<(String, String)>,
        special_tokens: Vec<String>,
    ) -> Self {
        let merges = ranked_merges
            .into_iter()
            .enumerate()
            .map(|(rank, pair)| (pair, rank as u32))
            .collect();
        let special_ids = special_tokens
            .iter()
            .filter_map(|token| vocab.get_id(token))
            .collect();
        Self {
            vocab,
            merges,
            special_tokens,
            special_ids,
            regex: default_regex(),
        }
    }

    /// Resolve a tokenizer by identifier (path to its serialized JSON).
    /// A missing or unreadable file is an unresolvable identifier.
    pub fn load<P: AsRef<Path>>(identifier: P) -> Result<Self> {
        let path = identifier.as_ref();
        let file = File::open(path)
            .map_err(|_| TokenizerError::UnknownIdentifier(path.display().to_string()))?;
        let reader = BufReader::new(file);
        let parsed: BpeFile = serde_json::from_reader(reader)?;

        Ok(Self::from_parts(
            Vocab::from_map(parsed.vocab),
            parsed.merges,
            parsed.special_tokens,
        ))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut ranked: Vec<(&(String, String), &u32)> = self.merges.iter().collect();
        ranked.sort_by_key(|(_, rank)| **rank);

        let file = BpeFile {
            vocab: self.vocab.token_to_id.clone(),
            merges: ranked.into_iter().map(|(pair, _)| pair.clone()).collect(),
            special_tokens: self.special_tokens.clone(),
        };

        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &file)?;
        Ok(())
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    pub fn token_id(&self, token: &str) -> Option<u32> {
        self.vocab.get_id(token)
    }

    pub fn pad_id(&self) -> Option<u32> {
        self.vocab.get_id(PAD_TOKEN)
    }

    pub fn bos_id(&self) -> Option<u32> {
        self.vocab.get_id(BOS_TOKEN)
    }

    pub fn eos_id(&self) -> Option<u32> {
        self.vocab.get_id(EOS_TOKEN)
    }

    pub fn is_special(&self, id: u32) -> bool {
        self.special_ids.contains(&id)
    }

    fn get_pairs(word: &[String]) -> HashSet<(String, String)> {
        let mut pairs = HashSet::new();
        for i in 0..word.len().saturating_sub(1) {
            pairs.insert((word[i].clone(), word[i + 1].clone()));
        }
        pairs
    }

    fn bpe(&self, token: &str) -> Vec<String> {
        let mut word: Vec<String> = token.chars().map(|c| c.to_string()).collect();

        loop {
            let pairs = Self::get_pairs(&word);
            if pairs.is_empty() {
                break;
            }

            let best_pair = pairs
                .into_iter()
                .filter_map(|pair| self.merges.get(&pair).map(|rank| (*rank, pair)))
                .min_by_key(|(rank, _)| *rank);

            let Some((_, (first, second))) = best_pair else {
                break;
            };

            let mut new_word = Vec::with_capacity(word.len());
            let mut i = 0;
            while i < word.len() {
                if i + 1 < word.len() && word[i] == first && word[i + 1] == second {
                    new_word.push(format!("{}{}", first, second));
                    i += 2;
                } else {
                    new_word.push(word[i].clone());
                    i += 1;
                }
            }

            word = new_word;
            if word.len() == 1 {
                break;
            }
        }

        word
    }

    pub fn encode(&self, text: &str) -> Vec<u32> {
        let mut ids = Vec::new();
        for mat in self.regex.find_iter(text) {
            for token in self.bpe(mat.as_str()) {
                if let Some(id) = self.vocab.get_id(&token) {
                    ids.push(id);
                } else {
                    // Byte fallback for tokens outside the vocab.
                    for byte in token.bytes() {
                        let byte_token = format!("<0x{:02X}>", byte);
                        if let Some(id) = self.vocab.get_id(&byte_token) {
                            ids.push(id);
                        } else if let Some(id) = self.vocab.get_id(UNK_TOKEN) {
                            ids.push(id);
                        }
                    }
                }
            }
        }
        ids
    }

    pub fn decode(
        &self,
        ids: &[u32],
        skip_special_tokens: bool,
        clean_up_tokenization_spaces: bool,
    ) -> String {
        let mut text = String::new();
        let mut pending_bytes: Vec<u8> = Vec::new();

        for &id in ids {
            if skip_special_tokens && self.is_special(id) {
                continue;
            }
            let Some(token) = self.vocab.get_token(id) else {
                continue;
            };
            if let Some(byte) = parse_byte_token(token) {
                pending_bytes.push(byte);
                continue;
            }
            flush_bytes(&mut text, &mut pending_bytes);
            text.push_str(token);
        }
        flush_bytes(&mut text, &mut pending_bytes);

        if clean_up_tokenization_spaces {
            clean_up_spaces(&text)
        } else {
            text
        }
    }

    pub fn batch_decode(
        &self,
        sequences: &[Vec<u32>],
        skip_special_tokens: bool,
        clean_up_tokenization_spaces: bool,
    ) -> Vec<String> {
        sequences
            .par_iter()
            .map(|ids| self.decode(ids, skip_special_tokens, clean_up_tokenization_spaces))
            .collect()
    }
}

fn parse_byte_token(token: &str) -> Option<u8> {
    let hex = token.strip_prefix("<0x")?.strip_suffix('>')?;
    u8::from_str_radix(hex, 16).ok()
}

fn flush_bytes(text: &mut String, pending: &mut Vec<u8>) {
    if !pending.is_empty() {
        text.push_str(&String::from_utf8_lossy(pending));
        pending.clear();
    }
}

fn clean_up_spaces(text: &str) -> String {
    let mut cleaned = text.to_string();
    for punct in [" .", " ,", " !", " ?", " '", " n't", " 'm", " 're", " 've", " 'll"] {
        let trimmed = punct.trim_start();
        cleaned = cleaned.replace(punct, trimmed);
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Bpe {
        let mut vocab = Vocab::new();
        for (id, token) in [
            PAD_TOKEN, BOS_TOKEN, EOS_TOKEN, UNK_TOKEN, "he", "llo", "hello", " wo", "rld", "ll",
            "o",
        ]
        .iter()
        .enumerate()
        {
            vocab.insert(token.to_string(), id as u32);
        }
        let merges = vec![
            ("h".to_string(), "e".to_string()),
            ("l".to_string(), "l".to_string()),
        ];
        let specials = vec![
            PAD_TOKEN.to_string(),
            BOS_TOKEN.to_string(),
            EOS_TOKEN.to_string(),
        ];
        Bpe::from_parts(vocab, merges, specials)
    }

    #[test]
    fn encode_applies_ranked_merges() {
        let bpe = fixture();
        assert_eq!(bpe.encode("hello"), vec![4, 9, 10]);
    }

    #[test]
    fn decode_concatenates_tokens() {
        let bpe = fixture();
        assert_eq!(bpe.decode(&[6, 7, 8], true, false), "hello world");
    }

    #[test]
    fn decode_skips_special_tokens_when_asked() {
        let bpe = fixture();
        let ids = [1u32, 6, 7, 8, 2, 0];
        assert_eq!(bpe.decode(&ids, true, false), "hello world");
        assert_eq!(bpe.decode(&ids, false, false), "<s>hello world</s><pad>");
    }

    #[test]
    fn batch_decode_keeps_order_and_length() {
        let bpe = fixture();
        let sequences = vec![vec![6u32], vec![6, 7, 8], vec![2]];
        let decoded = bpe.batch_decode(&sequences, true, false);
        assert_eq!(decoded, vec!["hello", "hello world", ""]);
    }

    #[test]
    fn special_id_lookup() {
        let bpe = fixture();
        assert_eq!(bpe.pad_id(), Some(0));
        assert_eq!(bpe.eos_id(), Some(2));
        assert!(bpe.is_special(2));
        assert!(!bpe.is_special(6));
    }

    #[test]
    fn load_rejects_missing_identifier() {
        let err = Bpe::load("/nonexistent/tokenizer.json").unwrap_err();
        assert!(matches!(err, TokenizerError::UnknownIdentifier(_)));
    }

    #[test]
    fn save_then_load_round_trips_specials() {
        let bpe = fixture();
        let path = std::env::temp_dir().join(format!("bpe-roundtrip-{}.json", std::process::id()));
        bpe.save(&path).unwrap();
        let loaded = Bpe::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded.vocab_size(), bpe.vocab_size());
        assert_eq!(loaded.decode(&[6, 7, 8], true, false), "hello world");
        assert!(loaded.is_special(0));
    }
}
