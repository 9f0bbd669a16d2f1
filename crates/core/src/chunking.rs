use crate::error::ChunkingError;
use crate::models::Chunk;
use sha2::{Digest, Sha256};

pub const DEFAULT_CHUNK_MAX_CHARS: usize = 1_000;
pub const DEFAULT_CHUNK_OVERLAP_CHARS: usize = 200;

/// Sizes are counted in `char`s, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
    /// Pull a window's end back to the last whitespace it contains so words
    /// stay whole. Ignored when that would leave the chunk no longer than
    /// the overlap.
    pub split_on_whitespace: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_CHUNK_MAX_CHARS,
            overlap_chars: DEFAULT_CHUNK_OVERLAP_CHARS,
            split_on_whitespace: true,
        }
    }
}

impl ChunkingConfig {
    pub fn new(max_chars: usize, overlap_chars: usize) -> Result<Self, ChunkingError> {
        let config = Self {
            max_chars,
            overlap_chars,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ChunkingError> {
        if self.max_chars == 0 {
            return Err(ChunkingError::InvalidConfig(
                "max_chars must be greater than zero".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(ChunkingError::InvalidConfig(format!(
                "overlap_chars {} must be smaller than max_chars {}",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

/// Splits `text` into windows of at most `max_chars`. Every chunk after the
/// first starts with the last `overlap_chars` characters of its predecessor.
pub fn split_text(text: &str, config: ChunkingConfig) -> Result<Vec<String>, ChunkingError> {
    config.validate()?;

    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    if chars.is_empty() {
        return Ok(chunks);
    }

    let mut start = 0;
    loop {
        let mut end = (start + config.max_chars).min(chars.len());

        if end < chars.len() && config.split_on_whitespace {
            // end must stay past start + overlap so the next window advances
            if let Some(boundary) = (start + config.overlap_chars + 1..end)
                .rev()
                .find(|&position| chars[position - 1].is_whitespace())
            {
                end = boundary;
            }
        }

        chunks.push(chars[start..end].iter().collect::<String>());
        if end == chars.len() {
            break;
        }
        start = end - config.overlap_chars;
    }

    Ok(chunks)
}

/// Inverse of [`split_text`]: drops the repeated prefix of every chunk after
/// the first and joins the rest.
pub fn reassemble(chunks: &[String], overlap_chars: usize) -> String {
    let mut text = String::new();
    for (index, chunk) in chunks.iter().enumerate() {
        if index == 0 {
            text.push_str(chunk);
        } else {
            text.extend(chunk.chars().skip(overlap_chars));
        }
    }
    text
}

pub fn build_chunks(
    document_name: &str,
    text: &str,
    config: ChunkingConfig,
) -> Result<Vec<Chunk>, ChunkingError> {
    let chunks = split_text(text, config)?
        .into_iter()
        .enumerate()
        .map(|(index, piece)| {
            let chunk_index = index as u64;
            Chunk {
                chunk_id: make_chunk_id(document_name, chunk_index, &piece),
                document_name: document_name.to_string(),
                chunk_index,
                text: piece,
            }
        })
        .collect();

    Ok(chunks)
}

fn make_chunk_id(document_name: &str, index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_name.as_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fixed(max_chars: usize, overlap_chars: usize) -> ChunkingConfig {
        ChunkingConfig {
            max_chars,
            overlap_chars,
            split_on_whitespace: false,
        }
    }

    #[test]
    fn short_text_yields_one_chunk() {
        let text = "Patient has mild fever. Recommend rest and fluids.";
        let chunks = split_text(text, ChunkingConfig::default()).unwrap();
        assert_eq!(chunks, vec![text.to_string()]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(split_text("", ChunkingConfig::default()).unwrap().is_empty());
    }

    #[test]
    fn fixed_windows_step_by_size_minus_overlap() {
        let chunks = split_text("abcdefghij", fixed(4, 1)).unwrap();
        assert_eq!(chunks, vec!["abcd", "defg", "ghij"]);
    }

    #[test]
    fn whitespace_mode_keeps_words_whole() {
        let text = "alpha beta gamma delta epsilon";
        let config = ChunkingConfig {
            max_chars: 12,
            overlap_chars: 3,
            split_on_whitespace: true,
        };
        let chunks = split_text(text, config).unwrap();
        assert_eq!(chunks[0], "alpha beta ");
        assert!(chunks[1].starts_with("ta "));
        assert_eq!(reassemble(&chunks, 3), text);
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let text = "fièvre légère, repos et hydratation";
        let chunks = split_text(text, fixed(8, 2)).unwrap();
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 8));
        assert_eq!(reassemble(&chunks, 2), text);
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        assert!(ChunkingConfig::new(100, 100).is_err());
        assert!(ChunkingConfig::new(0, 0).is_err());
        assert!(split_text("text", fixed(10, 20)).is_err());
    }

    #[test]
    fn chunk_records_keep_order_and_stable_ids() {
        let first = build_chunks("a.pdf", "abcdefghij", fixed(4, 1)).unwrap();
        let second = build_chunks("a.pdf", "abcdefghij", fixed(4, 1)).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first.iter().map(|chunk| chunk.chunk_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_ne!(first[0].chunk_id, first[1].chunk_id);

        let other = build_chunks("b.pdf", "abcdefghij", fixed(4, 1)).unwrap();
        assert_ne!(first[0].chunk_id, other[0].chunk_id);
    }

    fn sizes() -> impl Strategy<Value = (usize, usize)> {
        (1usize..64).prop_flat_map(|max| (Just(max), 0..max))
    }

    proptest! {
        #[test]
        fn chunks_reassemble_to_input(
            text in "[a-z \n\u{e9}]{0,400}",
            (max, overlap) in sizes(),
            split_on_whitespace in any::<bool>(),
        ) {
            let config = ChunkingConfig { max_chars: max, overlap_chars: overlap, split_on_whitespace };
            let chunks = split_text(&text, config).unwrap();

            prop_assert_eq!(reassemble(&chunks, overlap), text.clone());
            for chunk in &chunks {
                prop_assert!(chunk.chars().count() <= max);
            }
            for pair in chunks.windows(2) {
                let previous: Vec<char> = pair[0].chars().collect();
                let tail: String = previous[previous.len() - overlap..].iter().collect();
                prop_assert!(pair[1].starts_with(&tail));
            }
        }

        #[test]
        fn chunking_is_deterministic(text in ".{0,300}", (max, overlap) in sizes()) {
            let config = ChunkingConfig { max_chars: max, overlap_chars: overlap, split_on_whitespace: true };
            prop_assert_eq!(split_text(&text, config).unwrap(), split_text(&text, config).unwrap());
        }
    }
}
