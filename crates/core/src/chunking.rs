use crate::error::IngestError;

pub const DEFAULT_CHUNK_MAX_CHARS: usize = 1_000;

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_CHUNK_MAX_CHARS,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chars must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn flatten_line_breaks(text: &str) -> String {
    text.replace('\r', " ").replace('\n', " ")
}

/// Fixed-width slicing on character boundaries: `ceil(len / max_chars)`
/// chunks, no gaps, no overlap. Empty input yields no chunks.
pub fn split_fixed(text: &str, config: ChunkingConfig) -> Result<Vec<String>, IngestError> {
    config.validate()?;

    let flattened = flatten_line_breaks(text);
    if flattened.is_empty() {
        return Ok(Vec::new());
    }

    let chars: Vec<char> = flattened.chars().collect();
    let mut chunks = Vec::with_capacity(chars.len().div_ceil(config.max_chars));

    let mut start = 0;
    while start < chars.len() {
        let end = (start + config.max_chars).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        start = end;
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_chars: usize) -> ChunkingConfig {
        ChunkingConfig { max_chars }
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let chunks = split_fixed("", config(100)).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn zero_width_config_is_rejected() {
        assert!(split_fixed("abc", config(0)).is_err());
    }

    #[test]
    fn line_breaks_become_spaces() {
        let chunks = split_fixed("a\r\nb\nc", config(100)).unwrap();
        assert_eq!(chunks, vec!["a  b c".to_string()]);
    }

    #[test]
    fn chunk_count_is_ceiling_of_length_over_max() {
        let text = "x".repeat(2_500);
        let chunks = split_fixed(&text, config(1_000)).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 1_000);
        assert_eq!(chunks[2].len(), 500);
    }

    #[test]
    fn concatenated_chunks_reproduce_the_flattened_input() {
        let text = "The quick brown fox\njumps over the lazy dog. ".repeat(40);
        let chunks = split_fixed(&text, config(97)).unwrap();

        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 97));
        assert_eq!(chunks.concat(), flatten_line_breaks(&text));
    }

    #[test]
    fn multibyte_text_splits_on_character_boundaries() {
        let text = "ação jurídica é ótima ".repeat(30);
        let chunks = split_fixed(&text, config(50)).unwrap();

        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 50));
        assert_eq!(chunks.concat(), flatten_line_breaks(&text));
    }
}
