use crate::HelperError;

/// Fixed-size character windows with a constant overlap.
///
/// Windows advance by `chunk_size - chunk_overlap` characters, so a text of
/// `L > chunk_size` characters yields `ceil((L - overlap) / (size - overlap))`
/// chunks, and any non-empty text no longer than `chunk_size` yields one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
        }
    }
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, HelperError> {
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(HelperError::InvalidConfiguration(format!(
                "chunk_overlap ({chunk_overlap}) must be smaller than a non-zero chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();
        let step = self.chunk_size - self.chunk_overlap;

        let mut chunks = Vec::new();
        let mut start = 0;
        while start < len {
            let end = (start + self.chunk_size).min(len);
            chunks.push(chars[start..end].iter().collect());
            if end == len {
                break;
            }
            start += step;
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected(len: usize, size: usize, overlap: usize) -> usize {
        match len {
            0 => 0,
            l if l <= size => 1,
            l => (l - overlap).div_ceil(size - overlap),
        }
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(TextSplitter::default().split("").is_empty());
    }

    #[test]
    fn chunk_counts_follow_window_formula() {
        let splitter = TextSplitter::default();
        for len in [1, 999, 1000, 1001, 1900, 1901, 2800, 2801, 10_000] {
            let text = "a".repeat(len);
            assert_eq!(splitter.split(&text).len(), expected(len, 1000, 100), "len {len}");
        }
    }

    #[test]
    fn consecutive_chunks_share_the_overlap() {
        let splitter = TextSplitter::new(10, 3).unwrap();
        let text: String = ('a'..='z').collect();
        let chunks = splitter.split(&text);

        assert_eq!(chunks[0], "abcdefghij");
        assert_eq!(chunks[1], "hijklmnopq");
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 10));
        assert!(chunks.last().is_some_and(|chunk| chunk.ends_with('z')));
    }

    #[test]
    fn lengths_are_counted_in_characters() {
        let splitter = TextSplitter::new(4, 1).unwrap();
        let chunks = splitter.split("ääääää");
        assert_eq!(chunks, vec!["ääää".to_string(), "äää".to_string()]);
    }

    #[test]
    fn invalid_overlap_is_rejected() {
        assert!(TextSplitter::new(100, 100).is_err());
        assert!(TextSplitter::new(0, 0).is_err());
    }
}
