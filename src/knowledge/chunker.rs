//! Text Chunking Module
//!
//! 빈 줄(문단 경계) 단위로 텍스트를 나누고, 크기 예산 안에서 문단을 합칩니다.
//! 예산보다 긴 문단은 고정 윈도우로 자르며 `chunk_size - overlap`씩 전진합니다.
//!
//! 길이는 모두 문자(char) 수 기준입니다. 같은 입력은 항상 같은 청크 목록을 만듭니다.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::{RagSettings, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::error::{RagError, Result};

/// 문단 경계 (연속된 빈 줄)
static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\n+").expect("paragraph regex is valid"));

/// 문단을 합칠 때 사이에 넣는 구분자
const PARAGRAPH_JOINER: &str = "\n\n";

// ============================================================================
// Chunker
// ============================================================================

/// 문단 인식 청커
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl Chunker {
    /// 청커 생성
    ///
    /// `overlap >= chunk_size`이면 윈도우가 전진하지 않으므로 설정 에러입니다.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::Configuration("chunk_size must be > 0".to_string()));
        }
        if overlap >= chunk_size {
            return Err(RagError::Configuration(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                overlap, chunk_size
            )));
        }
        Ok(Self { chunk_size, overlap })
    }

    pub fn from_settings(settings: &RagSettings) -> Result<Self> {
        Self::new(settings.chunk_size, settings.chunk_overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// 텍스트를 청크로 분할
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current = String::new();
        // current의 문자 수 (매번 다시 세지 않도록 추적)
        let mut current_len = 0;

        for paragraph in PARAGRAPH_BREAK.split(text) {
            let paragraph_len = paragraph.chars().count();

            if current_len + paragraph_len < self.chunk_size {
                if !current.is_empty() {
                    current.push_str(PARAGRAPH_JOINER);
                    current_len += PARAGRAPH_JOINER.len();
                }
                current.push_str(paragraph);
                current_len += paragraph_len;
                continue;
            }

            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }

            if paragraph_len > self.chunk_size {
                chunks.extend(self.slice_windows(paragraph));
                current_len = 0;
            } else {
                current = paragraph.to_string();
                current_len = paragraph_len;
            }
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        chunks.retain(|c| !c.trim().is_empty());
        chunks
    }

    /// 긴 문단을 고정 윈도우로 자르기
    fn slice_windows(&self, paragraph: &str) -> Vec<String> {
        let chars: Vec<char> = paragraph.chars().collect();
        let step = self.chunk_size - self.overlap;

        (0..chars.len())
            .step_by(step)
            .map(|start| {
                let end = (start + self.chunk_size).min(chars.len());
                chars[start..end].iter().collect()
            })
            .collect()
    }
}

/// 텍스트를 청크로 분할 (편의 함수)
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>> {
    Ok(Chunker::new(chunk_size, overlap)?.chunk(text))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn non_whitespace(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn test_chunker_empty() {
        let chunker = Chunker::default();
        assert!(chunker.chunk("").is_empty());
        assert!(chunker.chunk("   \n\n \n\n\t").is_empty());
    }

    #[test]
    fn test_chunker_small_text() {
        let chunks = Chunker::default().chunk("Short paragraph.\n\nAnother one.");
        assert_eq!(chunks, vec!["Short paragraph.\n\nAnother one.".to_string()]);
    }

    #[test]
    fn test_paragraphs_flushed_at_budget() {
        let chunker = Chunker::new(20, 5).unwrap();
        let text = "aaaaaaaaaa\n\nbbbbbbbbbb\n\ncccc";
        let chunks = chunker.chunk(text);
        // 10 + 10 = 20 은 예산(20) 미만이 아니므로 분리
        assert_eq!(chunks, vec!["aaaaaaaaaa", "bbbbbbbbbb\n\ncccc"]);
    }

    #[test]
    fn test_long_paragraph_sliced_with_overlap() {
        let chunker = Chunker::new(10, 3).unwrap();
        let text = "abcdefghijklmnopqrstu";
        let chunks = chunker.chunk(text);
        assert_eq!(chunks, vec!["abcdefghij", "hijklmnopq", "opqrstu"]);

        // 각 윈도우에서 겹친 앞부분을 빼면 원문 복원
        let mut rebuilt = chunks[0].clone();
        for chunk in &chunks[1..] {
            rebuilt.extend(chunk.chars().skip(3));
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_paragraph_equal_to_size_is_kept_whole() {
        let chunker = Chunker::new(10, 2).unwrap();
        let chunks = chunker.chunk("0123456789");
        assert_eq!(chunks, vec!["0123456789"]);
    }

    #[test]
    fn test_chunker_is_deterministic() {
        let text = "First paragraph about Rust.\n\n\n\nSecond paragraph about tokio and async.\n\n"
            .repeat(20);
        let chunker = Chunker::new(120, 30).unwrap();
        assert_eq!(chunker.chunk(&text), chunker.chunk(&text));
    }

    #[test]
    fn test_non_whitespace_content_preserved() {
        let text = "Alpha beta gamma.\n\nDelta epsilon.\n\n\nZeta eta theta iota.\n\nKappa.";
        let chunks = Chunker::new(30, 5).unwrap().chunk(text);
        assert!(chunks.len() > 1);
        assert_eq!(non_whitespace(&chunks.concat()), non_whitespace(text));
    }

    #[test]
    fn test_multibyte_text_sliced_on_char_boundaries() {
        let text = "가나다라마바사아자차카타파하".repeat(3);
        let chunks = Chunker::new(10, 2).unwrap().chunk(&text);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks[0].chars().count(), 10);
    }

    #[test]
    fn test_invalid_overlap_rejected() {
        assert!(matches!(Chunker::new(100, 100), Err(RagError::Configuration(_))));
        assert!(matches!(Chunker::new(100, 150), Err(RagError::Configuration(_))));
        assert!(matches!(Chunker::new(0, 0), Err(RagError::Configuration(_))));
        assert!(chunk_text("abc", 10, 10).is_err());
    }
}
