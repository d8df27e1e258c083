//! Fixed-window text chunker with overlap.
//!
//! Splits text into consecutive windows of at most `max_size` characters.
//! Every window after the first starts `max_size - overlap` characters after
//! the previous one, so consecutive chunks share exactly `overlap`
//! characters (the final chunk may be shorter).
//!
//! Offsets are counted in Unicode scalar values, not bytes, so Japanese
//! transcripts are cut on character boundaries.
//!
//! # Example
//!
//! ```rust
//! use memo_rag::chunk::TextChunker;
//!
//! let chunker = TextChunker::new(1000, 200).unwrap();
//! let chunks = chunker.chunk(&"A".repeat(2500));
//! let starts: Vec<usize> = chunks.iter().map(|c| c.start_index).collect();
//! assert_eq!(starts, vec![0, 800, 1600]);
//! ```

use sha2::{Digest, Sha256};

use crate::error::{RagError, RagResult};
use crate::models::{Chunk, ChunkMetadata};

/// A span of a timed transcript, in character offsets of the transcript text.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptSegment {
    pub start_index: usize,
    pub end_index: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub speaker: Option<String>,
}

/// Validated chunking policy. Construction fails when `overlap >= max_size`,
/// so a chunker that exists can always make progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextChunker {
    max_size: usize,
    overlap: usize,
}

impl TextChunker {
    pub fn new(max_size: usize, overlap: usize) -> RagResult<Self> {
        if max_size == 0 {
            return Err(RagError::Config("chunking.max_size must be > 0".into()));
        }
        if overlap >= max_size {
            return Err(RagError::Config(format!(
                "chunking.overlap ({overlap}) must be smaller than chunking.max_size ({max_size})"
            )));
        }
        Ok(Self { max_size, overlap })
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split `text` into overlapping chunks, without embeddings.
    ///
    /// Empty text yields no chunks. Text no longer than `max_size` yields
    /// exactly one chunk spanning the whole text. Chunk numbers are assigned once the full sequence is
    /// known.
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();
        if len == 0 {
            return Vec::new();
        }
        let stride = self.max_size - self.overlap;

        let mut spans = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + self.max_size).min(len);
            spans.push((start, end));
            if end == len {
                break;
            }
            start += stride;
        }

        let total = spans.len();
        spans
            .into_iter()
            .enumerate()
            .map(|(i, (start, end))| {
                let piece: String = chars[start..end].iter().collect();
                make_chunk(piece, start, end, i + 1, total)
            })
            .collect()
    }
}

/// Fill `start_time`, `end_time`, and `speaker` on chunks cut from a timed
/// transcript. A chunk takes the start time of the first segment it
/// overlaps and the end time of the last; `speaker` is set only when every
/// overlapping segment has the same speaker.
pub fn annotate_with_segments(chunks: &mut [Chunk], segments: &[TranscriptSegment]) {
    for chunk in chunks.iter_mut() {
        let overlapping: Vec<&TranscriptSegment> = segments
            .iter()
            .filter(|s| s.start_index < chunk.end_index && s.end_index > chunk.start_index)
            .collect();

        let (first, last) = match (overlapping.first(), overlapping.last()) {
            (Some(f), Some(l)) => (f, l),
            _ => continue,
        };

        chunk.metadata.start_time = Some(first.start_time);
        chunk.metadata.end_time = Some(last.end_time);

        let speaker = first.speaker.clone();
        if overlapping.iter().all(|s| s.speaker == speaker) {
            chunk.metadata.speaker = speaker;
        }
    }
}

/// Create a single [`Chunk`]. The id is derived from position and content,
/// so re-chunking unchanged text yields identical ids.
fn make_chunk(text: String, start: usize, end: usize, number: usize, total: usize) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(start.to_le_bytes());
    hasher.update(end.to_le_bytes());
    hasher.update(text.as_bytes());
    let digest = format!("{:x}", hasher.finalize());

    Chunk {
        id: digest[..32].to_string(),
        text,
        start_index: start,
        end_index: end,
        embedding: None,
        metadata: ChunkMetadata {
            chunk_number: number,
            total_chunks: total,
            start_time: None,
            end_time: None,
            speaker: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_overlap_not_smaller_than_size() {
        assert!(matches!(TextChunker::new(100, 100), Err(RagError::Config(_))));
        assert!(matches!(TextChunker::new(100, 150), Err(RagError::Config(_))));
        assert!(matches!(TextChunker::new(0, 0), Err(RagError::Config(_))));
        assert!(TextChunker::new(100, 99).is_ok());
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunker = TextChunker::new(1000, 200).unwrap();
        let chunks = chunker.chunk("Hello, world!");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_index, 0);
        assert_eq!(chunks[0].end_index, 13);
        assert_eq!(chunks[0].metadata.chunk_number, 1);
        assert_eq!(chunks[0].metadata.total_chunks, 1);
    }

    #[test]
    fn test_empty_text_no_chunks() {
        let chunker = TextChunker::new(1000, 200).unwrap();
        assert!(chunker.chunk("").is_empty());
    }

    #[test]
    fn test_exact_size_single_chunk() {
        let chunker = TextChunker::new(10, 3).unwrap();
        let chunks = chunker.chunk(&"x".repeat(10));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].end_index, 10);
    }

    #[test]
    fn test_2500_chars_three_chunks() {
        let chunker = TextChunker::new(1000, 200).unwrap();
        let chunks = chunker.chunk(&"A".repeat(2500));
        assert_eq!(chunks.len(), 3);
        let spans: Vec<(usize, usize)> =
            chunks.iter().map(|c| (c.start_index, c.end_index)).collect();
        assert_eq!(spans, vec![(0, 1000), (800, 1800), (1600, 2500)]);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.metadata.chunk_number, i + 1);
            assert_eq!(c.metadata.total_chunks, 3);
        }
    }

    #[test]
    fn test_coverage_and_overlap() {
        let text: String = (0..537).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let chunker = TextChunker::new(100, 30).unwrap();
        let chunks = chunker.chunk(&text);

        assert_eq!(chunks[0].start_index, 0);
        assert_eq!(chunks.last().unwrap().end_index, 537);
        for c in &chunks {
            assert!(c.end_index - c.start_index <= 100);
            assert!(c.start_index < c.end_index);
        }
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start_index, pair[0].start_index + 70);
            // No gaps between consecutive windows.
            assert!(pair[1].start_index <= pair[0].end_index);
            if pair[1].end_index - pair[1].start_index == 100 {
                assert_eq!(pair[0].end_index - pair[1].start_index, 30);
            }
        }
    }

    #[test]
    fn test_text_matches_offsets_multibyte() {
        let text = "今日は会議の議事録を作成しました。次回の予定も確認します。";
        let chunker = TextChunker::new(10, 4).unwrap();
        let chunks = chunker.chunk(text);
        let chars: Vec<char> = text.chars().collect();
        for c in &chunks {
            let expected: String = chars[c.start_index..c.end_index].iter().collect();
            assert_eq!(c.text, expected);
        }
    }

    #[test]
    fn test_deterministic() {
        let chunker = TextChunker::new(20, 5).unwrap();
        let text = "Alpha beta gamma delta epsilon zeta eta theta iota kappa lambda";
        let c1 = chunker.chunk(text);
        let c2 = chunker.chunk(text);
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_annotate_with_segments() {
        let chunker = TextChunker::new(10, 2).unwrap();
        let text = "aaaaaaaaaabbbbbbbbbb";
        let mut chunks = chunker.chunk(text);
        let segments = vec![
            TranscriptSegment {
                start_index: 0,
                end_index: 10,
                start_time: 0.0,
                end_time: 4.5,
                speaker: Some("A".into()),
            },
            TranscriptSegment {
                start_index: 10,
                end_index: 20,
                start_time: 4.5,
                end_time: 9.0,
                speaker: Some("B".into()),
            },
        ];
        annotate_with_segments(&mut chunks, &segments);

        assert_eq!(chunks[0].metadata.start_time, Some(0.0));
        assert_eq!(chunks[0].metadata.end_time, Some(4.5));
        assert_eq!(chunks[0].metadata.speaker.as_deref(), Some("A"));

        // Second chunk [8, 18) straddles both speakers.
        assert_eq!(chunks[1].metadata.start_time, Some(0.0));
        assert_eq!(chunks[1].metadata.end_time, Some(9.0));
        assert_eq!(chunks[1].metadata.speaker, None);
    }
}
