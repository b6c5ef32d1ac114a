//! Line-aligned chunking with a character budget and whole-line overlap.

use trawl_store::VectorRecord;

/// Chunker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Maximum chunk size in characters, newlines included (default: 1500).
    pub chunk_size: usize,
    /// Character budget for lines carried into the next chunk (default: 200).
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1500,
            chunk_overlap: 200,
        }
    }
}

/// One chunk of text.
///
/// `start_line..=end_line` (1-indexed) covers the lines this chunk contributes. The first
/// `overlap_lines` lines of `text` are repeated from the previous chunk and counted in its
/// span, so the spans of a file's chunks partition its lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    pub start_line: usize,
    pub end_line: usize,
    pub overlap_lines: usize,
}

fn line_size(line: &str) -> usize {
    line.chars().count() + 1
}

/// Split `content` into chunks of at most `max_size` characters.
///
/// Lines are never split: a single line longer than `max_size` becomes a chunk of its own.
/// Empty content yields no chunks.
#[must_use]
pub fn chunk(content: &str, max_size: usize, overlap: usize) -> Vec<TextChunk> {
    let lines: Vec<&str> = content.lines().collect();
    let mut chunks = Vec::new();

    // Window over `lines`: [window_start, own_start) is the overlap seed,
    // [own_start, idx) the lines this chunk contributes.
    let mut window_start = 0;
    let mut own_start = 0;
    let mut size = 0;

    for (idx, line) in lines.iter().enumerate() {
        let line_len = line_size(line);
        if idx > window_start && size + line_len > max_size {
            chunks.push(make_chunk(&lines, window_start, own_start, idx));

            let mut seed_start = idx;
            let mut seed_size = 0;
            for (offset, seed_line) in lines[window_start..idx].iter().enumerate().rev() {
                let len = line_size(seed_line);
                if seed_size + len > overlap {
                    break;
                }
                seed_size += len;
                seed_start = window_start + offset;
            }
            window_start = seed_start;
            own_start = idx;
            size = seed_size;
        }
        size += line_len;
    }

    if window_start < lines.len() {
        chunks.push(make_chunk(&lines, window_start, own_start, lines.len()));
    }
    chunks
}

fn make_chunk(lines: &[&str], window_start: usize, own_start: usize, end: usize) -> TextChunk {
    TextChunk {
        text: lines[window_start..end].join("\n"),
        start_line: own_start + 1,
        end_line: end,
        overlap_lines: own_start - window_start,
    }
}

/// A chunk bound to its repository and file, ready to embed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunk {
    pub id: String,
    pub repo_url: String,
    pub file_path: String,
    pub chunk_index: usize,
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    pub language: String,
}

impl FileChunk {
    /// Deterministic id, stable across re-indexing runs.
    #[must_use]
    pub fn make_id(repo_url: &str, file_path: &str, chunk_index: usize) -> String {
        format!("{repo_url}:{file_path}:{chunk_index}")
    }

    #[must_use]
    pub fn into_record(self, vector: Vec<f32>) -> VectorRecord {
        VectorRecord::new(self.id, vector, self.content)
            .with_metadata("repo_url", self.repo_url)
            .with_metadata("file_path", self.file_path)
            .with_metadata("chunk_index", self.chunk_index)
            .with_metadata("start_line", self.start_line)
            .with_metadata("end_line", self.end_line)
            .with_metadata("language", self.language)
    }
}

/// Chunk one file's content and attach ids and metadata.
#[must_use]
pub fn chunk_file(
    repo_url: &str,
    file_path: &str,
    language: &str,
    content: &str,
    config: ChunkerConfig,
) -> Vec<FileChunk> {
    chunk(content, config.chunk_size, config.chunk_overlap)
        .into_iter()
        .enumerate()
        .map(|(chunk_index, c)| FileChunk {
            id: FileChunk::make_id(repo_url, file_path, chunk_index),
            repo_url: repo_url.to_owned(),
            file_path: file_path.to_owned(),
            chunk_index,
            content: c.text,
            start_line: c.start_line,
            end_line: c.end_line,
            language: language.to_owned(),
        })
        .collect()
}
