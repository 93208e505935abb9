//! Header-aware Markdown chunking.
//!
//! Lines are accumulated until either a heading arrives after a substantial
//! amount of text, or the accumulation reaches `target_size` characters. Each
//! flushed chunk seeds the next one with its last `overlap_lines` lines. The
//! seeded prefix is recorded as `carried_len`, so dropping it from every chunk
//! and concatenating the rest yields the input byte for byte.

use serde::{Deserialize, Serialize};

use crate::types::Chunk;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Accumulated characters that force a flush mid-section.
    pub target_size: usize,
    /// Trailing lines of a flushed chunk repeated at the start of the next.
    pub overlap_lines: usize,
    /// A heading only starts a new chunk once this many characters are pending.
    pub min_section_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { target_size: 1000, overlap_lines: 3, min_section_size: 200 }
    }
}

/// Chunk content before it is attributed to a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkBody {
    pub text: String,
    pub header_path: Vec<String>,
    pub carried_len: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    pub fn chunk_document(&self, source_path: &str, text: &str) -> Vec<Chunk> {
        split_markdown(text, &self.config)
            .into_iter()
            .enumerate()
            .map(|(chunk_index, body)| Chunk {
                id: Chunk::make_id(source_path, chunk_index),
                source_path: source_path.to_string(),
                chunk_index,
                text: body.text,
                header_path: body.header_path,
                carried_len: body.carried_len,
            })
            .collect()
    }
}

/// Split `text` into ordered chunk bodies. Pure and deterministic.
pub fn split_markdown(text: &str, config: &ChunkingConfig) -> Vec<ChunkBody> {
    let mut bodies = Vec::new();
    let mut headers: Vec<String> = Vec::new();
    let mut lines: Vec<&str> = Vec::new();
    // leading entries of `lines` copied from the previous chunk
    let mut carried = 0usize;
    let mut size = 0usize;
    let mut in_fence = false;

    for line in text.split_inclusive('\n') {
        let bare = line.trim_end_matches(['\n', '\r']);
        if is_fence(bare) {
            in_fence = !in_fence;
        }
        let heading = if in_fence { None } else { parse_heading(bare) };
        if let Some((level, title)) = heading {
            if size > config.min_section_size && lines.len() > carried {
                bodies.push(flush(&lines, carried, &headers));
                (carried, size) = seed_overlap(&mut lines, config.overlap_lines);
            }
            headers.truncate(level - 1);
            headers.push(title.to_string());
        }

        lines.push(line);
        size += bare.chars().count();

        if size >= config.target_size {
            bodies.push(flush(&lines, carried, &headers));
            (carried, size) = seed_overlap(&mut lines, config.overlap_lines);
        }
    }

    if lines.len() > carried {
        bodies.push(flush(&lines, carried, &headers));
    }
    bodies
}

fn flush(lines: &[&str], carried: usize, headers: &[String]) -> ChunkBody {
    ChunkBody {
        text: lines.concat(),
        header_path: headers.to_vec(),
        carried_len: lines[..carried].iter().map(|l| l.len()).sum(),
    }
}

/// Keep the last `overlap` lines as the start of the next chunk.
/// Returns the new carried line count and accumulated size.
fn seed_overlap(lines: &mut Vec<&str>, overlap: usize) -> (usize, usize) {
    let keep = lines.len().min(overlap);
    lines.drain(..lines.len() - keep);
    let size = lines.iter().map(|l| l.trim_end_matches(['\n', '\r']).chars().count()).sum();
    (keep, size)
}

fn is_fence(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

/// ATX heading: one to six `#` followed by whitespace or end of line.
fn parse_heading(line: &str) -> Option<(usize, &str)> {
    let level = line.chars().take_while(|&c| c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &line[level..];
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some((level, rest.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading_parsing() {
        assert_eq!(parse_heading("## Communication"), Some((2, "Communication")));
        assert_eq!(parse_heading("#"), Some((1, "")));
        assert_eq!(parse_heading("#hashtag"), None);
        assert_eq!(parse_heading("####### too deep"), None);
        assert_eq!(parse_heading("plain"), None);
    }

    #[test]
    fn seed_keeps_tail() {
        let mut lines = vec!["a\n", "bb\n", "ccc\n", "dddd\n"];
        let (carried, size) = seed_overlap(&mut lines, 2);
        assert_eq!(lines, vec!["ccc\n", "dddd\n"]);
        assert_eq!((carried, size), (2, 7));
    }
}
