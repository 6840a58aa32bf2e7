//! Document Chunker
//!
//! Three ways of cutting a document into pieces:
//! - `FixedSizeChunker`: overlapping character windows, used for reading segments
//! - `parse_heading_tree`: a section tree built from markdown headings, used
//!   by the chapter reading strategy
//! - `RagChunker`: paragraph and heading aware chunks for the vector store
//!
//! All sizes count characters, never bytes, so multi-byte text is never
//! split inside a code point.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let chunker = FixedSizeChunker::new(6000, 0.15)?;
//! let segments = chunker.chunk(&text);
//! ```

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::utils::error::{AppError, AppResult};

// ---------------------------------------------------------------------------
// FixedSizeChunker
// ---------------------------------------------------------------------------

/// Fixed-size windows of `size` characters, each starting `step` characters
/// after the previous one, where `step = size - floor(size * overlap_ratio)`.
#[derive(Debug, Clone, Copy)]
pub struct FixedSizeChunker {
    size: usize,
    overlap: usize,
}

impl FixedSizeChunker {
    /// Validate the window geometry. A size of zero, a negative or
    /// non-finite ratio, or any ratio that leaves no forward step is a
    /// configuration error.
    pub fn new(size: usize, overlap_ratio: f64) -> AppResult<Self> {
        if size == 0 {
            return Err(AppError::config("chunk size must be greater than zero"));
        }
        if !overlap_ratio.is_finite() || overlap_ratio < 0.0 {
            return Err(AppError::config(format!(
                "overlap ratio must be a finite value >= 0, got {}",
                overlap_ratio
            )));
        }
        let step = size as f64 * (1.0 - overlap_ratio);
        if step <= 0.0 {
            return Err(AppError::config(format!(
                "chunk size {} with overlap ratio {} gives a non-positive step",
                size, overlap_ratio
            )));
        }
        // Nudge before flooring so 6000 * 0.15 lands on 900, not 899.
        let overlap = (size as f64 * overlap_ratio + 1e-9).floor() as usize;
        if overlap >= size {
            return Err(AppError::config(format!(
                "chunk size {} with overlap ratio {} gives a non-positive step",
                size, overlap_ratio
            )));
        }
        Ok(Self { size, overlap })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Characters shared by two consecutive windows.
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn step(&self) -> usize {
        self.size - self.overlap
    }

    /// Split `text` into `ceil(len / step)` windows. Empty input yields no
    /// windows.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        // Byte offset of every char boundary, plus the end of the text.
        let bounds: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let char_len = bounds.len() - 1;

        let mut chunks = Vec::new();
        let mut start = 0usize;
        while start < char_len {
            let end = (start + self.size).min(char_len);
            let piece = &text[bounds[start]..bounds[end]];
            if !piece.is_empty() {
                chunks.push(piece.to_string());
            }
            start += self.step();
        }
        chunks
    }
}

/// Convenience wrapper: validate and split in one call.
pub fn chunk_text(text: &str, size: usize, overlap_ratio: f64) -> AppResult<Vec<String>> {
    Ok(FixedSizeChunker::new(size, overlap_ratio)?.chunk(text))
}

// ---------------------------------------------------------------------------
// Heading tree
// ---------------------------------------------------------------------------

/// One markdown section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TocNode {
    pub title: String,
    /// Number of `#` characters in the heading.
    pub level: usize,
    /// Text between this heading and the next heading of any level.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub children: Vec<TocNode>,
    #[serde(default)]
    pub read: bool,
}

impl TocNode {
    fn new(title: &str, level: usize) -> Self {
        Self {
            title: title.to_string(),
            level,
            content: String::new(),
            children: Vec::new(),
            read: false,
        }
    }

    /// The heading line, its own content, and every descendant section,
    /// rendered back as markdown.
    pub fn full_text(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out);
        out.trim_end().to_string()
    }

    fn render_into(&self, out: &mut String) {
        out.push_str(&"#".repeat(self.level));
        out.push(' ');
        out.push_str(&self.title);
        out.push('\n');
        if !self.content.trim().is_empty() {
            out.push_str(self.content.trim_end());
            out.push_str("\n\n");
        }
        for child in &self.children {
            child.render_into(out);
        }
    }

    /// Mark this node and all of its descendants as read.
    pub fn mark_read(&mut self) {
        self.read = true;
        for child in &mut self.children {
            child.mark_read();
        }
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(TocNode::node_count).sum::<usize>()
    }
}

/// Parsed heading structure of a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeadingTree {
    /// Text before the first heading.
    #[serde(default)]
    pub preamble: String,
    /// Top-level sections in document order.
    #[serde(default)]
    pub sections: Vec<TocNode>,
}

impl HeadingTree {
    /// `true` when the document had no headings at all.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

fn heading_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(#+)\s+(.*)$").ok()).as_ref()
}

/// Parse markdown headings into a tree. Lines inside fenced code blocks are
/// never treated as headings. A document without headings yields an empty
/// tree, which tells the caller to fall back to fixed-size chunking.
pub fn parse_heading_tree(text: &str) -> HeadingTree {
    let mut tree = HeadingTree::default();
    // Path from a top-level section down to the section receiving content.
    let mut stack: Vec<TocNode> = Vec::new();
    let mut in_fence = false;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        }

        let heading = if in_fence {
            None
        } else {
            heading_regex().and_then(|re| re.captures(line)).map(|caps| {
                let level = caps.get(1).map_or(0, |m| m.as_str().len());
                let title = caps.get(2).map_or("", |m| m.as_str()).trim();
                (level, title.trim_end_matches('#').trim().to_string())
            })
        };

        match heading {
            Some((level, title)) => {
                while stack.last().is_some_and(|top| top.level >= level) {
                    close_top(&mut stack, &mut tree);
                }
                stack.push(TocNode::new(&title, level));
            }
            None => {
                let target = match stack.last_mut() {
                    Some(node) => &mut node.content,
                    None => &mut tree.preamble,
                };
                target.push_str(line);
                target.push('\n');
            }
        }
    }

    while !stack.is_empty() {
        close_top(&mut stack, &mut tree);
    }
    tree.preamble = tree.preamble.trim().to_string();
    tree
}

fn close_top(stack: &mut Vec<TocNode>, tree: &mut HeadingTree) {
    if let Some(mut node) = stack.pop() {
        node.content = node.content.trim().to_string();
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => tree.sections.push(node),
        }
    }
}

// ---------------------------------------------------------------------------
// RagChunker
// ---------------------------------------------------------------------------

/// Paragraph and heading aware chunks for retrieval.
///
/// Blocks are split on blank lines and before heading lines, oversized
/// blocks are split at sentence ends (and hard-split as a last resort),
/// then blocks are packed into chunks of at most `max_chunk_size`
/// characters. Each new chunk repeats trailing blocks of the previous one
/// up to `overlap` characters.
#[derive(Debug, Clone, Copy)]
pub struct RagChunker {
    max_chunk_size: usize,
    overlap: usize,
}

impl RagChunker {
    pub fn new(max_chunk_size: usize, overlap: usize) -> AppResult<Self> {
        if max_chunk_size == 0 {
            return Err(AppError::config("rag chunk size must be greater than zero"));
        }
        if overlap >= max_chunk_size {
            return Err(AppError::config(format!(
                "rag chunk overlap {} must be smaller than the chunk size {}",
                overlap, max_chunk_size
            )));
        }
        Ok(Self {
            max_chunk_size,
            overlap,
        })
    }

    pub fn chunk(&self, text: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        for block in split_blocks(text) {
            if char_len(&block) <= self.max_chunk_size {
                pieces.push(block);
            } else {
                for sentence in split_by_sentences(&block, self.max_chunk_size) {
                    if char_len(&sentence) <= self.max_chunk_size {
                        pieces.push(sentence);
                    } else {
                        pieces.extend(hard_split(&sentence, self.max_chunk_size));
                    }
                }
            }
        }
        self.pack(pieces)
    }

    fn pack(&self, pieces: Vec<String>) -> Vec<String> {
        const JOINER: &str = "\n\n";
        let joiner_len = JOINER.len();

        let mut chunks = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_len = 0usize;

        for piece in pieces {
            let piece_len = char_len(&piece);
            let added = if current.is_empty() { piece_len } else { piece_len + joiner_len };
            if !current.is_empty() && current_len + added > self.max_chunk_size {
                chunks.push(current.join(JOINER));

                // Carry trailing pieces forward as overlap.
                let mut carried: Vec<String> = Vec::new();
                let mut carried_len = 0usize;
                for prev in current.iter().rev() {
                    let len = char_len(prev) + if carried.is_empty() { 0 } else { joiner_len };
                    if carried_len + len > self.overlap
                        || carried_len + len + piece_len + joiner_len > self.max_chunk_size
                    {
                        break;
                    }
                    carried.insert(0, prev.clone());
                    carried_len += len;
                }
                current = carried;
                current_len = carried_len;
            }

            current_len += if current.is_empty() { piece_len } else { piece_len + joiner_len };
            current.push(piece);
        }

        if !current.is_empty() {
            chunks.push(current.join(JOINER));
        }
        chunks
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Split on blank lines and before markdown heading lines.
fn split_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    let mut flush = |current: &mut Vec<&str>| {
        let block = current.join("\n").trim().to_string();
        if !block.is_empty() {
            blocks.push(block);
        }
        current.clear();
    };

    for line in text.lines() {
        if line.trim().is_empty() {
            flush(&mut current);
            continue;
        }
        if line.starts_with('#') {
            flush(&mut current);
        }
        current.push(line);
    }
    flush(&mut current);
    blocks
}

/// Split text at sentence ends so that each part stays under `max_size`
/// where possible.
fn split_by_sentences(text: &str, max_size: usize) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        current.push(ch);
        current_len += 1;

        let sentence_end = matches!(ch, '.' | '!' | '?' | '。' | '！' | '？')
            && chars.peek().map_or(true, |next| next.is_whitespace());
        if sentence_end && current_len >= max_size / 2 {
            let part = current.trim().to_string();
            if !part.is_empty() {
                result.push(part);
            }
            current.clear();
            current_len = 0;
        }
    }

    let rest = current.trim().to_string();
    if !rest.is_empty() {
        result.push(rest);
    }
    result
}

fn hard_split(text: &str, max_size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_size)
        .map(|window| window.iter().collect::<String>())
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
