//! Hierarchical splitting: headers first, then figure blocks.
//!
//! **Phase 1** cuts the reconciled Markdown at ATX header lines (`#` to
//! `########`, up to `max_header_level`). A section runs from its header line
//! to the next one and carries the outline path above it. Lines inside
//! fenced code blocks never count as headers. Text before the first header
//! is a section with an empty path; a document with no headers is one
//! section.
//!
//! **Phase 2** cuts each section around every figure block, so a block (the
//! placeholder with its description, or the whole `<figure>…</figure>` when
//! tags are kept) is a piece of its own and the prose on either side becomes
//! image-less pieces. [`split_with_spans`] takes the exact block ranges the
//! reconciler reports; [`split`] infers them from the text alone.
//!
//! Every placeholder occurrence yields exactly one image-bearing chunk; a
//! piece without placeholders yields one chunk with no image.

use crate::error::IngestWarning;
use crate::output::{Chunk, HeaderPath, ImageRef};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::ops::Range;
use tracing::{debug, warn};

static RE_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#{1,8})[ \t]+(.*)$").unwrap());

static RE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[\]\(figures/(\d+)\)").unwrap());

static RE_FIGURE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<figure>.*?</figure>").unwrap());

/// A header-delimited slice of the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub text: String,
    pub header_path: HeaderPath,
    /// Byte offset of `text` in the split document.
    pub start: usize,
}

/// Result of [`split`].
#[derive(Debug, Clone, Default)]
pub struct SplitOutput {
    pub chunks: Vec<Chunk>,
    /// Phase-1 section count.
    pub sections: usize,
    pub warnings: Vec<IngestWarning>,
}

/// Phase 1: split `text` at header lines of level ≤ `max_level`.
pub fn split_sections(text: &str, max_level: u8) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut path = HeaderPath::new();
    let mut section_path = HeaderPath::new();
    let mut section_start = 0;
    let mut fence: Option<&str> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let trimmed = line.trim();

        if let Some(marker) = fence {
            if trimmed.starts_with(marker) {
                fence = None;
            }
            continue;
        }
        if let Some(marker) = ["```", "~~~"].into_iter().find(|m| trimmed.starts_with(m)) {
            fence = Some(marker);
            continue;
        }

        let Some((level, title)) = header(trimmed, max_level) else {
            continue;
        };

        push_section(&mut sections, text, section_start..line_start, &section_path);
        path.enter(level, title);
        section_path = path.clone();
        section_start = line_start;
    }
    push_section(&mut sections, text, section_start..text.len(), &section_path);

    debug!("Split into {} sections", sections.len());
    sections
}

fn header(line: &str, max_level: u8) -> Option<(u8, &str)> {
    let caps = RE_HEADER.captures(line)?;
    let level = caps.get(1)?.as_str().len() as u8;
    if level > max_level {
        return None;
    }
    let title = caps.get(2)?.as_str().trim();
    Some((level, title))
}

fn push_section(sections: &mut Vec<Section>, text: &str, range: Range<usize>, path: &HeaderPath) {
    let slice = &text[range.clone()];
    if slice.trim().is_empty() {
        return;
    }
    sections.push(Section {
        text: slice.to_string(),
        header_path: path.clone(),
        start: range.start,
    });
}

/// Phase 2: cut `text` before and after each figure block.
///
/// `figure_spans` are byte ranges into `text`, ascending and disjoint.
/// Whitespace-only pieces are dropped.
pub fn split_figures<'a>(text: &'a str, figure_spans: &[Range<usize>]) -> Vec<&'a str> {
    let mut bounds: Vec<usize> = vec![0];
    for span in figure_spans {
        bounds.push(span.start.min(text.len()));
        bounds.push(span.end.min(text.len()));
    }
    bounds.push(text.len());

    bounds
        .windows(2)
        .filter(|w| w[0] < w[1])
        .map(|w| &text[w[0]..w[1]])
        .filter(|piece| !piece.trim().is_empty())
        .collect()
}

/// Figure blocks of `text` when no exact ranges are known.
///
/// A `<figure>…</figure>` holding a placeholder is one block. A bare
/// placeholder runs to the end of its paragraph, stopping early at the next
/// figure block.
pub fn infer_figure_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans: Vec<Range<usize>> = RE_FIGURE_BLOCK
        .find_iter(text)
        .filter(|m| RE_PLACEHOLDER.is_match(m.as_str()))
        .map(|m| m.range())
        .collect();
    let tagged = spans.clone();

    let placeholders: Vec<Range<usize>> =
        RE_PLACEHOLDER.find_iter(text).map(|m| m.range()).collect();
    for (i, p) in placeholders.iter().enumerate() {
        if tagged.iter().any(|t| t.start <= p.start && p.end <= t.end) {
            continue;
        }
        let next_placeholder = placeholders.get(i + 1).map_or(text.len(), |n| n.start);
        let next_block = tagged
            .iter()
            .find(|t| t.start >= p.end)
            .map_or(text.len(), |t| t.start);
        let limit = next_placeholder.min(next_block);
        let end = text[p.end..limit]
            .find("\n\n")
            .map_or(limit, |off| p.end + off + 1);
        spans.push(p.start..end);
    }

    spans.sort_by_key(|s| s.start);
    spans
}

/// Figure indices referenced by placeholders in `text`, in order of appearance.
pub fn placeholder_indices(text: &str) -> Vec<usize> {
    RE_PLACEHOLDER
        .captures_iter(text)
        .filter_map(|caps| caps.get(1)?.as_str().parse().ok())
        .collect()
}

/// Split reconciled Markdown into chunks tagged with header path, source
/// and image, inferring figure blocks from the text.
pub fn split(
    text: &str,
    source: &str,
    images: &BTreeMap<usize, ImageRef>,
    max_header_level: u8,
) -> SplitOutput {
    split_inner(text, source, images, max_header_level, |section| {
        infer_figure_spans(&section.text)
    })
}

/// Like [`split`], with the figure block ranges reported by the reconciler
/// (byte ranges into `text`).
pub fn split_with_spans(
    text: &str,
    figure_spans: &[Range<usize>],
    source: &str,
    images: &BTreeMap<usize, ImageRef>,
    max_header_level: u8,
) -> SplitOutput {
    split_inner(text, source, images, max_header_level, |section| {
        let end = section.start + section.text.len();
        figure_spans
            .iter()
            .filter(|span| span.start < end && span.end > section.start)
            .map(|span| {
                span.start.max(section.start) - section.start..span.end.min(end) - section.start
            })
            .collect()
    })
}

fn split_inner<F>(
    text: &str,
    source: &str,
    images: &BTreeMap<usize, ImageRef>,
    max_header_level: u8,
    spans_of: F,
) -> SplitOutput
where
    F: Fn(&Section) -> Vec<Range<usize>>,
{
    let sections = split_sections(text, max_header_level);
    let mut output = SplitOutput {
        sections: sections.len(),
        ..Default::default()
    };

    for section in &sections {
        let spans = spans_of(section);
        for piece in split_figures(&section.text, &spans) {
            let indices = placeholder_indices(piece);
            if indices.is_empty() {
                output.chunks.push(Chunk {
                    text: piece.to_string(),
                    header_path: section.header_path.clone(),
                    source: source.to_string(),
                    figure: None,
                    image: None,
                });
                continue;
            }

            for idx in indices {
                let image = images.get(&idx).cloned();
                if image.is_none() {
                    let w = IngestWarning::MissingImage { figure: idx };
                    warn!("{}", w);
                    output.warnings.push(w);
                }
                output.chunks.push(Chunk {
                    text: piece.to_string(),
                    header_path: section.header_path.clone(),
                    source: source.to_string(),
                    figure: Some(idx),
                    image,
                });
            }
        }
    }

    debug!(
        "{} sections → {} chunks for {}",
        output.sections,
        output.chunks.len(),
        source
    );
    output
}
