//! Markdown reconciliation: replace figure markers with stable placeholders.
//!
//! The analyzer wraps each figure in `<figure> … </figure>`, in the same
//! order as its figure list. Marker `idx` becomes
//!
//! ```text
//! \n![](figures/{idx})\n{description}\n
//! ```
//!
//! With `keep_figure_tags` the tags stay around that body. The byte range of
//! every substituted block is returned alongside the text so the splitter
//! can cut the figure out of the prose that surrounds it.
//!
//! Output is built by a single forward cursor: unmodified text between
//! markers is copied verbatim, so everything outside the replaced spans is
//! byte-identical to the input and total work is linear in its length.

use crate::error::IngestWarning;
use std::collections::BTreeMap;
use std::ops::Range;
use tracing::{debug, warn};

pub const FIGURE_OPEN: &str = "<figure>";
pub const FIGURE_CLOSE: &str = "</figure>";

/// Result of [`reconcile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub markdown: String,
    /// Figure indices whose marker was replaced, ascending.
    pub substituted: Vec<usize>,
    /// Byte range of each substituted block in `markdown`, same order as
    /// `substituted`: placeholder through the description's trailing newline,
    /// or the whole `<figure>…</figure>` when tags are kept.
    pub figure_spans: Vec<Range<usize>>,
    pub warnings: Vec<IngestWarning>,
}

/// `![](figures/{idx})`
pub fn placeholder(idx: usize) -> String {
    format!("![](figures/{idx})")
}

/// Number of complete `<figure>…</figure>` markers in `content`.
pub fn count_markers(content: &str) -> usize {
    let mut count = 0;
    let mut cursor = 0;
    while let Some((_, end)) = next_marker(content, cursor) {
        count += 1;
        cursor = end;
    }
    count
}

/// Compare marker and figure counts before substitution.
pub fn validate_markers(content: &str, figures: usize) -> Option<IngestWarning> {
    let markers = count_markers(content);
    if markers == figures {
        None
    } else {
        Some(IngestWarning::MarkerMismatch { markers, figures })
    }
}

/// Substitute each figure's description into `content`.
///
/// Figures with no entry in `descriptions` keep their marker untouched but
/// still consume it, so later figures stay aligned. When the text runs out
/// of markers, the remaining figures are reported as `MissingMarker`.
pub fn reconcile(
    content: &str,
    descriptions: &BTreeMap<usize, String>,
    figure_count: usize,
    keep_figure_tags: bool,
) -> Reconciled {
    let mut warnings = Vec::new();
    if let Some(mismatch) = validate_markers(content, figure_count) {
        warn!("{}", mismatch);
        warnings.push(mismatch);
    }

    let mut out = String::with_capacity(content.len());
    let mut substituted = Vec::new();
    let mut figure_spans = Vec::new();
    let mut cursor = 0;

    for idx in 0..figure_count {
        let Some((open, end)) = next_marker(content, cursor) else {
            warnings.push(IngestWarning::MissingMarker { figure: idx });
            continue;
        };

        out.push_str(&content[cursor..open]);
        match descriptions.get(&idx) {
            Some(description) => {
                let body = format!("\n{}\n{}\n", placeholder(idx), description);
                let start = if keep_figure_tags {
                    let start = out.len();
                    out.push_str(FIGURE_OPEN);
                    out.push_str(&body);
                    out.push_str(FIGURE_CLOSE);
                    start
                } else {
                    let start = out.len() + 1;
                    out.push_str(&body);
                    start
                };
                figure_spans.push(start..out.len());
                substituted.push(idx);
            }
            None => {
                debug!("Figure {} unresolved, marker left in place", idx);
                out.push_str(&content[open..end]);
            }
        }
        cursor = end;
    }
    out.push_str(&content[cursor..]);

    Reconciled {
        markdown: out,
        substituted,
        figure_spans,
        warnings,
    }
}

/// Byte range `(start of open tag, end of close tag)` of the first complete
/// marker at or after `from`.
fn next_marker(content: &str, from: usize) -> Option<(usize, usize)> {
    let open = from + content[from..].find(FIGURE_OPEN)?;
    let body = open + FIGURE_OPEN.len();
    let close = body + content[body..].find(FIGURE_CLOSE)?;
    Some((open, close + FIGURE_CLOSE.len()))
}
