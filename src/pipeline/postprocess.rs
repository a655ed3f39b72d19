//! Post-processing: deterministic cleanup of generated figure descriptions.
//!
//! Descriptions are spliced into the document text, which is later split on
//! headers and on figure placeholders. A description must therefore never
//! introduce structure of its own: a stray `# Heading` would open a new
//! section, a fabricated `![](…)` link could look like a placeholder, and a
//! literal `<figure>` tag would shift every later marker, and a code fence
//! left open (a response cut off at the token budget) would hide every later
//! header of the document from the splitter. The rules here neutralise those
//! while leaving the prose intact.
//!
//! ## Rule Order
//!
//! Fences are stripped before line endings are normalised so the fence regex
//! sees the raw response; heading demotion runs after whitespace trimming so
//! indented headings are caught.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to a raw VLM description.
///
/// Rules (applied in order):
/// 1. Strip outer markdown fences
/// 2. Normalise line endings (CRLF → LF)
/// 3. Trim trailing whitespace per line
/// 4. Close a code fence left open
/// 5. Demote heading lines to bold text
/// 6. Remove image links (the placeholder syntax is reserved)
/// 7. Remove `<figure>` / `</figure>` tags
/// 8. Strip invisible Unicode
/// 9. Collapse 3+ blank lines and trim the ends
pub fn clean_description(input: &str) -> String {
    let s = strip_markdown_fences(input);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = close_open_fence(&s);
    let s = demote_headings(&s);
    let s = remove_image_links(&s);
    let s = remove_figure_tags(&s);
    let s = remove_invisible_chars(&s);
    let s = collapse_blank_lines(&s);
    s.trim().to_string()
}

// ── Rule 1: Strip outer markdown fences ──────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md|text)?\r?\n(.*)\n```\s*$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Close an unbalanced code fence ───────────────────────────────────
//
// Fence lines are tracked exactly as the header splitter tracks them: a line
// starting with ``` or ~~~ opens a block, the next line starting with the
// same marker closes it.

fn close_open_fence(input: &str) -> String {
    let mut open: Option<&str> = None;
    for line in input.lines() {
        let trimmed = line.trim();
        match open {
            Some(marker) if trimmed.starts_with(marker) => open = None,
            Some(_) => {}
            None => open = ["```", "~~~"].into_iter().find(|m| trimmed.starts_with(m)),
        }
    }
    match open {
        Some(marker) => format!("{}\n{}", input, marker),
        None => input.to_string(),
    }
}

// ── Rule 5: Demote headings ──────────────────────────────────────────────────

static RE_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*#+[ \t]+(.*?)[ \t#]*$").unwrap());

fn demote_headings(input: &str) -> String {
    RE_HEADING
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let text = caps[1].trim();
            if text.is_empty() {
                String::new()
            } else {
                format!("**{}**", text)
            }
        })
        .to_string()
}

// ── Rule 6: Remove image links ───────────────────────────────────────────────
//
// Keep the alt text as italics so nothing the model said is lost.

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

fn remove_image_links(input: &str) -> String {
    RE_IMAGE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let alt = caps[1].trim();
            if alt.is_empty() {
                String::new()
            } else {
                format!("*{}*", alt)
            }
        })
        .to_string()
}

// ── Rule 7: Remove figure tags ───────────────────────────────────────────────

static RE_FIGURE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</?figure\s*>").unwrap());

fn remove_figure_tags(input: &str) -> String {
    RE_FIGURE_TAG.replace_all(input, "").to_string()
}

// ── Rule 8: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 9: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences() {
        let input = "```markdown\nA bar chart\n```";
        assert_eq!(strip_markdown_fences(input), "A bar chart");
    }

    #[test]
    fn test_no_fences_passthrough() {
        assert_eq!(strip_markdown_fences("A bar chart"), "A bar chart");
    }

    #[test]
    fn test_normalise_line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_demote_headings() {
        let out = demote_headings("## Overview ##\nThe chart shows\n   # Axes");
        assert_eq!(out, "**Overview**\nThe chart shows\n**Axes**");
    }

    #[test]
    fn test_hashtag_without_space_is_not_a_heading() {
        assert_eq!(demote_headings("#1 product"), "#1 product");
    }

    #[test]
    fn test_remove_image_links() {
        let out = remove_image_links("see ![](figures/3) and ![Legend](legend.png)");
        assert_eq!(out, "see  and *Legend*");
    }

    #[test]
    fn test_remove_figure_tags() {
        assert_eq!(remove_figure_tags("<figure>x</FIGURE >"), "x");
    }

    #[test]
    fn test_remove_invisible() {
        assert_eq!(remove_invisible_chars("a\u{200B}b\u{FEFF}c"), "abc");
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn test_close_open_fence() {
        let input = "Table data:\n```\ncol a | col b\n1 | 2";
        assert_eq!(clean_description(input), "Table data:\n```\ncol a | col b\n1 | 2\n```");
        assert_eq!(close_open_fence("~~~\nx"), "~~~\nx\n~~~");
    }

    #[test]
    fn test_balanced_fences_untouched() {
        let input = "Code:\n```python\nprint(1)\n```\nAfter";
        assert_eq!(clean_description(input), input);
        // A ~~~ line does not close a ``` block.
        assert_eq!(close_open_fence("```\n~~~\n```"), "```\n~~~\n```");
    }

    #[test]
    fn test_clean_description_full_pipeline() {
        let input = "```markdown\r\n# Revenue chart\r\n\r\n\r\n\r\nBars rise   \r\n![chart](x.png)\r\n<figure>\r\n```";
        let out = clean_description(input);
        assert_eq!(out, "**Revenue chart**\n\nBars rise\n*chart*");
    }
}
