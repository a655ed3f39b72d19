//! Prompts for the vision description call.
//!
//! Callers can override the system instruction via
//! [`crate::config::IngestConfig::system_prompt`]; the constants here are used
//! only when no override is provided.

/// Default system instruction for describing a cropped figure.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant that describes images in vivid, precise detail. \
Focus on graphs, charts, tables and flat images, providing clear descriptions of the data they represent. \
Specify the type of graph (e.g. bar, line, pie), its axes, the colours used, and any notable trends or patterns. \
Mention the key figures, values and labels. For each chart, describe how data points change over time or across \
categories, pointing out significant peaks, dips or anomalies. If there are legends, footnotes or annotations, \
detail how they contribute to understanding the data. \
Answer in plain prose; do not use Markdown headings and do not reference image files.";

/// User text accompanying the image, carrying the caption as a hint.
pub fn describe_instruction(caption: Option<&str>) -> String {
    match caption {
        Some(c) if !c.trim().is_empty() => {
            format!("Describe this image (note: it has image caption: {}):", c.trim())
        }
        _ => "Describe this image:".to_string(),
    }
}

/// Caption annotation prefixed to a figure's accumulated description.
pub fn caption_annotation(caption: &str) -> String {
    format!("<figcaption>{}</figcaption>\n", caption)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_with_caption() {
        let s = describe_instruction(Some(" Figure 2: Sales "));
        assert_eq!(s, "Describe this image (note: it has image caption: Figure 2: Sales):");
    }

    #[test]
    fn instruction_without_caption() {
        assert_eq!(describe_instruction(None), "Describe this image:");
        assert_eq!(describe_instruction(Some("  ")), "Describe this image:");
    }

    #[test]
    fn annotation_wraps_caption() {
        assert_eq!(caption_annotation("Q3"), "<figcaption>Q3</figcaption>\n");
    }
}
