//! Deterministic cleanup of agent-produced page Markdown.
//!
//! Models sometimes wrap their answer in a ```` ```markdown ```` fence despite
//! the prompt, emit CRLF line endings, or sprinkle zero-width characters from
//! the PDF text layer. These passes fix such artefacts without touching
//! content, so the prompt can stay focused on *what* to extract.
//!
//! Passes run in order: fences are stripped before line endings are
//! normalised, and the final-newline pass runs last.

use once_cell::sync::Lazy;
use regex::Regex;

/// Clean one page fragment.
///
/// `image_ids` are the embedded-image ids of the page. Image links pointing
/// at one of them are kept; links to anything else that is not an absolute
/// HTTP(S) URL are reduced to their alt text.
pub fn clean_fragment(input: &str, image_ids: &[&str]) -> String {
    let s = unwrap_outer_fence(input);
    let s = s.replace("\r\n", "\n").replace('\r', "\n");
    let s = strip_invisible(&s);
    let s = trim_line_ends(&s);
    let s = squeeze_blank_runs(&s);
    let s = space_headings(&s);
    let s = rewrite_image_links(&s, image_ids);
    finish_with_newline(&s)
}

// ── Outer fence ──────────────────────────────────────────────────────────

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\r?\n(.*?)\r?\n```$").unwrap());

fn unwrap_outer_fence(input: &str) -> String {
    let trimmed = input.trim();
    match RE_OUTER_FENCE.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Whitespace ───────────────────────────────────────────────────────────

const INVISIBLE: [char; 6] = [
    '\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}', '\u{00AD}',
];

fn strip_invisible(input: &str) -> String {
    input.chars().filter(|c| !INVISIBLE.contains(c)).collect()
}

fn trim_line_ends(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for (i, line) in input.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(line.trim_end());
    }
    out
}

static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// At most one blank line between blocks.
fn squeeze_blank_runs(input: &str) -> String {
    RE_BLANK_RUN.replace_all(input, "\n\n").into_owned()
}

fn finish_with_newline(input: &str) -> String {
    let body = input.trim_end();
    if body.is_empty() {
        String::new()
    } else {
        format!("{}\n", body)
    }
}

// ── Headings ─────────────────────────────────────────────────────────────

static RE_HEADING_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}[ \t]").unwrap());

/// Put a blank line before every ATX heading outside code fences.
fn space_headings(input: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut in_fence = false;
    for line in input.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }
        let needs_gap = !in_fence
            && RE_HEADING_LINE.is_match(line)
            && out.last().is_some_and(|prev| !prev.is_empty());
        if needs_gap {
            out.push("");
        }
        out.push(line);
    }
    out.join("\n")
}

// ── Image links ──────────────────────────────────────────────────────────

static RE_IMAGE_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)\s]*)\)").unwrap());

fn rewrite_image_links(input: &str, image_ids: &[&str]) -> String {
    RE_IMAGE_LINK
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let alt = caps[1].trim();
            let target = caps[2].trim();
            let external = target.starts_with("http://") || target.starts_with("https://");
            if external || image_ids.contains(&target) {
                caps[0].to_string()
            } else if alt.is_empty() {
                String::new()
            } else {
                format!("*{}*", alt)
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwraps_markdown_fence() {
        assert_eq!(unwrap_outer_fence("```markdown\n# Hi\nthere\n```"), "# Hi\nthere");
        assert_eq!(unwrap_outer_fence("```\nplain\n```\n"), "plain");
        assert_eq!(unwrap_outer_fence("no fence"), "no fence");
    }

    #[test]
    fn inner_code_fences_survive() {
        let input = "Intro\n\n```rust\nfn main() {}\n```\n";
        assert_eq!(clean_fragment(input, &[]), input);
    }

    #[test]
    fn whitespace_passes() {
        assert_eq!(trim_line_ends("a  \nb\t"), "a\nb");
        assert_eq!(squeeze_blank_runs("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(strip_invisible("he\u{200B}llo\u{FEFF}"), "hello");
        assert_eq!(finish_with_newline("x\n\n\n"), "x\n");
        assert_eq!(finish_with_newline("  \n"), "");
    }

    #[test]
    fn headings_get_a_blank_line_outside_fences() {
        let out = space_headings("text\n# Title\n```\nx\n# comment\n```");
        assert_eq!(out, "text\n\n# Title\n```\nx\n# comment\n```");
    }

    #[test]
    fn image_links_to_page_images_are_kept() {
        let md = "![Revenue chart](3fa9c2)\n![Logo](logo.png)\n![](x)\n![Fig](https://arxiv.org/f.png)";
        let out = rewrite_image_links(md, &["3fa9c2"]);
        assert!(out.contains("![Revenue chart](3fa9c2)"));
        assert!(out.contains("*Logo*"));
        assert!(out.contains("![Fig](https://arxiv.org/f.png)"));
        assert!(!out.contains("![](x)"));
    }

    #[test]
    fn full_cleanup() {
        let input = "```markdown\n# Title\r\n\r\nSome text   \n\n\n\n## Section\u{200B}\n```";
        let out = clean_fragment(input, &[]);
        assert_eq!(out, "# Title\n\nSome text\n\n## Section\n");
    }

    #[test]
    fn blank_output_stays_blank() {
        assert_eq!(clean_fragment("   \n\n", &[]), "");
    }
}
