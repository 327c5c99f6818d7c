//! HTML minification applied before a rendered page is stored.
//!
//! Conservative on purpose: drops comments (except conditional comments),
//! trims indentation and removes blank lines. Content of `<pre>`,
//! `<textarea>` and the raw-text `<script>` and `<style>` elements is kept
//! byte for byte.

use lol_html::{RewriteStrSettings, doc_comments, errors::RewritingError, rewrite_str};
use thiserror::Error;

const PRESERVED_TAGS: &[&str] = &["pre", "textarea", "script", "style"];

#[derive(Debug, Error)]
pub enum MinifyError {
    #[error("html rewrite failed: {0}")]
    Rewrite(#[from] RewritingError),
}

pub fn minify_html(html: &str) -> Result<String, MinifyError> {
    let without_comments = rewrite_str(
        html,
        RewriteStrSettings {
            document_content_handlers: vec![doc_comments!(|comment| {
                if !comment.text().trim_start().starts_with("[if") {
                    comment.remove();
                }
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )?;

    Ok(collapse_lines(&without_comments))
}

fn collapse_lines(html: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut preserved_depth = 0usize;

    for line in html.lines() {
        let lower = line.to_ascii_lowercase();
        let opened = PRESERVED_TAGS
            .iter()
            .map(|tag| count_open_tags(&lower, tag))
            .sum::<usize>();
        let closed = PRESERVED_TAGS
            .iter()
            .map(|tag| lower.matches(&format!("</{tag}>")).count())
            .sum::<usize>();

        if preserved_depth > 0 {
            lines.push(line);
        } else if opened > closed {
            lines.push(line.trim_start());
        } else {
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed);
            }
        }

        preserved_depth = (preserved_depth + opened).saturating_sub(closed);
    }

    lines.join("\n")
}

/// Count `<tag>` / `<tag attr...>` openings, ignoring longer names such as
/// `<preload>`.
fn count_open_tags(lower: &str, tag: &str) -> usize {
    let needle = format!("<{tag}");
    lower
        .match_indices(&needle)
        .filter(|(index, _)| {
            lower[index + needle.len()..]
                .chars()
                .next()
                .is_some_and(|next| next == '>' || next == '/' || next.is_ascii_whitespace())
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_comments_and_indentation() {
        let html = "<html>\n  <body>\n    <!-- nav -->\n\n    <p>Hello</p>\n  </body>\n</html>\n";
        let minified = minify_html(html).expect("minifies");
        assert_eq!(minified, "<html>\n<body>\n<p>Hello</p>\n</body>\n</html>");
    }

    #[test]
    fn keeps_conditional_comments() {
        let html = "<head>\n  <!--[if lt IE 9]><script src=\"shiv.js\"></script><![endif]-->\n</head>";
        let minified = minify_html(html).expect("minifies");
        assert!(minified.contains("<!--[if lt IE 9]>"));
    }

    #[test]
    fn preformatted_content_is_untouched() {
        let html = "<div>\n  <pre>\n    day 1\n\n    day 2\n  </pre>\n  <textarea name=\"note\">\n  keep\n</textarea>\n</div>";
        let minified = minify_html(html).expect("minifies");
        assert_eq!(
            minified,
            "<div>\n<pre>\n    day 1\n\n    day 2\n  </pre>\n<textarea name=\"note\">\n  keep\n</textarea>\n</div>"
        );
    }

    #[test]
    fn script_and_style_bodies_keep_their_whitespace() {
        let html = "<body>\n  <script>\n    const msg = `line one\n        indented line`;\n  </script>\n  <style>\n    .hero {\n      color: red;\n    }\n  </style>\n</body>";
        let minified = minify_html(html).expect("minifies");
        assert_eq!(
            minified,
            "<body>\n<script>\n    const msg = `line one\n        indented line`;\n  </script>\n<style>\n    .hero {\n      color: red;\n    }\n  </style>\n</body>"
        );
    }

    #[test]
    fn similar_tag_names_are_not_preserved_blocks() {
        assert_eq!(count_open_tags("<preload><pre class=\"x\">", "pre"), 1);
    }
}
