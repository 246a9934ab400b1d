//! Noise reduction for page content before it reaches the model.

// Patterns are literals; compilation cannot fail at runtime.
#![allow(clippy::expect_used)]

use regex::Regex;
use std::sync::LazyLock;

static RE_SCRIPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script[^>]*>.*?</script>").expect("valid regex"));
static RE_STYLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style[^>]*>.*?</style>").expect("valid regex"));
static RE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));
static RE_NOISE_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\s+(?:style|class|id)="[^"]*""#).expect("valid regex"));
static RE_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static RE_BETWEEN_TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s+<").expect("valid regex"));

/// Strips scripts, styles, comments and presentational attributes, then
/// collapses whitespace. Text content is left untouched.
#[must_use]
pub fn clean_html(html: &str) -> String {
    let html = RE_SCRIPT.replace_all(html, "");
    let html = RE_STYLE.replace_all(&html, "");
    let html = RE_COMMENT.replace_all(&html, "");
    let html = RE_NOISE_ATTR.replace_all(&html, "");
    let html = RE_WHITESPACE.replace_all(&html, " ");
    let html = RE_BETWEEN_TAGS.replace_all(&html, "><");
    html.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removes_script_and_style() {
        let html = "<div><SCRIPT type=\"x\">var a = '<p>';\n</SCRIPT><style>p {}</style><p>Acme</p></div>";
        assert_eq!(clean_html(html), "<div><p>Acme</p></div>");
    }

    #[test]
    fn test_removes_comments_and_attributes() {
        let html = r#"<!-- banner --><p class="a b" id="x" style="color:red" data-k="v">سود ۱۸٪</p>"#;
        assert_eq!(clean_html(html), r#"<p data-k="v">سود ۱۸٪</p>"#);
    }

    #[test]
    fn test_collapses_whitespace() {
        let html = "  <ul>\n   <li>one   two</li>\n\t<li>three</li>\n</ul>  ";
        assert_eq!(clean_html(html), "<ul><li>one two</li><li>three</li></ul>");
    }

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(clean_html("Profit 18% per year"), "Profit 18% per year");
        assert_eq!(clean_html(""), "");
    }
}
