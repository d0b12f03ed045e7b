use scraper::{Html, Node, Selector};

use crate::HelperError;

pub const DEFAULT_MAX_CHUNK_LEN: usize = 6000;

/// Serialised `<body>` element, or an empty string when the page has no body
/// content.
pub fn extract_body(html: &str) -> Result<String, HelperError> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("body")
        .map_err(|err| HelperError::Browser(format!("invalid body selector: {err}")))?;

    Ok(document
        .select(&selector)
        .next()
        .filter(|body| body.has_children())
        .map(|body| body.html())
        .unwrap_or_default())
}

/// Visible text of a body: script and style contents dropped, one trimmed
/// non-empty line per text fragment.
pub fn clean_body(body: &str) -> String {
    let document = Html::parse_document(body);

    let mut text = String::new();
    for node in document.tree.root().descendants() {
        let Node::Text(fragment) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            matches!(ancestor.value(), Node::Element(element) if matches!(element.name(), "script" | "style"))
        });
        if hidden {
            continue;
        }
        let fragment: &str = fragment;
        text.push_str(fragment);
        text.push('\n');
    }

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Consecutive character windows of at most `max_len` characters.
pub fn split_content(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_len)
        .map(|window| window.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!DOCTYPE html>
<html>
  <head><title>Shop</title><style>body { color: red; }</style></head>
  <body>
    <h1>  Weekly offers </h1>
    <script>var tracking = "secret";</script>
    <ul>
      <li>Apples: 2 EUR</li>
      <li>Pears:   3 EUR  </li>
    </ul>
    <p></p>
  </body>
</html>"#;

    #[test]
    fn body_is_extracted_without_head() {
        let body = extract_body(PAGE).unwrap();
        assert!(body.starts_with("<body>"));
        assert!(body.contains("Weekly offers"));
        assert!(!body.contains("<title>"));
    }

    #[test]
    fn empty_page_has_no_body() {
        assert_eq!(extract_body("").unwrap(), "");
    }

    #[test]
    fn clean_body_drops_scripts_styles_and_blank_lines() {
        let cleaned = clean_body(&extract_body(PAGE).unwrap());
        assert_eq!(cleaned, "Weekly offers\nApples: 2 EUR\nPears:   3 EUR");
    }

    #[test]
    fn split_content_uses_fixed_windows() {
        let chunks = split_content(&"x".repeat(13_000), DEFAULT_MAX_CHUNK_LEN);
        assert_eq!(
            chunks.iter().map(|c| c.len()).collect::<Vec<_>>(),
            vec![6000, 6000, 1000]
        );
        assert!(split_content("", DEFAULT_MAX_CHUNK_LEN).is_empty());
    }
}
