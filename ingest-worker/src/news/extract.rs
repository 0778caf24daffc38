//! Article text extraction
//!
//! A readability pass over the parsed document, with a dumb
//! strip-tags-and-whitespace fallback that is always defined. Extraction
//! never fails; the worst case is an empty string, which the caller
//! rejects on length.

use scraper::{Html, Selector};

/// Extract readable text from an HTML document.
pub fn extract_article_text(html: &str) -> String {
    let text = readability_pass(html);
    if text.trim().is_empty() {
        strip_tags(html)
    } else {
        text
    }
}

/// Collect paragraph text from the most article-like container present.
fn readability_pass(html: &str) -> String {
    let document = Html::parse_document(html);

    for container in ["article p", "main p", "body p"] {
        let Ok(selector) = Selector::parse(container) else {
            continue;
        };
        let paragraphs: Vec<String> = document
            .select(&selector)
            .map(|p| p.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if !paragraphs.is_empty() {
            return paragraphs.join("\n\n");
        }
    }

    String::new()
}

/// Fallback extraction: drop `<script>`/`<style>` blocks, strip every
/// tag, collapse whitespace.
pub fn strip_tags(html: &str) -> String {
    let mut text = html.to_string();
    for tag in ["script", "style"] {
        if let Ok(re) = regex::RegexBuilder::new(&format!(r"<{tag}\b[^>]*>.*?</{tag}>"))
            .case_insensitive(true)
            .dot_matches_new_line(true)
            .build()
        {
            text = re.replace_all(&text, " ").into_owned();
        }
    }

    if let Ok(re) = regex::Regex::new(r"<[^>]*>") {
        text = re.replace_all(&text, " ").into_owned();
    }

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_article_paragraphs() {
        let html = r#"
            <html><body>
              <nav><p>Menu item</p></nav>
              <article>
                <p>First paragraph of the story.</p>
                <p>Second paragraph.</p>
              </article>
            </body></html>"#;
        let text = extract_article_text(html);
        assert!(text.contains("First paragraph of the story."));
        assert!(text.contains("Second paragraph."));
    }

    #[test]
    fn test_falls_back_to_body_paragraphs() {
        let html = "<html><body><p>Just a paragraph.</p></body></html>";
        assert_eq!(extract_article_text(html), "Just a paragraph.");
    }

    #[test]
    fn test_strip_tags_removes_scripts_and_styles() {
        let html = r#"<div><script>var x = "<p>not text</p>";</script>
            <style>p { color: red }</style>Visible   text</div>"#;
        assert_eq!(strip_tags(html), "Visible text");
    }

    #[test]
    fn test_strip_tags_collapses_whitespace() {
        assert_eq!(strip_tags("<b>a</b>\n\n  <i>b</i>\t c"), "a b c");
    }

    #[test]
    fn test_tagless_input_survives() {
        let html = "no markup here at all";
        assert_eq!(extract_article_text(html), "no markup here at all");
    }
}
