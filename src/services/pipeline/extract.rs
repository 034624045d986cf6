//! HTML Extraction
//!
//! Pulls the canonical link and the readable text out of fetched article
//! HTML, and flags boilerplate-dominated pages that are not worth
//! classifying.

use once_cell::sync::Lazy;
use ego_tree::NodeRef;
use scraper::{Html, Node, Selector};

/// Elements that never contribute article text.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "noscript", "form", "iframe", "svg",
    "button",
];

/// Class/id markers of ad, cookie and popup chrome.
const NOISE_MARKERS: &[&str] =
    &["ad-", "-ad", "advert", "cookie", "popup", "modal", "banner", "promo", "newsletter"];

/// Containers tried in order before falling back to `<body>`.
static CONTENT_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    ["article", "main", "[role=\"main\"]", ".article-body", ".story-body", "body"]
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .collect()
});

static CANONICAL_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("link[rel=\"canonical\"]").expect("static selector"));

/// Boilerplate phrases counted by the quality gate.
const BOILERPLATE_PHRASES: &[&str] = &[
    "subscribe to our newsletter",
    "cookie policy",
    "terms of service",
    "privacy policy",
    "all rights reserved",
    "sign up for our",
    "accept all cookies",
];

/// The `href` of `<link rel="canonical">`, if the page declares one.
pub fn extract_canonical_url(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    document
        .select(&CANONICAL_SELECTOR)
        .next()
        .and_then(|el| el.value().attr("href"))
        .map(|href| href.trim().to_string())
        .filter(|href| !href.is_empty())
}

/// Extract readable text: prefer `<article>`-like containers, skip
/// script/style/nav/chrome elements, collapse whitespace.
pub fn extract_clean_text(html: &str) -> String {
    let document = Html::parse_document(html);

    for selector in CONTENT_SELECTORS.iter() {
        if let Some(root) = document.select(selector).next() {
            let mut out = String::new();
            collect_text(*root, &mut out);
            let collapsed = collapse_whitespace(&out);
            if !collapsed.is_empty() {
                return collapsed;
            }
        }
    }

    String::new()
}

fn collect_text(node: NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Text(text) => {
            out.push_str(&text);
            out.push(' ');
        },
        Node::Element(element) => {
            let tag = element.name();
            if SKIP_TAGS.contains(&tag) {
                return;
            }
            let marker_blob = format!(
                "{} {}",
                element.attr("class").unwrap_or(""),
                element.attr("id").unwrap_or("")
            )
            .to_lowercase();
            if NOISE_MARKERS.iter().any(|m| marker_blob.contains(m)) {
                return;
            }
            for child in node.children() {
                collect_text(child, out);
            }
        },
        Node::Document | Node::Fragment => {
            for child in node.children() {
                collect_text(child, out);
            }
        },
        _ => {},
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// True when boilerplate phrase density exceeds 3 hits per 500 chars.
pub fn looks_like_boilerplate(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    let lower = text.to_lowercase();
    let hits: usize = BOILERPLATE_PHRASES
        .iter()
        .map(|phrase| lower.matches(phrase).count())
        .sum();
    if hits == 0 {
        return false;
    }
    (hits as f64) / (text.len() as f64 / 500.0) > 3.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_canonical_link() {
        let html = r#"<html><head>
            <link rel="stylesheet" href="/style.css">
            <link rel="canonical" href="https://site.com/story">
            </head><body></body></html>"#;
        assert_eq!(extract_canonical_url(html), Some("https://site.com/story".to_string()));
    }

    #[test]
    fn canonical_absent_is_none() {
        assert_eq!(extract_canonical_url("<html><body>hi</body></html>"), None);
    }

    #[test]
    fn prefers_article_container_and_skips_chrome() {
        let html = r#"<html><body>
            <nav>Home News Markets</nav>
            <article><p>Shares of the company rose sharply.</p>
            <script>track();</script></article>
            <footer>All rights reserved</footer>
            </body></html>"#;
        let text = extract_clean_text(html);
        assert_eq!(text, "Shares of the company rose sharply.");
    }

    #[test]
    fn skips_ad_and_cookie_elements() {
        let html = r#"<html><body><article>
            <div class="ad-slot">Sponsored content here</div>
            <div id="cookie-consent">We use cookies</div>
            <p>Real story text.</p>
            </article></body></html>"#;
        let text = extract_clean_text(html);
        assert_eq!(text, "Real story text.");
    }

    #[test]
    fn collapses_whitespace() {
        let html = "<html><body><article><p>a\n\n   b\t c</p></article></body></html>";
        assert_eq!(extract_clean_text(html), "a b c");
    }

    #[test]
    fn boilerplate_density_gate() {
        let noisy = "subscribe to our newsletter cookie policy terms of service privacy policy";
        assert!(looks_like_boilerplate(noisy));

        let clean = "The company reported quarterly earnings above expectations. ".repeat(10);
        assert!(!looks_like_boilerplate(&clean));
    }
}
