//! URL Normalizer
//!
//! Produces the canonical form of an article URL used for identity and
//! dedup. Normalization never fails: unparseable input is returned unchanged.

use url::Url;

/// Query keys dropped during normalization. Everything else is preserved,
/// including `id`, `article_id`, `story_id`.
const TRACKING_KEYS: &[&str] = &["gclid", "fbclid", "ref", "source", "campaign", "medium"];

fn is_tracking_key(key: &str) -> bool {
    let key = key.to_lowercase();
    key.starts_with("utm_") || TRACKING_KEYS.contains(&key.as_str())
}

/// Normalize an article URL.
///
/// Rules, in order: force https (except localhost), lowercase host and strip
/// a leading `www.`, strip the trailing slash (unless the path is `/`), drop
/// tracking query keys, drop the fragment.
pub fn normalize_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };

    let host = match url.host_str() {
        Some(h) => h.to_lowercase(),
        None => return raw.to_string(),
    };

    if url.scheme() != "https" && host != "localhost" {
        // http and friends all upgrade; failure leaves the scheme as-is.
        let _ = url.set_scheme("https");
    }

    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    if url.set_host(Some(host.as_str())).is_err() {
        return raw.to_string();
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_key(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &kept {
            serializer.append_pair(k, v);
        }
        let query = serializer.finish();
        url.set_query(Some(query.as_str()));
    }

    url.set_fragment(None);

    url.to_string()
}

/// The lowercased host with any leading `www.` removed, or `None` when the
/// URL does not parse.
pub fn normalized_domain(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrades_scheme_and_strips_www() {
        assert_eq!(normalize_url("http://www.Site.com/x"), "https://site.com/x");
    }

    #[test]
    fn localhost_keeps_scheme() {
        assert_eq!(normalize_url("http://localhost:3000/a"), "http://localhost:3000/a");
    }

    #[test]
    fn strips_trailing_slash_except_root() {
        assert_eq!(normalize_url("https://site.com/x/"), "https://site.com/x");
        assert_eq!(normalize_url("https://site.com/"), "https://site.com/");
    }

    #[test]
    fn drops_tracking_keys_keeps_the_rest() {
        let out = normalize_url("https://site.com/a?utm_source=tw&article_id=9&fbclid=z&id=3");
        assert_eq!(out, "https://site.com/a?article_id=9&id=3");
    }

    #[test]
    fn drops_fragment() {
        assert_eq!(normalize_url("https://site.com/a#section-2"), "https://site.com/a");
    }

    #[test]
    fn unparseable_input_is_returned_unchanged() {
        assert_eq!(normalize_url("not a url"), "not a url");
        assert_eq!(normalize_url(""), "");
    }

    #[test]
    fn normalization_is_idempotent() {
        let inputs = [
            "http://www.site.com/x/?utm_source=foo",
            "https://site.com/a?id=1#frag",
            "HTTPS://WWW.EXAMPLE.COM/News/Story/",
        ];
        for input in inputs {
            let once = normalize_url(input);
            assert_eq!(normalize_url(&once), once, "not idempotent for {}", input);
        }
    }

    #[test]
    fn scenario_duplicate_urls_normalize_equal() {
        let a = normalize_url("https://www.site.com/x/?utm_source=foo");
        let b = normalize_url("http://site.com/x");
        assert_eq!(a, b);
    }

    #[test]
    fn domain_extraction() {
        assert_eq!(normalized_domain("https://www.site.com/x"), Some("site.com".to_string()));
        assert_eq!(normalized_domain("nope"), None);
    }
}
