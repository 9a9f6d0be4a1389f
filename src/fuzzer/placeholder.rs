//! Placeholder location and substitution
//!
//! [`PlaceholderMap::locate`] scans a template once per run. [`substitute`]
//! is pure: it never touches the template and returns a new request for
//! every word.

use std::collections::BTreeSet;

use super::encoding::EncodingPolicy;
use crate::http::{FuzzedRequest, HeaderMap, RequestBody, RequestTemplate};

/// Default placeholder token
pub const DEFAULT_KEYWORD: &str = "FUZZ";

/// How the body is substituted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Raw,
    Structured,
}

/// Placeholder occurrences in the headers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderPlaceholders {
    /// Any header key or value holds the token
    pub is_fuzz: bool,
    /// At least one header name holds the token
    pub is_key: bool,
    /// Header names whose value holds the token
    pub keys: BTreeSet<String>,
}

/// Placeholder occurrence in the body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyPlaceholder {
    pub is_fuzz: bool,
    pub kind: BodyKind,
}

/// Where the token occurs in a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderMap {
    keyword: String,
    pub path: bool,
    pub headers: HeaderPlaceholders,
    pub body: BodyPlaceholder,
}

impl PlaceholderMap {
    /// Scan path, headers and body for `keyword`
    pub fn locate(template: &RequestTemplate, keyword: &str) -> Self {
        let path = template.path.contains(keyword);

        let mut headers = HeaderPlaceholders::default();
        for (key, value) in &template.headers {
            if key.contains(keyword) {
                headers.is_fuzz = true;
                headers.is_key = true;
            }
            if value.contains(keyword) {
                headers.is_fuzz = true;
                headers.keys.insert(key.clone());
            }
        }

        let body = match &template.body {
            None => BodyPlaceholder {
                is_fuzz: false,
                kind: BodyKind::Raw,
            },
            Some(RequestBody::Raw(text)) => BodyPlaceholder {
                is_fuzz: text.contains(keyword),
                kind: BodyKind::Raw,
            },
            Some(structured @ RequestBody::Structured(_)) => BodyPlaceholder {
                is_fuzz: structured.to_text().contains(keyword),
                kind: BodyKind::Structured,
            },
        };

        Self {
            keyword: keyword.to_string(),
            path,
            headers,
            body,
        }
    }

    /// Token this map was built for
    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// Whether the token occurs anywhere
    pub fn is_fuzzable(&self) -> bool {
        self.path || self.headers.is_fuzz || self.body.is_fuzz
    }
}

/// Build the concrete request for `word`
pub fn substitute(
    template: &RequestTemplate,
    map: &PlaceholderMap,
    word: &str,
    encoding: EncodingPolicy,
) -> FuzzedRequest {
    let keyword = map.keyword();

    let path = if map.path {
        template.path.replace(keyword, &encoding.encode(word))
    } else {
        template.path.clone()
    };

    let mut headers = template.headers.clone();
    if map.headers.is_fuzz {
        for key in &map.headers.keys {
            if let Some(value) = headers.get_mut(key) {
                *value = value.replace(keyword, word);
            }
        }

        // Renamed keys keep their position
        if map.headers.is_key {
            headers = headers
                .into_iter()
                .map(|(key, value)| {
                    if key.contains(keyword) {
                        (key.replace(keyword, word), value)
                    } else {
                        (key, value)
                    }
                })
                .collect::<HeaderMap>();
        }
    }

    let body = template.body.as_ref().map(|body| {
        let text = body.to_text();
        if map.body.is_fuzz {
            text.replace(keyword, word)
        } else {
            text
        }
    });

    FuzzedRequest {
        method: template.method.clone(),
        url: template.url_for(&path),
        path,
        headers,
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HeaderInput;

    fn template(url: &str, headers: &[&str], data: Option<&str>) -> RequestTemplate {
        let lines = headers.iter().map(|h| h.to_string()).collect();
        let headers = HeaderInput::Lines(lines).into_map().unwrap();
        let method = if data.is_some() { "POST" } else { "GET" };
        RequestTemplate::parse(url, method, headers, data).unwrap()
    }

    #[test]
    fn test_locate_path() {
        let t = template("https://example.com/FUZZ", &[], None);
        let map = PlaceholderMap::locate(&t, DEFAULT_KEYWORD);
        assert!(map.path);
        assert!(!map.headers.is_fuzz);
        assert!(!map.body.is_fuzz);
        assert!(map.is_fuzzable());
    }

    #[test]
    fn test_locate_nothing() {
        let t = template("https://example.com/admin", &["X-Test: yes"], Some("a=b"));
        assert!(!PlaceholderMap::locate(&t, DEFAULT_KEYWORD).is_fuzzable());
    }

    #[test]
    fn test_locate_is_case_sensitive() {
        let t = template("https://example.com/fuzz", &[], None);
        assert!(!PlaceholderMap::locate(&t, DEFAULT_KEYWORD).path);
    }

    #[test]
    fn test_header_value_substitution() {
        let t = template("https://example.com/", &["Authorization: Bearer FUZZ"], None);
        let map = PlaceholderMap::locate(&t, DEFAULT_KEYWORD);
        assert!(map.headers.is_fuzz);
        assert!(!map.headers.is_key);
        assert!(map.headers.keys.contains("Authorization"));

        let req = substitute(&t, &map, "tok1", EncodingPolicy::Raw);
        assert_eq!(req.headers.get("Authorization").unwrap(), "Bearer tok1");
        assert_eq!(req.headers.len(), 1);
    }

    #[test]
    fn test_header_key_substitution() {
        let t = template("https://example.com/", &["X-FUZZ-Id: FUZZ", "Accept: */*"], None);
        let map = PlaceholderMap::locate(&t, DEFAULT_KEYWORD);
        assert!(map.headers.is_key);

        let req = substitute(&t, &map, "user", EncodingPolicy::Raw);
        assert_eq!(req.headers.get("X-user-Id").map(String::as_str), Some("user"));
        assert_eq!(req.headers.get("Accept").map(String::as_str), Some("*/*"));
        assert!(!req.headers.contains_key("X-FUZZ-Id"));
    }

    #[test]
    fn test_headers_keep_command_line_order() {
        let t = template(
            "https://example.com/",
            &["Zeta: 1", "X-FUZZ: FUZZ", "Alpha: 2", "Cookie: id=FUZZ"],
            None,
        );
        let map = PlaceholderMap::locate(&t, DEFAULT_KEYWORD);
        let req = substitute(&t, &map, "w", EncodingPolicy::Raw);

        let pairs: Vec<_> = req
            .headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![("Zeta", "1"), ("X-w", "w"), ("Alpha", "2"), ("Cookie", "id=w")]
        );
    }

    #[test]
    fn test_path_words_are_not_normalized() {
        let t = template("http://127.0.0.1/app/FUZZ", &[], None);
        let map = PlaceholderMap::locate(&t, DEFAULT_KEYWORD);

        let dots = substitute(&t, &map, "../../etc/passwd", EncodingPolicy::Raw);
        assert_eq!(dots.path, "/app/../../etc/passwd");
        assert_eq!(dots.url, "http://127.0.0.1/app/../../etc/passwd");

        let hash = substitute(&t, &map, "a#b", EncodingPolicy::Raw);
        assert_eq!(hash.path, "/app/a#b");
    }

    #[test]
    fn test_structured_body_substitution() {
        let t = template("https://example.com/login", &[], Some(r#"{"user":"FUZZ"}"#));
        let map = PlaceholderMap::locate(&t, DEFAULT_KEYWORD);
        assert_eq!(map.body.kind, BodyKind::Structured);

        let req = substitute(&t, &map, "root", EncodingPolicy::Raw);
        assert_eq!(req.body.as_deref(), Some(r#"{"user":"root"}"#));
    }

    #[test]
    fn test_raw_body_substitution_is_global() {
        let t = template("https://example.com/login", &[], Some("u=FUZZ&p=FUZZ"));
        let map = PlaceholderMap::locate(&t, DEFAULT_KEYWORD);
        assert_eq!(map.body.kind, BodyKind::Raw);

        let req = substitute(&t, &map, "x", EncodingPolicy::Raw);
        assert_eq!(req.body.as_deref(), Some("u=x&p=x"));
    }

    #[test]
    fn test_substitution_is_pure() {
        let t = template(
            "https://example.com/FUZZ?id=FUZZ",
            &["X-FUZZ: FUZZ"],
            Some(r#"{"k":"FUZZ"}"#),
        );
        let snapshot = t.clone();
        let map = PlaceholderMap::locate(&t, DEFAULT_KEYWORD);

        let first = substitute(&t, &map, "w", EncodingPolicy::Raw);
        let second = substitute(&t, &map, "w", EncodingPolicy::Raw);

        assert_eq!(first, second);
        assert_eq!(t.path, snapshot.path);
        assert_eq!(t.headers, snapshot.headers);
        assert_eq!(t.body, snapshot.body);
        assert_eq!(first.path, "/w?id=w");
        assert_eq!(first.url, "https://example.com/w?id=w");
    }

    #[test]
    fn test_custom_keyword() {
        let t = template("https://example.com/WORD/FUZZ", &[], None);
        let map = PlaceholderMap::locate(&t, "WORD");
        let req = substitute(&t, &map, "api", EncodingPolicy::Raw);
        assert_eq!(req.path, "/api/FUZZ");
    }

    #[test]
    fn test_raw_and_encoded_path_substitution() {
        let t = template("https://example.com/FUZZ", &["X-Word: FUZZ"], None);
        let map = PlaceholderMap::locate(&t, DEFAULT_KEYWORD);

        let raw = substitute(&t, &map, "a b", EncodingPolicy::Raw);
        assert_eq!(raw.path, "/a b");

        let smart = substitute(&t, &map, "a b", EncodingPolicy::Smart);
        assert_eq!(smart.path, "/a%20b");
        // Headers always get the raw word
        assert_eq!(smart.headers.get("X-Word").map(String::as_str), Some("a b"));

        let full = substitute(&t, &map, "a/b", EncodingPolicy::Full);
        assert_eq!(full.path, "/a%2Fb");
    }
}
