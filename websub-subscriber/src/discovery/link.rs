//! Typed link relations from `Link` headers and `<link>` markup.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// A link target with its relation types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub target: String,
    /// Lowercased relation types
    pub rels: Vec<String>,
}

impl Link {
    pub fn new(target: impl Into<String>, rel: &str) -> Self {
        Self {
            target: target.into(),
            rels: split_rels(rel),
        }
    }

    pub fn has_rel(&self, rel: &str) -> bool {
        self.rels.iter().any(|r| r.eq_ignore_ascii_case(rel))
    }
}

fn split_rels(value: &str) -> Vec<String> {
    value
        .split_ascii_whitespace()
        .map(|r| r.to_ascii_lowercase())
        .collect()
}

/// Parse one `Link` header value (RFC 8288).
///
/// `<a>; rel="hub", <b>; rel=self` yields two links. Link-values without a
/// `rel` parameter, or without a `<target>`, are skipped.
pub fn parse_link_header(value: &str) -> Vec<Link> {
    let mut links = Vec::new();
    let mut rest = value;

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if rest.is_empty() {
            break;
        }

        if !rest.starts_with('<') {
            // Not a link-value; resync at the next top-level comma.
            let (_, remaining) = split_unquoted(rest, ',');
            rest = remaining;
            continue;
        }

        let Some(close) = rest.find('>') else {
            break;
        };
        let target = rest[1..close].trim();
        let (params, remaining) = split_unquoted(&rest[close + 1..], ',');
        rest = remaining;

        if target.is_empty() {
            continue;
        }
        if let Some(rel) = rel_param(params) {
            let link = Link::new(target, &rel);
            if !link.rels.is_empty() {
                links.push(link);
            }
        }
    }

    links
}

/// Split at the first `sep` outside a quoted string.
fn split_unquoted(s: &str, sep: char) -> (&str, &str) {
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if in_quotes && c == '\\' {
            escaped = true;
        } else if c == '"' {
            in_quotes = !in_quotes;
        } else if c == sep && !in_quotes {
            return (&s[..i], &s[i + c.len_utf8()..]);
        }
    }

    (s, "")
}

/// The first `rel` parameter of a link-value; later ones are ignored.
fn rel_param(params: &str) -> Option<String> {
    let mut rest = params;
    while !rest.is_empty() {
        let (param, remaining) = split_unquoted(rest, ';');
        rest = remaining;

        let Some((name, value)) = param.split_once('=') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("rel") {
            return Some(unquote(value.trim()));
        }
    }
    None
}

fn unquote(value: &str) -> String {
    match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => {
            let mut out = String::with_capacity(inner.len());
            let mut chars = inner.chars();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                } else {
                    out.push(c);
                }
            }
            out
        }
        None => value.to_string(),
    }
}

/// Collect `<link rel=... href=...>` elements from HTML or XML markup.
///
/// The scan is lenient: end tags need not match and attributes may be
/// unquoted or valueless. Namespaced elements such as `<atom:link>` count.
/// With `head_only`, only links between `<head>` and `</head>` (or the first
/// `<body>`) are returned. A tokenizer error ends the scan; links found
/// before it are kept.
pub fn extract_document_links(markup: &str, head_only: bool) -> Vec<Link> {
    let mut reader = Reader::from_str(markup);
    reader.check_end_names(false);

    let mut links = Vec::new();
    let mut in_head = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) | Ok(Event::Empty(element)) => {
                let name = element.local_name();
                let name = name.as_ref();
                if name.eq_ignore_ascii_case(b"head") {
                    in_head = true;
                } else if name.eq_ignore_ascii_case(b"body") {
                    in_head = false;
                } else if name.eq_ignore_ascii_case(b"link") && (in_head || !head_only) {
                    if let Some(link) = link_from_element(&element, &reader) {
                        links.push(link);
                    }
                }
            }
            Ok(Event::End(element)) => {
                if element.local_name().as_ref().eq_ignore_ascii_case(b"head") {
                    in_head = false;
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(
                    position = reader.buffer_position(),
                    "stopping link scan on malformed markup: {e}"
                );
                break;
            }
        }
    }

    links
}

fn link_from_element(element: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Option<Link> {
    let mut rel = None;
    let mut href = None;

    for attribute in element.html_attributes().flatten() {
        let key = attribute.key.local_name();
        let key = key.as_ref();
        let value = match attribute.decode_and_unescape_value(reader) {
            Ok(value) => value.into_owned(),
            Err(_) => String::from_utf8_lossy(&attribute.value).into_owned(),
        };

        if key.eq_ignore_ascii_case(b"rel") && rel.is_none() {
            rel = Some(value);
        } else if key.eq_ignore_ascii_case(b"href") && href.is_none() {
            href = Some(value);
        }
    }

    let href = href?.trim().to_string();
    let link = Link::new(href, &rel?);
    if link.target.is_empty() || link.rels.is_empty() {
        return None;
    }
    Some(link)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_link() {
        let links = parse_link_header(r#"<https://hub.example/>; rel="hub""#);
        assert_eq!(links, vec![Link::new("https://hub.example/", "hub")]);
    }

    #[test]
    fn test_parse_multiple_links() {
        let links = parse_link_header(
            r#"<https://hub.example/>; rel="hub", <https://example.com/feed>; rel="self""#,
        );
        assert_eq!(links.len(), 2);
        assert!(links[0].has_rel("hub"));
        assert_eq!(links[1].target, "https://example.com/feed");
        assert!(links[1].has_rel("self"));
    }

    #[test]
    fn test_parse_unquoted_and_multi_rel() {
        let links = parse_link_header(r#"<https://a.example/>; rel=hub, <https://b.example/>; rel="Self alternate""#);
        assert_eq!(links.len(), 2);
        assert!(links[0].has_rel("hub"));
        assert_eq!(links[1].rels, vec!["self".to_string(), "alternate".to_string()]);
    }

    #[test]
    fn test_parse_commas_inside_target_and_quotes() {
        let links = parse_link_header(
            r#"<https://example.com/a,b>; title="x, y"; rel="hub", <https://example.com/c>; rel=self"#,
        );
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].target, "https://example.com/a,b");
        assert!(links[0].has_rel("hub"));
        assert_eq!(links[1].target, "https://example.com/c");
    }

    #[test]
    fn test_parse_skips_malformed() {
        let links = parse_link_header(
            r#"garbage, <https://no-rel.example/>; title="t", <>; rel=hub, <https://ok.example/>; rel=hub"#,
        );
        assert_eq!(links, vec![Link::new("https://ok.example/", "hub")]);
        assert!(parse_link_header("<https://unterminated.example/; rel=hub").is_empty());
        assert!(parse_link_header("").is_empty());
    }

    #[test]
    fn test_parse_first_rel_param_wins() {
        let links = parse_link_header(r#"<https://x.example/>; rel="hub"; rel="self""#);
        assert_eq!(links[0].rels, vec!["hub".to_string()]);
    }

    #[test]
    fn test_extract_html_links() {
        let html = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset=utf-8>
  <link rel="hub" href="https://hub.example/">
  <link rel=self href=https://example.com/page>
  <link rel="stylesheet" href="/style.css">
</head>
<body>
  <link rel="hub" href="https://rogue.example/">
</body>
</html>"#;

        let all = extract_document_links(html, false);
        assert_eq!(all.len(), 4);

        let head = extract_document_links(html, true);
        assert_eq!(
            head.iter().map(|l| l.target.as_str()).collect::<Vec<_>>(),
            vec!["https://hub.example/", "https://example.com/page", "/style.css"]
        );
    }

    #[test]
    fn test_extract_atom_links() {
        let feed = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Example</title>
  <link rel="hub" href="https://hub.example/"/>
  <link rel="self" href="https://example.com/feed?a=1&amp;b=2"/>
</feed>"#;

        let links = extract_document_links(feed, false);
        assert_eq!(links.len(), 2);
        assert_eq!(links[1].target, "https://example.com/feed?a=1&b=2");
        assert!(extract_document_links(feed, true).is_empty());
    }

    #[test]
    fn test_extract_namespaced_rss_link() {
        let rss = r#"<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom"><channel>
<atom:link rel="hub" href="https://hub.example/" />
<atom:link rel="self" href="https://example.com/rss" type="application/rss+xml" />
</channel></rss>"#;

        let links = extract_document_links(rss, false);
        assert_eq!(links.len(), 2);
        assert!(links[0].has_rel("hub"));
    }

    #[test]
    fn test_extract_skips_incomplete_links() {
        let html = r#"<head><link href="https://no-rel.example/"><link rel="hub"><link rel="hub" href="https://ok.example/"></head>"#;
        let links = extract_document_links(html, true);
        assert_eq!(links, vec![Link::new("https://ok.example/", "hub")]);
    }

    #[test]
    fn test_extract_ignores_comments() {
        let html = r#"<head><!-- <link rel="hub" href="https://old.example/"> --><link rel="hub" href="https://new.example/"></head>"#;
        let links = extract_document_links(html, true);
        assert_eq!(links, vec![Link::new("https://new.example/", "hub")]);
    }

    #[test]
    fn test_body_start_closes_head() {
        let html = r#"<html><head><title>t</title><body><link rel="hub" href="https://body.example/"></body></html>"#;
        assert!(extract_document_links(html, true).is_empty());
        assert_eq!(extract_document_links(html, false).len(), 1);
    }

    proptest::proptest! {
        #[test]
        fn prop_header_parser_never_panics(value in ".*") {
            let _ = parse_link_header(&value);
        }

        #[test]
        fn prop_markup_scanner_never_panics(markup in ".*", head_only in proptest::bool::ANY) {
            let _ = extract_document_links(&markup, head_only);
        }
    }
}
