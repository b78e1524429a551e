//! Entry extraction from HTML pages.
//!
//! Channel mirrors and paste sites publish entries inside ordinary HTML. The
//! visible text (plus link targets) is scanned for anything that looks like an
//! entry URI; each match becomes one line of the decoded payload.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

/// Matches a URI with one of the known entry schemes, up to whitespace or markup.
static ENTRY_URI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\b(?:vmess|vless|trojan|ssr|ss|tuic|hysteria2|hy2|wireguard|wg)://[^\s<>"'`]+"#,
    )
    .expect("entry URI regex")
});

static LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("link selector"));

/// Punctuation that ends a sentence or closes a bracket around an entry.
const TRAILING_PUNCT: &[char] = &[')', ']', '}', ',', '.', ';', ':', '!', '?', '\'', '"'];

/// Extract entry URIs from an HTML document, one per line, in document order.
pub(crate) fn extract_entries(html: &str) -> String {
    let doc = Html::parse_document(html);

    let mut found: Vec<&str> = Vec::new();
    for node in doc.root_element().text() {
        for line in node.lines() {
            for entry in entries_in_line(line) {
                if !found.contains(&entry) {
                    found.push(entry);
                }
            }
        }
    }

    let hrefs: Vec<&str> = doc
        .select(&LINK_SEL)
        .filter_map(|el| el.value().attr("href"))
        .map(str::trim)
        .filter(|href| ENTRY_URI_RE.is_match(href))
        .collect();
    for href in hrefs {
        if !found.contains(&href) {
            found.push(href);
        }
    }

    found.join("\n")
}

/// Entries inside one line of visible text.
///
/// The URI pattern stops at whitespace, but a remark may contain spaces, so a
/// match that reaches its `#` runs on to the next entry or the end of the line.
fn entries_in_line(line: &str) -> Vec<&str> {
    let matches: Vec<(usize, usize)> = ENTRY_URI_RE
        .find_iter(line)
        .map(|m| (m.start(), m.end()))
        .collect();

    matches
        .iter()
        .enumerate()
        .map(|(i, &(start, end))| {
            let matched = &line[start..end];
            if matched.contains('#') {
                let stop = matches.get(i + 1).map_or(line.len(), |next| next.0);
                strip_closing_bracket(&line[..start], line[start..stop].trim_end())
            } else {
                matched.trim_end_matches(TRAILING_PUNCT)
            }
        })
        .collect()
}

/// Cut at the bracket closing an opener right before the entry, as in
/// `(vless://...#DE).`
fn strip_closing_bracket<'a>(before: &str, entry: &'a str) -> &'a str {
    let closer = match before.trim_end().chars().last() {
        Some('(') => ')',
        Some('[') => ']',
        Some('{') => '}',
        _ => return entry,
    };
    entry.rfind(closer).map_or(entry, |idx| entry[..idx].trim_end())
}
