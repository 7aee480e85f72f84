//! Literal-splitter helpers for scanning XML text without a parser.
//!
//! Gate checks and the pattern classifier read attribute tokens out of
//! raw part text. These helpers do boundary-checked substring scans only;
//! they never build a DOM and never allocate beyond the returned slices.

pub(crate) fn find_bytes(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

/// Extract `name="value"` (or single-quoted) from an open-tag slice. The
/// attribute name must not be preceded by a name character, so `dxfId`
/// never matches inside `priority` and `r` never matches inside `ref`.
pub(crate) fn attr_value<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let bytes = tag.as_bytes();
    let mut from = 0usize;
    loop {
        let pos = find_bytes(bytes, name.as_bytes(), from)?;
        let before_ok = pos == 0
            || !matches!(bytes[pos - 1], b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b':' | b'-' | b'.');
        let after = pos + name.len();
        if before_ok && after < bytes.len() && bytes[after] == b'=' {
            let quote = *bytes.get(after + 1)?;
            if quote == b'"' || quote == b'\'' {
                let value_start = after + 2;
                let end = find_bytes(bytes, &[quote], value_start)?;
                return Some(&tag[value_start..end]);
            }
        }
        from = pos + name.len();
    }
}

/// Offsets of `<elem` open tags (start and self-closing alike), where the
/// element name ends at whitespace, `/` or `>`.
pub(crate) fn tag_opens(text: &str, elem: &str) -> Vec<usize> {
    let needle = format!("<{elem}");
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut from = 0usize;
    while let Some(pos) = find_bytes(bytes, needle.as_bytes(), from) {
        let after = pos + needle.len();
        match bytes.get(after) {
            Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') | Some(b'/') | Some(b'>') => {
                out.push(pos);
            }
            _ => {}
        }
        from = pos + 1;
    }
    out
}

/// The open tag starting at `pos` (inclusive `<`..`>`), if terminated.
pub(crate) fn tag_at(text: &str, pos: usize) -> Option<&str> {
    let end = find_bytes(text.as_bytes(), b">", pos)?;
    Some(&text[pos..=end])
}

pub(crate) fn is_self_closing(tag: &str) -> bool {
    tag.ends_with("/>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_value_handles_both_quote_styles_and_name_boundaries() {
        assert_eq!(attr_value(r#"<f t="shared" si="0">"#, "si"), Some("0"));
        assert_eq!(attr_value("<f t='shared' si='3'>", "si"), Some("3"));
        // `Id` must not match inside `dxfId`.
        assert_eq!(attr_value(r#"<cfRule dxfId="2" priority="1">"#, "Id"), None);
        assert_eq!(attr_value(r#"<c r="A1"/>"#, "r"), Some("A1"));
        assert_eq!(attr_value(r#"<f t="shared" ref="A1:A20" si="0"/>"#, "r"), None);
    }

    #[test]
    fn tag_opens_respects_element_name_boundaries() {
        let text = r#"<dxfs count="2"><dxf/><dxf></dxf></dxfs>"#;
        assert_eq!(tag_opens(text, "dxf").len(), 2);
        assert_eq!(tag_opens(text, "dxfs").len(), 1);
    }

    #[test]
    fn tag_at_returns_the_full_open_tag() {
        let text = r#"<tableColumn id="2" name="A"/><x/>"#;
        let tag = tag_at(text, 0).unwrap();
        assert_eq!(tag, r#"<tableColumn id="2" name="A"/>"#);
        assert!(is_self_closing(tag));
    }
}
