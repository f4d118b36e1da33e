//! Attribute Value Templates: `some-{expr}-text` strings that appear as XSLT attribute
//! values on literal result elements and on many instruction attributes. Parsed once
//! into a sequence of static/dynamic parts, then resolved per context node (component
//! E.2's `resolveExpression`).

use xslt_xpath::Expression;

#[derive(Debug, Clone)]
pub enum AvtPart {
    Static(String),
    Dynamic(Expression),
}

#[derive(Debug, Clone)]
pub enum AttributeValueTemplate {
    Static(String),
    Dynamic(Vec<AvtPart>),
}

impl AttributeValueTemplate {
    pub fn is_static(&self) -> bool {
        matches!(self, AttributeValueTemplate::Static(_))
    }
}

/// Splits `text` into static and `{expr}` parts. `{{` and `}}` escape literal braces.
/// Parsing a `{...}` body that isn't valid XPath is not an error here: the unparsed
/// text is kept as a dynamic part carrying the raw source, and evaluation falls back to
/// emitting it as a `[[[ ... ]]]`-wrapped literal (see `driver::resolve_avt`), mirroring
/// how a stylesheet author's malformed expression degrades to visible text rather than
/// aborting the whole transform.
pub fn parse_avt(text: &str) -> AttributeValueTemplate {
    if !text.contains('{') {
        return AttributeValueTemplate::Static(text.to_string());
    }

    let mut parts = Vec::new();
    let mut last_end = 0;
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if text.get(i + 1..i + 2) == Some("{") {
                i += 2;
                continue;
            }
            if i > last_end {
                parts.push(AvtPart::Static(unescape_braces(&text[last_end..i])));
            }
            let rest = &text[i..];
            match rest.find('}') {
                Some(end) => {
                    let inner = rest[1..end].trim();
                    match xslt_xpath::parse_expression(inner) {
                        Ok(expr) => parts.push(AvtPart::Dynamic(expr)),
                        Err(_) => parts.push(AvtPart::Static(format!("[[[{}]]]", inner))),
                    }
                    i += end + 1;
                    last_end = i;
                }
                None => {
                    // Unclosed '{': treat the rest of the string as a literal sentinel
                    // rather than failing the whole stylesheet parse.
                    parts.push(AvtPart::Static(format!("[[[{}]]]", &rest[1..])));
                    i = bytes.len();
                    last_end = i;
                }
            }
        } else if bytes[i] == b'}' && text.get(i + 1..i + 2) == Some("}") {
            if i > last_end {
                parts.push(AvtPart::Static(unescape_braces(&text[last_end..i])));
            }
            parts.push(AvtPart::Static("}".to_string()));
            i += 2;
            last_end = i;
        } else {
            i += 1;
        }
    }
    if last_end < text.len() {
        parts.push(AvtPart::Static(unescape_braces(&text[last_end..])));
    }

    AttributeValueTemplate::Dynamic(parts)
}

fn unescape_braces(s: &str) -> String {
    s.replace("{{", "{").replace("}}", "}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_text_has_no_dynamic_parts() {
        assert!(matches!(parse_avt("plain"), AttributeValueTemplate::Static(_)));
    }

    #[test]
    fn splits_static_and_dynamic_parts() {
        let avt = parse_avt("pre-{@x}-post");
        match avt {
            AttributeValueTemplate::Dynamic(parts) => {
                assert_eq!(parts.len(), 3);
                assert!(matches!(parts[0], AvtPart::Static(ref s) if s == "pre-"));
                assert!(matches!(parts[1], AvtPart::Dynamic(_)));
                assert!(matches!(parts[2], AvtPart::Static(ref s) if s == "-post"));
            }
            _ => panic!("expected dynamic AVT"),
        }
    }

    #[test]
    fn escaped_braces_are_literal() {
        let avt = parse_avt("{{literal}}");
        match avt {
            AttributeValueTemplate::Dynamic(parts) => {
                let joined: String = parts
                    .iter()
                    .map(|p| match p {
                        AvtPart::Static(s) => s.clone(),
                        AvtPart::Dynamic(_) => String::new(),
                    })
                    .collect();
                assert_eq!(joined, "{literal}");
            }
            _ => panic!("expected dynamic AVT"),
        }
    }
}
