//! A "dumb" XML driver that reads a document (input, stylesheet, or included fragment)
//! and builds it directly into a `Dom`, resolving namespace bindings as it goes. Both
//! the source document and the transform document go through this same parser; the
//! transform tree is then walked by the driver looking for elements in the XSLT
//! namespace, rather than being compiled into a separate instruction AST.

use crate::dom::{Dom, NodeId, QName};
use crate::error::XsltResult;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event as XmlEvent};
use quick_xml::Reader;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct NamespaceScope {
    /// "" is the default namespace binding (unprefixed elements).
    bindings: HashMap<String, String>,
}

impl NamespaceScope {
    fn resolve(&self, prefix: Option<&str>) -> Option<String> {
        self.bindings.get(prefix.unwrap_or("")).cloned()
    }
}

pub fn parse_document(source: &str) -> XsltResult<(Dom, NodeId)> {
    let mut dom = Dom::new();
    let root = dom.root();
    let mut reader = Reader::from_str(source);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    let mut stack: Vec<NodeId> = vec![root];
    let mut scopes: Vec<NamespaceScope> = vec![NamespaceScope {
        bindings: HashMap::new(),
    }];

    loop {
        match reader.read_event_into(&mut buf)? {
            XmlEvent::Start(e) => {
                let scope = child_scope(scopes.last().unwrap(), &e)?;
                let parent = *stack.last().unwrap();
                let name = resolve_name(e.name().as_ref(), &scope)?;
                let id = dom.create_element(parent, name);
                dom.set_namespace_scope(id, scope.bindings.clone());
                apply_attributes(&mut dom, id, &e, &scope)?;
                stack.push(id);
                scopes.push(scope);
            }
            XmlEvent::Empty(e) => {
                let scope = child_scope(scopes.last().unwrap(), &e)?;
                let parent = *stack.last().unwrap();
                let name = resolve_name(e.name().as_ref(), &scope)?;
                let id = dom.create_element(parent, name);
                dom.set_namespace_scope(id, scope.bindings.clone());
                apply_attributes(&mut dom, id, &e, &scope)?;
            }
            XmlEvent::End(_) => {
                stack.pop();
                scopes.pop();
            }
            XmlEvent::Text(e) => {
                let raw = std::str::from_utf8(e.as_ref())?;
                let text = unescape(raw).map(|c| c.into_owned()).unwrap_or_else(|_| raw.to_string());
                if !text.is_empty() {
                    dom.create_text(*stack.last().unwrap(), &text);
                }
            }
            XmlEvent::CData(e) => {
                let raw = std::str::from_utf8(e.as_ref())?;
                dom.create_text(*stack.last().unwrap(), raw);
            }
            XmlEvent::Comment(e) => {
                let raw = std::str::from_utf8(e.as_ref())?;
                dom.create_comment(*stack.last().unwrap(), raw);
            }
            XmlEvent::PI(e) => {
                let raw = std::str::from_utf8(e.as_ref())?;
                let (target, data) = raw.split_once(char::is_whitespace).unwrap_or((raw, ""));
                dom.create_processing_instruction(*stack.last().unwrap(), target, data.trim_start());
            }
            XmlEvent::Decl(_) | XmlEvent::DocType(_) => {}
            XmlEvent::Eof => break,
        }
        buf.clear();
    }

    Ok((dom, root))
}

fn child_scope(parent: &NamespaceScope, e: &BytesStart) -> XsltResult<NamespaceScope> {
    let mut bindings = parent.bindings.clone();
    for attr in e.attributes() {
        let attr = attr?;
        let key = std::str::from_utf8(attr.key.into_inner())?;
        if key == "xmlns" {
            bindings.insert(String::new(), String::from_utf8_lossy(&attr.value).into_owned());
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            bindings.insert(prefix.to_string(), String::from_utf8_lossy(&attr.value).into_owned());
        }
    }
    Ok(NamespaceScope { bindings })
}

fn resolve_name(raw: &[u8], scope: &NamespaceScope) -> XsltResult<QName> {
    let raw = std::str::from_utf8(raw)?;
    match raw.split_once(':') {
        Some((prefix, local)) => {
            let uri = scope.resolve(Some(prefix));
            Ok(QName::with_prefix(prefix, uri, local))
        }
        None => {
            let uri = scope.resolve(None);
            Ok(QName { prefix: None, uri, local: raw.to_string() })
        }
    }
}

fn apply_attributes(dom: &mut Dom, element: NodeId, e: &BytesStart, scope: &NamespaceScope) -> XsltResult<()> {
    for attr in e.attributes() {
        let attr = attr?;
        let key = std::str::from_utf8(attr.key.into_inner())?;
        if key == "xmlns" || key.starts_with("xmlns:") {
            continue;
        }
        let raw_value = String::from_utf8_lossy(&attr.value).into_owned();
        let value = unescape(&raw_value).map(|c| c.into_owned()).unwrap_or(raw_value);
        let name = match key.split_once(':') {
            Some((prefix, local)) => QName::with_prefix(prefix, scope.resolve(Some(prefix)), local),
            None => QName::local(key),
        };
        dom.set_attribute(element, name, value);
    }
    Ok(())
}
