//! Component G: renders the output `Dom` back to XML text. Two sentinel schemes pass
//! through the tree on the way here and are resolved against the final rendered string
//! rather than against individual node values: an attribute value template's failed
//! sub-expression (`[[[...]]]`, restored by `driver::resolve_avt` before it ever reaches
//! a node, so it never actually appears here) and `disable-output-escaping`, encoded as
//! private-use-area placeholder tokens so `quick_xml`'s writer can't re-escape them
//! before the final substitution pass runs.

use crate::context::EngineState;
use crate::dom::{Dom, NodeId};
use crate::driver::Options;
use crate::error::XsltResult;
use quick_xml::events::{BytesEnd, BytesPI, BytesStart, BytesText, Event};
use quick_xml::writer::Writer;
use std::collections::HashMap;
use xslt_xpath::NodeType;

const DOE_LT: &str = "\u{E000}XSLTDOE_LT\u{E000}";
const DOE_GT: &str = "\u{E000}XSLTDOE_GT\u{E000}";
const DOE_AMP: &str = "\u{E000}XSLTDOE_AMP\u{E000}";
const DOE_APOS: &str = "\u{E000}XSLTDOE_APOS\u{E000}";
const DOE_QUOT: &str = "\u{E000}XSLTDOE_QUOT\u{E000}";

/// Wraps text destined for `disable-output-escaping="yes"` output in placeholder tokens
/// that survive `quick_xml`'s own escaping untouched, to be unwrapped back to literal
/// markup characters once the whole document has been serialized.
pub(crate) fn sentinel_escape(text: &str) -> String {
    text.replace('&', DOE_AMP).replace('<', DOE_LT).replace('>', DOE_GT).replace('\'', DOE_APOS).replace('"', DOE_QUOT)
}

fn restore_sentinels(s: &str) -> String {
    s.replace(DOE_LT, "<").replace(DOE_GT, ">").replace(DOE_AMP, "&").replace(DOE_APOS, "'").replace(DOE_QUOT, "\"")
}

pub fn serialize(output: &Dom, engine: &EngineState, options: &Options) -> XsltResult<String> {
    let _ = options;
    let mut writer = Writer::new(Vec::new());
    write_children(&mut writer, output, output.root(), &HashMap::new())?;
    let bytes = writer.into_inner();
    let body = std::str::from_utf8(&bytes)?;
    let body = restore_sentinels(body);

    if engine.output_omit_xml_declaration {
        Ok(body)
    } else {
        Ok(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}", body))
    }
}

/// `ns_scope` is the prefix -> URI bindings already declared by an ancestor (`""` is
/// the default namespace), mirroring how `xml.rs`'s reader threads `NamespaceScope`
/// down the input tree. Each recursive call gets its own extended copy, the same
/// descend-and-extend shape as `child_scope` there.
fn write_children(writer: &mut Writer<Vec<u8>>, dom: &Dom, parent: NodeId, ns_scope: &HashMap<String, String>) -> XsltResult<()> {
    for &child in dom.children(parent) {
        write_node(writer, dom, child, ns_scope)?;
    }
    Ok(())
}

fn write_node(writer: &mut Writer<Vec<u8>>, dom: &Dom, node: NodeId, ns_scope: &HashMap<String, String>) -> XsltResult<()> {
    match dom.node_type(node) {
        NodeType::Element => {
            let qname = dom.name(node).unwrap().clone();
            let name = qname.to_string();
            let mut start = BytesStart::new(name.clone());
            let mut child_scope = ns_scope.clone();
            let mut new_bindings: Vec<(String, String)> = Vec::new();

            if let Some(uri) = &qname.uri {
                let key = qname.prefix.clone().unwrap_or_default();
                if ns_scope.get(&key) != Some(uri) {
                    new_bindings.push((key.clone(), uri.clone()));
                    child_scope.insert(key, uri.clone());
                }
            }
            // Unprefixed attributes are never namespaced by a default declaration, so
            // only attributes carrying an explicit prefix participate here.
            for &attr_id in dom.attribute_ids(node) {
                let attr_name = dom.name(attr_id).unwrap();
                if let (Some(prefix), Some(uri)) = (&attr_name.prefix, &attr_name.uri) {
                    if child_scope.get(prefix) != Some(uri) {
                        new_bindings.push((prefix.clone(), uri.clone()));
                        child_scope.insert(prefix.clone(), uri.clone());
                    }
                }
            }

            for (prefix, uri) in &new_bindings {
                let decl_name = if prefix.is_empty() { "xmlns".to_string() } else { format!("xmlns:{}", prefix) };
                start.push_attribute((decl_name.as_str(), uri.as_str()));
            }
            for &attr_id in dom.attribute_ids(node) {
                let attr_name = dom.name(attr_id).unwrap().to_string();
                let attr_value = dom.string_value(attr_id);
                start.push_attribute((attr_name.as_str(), attr_value.as_str()));
            }
            if dom.children(node).is_empty() {
                writer.write_event(Event::Empty(start))?;
            } else {
                writer.write_event(Event::Start(start))?;
                write_children(writer, dom, node, &child_scope)?;
                writer.write_event(Event::End(BytesEnd::new(name)))?;
            }
        }
        NodeType::Text => {
            writer.write_event(Event::Text(BytesText::new(&dom.string_value(node))))?;
        }
        NodeType::Comment => {
            writer.write_event(Event::Comment(BytesText::new(&dom.string_value(node))))?;
        }
        NodeType::ProcessingInstruction => {
            let target = dom.pi_target(node).unwrap_or_default();
            let data = dom.string_value(node);
            let content = if data.is_empty() { target.to_string() } else { format!("{} {}", target, data) };
            writer.write_event(Event::PI(BytesPI::new(content)))?;
        }
        _ => {}
    }
    Ok(())
}
