//! Tree-construction instructions: `copy`, `copy-of`, `element`, `attribute`, `text`,
//! `value-of`, `comment`, `processing-instruction`, `message`.

use crate::context::Scope;
use crate::dom::{Dom, NodeId, NodeRef, QName};
use crate::driver::{self, Ctx};
use crate::error::{XsltError, XsltResult};
use std::rc::Rc;
use xslt_xpath::{NodeType, XPathValue};

pub(crate) fn copy<'e, 'a>(ctx: &Ctx<'e, 'a>, output: &mut Dom, out_parent: NodeId, node: NodeId, context: NodeRef<'a>, pos: usize, size: usize, scope: &Rc<Scope<'a>>) -> XsltResult<()> {
    let copied = output.shallow_copy(context.dom, context.id, out_parent);
    if matches!(context.dom.node_type(context.id), NodeType::Element | NodeType::Root) {
        driver::process_children(ctx, output, copied, node, context, pos, size, scope)?;
    }
    Ok(())
}

pub(crate) fn copy_of<'e, 'a>(ctx: &Ctx<'e, 'a>, output: &mut Dom, out_parent: NodeId, node: NodeId, context: NodeRef<'a>, pos: usize, size: usize, scope: &Rc<Scope<'a>>) -> XsltResult<()> {
    let select = ctx.engine.transform.attribute_value(node, "select", None).unwrap_or(".");
    let value = driver::eval_select(ctx, select, context, pos, size, scope)?;
    match value {
        XPathValue::NodeSet(nodes) => {
            for n in nodes {
                output.deep_copy(n.dom, n.id, out_parent);
            }
        }
        other => {
            output.create_text(out_parent, &other.to_string());
        }
    }
    Ok(())
}

fn resolve_element_name<'e, 'a>(ctx: &Ctx<'e, 'a>, node: NodeId, context: NodeRef<'a>, pos: usize, size: usize, scope: &Rc<Scope<'a>>) -> XsltResult<QName> {
    let transform = &ctx.engine.transform;
    let raw_name = transform.attribute_value(node, "name", None).unwrap_or_default();
    let resolved = driver::resolve_avt(ctx, raw_name, context, pos, size, scope)?;
    let uri = match transform.attribute_value(node, "namespace", None) {
        Some(ns) => Some(driver::resolve_avt(ctx, ns, context, pos, size, scope)?),
        None => None,
    };
    Ok(match resolved.split_once(':') {
        Some((prefix, local)) => {
            // No explicit `namespace` attribute: look the prefix up against the
            // current input node's own in-scope bindings, the same as `xml.rs` does
            // for a prefix appearing on an input-side element.
            let resolved_uri = uri.or_else(|| {
                driver::nearest_element(context).and_then(|el| el.dom.resolve_namespace_prefix(el.id, Some(prefix)))
            });
            QName::with_prefix(prefix.to_string(), resolved_uri, local.to_string())
        }
        None => match uri {
            Some(uri) => QName::new(None, Some(uri), resolved),
            None => QName::local(resolved),
        },
    })
}

pub(crate) fn element<'e, 'a>(ctx: &Ctx<'e, 'a>, output: &mut Dom, out_parent: NodeId, node: NodeId, context: NodeRef<'a>, pos: usize, size: usize, scope: &Rc<Scope<'a>>) -> XsltResult<()> {
    let name = resolve_element_name(ctx, node, context, pos, size, scope)?;
    let new_el = output.create_element(out_parent, name);
    driver::process_children(ctx, output, new_el, node, context, pos, size, scope)
}

fn text_content_of_body<'e, 'a>(ctx: &Ctx<'e, 'a>, node: NodeId, context: NodeRef<'a>, pos: usize, size: usize, scope: &Rc<Scope<'a>>) -> XsltResult<String> {
    let mut frag = Dom::new();
    let frag_root = frag.root();
    driver::process_children(ctx, &mut frag, frag_root, node, context, pos, size, scope)?;
    Ok(frag.string_value(frag_root))
}

pub(crate) fn attribute<'e, 'a>(ctx: &Ctx<'e, 'a>, output: &mut Dom, out_parent: NodeId, node: NodeId, context: NodeRef<'a>, pos: usize, size: usize, scope: &Rc<Scope<'a>>) -> XsltResult<()> {
    let transform = &ctx.engine.transform;
    let raw_name = transform.attribute_value(node, "name", None).unwrap_or_default();
    let resolved_name = driver::resolve_avt(ctx, raw_name, context, pos, size, scope)?;
    let name = match resolved_name.split_once(':') {
        Some((prefix, local)) => QName::with_prefix(prefix.to_string(), None, local.to_string()),
        None => QName::local(resolved_name),
    };
    let value = text_content_of_body(ctx, node, context, pos, size, scope)?;
    let value = driver::process_whitespace_value(ctx, &value, None);
    output.set_attribute(out_parent, name, value);
    Ok(())
}

pub(crate) fn text(ctx: &Ctx, output: &mut Dom, out_parent: NodeId, node: NodeId) -> XsltResult<()> {
    let transform = &ctx.engine.transform;
    let raw = transform.string_value(node);
    let disable_escaping = transform.attribute_value(node, "disable-output-escaping", None) == Some("yes");
    let content = if disable_escaping { crate::serialize::sentinel_escape(&raw) } else { raw };
    output.create_text(out_parent, &content);
    Ok(())
}

pub(crate) fn value_of<'e, 'a>(ctx: &Ctx<'e, 'a>, output: &mut Dom, out_parent: NodeId, node: NodeId, context: NodeRef<'a>, pos: usize, size: usize, scope: &Rc<Scope<'a>>) -> XsltResult<()> {
    let transform = &ctx.engine.transform;
    let select = transform.attribute_value(node, "select", None).unwrap_or(".");
    let value = driver::eval_select(ctx, select, context, pos, size, scope)?.to_string();
    let element_context = driver::nearest_element(context);
    let value = driver::process_whitespace_value(ctx, &value, element_context);
    let disable_escaping = transform.attribute_value(node, "disable-output-escaping", None) == Some("yes");
    let content = if disable_escaping { crate::serialize::sentinel_escape(&value) } else { value };
    output.create_text(out_parent, &content);
    Ok(())
}

/// The body's string value becomes a real comment node. An earlier revision of this
/// handler computed the body into a scratch fragment but never appended anything to
/// `output`, so `xsl:comment` silently produced nothing; this version appends the
/// comment it built.
pub(crate) fn comment<'e, 'a>(ctx: &Ctx<'e, 'a>, output: &mut Dom, out_parent: NodeId, node: NodeId, context: NodeRef<'a>, pos: usize, size: usize, scope: &Rc<Scope<'a>>) -> XsltResult<()> {
    let text = text_content_of_body(ctx, node, context, pos, size, scope)?;
    output.create_comment(out_parent, &text);
    Ok(())
}

pub(crate) fn processing_instruction<'e, 'a>(ctx: &Ctx<'e, 'a>, output: &mut Dom, out_parent: NodeId, node: NodeId, context: NodeRef<'a>, pos: usize, size: usize, scope: &Rc<Scope<'a>>) -> XsltResult<()> {
    let transform = &ctx.engine.transform;
    let raw_name = transform.attribute_value(node, "name", None).unwrap_or_default();
    let target = driver::resolve_avt(ctx, raw_name, context, pos, size, scope)?;
    let data = text_content_of_body(ctx, node, context, pos, size, scope)?;
    output.create_processing_instruction(out_parent, &target, &data);
    Ok(())
}

/// `xsl:message`: logs the body's string value and records it on the engine's message
/// sink; `terminate="yes"` aborts the run by surfacing a fatal error.
pub(crate) fn message<'e, 'a>(ctx: &Ctx<'e, 'a>, node: NodeId, context: NodeRef<'a>, pos: usize, size: usize, scope: &Rc<Scope<'a>>) -> XsltResult<()> {
    let transform = &ctx.engine.transform;
    let text = text_content_of_body(ctx, node, context, pos, size, scope)?;
    log::info!("xsl:message: {}", text);
    ctx.engine.message_sink.borrow_mut().push(text.clone());
    if transform.attribute_value(node, "terminate", None) == Some("yes") {
        return Err(XsltError::malformed(format!("terminated by xsl:message: {}", text)));
    }
    Ok(())
}
