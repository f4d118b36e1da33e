//! Control-flow instructions: `apply-templates`, `call-template`, `for-each`, `if`,
//! `choose`.

use crate::context::Scope;
use crate::dom::{Dom, NodeId, NodeRef};
use crate::driver::{self, Ctx};
use crate::error::{XsltError, XsltResult};
use std::rc::Rc;
use xslt_xpath::{DataSourceNode, XPathValue};

pub(crate) fn apply_templates<'e, 'a>(
    ctx: &Ctx<'e, 'a>,
    output: &mut Dom,
    out_parent: NodeId,
    node: NodeId,
    context: NodeRef<'a>,
    pos: usize,
    size: usize,
    scope: &Rc<Scope<'a>>,
) -> XsltResult<()> {
    let transform = &ctx.engine.transform;
    let mut candidates = match transform.attribute_value(node, "select", None) {
        Some(select) => match driver::eval_select(ctx, select, context, pos, size, scope)? {
            XPathValue::NodeSet(nodes) => nodes,
            _ => vec![],
        },
        None => context.children().collect(),
    };
    driver::sort_nodes(ctx, node, &mut candidates, scope)?;
    let mode = transform.attribute_value(node, "mode", None).map(|s| s.to_string());
    let params = driver::collect_with_params(ctx, node, context, pos, size, scope)?;
    driver::apply_templates(ctx, output, out_parent, &candidates, &mode, &params)
}

pub(crate) fn call_template<'e, 'a>(
    ctx: &Ctx<'e, 'a>,
    output: &mut Dom,
    out_parent: NodeId,
    node: NodeId,
    context: NodeRef<'a>,
    pos: usize,
    size: usize,
    scope: &Rc<Scope<'a>>,
) -> XsltResult<()> {
    let name = ctx.engine.transform.attribute_value(node, "name", None).unwrap_or_default();
    let decl = ctx
        .engine
        .templates_by_name
        .get(name)
        .cloned()
        .ok_or_else(|| XsltError::invariant(format!("call-template references unknown template '{}'", name)))?;
    let params = driver::collect_with_params(ctx, node, context, pos, size, scope)?;
    driver::fire_template(ctx, output, out_parent, &decl, context, pos, size, &params)
}

pub(crate) fn for_each<'e, 'a>(
    ctx: &Ctx<'e, 'a>,
    output: &mut Dom,
    out_parent: NodeId,
    node: NodeId,
    context: NodeRef<'a>,
    pos: usize,
    size: usize,
    scope: &Rc<Scope<'a>>,
) -> XsltResult<()> {
    let select = ctx.engine.transform.attribute_value(node, "select", None).unwrap_or(".");
    let mut items = match driver::eval_select(ctx, select, context, pos, size, scope)? {
        XPathValue::NodeSet(nodes) => nodes,
        _ => vec![],
    };
    driver::sort_nodes(ctx, node, &mut items, scope)?;
    let new_size = items.len();
    for (i, &item) in items.iter().enumerate() {
        let _guard = ctx.resolver.with_current(item);
        let iter_scope = Scope::child(scope);
        driver::process_children(ctx, output, out_parent, node, item, i + 1, new_size, &iter_scope)?;
    }
    Ok(())
}

pub(crate) fn xsl_if<'e, 'a>(
    ctx: &Ctx<'e, 'a>,
    output: &mut Dom,
    out_parent: NodeId,
    node: NodeId,
    context: NodeRef<'a>,
    pos: usize,
    size: usize,
    scope: &Rc<Scope<'a>>,
) -> XsltResult<()> {
    let test = ctx.engine.transform.attribute_value(node, "test", None).unwrap_or("false");
    if driver::eval_test(ctx, test, context, pos, size, scope)? {
        let body_scope = Scope::child(scope);
        driver::process_children(ctx, output, out_parent, node, context, pos, size, &body_scope)?;
    }
    Ok(())
}

pub(crate) fn choose<'e, 'a>(
    ctx: &Ctx<'e, 'a>,
    output: &mut Dom,
    out_parent: NodeId,
    node: NodeId,
    context: NodeRef<'a>,
    pos: usize,
    size: usize,
    scope: &Rc<Scope<'a>>,
) -> XsltResult<()> {
    let transform = &ctx.engine.transform;
    for &child in transform.children(node) {
        if !transform.is_element(child) {
            continue;
        }
        let name = transform.name(child).unwrap();
        if !name.is_xslt() {
            continue;
        }
        match name.local.as_str() {
            "when" => {
                let test = transform.attribute_value(child, "test", None).unwrap_or("false");
                if driver::eval_test(ctx, test, context, pos, size, scope)? {
                    let body_scope = Scope::child(scope);
                    driver::process_children(ctx, output, out_parent, child, context, pos, size, &body_scope)?;
                    return Ok(());
                }
            }
            "otherwise" => {
                let body_scope = Scope::child(scope);
                driver::process_children(ctx, output, out_parent, child, context, pos, size, &body_scope)?;
                return Ok(());
            }
            _ => {}
        }
    }
    Ok(())
}
