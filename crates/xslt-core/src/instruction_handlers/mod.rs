//! Component F: the per-instruction bodies `driver::exec_node` dispatches to once it has
//! decided a transform-tree element is in the XSLT namespace. Split by concern the same
//! way the driver's design groups them: control flow (`flow`), tree construction
//! (`construct`), and variable binding (`vars`).

mod construct;
mod flow;
mod vars;

use crate::context::Scope;
use crate::dom::{Dom, NodeId, NodeRef};
use crate::driver::Ctx;
use crate::error::{XsltError, XsltResult};
use std::rc::Rc;

/// Routes one XSLT-namespace element to its handler. Declaration-only elements that were
/// already consumed by `driver::collect_declarations` (or are themselves non-executable,
/// like `xsl:param` bound ahead of time by `bind_formal_params`) are silent no-ops here.
/// Anything this match doesn't recognize is a fatal error per the 1.0 forwards-compatible
/// processing model this engine does not implement.
pub(crate) fn dispatch<'e, 'a>(
    ctx: &Ctx<'e, 'a>,
    output: &mut Dom,
    out_parent: NodeId,
    node: NodeId,
    local_name: &str,
    context: NodeRef<'a>,
    pos: usize,
    size: usize,
    scope: &Rc<Scope<'a>>,
) -> XsltResult<()> {
    match local_name {
        "apply-templates" => flow::apply_templates(ctx, output, out_parent, node, context, pos, size, scope),
        "call-template" => flow::call_template(ctx, output, out_parent, node, context, pos, size, scope),
        "for-each" => flow::for_each(ctx, output, out_parent, node, context, pos, size, scope),
        "if" => flow::xsl_if(ctx, output, out_parent, node, context, pos, size, scope),
        "choose" => flow::choose(ctx, output, out_parent, node, context, pos, size, scope),

        "copy" => construct::copy(ctx, output, out_parent, node, context, pos, size, scope),
        "copy-of" => construct::copy_of(ctx, output, out_parent, node, context, pos, size, scope),
        "element" => construct::element(ctx, output, out_parent, node, context, pos, size, scope),
        "attribute" => construct::attribute(ctx, output, out_parent, node, context, pos, size, scope),
        "text" => construct::text(ctx, output, out_parent, node),
        "value-of" => construct::value_of(ctx, output, out_parent, node, context, pos, size, scope),
        "comment" => construct::comment(ctx, output, out_parent, node, context, pos, size, scope),
        "processing-instruction" => construct::processing_instruction(ctx, output, out_parent, node, context, pos, size, scope),
        "message" => construct::message(ctx, node, context, pos, size, scope),

        "variable" => vars::variable(ctx, node, context, pos, size, scope),

        "param" | "with-param" | "sort" | "output" | "strip-space" | "preserve-space" | "decimal-format" | "key" | "namespace-alias" | "function" | "include" | "import"
        | "template" | "stylesheet" | "transform" => Ok(()),

        other => Err(XsltError::not_implemented(format!("xsl:{}", other))),
    }
}
