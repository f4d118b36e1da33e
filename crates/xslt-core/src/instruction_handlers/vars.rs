//! `xsl:variable`: binds into the *current* scope (not a child) so later sibling
//! instructions processed by the same `process_children` call see the binding, while the
//! enclosing block's own scope boundary still destroys it once that block ends.

use crate::context::Scope;
use crate::dom::NodeId;
use crate::dom::NodeRef;
use crate::driver::{self, Ctx};
use crate::error::XsltResult;
use std::rc::Rc;

pub(crate) fn variable<'e, 'a>(ctx: &Ctx<'e, 'a>, node: NodeId, context: NodeRef<'a>, pos: usize, size: usize, scope: &Rc<Scope<'a>>) -> XsltResult<()> {
    let name = ctx.engine.transform.attribute_value(node, "name", None).unwrap_or_default().to_string();
    let value = driver::compute_bound_value(ctx, node, context, pos, size, scope)?;
    scope.set(name, value);
    Ok(())
}
