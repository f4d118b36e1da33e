//! The Transform Driver (component E): seeds the run with the input and transform
//! documents, resolves `xsl:include`/`xsl:import` before anything else runs, builds the
//! template/key/decimal-format caches, then dispatches the root template (or falls
//! through to the stylesheet's own children) and serializes whatever grew in the output
//! `Dom`. Everything below this point re-enters `exec_node`/`process_children`, which
//! hand XSLT-namespace elements to `instruction_handlers` and copy everything else
//! through as a literal result element.

use crate::context::{EngineState, Scope, TemplateDecl};
use crate::dom::{Dom, NodeId, NodeRef, QName};
use crate::error::{XsltError, XsltResult};
use crate::fetch::{CachingFetcher, Fetcher};
use crate::params::{ParamMap, ParamValue};
use crate::resolvers::XsltResolver;
use crate::{avt, instruction_handlers, serialize, xml};
use bumpalo::Bump;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use xslt_xpath::{EvaluationContext, Expression, FunctionRegistry, NodeType, XPathValue};

/// A host-registered extension function (component B.3 chain step 2): takes the
/// already-stringified XPath arguments and returns the string result the resolver
/// wraps as `XPathValue::String`.
pub type CustomFunction = Rc<dyn Fn(&[String]) -> String>;

/// Ambient configuration for one `transform` call (component §2's `TransformOptions`).
#[derive(Clone)]
pub struct Options {
    /// Rejects references to undeclared variables instead of treating them as empty.
    pub strict: bool,
    /// Emits the rendered output unchanged even when it looks malformed; reserved for
    /// callers that want to inspect a failed run's partial markup rather than an error.
    pub debug: bool,
    /// The transform document's own URL, the base `xsl:include`/`xsl:import` hrefs at
    /// the top level resolve against (component §3/§4.D `transformURL`).
    pub transform_url: Option<String>,
    /// The input document's own URL (component §4.D `inputURL`); not consulted by the
    /// driver itself today, but threaded through so a `Fetcher` that resolves
    /// `document()` calls relative to the input can see it.
    pub input_url: Option<String>,
    /// Host-supplied extension functions, keyed by `(namespaceURI, localName)`
    /// (component §4.D `customFunctions`, chain step 2).
    pub custom_functions: HashMap<(String, String), CustomFunction>,
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("strict", &self.strict)
            .field("debug", &self.debug)
            .field("transform_url", &self.transform_url)
            .field("input_url", &self.input_url)
            .field("custom_functions", &self.custom_functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for Options {
    fn default() -> Self {
        Options {
            strict: false,
            debug: false,
            transform_url: None,
            input_url: None,
            custom_functions: HashMap::new(),
        }
    }
}

/// Everything `exec_node` and the instruction handlers need for the lifetime of one run:
/// the compiled template/key/decimal-format state, the XPath machinery, and the global
/// variable scope every template/call-template firing is rooted at.
pub(crate) struct Ctx<'e, 'a> {
    pub engine: &'e EngineState,
    pub registry: &'e FunctionRegistry,
    pub key_indexes: &'e HashMap<String, HashMap<String, Vec<NodeRef<'a>>>>,
    pub resolver: &'e XsltResolver<'a>,
    pub global_scope: Rc<Scope<'a>>,
    pub input_root: NodeRef<'a>,
}

/// Runs one XSLT transform end to end and returns the serialized output.
pub fn transform(input_xml: &str, transform_xml: &str, params: &ParamMap, options: &Options, fetcher: &dyn Fetcher) -> XsltResult<String> {
    let arena = Bump::new();
    let caching_fetcher = CachingFetcher::new(fetcher);

    let (mut transform_dom, transform_root) = xml::parse_document(transform_xml)?;
    process_includes(&mut transform_dom, transform_root, &caching_fetcher, options.transform_url.as_deref())?;

    let mut engine = EngineState::new(transform_dom, options.strict);
    collect_declarations(&mut engine)?;

    let (input_dom, input_root_id) = xml::parse_document(input_xml)?;
    let input_dom_ref: &Dom = arena.alloc(input_dom);
    let input_root = NodeRef {
        dom: input_dom_ref,
        id: input_root_id,
    };

    let registry = FunctionRegistry::default();
    let global_scope = Scope::root();
    let empty_key_indexes: HashMap<String, HashMap<String, Vec<NodeRef>>> = HashMap::new();
    let mut resolver = XsltResolver::new(
        &engine,
        &arena,
        &caching_fetcher,
        input_root,
        &registry,
        &empty_key_indexes,
        Rc::clone(&global_scope),
        &options.custom_functions,
    );
    resolver.user_functions = engine.user_functions.keys().cloned().collect();

    let key_indexes = build_key_indexes(&engine, input_root, &registry, &resolver)?;
    resolver.key_indexes = &key_indexes;

    let ctx = Ctx {
        engine: &engine,
        registry: &registry,
        key_indexes: &key_indexes,
        resolver: &resolver,
        global_scope,
        input_root,
    };

    bind_global_variables(&ctx, params)?;

    let mut output = Dom::new();
    let output_root = output.root();

    let stylesheet = engine
        .transform
        .children(transform_root)
        .iter()
        .find(|&&c| engine.transform.is_element(c))
        .copied()
        .ok_or_else(|| XsltError::malformed("transform document has no root element"))?;

    match find_matching_template(&ctx, &None, input_root)? {
        Some(decl) => fire_template(&ctx, &mut output, output_root, &decl, input_root, 1, 1, &HashMap::new())?,
        None => process_children_ignore_text(&ctx, &mut output, output_root, stylesheet, input_root, 1, 1, &ctx.global_scope)?,
    }

    serialize::serialize(&output, &engine, options)
}

fn process_children_ignore_text<'e, 'a>(
    ctx: &Ctx<'e, 'a>,
    output: &mut Dom,
    out_parent: NodeId,
    parent: NodeId,
    context: NodeRef<'a>,
    pos: usize,
    size: usize,
    scope: &Rc<Scope<'a>>,
) -> XsltResult<()> {
    for &child in ctx.engine.transform.children(parent) {
        if ctx.engine.transform.node_type(child) == NodeType::Text {
            continue;
        }
        exec_node(ctx, output, out_parent, child, context, pos, size, scope)?;
    }
    Ok(())
}

fn bind_global_variables<'e, 'a>(ctx: &Ctx<'e, 'a>, params: &ParamMap) -> XsltResult<()> {
    let transform = &ctx.engine.transform;
    let Some(stylesheet) = transform.children(transform.root()).iter().find(|&&c| transform.is_element(c)).copied() else {
        return Ok(());
    };
    for &child in transform.children(stylesheet) {
        if !transform.is_element(child) {
            continue;
        }
        let name = transform.name(child).unwrap();
        if !name.is_xslt() {
            continue;
        }
        let vname = transform.attribute_value(child, "name", None).unwrap_or_default().to_string();
        match name.local.as_str() {
            "variable" => {
                let value = compute_bound_value(ctx, child, ctx.input_root, 1, 1, &ctx.global_scope)?;
                ctx.global_scope.set(vname, value);
            }
            "param" => {
                let value = match params.get(&vname) {
                    Some(p) => param_value_to_xpath(p),
                    None => compute_bound_value(ctx, child, ctx.input_root, 1, 1, &ctx.global_scope)?,
                };
                ctx.global_scope.set(vname, value);
            }
            _ => {}
        }
    }
    Ok(())
}

fn param_value_to_xpath<'a>(p: &ParamValue) -> XPathValue<NodeRef<'a>> {
    match p {
        ParamValue::String(s) => XPathValue::String(s.clone()),
        ParamValue::Number(n) => XPathValue::Number(*n),
        ParamValue::Boolean(b) => XPathValue::Boolean(*b),
    }
}

/// Walks the stylesheet's top-level children once, populating every cache on
/// `EngineState` that the rest of the run only ever reads.
fn collect_declarations(engine: &mut EngineState) -> XsltResult<()> {
    let root = engine.transform.root();
    let Some(stylesheet) = engine.transform.children(root).iter().find(|&&c| engine.transform.is_element(c)).copied() else {
        return Err(XsltError::malformed("transform document has no root element"));
    };
    engine.stylesheet_element = Some(stylesheet);
    let children: Vec<NodeId> = engine.transform.children(stylesheet).to_vec();
    for child in children {
        if !engine.transform.is_element(child) {
            continue;
        }
        let name = engine.transform.name(child).unwrap().clone();
        if !name.is_xslt() {
            continue;
        }
        match name.local.as_str() {
            "template" => {
                let match_pattern = engine.transform.attribute_value(child, "match", None).map(|s| s.to_string());
                let decl_name = engine.transform.attribute_value(child, "name", None).map(|s| s.to_string());
                let mode = engine.transform.attribute_value(child, "mode", None).map(|s| s.to_string());
                let decl = TemplateDecl {
                    node: child,
                    match_pattern: match_pattern.clone(),
                    name: decl_name.clone(),
                    mode: mode.clone(),
                    priority: 0.0,
                    import_precedence: 0,
                };
                if let Some(n) = &decl_name {
                    engine.templates_by_name.insert(n.clone(), decl.clone());
                }
                if match_pattern.is_some() {
                    engine.templates_by_mode.entry(mode).or_default().push(decl);
                }
            }
            "key" => {
                let key_name = engine.transform.attribute_value(child, "name", None).unwrap_or_default().to_string();
                let match_pattern = engine.transform.attribute_value(child, "match", None).unwrap_or_default().to_string();
                let use_expr = engine.transform.attribute_value(child, "use", None).unwrap_or_default().to_string();
                engine.key_definitions.entry(key_name).or_default().push((match_pattern, use_expr));
            }
            "decimal-format" => {
                let format_name = engine.transform.attribute_value(child, "name", None).map(|s| s.to_string());
                let fmt = parse_decimal_format(&engine.transform, child);
                engine.decimal_formats.insert(crate::context::DecimalFormatKey(format_name), fmt);
            }
            "namespace-alias" => {
                let stylesheet_prefix = engine.transform.attribute_value(child, "stylesheet-prefix", None).unwrap_or_default();
                let result_prefix = engine.transform.attribute_value(child, "result-prefix", None).unwrap_or_default();
                engine.namespace_aliases.insert(stylesheet_prefix.to_string(), result_prefix.to_string());
            }
            "strip-space" => {
                if let Some(v) = engine.transform.attribute_value(child, "elements", None) {
                    for tok in v.split_whitespace() {
                        engine.strip_space_patterns.push(whitespace_token(tok));
                    }
                }
            }
            "preserve-space" => {
                if let Some(v) = engine.transform.attribute_value(child, "elements", None) {
                    for tok in v.split_whitespace() {
                        engine.preserve_space_patterns.push(whitespace_token(tok));
                    }
                }
            }
            "output" => {
                if engine.transform.attribute_value(child, "omit-xml-declaration", None) == Some("yes") {
                    engine.output_omit_xml_declaration = true;
                }
            }
            "function" => {
                if let Some(n) = engine.transform.attribute_value(child, "name", None) {
                    engine.user_functions.insert(n.to_string(), child);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_decimal_format(transform: &Dom, node: NodeId) -> crate::context::DecimalFormat {
    let mut fmt = crate::context::DecimalFormat::default();
    let set = |attr: &str, slot: &mut char| {
        if let Some(v) = transform.attribute_value(node, attr, None) {
            if let Some(c) = v.chars().next() {
                *slot = c;
            }
        }
    };
    set("decimal-separator", &mut fmt.decimal_separator);
    set("grouping-separator", &mut fmt.grouping_separator);
    set("minus-sign", &mut fmt.minus_sign);
    set("percent", &mut fmt.percent);
    set("per-mille", &mut fmt.per_mille);
    set("zero-digit", &mut fmt.zero_digit);
    set("digit", &mut fmt.digit);
    set("pattern-separator", &mut fmt.pattern_separator);
    if let Some(v) = transform.attribute_value(node, "infinity", None) {
        fmt.infinity = v.to_string();
    }
    if let Some(v) = transform.attribute_value(node, "NaN", None) {
        fmt.nan = v.to_string();
    }
    fmt
}

fn whitespace_token(tok: &str) -> QName {
    if tok == "*" {
        QName::local("*")
    } else {
        match tok.rsplit_once(':') {
            Some((_, local)) => QName::local(local),
            None => QName::local(tok),
        }
    }
}

/// Component E.3: destructively splices `xsl:include`/`xsl:import` children into the
/// transform tree before the first template ever fires. `href` is cleared before the
/// fetch so a stylesheet that includes itself (directly or through a cycle) degrades to
/// an empty substitution on the second pass instead of looping forever. `base_url` is
/// the URL of the document `dom` was parsed from (the `transformURL` of component
/// §4.D's clone contract) -- every `href` under `stylesheet` resolves relative to it,
/// not to some single process-wide base.
fn process_includes(dom: &mut Dom, root: NodeId, fetcher: &CachingFetcher, base_url: Option<&str>) -> XsltResult<()> {
    let Some(stylesheet) = dom.children(root).iter().find(|&&c| dom.is_element(c)).copied() else {
        return Ok(());
    };
    loop {
        let next = dom
            .children(stylesheet)
            .iter()
            .find(|&&c| dom.is_element(c) && dom.name(c).map(|n| n.is_xslt() && (n.local == "include" || n.local == "import")).unwrap_or(false))
            .copied();
        let Some(child) = next else { break };
        let is_import = dom.name(child).unwrap().local == "import";
        let href = dom.attribute_value(child, "href", None).map(|s| s.to_string());
        dom.remove_attribute(child, "href");
        if let Some(href) = href {
            if let Err(e) = splice_included_document(dom, stylesheet, child, &href, is_import, fetcher, base_url) {
                log::debug!("xsl:{} href '{}' degraded: {}", if is_import { "import" } else { "include" }, href, e);
            }
        }
        dom.remove_child(stylesheet, child);
    }
    Ok(())
}

/// Fetches `href` relative to `base_url`, then resolves the fetched document's own
/// `xsl:include`/`xsl:import` children relative to ITS url (the just-resolved one)
/// before splicing its declarations in, so a chain of includes in different
/// directories each resolves against its own referencing document rather than the
/// top-level stylesheet.
fn splice_included_document(
    dom: &mut Dom,
    stylesheet: NodeId,
    before: NodeId,
    href: &str,
    is_import: bool,
    fetcher: &CachingFetcher,
    base_url: Option<&str>,
) -> XsltResult<()> {
    let (resolved_url, text) = fetcher.fetch_relative(base_url, href)?;
    let (mut included_dom, included_root) = xml::parse_document(&text)?;
    process_includes(&mut included_dom, included_root, fetcher, Some(&resolved_url))?;
    let Some(included_stylesheet) = included_dom.children(included_root).iter().find(|&&c| included_dom.is_element(c)).copied() else {
        return Ok(());
    };
    let grandchildren = included_dom.children(included_stylesheet).to_vec();
    if is_import {
        // Not true import-precedence: imported declarations are appended after the
        // parent's own children rather than ranked below them for conflict resolution.
        for gc in grandchildren {
            dom.deep_copy(&included_dom, gc, stylesheet);
        }
    } else {
        for gc in grandchildren {
            let copied = dom.deep_copy(&included_dom, gc, stylesheet);
            dom.remove_child(stylesheet, copied);
            dom.insert_before(stylesheet, copied, before);
        }
    }
    Ok(())
}

fn build_key_indexes<'a>(
    engine: &EngineState,
    input_root: NodeRef<'a>,
    registry: &FunctionRegistry,
    resolver: &XsltResolver<'a>,
) -> XsltResult<HashMap<String, HashMap<String, Vec<NodeRef<'a>>>>> {
    let mut out: HashMap<String, HashMap<String, Vec<NodeRef<'a>>>> = HashMap::new();
    let empty_vars: HashMap<String, XPathValue<NodeRef<'a>>> = HashMap::new();
    let empty_keys: HashMap<String, HashMap<String, Vec<NodeRef<'a>>>> = HashMap::new();
    for (key_name, defs) in &engine.key_definitions {
        let mut by_value: HashMap<String, Vec<NodeRef<'a>>> = HashMap::new();
        for (match_pattern, use_expr) in defs {
            let path = as_absolute_path(match_pattern);
            let path_expr = xslt_xpath::parse_expression(&path)?;
            let root_ctx = EvaluationContext::new(input_root, input_root, registry, 1, 1, &empty_vars, &empty_keys, engine.strict, Some(resolver));
            let candidates = match xslt_xpath::evaluate(&path_expr, &root_ctx)? {
                XPathValue::NodeSet(nodes) => nodes,
                _ => vec![],
            };
            let use_ast = xslt_xpath::parse_expression(use_expr)?;
            for node in candidates {
                let e_ctx = EvaluationContext::new(node, input_root, registry, 1, 1, &empty_vars, &empty_keys, engine.strict, Some(resolver));
                let value = xslt_xpath::evaluate(&use_ast, &e_ctx)?;
                by_value.entry(value.to_string()).or_default().push(node);
            }
        }
        out.insert(key_name.clone(), by_value);
    }
    Ok(out)
}

fn as_absolute_path(pattern: &str) -> String {
    let trimmed = pattern.trim();
    if trimmed.starts_with('/') || trimmed.starts_with("id(") || trimmed.starts_with("key(") {
        trimmed.to_string()
    } else {
        format!("//{}", trimmed)
    }
}

/// Splits a union pattern (`a|b|c`) on top-level `|`, ignoring ones nested inside
/// brackets, parens, or string literals.
fn split_union_pattern(pattern: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in pattern.char_indices() {
        match c {
            '\'' | '"' => match in_quote {
                Some(q) if q == c => in_quote = None,
                Some(_) => {}
                None => in_quote = Some(c),
            },
            '[' | '(' if in_quote.is_none() => depth += 1,
            ']' | ')' if in_quote.is_none() => depth -= 1,
            '|' if depth == 0 && in_quote.is_none() => {
                parts.push(&pattern[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&pattern[start..]);
    parts
}

/// Tests a `match` pattern against `node` by evaluating `//{pattern}` from the node's own
/// document root and checking set membership. Position predicates (`item[2]`) still work
/// under this technique because each location step's predicate is scoped to that step's
/// own per-parent sibling collection, independent of the leading `//`.
pub(crate) fn pattern_matches<'e, 'a>(ctx: &Ctx<'e, 'a>, pattern: &str, node: NodeRef<'a>) -> XsltResult<bool> {
    let root = NodeRef { dom: node.dom, id: node.dom.root() };
    for alt in split_union_pattern(pattern) {
        let selected = select_all_matching(ctx, root, alt.trim())?;
        if selected.contains(&node) {
            return Ok(true);
        }
    }
    Ok(false)
}

pub(crate) fn select_all_matching<'e, 'a>(ctx: &Ctx<'e, 'a>, root: NodeRef<'a>, pattern: &str) -> XsltResult<Vec<NodeRef<'a>>> {
    let path = as_absolute_path(pattern);
    let expr = xslt_xpath::parse_expression(&path)?;
    let vars = ctx.global_scope.flatten();
    let e_ctx = EvaluationContext::new(root, root, ctx.registry, 1, 1, &vars, ctx.key_indexes, ctx.engine.strict, Some(ctx.resolver));
    match xslt_xpath::evaluate(&expr, &e_ctx)? {
        XPathValue::NodeSet(nodes) => Ok(nodes),
        _ => Ok(vec![]),
    }
}

/// Evaluates `expr` in `context`, pinning `current()` to `context` for the duration (it
/// only diverges from the XPath context node inside a nested predicate, which this
/// driver never re-enters separately -- `xslt-xpath` evaluates predicates internally).
pub(crate) fn eval_expr<'e, 'a>(ctx: &Ctx<'e, 'a>, expr: &Expression, context: NodeRef<'a>, pos: usize, size: usize, scope: &Rc<Scope<'a>>) -> XsltResult<XPathValue<NodeRef<'a>>> {
    let _guard = ctx.resolver.with_current(context);
    let vars = scope.flatten();
    let root = NodeRef { dom: context.dom, id: context.dom.root() };
    let e_ctx = EvaluationContext::new(context, root, ctx.registry, pos, size, &vars, ctx.key_indexes, ctx.engine.strict, Some(ctx.resolver));
    Ok(xslt_xpath::evaluate(expr, &e_ctx)?)
}

pub(crate) fn eval_select<'e, 'a>(ctx: &Ctx<'e, 'a>, select: &str, context: NodeRef<'a>, pos: usize, size: usize, scope: &Rc<Scope<'a>>) -> XsltResult<XPathValue<NodeRef<'a>>> {
    let expr = xslt_xpath::parse_expression(select)?;
    eval_expr(ctx, &expr, context, pos, size, scope)
}

pub(crate) fn eval_test<'e, 'a>(ctx: &Ctx<'e, 'a>, test: &str, context: NodeRef<'a>, pos: usize, size: usize, scope: &Rc<Scope<'a>>) -> XsltResult<bool> {
    Ok(eval_select(ctx, test, context, pos, size, scope)?.to_bool())
}

/// Component E.2: iteratively rewrites outermost `{...}` in `text`, evaluating each as
/// an XPath expression in `context`. A failed expression degrades to the `[[[...]]]`
/// sentinel `avt::parse_avt` already wrapped it in; any sentinel still present once every
/// part has been resolved is restored to the literal `{...}` braces it replaced.
pub(crate) fn resolve_avt<'e, 'a>(ctx: &Ctx<'e, 'a>, text: &str, context: NodeRef<'a>, pos: usize, size: usize, scope: &Rc<Scope<'a>>) -> XsltResult<String> {
    let resolved = match avt::parse_avt(text) {
        avt::AttributeValueTemplate::Static(s) => s,
        avt::AttributeValueTemplate::Dynamic(parts) => {
            let mut out = String::new();
            for part in parts {
                match part {
                    avt::AvtPart::Static(s) => out.push_str(&s),
                    avt::AvtPart::Dynamic(expr) => match eval_expr(ctx, &expr, context, pos, size, scope) {
                        Ok(value) => out.push_str(&value.to_string()),
                        Err(e) => log::warn!("attribute value template expression failed: {}", e),
                    },
                }
            }
            out
        }
    };
    Ok(restore_avt_sentinels(&resolved))
}

fn restore_avt_sentinels(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("[[[") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 3..];
        match after.find("]]]") {
            Some(end) => {
                out.push('{');
                out.push_str(&after[..end]);
                out.push('}');
                rest = &after[end + 3..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

fn is_whitespace_only(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_whitespace())
}

fn normalize_whitespace(s: &str) -> String {
    s.split_ascii_whitespace().collect::<Vec<_>>().join(" ")
}

enum WhitespacePolicy {
    Strip,
    Preserve,
    Normalize,
}

/// Component E.4: strip/preserve/normalize resolve to the same trim-and-collapse
/// transform here; what differs is which policy a given element falls under (`strip`
/// always applies to attribute values, which have no element context at all).
pub(crate) fn process_whitespace_value(ctx: &Ctx, value: &str, context_element: Option<NodeRef>) -> String {
    let policy = match context_element {
        None => WhitespacePolicy::Strip,
        Some(elem) => element_whitespace_policy(ctx.engine, elem),
    };
    match policy {
        WhitespacePolicy::Strip | WhitespacePolicy::Normalize => normalize_whitespace(value),
        WhitespacePolicy::Preserve => value.to_string(),
    }
}

fn element_whitespace_policy(engine: &EngineState, elem: NodeRef) -> WhitespacePolicy {
    let Some(name) = elem.dom.name(elem.id) else {
        return WhitespacePolicy::Normalize;
    };
    for pat in &engine.strip_space_patterns {
        if pat.local == "*" || pat.local == name.local {
            return WhitespacePolicy::Strip;
        }
    }
    for pat in &engine.preserve_space_patterns {
        if pat.local == "*" || pat.local == name.local {
            return WhitespacePolicy::Preserve;
        }
    }
    WhitespacePolicy::Normalize
}

pub(crate) fn nearest_element<'a>(node: NodeRef<'a>) -> Option<NodeRef<'a>> {
    let mut cur = Some(node);
    while let Some(n) = cur {
        if n.dom.is_element(n.id) {
            return Some(n);
        }
        cur = n.dom.parent(n.id).map(|id| NodeRef { dom: n.dom, id });
    }
    None
}

/// Component E.4's `passText`: a whitespace-only literal text node in the transform tree
/// is only emitted when its nearest ancestor element carries `xml:space="preserve"` or it
/// is itself a child of `xsl:text`. Everything else is silently dropped.
fn pass_text(transform: &Dom, text_node: NodeId) -> bool {
    let content = transform.string_value(text_node);
    if !is_whitespace_only(&content) {
        return true;
    }
    let Some(parent) = transform.parent(text_node) else {
        return false;
    };
    if transform.name(parent).map(|n| n.is_xslt() && n.local == "text").unwrap_or(false) {
        return true;
    }
    let mut cur = Some(parent);
    while let Some(id) = cur {
        if transform.is_element(id) && transform.attribute_value(id, "space", Some("http://www.w3.org/XML/1998/namespace")) == Some("preserve") {
            return true;
        }
        cur = transform.parent(id);
    }
    false
}

enum SortKey {
    Text(String, bool),
    Number(f64, bool),
}

fn compare_keys(a: &[SortKey], b: &[SortKey]) -> std::cmp::Ordering {
    for (ka, kb) in a.iter().zip(b.iter()) {
        let ord = match (ka, kb) {
            (SortKey::Text(sa, desc), SortKey::Text(sb, _)) => {
                let o = sa.cmp(sb);
                if *desc { o.reverse() } else { o }
            }
            (SortKey::Number(na, desc), SortKey::Number(nb, _)) => {
                let o = na.partial_cmp(nb).unwrap_or(std::cmp::Ordering::Equal);
                if *desc { o.reverse() } else { o }
            }
            _ => std::cmp::Ordering::Equal,
        };
        if ord != std::cmp::Ordering::Equal {
            return ord;
        }
    }
    std::cmp::Ordering::Equal
}

/// Component E.5: reads `owner`'s `xsl:sort` children, evaluates each key per node in
/// its own singleton context, and stable-sorts by appending the original index as a
/// final ascending tiebreaker.
pub(crate) fn sort_nodes<'e, 'a>(ctx: &Ctx<'e, 'a>, owner: NodeId, nodes: &mut Vec<NodeRef<'a>>, scope: &Rc<Scope<'a>>) -> XsltResult<()> {
    let transform = &ctx.engine.transform;
    let sort_children: Vec<NodeId> = transform
        .children(owner)
        .iter()
        .copied()
        .filter(|&c| transform.is_element(c) && transform.name(c).map(|n| n.is_xslt() && n.local == "sort").unwrap_or(false))
        .collect();
    if sort_children.is_empty() {
        return Ok(());
    }
    let size = nodes.len();
    let mut keyed: Vec<(Vec<SortKey>, NodeRef<'a>)> = Vec::with_capacity(nodes.len());
    for (i, &node) in nodes.iter().enumerate() {
        let mut keys = Vec::with_capacity(sort_children.len() + 1);
        for &sort_node in &sort_children {
            let select = transform.attribute_value(sort_node, "select", None).unwrap_or(".");
            let data_type = transform.attribute_value(sort_node, "data-type", None).unwrap_or("text");
            let descending = transform.attribute_value(sort_node, "order", None) == Some("descending");
            let value = eval_select(ctx, select, node, i + 1, size, scope)?;
            keys.push(if data_type == "number" {
                SortKey::Number(value.to_number(), descending)
            } else {
                SortKey::Text(value.to_string(), descending)
            });
        }
        keys.push(SortKey::Number(i as f64, false));
        keyed.push((keys, node));
    }
    keyed.sort_by(|a, b| compare_keys(&a.0, &b.0));
    *nodes = keyed.into_iter().map(|(_, n)| n).collect();
    Ok(())
}

pub(crate) fn collect_with_params<'e, 'a>(
    ctx: &Ctx<'e, 'a>,
    owner: NodeId,
    context: NodeRef<'a>,
    pos: usize,
    size: usize,
    scope: &Rc<Scope<'a>>,
) -> XsltResult<HashMap<String, XPathValue<NodeRef<'a>>>> {
    let transform = &ctx.engine.transform;
    let mut out = HashMap::new();
    for &child in transform.children(owner) {
        if !transform.is_element(child) {
            continue;
        }
        let name = transform.name(child).unwrap();
        if name.is_xslt() && name.local == "with-param" {
            let pname = transform.attribute_value(child, "name", None).unwrap_or_default().to_string();
            let value = compute_bound_value(ctx, child, context, pos, size, scope)?;
            out.insert(pname, value);
        }
    }
    Ok(out)
}

fn bind_formal_params<'e, 'a>(ctx: &Ctx<'e, 'a>, owner: NodeId, context: NodeRef<'a>, pos: usize, size: usize, scope: &Rc<Scope<'a>>) -> XsltResult<()> {
    let transform = &ctx.engine.transform;
    for &child in transform.children(owner) {
        if !transform.is_element(child) {
            continue;
        }
        let name = transform.name(child).unwrap();
        if name.is_xslt() && name.local == "param" {
            let pname = transform.attribute_value(child, "name", None).unwrap_or_default().to_string();
            if scope.has_local(&pname) {
                continue;
            }
            let value = compute_bound_value(ctx, child, context, pos, size, scope)?;
            scope.set(pname, value);
        }
    }
    Ok(())
}

/// Component E.6: computes the value an `xsl:variable`/`xsl:param`/`xsl:with-param`
/// binds. An element child makes `node` a result-tree fragment; otherwise `select` wins;
/// otherwise pure text content is coerced the way `context::coerce_literal` describes;
/// otherwise the binding falls back to whatever the same name already resolves to in an
/// enclosing scope, and finally to the empty string.
pub(crate) fn compute_bound_value<'e, 'a>(ctx: &Ctx<'e, 'a>, node: NodeId, context: NodeRef<'a>, pos: usize, size: usize, scope: &Rc<Scope<'a>>) -> XsltResult<XPathValue<NodeRef<'a>>> {
    let transform = &ctx.engine.transform;
    let children = transform.children(node);
    let has_element_child = children.iter().any(|&c| transform.is_element(c));
    if has_element_child {
        let mut frag = Dom::new();
        let frag_root = frag.root();
        let body_scope = Scope::child(scope);
        process_children(ctx, &mut frag, frag_root, node, context, pos, size, &body_scope)?;
        let frag_ref: &'a Dom = ctx.resolver.arena.alloc(frag);
        return Ok(crate::context::fragment_value(frag_ref));
    }
    if let Some(select) = transform.attribute_value(node, "select", None) {
        return eval_select(ctx, select, context, pos, size, scope);
    }
    let has_text_child = children.iter().any(|&c| transform.node_type(c) == NodeType::Text);
    if has_text_child {
        return Ok(crate::context::coerce_literal(&transform.string_value(node)));
    }
    let name = transform.attribute_value(node, "name", None).unwrap_or_default();
    if let Some(existing) = scope.get(name) {
        return Ok(existing);
    }
    Ok(XPathValue::String(String::new()))
}

pub(crate) fn find_matching_template<'e, 'a>(ctx: &Ctx<'e, 'a>, mode: &Option<String>, node: NodeRef<'a>) -> XsltResult<Option<TemplateDecl>> {
    if let Some(bucket) = ctx.engine.templates_by_mode.get(mode) {
        for decl in bucket {
            if let Some(pattern) = &decl.match_pattern {
                if pattern_matches(ctx, pattern, node)? {
                    return Ok(Some(decl.clone()));
                }
            }
        }
    }
    Ok(None)
}

/// Component F's built-in template rule: elements and the root recurse into their
/// children, text/attribute nodes copy their string value verbatim, everything else
/// (comments, PIs) produces nothing.
fn default_rule<'e, 'a>(ctx: &Ctx<'e, 'a>, output: &mut Dom, out_parent: NodeId, node: NodeRef<'a>, mode: &Option<String>) -> XsltResult<()> {
    match node.dom.node_type(node.id) {
        NodeType::Element | NodeType::Root => {
            let children: Vec<NodeRef<'a>> = node.dom.children(node.id).iter().map(|&id| NodeRef { dom: node.dom, id }).collect();
            apply_templates(ctx, output, out_parent, &children, mode, &HashMap::new())
        }
        NodeType::Text | NodeType::Attribute => {
            output.create_text(out_parent, &node.dom.string_value(node.id));
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Component F's `apply-templates`: for each candidate, in order, the first mode-bucket
/// template whose pattern matches fires; unmatched candidates fall back to the built-in
/// rule rather than being dropped (so unfired text nodes still reach the output).
pub(crate) fn apply_templates<'e, 'a>(
    ctx: &Ctx<'e, 'a>,
    output: &mut Dom,
    out_parent: NodeId,
    candidates: &[NodeRef<'a>],
    mode: &Option<String>,
    params: &HashMap<String, XPathValue<NodeRef<'a>>>,
) -> XsltResult<()> {
    let size = candidates.len();
    for (i, &candidate) in candidates.iter().enumerate() {
        let pos = i + 1;
        match find_matching_template(ctx, mode, candidate)? {
            Some(decl) => fire_template(ctx, output, out_parent, &decl, candidate, pos, size, params)?,
            None => default_rule(ctx, output, out_parent, candidate, mode)?,
        }
    }
    Ok(())
}

/// Fires a template: a fresh scope rooted at the run's single global scope (not the
/// caller's local scope -- `call-template` must not see the caller's locals), formal
/// `xsl:param` defaults bound only where `with-param` didn't already supply a value,
/// then the template body runs as an ordinary child sequence.
pub(crate) fn fire_template<'e, 'a>(
    ctx: &Ctx<'e, 'a>,
    output: &mut Dom,
    out_parent: NodeId,
    decl: &TemplateDecl,
    context: NodeRef<'a>,
    pos: usize,
    size: usize,
    params: &HashMap<String, XPathValue<NodeRef<'a>>>,
) -> XsltResult<()> {
    let scope = Scope::child(&ctx.global_scope);
    for (k, v) in params {
        scope.set(k.clone(), v.clone());
    }
    bind_formal_params(ctx, decl.node, context, pos, size, &scope)?;
    process_children(ctx, output, out_parent, decl.node, context, pos, size, &scope)
}

/// Component B.3 chain step 4: runs an `xsl:function` body against `args`, bound
/// positionally to its `xsl:param` children (a param past the end of `args` falls back
/// to its own default, same as `bind_formal_params`), and returns the string value of
/// whatever it produced -- `xsl:function` results are consumed as XPath strings the same
/// way `customFunctions` are. `ctx` is the resolver's own ephemeral re-entry context
/// (see `resolvers.rs`), not the one that was active when the call was made.
pub(crate) fn invoke_user_function<'e, 'a>(ctx: &Ctx<'e, 'a>, func_node: NodeId, args: &[XPathValue<NodeRef<'a>>], context: NodeRef<'a>) -> XsltResult<String> {
    let scope = Scope::child(&ctx.global_scope);
    let transform = &ctx.engine.transform;
    let mut next_arg = 0;
    for &child in transform.children(func_node) {
        if !transform.is_element(child) {
            continue;
        }
        let name = transform.name(child).unwrap();
        if name.is_xslt() && name.local == "param" {
            let pname = transform.attribute_value(child, "name", None).unwrap_or_default().to_string();
            let value = match args.get(next_arg) {
                Some(v) => v.clone(),
                None => compute_bound_value(ctx, child, context, 1, 1, &scope)?,
            };
            scope.set(pname, value);
            next_arg += 1;
        }
    }
    let mut frag = Dom::new();
    let frag_root = frag.root();
    process_children(ctx, &mut frag, frag_root, func_node, context, 1, 1, &scope)?;
    Ok(frag.string_value(frag_root))
}

fn alias_name(engine: &EngineState, name: &QName) -> QName {
    if let Some(prefix) = &name.prefix {
        if let Some(result_prefix) = engine.namespace_aliases.get(prefix) {
            return QName::with_prefix(result_prefix.clone(), name.uri.clone(), name.local.clone());
        }
    }
    name.clone()
}

fn literal_result_element<'e, 'a>(ctx: &Ctx<'e, 'a>, output: &mut Dom, out_parent: NodeId, node: NodeId, context: NodeRef<'a>, pos: usize, size: usize, scope: &Rc<Scope<'a>>) -> XsltResult<()> {
    let transform = &ctx.engine.transform;
    let name = alias_name(ctx.engine, transform.name(node).unwrap());
    let new_el = output.create_element(out_parent, name);
    for &attr_id in transform.attribute_ids(node) {
        let attr_name = transform.name(attr_id).unwrap().clone();
        let raw_value = transform.string_value(attr_id);
        let resolved = resolve_avt(ctx, &raw_value, context, pos, size, scope)?;
        output.set_attribute(new_el, attr_name, resolved);
    }
    process_children(ctx, output, new_el, node, context, pos, size, scope)
}

/// Dispatches one transform-tree node: XSLT-namespace elements go to
/// `instruction_handlers`, everything else is treated as a literal result element (or
/// passed-through text/ignored comment/PI).
pub(crate) fn exec_node<'e, 'a>(ctx: &Ctx<'e, 'a>, output: &mut Dom, out_parent: NodeId, node: NodeId, context: NodeRef<'a>, pos: usize, size: usize, scope: &Rc<Scope<'a>>) -> XsltResult<()> {
    let transform = &ctx.engine.transform;
    match transform.node_type(node) {
        NodeType::Text => {
            if pass_text(transform, node) {
                output.create_text(out_parent, &transform.string_value(node));
            }
            Ok(())
        }
        NodeType::Comment | NodeType::ProcessingInstruction => Ok(()),
        NodeType::Element => {
            let name = transform.name(node).unwrap().clone();
            if name.is_xslt() {
                instruction_handlers::dispatch(ctx, output, out_parent, node, &name.local, context, pos, size, scope)
            } else {
                literal_result_element(ctx, output, out_parent, node, context, pos, size, scope)
            }
        }
        _ => Ok(()),
    }
}

pub(crate) fn process_children<'e, 'a>(ctx: &Ctx<'e, 'a>, output: &mut Dom, out_parent: NodeId, parent: NodeId, context: NodeRef<'a>, pos: usize, size: usize, scope: &Rc<Scope<'a>>) -> XsltResult<()> {
    for &child in ctx.engine.transform.children(parent) {
        exec_node(ctx, output, out_parent, child, context, pos, size, scope)?;
    }
    Ok(())
}
