//! The evaluation context (component D): the value bound to `$var`, the variable scope
//! chain, the template caches used to dispatch `apply-templates`, and the process-wide
//! configuration (decimal formats, whitespace policy) shared across every context in a
//! single run.

use crate::dom::{Dom, NodeId, NodeRef, QName};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use xslt_xpath::XPathValue;

/// A cached, pre-sorted template, bucketed by mode for `apply-templates` dispatch.
#[derive(Debug, Clone)]
pub struct TemplateDecl {
    pub node: NodeId,
    pub match_pattern: Option<String>,
    pub name: Option<String>,
    pub mode: Option<String>,
    pub priority: f64,
    pub import_precedence: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecimalFormatKey(pub Option<String>);

#[derive(Debug, Clone)]
pub struct DecimalFormat {
    pub decimal_separator: char,
    pub grouping_separator: char,
    pub infinity: String,
    pub minus_sign: char,
    pub nan: String,
    pub percent: char,
    pub per_mille: char,
    pub zero_digit: char,
    pub digit: char,
    pub pattern_separator: char,
}

impl Default for DecimalFormat {
    fn default() -> Self {
        DecimalFormat {
            decimal_separator: '.',
            grouping_separator: ',',
            infinity: "Infinity".to_string(),
            minus_sign: '-',
            nan: "NaN".to_string(),
            percent: '%',
            per_mille: '\u{2030}',
            zero_digit: '0',
            digit: '#',
            pattern_separator: ';',
        }
    }
}

/// Process-wide state, the same for every context derived during one run: the
/// transform document, the template caches, decimal formats, namespace aliases, and
/// whitespace policy. Analogous to "no implicit globals" -- rather than static state,
/// this is an explicit value threaded through every context, not stashed in a global.
#[derive(Debug)]
pub struct EngineState {
    pub transform: Dom,
    pub templates_by_name: HashMap<String, TemplateDecl>,
    /// Mode name (`None` is the `_default` bucket) -> templates, sorted by priority
    /// then descending import precedence so the first match wins.
    pub templates_by_mode: HashMap<Option<String>, Vec<TemplateDecl>>,
    /// key name -> (string value of `use`, matched input node), populated once up front
    /// by walking the input document against every `xsl:key`'s `match` pattern.
    pub keys: HashMap<String, Vec<(String, NodeId)>>,
    /// Raw `xsl:key` declarations (`match`, `use`), consulted once up front to populate
    /// `keys` against the input document.
    pub key_definitions: HashMap<String, Vec<(String, String)>>,
    pub decimal_formats: HashMap<DecimalFormatKey, DecimalFormat>,
    pub namespace_aliases: HashMap<String, String>,
    pub strip_space_patterns: Vec<QName>,
    pub preserve_space_patterns: Vec<QName>,
    /// `xsl:function` declarations (component B.3's chain step 4), keyed by qualified
    /// name, pointing at the `<xsl:function>` element in the transform tree.
    pub user_functions: HashMap<String, NodeId>,
    /// The transform document's root element (`xsl:stylesheet`/`xsl:transform`), used to
    /// resolve a bare prefix against the stylesheet's own namespace declarations (the
    /// `customFunctions`/`xsl:function` lookups in component B.3 need a URI, not just a
    /// prefix). `None` only if the transform document had no root element, which
    /// `collect_declarations` already rejects as malformed.
    pub stylesheet_element: Option<NodeId>,
    pub strict: bool,
    pub output_omit_xml_declaration: bool,
    pub message_sink: RefCell<Vec<String>>,
}

impl EngineState {
    pub fn new(transform: Dom, strict: bool) -> Self {
        let mut decimal_formats = HashMap::new();
        decimal_formats.insert(DecimalFormatKey(None), DecimalFormat::default());
        EngineState {
            transform,
            templates_by_name: HashMap::new(),
            templates_by_mode: HashMap::new(),
            keys: HashMap::new(),
            key_definitions: HashMap::new(),
            decimal_formats,
            namespace_aliases: HashMap::new(),
            strip_space_patterns: Vec::new(),
            preserve_space_patterns: Vec::new(),
            user_functions: HashMap::new(),
            stylesheet_element: None,
            strict,
            output_omit_xml_declaration: false,
            message_sink: RefCell::new(Vec::new()),
        }
    }
}

/// A single link in the variable scope chain. Parent-chain lookup (not class
/// inheritance) mirrors how the driver threads context through recursive template
/// calls: each call gets a fresh child scope, and `call-template` does NOT inherit the
/// caller's local variables (only global variables and the explicit `with-param`s).
///
/// A result-tree fragment (an `xsl:variable` whose content is markup rather than a
/// `select` expression) is stored as a singleton node-set over its own frozen `Dom`
/// rather than as a distinct variant: `string($frag)` then falls out of XPath 1.0's
/// existing "string value of a node-set is the string value of its first node" rule,
/// and `exsl:node-set()` becomes the identity function instead of needing a special
/// case. See `DESIGN.md` for the tradeoff against the stricter two-type model.
#[derive(Debug, Default)]
pub struct Scope<'a> {
    vars: RefCell<HashMap<String, XPathValue<NodeRef<'a>>>>,
    parent: Option<Rc<Scope<'a>>>,
}

impl<'a> Scope<'a> {
    pub fn root() -> Rc<Scope<'a>> {
        Rc::new(Scope::default())
    }

    pub fn child(parent: &Rc<Scope<'a>>) -> Rc<Scope<'a>> {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
        })
    }

    pub fn set(&self, name: impl Into<String>, value: XPathValue<NodeRef<'a>>) {
        self.vars.borrow_mut().insert(name.into(), value);
    }

    pub fn get(self: &Rc<Self>, name: &str) -> Option<XPathValue<NodeRef<'a>>> {
        if let Some(v) = self.vars.borrow().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.get(name))
    }

    pub fn has_local(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name)
    }

    /// Flattens the whole visible chain into a single map, the shape
    /// `xslt_xpath::EvaluationContext` wants for variable lookup.
    pub fn flatten(self: &Rc<Self>) -> HashMap<String, XPathValue<NodeRef<'a>>> {
        let mut out = match &self.parent {
            Some(p) => p.flatten(),
            None => HashMap::new(),
        };
        for (k, v) in self.vars.borrow().iter() {
            out.insert(k.clone(), v.clone());
        }
        out
    }
}

/// A result-tree fragment represented the way `$var` will see it: a singleton node-set
/// over the fragment's own root.
pub fn fragment_value(dom: &Dom) -> XPathValue<NodeRef<'_>> {
    XPathValue::NodeSet(vec![NodeRef { dom, id: dom.root() }])
}

/// Coerces an `xsl:variable`/`xsl:param` literal `select`-less text body according to
/// the setVariable literal-coercion rules: `'true'`/`'false'` become booleans, a string
/// matching `^\d+(\.\d*)?$` becomes a number, anything else stays a string.
pub fn coerce_literal<'a, N: xslt_xpath::DataSourceNode<'a>>(text: &str) -> XPathValue<N> {
    match text {
        "true" => return XPathValue::Boolean(true),
        "false" => return XPathValue::Boolean(false),
        _ => {}
    }
    if is_plain_number(text) {
        if let Ok(n) = text.parse::<f64>() {
            return XPathValue::Number(n);
        }
    }
    XPathValue::String(text.to_string())
}

fn is_plain_number(s: &str) -> bool {
    let mut chars = s.chars().peekable();
    let mut saw_digit = false;
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            saw_digit = true;
            chars.next();
        } else {
            break;
        }
    }
    if !saw_digit {
        return false;
    }
    if chars.peek() == Some(&'.') {
        chars.next();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() {
                chars.next();
            } else {
                return false;
            }
        }
    }
    chars.peek().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_lookup_walks_parent_chain() {
        let root: Rc<Scope<'static>> = Scope::root();
        root.set("x", XPathValue::<NodeRef<'static>>::Number(1.0));
        let child = Scope::child(&root);
        assert!(matches!(child.get("x"), Some(XPathValue::Number(n)) if n == 1.0));
        assert!(child.get("missing").is_none());
    }

    #[test]
    fn child_scope_overrides_without_mutating_parent() {
        let root: Rc<Scope<'static>> = Scope::root();
        root.set("x", XPathValue::<NodeRef<'static>>::Number(1.0));
        let child = Scope::child(&root);
        child.set("x", XPathValue::<NodeRef<'static>>::Number(2.0));
        assert!(matches!(child.get("x"), Some(XPathValue::Number(n)) if n == 2.0));
        assert!(matches!(root.get("x"), Some(XPathValue::Number(n)) if n == 1.0));
    }

    #[test]
    fn fragment_value_is_a_singleton_node_set() {
        let mut dom = Dom::new();
        let root = dom.root();
        dom.create_text(root, "hi");
        let value = fragment_value(&dom);
        assert!(matches!(value, XPathValue::NodeSet(ref v) if v.len() == 1));
    }

    #[test]
    fn literal_coercion_rules() {
        assert!(matches!(
            coerce_literal::<NodeRef<'static>>("true"),
            XPathValue::Boolean(true)
        ));
        assert!(matches!(
            coerce_literal::<NodeRef<'static>>("false"),
            XPathValue::Boolean(false)
        ));
        assert!(matches!(coerce_literal::<NodeRef<'static>>("42"), XPathValue::Number(n) if n == 42.0));
        assert!(matches!(coerce_literal::<NodeRef<'static>>("3.14"), XPathValue::Number(n) if n == 3.14));
        assert!(matches!(coerce_literal::<NodeRef<'static>>("hello"), XPathValue::String(ref s) if s == "hello"));
        assert!(matches!(coerce_literal::<NodeRef<'static>>("12abc"), XPathValue::String(_)));
    }
}
