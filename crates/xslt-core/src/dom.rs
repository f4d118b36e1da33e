//! A single, uniform arena-based tree type shared by the input, transform, and output
//! documents (component A, "DOM Helper"). Using one representation for all three lets
//! `xsl:include`/`xsl:import` splice subtrees in place (the transform tree must be
//! mutable) and lets result-tree fragments be built once, then queried through the
//! same `DataSourceNode` machinery as the real input document.
//!
//! Nodes are addressed by `NodeId`, an index into a flat arena. Document order is the
//! order in which nodes were appended, which is preserved by every mutation this module
//! exposes (children are always appended or inserted at a specific position, never
//! reordered behind the caller's back).

use std::collections::HashMap;
use std::fmt;
use xslt_xpath::{DataSourceNode, NodeType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A qualified name: an optional declared prefix, the resolved namespace URI (if any
/// binding was in scope), and the local part.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub prefix: Option<String>,
    pub uri: Option<String>,
    pub local: String,
}

impl QName {
    pub fn new(prefix: Option<String>, uri: Option<String>, local: impl Into<String>) -> Self {
        QName {
            prefix,
            uri,
            local: local.into(),
        }
    }

    /// A namespace-free name, used for synthetic nodes the engine builds itself
    /// (e.g. `xsl:element`/`xsl:attribute` targets resolved purely by local name).
    pub fn local(local: impl Into<String>) -> Self {
        QName {
            prefix: None,
            uri: None,
            local: local.into(),
        }
    }

    pub fn with_prefix(prefix: impl Into<String>, uri: Option<String>, local: impl Into<String>) -> Self {
        QName {
            prefix: Some(prefix.into()),
            uri,
            local: local.into(),
        }
    }

    pub fn matches_local(&self, local: &str) -> bool {
        self.local == local
    }

    /// True when this name is in the XSLT namespace, recognized either by resolved URI
    /// or, failing that, by the conventional `xsl` prefix (component A's `isA` special-
    /// cases `xsl` "regardless of declared prefix").
    pub fn is_xslt(&self) -> bool {
        match &self.uri {
            Some(uri) => uri == crate::XSLT_NAMESPACE,
            None => self.prefix.as_deref() == Some("xsl"),
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(p) => write!(f, "{}:{}", p, self.local),
            None => write!(f, "{}", self.local),
        }
    }
}

#[derive(Debug, Clone)]
enum NodeKind {
    Root {
        children: Vec<NodeId>,
    },
    Element {
        name: QName,
        children: Vec<NodeId>,
        attributes: Vec<NodeId>,
        /// Prefix -> URI bindings in scope at this element, inherited plus own
        /// declarations, captured once at parse time (`""` is the default namespace).
        /// Empty for elements built by the driver rather than parsed from source text.
        ns_scope: HashMap<String, String>,
    },
    Attribute {
        name: QName,
        value: String,
    },
    Text(String),
    Comment(String),
    ProcessingInstruction {
        target: String,
        data: String,
    },
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
}

/// A mutable, arena-backed XML tree. One `Dom` instance plays the role of the input
/// document, the (destructively rewritten) transform document, the growing output
/// document, or a single result-tree fragment.
#[derive(Debug, Clone)]
pub struct Dom {
    nodes: Vec<NodeData>,
    root: NodeId,
}

impl Default for Dom {
    fn default() -> Self {
        Self::new()
    }
}

impl Dom {
    pub fn new() -> Self {
        let nodes = vec![NodeData {
            kind: NodeKind::Root { children: vec![] },
            parent: None,
        }];
        Dom {
            nodes,
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    fn push(&mut self, kind: NodeKind, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeData { kind, parent });
        id
    }

    fn children_vec_mut(&mut self, id: NodeId) -> &mut Vec<NodeId> {
        match &mut self.nodes[id.0].kind {
            NodeKind::Root { children } | NodeKind::Element { children, .. } => children,
            _ => panic!("node {:?} cannot have children", id),
        }
    }

    pub fn create_element(&mut self, parent: NodeId, name: QName) -> NodeId {
        let id = self.push(
            NodeKind::Element {
                name,
                children: vec![],
                attributes: vec![],
                ns_scope: HashMap::new(),
            },
            Some(parent),
        );
        self.children_vec_mut(parent).push(id);
        id
    }

    /// Creates an element without attaching it anywhere yet, used when the caller needs
    /// the id before deciding on final placement (e.g. building a scratch fragment).
    pub fn create_detached_element(&mut self, name: QName) -> NodeId {
        self.push(
            NodeKind::Element {
                name,
                children: vec![],
                attributes: vec![],
                ns_scope: HashMap::new(),
            },
            None,
        )
    }

    /// Records the in-scope namespace bindings captured for `id` while parsing. Called
    /// once, right after the element is created, by the XML reader (`xml.rs`).
    pub(crate) fn set_namespace_scope(&mut self, id: NodeId, scope: HashMap<String, String>) {
        if let NodeKind::Element { ns_scope, .. } = &mut self.nodes[id.0].kind {
            *ns_scope = scope;
        }
    }

    /// Resolves `prefix` (`None`/`Some("")` means the default namespace) against the
    /// namespace bindings captured for `element` at parse time. Returns `None` for
    /// non-element nodes or elements built after parsing with no scope recorded.
    pub fn resolve_namespace_prefix(&self, element: NodeId, prefix: Option<&str>) -> Option<String> {
        match &self.nodes[element.0].kind {
            NodeKind::Element { ns_scope, .. } => ns_scope.get(prefix.unwrap_or("")).cloned(),
            _ => None,
        }
    }

    /// Creates a text node. Runs of ASCII spaces are collapsed to one, per component A's
    /// `createTextNode` contract; further whitespace policy (strip/normalize/preserve)
    /// is applied by the driver at emission time, not here.
    pub fn create_text(&mut self, parent: NodeId, text: &str) -> NodeId {
        let collapsed = collapse_ascii_spaces(text);
        let id = self.push(NodeKind::Text(collapsed), Some(parent));
        self.children_vec_mut(parent).push(id);
        id
    }

    pub fn create_comment(&mut self, parent: NodeId, text: &str) -> NodeId {
        let id = self.push(NodeKind::Comment(text.to_string()), Some(parent));
        self.children_vec_mut(parent).push(id);
        id
    }

    pub fn create_processing_instruction(&mut self, parent: NodeId, target: &str, data: &str) -> NodeId {
        let id = self.push(
            NodeKind::ProcessingInstruction {
                target: target.to_string(),
                data: data.to_string(),
            },
            Some(parent),
        );
        self.children_vec_mut(parent).push(id);
        id
    }

    /// Sets an attribute on `owner`, replacing any existing attribute with the same
    /// local name and namespace URI. `xmlns*` declarations are rejected here; callers
    /// track namespace bindings separately during parsing.
    pub fn set_attribute(&mut self, owner: NodeId, name: QName, value: impl Into<String>) -> NodeId {
        let value = value.into();
        if let NodeKind::Element { attributes, .. } = &self.nodes[owner.0].kind {
            for &attr_id in attributes {
                if let NodeKind::Attribute { name: existing, .. } = &self.nodes[attr_id.0].kind {
                    if existing.local == name.local && existing.uri == name.uri {
                        self.nodes[attr_id.0].kind = NodeKind::Attribute { name, value };
                        return attr_id;
                    }
                }
            }
        }
        let id = self.push(NodeKind::Attribute { name, value }, Some(owner));
        if let NodeKind::Element { attributes, .. } = &mut self.nodes[owner.0].kind {
            attributes.push(id);
        }
        id
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child.0].parent = Some(parent);
        self.children_vec_mut(parent).push(child);
    }

    /// Inserts `child` immediately before `reference` among `parent`'s children, used by
    /// `xsl:include` splicing.
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: NodeId) {
        self.nodes[child.0].parent = Some(parent);
        let children = self.children_vec_mut(parent);
        let pos = children.iter().position(|&c| c == reference).unwrap_or(children.len());
        children.insert(pos, child);
    }

    /// Removes `child` from `parent`'s child list without deleting its arena entry.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) {
        self.children_vec_mut(parent).retain(|&c| c != child);
    }

    pub fn remove_attribute(&mut self, owner: NodeId, local: &str) {
        if let NodeKind::Element { attributes, .. } = &mut self.nodes[owner.0].kind {
            let mut attributes = std::mem::take(attributes);
            attributes.retain(|&id| {
                !matches!(&self.nodes[id.0].kind, NodeKind::Attribute { name, .. } if name.local == local)
            });
            if let NodeKind::Element { attributes: slot, .. } = &mut self.nodes[owner.0].kind {
                *slot = attributes;
            }
        }
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match &self.nodes[id.0].kind {
            NodeKind::Root { children } | NodeKind::Element { children, .. } => children,
            _ => &[],
        }
    }

    pub fn attribute_ids(&self, id: NodeId) -> &[NodeId] {
        match &self.nodes[id.0].kind {
            NodeKind::Element { attributes, .. } => attributes,
            _ => &[],
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn name(&self, id: NodeId) -> Option<&QName> {
        match &self.nodes[id.0].kind {
            NodeKind::Element { name, .. } | NodeKind::Attribute { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.nodes[id.0].kind, NodeKind::Element { .. })
    }

    pub fn node_type(&self, id: NodeId) -> NodeType {
        match &self.nodes[id.0].kind {
            NodeKind::Root { .. } => NodeType::Root,
            NodeKind::Element { .. } => NodeType::Element,
            NodeKind::Attribute { .. } => NodeType::Attribute,
            NodeKind::Text(_) => NodeType::Text,
            NodeKind::Comment(_) => NodeType::Comment,
            NodeKind::ProcessingInstruction { .. } => NodeType::ProcessingInstruction,
        }
    }

    /// Component A's `attribute(name)`: value lookup with entity decoding already baked
    /// in at parse time, absent when missing.
    pub fn attribute_value(&self, element: NodeId, local: &str, uri: Option<&str>) -> Option<&str> {
        self.attribute_ids(element).iter().find_map(|&id| {
            if let NodeKind::Attribute { name, value } = &self.nodes[id.0].kind {
                let uri_matches = match uri {
                    Some(u) => name.uri.as_deref() == Some(u),
                    None => true,
                };
                if name.local == local && uri_matches {
                    Some(value.as_str())
                } else {
                    None
                }
            } else {
                None
            }
        })
    }

    /// The XPath 1.0 `string()` value: text content for text/comment/PI, the attribute
    /// value for attributes, and the concatenation of all descendant text for
    /// elements/root.
    pub fn string_value(&self, id: NodeId) -> String {
        match &self.nodes[id.0].kind {
            NodeKind::Text(s) => s.clone(),
            NodeKind::Comment(s) => s.clone(),
            NodeKind::ProcessingInstruction { data, .. } => data.clone(),
            NodeKind::Attribute { value, .. } => value.clone(),
            NodeKind::Root { .. } | NodeKind::Element { .. } => {
                let mut out = String::new();
                self.collect_text(id, &mut out);
                out
            }
        }
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        for &child in self.children(id) {
            match &self.nodes[child.0].kind {
                NodeKind::Text(s) => out.push_str(s),
                NodeKind::Element { .. } | NodeKind::Root { .. } => self.collect_text(child, out),
                _ => {}
            }
        }
    }

    pub fn previous_element_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|&s| s == id)?;
        siblings[..pos]
            .iter()
            .rev()
            .find(|&&s| self.is_element(s))
            .copied()
    }

    pub fn next_element_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|&s| s == id)?;
        siblings[pos + 1..].iter().find(|&&s| self.is_element(s)).copied()
    }

    /// Component A's `copy(src)`: a shallow copy of `src` (from any `Dom`, including
    /// `self`) into `dest_parent`. Elements become empty element children (attributes
    /// copied, `xmlns*` excluded by construction since namespace declarations are never
    /// materialized as attribute nodes); text/comment/PI are appended verbatim. Returns
    /// the created node, or `dest_parent` itself when `src` is an attribute (callers
    /// then re-set it with `set_attribute`).
    pub fn shallow_copy(&mut self, src_dom: &Dom, src: NodeId, dest_parent: NodeId) -> NodeId {
        match src_dom.node_type(src) {
            NodeType::Element => {
                let name = src_dom.name(src).cloned().unwrap();
                let new_id = self.create_element(dest_parent, name);
                for &attr in src_dom.attribute_ids(src) {
                    if let NodeKind::Attribute { name, value } = &src_dom.nodes[attr.0].kind {
                        self.set_attribute(new_id, name.clone(), value.clone());
                    }
                }
                new_id
            }
            NodeType::Text => self.create_text(dest_parent, &src_dom.string_value(src)),
            NodeType::Comment => self.create_comment(dest_parent, &src_dom.string_value(src)),
            NodeType::ProcessingInstruction => {
                if let NodeKind::ProcessingInstruction { target, data } = &src_dom.nodes[src.0].kind {
                    self.create_processing_instruction(dest_parent, target, data)
                } else {
                    unreachable!()
                }
            }
            NodeType::Attribute => {
                if let NodeKind::Attribute { name, value } = &src_dom.nodes[src.0].kind {
                    self.set_attribute(dest_parent, name.clone(), value.clone());
                }
                dest_parent
            }
            NodeType::Root => dest_parent,
        }
    }

    /// Component A's `copyDeep(src)`: recursive copy, attributes then children.
    pub fn deep_copy(&mut self, src_dom: &Dom, src: NodeId, dest_parent: NodeId) -> NodeId {
        let new_id = self.shallow_copy(src_dom, src, dest_parent);
        if src_dom.node_type(src) == NodeType::Element || src_dom.node_type(src) == NodeType::Root {
            for &child in src_dom.children(src) {
                self.deep_copy(src_dom, child, new_id);
            }
        }
        new_id
    }

    pub fn node_ref(&self, id: NodeId) -> NodeRef<'_> {
        NodeRef { dom: self, id }
    }

    /// The target of a processing instruction, `None` for every other node kind.
    pub fn pi_target(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id.0].kind {
            NodeKind::ProcessingInstruction { target, .. } => Some(target),
            _ => None,
        }
    }
}

fn collapse_ascii_spaces(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = false;
    for c in text.chars() {
        if c == ' ' {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out
}

/// A borrowed handle into a `Dom`, implementing `xslt_xpath::DataSourceNode` so the
/// XPath evaluator can navigate any of the input/transform/output/fragment trees
/// without knowing they're arena-backed.
#[derive(Debug, Clone, Copy)]
pub struct NodeRef<'a> {
    pub dom: &'a Dom,
    pub id: NodeId,
}

impl<'a> PartialEq for NodeRef<'a> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.dom, other.dom) && self.id == other.id
    }
}
impl<'a> Eq for NodeRef<'a> {}

impl<'a> std::hash::Hash for NodeRef<'a> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (self.dom as *const Dom as usize).hash(state);
        self.id.hash(state);
    }
}

impl<'a> PartialOrd for NodeRef<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<'a> Ord for NodeRef<'a> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.dom as *const Dom)
            .cmp(&(other.dom as *const Dom))
            .then(self.id.cmp(&other.id))
    }
}

impl<'a> DataSourceNode<'a> for NodeRef<'a> {
    fn node_type(&self) -> NodeType {
        self.dom.node_type(self.id)
    }

    fn name(&self) -> Option<xslt_xpath::QName<'a>> {
        self.dom.name(self.id).map(|q| xslt_xpath::QName {
            prefix: q.prefix.as_deref(),
            local_part: &q.local,
        })
    }

    fn string_value(&self) -> String {
        self.dom.string_value(self.id)
    }

    fn attributes(&self) -> Box<dyn Iterator<Item = Self> + 'a> {
        let dom = self.dom;
        Box::new(
            dom.attribute_ids(self.id)
                .iter()
                .map(move |&id| NodeRef { dom, id }),
        )
    }

    fn children(&self) -> Box<dyn Iterator<Item = Self> + 'a> {
        let dom = self.dom;
        Box::new(dom.children(self.id).iter().map(move |&id| NodeRef { dom, id }))
    }

    fn parent(&self) -> Option<Self> {
        self.dom.parent(self.id).map(|id| NodeRef { dom: self.dom, id })
    }
}
