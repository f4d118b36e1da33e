//! The chained Function Resolver (component B.3): plugs the XSLT Function Library and
//! the document arena into `xslt_xpath`'s otherwise XSLT-agnostic evaluator. Built-in
//! XPath 1.0 functions are tried first by `xslt-xpath` itself; anything it doesn't
//! recognize falls through to `resolve` here.

use crate::context::{EngineState, Scope};
use crate::dom::{Dom, NodeRef};
use crate::driver::{invoke_user_function, Ctx, CustomFunction};
use crate::fetch::CachingFetcher;
use crate::{functions, xml};
use bumpalo::Bump;
use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;
use xslt_xpath::{EvaluationContext, FunctionRegistry, FunctionResolver, XPathError, XPathValue};

/// Resolves the extension functions of component C against one run's state. `current`
/// is mutable because it changes as the driver enters/leaves `apply-templates` and
/// `for-each` (it is NOT the same as the context node inside a predicate).
///
/// `registry`, `key_indexes` and `global_scope` duplicate fields `Ctx` already owns.
/// `Ctx` holds a `&XsltResolver`, so a resolver can't hold a `&Ctx` back -- dispatching
/// an `xsl:function` call (chain step 4) needs to re-enter `process_children` with a
/// `Ctx`, so it builds one, ephemeral and local to that one call, out of these fields.
pub struct XsltResolver<'a> {
    pub engine: &'a EngineState,
    pub arena: &'a Bump,
    pub fetcher: &'a CachingFetcher<'a>,
    pub current: Cell<NodeRef<'a>>,
    pub user_functions: Vec<String>,
    /// Host-registered extension functions (chain step 2), keyed by `(namespaceURI,
    /// localName)`.
    pub custom_functions: &'a HashMap<(String, String), CustomFunction>,
    pub registry: &'a FunctionRegistry,
    pub key_indexes: &'a HashMap<String, HashMap<String, Vec<NodeRef<'a>>>>,
    pub global_scope: Rc<Scope<'a>>,
}

impl<'a> XsltResolver<'a> {
    pub fn new(
        engine: &'a EngineState,
        arena: &'a Bump,
        fetcher: &'a CachingFetcher<'a>,
        current: NodeRef<'a>,
        registry: &'a FunctionRegistry,
        key_indexes: &'a HashMap<String, HashMap<String, Vec<NodeRef<'a>>>>,
        global_scope: Rc<Scope<'a>>,
        custom_functions: &'a HashMap<(String, String), CustomFunction>,
    ) -> Self {
        XsltResolver {
            engine,
            arena,
            fetcher,
            current: Cell::new(current),
            user_functions: Vec::new(),
            custom_functions,
            registry,
            key_indexes,
            global_scope,
        }
    }

    pub fn with_current(&self, node: NodeRef<'a>) -> CurrentGuard<'_, 'a> {
        let previous = self.current.replace(node);
        CurrentGuard { resolver: self, previous }
    }

    fn fetch_document(&self, url: &str) -> Result<NodeRef<'a>, XPathError> {
        let text = self
            .fetcher
            .fetch(url)
            .map_err(|e| XPathError::FunctionError { function: "document".to_string(), message: e.to_string() })?;
        let (dom, root) = xml::parse_document(&text)
            .map_err(|e| XPathError::FunctionError { function: "document".to_string(), message: e.to_string() })?;
        let dom_ref: &'a Dom = self.arena.alloc(dom);
        Ok(NodeRef { dom: dom_ref, id: root })
    }

    /// A throwaway `Ctx` for re-entering `process_children`/`compute_bound_value` from
    /// inside `resolve` itself (chain step 4's `xsl:function` dispatch). Never stored:
    /// it borrows `self` for `resolver` and is dropped at the end of the one call that
    /// built it.
    fn ephemeral_ctx(&self) -> Ctx<'_, 'a> {
        Ctx {
            engine: self.engine,
            registry: self.registry,
            key_indexes: self.key_indexes,
            resolver: self,
            global_scope: Rc::clone(&self.global_scope),
            input_root: self.current.get(),
        }
    }

    /// Splits `qualified` on its first `:` and resolves the prefix against the
    /// stylesheet root element's own namespace declarations -- the pragmatic stand-in
    /// for per-call-site in-scope bindings (see `DESIGN.md`). A name with no prefix
    /// resolves to the empty namespace URI.
    fn resolve_function_namespace<'b>(&self, qualified: &'b str) -> (String, &'b str) {
        match qualified.split_once(':') {
            Some((prefix, local)) => {
                let uri = self
                    .engine
                    .stylesheet_element
                    .and_then(|el| self.engine.transform.resolve_namespace_prefix(el, Some(prefix)))
                    .unwrap_or_default();
                (uri, local)
            }
            None => (String::new(), qualified),
        }
    }
}

/// Restores the previous `current()` node when the enclosing `for-each`/`apply-templates`
/// iteration ends, RAII-style so every early return restores it correctly.
pub struct CurrentGuard<'r, 'a> {
    resolver: &'r XsltResolver<'a>,
    previous: NodeRef<'a>,
}

impl<'r, 'a> Drop for CurrentGuard<'r, 'a> {
    fn drop(&mut self) {
        self.resolver.current.set(self.previous);
    }
}

impl<'a> FunctionResolver<'a, NodeRef<'a>> for XsltResolver<'a> {
    fn resolve(
        &self,
        name: &str,
        mut args: Vec<XPathValue<NodeRef<'a>>>,
        _e_ctx: &EvaluationContext<'a, '_, NodeRef<'a>>,
    ) -> Option<Result<XPathValue<NodeRef<'a>>, XPathError>> {
        let result = match name {
            "current" => Ok(XPathValue::NodeSet(vec![self.current.get()])),

            "document" => {
                let url = args.first().map(|v| v.to_string()).unwrap_or_default();
                self.fetch_document(&url).map(|n| XPathValue::NodeSet(vec![n]))
            }

            // "key" is handled by xslt-xpath's own built-in dispatch via
            // `EvaluationContext::key_indexes` and never reaches this fallback.
            "node-set" => Ok(args.pop().unwrap_or(XPathValue::NodeSet(vec![]))),

            "generate-id" => match args.first() {
                None => Ok(XPathValue::String(functions::generate_id_random())),
                Some(XPathValue::NodeSet(nodes)) => match nodes.iter().min() {
                    Some(first) => Ok(XPathValue::String(functions::generate_id(first.dom as *const Dom as usize, first.id.index()))),
                    None => Ok(XPathValue::String(String::new())),
                },
                Some(_) => Err(XPathError::FunctionError {
                    function: "generate-id".to_string(),
                    message: "expects a node-set argument".to_string(),
                }),
            },

            "format-number" => {
                if args.len() < 2 {
                    Err(XPathError::FunctionError {
                        function: "format-number".to_string(),
                        message: "expects 2 or 3 arguments".to_string(),
                    })
                } else {
                    let value = args[0].to_number();
                    let pattern = args[1].to_string();
                    let format_name = args.get(2).map(|v| v.to_string());
                    match functions::pick_decimal_format(self.engine, format_name.as_deref()) {
                        Some(fmt) => Ok(XPathValue::String(functions::format_number(value, &pattern, fmt))),
                        None => Err(XPathError::FunctionError {
                            function: "format-number".to_string(),
                            message: format!("unknown decimal-format '{}'", format_name.unwrap_or_default()),
                        }),
                    }
                }
            }

            "function-available" => {
                let fname = args.first().map(|v| v.to_string()).unwrap_or_default();
                Ok(XPathValue::Boolean(functions::function_available(&fname, &self.user_functions)))
            }

            "element-available" => Ok(XPathValue::Boolean(false)),

            "system-property" => Ok(XPathValue::String(String::new())),

            "replace" => {
                if args.len() < 3 {
                    Err(XPathError::FunctionError {
                        function: "replace".to_string(),
                        message: "expects 3 arguments".to_string(),
                    })
                } else {
                    let subject = args[0].to_string();
                    let pattern = args[1].to_string();
                    let replacement = args[2].to_string();
                    functions::regex_replace(&subject, &pattern, &replacement)
                        .map(XPathValue::String)
                        .map_err(|e| XPathError::FunctionError { function: "replace".to_string(), message: e.to_string() })
                }
            }

            "matches" => {
                if args.len() < 2 {
                    Err(XPathError::FunctionError {
                        function: "matches".to_string(),
                        message: "expects 2 arguments".to_string(),
                    })
                } else {
                    let subject = args[0].to_string();
                    let pattern = args[1].to_string();
                    functions::regex_matches(&subject, &pattern)
                        .map(|matched| XPathValue::String(if matched { "true" } else { "false" }.to_string()))
                        .map_err(|e| XPathError::FunctionError { function: "matches".to_string(), message: e.to_string() })
                }
            }

            "lower-case" => Ok(XPathValue::String(functions::lower_case(&args.first().map(|v| v.to_string()).unwrap_or_default()))),
            "upper-case" => Ok(XPathValue::String(functions::upper_case(&args.first().map(|v| v.to_string()).unwrap_or_default()))),

            _ => {
                let (uri, local) = self.resolve_function_namespace(name);

                // Chain step 2: a host-registered extension function, looked up by
                // namespace URI + local name.
                if let Some(host_fn) = self.custom_functions.get(&(uri, local.to_string())) {
                    let string_args: Vec<String> = args.iter().map(|v| v.to_string()).collect();
                    return Some(Ok(XPathValue::String(host_fn(&string_args))));
                }

                // Chain step 4: an `xsl:function` declared in the stylesheet itself.
                // Matched on the raw qualified name, since both the call site and the
                // `xsl:function name="..."` declaration live in the same document and
                // share its prefix bindings.
                if let Some(&func_node) = self.engine.user_functions.get(name) {
                    let ephemeral = self.ephemeral_ctx();
                    return Some(
                        invoke_user_function(&ephemeral, func_node, &args, self.current.get())
                            .map(XPathValue::String)
                            .map_err(|e| XPathError::FunctionError { function: name.to_string(), message: e.to_string() }),
                    );
                }

                return None;
            }
        };
        Some(result)
    }
}
