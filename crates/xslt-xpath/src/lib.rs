//! XPath 1.0 expression parsing and evaluation over any tree implementing `DataSourceNode`.
//!
//! This crate knows nothing about XML, XSLT, or any particular document model. It is
//! handed a node type that can navigate itself (children, parent, attributes, string
//! value) and it parses and evaluates XPath 1.0 expressions against it.

pub mod ast;
pub mod axes;
pub mod datasource;
pub mod engine;
pub mod error;
pub mod functions;
pub mod operators;
pub mod parser;

pub use ast::{
    Axis, BinaryOperator, Expression, LocationPath, NodeTest, NodeTypeTest, Step, UnaryOperator,
};
pub use datasource::{DataSourceNode, NodeType, QName};
pub use engine::{evaluate, EvaluationContext, FunctionResolver, XPathValue};
pub use error::XPathError;
pub use functions::FunctionRegistry;
pub use parser::parse_expression;
