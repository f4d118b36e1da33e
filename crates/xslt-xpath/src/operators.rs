//! Binary operator evaluation following the XPath 1.0 comparison and arithmetic rules.
//!
//! Equality (`=`, `!=`) and relational (`<`, `<=`, `>`, `>=`) operators both special-case
//! node-sets: comparing a node-set against anything is really an existential comparison
//! over the node-set's members, coerced towards whichever side isn't itself a node-set.

use crate::ast::BinaryOperator;
use crate::datasource::DataSourceNode;
use crate::engine::XPathValue;
use crate::error::XPathError;

pub fn evaluate<'a, N: DataSourceNode<'a>>(
    op: BinaryOperator,
    left: XPathValue<N>,
    right: XPathValue<N>,
) -> Result<XPathValue<N>, XPathError> {
    match op {
        BinaryOperator::Or => Ok(XPathValue::Boolean(left.to_bool() || right.to_bool())),
        BinaryOperator::And => Ok(XPathValue::Boolean(left.to_bool() && right.to_bool())),
        BinaryOperator::Equals => Ok(XPathValue::Boolean(compare_equality(&left, &right))),
        BinaryOperator::NotEquals => Ok(XPathValue::Boolean(!compare_equality(&left, &right))),
        BinaryOperator::LessThan => Ok(XPathValue::Boolean(compare_relational(&left, &right, |a, b| a < b))),
        BinaryOperator::LessThanOrEqual => {
            Ok(XPathValue::Boolean(compare_relational(&left, &right, |a, b| a <= b)))
        }
        BinaryOperator::GreaterThan => {
            Ok(XPathValue::Boolean(compare_relational(&left, &right, |a, b| a > b)))
        }
        BinaryOperator::GreaterThanOrEqual => {
            Ok(XPathValue::Boolean(compare_relational(&left, &right, |a, b| a >= b)))
        }
        BinaryOperator::Plus => Ok(XPathValue::Number(left.to_number() + right.to_number())),
        BinaryOperator::Minus => Ok(XPathValue::Number(left.to_number() - right.to_number())),
        BinaryOperator::Multiply => Ok(XPathValue::Number(left.to_number() * right.to_number())),
        BinaryOperator::Divide => Ok(XPathValue::Number(left.to_number() / right.to_number())),
        BinaryOperator::Modulo => Ok(XPathValue::Number(left.to_number() % right.to_number())),
        BinaryOperator::Union => match (left, right) {
            (XPathValue::NodeSet(mut a), XPathValue::NodeSet(b)) => {
                for node in b {
                    if !a.contains(&node) {
                        a.push(node);
                    }
                }
                a.sort();
                Ok(XPathValue::NodeSet(a))
            }
            _ => Err(XPathError::TypeError(
                "union operator (|) requires both operands to be node-sets".to_string(),
            )),
        },
    }
}

/// Numeric comparison, per XPath 1.0 §3.4: relational operators always compare numbers,
/// except that a node-set operand is compared node-by-node before falling back to `to_number`.
fn compare_relational<'a, N: DataSourceNode<'a>>(
    left: &XPathValue<N>,
    right: &XPathValue<N>,
    cmp: impl Fn(f64, f64) -> bool,
) -> bool {
    match (left, right) {
        (XPathValue::NodeSet(ln), XPathValue::NodeSet(rn)) => ln.iter().any(|l| {
            let a = node_number(l);
            rn.iter().any(|r| cmp(a, node_number(r)))
        }),
        (XPathValue::NodeSet(ln), other) => {
            let b = other.to_number();
            ln.iter().any(|l| cmp(node_number(l), b))
        }
        (other, XPathValue::NodeSet(rn)) => {
            let a = other.to_number();
            rn.iter().any(|r| cmp(a, node_number(r)))
        }
        _ => cmp(left.to_number(), right.to_number()),
    }
}

/// Equality comparison, per XPath 1.0 §3.4. Node-sets compare by string-value; a node-set
/// against a primitive coerces towards the primitive's type rather than always to string.
fn compare_equality<'a, N: DataSourceNode<'a>>(left: &XPathValue<N>, right: &XPathValue<N>) -> bool {
    match (left, right) {
        (XPathValue::NodeSet(ln), XPathValue::NodeSet(rn)) => ln
            .iter()
            .any(|l| rn.iter().any(|r| l.string_value() == r.string_value())),
        (XPathValue::NodeSet(ns), XPathValue::Number(n)) => {
            ns.iter().any(|node| node_number(node) == *n)
        }
        (XPathValue::Number(n), XPathValue::NodeSet(ns)) => {
            ns.iter().any(|node| node_number(node) == *n)
        }
        (XPathValue::NodeSet(ns), XPathValue::Boolean(b)) => (!ns.is_empty()) == *b,
        (XPathValue::Boolean(b), XPathValue::NodeSet(ns)) => (!ns.is_empty()) == *b,
        (XPathValue::NodeSet(ns), XPathValue::String(s)) => {
            ns.iter().any(|node| &node.string_value() == s)
        }
        (XPathValue::String(s), XPathValue::NodeSet(ns)) => {
            ns.iter().any(|node| &node.string_value() == s)
        }
        (XPathValue::Boolean(_), _) | (_, XPathValue::Boolean(_)) => left.to_bool() == right.to_bool(),
        (XPathValue::Number(_), _) | (_, XPathValue::Number(_)) => left.to_number() == right.to_number(),
        _ => left.to_string() == right.to_string(),
    }
}

fn node_number<'a, N: DataSourceNode<'a>>(node: &N) -> f64 {
    node.string_value().trim().parse().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::tests::{create_test_tree, MockNode};

    #[test]
    fn test_arithmetic() {
        let a = XPathValue::<MockNode>::Number(2.0);
        let b = XPathValue::<MockNode>::Number(3.0);
        assert_eq!(evaluate(BinaryOperator::Plus, a.clone(), b.clone()).unwrap().to_number(), 5.0);
        assert_eq!(evaluate(BinaryOperator::Minus, a.clone(), b.clone()).unwrap().to_number(), -1.0);
        assert_eq!(evaluate(BinaryOperator::Multiply, a.clone(), b.clone()).unwrap().to_number(), 6.0);
        assert_eq!(evaluate(BinaryOperator::Modulo, b, a).unwrap().to_number(), 1.0);
    }

    #[test]
    fn test_string_equality() {
        let a = XPathValue::<MockNode>::String("foo".to_string());
        let b = XPathValue::<MockNode>::String("foo".to_string());
        let c = XPathValue::<MockNode>::String("bar".to_string());
        assert!(evaluate(BinaryOperator::Equals, a.clone(), b).unwrap().to_bool());
        assert!(evaluate(BinaryOperator::NotEquals, a, c).unwrap().to_bool());
    }

    #[test]
    fn test_nodeset_vs_number_equality() {
        let tree = create_test_tree();
        let para = MockNode { id: 1, tree: &tree }; // string-value "Hello"
        let ns = XPathValue::NodeSet(vec![para]);
        let num = XPathValue::Number(0.0);
        // "Hello" doesn't parse as a number, so this should not be equal.
        assert!(!evaluate(BinaryOperator::Equals, ns, num).unwrap().to_bool());
    }

    #[test]
    fn test_union_dedup_and_sort() {
        let tree = create_test_tree();
        let para = MockNode { id: 1, tree: &tree };
        let div = MockNode { id: 5, tree: &tree };
        let left = XPathValue::NodeSet(vec![div, para]);
        let right = XPathValue::NodeSet(vec![para]);
        let result = evaluate(BinaryOperator::Union, left, right).unwrap();
        if let XPathValue::NodeSet(nodes) = result {
            assert_eq!(nodes, vec![para, div]);
        } else {
            panic!("expected node-set");
        }
    }

    #[test]
    fn test_relational_nodeset() {
        let tree = create_test_tree();
        let para = MockNode { id: 1, tree: &tree }; // "Hello" -> NaN
        let ns = XPathValue::NodeSet(vec![para]);
        let num = XPathValue::Number(1.0);
        assert!(!evaluate(BinaryOperator::LessThan, ns, num).unwrap().to_bool());
    }
}
