//! Typed comparison shared by the evaluator and the patch selector.
//!
//! A [`Comparison`] binds a filter leaf to its attribute and coerces the
//! literal to the attribute's kind once, at compile time. Matching a value
//! is then a plain typed comparison.

use std::{cmp::Ordering, sync::Arc};

use super::{
    error::{ScimError, ScimResult},
    filter::{FilterNode, Literal, Operator},
    resource::{Resource, SimpleAttribute},
    schema::{AttrKind, AttrType, ResourceType},
    value::{Value, parse_datetime},
};

/// Resolve the attribute a leaf refers to.
///
/// A comparison naming a complex attribute compares its `value`
/// sub-attribute (`emails co "x"` is `emails.value co "x"`).
pub(crate) fn bind_attribute(rt: &ResourceType, node: &FilterNode) -> Option<Arc<AttrType>> {
    let at = rt.at_type(&node.name)?;
    if at.is_complex() && node.op != Operator::Pr {
        return at.sub_attribute("value").cloned();
    }
    Some(at)
}

/// Comparison operators of an attribute leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Co,
    Sw,
    Ew,
    Gt,
    Lt,
    Ge,
    Le,
}

impl CompareOp {
    pub fn from_operator(op: Operator) -> Option<Self> {
        match op {
            Operator::Eq => Some(CompareOp::Eq),
            Operator::Ne => Some(CompareOp::Ne),
            Operator::Co => Some(CompareOp::Co),
            Operator::Sw => Some(CompareOp::Sw),
            Operator::Ew => Some(CompareOp::Ew),
            Operator::Gt => Some(CompareOp::Gt),
            Operator::Lt => Some(CompareOp::Lt),
            Operator::Ge => Some(CompareOp::Ge),
            Operator::Le => Some(CompareOp::Le),
            Operator::And | Operator::Or | Operator::Not | Operator::Pr => None,
        }
    }

    fn holds(self, ord: Option<Ordering>) -> bool {
        match (self, ord) {
            (CompareOp::Ne, None) => true,
            (_, None) => false,
            (CompareOp::Eq, Some(o)) => o == Ordering::Equal,
            (CompareOp::Ne, Some(o)) => o != Ordering::Equal,
            (CompareOp::Gt, Some(o)) => o == Ordering::Greater,
            (CompareOp::Lt, Some(o)) => o == Ordering::Less,
            (CompareOp::Ge, Some(o)) => o != Ordering::Less,
            (CompareOp::Le, Some(o)) => o != Ordering::Greater,
            (CompareOp::Co | CompareOp::Sw | CompareOp::Ew, Some(_)) => false,
        }
    }
}

/// A literal coerced to the kind of the attribute it is compared with.
///
/// Strings are already folded to lower case unless the attribute is
/// case-exact; dateTimes are epoch milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Str(String),
    Int(i64),
    Decimal(f64),
    Bool(bool),
    Null,
}

/// A compiled `attr op literal` leaf.
///
/// The parent of a sub-attribute is held strongly so the comparison keeps
/// working after the registry it was compiled against is dropped.
#[derive(Debug, Clone)]
pub struct Comparison {
    at: Arc<AttrType>,
    parent: Option<Arc<AttrType>>,
    op: CompareOp,
    operand: Operand,
}

impl Comparison {
    /// Fails with `invalidFilter` when the literal does not fit the attribute.
    pub fn new(at: Arc<AttrType>, op: CompareOp, literal: &Literal) -> ScimResult<Self> {
        let mismatch = || {
            ScimError::invalid_filter(format!(
                "Value {literal} cannot be compared with {} attribute '{}'",
                at.kind, at.name
            ))
        };
        let fold = |s: &str| {
            if at.case_exact {
                s.to_string()
            } else {
                s.to_lowercase()
            }
        };

        let operand = match (at.kind, literal) {
            (_, Literal::Null) if matches!(op, CompareOp::Eq | CompareOp::Ne) => Operand::Null,
            (_, Literal::Null) => {
                return Err(ScimError::invalid_filter(format!(
                    "Operator '{}' does not accept null",
                    Operator::from(op)
                )));
            }
            (
                AttrKind::String | AttrKind::Reference | AttrKind::Binary,
                Literal::Str(s) | Literal::DateTime { raw: s, .. },
            ) => Operand::Str(fold(s)),
            (AttrKind::Boolean, Literal::Bool(b)) => Operand::Bool(*b),
            (AttrKind::Integer, Literal::Int(i)) => Operand::Int(*i),
            (AttrKind::Decimal, Literal::Decimal(d)) => Operand::Decimal(*d),
            (AttrKind::Decimal, Literal::Int(i)) => Operand::Decimal(*i as f64),
            (AttrKind::DateTime, Literal::DateTime { millis, .. }) => Operand::Int(*millis),
            (AttrKind::DateTime, Literal::Str(s)) => {
                Operand::Int(parse_datetime(s).ok_or_else(mismatch)?)
            }
            _ => return Err(mismatch()),
        };

        Ok(Self {
            parent: at.parent(),
            at,
            op,
            operand,
        })
    }

    pub fn at(&self) -> &Arc<AttrType> {
        &self.at
    }

    pub fn op(&self) -> CompareOp {
        self.op
    }

    pub fn operand(&self) -> &Operand {
        &self.operand
    }

    /// Whether any value of `sa` satisfies the comparison.
    pub fn matches(&self, sa: &SimpleAttribute) -> bool {
        sa.values().iter().any(|v| self.matches_value(v))
    }

    pub fn matches_value(&self, value: &Value) -> bool {
        let op = self.op;
        match (&self.operand, value) {
            (Operand::Null, _) => op == CompareOp::Ne,
            (Operand::Str(expected), Value::Str(actual)) => {
                let actual = if self.at.case_exact {
                    actual.clone()
                } else {
                    actual.to_lowercase()
                };
                match op {
                    CompareOp::Co => actual.contains(expected.as_str()),
                    CompareOp::Sw => actual.starts_with(expected.as_str()),
                    CompareOp::Ew => actual.ends_with(expected.as_str()),
                    _ => op.holds(Some(actual.as_str().cmp(expected.as_str()))),
                }
            }
            (Operand::Int(expected), Value::Int(actual) | Value::DateTime(actual)) => {
                op.holds(Some(actual.cmp(expected)))
            }
            (Operand::Decimal(expected), Value::Decimal(actual)) => {
                op.holds(actual.partial_cmp(expected))
            }
            (Operand::Bool(expected), Value::Bool(actual)) => match op {
                CompareOp::Eq => actual == expected,
                CompareOp::Ne => actual != expected,
                _ => false,
            },
            _ => false,
        }
    }

    /// Evaluate against a whole resource.
    ///
    /// For a sub-attribute every entry of the parent is tried and any match wins.
    pub fn matches_resource(&self, rs: &Resource) -> bool {
        match &self.parent {
            Some(parent) => rs.get_complex(parent).is_some_and(|ca| {
                ca.entries()
                    .iter()
                    .filter_map(|entry| entry.get(self.at.short_name()))
                    .any(|sa| self.matches(sa))
            }),
            None => rs.get_simple(&self.at).is_some_and(|sa| self.matches(sa)),
        }
    }
}

impl From<CompareOp> for Operator {
    fn from(op: CompareOp) -> Self {
        match op {
            CompareOp::Eq => Operator::Eq,
            CompareOp::Ne => Operator::Ne,
            CompareOp::Co => Operator::Co,
            CompareOp::Sw => Operator::Sw,
            CompareOp::Ew => Operator::Ew,
            CompareOp::Gt => Operator::Gt,
            CompareOp::Lt => Operator::Lt,
            CompareOp::Ge => Operator::Ge,
            CompareOp::Le => Operator::Le,
        }
    }
}

/// Whether `at` has at least one value on `rs`.
///
/// `parent` is the complex attribute owning `at`, resolved by the caller.
pub fn is_present(rs: &Resource, at: &AttrType, parent: Option<&AttrType>) -> bool {
    match parent {
        Some(parent) => rs
            .get_complex(parent)
            .is_some_and(|ca| ca.entries().iter().any(|e| e.contains(at.short_name()))),
        None => rs.get(at).is_some_and(|attr| attr.has_values()),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::scim::schema::SchemaRegistry;

    fn at(rt: &str, path: &str) -> Arc<AttrType> {
        SchemaRegistry::builtin()
            .unwrap()
            .resource_type(rt)
            .unwrap()
            .at_type(path)
            .unwrap()
    }

    fn check(rt: &str, path: &str, op: CompareOp, literal: Literal, value: Value) -> bool {
        Comparison::new(at(rt, path), op, &literal)
            .unwrap()
            .matches_value(&value)
    }

    fn s(v: &str) -> Literal {
        Literal::Str(v.to_string())
    }

    #[rstest]
    #[case(CompareOp::Eq, "bjensen", true)]
    #[case(CompareOp::Eq, "BJENSEN", true)]
    #[case(CompareOp::Ne, "BJENSEN", false)]
    #[case(CompareOp::Co, "JEN", true)]
    #[case(CompareOp::Sw, "bj", true)]
    #[case(CompareOp::Ew, "SEN", true)]
    #[case(CompareOp::Ew, "bj", false)]
    #[case(CompareOp::Gt, "a", true)]
    #[case(CompareOp::Lt, "a", false)]
    #[case(CompareOp::Ge, "bjensen", true)]
    #[case(CompareOp::Le, "bjensen", true)]
    fn test_case_insensitive_string(#[case] op: CompareOp, #[case] lit: &str, #[case] expected: bool) {
        assert_eq!(
            check("User", "userName", op, s(lit), Value::from("bjensen")),
            expected
        );
    }

    #[test]
    fn test_case_exact_string() {
        assert!(check("User", "id", CompareOp::Eq, s("AbC"), Value::from("AbC")));
        assert!(!check("User", "id", CompareOp::Eq, s("abc"), Value::from("AbC")));
        assert!(!check("Device", "serialNumber", CompareOp::Eq, s("SN-1"), Value::from("sn-1")));
        assert!(check("Device", "firmware", CompareOp::Co, s("QE"), Value::from("AAQEBA")));
    }

    #[rstest]
    #[case(CompareOp::Eq, 5, true)]
    #[case(CompareOp::Ne, 5, false)]
    #[case(CompareOp::Gt, 4, true)]
    #[case(CompareOp::Lt, 4, false)]
    #[case(CompareOp::Ge, 5, true)]
    #[case(CompareOp::Le, 6, true)]
    #[case(CompareOp::Co, 5, false)]
    fn test_integer(#[case] op: CompareOp, #[case] lit: i64, #[case] expected: bool) {
        assert_eq!(
            check("Device", "rackNumber", op, Literal::Int(lit), Value::Int(5)),
            expected
        );
    }

    #[rstest]
    #[case(CompareOp::Eq, Literal::Decimal(9.5), true)]
    #[case(CompareOp::Gt, Literal::Int(9), true)]
    #[case(CompareOp::Lt, Literal::Decimal(9.25), false)]
    #[case(CompareOp::Sw, Literal::Decimal(9.5), false)]
    fn test_decimal(#[case] op: CompareOp, #[case] lit: Literal, #[case] expected: bool) {
        assert_eq!(
            check("Device", "price", op, lit, Value::Decimal(9.5)),
            expected
        );
    }

    #[test]
    fn test_datetime_compares_as_millis() {
        let installed = Value::DateTime(parse_datetime("2016-05-17T14:19:14Z").unwrap());
        let lit = |s: &str| Literal::DateTime {
            millis: parse_datetime(s).unwrap(),
            raw: s.to_string(),
        };
        assert!(check("Device", "installedDate", CompareOp::Gt, lit("2016-01-01T00:00:00Z"), installed.clone()));
        assert!(check("Device", "installedDate", CompareOp::Eq, lit("2016-05-17T16:19:14+02:00"), installed.clone()));
        assert!(!check("Device", "installedDate", CompareOp::Lt, lit("2016-05-17T14:19:14Z"), installed));
    }

    #[rstest]
    #[case(CompareOp::Eq, true, true)]
    #[case(CompareOp::Ne, true, false)]
    #[case(CompareOp::Gt, false, false)]
    #[case(CompareOp::Co, true, false)]
    fn test_boolean_only_equality(#[case] op: CompareOp, #[case] lit: bool, #[case] expected: bool) {
        assert_eq!(
            check("User", "active", op, Literal::Bool(lit), Value::Bool(true)),
            expected
        );
    }

    #[test]
    fn test_datetime_literal_on_string_attribute_uses_raw_text() {
        assert!(check(
            "User",
            "title",
            CompareOp::Eq,
            Literal::DateTime { millis: 0, raw: "1970-01-01T00:00:00Z".into() },
            Value::from("1970-01-01t00:00:00z"),
        ));
    }

    #[rstest]
    #[case("User", "active", CompareOp::Gt, s("x"))]
    #[case("User", "userName", CompareOp::Eq, Literal::Int(1))]
    #[case("Device", "rackNumber", CompareOp::Eq, Literal::Decimal(1.5))]
    #[case("Device", "installedDate", CompareOp::Eq, s("not a date"))]
    #[case("User", "userName", CompareOp::Co, Literal::Null)]
    fn test_literal_mismatch_is_invalid_filter(
        #[case] rt: &str,
        #[case] path: &str,
        #[case] op: CompareOp,
        #[case] literal: Literal,
    ) {
        let err = Comparison::new(at(rt, path), op, &literal).unwrap_err();
        assert_eq!(err.scim_type, Some(crate::scim::ScimErrorType::InvalidFilter));
    }

    #[test]
    fn test_null_operand() {
        assert!(!check("User", "title", CompareOp::Eq, Literal::Null, Value::from("x")));
        assert!(check("User", "title", CompareOp::Ne, Literal::Null, Value::from("x")));
    }

    #[test]
    fn test_bind_attribute_uses_value_of_complex() {
        let reg = SchemaRegistry::builtin().unwrap();
        let rt = reg.resource_type("User").unwrap();
        let node = crate::scim::filter::parse_filter("emails co \"x\"").unwrap();
        assert_eq!(bind_attribute(rt, &node).unwrap().norm_name, "emails.value");

        let node = crate::scim::filter::parse_filter("emails pr").unwrap();
        assert_eq!(bind_attribute(rt, &node).unwrap().norm_name, "emails");
    }
}
