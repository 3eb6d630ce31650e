//! Compiled filter predicates over whole resources.
//!
//! [`Evaluator::compile`] turns a [`FilterNode`] into a tree of closed
//! variants; [`Evaluator::evaluate`] walks it against a [`Resource`].
//!
//! ```
//! use sparrow::scim::{Evaluator, Resource, SchemaRegistry, parse_filter};
//!
//! let registry = SchemaRegistry::builtin().unwrap();
//! let rt = registry.resource_type("User").unwrap();
//! let filter = parse_filter("userName sw \"bj\"").unwrap();
//! let evaluator = Evaluator::compile(&filter, rt).unwrap();
//!
//! let user = Resource::from_json(
//!     &registry,
//!     &serde_json::json!({
//!         "schemas": ["urn:ietf:params:scim:schemas:core:2.0:User"],
//!         "userName": "bjensen"
//!     }),
//! )
//! .unwrap();
//! assert!(evaluator.evaluate(&user));
//! ```

use std::{cmp::Reverse, sync::Arc};

use super::{
    compare::{CompareOp, Comparison, bind_attribute, is_present},
    error::{ScimError, ScimResult},
    filter::{FilterNode, Literal, Operator},
    resource::Resource,
    schema::{AttrType, ResourceType},
    selectivity::{SelectivityEstimator, annotate_weights},
};

/// A compiled filter.
#[derive(Debug, Clone)]
pub enum Evaluator {
    /// Always false: a zero-weight node or an attribute the type lacks.
    Empty,
    Presence {
        at: Arc<AttrType>,
        /// Owning complex attribute of a sub-attribute
        parent: Option<Arc<AttrType>>,
    },
    Arithmetic(Comparison),
    Not(Box<Evaluator>),
    /// Children ordered by ascending weight.
    And(Vec<Evaluator>),
    /// Children ordered by descending weight.
    Or(Vec<Evaluator>),
}

impl Evaluator {
    /// Compile `node` against the attributes of `rt`.
    ///
    /// Weights already set on the tree decide child order; see
    /// [`Evaluator::compile_weighted`] to set them first.
    ///
    /// # Errors
    ///
    /// `invalidFilter` when a literal does not fit its attribute or a node
    /// is malformed.
    pub fn compile(node: &FilterNode, rt: &ResourceType) -> ScimResult<Self> {
        let evaluator = compile_node(node, rt)?;
        tracing::debug!(filter = %node, resource_type = %rt.name, "Compiled filter");
        Ok(evaluator)
    }

    /// Annotate a copy of `node` with `estimator` weights, then compile it.
    pub fn compile_weighted(
        node: &FilterNode,
        rt: &ResourceType,
        estimator: &dyn SelectivityEstimator,
    ) -> ScimResult<Self> {
        let mut node = node.clone();
        annotate_weights(&mut node, rt, estimator);
        Self::compile(&node, rt)
    }

    pub fn evaluate(&self, rs: &Resource) -> bool {
        match self {
            Evaluator::Empty => false,
            Evaluator::Presence { at, parent } => is_present(rs, at, parent.as_deref()),
            Evaluator::Arithmetic(cmp) => cmp.matches_resource(rs),
            Evaluator::Not(inner) => !inner.evaluate(rs),
            Evaluator::And(children) => children.iter().all(|c| c.evaluate(rs)),
            Evaluator::Or(children) => children.iter().any(|c| c.evaluate(rs)),
        }
    }
}

fn compile_node(node: &FilterNode, rt: &ResourceType) -> ScimResult<Evaluator> {
    if node.weight == 0 {
        return Ok(Evaluator::Empty);
    }

    match node.op {
        Operator::And | Operator::Or => {
            let mut children: Vec<&FilterNode> = node.children.iter().collect();
            if node.op == Operator::And {
                children.sort_by_key(|c| c.weight);
            } else {
                children.sort_by_key(|c| Reverse(c.weight));
            }
            let compiled = children
                .into_iter()
                .map(|c| compile_node(c, rt))
                .collect::<ScimResult<Vec<_>>>()?;
            Ok(if node.op == Operator::And {
                Evaluator::And(compiled)
            } else {
                Evaluator::Or(compiled)
            })
        }
        Operator::Not => {
            let [child] = node.children.as_slice() else {
                return Err(ScimError::invalid_filter("'not' takes exactly one operand"));
            };
            Ok(Evaluator::Not(Box::new(compile_node(child, rt)?)))
        }
        Operator::Pr => Ok(match rt.at_type(&node.name) {
            Some(at) => presence(at),
            None => unresolved(node, rt),
        }),
        op => {
            let Some(cmp_op) = CompareOp::from_operator(op) else {
                return Err(ScimError::invalid_filter(format!("Unexpected operator '{op}'")));
            };
            let Some(at) = bind_attribute(rt, node) else {
                return Ok(unresolved(node, rt));
            };
            let literal = node.value.as_ref().ok_or_else(|| {
                ScimError::invalid_filter(format!("Operator '{op}' requires a value"))
            })?;
            Ok(match (cmp_op, literal) {
                (CompareOp::Eq, Literal::Null) => Evaluator::Not(Box::new(presence(at))),
                (CompareOp::Ne, Literal::Null) => presence(at),
                _ => Evaluator::Arithmetic(Comparison::new(at, cmp_op, literal)?),
            })
        }
    }
}

fn presence(at: Arc<AttrType>) -> Evaluator {
    Evaluator::Presence {
        parent: at.parent(),
        at,
    }
}

fn unresolved(node: &FilterNode, rt: &ResourceType) -> Evaluator {
    tracing::debug!(
        attribute = %node.name,
        resource_type = %rt.name,
        "Filter attribute does not resolve, leaf is always false"
    );
    Evaluator::Empty
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::{Value as Json, json};

    use super::*;
    use crate::scim::{
        ScimErrorType,
        filter::parse_filter,
        schema::{SCHEMA_DEVICE, SCHEMA_ENTERPRISE_USER, SCHEMA_USER, SchemaRegistry},
    };

    fn registry() -> SchemaRegistry {
        SchemaRegistry::builtin().unwrap()
    }

    fn user(body: Json) -> Resource {
        let mut body = body;
        body["schemas"] = json!([SCHEMA_USER]);
        Resource::from_json(&registry(), &body).unwrap()
    }

    fn eval(filter: &str, rs: &Resource) -> bool {
        let node = parse_filter(filter).unwrap();
        Evaluator::compile(&node, rs.resource_type()).unwrap().evaluate(rs)
    }

    fn bjensen() -> Resource {
        let mut body = json!({
            "schemas": [SCHEMA_USER, SCHEMA_ENTERPRISE_USER],
            "id": "2819c223",
            "userName": "bjensen",
            "userType": "Employee",
            "title": "Tour Guide",
            "active": true,
            "name": {"givenName": "Barbara", "familyName": "Jensen"},
            "emails": [
                {"value": "bjensen@example.com", "type": "work", "primary": true},
                {"value": "babs@jensen.org", "type": "home"}
            ],
            "meta": {"lastModified": "2011-05-13T04:42:34Z", "resourceType": "User"}
        });
        body[SCHEMA_ENTERPRISE_USER] = json!({"employeeNumber": "701984", "manager": {"value": "26118915"}});
        Resource::from_json(&registry(), &body).unwrap()
    }

    #[rstest]
    #[case("userName eq \"bjensen\"", true)]
    #[case("userName eq \"BJENSEN\"", true)]
    #[case("userName ne \"bjensen\"", false)]
    #[case("title co \"guide\"", true)]
    #[case("title sw \"tour\"", true)]
    #[case("title ew \"tour\"", false)]
    #[case("userName gt \"a\"", true)]
    #[case("userName lt \"a\"", false)]
    #[case("active eq true", true)]
    #[case("active eq false", false)]
    #[case("name.familyName eq \"jensen\"", true)]
    #[case("emails.type eq \"home\"", true)]
    #[case("emails.type eq \"other\"", false)]
    #[case("emails[type eq \"work\" and value co \"example.com\"]", true)]
    #[case("emails[type eq \"other\" and value co \"example.com\"]", false)]
    #[case("emails co \"jensen.org\"", true)]
    #[case("emails pr", true)]
    #[case("phoneNumbers pr", false)]
    #[case("nickName pr", false)]
    #[case("meta.lastModified gt \"2011-05-13T04:42:34Z\"", false)]
    #[case("meta.lastModified ge \"2011-05-13T04:42:34Z\"", true)]
    #[case("meta.lastModified lt \"2012-01-01T00:00:00Z\"", true)]
    #[case("urn:ietf:params:scim:schemas:extension:enterprise:2.0:User:employeeNumber eq \"701984\"", true)]
    #[case("employeeNumber sw \"70\"", true)]
    #[case("manager.value eq \"26118915\"", true)]
    #[case("nickName eq null", true)]
    #[case("title ne null", true)]
    #[case("title eq null", false)]
    #[case("noSuchAttribute eq \"x\"", false)]
    #[case("not (noSuchAttribute eq \"x\")", true)]
    #[case("not (userName eq \"bjensen\")", false)]
    #[case("userName eq \"bjensen\" and (title pr or nickName pr)", true)]
    #[case("userName eq \"x\" or not (active eq false)", true)]
    fn test_evaluate_user(#[case] filter: &str, #[case] expected: bool) {
        assert_eq!(eval(filter, &bjensen()), expected, "{filter}");
    }

    #[rstest]
    #[case("rackNumber eq 12", true)]
    #[case("rackNumber gt 12", false)]
    #[case("rackNumber ge 12", true)]
    #[case("rackNumber lt 13", true)]
    #[case("rackNumber co 1", false)]
    #[case("price gt 99", true)]
    #[case("price le 99.5", true)]
    #[case("price eq 99.5", true)]
    #[case("price lt 99.49", false)]
    #[case("installedDate gt \"2016-05-17T14:19:13Z\"", true)]
    #[case("installedDate eq \"2016-05-17T16:19:14+02:00\"", true)]
    #[case("repairDates eq \"2018-01-02T00:00:00Z\"", true)]
    #[case("repairDates gt \"2019-01-01T00:00:00Z\"", false)]
    #[case("serialNumber eq \"SN-001\"", true)]
    #[case("serialNumber eq \"sn-001\"", false)]
    #[case("firmware eq \"AAEC\"", true)]
    #[case("location.latitude sw \"48.\"", true)]
    fn test_evaluate_device(#[case] filter: &str, #[case] expected: bool) {
        let device = Resource::from_json(
            &registry(),
            &json!({
                "schemas": [SCHEMA_DEVICE],
                "serialNumber": "SN-001",
                "rackNumber": 12,
                "price": 99.5,
                "installedDate": "2016-05-17T14:19:14Z",
                "repairDates": ["2017-03-01T10:00:00Z", "2018-01-02T00:00:00Z"],
                "firmware": "AAEC",
                "location": {"latitude": "48.85", "longitude": "2.35"}
            }),
        )
        .unwrap();
        assert_eq!(eval(filter, &device), expected, "{filter}");
    }

    #[rstest]
    #[case("emails.value co \"example.com\"")]
    #[case("emails.type pr")]
    #[case("emails[type eq \"work\"]")]
    #[case("not (emails.display pr)")]
    fn test_evaluator_outlives_its_registry(#[case] filter: &str) {
        let evaluator = {
            let reg = registry();
            let node = parse_filter(filter).unwrap();
            Evaluator::compile(&node, reg.resource_type("User").unwrap()).unwrap()
        };
        assert!(evaluator.evaluate(&bjensen()), "{filter}");
    }

    #[test]
    fn test_example_employee_with_example_email() {
        let filter = "userType eq \"Employee\" and emails co \"example.com\"";
        let employee = user(json!({
            "userName": "a",
            "userType": "Employee",
            "emails": [{"value": "a@example.com"}]
        }));
        let manager = user(json!({
            "userName": "a",
            "userType": "Manager",
            "emails": [{"value": "a@example.com"}]
        }));
        assert!(eval(filter, &employee));
        assert!(!eval(filter, &manager));
    }

    #[test]
    fn test_case_exact_attribute_does_not_fold() {
        let rs = user(json!({"userName": "bjensen", "externalId": "bjensen"}));
        assert!(eval("userName eq \"BJENSEN\"", &rs));
        assert!(!eval("externalId eq \"BJENSEN\"", &rs));
        assert!(eval("externalId eq \"bjensen\"", &rs));
    }

    #[test]
    fn test_presence_of_empty_attribute_is_absence() {
        let with_empty = user(json!({"userName": "a", "emails": [], "nickName": null}));
        let without = user(json!({"userName": "a"}));
        for filter in ["emails pr", "nickName pr", "emails.value pr"] {
            assert_eq!(eval(filter, &with_empty), eval(filter, &without), "{filter}");
            assert!(!eval(filter, &without));
        }
    }

    #[rstest]
    #[case("userName eq \"bjensen\"", "title pr")]
    #[case("emails.type eq \"work\"", "active eq false")]
    #[case("nickName pr", "name.givenName sw \"b\"")]
    #[case("title co \"x\"", "not (userName eq \"y\")")]
    fn test_de_morgan(#[case] a: &str, #[case] b: &str) {
        let rs = bjensen();
        assert_eq!(
            eval(&format!("{a} and {b}"), &rs),
            eval(&format!("not (not ({a}) or not ({b}))"), &rs),
        );
        assert_eq!(
            eval(&format!("{a} or {b}"), &rs),
            eval(&format!("not (not ({a}) and not ({b}))"), &rs),
        );
    }

    #[test]
    fn test_child_order_never_changes_result() {
        let leaves = [
            "userName eq \"bjensen\"",
            "title pr",
            "nickName pr",
            "emails.type eq \"home\"",
        ];
        let rs = bjensen();
        for connective in ["and", "or"] {
            let forward = leaves.join(&format!(" {connective} "));
            let backward = leaves
                .iter()
                .rev()
                .copied()
                .collect::<Vec<_>>()
                .join(&format!(" {connective} "));
            assert_eq!(eval(&forward, &rs), eval(&backward, &rs), "{connective}");
        }
    }

    #[test]
    fn test_weights_order_children_stably() {
        let reg = registry();
        let rt = reg.resource_type("User").unwrap();
        let counts = |at: &AttrType, _: &FilterNode| -> i64 {
            if at.norm_name == "username" { 1 } else { 50 }
        };
        let node =
            parse_filter("title pr and nickName pr and userName eq \"a\"").unwrap();

        let Evaluator::And(children) = Evaluator::compile_weighted(&node, rt, &counts).unwrap()
        else {
            panic!("expected and");
        };
        let names: Vec<_> = children
            .iter()
            .map(|c| match c {
                Evaluator::Presence { at, .. } => at.norm_name.clone(),
                Evaluator::Arithmetic(cmp) => cmp.at().norm_name.clone(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(names, ["username", "title", "nickname"]);

        let node = parse_filter("title pr or nickName pr or userName eq \"a\"").unwrap();
        let Evaluator::Or(children) = Evaluator::compile_weighted(&node, rt, &counts).unwrap()
        else {
            panic!("expected or");
        };
        assert!(matches!(&children[2], Evaluator::Arithmetic(_)));
    }

    #[test]
    fn test_zero_weight_compiles_to_empty() {
        let reg = registry();
        let rt = reg.resource_type("User").unwrap();
        let none = |_: &AttrType, _: &FilterNode| -> i64 { 0 };
        let node = parse_filter("userName pr and title pr").unwrap();
        let evaluator = Evaluator::compile_weighted(&node, rt, &none).unwrap();
        assert!(matches!(evaluator, Evaluator::Empty));
        assert!(!evaluator.evaluate(&bjensen()));

        let node = parse_filter("noSuch pr").unwrap();
        assert!(matches!(
            Evaluator::compile(&node, rt).unwrap(),
            Evaluator::Empty
        ));
    }

    #[rstest]
    #[case("active gt \"x\"")]
    #[case("active eq \"true\"")]
    #[case("userName eq 12")]
    #[case("userName gt null")]
    #[case("meta.lastModified eq \"never\"")]
    fn test_literal_mismatch_is_invalid_filter(#[case] filter: &str) {
        let reg = registry();
        let rt = reg.resource_type("User").unwrap();
        let err = Evaluator::compile(&parse_filter(filter).unwrap(), rt).unwrap_err();
        assert_eq!(err.scim_type, Some(ScimErrorType::InvalidFilter), "{filter}");
    }

    #[test]
    fn test_compiled_evaluator_is_reusable_across_threads() {
        let reg = registry();
        let rt = reg.resource_type("User").unwrap();
        let node = parse_filter("emails.type eq \"work\"").unwrap();
        let evaluator = Arc::new(Evaluator::compile(&node, rt).unwrap());
        let rs = Arc::new(bjensen());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let evaluator = Arc::clone(&evaluator);
                let rs = Arc::clone(&rs);
                std::thread::spawn(move || evaluator.evaluate(&rs))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }
}
