//! Entry selectors for PATCH paths such as `emails[type eq "work"]`.
//!
//! A [`Selector`] is compiled like an [`Evaluator`](super::Evaluator) but runs
//! over the entries of one [`ComplexAttribute`] and returns the ids of the
//! entries it addresses. It differs from the evaluator in two ways:
//!
//! - a comparison with a blank literal (`""`, whitespace, `null`) also
//!   selects entries that lack the sub-attribute;
//! - `not` returns its operand's entries unchanged.

use std::{collections::BTreeSet, sync::Arc};

use super::{
    compare::{CompareOp, Comparison, bind_attribute},
    error::{ScimError, ScimResult},
    filter::{FilterNode, Operator},
    resource::{ComplexAttribute, EntryId},
    schema::{AttrType, ResourceType},
};

/// A compiled entry selector.
#[derive(Debug, Clone)]
pub enum Selector {
    Presence(Arc<AttrType>),
    Arithmetic {
        cmp: Comparison,
        /// Entries without the sub-attribute match too
        lenient: bool,
    },
    Not(Box<Selector>),
    And(Vec<Selector>),
    Or(Vec<Selector>),
}

impl Selector {
    /// Compile a selector expression against `rt`.
    ///
    /// Unlike filters, a selector naming an unknown attribute is an
    /// `invalidPath` error.
    pub fn compile(node: &FilterNode, rt: &ResourceType) -> ScimResult<Self> {
        let selector = compile_node(node, rt)?;
        tracing::debug!(selector = %node, resource_type = %rt.name, "Compiled selector");
        Ok(selector)
    }

    /// Ids of the entries of `ca` this selector addresses, in entry order.
    pub fn find(&self, ca: &ComplexAttribute) -> BTreeSet<EntryId> {
        match self {
            Selector::Presence(at) => ca
                .entries()
                .iter()
                .filter(|e| e.contains(at.short_name()))
                .map(|e| e.id())
                .collect(),
            Selector::Arithmetic { cmp, lenient } => ca
                .entries()
                .iter()
                .filter(|e| match e.get(cmp.at().short_name()) {
                    Some(sa) if sa.has_values() => cmp.matches(sa),
                    _ => *lenient,
                })
                .map(|e| e.id())
                .collect(),
            Selector::Not(inner) => inner.find(ca),
            Selector::And(children) => {
                let mut found: Option<BTreeSet<EntryId>> = None;
                for child in children {
                    let ids = child.find(ca);
                    let next = match found {
                        Some(acc) => acc.intersection(&ids).copied().collect(),
                        None => ids,
                    };
                    if next.is_empty() {
                        return BTreeSet::new();
                    }
                    found = Some(next);
                }
                found.unwrap_or_default()
            }
            Selector::Or(children) => children.iter().flat_map(|c| c.find(ca)).collect(),
        }
    }

    /// Attributes compared or tested by this selector.
    pub fn attributes(&self) -> Vec<&Arc<AttrType>> {
        let mut out = Vec::new();
        self.collect_attributes(&mut out);
        out
    }

    fn collect_attributes<'a>(&'a self, out: &mut Vec<&'a Arc<AttrType>>) {
        match self {
            Selector::Presence(at) => out.push(at),
            Selector::Arithmetic { cmp, .. } => out.push(cmp.at()),
            Selector::Not(inner) => inner.collect_attributes(out),
            Selector::And(children) | Selector::Or(children) => {
                for child in children {
                    child.collect_attributes(out);
                }
            }
        }
    }
}

fn compile_node(node: &FilterNode, rt: &ResourceType) -> ScimResult<Selector> {
    match node.op {
        Operator::And | Operator::Or => {
            let children = node
                .children
                .iter()
                .map(|c| compile_node(c, rt))
                .collect::<ScimResult<Vec<_>>>()?;
            Ok(if node.op == Operator::And {
                Selector::And(children)
            } else {
                Selector::Or(children)
            })
        }
        Operator::Not => {
            let [child] = node.children.as_slice() else {
                return Err(ScimError::invalid_filter("'not' takes exactly one operand"));
            };
            Ok(Selector::Not(Box::new(compile_node(child, rt)?)))
        }
        Operator::Pr => rt
            .at_type(&node.name)
            .map(Selector::Presence)
            .ok_or_else(|| unknown_attribute(node)),
        op => {
            let Some(cmp_op) = CompareOp::from_operator(op) else {
                return Err(ScimError::invalid_filter(format!("Unexpected operator '{op}'")));
            };
            let at = bind_attribute(rt, node).ok_or_else(|| unknown_attribute(node))?;
            let literal = node.value.as_ref().ok_or_else(|| {
                ScimError::invalid_filter(format!("Operator '{op}' requires a value"))
            })?;
            Ok(Selector::Arithmetic {
                cmp: Comparison::new(at, cmp_op, literal)?,
                lenient: literal.is_blank(),
            })
        }
    }
}

fn unknown_attribute(node: &FilterNode) -> ScimError {
    ScimError::invalid_path(format!("Unknown attribute '{}' in selector", node.name))
}
