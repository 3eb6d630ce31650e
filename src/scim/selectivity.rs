//! Selectivity weights for filter nodes.
//!
//! A node's weight estimates how many resources it matches. The evaluator
//! compiles a node of weight zero to a constant `false`, checks `and`
//! children cheapest first and `or` children most likely first.
//! Nodes nobody annotated keep [`UNKNOWN_WEIGHT`](super::filter::UNKNOWN_WEIGHT).

use super::{
    compare::bind_attribute,
    filter::{FilterNode, Operator},
    schema::{AttrType, ResourceType},
};

/// Estimates the number of resources matching one attribute leaf.
///
/// Storage layers with secondary indices implement this with index key
/// counts. Closures of the same shape implement it too.
pub trait SelectivityEstimator {
    /// `node` is a comparison or presence leaf whose attribute resolved to `at`.
    fn estimate(&self, at: &AttrType, node: &FilterNode) -> i64;
}

impl<F> SelectivityEstimator for F
where
    F: Fn(&AttrType, &FilterNode) -> i64,
{
    fn estimate(&self, at: &AttrType, node: &FilterNode) -> i64 {
        self(at, node)
    }
}

/// Estimator without index knowledge: every resolvable leaf may match everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullScan;

impl SelectivityEstimator for FullScan {
    fn estimate(&self, _at: &AttrType, _node: &FilterNode) -> i64 {
        i64::MAX
    }
}

/// Set the weight of `node` and all of its descendants; returns the root weight.
///
/// Leaves naming an attribute unknown to `rt` weigh zero, `ne` and `not`
/// weigh `i64::MAX`, `and` takes the smallest child weight and `or` the
/// saturating sum. Negative estimates count as `i64::MAX`.
pub fn annotate_weights(
    node: &mut FilterNode,
    rt: &ResourceType,
    estimator: &dyn SelectivityEstimator,
) -> i64 {
    let weight = match node.op {
        Operator::And => node
            .children
            .iter_mut()
            .map(|child| annotate_weights(child, rt, estimator))
            .fold(i64::MAX, i64::min),
        Operator::Or => node
            .children
            .iter_mut()
            .map(|child| annotate_weights(child, rt, estimator))
            .fold(0, i64::saturating_add),
        Operator::Not => {
            for child in &mut node.children {
                annotate_weights(child, rt, estimator);
            }
            i64::MAX
        }
        op => match bind_attribute(rt, node) {
            None => 0,
            Some(_) if op == Operator::Ne => i64::MAX,
            Some(at) => estimator.estimate(&at, node),
        },
    };

    node.weight = if weight < 0 { i64::MAX } else { weight };
    tracing::trace!(filter = %node, weight = node.weight, "Annotated filter weight");
    node.weight
}
