//! SCIM 2.0 resource core
//!
//! Schema-typed resources plus the two engines that work on them: the filter
//! language (RFC 7644 Section 3.4.2.2) and PATCH path resolution (RFC 7644
//! Section 3.5.2).
//!
//! ## RFC References
//!
//! - RFC 7643: SCIM Core Schema
//! - RFC 7644: SCIM Protocol
//!
//! ## Module Structure
//!
//! - [`schema`]: schema definitions, compiled attribute types and the registry
//! - [`value`] / [`resource`]: typed values and the in-memory resource model
//! - [`filter`]: filter expression parser
//! - [`selectivity`]: weights that order sibling predicates
//! - [`evaluator`]: filters compiled against whole resources
//! - [`selector`]: PATCH selectors compiled against complex attribute entries
//! - [`patch`]: PATCH requests and path resolution
//! - [`error`]: SCIM error responses per RFC 7644
//!
//! Every compiled artifact is immutable and can be shared across threads.

pub mod compare;
pub mod error;
pub mod evaluator;
pub mod filter;
pub mod patch;
pub mod resource;
pub mod schema;
pub mod selectivity;
pub mod selector;
pub mod value;

pub use error::*;
pub use evaluator::Evaluator;
pub use filter::{
    FilterLimits, FilterNode, FilterParseError, Literal, Operator, parse_filter, parse_filter_with,
};
pub use patch::{
    ParsedPatchOp, ParsedPath, PatchOp, PatchOpKind, PatchRequest, resolve_path, resolve_path_with,
};
pub use resource::{AttrGroup, ComplexAttribute, EntryId, Resource, SimpleAttribute, split_attr_csv};
pub use schema::{AttrKind, AttrType, ResourceType, Schema, SchemaDefinitions, SchemaRegistry};
pub use selectivity::{FullScan, SelectivityEstimator, annotate_weights};
pub use selector::Selector;
pub use value::{Value, ValueError};
