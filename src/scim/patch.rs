//! SCIM 2.0 PATCH requests and path resolution.
//!
//! Implements the request shape of RFC 7644 Section 3.5.2 and resolves every
//! operation path against a resource type.
//!
//! ## Path Syntax
//!
//! ```text
//! path = [schemaURI ":"] attrPath / valuePath / subAttrPath
//! attrPath = ATTRNAME
//! subAttrPath = ATTRNAME "." ATTRNAME
//! valuePath = ATTRNAME "[" valueFilter "]" ["." ATTRNAME]
//! ```
//!
//! A path consisting only of an extension schema URI addresses the whole
//! extension object.
//!
//! ## Examples
//!
//! ```json
//! {
//!   "schemas": ["urn:ietf:params:scim:api:messages:2.0:PatchOp"],
//!   "Operations": [
//!     { "op": "replace", "path": "displayName", "value": "New Name" },
//!     { "op": "add", "path": "emails", "value": [{"type": "home", "value": "home@example.com"}] },
//!     { "op": "remove", "path": "members[value eq \"user-123\"]" }
//!   ]
//! }
//! ```

use std::{collections::BTreeSet, fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use super::{
    error::{ScimError, ScimResult},
    filter::{FilterLimits, parse_filter_with},
    resource::{EntryId, Resource},
    schema::{AttrType, ResourceType, SCHEMA_PATCH_OP},
    selector::Selector,
};

/// A SCIM PATCH request as received on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchRequest {
    /// SCIM schema URIs (must contain the PatchOp schema)
    pub schemas: Vec<String>,

    /// List of patch operations to apply
    #[serde(rename = "Operations", default)]
    pub operations: Vec<PatchOp>,
}

/// One operation of a [`PatchRequest`], unvalidated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Json>,
}

impl PatchOp {
    pub fn add(path: impl Into<String>, value: Json) -> Self {
        Self {
            op: PatchOpKind::Add.to_string(),
            path: Some(path.into()),
            value: Some(value),
        }
    }

    pub fn replace(path: impl Into<String>, value: Json) -> Self {
        Self {
            op: PatchOpKind::Replace.to_string(),
            path: Some(path.into()),
            value: Some(value),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: PatchOpKind::Remove.to_string(),
            path: Some(path.into()),
            value: None,
        }
    }
}

/// PATCH operation names, matched case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOpKind {
    Add,
    Replace,
    Remove,
}

impl FromStr for PatchOpKind {
    type Err = ScimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "add" => Ok(PatchOpKind::Add),
            "replace" => Ok(PatchOpKind::Replace),
            "remove" => Ok(PatchOpKind::Remove),
            other => Err(ScimError::bad_request(format!(
                "Unknown patch operation '{other}'"
            ))),
        }
    }
}

impl fmt::Display for PatchOpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PatchOpKind::Add => "add",
            PatchOpKind::Replace => "replace",
            PatchOpKind::Remove => "remove",
        })
    }
}

/// A validated operation with its path resolved.
#[derive(Debug, Clone)]
pub struct ParsedPatchOp {
    /// Position in the request
    pub index: usize,
    pub op: PatchOpKind,
    pub path: Option<ParsedPath>,
    pub value: Option<Json>,
}

impl PatchRequest {
    pub fn new(operations: Vec<PatchOp>) -> Self {
        Self {
            schemas: vec![SCHEMA_PATCH_OP.to_string()],
            operations,
        }
    }

    /// Deserialize and validate a request body for resources of type `rt`.
    pub fn parse(body: &str, rt: &ResourceType) -> ScimResult<Vec<ParsedPatchOp>> {
        let request: PatchRequest = serde_json::from_str(body).map_err(|e| {
            tracing::debug!(error = %e, "Failed to deserialize patch request");
            ScimError::invalid_syntax(format!("Invalid patch request: {e}"))
        })?;
        request.validate(rt, &FilterLimits::default())
    }

    /// Check the request and resolve every operation path.
    ///
    /// # Errors
    ///
    /// - `invalidSyntax` without the PatchOp schema
    /// - bad request for an empty operation list, an unknown operation or
    ///   an `add`/`replace` without a value
    /// - `noTarget` for a `remove` without a path
    /// - any error of [`resolve_path_with`]
    pub fn validate(
        &self,
        rt: &ResourceType,
        limits: &FilterLimits,
    ) -> ScimResult<Vec<ParsedPatchOp>> {
        if !self.schemas.iter().any(|s| s.eq_ignore_ascii_case(SCHEMA_PATCH_OP)) {
            return Err(ScimError::invalid_syntax(format!(
                "Patch request must use the schema {SCHEMA_PATCH_OP}"
            )));
        }
        if self.operations.is_empty() {
            return Err(ScimError::bad_request(
                "Invalid patch request, one or more operations must be present",
            ));
        }

        let parsed = self
            .operations
            .iter()
            .enumerate()
            .map(|(index, op)| parse_op(index, op, rt, limits))
            .collect::<ScimResult<Vec<_>>>();

        if let Err(err) = &parsed {
            tracing::debug!(detail = %err.detail, "Rejected patch request");
        }
        parsed
    }
}

fn parse_op(
    index: usize,
    raw: &PatchOp,
    rt: &ResourceType,
    limits: &FilterLimits,
) -> ScimResult<ParsedPatchOp> {
    let op: PatchOpKind = raw.op.parse()?;
    let path = raw.path.as_deref().map(str::trim).filter(|p| !p.is_empty());

    match op {
        PatchOpKind::Add | PatchOpKind::Replace if raw.value.is_none() => {
            return Err(ScimError::bad_request(format!(
                "Invalid patch request, missing value in operation {index}"
            )));
        }
        PatchOpKind::Remove if path.is_none() => {
            return Err(ScimError::no_target(format!(
                "Invalid patch request, missing path in operation {index}"
            )));
        }
        _ => {}
    }

    Ok(ParsedPatchOp {
        index,
        op,
        path: path.map(|p| resolve_path_with(p, rt, limits)).transpose()?,
        value: raw.value.clone(),
    })
}

/// The target of a PATCH path.
#[derive(Debug, Clone)]
pub struct ParsedPath {
    /// Addressed attribute; `None` for a whole extension container.
    pub at_type: Option<Arc<AttrType>>,
    /// Set when a sub-attribute is addressed.
    pub parent_type: Option<Arc<AttrType>>,
    /// URI of the schema owning the target
    pub schema: String,
    pub selector: Option<Selector>,
    /// Selector text including the attribute name, e.g. `emails[type eq "work"]`
    pub selector_text: Option<String>,
    pub ext_container: bool,
}

impl ParsedPath {
    /// The complex attribute whose entries a selector filters.
    pub fn container(&self) -> Option<&Arc<AttrType>> {
        self.parent_type.as_ref().or(self.at_type.as_ref())
    }

    /// Ids of the entries of `rs` this path addresses.
    ///
    /// Without a selector every entry of the container is addressed. Empty
    /// when the container is not a complex attribute or has no value.
    pub fn select(&self, rs: &Resource) -> BTreeSet<EntryId> {
        let Some(ca) = self.container().and_then(|at| rs.get_complex(at)) else {
            return BTreeSet::new();
        };
        match &self.selector {
            Some(selector) => selector.find(ca),
            None => ca.entry_ids().collect(),
        }
    }

    pub fn to_json(&self) -> Json {
        let mut obj = serde_json::Map::new();
        obj.insert("schema".into(), Json::from(self.schema.as_str()));
        if let Some(at) = &self.at_type {
            obj.insert("attribute".into(), Json::from(at.norm_name.as_str()));
        }
        if let Some(parent) = &self.parent_type {
            obj.insert("parent".into(), Json::from(parent.norm_name.as_str()));
        }
        if let Some(text) = &self.selector_text {
            obj.insert("selector".into(), Json::from(text.as_str()));
        }
        obj.insert("extContainer".into(), Json::Bool(self.ext_container));
        Json::Object(obj)
    }
}

/// Resolve a PATCH path with the default filter limits.
///
/// ```
/// use sparrow::scim::{SchemaRegistry, resolve_path};
///
/// let registry = SchemaRegistry::builtin().unwrap();
/// let user = registry.resource_type("User").unwrap();
/// let path = resolve_path("emails[type eq \"work\"].value", user).unwrap();
/// assert_eq!(path.at_type.unwrap().norm_name, "emails.value");
/// assert_eq!(path.parent_type.unwrap().norm_name, "emails");
/// assert!(path.selector.is_some());
/// ```
pub fn resolve_path(path: &str, rt: &ResourceType) -> ScimResult<ParsedPath> {
    resolve_path_with(path, rt, &FilterLimits::default())
}

/// Resolve a PATCH path against the attributes of `rt`.
///
/// # Errors
///
/// `invalidPath` for unbalanced or empty selectors, unknown schema URIs and
/// unknown attributes; `invalidFilter` when the selector does not parse.
pub fn resolve_path_with(
    path: &str,
    rt: &ResourceType,
    limits: &FilterLimits,
) -> ScimResult<ParsedPath> {
    let resolved = resolve(path, rt, limits);
    if let Err(err) = &resolved {
        tracing::debug!(path, detail = %err.detail, "Failed to resolve patch path");
    }
    resolved
}

fn resolve(path: &str, rt: &ResourceType, limits: &FilterLimits) -> ScimResult<ParsedPath> {
    let invalid = |reason: &str| {
        ScimError::invalid_path(format!("Invalid attribute path '{path}', {reason}"))
    };

    // Cut out `[...]`, keeping `attr[...]` as the selector text
    let (running, selector_text) = match path.find('[') {
        Some(0) => return Err(invalid("missing parent attribute")),
        Some(start) => {
            let end = path
                .rfind(']')
                .filter(|&end| end > start)
                .ok_or_else(|| invalid("missing ']'"))?;
            if path[start + 1..end].trim().is_empty() {
                return Err(invalid("empty selector"));
            }
            let rest = &path[end + 1..];
            if !rest.is_empty() && !rest.starts_with('.') {
                return Err(invalid("expected '.' after ']'"));
            }
            let running = format!("{}{rest}", &path[..start]);
            (running, Some(path[..=end].to_string()))
        }
        None if path.contains(']') => return Err(invalid("missing '['")),
        None => (path.to_string(), None),
    };

    if let Some(ext) = rt
        .extensions
        .iter()
        .find(|ext| ext.schema.id.eq_ignore_ascii_case(&running))
    {
        if selector_text.is_some() {
            return Err(invalid("an extension container takes no selector"));
        }
        return Ok(ParsedPath {
            at_type: None,
            parent_type: None,
            schema: ext.schema.id.clone(),
            selector: None,
            selector_text: None,
            ext_container: true,
        });
    }

    // A URI prefix scopes the lookup to that schema
    let (scope, name) = match running.rsplit_once(':') {
        Some((uri, name)) => {
            let schema = rt.schema_for(uri).ok_or_else(|| {
                ScimError::invalid_path(format!(
                    "Unknown schema URI '{uri}' in the attribute path '{path}'"
                ))
            })?;
            (Some(Arc::clone(schema)), name)
        }
        None => (None, running.as_str()),
    };
    let lookup = |name: &str| match &scope {
        Some(schema) => schema.at_type(name),
        None => rt.at_type(name),
    };

    if name.is_empty() {
        return Err(invalid("missing attribute name"));
    }

    let (parent_type, at_type) = match name.rsplit_once('.') {
        Some((parent_name, child)) => {
            if child.is_empty() {
                return Err(invalid("missing sub-attribute name"));
            }
            let parent = lookup(parent_name).ok_or_else(|| {
                ScimError::invalid_path(format!(
                    "Unknown complex attribute '{parent_name}' in the path '{path}'"
                ))
            })?;
            let at = parent.sub_attribute(child).cloned().ok_or_else(|| {
                ScimError::invalid_path(format!(
                    "Unknown attribute '{parent_name}.{child}' in the path '{path}'"
                ))
            })?;
            (Some(parent), at)
        }
        None => {
            let at = lookup(name).ok_or_else(|| {
                ScimError::invalid_path(format!("Unknown attribute '{name}' in the path '{path}'"))
            })?;
            (None, at)
        }
    };

    let selector = match &selector_text {
        Some(text) => {
            let node = parse_filter_with(text, limits)?;
            let selector = Selector::compile(&node, rt)?;
            let container = parent_type.as_ref().unwrap_or(&at_type);
            if !container.is_complex() {
                return Err(invalid("a selector requires a complex attribute"));
            }
            let foreign = selector
                .attributes()
                .into_iter()
                .find(|at| at.parent().as_deref() != Some(container.as_ref()));
            if let Some(foreign) = foreign {
                return Err(ScimError::invalid_path(format!(
                    "Selector attribute '{}' is not a sub-attribute of '{}'",
                    foreign.norm_name, container.name
                )));
            }
            Some(selector)
        }
        None => None,
    };

    Ok(ParsedPath {
        schema: at_type.schema.clone(),
        at_type: Some(at_type),
        parent_type,
        selector,
        selector_text,
        ext_container: false,
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::scim::{
        ScimErrorType,
        schema::{SCHEMA_ENTERPRISE_USER, SCHEMA_USER, SchemaRegistry},
    };

    fn registry() -> SchemaRegistry {
        SchemaRegistry::builtin().unwrap()
    }

    fn resolve_user(path: &str) -> ScimResult<ParsedPath> {
        let reg = registry();
        resolve_path(path, reg.resource_type("User").unwrap())
    }

    #[test]
    fn test_resolve_work_email_value() {
        let reg = registry();
        let rt = reg.resource_type("User").unwrap();
        let pp = resolve_path("emails[type eq \"work\" and value co \"@x.com\"].value", rt).unwrap();

        assert_eq!(pp.at_type.as_ref().unwrap().norm_name, "emails.value");
        assert_eq!(pp.parent_type.as_ref().unwrap().norm_name, "emails");
        assert_eq!(pp.schema, SCHEMA_USER);
        assert_eq!(
            pp.selector_text.as_deref(),
            Some("emails[type eq \"work\" and value co \"@x.com\"]")
        );
        assert!(!pp.ext_container);

        let rs = Resource::from_json(
            &reg,
            &json!({
                "schemas": [SCHEMA_USER],
                "userName": "a",
                "emails": [
                    {"type": "work", "value": "a@x.com"},
                    {"type": "home", "value": "b@x.com"}
                ]
            }),
        )
        .unwrap();
        let ids: Vec<_> = rs
            .get_complex(pp.container().unwrap())
            .unwrap()
            .entry_ids()
            .collect();
        assert_eq!(pp.select(&rs), BTreeSet::from([ids[0]]));
    }

    #[rstest]
    #[case("userName", "username", None, SCHEMA_USER)]
    #[case("USERNAME", "username", None, SCHEMA_USER)]
    #[case("name.givenName", "name.givenname", Some("name"), SCHEMA_USER)]
    #[case("urn:ietf:params:scim:schemas:core:2.0:User:userName", "username", None, SCHEMA_USER)]
    #[case("urn:ietf:params:scim:schemas:core:2.0:User:name.familyName", "name.familyname", Some("name"), SCHEMA_USER)]
    #[case("urn:ietf:params:scim:schemas:extension:enterprise:2.0:User:employeeNumber", "employeenumber", None, SCHEMA_ENTERPRISE_USER)]
    #[case("urn:ietf:params:scim:schemas:extension:enterprise:2.0:User:manager.value", "manager.value", Some("manager"), SCHEMA_ENTERPRISE_USER)]
    #[case("employeeNumber", "employeenumber", None, SCHEMA_ENTERPRISE_USER)]
    #[case("emails", "emails", None, SCHEMA_USER)]
    fn test_resolve_plain_paths(
        #[case] path: &str,
        #[case] at: &str,
        #[case] parent: Option<&str>,
        #[case] schema: &str,
    ) {
        let pp = resolve_user(path).unwrap();
        assert_eq!(pp.at_type.unwrap().norm_name, at);
        assert_eq!(pp.parent_type.map(|p| p.norm_name.clone()).as_deref(), parent);
        assert_eq!(pp.schema, schema);
        assert!(pp.selector.is_none());
    }

    #[test]
    fn test_resolve_extension_container() {
        let pp = resolve_user(SCHEMA_ENTERPRISE_USER).unwrap();
        assert!(pp.ext_container);
        assert!(pp.at_type.is_none());
        assert_eq!(pp.schema, SCHEMA_ENTERPRISE_USER);
    }

    #[test]
    fn test_resolve_selector_without_sub_attribute() {
        let pp = resolve_user("members[value eq \"1\"]");
        // members is a Group attribute
        assert!(pp.is_err());

        let reg = registry();
        let group = reg.resource_type("Group").unwrap();
        let pp = resolve_path("members[value eq \"2819c223\"]", group).unwrap();
        assert_eq!(pp.at_type.unwrap().norm_name, "members");
        assert!(pp.parent_type.is_none());
        assert!(pp.selector.is_some());
    }

    #[rstest]
    #[case("[type eq \"work\"]", ScimErrorType::InvalidPath)]
    #[case("emails[type eq \"work\"", ScimErrorType::InvalidPath)]
    #[case("emails]", ScimErrorType::InvalidPath)]
    #[case("emails[]", ScimErrorType::InvalidPath)]
    #[case("emails[  ].value", ScimErrorType::InvalidPath)]
    #[case("emails[type eq \"work\"]value", ScimErrorType::InvalidPath)]
    #[case("emails[type eq \"work\"] .value", ScimErrorType::InvalidPath)]
    #[case("nosuch", ScimErrorType::InvalidPath)]
    #[case("name.nosuch", ScimErrorType::InvalidPath)]
    #[case("nosuch.value", ScimErrorType::InvalidPath)]
    #[case("name.", ScimErrorType::InvalidPath)]
    #[case("urn:example:unknown:Thing:attr", ScimErrorType::InvalidPath)]
    #[case("urn:ietf:params:scim:schemas:core:2.0:User:", ScimErrorType::InvalidPath)]
    #[case("emails[nosuch eq \"x\"]", ScimErrorType::InvalidPath)]
    #[case("userName[value eq \"x\"]", ScimErrorType::InvalidPath)]
    #[case("emails[type eq \"work\" and]", ScimErrorType::InvalidFilter)]
    #[case("emails[type eq \"work]", ScimErrorType::InvalidFilter)]
    #[case("emails[type eq \"work\" and name.givenName eq \"x\"]", ScimErrorType::InvalidPath)]
    fn test_resolve_errors(#[case] path: &str, #[case] expected: ScimErrorType) {
        let err = resolve_user(path).unwrap_err();
        assert_eq!(err.status, "400");
        assert_eq!(err.scim_type, Some(expected), "{path}: {}", err.detail);
    }

    #[test]
    fn test_text_glued_to_selector_is_rejected() {
        let err = resolve_user("emails[type eq \"work\"]value").unwrap_err();
        assert!(err.detail.contains("expected '.' after ']'"), "{}", err.detail);
        assert!(resolve_user("emails[type eq \"work\"].value").is_ok());
    }

    #[test]
    fn test_path_without_selector_selects_all_entries() {
        let reg = registry();
        let rs = Resource::from_json(
            &reg,
            &json!({
                "schemas": [SCHEMA_USER],
                "userName": "a",
                "emails": [{"value": "a@x.com"}, {"value": "b@x.com"}]
            }),
        )
        .unwrap();
        assert_eq!(resolve_user("emails.value").unwrap().select(&rs).len(), 2);
        assert!(resolve_user("phoneNumbers").unwrap().select(&rs).is_empty());
        assert!(resolve_user("userName").unwrap().select(&rs).is_empty());
    }

    #[test]
    fn test_parse_patch_request() {
        let reg = registry();
        let rt = reg.resource_type("User").unwrap();
        let body = json!({
            "schemas": [SCHEMA_PATCH_OP],
            "Operations": [
                {"op": "Replace", "path": "displayName", "value": "New Name"},
                {"op": "add", "value": {"nickName": "Babs"}},
                {"op": " REMOVE ", "path": "emails[type eq \"home\"]"}
            ]
        });
        let ops = PatchRequest::parse(&body.to_string(), rt).unwrap();

        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].op, PatchOpKind::Replace);
        assert_eq!(
            ops[0].path.as_ref().unwrap().at_type.as_ref().unwrap().norm_name,
            "displayname"
        );
        assert_eq!(ops[1].op, PatchOpKind::Add);
        assert!(ops[1].path.is_none());
        assert_eq!(ops[2].op, PatchOpKind::Remove);
        assert_eq!(ops[2].index, 2);
        assert!(ops[2].path.as_ref().unwrap().selector.is_some());
    }

    #[rstest]
    #[case(json!({"Operations": [{"op": "remove", "path": "title"}]}), None)]
    #[case(json!({"schemas": [SCHEMA_PATCH_OP], "Operations": []}), None)]
    #[case(json!({"schemas": [SCHEMA_PATCH_OP]}), None)]
    #[case(json!({"schemas": [SCHEMA_PATCH_OP], "Operations": [{"op": "remove"}]}), Some(ScimErrorType::NoTarget))]
    #[case(json!({"schemas": [SCHEMA_PATCH_OP], "Operations": [{"op": "remove", "path": "  "}]}), Some(ScimErrorType::NoTarget))]
    #[case(json!({"schemas": [SCHEMA_PATCH_OP], "Operations": [{"op": "add", "path": "title"}]}), None)]
    #[case(json!({"schemas": [SCHEMA_PATCH_OP], "Operations": [{"op": "replace", "path": "title", "value": null}]}), None)]
    #[case(json!({"schemas": [SCHEMA_PATCH_OP], "Operations": [{"op": "move", "path": "title"}]}), None)]
    #[case(json!({"schemas": [SCHEMA_PATCH_OP], "Operations": [{"op": "remove", "path": "nosuch"}]}), Some(ScimErrorType::InvalidPath))]
    fn test_patch_request_errors(
        #[case] body: Json,
        #[case] scim_type: Option<ScimErrorType>,
    ) {
        let reg = registry();
        let rt = reg.resource_type("User").unwrap();
        let err = PatchRequest::parse(&body.to_string(), rt).unwrap_err();
        assert_eq!(err.status, "400");
        if scim_type.is_some() {
            assert_eq!(err.scim_type, scim_type);
        }
    }

    #[test]
    fn test_patch_request_malformed_json() {
        let reg = registry();
        let rt = reg.resource_type("User").unwrap();
        let err = PatchRequest::parse("{not json", rt).unwrap_err();
        assert_eq!(err.scim_type, Some(ScimErrorType::InvalidSyntax));
    }

    #[test]
    fn test_patch_request_serialization() {
        let request = PatchRequest::new(vec![
            PatchOp::replace("displayName", json!("Jane")),
            PatchOp::remove("emails[type eq \"home\"]"),
        ]);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            json!({
                "schemas": [SCHEMA_PATCH_OP],
                "Operations": [
                    {"op": "replace", "path": "displayName", "value": "Jane"},
                    {"op": "remove", "path": "emails[type eq \"home\"]"}
                ]
            })
        );
    }

    #[test]
    fn test_parsed_path_to_json() {
        let pp = resolve_user("emails[type eq \"work\"].value").unwrap();
        assert_eq!(
            pp.to_json(),
            json!({
                "schema": SCHEMA_USER,
                "attribute": "emails.value",
                "parent": "emails",
                "selector": "emails[type eq \"work\"]",
                "extContainer": false
            })
        );
    }
}
