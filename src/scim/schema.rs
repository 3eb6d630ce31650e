//! SCIM 2.0 schema definitions and the compiled schema registry.
//!
//! Definitions ([`SchemaDefinition`], [`SchemaAttribute`],
//! [`ResourceTypeDefinition`]) are the serde shapes of RFC 7643 Section 7 and 6.
//! [`SchemaDefinitions::compile`] turns them into an immutable
//! [`SchemaRegistry`] of [`AttrType`] trees which the resource model, the
//! filter evaluator and the PATCH path resolver consume.

use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, Weak},
};

use serde::{Deserialize, Serialize};

// =============================================================================
// Schema URIs
// =============================================================================

/// SCIM Core User schema URI
pub const SCHEMA_USER: &str = "urn:ietf:params:scim:schemas:core:2.0:User";

/// SCIM Core Group schema URI
pub const SCHEMA_GROUP: &str = "urn:ietf:params:scim:schemas:core:2.0:Group";

/// SCIM Enterprise User extension schema URI
pub const SCHEMA_ENTERPRISE_USER: &str =
    "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User";

/// Device schema URI
pub const SCHEMA_DEVICE: &str = "urn:sparrow:params:scim:schemas:core:2.0:Device";

/// SCIM Error schema URI
pub const SCHEMA_ERROR: &str = "urn:ietf:params:scim:api:messages:2.0:Error";

/// SCIM PatchOp schema URI
pub const SCHEMA_PATCH_OP: &str = "urn:ietf:params:scim:api:messages:2.0:PatchOp";

// =============================================================================
// Definition types (RFC 7643 Section 7)
// =============================================================================

/// SCIM Schema definition as found in `/Schemas` documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDefinition {
    /// Schema URI (e.g., "urn:ietf:params:scim:schemas:core:2.0:User")
    pub id: String,

    /// Human-readable name
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Attribute definitions
    pub attributes: Vec<SchemaAttribute>,
}

/// SCIM attribute definition within a schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaAttribute {
    /// Attribute name
    pub name: String,

    /// Attribute data type
    #[serde(rename = "type")]
    pub attr_type: AttrKind,

    #[serde(default)]
    pub multi_valued: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub required: bool,

    /// Whether string comparison is case-sensitive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_exact: Option<bool>,

    #[serde(default)]
    pub mutability: Mutability,

    #[serde(default)]
    pub returned: Returned,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uniqueness: Option<Uniqueness>,

    /// Sub-attributes for complex types
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_attributes: Vec<SchemaAttribute>,
}

impl SchemaAttribute {
    /// Create a single-valued attribute of the given kind
    pub fn new(name: &str, kind: AttrKind) -> Self {
        Self {
            name: name.to_string(),
            attr_type: kind,
            multi_valued: false,
            description: None,
            required: false,
            case_exact: None,
            mutability: Mutability::ReadWrite,
            returned: Returned::Default,
            uniqueness: None,
            sub_attributes: Vec::new(),
        }
    }

    /// Create a string attribute
    pub fn string(name: &str) -> Self {
        Self::new(name, AttrKind::String)
    }

    /// Create a boolean attribute
    pub fn boolean(name: &str) -> Self {
        Self::new(name, AttrKind::Boolean)
    }

    /// Create a single-valued complex attribute
    pub fn complex(name: &str, sub_attributes: Vec<SchemaAttribute>) -> Self {
        Self {
            sub_attributes,
            ..Self::new(name, AttrKind::Complex)
        }
    }

    /// Create a multi-valued complex attribute
    pub fn multi_valued(name: &str, sub_attributes: Vec<SchemaAttribute>) -> Self {
        Self::complex(name, sub_attributes).plural()
    }

    pub fn plural(mut self) -> Self {
        self.multi_valued = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn case_exact(mut self) -> Self {
        self.case_exact = Some(true);
        self
    }

    pub fn with_mutability(mut self, mutability: Mutability) -> Self {
        self.mutability = mutability;
        self
    }

    pub fn with_returned(mut self, returned: Returned) -> Self {
        self.returned = returned;
        self
    }

    pub fn unique(mut self) -> Self {
        self.uniqueness = Some(Uniqueness::Server);
        self
    }
}

/// Resource type definition as found in `/ResourceTypes` documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTypeDefinition {
    /// Resource type identifier (e.g., "User")
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Endpoint path (e.g., "/Users")
    pub endpoint: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Primary schema URI for this resource type
    pub schema: String,

    /// Schema extensions supported
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schema_extensions: Vec<SchemaExtension>,
}

/// Schema extension reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaExtension {
    /// Schema URI of the extension
    pub schema: String,
    /// Whether the extension is required
    #[serde(default)]
    pub required: bool,
}

/// SCIM attribute data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttrKind {
    String,
    Boolean,
    Decimal,
    Integer,
    DateTime,
    Reference,
    Complex,
    Binary,
}

impl fmt::Display for AttrKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttrKind::String => "string",
            AttrKind::Boolean => "boolean",
            AttrKind::Decimal => "decimal",
            AttrKind::Integer => "integer",
            AttrKind::DateTime => "dateTime",
            AttrKind::Reference => "reference",
            AttrKind::Complex => "complex",
            AttrKind::Binary => "binary",
        };
        f.write_str(name)
    }
}

/// SCIM attribute mutability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mutability {
    ReadOnly,
    #[default]
    ReadWrite,
    Immutable,
    WriteOnly,
}

/// SCIM attribute return behavior
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Returned {
    Always,
    Never,
    #[default]
    Default,
    Request,
}

/// SCIM attribute uniqueness constraint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Uniqueness {
    #[default]
    None,
    Server,
    Global,
}

// =============================================================================
// Compiled types
// =============================================================================

/// Errors raised while loading or compiling schema definitions.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Failed to read schema file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse schema file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Duplicate schema '{0}'")]
    DuplicateSchema(String),

    #[error("Duplicate resource type '{0}'")]
    DuplicateResourceType(String),

    #[error("Invalid attribute '{attribute}' in schema '{schema}': {reason}")]
    InvalidAttribute {
        schema: String,
        attribute: String,
        reason: String,
    },

    #[error("Resource type '{resource_type}' references unknown schema '{schema}'")]
    UnknownSchema {
        resource_type: String,
        schema: String,
    },
}

/// Compiled, immutable definition of one attribute or sub-attribute.
///
/// Sub-attributes keep a weak link to their parent so that a filter on
/// `emails.value` can find out that `emails` is multi-valued.
pub struct AttrType {
    /// Name in its schema-declared case
    pub name: String,
    /// Lowercase name, `parent.child` for sub-attributes
    pub norm_name: String,
    pub kind: AttrKind,
    pub multi_valued: bool,
    pub case_exact: bool,
    pub required: bool,
    pub mutability: Mutability,
    pub returned: Returned,
    pub uniqueness: Uniqueness,
    /// URI of the owning schema
    pub schema: String,
    parent: Weak<AttrType>,
    sub_attributes: Vec<Arc<AttrType>>,
}

impl AttrType {
    pub fn parent(&self) -> Option<Arc<AttrType>> {
        self.parent.upgrade()
    }

    pub fn is_complex(&self) -> bool {
        self.kind == AttrKind::Complex
    }

    /// Whether this is a sub-attribute of a multi-valued complex attribute.
    pub fn is_under_multi_valued(&self) -> bool {
        self.parent().is_some_and(|p| p.multi_valued)
    }

    /// Lowercase name without the parent prefix.
    pub fn short_name(&self) -> &str {
        match self.norm_name.rsplit_once('.') {
            Some((_, child)) => child,
            None => &self.norm_name,
        }
    }

    /// Sub-attributes in declaration order.
    pub fn sub_attributes(&self) -> &[Arc<AttrType>] {
        &self.sub_attributes
    }

    /// Case-insensitive sub-attribute lookup.
    pub fn sub_attribute(&self, name: &str) -> Option<&Arc<AttrType>> {
        self.sub_attributes
            .iter()
            .find(|sa| sa.name.eq_ignore_ascii_case(name))
    }

    fn build(def: &SchemaAttribute, schema: &str, parent: Option<(&Weak<AttrType>, &str)>) -> Arc<AttrType> {
        let lower = def.name.to_ascii_lowercase();
        let norm_name = match parent {
            Some((_, parent_norm)) => format!("{parent_norm}.{lower}"),
            None => lower,
        };
        let case_exact = match def.attr_type {
            AttrKind::Binary | AttrKind::Reference => true,
            _ => def.case_exact.unwrap_or(false),
        };

        Arc::new_cyclic(|me| {
            let mut subs: Vec<SchemaAttribute> = def.sub_attributes.clone();
            if def.attr_type == AttrKind::Complex && def.multi_valued {
                for default in default_sub_attributes() {
                    if !subs.iter().any(|s| s.name.eq_ignore_ascii_case(&default.name)) {
                        subs.push(default);
                    }
                }
            }
            let sub_attributes = subs
                .iter()
                .map(|sa| AttrType::build(sa, schema, Some((me, norm_name.as_str()))))
                .collect();

            AttrType {
                name: def.name.clone(),
                norm_name: norm_name.clone(),
                kind: def.attr_type,
                multi_valued: def.multi_valued,
                case_exact,
                required: def.required,
                mutability: def.mutability,
                returned: def.returned,
                uniqueness: def.uniqueness.unwrap_or_default(),
                schema: schema.to_string(),
                parent: parent.map(|(w, _)| w.clone()).unwrap_or_default(),
                sub_attributes,
            }
        })
    }
}

impl fmt::Debug for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttrType")
            .field("norm_name", &self.norm_name)
            .field("kind", &self.kind)
            .field("multi_valued", &self.multi_valued)
            .field("case_exact", &self.case_exact)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl PartialEq for AttrType {
    fn eq(&self, other: &Self) -> bool {
        self.schema == other.schema && self.norm_name == other.norm_name
    }
}

impl Eq for AttrType {}

/// Sub-attributes every multi-valued complex attribute carries (RFC 7643 Section 2.4).
fn default_sub_attributes() -> [SchemaAttribute; 5] {
    [
        SchemaAttribute::string("type"),
        SchemaAttribute::boolean("primary"),
        SchemaAttribute::string("display").with_mutability(Mutability::Immutable),
        SchemaAttribute::string("value"),
        SchemaAttribute::new("$ref", AttrKind::Reference),
    ]
}

/// Attributes every resource carries in its main schema (RFC 7643 Section 3.1).
fn common_attributes() -> Vec<SchemaAttribute> {
    vec![
        SchemaAttribute::new("schemas", AttrKind::Reference)
            .plural()
            .with_returned(Returned::Always),
        SchemaAttribute::string("id")
            .case_exact()
            .with_mutability(Mutability::ReadOnly)
            .with_returned(Returned::Always)
            .unique(),
        SchemaAttribute::string("externalId").case_exact(),
        SchemaAttribute::complex(
            "meta",
            vec![
                SchemaAttribute::string("resourceType").case_exact(),
                SchemaAttribute::new("created", AttrKind::DateTime),
                SchemaAttribute::new("lastModified", AttrKind::DateTime),
                SchemaAttribute::new("location", AttrKind::Reference),
                SchemaAttribute::string("version").case_exact(),
            ],
        )
        .with_mutability(Mutability::ReadOnly),
    ]
}

/// A compiled schema.
#[derive(Debug)]
pub struct Schema {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    attributes: Vec<Arc<AttrType>>,
}

impl Schema {
    fn compile(def: &SchemaDefinition, with_common: bool) -> Result<Schema, SchemaError> {
        let mut defs = def.attributes.clone();
        if with_common {
            for common in common_attributes() {
                if !defs.iter().any(|a| a.name.eq_ignore_ascii_case(&common.name)) {
                    defs.push(common);
                }
            }
        }

        validate_attributes(&def.id, &defs, false)?;

        let attributes = defs
            .iter()
            .map(|a| AttrType::build(a, &def.id, None))
            .collect();

        Ok(Schema {
            id: def.id.clone(),
            name: def.name.clone(),
            description: def.description.clone(),
            attributes,
        })
    }

    /// Top-level attributes in declaration order.
    pub fn attributes(&self) -> &[Arc<AttrType>] {
        &self.attributes
    }

    /// Case-insensitive top-level attribute lookup.
    pub fn attribute(&self, name: &str) -> Option<&Arc<AttrType>> {
        self.attributes
            .iter()
            .find(|at| at.name.eq_ignore_ascii_case(name))
    }

    /// Resolve `attr` or `attr.sub` within this schema.
    pub fn at_type(&self, path: &str) -> Option<Arc<AttrType>> {
        match path.split_once('.') {
            Some((parent, child)) => {
                let parent = self.attribute(parent)?;
                parent.sub_attribute(child).cloned()
            }
            None => self.attribute(path).cloned(),
        }
    }
}

fn validate_attributes(
    schema: &str,
    attrs: &[SchemaAttribute],
    nested: bool,
) -> Result<(), SchemaError> {
    let invalid = |attribute: &str, reason: &str| SchemaError::InvalidAttribute {
        schema: schema.to_string(),
        attribute: attribute.to_string(),
        reason: reason.to_string(),
    };

    let mut seen = HashSet::new();
    for attr in attrs {
        if attr.name.is_empty() || attr.name.contains(['.', ':', '[', ']', ' ']) {
            return Err(invalid(&attr.name, "illegal attribute name"));
        }
        if !seen.insert(attr.name.to_ascii_lowercase()) {
            return Err(invalid(&attr.name, "duplicate attribute name"));
        }
        match attr.attr_type {
            AttrKind::Complex if nested => {
                return Err(invalid(&attr.name, "complex sub-attributes are not allowed"));
            }
            AttrKind::Complex if attr.sub_attributes.is_empty() && !attr.multi_valued => {
                return Err(invalid(&attr.name, "complex attribute has no sub-attributes"));
            }
            AttrKind::Complex => validate_attributes(schema, &attr.sub_attributes, true)?,
            _ if !attr.sub_attributes.is_empty() => {
                return Err(invalid(&attr.name, "only complex attributes have sub-attributes"));
            }
            _ => {}
        }
    }
    Ok(())
}

/// An extension schema attached to a resource type.
#[derive(Debug, Clone)]
pub struct ExtensionSchema {
    pub schema: Arc<Schema>,
    pub required: bool,
}

/// A compiled resource type: a main schema plus extensions.
#[derive(Debug)]
pub struct ResourceType {
    pub id: String,
    pub name: String,
    pub endpoint: String,
    pub description: Option<String>,
    pub schema: Arc<Schema>,
    pub extensions: Vec<ExtensionSchema>,
}

impl ResourceType {
    pub fn is_core_schema(&self, uri: &str) -> bool {
        self.schema.id.eq_ignore_ascii_case(uri)
    }

    pub fn extension(&self, uri: &str) -> Option<&ExtensionSchema> {
        self.extensions
            .iter()
            .find(|ext| ext.schema.id.eq_ignore_ascii_case(uri))
    }

    /// Main schema or extension schema with the given URI.
    pub fn schema_for(&self, uri: &str) -> Option<&Arc<Schema>> {
        if self.is_core_schema(uri) {
            return Some(&self.schema);
        }
        self.extension(uri).map(|ext| &ext.schema)
    }

    /// Resolve an attribute path, optionally prefixed with a schema URI.
    ///
    /// The URI is everything before the last ':'. Without a URI the main
    /// schema is searched first, then the extensions in declaration order.
    pub fn at_type(&self, path: &str) -> Option<Arc<AttrType>> {
        if let Some((uri, rest)) = path.rsplit_once(':') {
            return self.schema_for(uri)?.at_type(rest);
        }

        self.schema.at_type(path).or_else(|| {
            self.extensions
                .iter()
                .find_map(|ext| ext.schema.at_type(path))
        })
    }

    /// URIs of the main schema and every extension.
    pub fn schema_ids(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.schema.id.as_str())
            .chain(self.extensions.iter().map(|ext| ext.schema.id.as_str()))
    }
}

/// Immutable set of compiled schemas and resource types.
///
/// Passed explicitly to every operation that needs to resolve attribute
/// names; there is no global registry.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, Arc<Schema>>,
    resource_types: BTreeMap<String, Arc<ResourceType>>,
}

impl SchemaRegistry {
    /// Registry holding the builtin User, Group and Device resource types.
    pub fn builtin() -> Result<Self, SchemaError> {
        SchemaDefinitions::builtin().compile()
    }

    pub fn schema(&self, id: &str) -> Option<&Arc<Schema>> {
        self.schemas.get(id)
    }

    /// Look up a resource type by id or name, case-insensitively.
    pub fn resource_type(&self, name: &str) -> Option<&Arc<ResourceType>> {
        self.resource_types.get(name).or_else(|| {
            self.resource_types.values().find(|rt| {
                rt.id.eq_ignore_ascii_case(name) || rt.name.eq_ignore_ascii_case(name)
            })
        })
    }

    /// The resource type whose main schema appears in `schemas`.
    pub fn resource_type_for_schemas<S: AsRef<str>>(
        &self,
        schemas: &[S],
    ) -> Option<&Arc<ResourceType>> {
        self.resource_types.values().find(|rt| {
            schemas
                .iter()
                .any(|uri| rt.is_core_schema(uri.as_ref()))
        })
    }

    pub fn resource_types(&self) -> impl Iterator<Item = &Arc<ResourceType>> {
        self.resource_types.values()
    }
}

/// Raw definitions from which a [`SchemaRegistry`] is compiled.
#[derive(Debug, Clone, Default)]
pub struct SchemaDefinitions {
    pub schemas: Vec<SchemaDefinition>,
    pub resource_types: Vec<ResourceTypeDefinition>,
}

impl SchemaDefinitions {
    pub fn builtin() -> Self {
        Self {
            schemas: vec![user_schema(), group_schema(), enterprise_user_schema(), device_schema()],
            resource_types: vec![
                ResourceTypeDefinition {
                    id: "User".to_string(),
                    name: "User".to_string(),
                    endpoint: "/Users".to_string(),
                    description: Some("User account".to_string()),
                    schema: SCHEMA_USER.to_string(),
                    schema_extensions: vec![SchemaExtension {
                        schema: SCHEMA_ENTERPRISE_USER.to_string(),
                        required: false,
                    }],
                },
                ResourceTypeDefinition {
                    id: "Group".to_string(),
                    name: "Group".to_string(),
                    endpoint: "/Groups".to_string(),
                    description: Some("Group of users".to_string()),
                    schema: SCHEMA_GROUP.to_string(),
                    schema_extensions: Vec::new(),
                },
                ResourceTypeDefinition {
                    id: "Device".to_string(),
                    name: "Device".to_string(),
                    endpoint: "/Devices".to_string(),
                    description: Some("Managed device".to_string()),
                    schema: SCHEMA_DEVICE.to_string(),
                    schema_extensions: Vec::new(),
                },
            ],
        }
    }

    /// Read every `*.json` file of `dir`.
    ///
    /// A file holds one definition or an array of them; documents with an
    /// `endpoint` member are resource types, everything else is a schema.
    /// Definitions with an id already present replace the earlier one.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, SchemaError> {
        let io_err = |source| SchemaError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(io_err)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            let text = std::fs::read_to_string(&path).map_err(|source| SchemaError::Io {
                path: path.clone(),
                source,
            })?;
            let parse_err = |source| SchemaError::Parse {
                path: path.clone(),
                source,
            };
            let doc: serde_json::Value = serde_json::from_str(&text).map_err(parse_err)?;
            let docs = match doc {
                serde_json::Value::Array(items) => items,
                other => vec![other],
            };

            for doc in docs {
                if doc.get("endpoint").is_some() {
                    let rt: ResourceTypeDefinition =
                        serde_json::from_value(doc).map_err(parse_err)?;
                    tracing::debug!(path = %path.display(), resource_type = %rt.id, "Loaded resource type");
                    self.resource_types.retain(|r| r.id != rt.id);
                    self.resource_types.push(rt);
                } else {
                    let sc: SchemaDefinition = serde_json::from_value(doc).map_err(parse_err)?;
                    tracing::debug!(path = %path.display(), schema = %sc.id, "Loaded schema");
                    self.schemas.retain(|s| s.id != sc.id);
                    self.schemas.push(sc);
                }
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    /// Compile every definition into a registry.
    pub fn compile(&self) -> Result<SchemaRegistry, SchemaError> {
        let main_schemas: HashSet<&str> = self
            .resource_types
            .iter()
            .map(|rt| rt.schema.as_str())
            .collect();

        let mut schemas = BTreeMap::new();
        for def in &self.schemas {
            let compiled = Schema::compile(def, main_schemas.contains(def.id.as_str()))?;
            if schemas.insert(def.id.clone(), Arc::new(compiled)).is_some() {
                return Err(SchemaError::DuplicateSchema(def.id.clone()));
            }
        }

        let lookup = |rt: &ResourceTypeDefinition, uri: &str| {
            schemas
                .get(uri)
                .cloned()
                .ok_or_else(|| SchemaError::UnknownSchema {
                    resource_type: rt.id.clone(),
                    schema: uri.to_string(),
                })
        };

        let mut resource_types = BTreeMap::new();
        for def in &self.resource_types {
            let schema = lookup(def, &def.schema)?;
            let extensions = def
                .schema_extensions
                .iter()
                .map(|ext| {
                    Ok(ExtensionSchema {
                        schema: lookup(def, &ext.schema)?,
                        required: ext.required,
                    })
                })
                .collect::<Result<Vec<_>, SchemaError>>()?;

            let rt = ResourceType {
                id: def.id.clone(),
                name: def.name.clone(),
                endpoint: def.endpoint.clone(),
                description: def.description.clone(),
                schema,
                extensions,
            };
            if resource_types.insert(def.id.clone(), Arc::new(rt)).is_some() {
                return Err(SchemaError::DuplicateResourceType(def.id.clone()));
            }
        }

        tracing::debug!(
            schemas = schemas.len(),
            resource_types = resource_types.len(),
            "Compiled schema registry"
        );

        Ok(SchemaRegistry {
            schemas,
            resource_types,
        })
    }
}

// =============================================================================
// Builtin schemas
// =============================================================================

fn schema_def(id: &str, name: &str, description: &str, attributes: Vec<SchemaAttribute>) -> SchemaDefinition {
    SchemaDefinition {
        id: id.to_string(),
        name: name.to_string(),
        description: Some(description.to_string()),
        attributes,
    }
}

fn user_schema() -> SchemaDefinition {
    use SchemaAttribute as A;

    schema_def(
        SCHEMA_USER,
        "User",
        "User account",
        vec![
            A::string("userName").required().unique(),
            A::complex(
                "name",
                vec![
                    A::string("formatted"),
                    A::string("familyName"),
                    A::string("givenName"),
                    A::string("middleName"),
                    A::string("honorificPrefix"),
                    A::string("honorificSuffix"),
                ],
            ),
            A::string("displayName"),
            A::string("nickName"),
            A::new("profileUrl", AttrKind::Reference),
            A::string("title"),
            A::string("userType"),
            A::string("preferredLanguage"),
            A::string("locale"),
            A::string("timezone"),
            A::boolean("active"),
            A::string("password")
                .with_mutability(Mutability::WriteOnly)
                .with_returned(Returned::Never),
            A::multi_valued("emails", vec![]),
            A::multi_valued("phoneNumbers", vec![]),
            A::multi_valued("ims", vec![]),
            A::multi_valued("photos", vec![A::new("value", AttrKind::Reference)]),
            A::multi_valued(
                "addresses",
                vec![
                    A::string("formatted"),
                    A::string("streetAddress"),
                    A::string("locality"),
                    A::string("region"),
                    A::string("postalCode"),
                    A::string("country"),
                ],
            ),
            A::multi_valued(
                "groups",
                vec![A::string("value").with_mutability(Mutability::ReadOnly)],
            )
            .with_mutability(Mutability::ReadOnly),
            A::multi_valued("entitlements", vec![]),
            A::multi_valued("roles", vec![]),
            A::multi_valued(
                "x509Certificates",
                vec![A::new("value", AttrKind::Binary)],
            ),
        ],
    )
}

fn group_schema() -> SchemaDefinition {
    use SchemaAttribute as A;

    schema_def(
        SCHEMA_GROUP,
        "Group",
        "Group of users",
        vec![
            A::string("displayName").required(),
            A::multi_valued(
                "members",
                vec![
                    A::string("value").with_mutability(Mutability::Immutable),
                    A::new("$ref", AttrKind::Reference).with_mutability(Mutability::Immutable),
                ],
            ),
        ],
    )
}

fn enterprise_user_schema() -> SchemaDefinition {
    use SchemaAttribute as A;

    schema_def(
        SCHEMA_ENTERPRISE_USER,
        "EnterpriseUser",
        "Enterprise User",
        vec![
            A::string("employeeNumber"),
            A::string("costCenter"),
            A::string("organization"),
            A::string("division"),
            A::string("department"),
            A::complex(
                "manager",
                vec![
                    A::string("value"),
                    A::new("$ref", AttrKind::Reference),
                    A::string("displayName").with_mutability(Mutability::ReadOnly),
                ],
            ),
        ],
    )
}

fn device_schema() -> SchemaDefinition {
    use SchemaAttribute as A;

    schema_def(
        SCHEMA_DEVICE,
        "Device",
        "Managed device",
        vec![
            A::string("serialNumber").required().case_exact().unique(),
            A::string("manufacturer"),
            A::new("rackNumber", AttrKind::Integer),
            A::new("price", AttrKind::Decimal),
            A::new("installedDate", AttrKind::DateTime),
            A::new("repairDates", AttrKind::DateTime).plural(),
            A::new("firmware", AttrKind::Binary),
            A::boolean("active"),
            A::complex(
                "location",
                vec![A::string("latitude"), A::string("longitude"), A::string("desc")],
            ),
            A::multi_valued("photos", vec![A::new("value", AttrKind::Reference)]),
        ],
    )
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::builtin().unwrap()
    }

    #[test]
    fn test_builtin_registry_compiles() {
        let reg = registry();
        assert_eq!(reg.resource_types().count(), 3);
        assert!(reg.schema(SCHEMA_ENTERPRISE_USER).is_some());

        let user = reg.resource_type("user").unwrap();
        assert_eq!(user.endpoint, "/Users");
        assert_eq!(user.schema_ids().collect::<Vec<_>>(), vec![SCHEMA_USER, SCHEMA_ENTERPRISE_USER]);
    }

    #[rstest]
    #[case("userName", "username", AttrKind::String)]
    #[case("USERNAME", "username", AttrKind::String)]
    #[case("name.givenName", "name.givenname", AttrKind::String)]
    #[case("emails.value", "emails.value", AttrKind::String)]
    #[case("emails.primary", "emails.primary", AttrKind::Boolean)]
    #[case("meta.created", "meta.created", AttrKind::DateTime)]
    #[case("urn:ietf:params:scim:schemas:core:2.0:User:userName", "username", AttrKind::String)]
    #[case("urn:ietf:params:scim:schemas:extension:enterprise:2.0:User:manager.value", "manager.value", AttrKind::String)]
    #[case("employeeNumber", "employeenumber", AttrKind::String)]
    fn test_at_type_resolution(#[case] path: &str, #[case] norm: &str, #[case] kind: AttrKind) {
        let reg = registry();
        let at = reg.resource_type("User").unwrap().at_type(path).unwrap();
        assert_eq!(at.norm_name, norm);
        assert_eq!(at.kind, kind);
    }

    #[rstest]
    #[case("nosuch")]
    #[case("name.nosuch")]
    #[case("userName.value")]
    #[case("urn:example:unknown:userName")]
    fn test_at_type_unknown(#[case] path: &str) {
        let reg = registry();
        assert!(reg.resource_type("User").unwrap().at_type(path).is_none());
    }

    #[test]
    fn test_sub_attribute_parent_link() {
        let reg = registry();
        let at = reg.resource_type("User").unwrap().at_type("emails.type").unwrap();
        let parent = at.parent().unwrap();
        assert_eq!(parent.norm_name, "emails");
        assert!(parent.multi_valued);
        assert!(at.is_under_multi_valued());
        assert_eq!(at.short_name(), "type");
    }

    #[test]
    fn test_default_sub_attributes_added() {
        let reg = registry();
        let members = reg.resource_type("Group").unwrap().at_type("members").unwrap();
        let names: Vec<&str> = members.sub_attributes().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["value", "$ref", "type", "primary", "display"]);
        // declared definition wins over the default
        assert_eq!(members.sub_attribute("value").unwrap().mutability, Mutability::Immutable);
    }

    #[test]
    fn test_common_attributes_only_on_main_schema() {
        let reg = registry();
        assert!(reg.schema(SCHEMA_USER).unwrap().attribute("id").is_some());
        assert!(reg.schema(SCHEMA_ENTERPRISE_USER).unwrap().attribute("id").is_none());
        let id = reg.schema(SCHEMA_USER).unwrap().attribute("id").unwrap().clone();
        assert!(id.case_exact);
        assert_eq!(id.mutability, Mutability::ReadOnly);
    }

    #[test]
    fn test_binary_and_reference_are_case_exact() {
        let reg = registry();
        let device = reg.resource_type("Device").unwrap();
        assert!(device.at_type("firmware").unwrap().case_exact);
        assert!(device.at_type("photos.value").unwrap().case_exact);
        assert!(!device.at_type("manufacturer").unwrap().case_exact);
    }

    #[test]
    fn test_resource_type_for_schemas() {
        let reg = registry();
        let rt = reg
            .resource_type_for_schemas(&[SCHEMA_ENTERPRISE_USER, SCHEMA_USER])
            .unwrap();
        assert_eq!(rt.id, "User");
        assert!(reg.resource_type_for_schemas(&["urn:nothing"]).is_none());
    }

    #[test]
    fn test_schema_definition_deserializes() {
        let json = r#"{
            "id": "urn:example:Printer",
            "name": "Printer",
            "attributes": [
                {"name": "model", "type": "string", "caseExact": true},
                {"name": "pages", "type": "integer"},
                {"name": "lastSeen", "type": "dateTime"},
                {"name": "trays", "type": "complex", "multiValued": true,
                 "subAttributes": [{"name": "size", "type": "string"}]}
            ]
        }"#;
        let def: SchemaDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.attributes[2].attr_type, AttrKind::DateTime);
        assert_eq!(def.attributes[0].mutability, Mutability::ReadWrite);

        let sc = Schema::compile(&def, false).unwrap();
        let trays = sc.attribute("TRAYS").unwrap();
        assert!(trays.sub_attribute("primary").is_some());
        assert!(sc.attribute("model").unwrap().case_exact);
    }

    #[rstest]
    #[case(vec![SchemaAttribute::string("a"), SchemaAttribute::string("A")], "duplicate")]
    #[case(vec![SchemaAttribute::string("a.b")], "illegal")]
    #[case(vec![SchemaAttribute::complex("c", vec![])], "no sub-attributes")]
    #[case(vec![SchemaAttribute::complex("c", vec![SchemaAttribute::complex("d", vec![SchemaAttribute::string("e")])])], "complex sub-attributes")]
    fn test_invalid_schema_rejected(#[case] attributes: Vec<SchemaAttribute>, #[case] reason: &str) {
        let def = schema_def("urn:example:Bad", "Bad", "bad", attributes);
        let err = Schema::compile(&def, false).unwrap_err();
        assert!(err.to_string().contains(reason), "{err}");
    }

    #[test]
    fn test_unknown_extension_schema_rejected() {
        let mut defs = SchemaDefinitions::builtin();
        defs.resource_types[0].schema_extensions.push(SchemaExtension {
            schema: "urn:example:missing".to_string(),
            required: false,
        });
        assert!(matches!(
            defs.compile(),
            Err(SchemaError::UnknownSchema { .. })
        ));
    }

    #[test]
    fn test_load_dir_merges_definitions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("printer.json"),
            r#"{"id": "urn:example:Printer", "name": "Printer",
                "attributes": [{"name": "model", "type": "string"}]}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("types.json"),
            r#"[{"id": "Printer", "name": "Printer", "endpoint": "/Printers",
                 "schema": "urn:example:Printer"}]"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("README.txt"), "ignored").unwrap();

        let mut defs = SchemaDefinitions::builtin();
        assert_eq!(defs.load_dir(dir.path()).unwrap(), 2);

        let reg = defs.compile().unwrap();
        let printer = reg.resource_type("printer").unwrap();
        assert!(printer.at_type("model").is_some());
        assert!(printer.at_type("meta.lastModified").is_some());
    }

    #[test]
    fn test_load_dir_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        let mut defs = SchemaDefinitions::default();
        assert!(matches!(
            defs.load_dir(dir.path()),
            Err(SchemaError::Parse { .. })
        ));
    }
}
