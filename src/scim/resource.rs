//! In-memory SCIM resources.
//!
//! A [`Resource`] owns one core [`AttrGroup`] plus one group per extension
//! schema that carries data. Groups hold [`SimpleAttribute`]s and
//! [`ComplexAttribute`]s keyed by normalized (lowercase) name.
//!
//! A [`ComplexAttribute`] is an arena of entries. Each entry gets an
//! [`EntryId`] from a per-attribute counter that is never reused, so ids
//! handed out by a selector stay valid while other entries are removed.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};

use serde_json::{Map, Value as Json};

use super::{
    error::{ScimError, ScimResult},
    schema::{AttrType, Mutability, ResourceType, Returned, SchemaRegistry},
    value::{Value, ValueError},
};

/// Stable identifier of one entry inside a [`ComplexAttribute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An attribute holding one or more scalar values.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleAttribute {
    /// Lowercase name without any parent prefix
    pub name: String,
    at: Arc<AttrType>,
    values: Vec<Value>,
}

impl SimpleAttribute {
    /// Build an attribute, checking every value against the declared kind.
    ///
    /// A single-valued attribute must get exactly one value.
    pub fn new(at: Arc<AttrType>, values: Vec<Value>) -> Result<Self, ValueError> {
        if at.is_complex() {
            return Err(ValueError::Complex(at.name.clone()));
        }
        if !at.multi_valued && values.len() != 1 {
            return Err(ValueError::Arity(at.name.clone()));
        }
        if let Some(bad) = values.iter().find(|v| !v.fits(at.kind)) {
            return Err(ValueError::KindMismatch {
                attribute: at.name.clone(),
                expected: at.kind,
                found: format!("{bad:?}"),
            });
        }
        Ok(Self {
            name: at.short_name().to_string(),
            at,
            values,
        })
    }

    /// Shorthand for a single-valued attribute.
    pub fn single(at: Arc<AttrType>, value: impl Into<Value>) -> Result<Self, ValueError> {
        Self::new(at, vec![value.into()])
    }

    /// Parse a JSON scalar, or an array of scalars for a multi-valued attribute.
    /// Returns `None` for `null` and empty arrays.
    pub fn from_json(at: Arc<AttrType>, json: &Json) -> Result<Option<Self>, ValueError> {
        let values = match json {
            Json::Null => return Ok(None),
            Json::Array(items) if at.multi_valued => items
                .iter()
                .filter(|item| !item.is_null())
                .map(|item| Value::from_json(&at, item))
                .collect::<Result<Vec<_>, _>>()?,
            Json::Array(_) => return Err(ValueError::Arity(at.name.clone())),
            scalar => vec![Value::from_json(&at, scalar)?],
        };
        if values.is_empty() {
            return Ok(None);
        }
        Self::new(at, values).map(Some)
    }

    pub fn at(&self) -> &Arc<AttrType> {
        &self.at
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn first(&self) -> Option<&Value> {
        self.values.first()
    }

    pub fn has_values(&self) -> bool {
        !self.values.is_empty()
    }

    /// Append values to a multi-valued attribute, skipping duplicates.
    pub fn add_values(&mut self, values: Vec<Value>) -> Result<(), ValueError> {
        if !self.at.multi_valued {
            return Err(ValueError::Arity(self.at.name.clone()));
        }
        for value in values {
            if !value.fits(self.at.kind) {
                return Err(ValueError::KindMismatch {
                    attribute: self.at.name.clone(),
                    expected: self.at.kind,
                    found: format!("{value:?}"),
                });
            }
            if !self.values.contains(&value) {
                self.values.push(value);
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Json {
        if self.at.multi_valued {
            Json::Array(self.values.iter().map(Value::to_json).collect())
        } else {
            self.values.first().map(Value::to_json).unwrap_or(Json::Null)
        }
    }
}

/// One entry of a [`ComplexAttribute`]: sub-attributes keyed by lowercase name.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    id: EntryId,
    attrs: HashMap<String, SimpleAttribute>,
}

impl Entry {
    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn get(&self, name: &str) -> Option<&SimpleAttribute> {
        self.attrs.get(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some_and(SimpleAttribute::has_values)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &SimpleAttribute> {
        self.attrs.values()
    }

    pub fn set(&mut self, attr: SimpleAttribute) {
        self.attrs.insert(attr.name.clone(), attr);
    }

    pub fn remove(&mut self, name: &str) -> Option<SimpleAttribute> {
        self.attrs.remove(&name.to_ascii_lowercase())
    }

    pub fn is_primary(&self) -> bool {
        self.get("primary")
            .and_then(SimpleAttribute::first)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.values().all(|a| !a.has_values())
    }
}

/// A complex attribute: a single entry, or zero or more for multi-valued ones.
#[derive(Debug, Clone, PartialEq)]
pub struct ComplexAttribute {
    /// Lowercase attribute name
    pub name: String,
    at: Arc<AttrType>,
    entries: Vec<Entry>,
    next_id: u64,
}

impl ComplexAttribute {
    pub fn new(at: Arc<AttrType>) -> Result<Self, ValueError> {
        if !at.is_complex() {
            return Err(ValueError::NotComplex(at.name.clone()));
        }
        Ok(Self {
            name: at.norm_name.clone(),
            at,
            entries: Vec::new(),
            next_id: 0,
        })
    }

    /// Build an attribute from a list of entries.
    ///
    /// Fails when more than one entry is marked primary.
    pub fn with_entries(
        at: Arc<AttrType>,
        entries: Vec<Vec<SimpleAttribute>>,
    ) -> Result<Self, ValueError> {
        let mut ca = Self::new(at)?;
        for attrs in entries {
            ca.add_entry(attrs)?;
        }
        Ok(ca)
    }

    /// Parse a JSON object, or an array of objects for a multi-valued attribute.
    /// Returns `None` when nothing with a value remains.
    pub fn from_json(at: Arc<AttrType>, json: &Json) -> Result<Option<Self>, ValueError> {
        let objects: Vec<&Map<String, Json>> = match json {
            Json::Null => return Ok(None),
            Json::Object(obj) => vec![obj],
            Json::Array(items) if at.multi_valued => items
                .iter()
                .filter(|item| !item.is_null())
                .map(|item| {
                    item.as_object().ok_or_else(|| ValueError::KindMismatch {
                        attribute: at.name.clone(),
                        expected: at.kind,
                        found: item.to_string(),
                    })
                })
                .collect::<Result<_, _>>()?,
            other => {
                return Err(ValueError::KindMismatch {
                    attribute: at.name.clone(),
                    expected: at.kind,
                    found: other.to_string(),
                });
            }
        };

        let mut ca = Self::new(at)?;
        for obj in objects {
            let mut attrs = Vec::with_capacity(obj.len());
            for (key, val) in obj {
                let sub_at = ca.at.sub_attribute(key).cloned().ok_or_else(|| {
                    ValueError::UnknownSubAttribute {
                        parent: ca.at.name.clone(),
                        name: key.clone(),
                    }
                })?;
                if let Some(sa) = SimpleAttribute::from_json(sub_at, val)? {
                    attrs.push(sa);
                }
            }
            if !attrs.is_empty() {
                ca.add_entry(attrs)?;
            }
        }

        Ok((!ca.entries.is_empty()).then_some(ca))
    }

    pub fn at(&self) -> &Arc<AttrType> {
        &self.at
    }

    /// Add an entry and return its id.
    ///
    /// A single-valued attribute keeps only the newest entry.
    pub fn add_entry(&mut self, attrs: Vec<SimpleAttribute>) -> Result<EntryId, ValueError> {
        let mut entry = Entry {
            id: EntryId(self.next_id),
            attrs: HashMap::with_capacity(attrs.len()),
        };
        for attr in attrs {
            if attr.at.parent().as_deref() != Some(self.at.as_ref()) {
                return Err(ValueError::UnknownSubAttribute {
                    parent: self.at.name.clone(),
                    name: attr.at.name.clone(),
                });
            }
            entry.set(attr);
        }

        if self.at.multi_valued {
            if entry.is_primary() && self.entries.iter().any(Entry::is_primary) {
                return Err(ValueError::MultiplePrimary(self.at.name.clone()));
            }
        } else {
            self.entries.clear();
        }

        self.next_id += 1;
        let id = entry.id;
        self.entries.push(entry);
        Ok(id)
    }

    pub fn remove_entry(&mut self, id: EntryId) -> Option<Entry> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(pos))
    }

    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn entry_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entry_ids(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.entries.iter().map(|e| e.id)
    }

    pub fn has_entries(&self) -> bool {
        self.entries.iter().any(|e| !e.is_empty())
    }

    /// Remove a sub-attribute from every entry and drop entries left empty.
    pub fn remove_sub_attribute(&mut self, name: &str) -> bool {
        let mut removed = false;
        for entry in &mut self.entries {
            removed |= entry.remove(name).is_some();
        }
        self.entries.retain(|e| !e.is_empty());
        removed
    }

    /// Clear the `primary` flag on every entry.
    pub fn unset_primary(&mut self) {
        for entry in &mut self.entries {
            if entry.is_primary() {
                entry.remove("primary");
            }
        }
    }

    pub fn to_json(&self) -> Json {
        if self.at.multi_valued {
            Json::Array(
                self.entries
                    .iter()
                    .filter(|e| !e.is_empty())
                    .map(|e| self.render(e))
                    .collect(),
            )
        } else {
            self.entries
                .first()
                .map(|e| self.render(e))
                .unwrap_or(Json::Null)
        }
    }

    /// JSON object of one entry, or `None` for an unknown id.
    pub fn entry_json(&self, id: EntryId) -> Option<Json> {
        self.entry(id).map(|e| self.render(e))
    }

    fn render(&self, entry: &Entry) -> Json {
        let mut obj = Map::new();
        for sub_at in self.at.sub_attributes() {
            if let Some(sa) = entry.get(sub_at.short_name())
                && sa.has_values()
                && sub_at.returned != Returned::Never
            {
                obj.insert(sub_at.name.clone(), sa.to_json());
            }
        }
        Json::Object(obj)
    }
}

/// Borrowed view of either kind of attribute.
#[derive(Debug, Clone, Copy)]
pub enum AttrRef<'a> {
    Simple(&'a SimpleAttribute),
    Complex(&'a ComplexAttribute),
}

impl AttrRef<'_> {
    pub fn has_values(&self) -> bool {
        match self {
            AttrRef::Simple(sa) => sa.has_values(),
            AttrRef::Complex(ca) => ca.has_entries(),
        }
    }
}

/// The attributes of one schema within a resource.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttrGroup {
    pub simple: HashMap<String, SimpleAttribute>,
    pub complex: HashMap<String, ComplexAttribute>,
}

impl AttrGroup {
    pub fn is_empty(&self) -> bool {
        self.simple.values().all(|a| !a.has_values())
            && self.complex.values().all(|a| !a.has_entries())
    }

    fn get(&self, norm_name: &str) -> Option<AttrRef<'_>> {
        self.simple
            .get(norm_name)
            .map(AttrRef::Simple)
            .or_else(|| self.complex.get(norm_name).map(AttrRef::Complex))
    }

    fn remove(&mut self, norm_name: &str) -> bool {
        self.simple.remove(norm_name).is_some() | self.complex.remove(norm_name).is_some()
    }

    fn parse_into(&mut self, at: Arc<AttrType>, json: &Json) -> Result<(), ValueError> {
        let key = at.norm_name.clone();
        if at.is_complex() {
            if let Some(ca) = ComplexAttribute::from_json(at, json)? {
                self.complex.insert(key, ca);
            }
        } else if let Some(sa) = SimpleAttribute::from_json(at, json)? {
            self.simple.insert(key, sa);
        }
        Ok(())
    }

    fn to_json(&self, attrs: &[Arc<AttrType>]) -> Map<String, Json> {
        let mut obj = Map::new();
        for at in attrs {
            if at.returned == Returned::Never || at.norm_name == "schemas" {
                continue;
            }
            match self.get(&at.norm_name) {
                Some(attr) if attr.has_values() => {
                    let json = match attr {
                        AttrRef::Simple(sa) => sa.to_json(),
                        AttrRef::Complex(ca) => ca.to_json(),
                    };
                    obj.insert(at.name.clone(), json);
                }
                _ => {}
            }
        }
        obj
    }
}

/// A SCIM resource: typed attributes bound to one resource type.
#[derive(Debug, Clone)]
pub struct Resource {
    rt: Arc<ResourceType>,
    core: AttrGroup,
    /// Extension groups keyed by schema URI as declared
    extensions: BTreeMap<String, AttrGroup>,
}

impl Resource {
    pub fn new(rt: Arc<ResourceType>) -> Self {
        Self {
            rt,
            core: AttrGroup::default(),
            extensions: BTreeMap::new(),
        }
    }

    /// Parse a resource, picking its type from the `schemas` member.
    pub fn from_json(registry: &SchemaRegistry, json: &Json) -> ScimResult<Self> {
        let schemas = schemas_of(json)?;
        let rt = registry
            .resource_type_for_schemas(&schemas)
            .ok_or_else(|| {
                ScimError::invalid_syntax(format!(
                    "No resource type matches schemas {schemas:?}"
                ))
            })?;
        Self::from_json_with_type(Arc::clone(rt), json)
    }

    /// Parse a resource of a known type.
    pub fn from_json_with_type(rt: Arc<ResourceType>, json: &Json) -> ScimResult<Self> {
        let obj = json
            .as_object()
            .ok_or_else(|| ScimError::invalid_syntax("Resource must be a JSON object"))?;
        let schemas = schemas_of(json)?;

        for uri in &schemas {
            if rt.schema_for(uri).is_none() {
                return Err(ScimError::invalid_syntax(format!(
                    "Schema '{uri}' is not supported by resource type '{}'",
                    rt.name
                )));
            }
        }

        let mut rs = Resource::new(rt);
        for (key, val) in obj {
            if let Some(ext) = rs.rt.extension(key).cloned() {
                if !schemas.iter().any(|s| s.eq_ignore_ascii_case(key)) {
                    return Err(ScimError::invalid_syntax(format!(
                        "Extension '{key}' is not listed in schemas"
                    )));
                }
                let ext_obj = match val {
                    Json::Null => continue,
                    Json::Object(ext_obj) => ext_obj,
                    _ => {
                        return Err(ScimError::invalid_syntax(format!(
                            "Extension '{key}' must be a JSON object"
                        )));
                    }
                };
                let mut group = AttrGroup::default();
                for (name, val) in ext_obj {
                    let at = ext.schema.attribute(name).cloned().ok_or_else(|| {
                        ScimError::invalid_syntax(format!("Unknown attribute '{key}:{name}'"))
                    })?;
                    group.parse_into(at, val)?;
                }
                if !group.is_empty() {
                    rs.extensions.insert(ext.schema.id.clone(), group);
                }
                continue;
            }

            if key.contains(':') {
                return Err(ScimError::invalid_syntax(format!("Unknown schema '{key}'")));
            }

            let at = rs.rt.schema.attribute(key).cloned().ok_or_else(|| {
                ScimError::invalid_syntax(format!("Unknown attribute '{key}'"))
            })?;
            rs.core.parse_into(at, val)?;
        }

        for ext in &rs.rt.extensions {
            if ext.required && !rs.extensions.contains_key(&ext.schema.id) {
                return Err(ScimError::invalid_syntax(format!(
                    "Missing required extension '{}'",
                    ext.schema.id
                )));
            }
        }

        Ok(rs)
    }

    pub fn resource_type(&self) -> &Arc<ResourceType> {
        &self.rt
    }

    pub fn core(&self) -> &AttrGroup {
        &self.core
    }

    pub fn extension(&self, uri: &str) -> Option<&AttrGroup> {
        self.rt
            .extension(uri)
            .and_then(|ext| self.extensions.get(&ext.schema.id))
    }

    fn group(&self, at: &AttrType) -> Option<&AttrGroup> {
        if self.rt.is_core_schema(&at.schema) {
            Some(&self.core)
        } else {
            self.extensions.get(&at.schema)
        }
    }

    fn group_mut(&mut self, at: &AttrType) -> ScimResult<&mut AttrGroup> {
        if self.rt.is_core_schema(&at.schema) {
            return Ok(&mut self.core);
        }
        if self.rt.extension(&at.schema).is_none() {
            return Err(ScimError::invalid_path(format!(
                "Attribute '{}' does not belong to resource type '{}'",
                at.name, self.rt.name
            )));
        }
        Ok(self.extensions.entry(at.schema.clone()).or_default())
    }

    /// Look up a top-level attribute.
    pub fn get(&self, at: &AttrType) -> Option<AttrRef<'_>> {
        self.group(at)?.get(&at.norm_name)
    }

    pub fn get_simple(&self, at: &AttrType) -> Option<&SimpleAttribute> {
        self.group(at)?.simple.get(&at.norm_name)
    }

    pub fn get_complex(&self, at: &AttrType) -> Option<&ComplexAttribute> {
        self.group(at)?.complex.get(&at.norm_name)
    }

    pub fn get_complex_mut(&mut self, at: &AttrType) -> Option<&mut ComplexAttribute> {
        let group = if self.rt.is_core_schema(&at.schema) {
            &mut self.core
        } else {
            self.extensions.get_mut(&at.schema)?
        };
        group.complex.get_mut(&at.norm_name)
    }

    /// Resolve a path such as `userName`, `name.givenName` or a URI-prefixed
    /// name to the attribute holding it.
    pub fn get_attr(&self, path: &str) -> Option<AttrRef<'_>> {
        let at = self.rt.at_type(path)?;
        match at.parent() {
            Some(parent) => self.get(&parent),
            None => self.get(&at),
        }
    }

    pub fn set_simple(&mut self, attr: SimpleAttribute) -> ScimResult<()> {
        if attr.at.parent().is_some() {
            return Err(ScimError::invalid_path(format!(
                "'{}' is a sub-attribute",
                attr.at.norm_name
            )));
        }
        let at = Arc::clone(&attr.at);
        self.group_mut(&at)?.simple.insert(at.norm_name.clone(), attr);
        Ok(())
    }

    pub fn set_complex(&mut self, attr: ComplexAttribute) -> ScimResult<()> {
        let at = Arc::clone(&attr.at);
        self.group_mut(&at)?.complex.insert(at.norm_name.clone(), attr);
        Ok(())
    }

    /// Remove a top-level attribute; returns whether anything was removed.
    pub fn remove_attr(&mut self, at: &AttrType) -> bool {
        let Ok(group) = self.group_mut(at) else {
            return false;
        };
        let removed = group.remove(&at.norm_name);
        if !self.rt.is_core_schema(&at.schema) {
            self.extensions.retain(|_, g| !g.is_empty());
        }
        removed
    }

    /// Remove the attribute at `path`; returns whether anything was removed.
    ///
    /// `path` may name a sub-attribute and may carry a schema URI prefix.
    /// A complex attribute left without entries is removed as well.
    pub fn delete_attr(&mut self, path: &str) -> ScimResult<bool> {
        let at = self
            .rt
            .at_type(path)
            .ok_or_else(|| ScimError::invalid_path(format!("Unknown attribute '{path}'")))?;
        Ok(self.delete(&at))
    }

    fn delete(&mut self, at: &AttrType) -> bool {
        let Some(parent) = at.parent() else {
            return self.remove_attr(at);
        };
        let Some(ca) = self.get_complex_mut(&parent) else {
            return false;
        };
        let removed = ca.remove_sub_attribute(at.short_name());
        if !ca.has_entries() {
            self.remove_attr(&parent);
        }
        removed
    }

    /// Strip read-only attributes and sub-attributes, keeping `schemas`.
    pub fn remove_read_only(&mut self) {
        let rt = Arc::clone(&self.rt);
        for at in attributes_of(&rt) {
            if at.norm_name == "schemas" {
                continue;
            }
            if at.mutability == Mutability::ReadOnly {
                self.remove_attr(at);
                continue;
            }
            for sub in at.sub_attributes() {
                if sub.mutability == Mutability::ReadOnly {
                    self.delete(sub);
                }
            }
        }
    }

    /// Render the resource restricted to `names` when `include` is set,
    /// or without them otherwise.
    ///
    /// Names resolve like [`ResourceType::at_type`] and unknown ones are
    /// skipped. Attributes returned `always` are never dropped. Including a
    /// sub-attribute keeps its parent with just the selected sub-attributes.
    pub fn to_json_projected<S: AsRef<str>>(&self, names: &[S], include: bool) -> Json {
        let selected: Vec<Arc<AttrType>> = names
            .iter()
            .filter_map(|name| {
                let at = self.rt.at_type(name.as_ref());
                if at.is_none() {
                    tracing::debug!(attribute = name.as_ref(), "Skipping unknown projected attribute");
                }
                at
            })
            .collect();

        let mut projected = self.clone();
        if include {
            for at in attributes_of(&self.rt) {
                if at.returned == Returned::Always || selected.contains(at) {
                    continue;
                }
                let subs: Vec<&Arc<AttrType>> = selected
                    .iter()
                    .filter(|s| s.parent().as_deref() == Some(at.as_ref()))
                    .collect();
                if subs.is_empty() {
                    projected.remove_attr(at);
                    continue;
                }
                for sub in at.sub_attributes() {
                    if sub.returned != Returned::Always && !subs.contains(&sub) {
                        projected.delete(sub);
                    }
                }
            }
        } else {
            for at in selected.iter().filter(|at| at.returned != Returned::Always) {
                projected.delete(at);
            }
        }
        projected.to_json()
    }

    /// Fail with the first required attribute that has no value.
    ///
    /// Read-only attributes are assigned by the server and are not checked.
    pub fn check_missing_required(&self) -> ScimResult<()> {
        let schemas = std::iter::once(&self.rt.schema).chain(
            self.rt
                .extensions
                .iter()
                .filter(|ext| ext.required || self.extensions.contains_key(&ext.schema.id))
                .map(|ext| &ext.schema),
        );

        for schema in schemas {
            for at in schema.attributes() {
                if at.mutability == Mutability::ReadOnly {
                    continue;
                }
                let present = self.get(at).is_some_and(|a| a.has_values());
                if at.required && !present {
                    return Err(ScimError::invalid_value(format!(
                        "Required attribute '{}' is missing",
                        at.name
                    )));
                }
                if let (true, Some(AttrRef::Complex(ca))) = (present, self.get(at)) {
                    for sub in at.sub_attributes().iter().filter(|s| s.required) {
                        if ca.entries().iter().any(|e| !e.contains(sub.short_name())) {
                            return Err(ScimError::invalid_value(format!(
                                "Required attribute '{}.{}' is missing",
                                at.name, sub.name
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn id(&self) -> Option<&str> {
        self.core
            .simple
            .get("id")
            .and_then(SimpleAttribute::first)
            .and_then(Value::as_str)
    }

    /// Render the resource in its wire form.
    ///
    /// Names use their schema-declared case, extension data is nested under
    /// the extension URI and attributes without values are omitted.
    pub fn to_json(&self) -> Json {
        let mut obj = self.core.to_json(self.rt.schema.attributes());

        let mut schemas = vec![Json::String(self.rt.schema.id.clone())];
        for ext in &self.rt.extensions {
            if let Some(group) = self.extensions.get(&ext.schema.id) {
                let ext_obj = group.to_json(ext.schema.attributes());
                if !ext_obj.is_empty() {
                    schemas.push(Json::String(ext.schema.id.clone()));
                    obj.insert(ext.schema.id.clone(), Json::Object(ext_obj));
                }
            }
        }
        obj.insert("schemas".to_string(), Json::Array(schemas));

        Json::Object(obj)
    }
}

/// Split an `attributes` or `excludedAttributes` parameter into names.
///
/// Blank tokens and a lone `.` are dropped.
pub fn split_attr_csv(csv: &str) -> Vec<&str> {
    csv.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != ".")
        .collect()
}

/// Top-level attributes of the main schema, then of each extension.
fn attributes_of(rt: &ResourceType) -> impl Iterator<Item = &Arc<AttrType>> {
    std::iter::once(&rt.schema)
        .chain(rt.extensions.iter().map(|ext| &ext.schema))
        .flat_map(|schema| schema.attributes())
}

fn schemas_of(json: &Json) -> ScimResult<Vec<String>> {
    let schemas = json
        .get("schemas")
        .and_then(Json::as_array)
        .ok_or_else(|| ScimError::invalid_syntax("Resource has no 'schemas' array"))?;
    schemas
        .iter()
        .map(|s| {
            s.as_str()
                .map(str::to_string)
                .ok_or_else(|| ScimError::invalid_syntax("'schemas' must contain strings"))
        })
        .collect()
}
