//! Attribute mapper: turns a directory object into a raw SCIM attribute map.
//!
//! The mapper owns rule ordering and merging. Rules themselves implement
//! [`PropertyMapping`] and can be backed by anything (built-in defaults,
//! declarative field mappings, closures, an expression engine).

use crate::directory::{DirectoryGroup, DirectoryUser};
use crate::error::{ScimClientError, ScimClientResult};
use crate::store::Connection;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;
use uuid::Uuid;

/// Raw attribute map produced by the mapper, before normalization.
pub type RawAttributes = Map<String, Value>;

/// Read-only context handed to every rule.
#[derive(Debug, Clone, Copy)]
pub struct MappingContext<'a> {
    pub provider_id: Uuid,
    pub provider_name: &'a str,
    /// Existing connection on update, `None` on create.
    pub connection: Option<&'a Connection>,
}

/// A single mapping rule.
///
/// `Ok(None)` means the rule has nothing to contribute. An `Err` aborts the
/// mapping of the object.
pub trait PropertyMapping<O>: Send + Sync {
    /// Rule name. Rules are applied in ascending name order.
    fn name(&self) -> &str;

    fn evaluate(
        &self,
        object: &O,
        context: &MappingContext<'_>,
    ) -> Result<Option<RawAttributes>, String>;
}

/// Ordered set of mapping rules for one object type.
pub struct AttributeMapper<O> {
    rules: Vec<Box<dyn PropertyMapping<O>>>,
}

impl<O> Default for AttributeMapper<O> {
    fn default() -> Self {
        Self { rules: Vec::new() }
    }
}

impl<O> std::fmt::Debug for AttributeMapper<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeMapper")
            .field("rules", &self.rule_names())
            .finish()
    }
}

impl<O> AttributeMapper<O> {
    /// Mapper without any rules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_rule(mut self, rule: impl PropertyMapping<O> + 'static) -> Self {
        self.add_rule(rule);
        self
    }

    /// Register a rule. Rules with the same name keep registration order.
    pub fn add_rule(&mut self, rule: impl PropertyMapping<O> + 'static) {
        self.rules.push(Box::new(rule));
        self.rules.sort_by(|a, b| a.name().cmp(b.name()));
    }

    /// Rule names in evaluation order.
    #[must_use]
    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Evaluate every rule and merge the results, last write wins.
    ///
    /// Nested objects are merged key by key; scalars and arrays are
    /// replaced. The first failing rule aborts with
    /// [`ScimClientError::Mapping`].
    pub fn build_schema(
        &self,
        object: &O,
        context: &MappingContext<'_>,
    ) -> ScimClientResult<RawAttributes> {
        let mut raw = RawAttributes::new();
        for rule in &self.rules {
            match rule.evaluate(object, context) {
                Ok(Some(attributes)) => merge_into(&mut raw, attributes),
                Ok(None) => debug!(mapping = rule.name(), "Mapping produced no attributes"),
                Err(message) => return Err(ScimClientError::mapping(rule.name(), message)),
            }
        }
        Ok(raw)
    }
}

impl AttributeMapper<DirectoryUser> {
    /// Mapper with the built-in user rule.
    #[must_use]
    pub fn for_users() -> Self {
        Self::new().with_rule(DefaultUserMapping)
    }
}

impl AttributeMapper<DirectoryGroup> {
    /// Mapper with the built-in group rule.
    #[must_use]
    pub fn for_groups() -> Self {
        Self::new().with_rule(DefaultGroupMapping)
    }
}

fn merge_into(target: &mut RawAttributes, source: RawAttributes) {
    for (key, value) in source {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_into(existing, incoming);
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

// ── Built-in rules ────────────────────────────────────────────────────

/// Core user attributes: `userName`, `name`, `displayName`, `active`,
/// primary work email.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultUserMapping;

impl PropertyMapping<DirectoryUser> for DefaultUserMapping {
    fn name(&self) -> &str {
        "default-scim-user"
    }

    fn evaluate(
        &self,
        user: &DirectoryUser,
        _context: &MappingContext<'_>,
    ) -> Result<Option<RawAttributes>, String> {
        let mut attributes = RawAttributes::new();
        attributes.insert("userName".into(), json!(user.username));
        attributes.insert(
            "displayName".into(),
            json!(user.name.as_deref().unwrap_or(&user.username)),
        );
        attributes.insert("active".into(), json!(user.is_active));

        if let Some(name) = &user.name {
            let (given, family) = match name.rsplit_once(' ') {
                Some((given, family)) => (Some(given), Some(family)),
                None => (Some(name.as_str()), None),
            };
            attributes.insert(
                "name".into(),
                json!({
                    "formatted": name,
                    "givenName": given,
                    "familyName": family,
                }),
            );
        }

        if let Some(email) = &user.email {
            attributes.insert(
                "emails".into(),
                json!([{ "value": email, "type": "work", "primary": true }]),
            );
        }

        Ok(Some(attributes))
    }
}

/// Core group attributes: `displayName`. Membership is reconciled
/// separately and never sent in create/replace payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultGroupMapping;

impl PropertyMapping<DirectoryGroup> for DefaultGroupMapping {
    fn name(&self) -> &str {
        "default-scim-group"
    }

    fn evaluate(
        &self,
        group: &DirectoryGroup,
        _context: &MappingContext<'_>,
    ) -> Result<Option<RawAttributes>, String> {
        let mut attributes = RawAttributes::new();
        attributes.insert("displayName".into(), json!(group.name));
        Ok(Some(attributes))
    }
}

/// How a [`FieldMapping`] obtains its value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldSource {
    /// Copy a field of the object. Dotted paths descend into nested objects;
    /// unknown top-level names are looked up in `attributes`.
    Direct(String),
    /// Always emit this value.
    Constant(Value),
}

/// String transform applied to the resolved value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldTransform {
    Lowercase,
    Uppercase,
}

impl std::str::FromStr for FieldTransform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lowercase" => Ok(Self::Lowercase),
            "uppercase" => Ok(Self::Uppercase),
            other => Err(format!("unknown transform '{other}'")),
        }
    }
}

/// Declarative mapping of one source value onto one SCIM attribute path,
/// e.g. `department` → `urn:...:enterprise:2.0:User.department` or
/// `email` → `emails[0].value`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMapping {
    name: String,
    source: FieldSource,
    target_path: String,
    transform: Option<FieldTransform>,
}

impl FieldMapping {
    #[must_use]
    pub fn direct(
        name: impl Into<String>,
        source_field: impl Into<String>,
        target_path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source: FieldSource::Direct(source_field.into()),
            target_path: target_path.into(),
            transform: None,
        }
    }

    #[must_use]
    pub fn constant(name: impl Into<String>, value: Value, target_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: FieldSource::Constant(value),
            target_path: target_path.into(),
            transform: None,
        }
    }

    #[must_use]
    pub fn with_transform(mut self, transform: FieldTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    fn resolve(&self, object: &Value) -> Option<Value> {
        let value = match &self.source {
            FieldSource::Constant(value) => value.clone(),
            FieldSource::Direct(field) => lookup_field(object, field)?.clone(),
        };

        Some(match (value, self.transform) {
            (Value::String(s), Some(FieldTransform::Lowercase)) => Value::String(s.to_lowercase()),
            (Value::String(s), Some(FieldTransform::Uppercase)) => Value::String(s.to_uppercase()),
            (value, _) => value,
        })
    }
}

impl<O: Serialize> PropertyMapping<O> for FieldMapping {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(
        &self,
        object: &O,
        _context: &MappingContext<'_>,
    ) -> Result<Option<RawAttributes>, String> {
        let source = serde_json::to_value(object).map_err(|e| e.to_string())?;
        let Some(value) = self.resolve(&source) else {
            return Ok(None);
        };

        let mut attributes = RawAttributes::new();
        set_path(&mut attributes, &self.target_path, value)?;
        Ok(Some(attributes))
    }
}

fn lookup_field<'v>(object: &'v Value, field: &str) -> Option<&'v Value> {
    let mut segments = field.split('.');
    let first = segments.next()?;
    let mut current = object
        .get(first)
        .or_else(|| object.get("attributes").and_then(|a| a.get(first)))?;
    for segment in segments {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Write `value` at a dotted attribute path. A segment may carry an array
/// index (`emails[0]`). Schema URNs containing dots are kept whole when the
/// path starts with `urn:`.
fn set_path(target: &mut RawAttributes, path: &str, value: Value) -> Result<(), String> {
    let segments = split_path(path);
    let Some((last, parents)) = segments.split_last() else {
        return Err("empty target path".to_string());
    };

    let mut current = target;
    for segment in parents {
        current = descend(current, segment)?;
    }

    let (key, index) = parse_segment(last)?;
    match index {
        None => {
            current.insert(key.to_string(), value);
        }
        Some(index) => {
            let array = array_slot(current, key, index)?;
            array[index] = value;
        }
    }
    Ok(())
}

fn split_path(path: &str) -> Vec<&str> {
    if path.starts_with("urn:") {
        // `urn:...:User.attr.sub`: the URN itself ends at the first '.'
        // after the last ':'.
        let urn_end = path
            .rfind(':')
            .and_then(|colon| path[colon..].find('.').map(|dot| colon + dot));
        return match urn_end {
            Some(end) => {
                let mut segments = vec![&path[..end]];
                segments.extend(path[end + 1..].split('.'));
                segments
            }
            None => vec![path],
        };
    }
    path.split('.').collect()
}

fn parse_segment(segment: &str) -> Result<(&str, Option<usize>), String> {
    let Some((key, rest)) = segment.split_once('[') else {
        return Ok((segment, None));
    };
    let index = rest
        .strip_suffix(']')
        .and_then(|i| i.parse::<usize>().ok())
        .ok_or_else(|| format!("invalid index in path segment '{segment}'"))?;
    Ok((key, Some(index)))
}

fn descend<'m>(
    current: &'m mut RawAttributes,
    segment: &str,
) -> Result<&'m mut RawAttributes, String> {
    let (key, index) = parse_segment(segment)?;
    let slot = match index {
        None => current
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new())),
        Some(index) => &mut array_slot(current, key, index)?[index],
    };
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    slot.as_object_mut()
        .ok_or_else(|| format!("'{key}' is not an object"))
}

fn array_slot<'m>(
    current: &'m mut RawAttributes,
    key: &str,
    index: usize,
) -> Result<&'m mut Vec<Value>, String> {
    let slot = current
        .entry(key.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if !slot.is_array() {
        *slot = Value::Array(Vec::new());
    }
    let array = slot
        .as_array_mut()
        .ok_or_else(|| format!("'{key}' is not an array"))?;
    // Overwrite an existing element or append one; never pad with nulls.
    match index.cmp(&array.len()) {
        std::cmp::Ordering::Less => {}
        std::cmp::Ordering::Equal => array.push(Value::Null),
        std::cmp::Ordering::Greater => {
            return Err(format!(
                "index {index} out of range for '{key}' ({} element(s))",
                array.len()
            ));
        }
    }
    Ok(array)
}

/// Rule backed by a closure.
pub struct FnMapping<F> {
    name: String,
    f: F,
}

impl<F> FnMapping<F> {
    pub fn new<O>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&O, &MappingContext<'_>) -> Result<Option<RawAttributes>, String> + Send + Sync,
    {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<O, F> PropertyMapping<O> for FnMapping<F>
where
    F: Fn(&O, &MappingContext<'_>) -> Result<Option<RawAttributes>, String> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(
        &self,
        object: &O,
        context: &MappingContext<'_>,
    ) -> Result<Option<RawAttributes>, String> {
        (self.f)(object, context)
    }
}
