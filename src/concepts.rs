use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value, json};

use crate::cache::NodeKey;
use crate::client::Pennsieve;
use crate::error::PennsieveError;
use crate::transport::{ApiRequest, Method, Transport};
use crate::wire::{array, as_list, opt_bool, opt_i64, opt_string, require_string, segment};

pub const DEFAULT_RELATIONSHIP: &str = "related_to";
pub const DEFAULT_PACKAGE_RELATIONSHIP: &str = "belongs_to";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    String,
    Long,
    Double,
    Boolean,
    Date,
}

impl ScalarType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarType::String => "string",
            ScalarType::Long => "long",
            ScalarType::Double => "double",
            ScalarType::Boolean => "boolean",
            ScalarType::Date => "date",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, PennsieveError> {
        match raw.to_ascii_lowercase().as_str() {
            "string" => Ok(ScalarType::String),
            "long" => Ok(ScalarType::Long),
            "double" => Ok(ScalarType::Double),
            "boolean" => Ok(ScalarType::Boolean),
            "date" => Ok(ScalarType::Date),
            _ => Err(PennsieveError::Validation(format!(
                "unsupported model property type '{raw}'"
            ))),
        }
    }

    fn coerce(&self, value: &Value) -> Result<Value, PennsieveError> {
        let mismatch =
            || PennsieveError::Validation(format!("value {value} is not a valid {}", self.as_str()));
        match self {
            ScalarType::String => Ok(match value {
                Value::String(_) => value.clone(),
                other => Value::String(other.to_string()),
            }),
            ScalarType::Long => value
                .as_i64()
                .or_else(|| value.as_f64().filter(|n| n.fract() == 0.0).map(|n| n as i64))
                .or_else(|| value.as_str().and_then(|text| text.trim().parse().ok()))
                .map(|n| json!(n))
                .ok_or_else(mismatch),
            ScalarType::Double => value
                .as_f64()
                .or_else(|| value.as_str().and_then(|text| text.trim().parse().ok()))
                .map(|n| json!(n))
                .ok_or_else(mismatch),
            ScalarType::Boolean => match value {
                Value::Bool(_) => Ok(value.clone()),
                Value::String(text) if text.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
                Value::String(text) if text.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
                _ => Err(mismatch()),
            },
            ScalarType::Date => value
                .as_str()
                .and_then(parse_date)
                .map(|at| Value::String(encode_date(at)))
                .ok_or_else(mismatch),
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelPropertyType {
    Scalar {
        data_type: ScalarType,
        format: Option<String>,
        unit: Option<String>,
    },
    Enumerated {
        data_type: ScalarType,
        format: Option<String>,
        unit: Option<String>,
        values: Option<Vec<Value>>,
        multi_select: bool,
    },
}

impl ModelPropertyType {
    pub fn scalar(data_type: ScalarType) -> Self {
        ModelPropertyType::Scalar {
            data_type,
            format: None,
            unit: None,
        }
    }

    pub fn data_type(&self) -> ScalarType {
        match self {
            ModelPropertyType::Scalar { data_type, .. }
            | ModelPropertyType::Enumerated { data_type, .. } => *data_type,
        }
    }

    pub fn from_json(value: &Value) -> Result<Self, PennsieveError> {
        match value {
            Value::String(name) => Ok(Self::scalar(ScalarType::parse(name)?)),
            Value::Object(_) => {
                let kind = opt_string(value, "type").unwrap_or_default().to_ascii_lowercase();
                if let Some(items) = value.get("items") {
                    return Ok(ModelPropertyType::Enumerated {
                        data_type: ScalarType::parse(&require_string(items, "type")?)?,
                        format: opt_string(items, "format"),
                        unit: opt_string(items, "unit"),
                        values: items.get("enum").and_then(Value::as_array).cloned(),
                        multi_select: kind == "array",
                    });
                }
                Ok(ModelPropertyType::Scalar {
                    data_type: ScalarType::parse(&kind)?,
                    format: opt_string(value, "format"),
                    unit: opt_string(value, "unit"),
                })
            }
            other => Err(PennsieveError::Json(format!(
                "invalid model property type {other}"
            ))),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ModelPropertyType::Scalar {
                data_type,
                format: None,
                unit: None,
            } => json!(data_type.as_str()),
            ModelPropertyType::Scalar {
                data_type,
                format,
                unit,
            } => json!({"type": data_type.as_str(), "format": format, "unit": unit}),
            ModelPropertyType::Enumerated {
                data_type,
                format,
                unit,
                values,
                multi_select,
            } => json!({
                "type": if *multi_select { "array" } else { "enum" },
                "items": {
                    "type": data_type.as_str(),
                    "format": format,
                    "unit": unit,
                    "enum": values,
                },
            }),
        }
    }

    pub fn encode(&self, value: &Value) -> Result<Value, PennsieveError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match self {
            ModelPropertyType::Scalar { data_type, .. } => data_type.coerce(value),
            ModelPropertyType::Enumerated {
                data_type,
                values,
                multi_select,
                ..
            } => {
                let items: Vec<&Value> = if *multi_select {
                    value
                        .as_array()
                        .ok_or_else(|| {
                            PennsieveError::Validation(format!("expected a list, got {value}"))
                        })?
                        .iter()
                        .collect()
                } else {
                    vec![value]
                };
                let mut encoded = Vec::with_capacity(items.len());
                for item in items {
                    let item = data_type.coerce(item)?;
                    if let Some(allowed) = values
                        && !allowed.contains(&item)
                    {
                        return Err(PennsieveError::Validation(format!(
                            "value {item} is not one of {}",
                            Value::Array(allowed.clone())
                        )));
                    }
                    encoded.push(item);
                }
                if *multi_select {
                    Ok(Value::Array(encoded))
                } else {
                    Ok(encoded.remove(0))
                }
            }
        }
    }
}

/// UTC, RFC 3339, microseconds always present.
pub fn encode_date(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(at) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(at.and_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|at| at.and_utc())
}

fn check_name(kind: &str, name: &str) -> Result<(), PennsieveError> {
    if name.contains(' ') {
        return Err(PennsieveError::Validation(format!(
            "{kind} '{name}' cannot contain spaces, try '{}' or '{}'",
            name.replace(' ', "_"),
            name.replace(' ', "-")
        )));
    }
    if name.is_empty() {
        return Err(PennsieveError::Validation(format!("{kind} name is empty")));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelProperty {
    pub id: Option<String>,
    pub name: String,
    pub display_name: String,
    pub data_type: ModelPropertyType,
    pub locked: bool,
    pub default: bool,
    pub title: bool,
    pub description: String,
    pub required: bool,
}

impl ModelProperty {
    pub fn new(name: &str, data_type: ModelPropertyType) -> Result<Self, PennsieveError> {
        check_name("property", name)?;
        Ok(Self {
            id: None,
            name: name.to_string(),
            display_name: name.to_string(),
            data_type,
            locked: false,
            default: false,
            title: false,
            description: String::new(),
            required: false,
        })
    }

    pub fn as_title(mut self) -> Self {
        self.title = true;
        self.required = true;
        self.default = true;
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self.default = required;
        self
    }

    pub fn with_display_name(mut self, display_name: &str) -> Self {
        self.display_name = display_name.to_string();
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn from_json(value: &Value) -> Result<Self, PennsieveError> {
        let name = require_string(value, "name")?;
        let raw_type = value
            .get("dataType")
            .or_else(|| value.get("data_type"))
            .cloned()
            .unwrap_or_else(|| json!("string"));
        let title = opt_bool(value, "conceptTitle")
            .or_else(|| opt_bool(value, "title"))
            .unwrap_or(false);
        let required = opt_bool(value, "required").unwrap_or(title);
        Ok(Self {
            id: opt_string(value, "id"),
            display_name: opt_string(value, "displayName").unwrap_or_else(|| name.clone()),
            name,
            data_type: ModelPropertyType::from_json(&raw_type)?,
            locked: opt_bool(value, "locked").unwrap_or(false),
            default: opt_bool(value, "default").unwrap_or(required),
            title,
            description: opt_string(value, "description").unwrap_or_default(),
            required,
        })
    }

    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "displayName": self.display_name,
            "dataType": self.data_type.to_json(),
            "locked": self.locked,
            "default": self.default,
            "conceptTitle": self.title,
            "description": self.description,
            "required": self.required,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkedProperty {
    pub id: Option<String>,
    pub name: String,
    pub display_name: String,
    // Target model id.
    pub target: String,
    pub position: Option<i64>,
}

impl LinkedProperty {
    pub fn new(name: &str, target: &str) -> Result<Self, PennsieveError> {
        check_name("linked property", name)?;
        Ok(Self {
            id: None,
            name: name.to_string(),
            display_name: name.to_string(),
            target: target.to_string(),
            position: None,
        })
    }

    pub fn from_json(value: &Value) -> Result<Self, PennsieveError> {
        let link = value.get("link").unwrap_or(value);
        let name = require_string(link, "name")?;
        Ok(Self {
            id: opt_string(link, "id"),
            display_name: opt_string(link, "displayName").unwrap_or_else(|| name.clone()),
            name,
            target: require_string(link, "to")?,
            position: opt_i64(link, "position"),
        })
    }

    pub fn to_json(&self) -> Value {
        let mut out = json!({"name": self.name, "displayName": self.display_name, "to": self.target});
        if let (Some(position), Some(fields)) = (self.position, out.as_object_mut()) {
            fields.insert("position".to_string(), json!(position));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelValue {
    pub name: String,
    pub value: Value,
    pub data_type: ModelPropertyType,
}

impl ModelValue {
    pub fn new(name: &str, value: Value, data_type: ModelPropertyType) -> Result<Self, PennsieveError> {
        check_name("value", name)?;
        let value = data_type.encode(&value)?;
        Ok(Self {
            name: name.to_string(),
            value,
            data_type,
        })
    }

    pub fn from_json(value: &Value) -> Result<Self, PennsieveError> {
        let data_type = match value.get("dataType").or_else(|| value.get("data_type")) {
            Some(raw) if !raw.is_null() => ModelPropertyType::from_json(raw)?,
            _ => ModelPropertyType::scalar(ScalarType::String),
        };
        let raw = value.get("value").cloned().unwrap_or(Value::Null);
        Ok(Self {
            name: require_string(value, "name")?,
            value: data_type.encode(&raw).unwrap_or(raw),
            data_type,
        })
    }

    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "value": self.value,
            "dataType": self.data_type.data_type().as_str(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub id: Option<String>,
    pub dataset_id: String,
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub locked: bool,
    pub count: Option<i64>,
    pub state: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub schema: Vec<ModelProperty>,
    pub linked: Vec<LinkedProperty>,
}

impl Model {
    pub fn new(dataset_id: &str, name: &str) -> Result<Self, PennsieveError> {
        check_name("model", name)?;
        Ok(Self {
            id: None,
            dataset_id: dataset_id.to_string(),
            name: name.to_string(),
            display_name: name.to_string(),
            description: String::new(),
            locked: false,
            count: None,
            state: None,
            created_at: None,
            updated_at: None,
            schema: Vec::new(),
            linked: Vec::new(),
        })
    }

    pub fn with_display_name(mut self, display_name: &str) -> Self {
        self.display_name = display_name.to_string();
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn add_property(&mut self, property: ModelProperty) {
        match self.schema.iter_mut().find(|existing| existing.name == property.name) {
            Some(existing) => *existing = property,
            None => self.schema.push(property),
        }
    }

    pub fn property(&self, name: &str) -> Option<&ModelProperty> {
        self.schema.iter().find(|property| property.name == name)
    }

    pub fn title_property(&self) -> Option<&ModelProperty> {
        self.schema.iter().find(|property| property.title)
    }

    pub fn validate_schema(&self) -> Result<(), PennsieveError> {
        if self.schema.is_empty() {
            return Ok(());
        }
        match self.schema.iter().filter(|property| property.title).count() {
            1 => Ok(()),
            0 => Err(PennsieveError::Validation(format!(
                "model '{}' needs a title property",
                self.name
            ))),
            count => Err(PennsieveError::Validation(format!(
                "model '{}' has {count} title properties, expected one",
                self.name
            ))),
        }
    }

    pub fn from_json(value: &Value, dataset_id: &str) -> Result<Self, PennsieveError> {
        let name = require_string(value, "name")?;
        Ok(Self {
            id: opt_string(value, "id"),
            dataset_id: opt_string(value, "datasetId").unwrap_or_else(|| dataset_id.to_string()),
            display_name: opt_string(value, "displayName").unwrap_or_else(|| name.clone()),
            name,
            description: opt_string(value, "description").unwrap_or_default(),
            locked: opt_bool(value, "locked").unwrap_or(false),
            count: opt_i64(value, "count"),
            state: opt_string(value, "state"),
            created_at: opt_string(value, "createdAt"),
            updated_at: opt_string(value, "updatedAt"),
            schema: array(value, "schema")
                .iter()
                .map(ModelProperty::from_json)
                .collect::<Result<_, _>>()?,
            linked: array(value, "linked")
                .iter()
                .map(LinkedProperty::from_json)
                .collect::<Result<_, _>>()?,
        })
    }

    pub fn request_body(&self) -> Value {
        json!({
            "name": self.name,
            "displayName": self.display_name,
            "description": self.description,
            "locked": self.locked,
            "schema": self.schema_json(),
        })
    }

    fn schema_json(&self) -> Value {
        Value::Array(self.schema.iter().map(ModelProperty::to_json).collect())
    }

    fn require_id(&self, action: &str) -> Result<&str, PennsieveError> {
        self.id
            .as_deref()
            .ok_or_else(|| PennsieveError::NotCreated(action.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: Option<String>,
    pub dataset_id: String,
    pub model: String,
    pub values: Vec<ModelValue>,
    pub created_at: Option<String>,
    pub created_by: Option<String>,
    pub updated_at: Option<String>,
    pub updated_by: Option<String>,
}

impl Record {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|value| value.name == name)
            .map(|value| &value.value)
    }

    pub fn set(&mut self, name: &str, value: Value) -> Result<(), PennsieveError> {
        match self.values.iter_mut().find(|existing| existing.name == name) {
            Some(existing) => {
                existing.value = existing.data_type.encode(&value)?;
            }
            None => {
                let data_type = ModelPropertyType::scalar(infer_scalar(&value));
                self.values.push(ModelValue::new(name, value, data_type)?);
            }
        }
        Ok(())
    }

    pub fn from_json(value: &Value, dataset_id: &str) -> Result<Self, PennsieveError> {
        Ok(Self {
            id: opt_string(value, "id"),
            dataset_id: opt_string(value, "datasetId").unwrap_or_else(|| dataset_id.to_string()),
            model: require_string(value, "type")?,
            values: array(value, "values")
                .iter()
                .map(ModelValue::from_json)
                .collect::<Result<_, _>>()?,
            created_at: opt_string(value, "createdAt"),
            created_by: opt_string(value, "createdBy"),
            updated_at: opt_string(value, "updatedAt"),
            updated_by: opt_string(value, "updatedBy"),
        })
    }

    pub fn request_body(&self) -> Value {
        json!({"values": self.values.iter().map(ModelValue::to_json).collect::<Vec<_>>()})
    }

    fn require_id(&self, action: &str) -> Result<&str, PennsieveError> {
        self.id
            .as_deref()
            .ok_or_else(|| PennsieveError::NotCreated(action.to_string()))
    }
}

fn new_record(model: &Model, values: &[(&str, Value)]) -> Result<Record, PennsieveError> {
    let keys: BTreeSet<&str> = values.iter().map(|(name, _)| *name).collect();
    let unknown: Vec<&str> = keys
        .iter()
        .copied()
        .filter(|name| model.property(name).is_none())
        .collect();
    if !unknown.is_empty() {
        return Err(PennsieveError::Validation(format!(
            "invalid properties for '{}': {}",
            model.name,
            unknown.join(", ")
        )));
    }
    if keys.is_empty() {
        let schema: Vec<&str> = model.schema.iter().map(|p| p.name.as_str()).collect();
        return Err(PennsieveError::Validation(format!(
            "a record of '{}' needs values for at least one of: {}",
            model.name,
            schema.join(", ")
        )));
    }
    let mut typed = Vec::with_capacity(values.len());
    for (name, value) in values {
        let property = model
            .property(name)
            .ok_or_else(|| PennsieveError::Validation(format!("invalid property '{name}'")))?;
        typed.push(ModelValue::new(name, value.clone(), property.data_type.clone())?);
    }
    Ok(Record {
        id: None,
        dataset_id: model.dataset_id.clone(),
        model: model.name.clone(),
        values: typed,
        created_at: None,
        created_by: None,
        updated_at: None,
        updated_by: None,
    })
}

fn infer_scalar(value: &Value) -> ScalarType {
    match value {
        Value::Bool(_) => ScalarType::Boolean,
        Value::Number(number) if number.is_f64() => ScalarType::Double,
        Value::Number(_) => ScalarType::Long,
        _ => ScalarType::String,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipType {
    pub id: Option<String>,
    pub dataset_id: String,
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub schema: Vec<ModelProperty>,
}

impl RelationshipType {
    pub fn new(dataset_id: &str, name: &str) -> Result<Self, PennsieveError> {
        check_name("relationship", name)?;
        Ok(Self {
            id: None,
            dataset_id: dataset_id.to_string(),
            name: name.to_string(),
            display_name: name.to_string(),
            description: name.to_string(),
            source: None,
            destination: None,
            schema: Vec::new(),
        })
    }

    pub fn between(mut self, source: Option<&str>, destination: Option<&str>) -> Self {
        self.source = source.map(|id| id.to_string());
        self.destination = destination.map(|id| id.to_string());
        self
    }

    pub fn from_json(value: &Value, dataset_id: &str) -> Result<Self, PennsieveError> {
        let name = require_string(value, "name")?;
        Ok(Self {
            id: opt_string(value, "id"),
            dataset_id: opt_string(value, "datasetId").unwrap_or_else(|| dataset_id.to_string()),
            display_name: opt_string(value, "displayName").unwrap_or_else(|| name.clone()),
            description: opt_string(value, "description").unwrap_or_default(),
            name,
            source: opt_string(value, "from"),
            destination: opt_string(value, "to"),
            schema: array(value, "schema")
                .iter()
                .map(ModelProperty::from_json)
                .collect::<Result<_, _>>()?,
        })
    }

    pub fn request_body(&self) -> Value {
        let mut body = Map::new();
        body.insert("name".to_string(), json!(self.name));
        body.insert("displayName".to_string(), json!(self.display_name));
        body.insert("description".to_string(), json!(self.description));
        body.insert("locked".to_string(), json!(false));
        body.insert(
            "schema".to_string(),
            Value::Array(self.schema.iter().map(ModelProperty::to_json).collect()),
        );
        body.insert("type".to_string(), json!("relationship"));
        if let Some(source) = &self.source {
            body.insert("from".to_string(), json!(source));
        }
        if let Some(destination) = &self.destination {
            body.insert("to".to_string(), json!(destination));
        }
        Value::Object(body)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub id: Option<String>,
    pub dataset_id: String,
    pub relationship_type: String,
    pub source: String,
    pub destination: String,
    pub values: Vec<ModelValue>,
}

impl Relationship {
    pub fn from_json(value: &Value, dataset_id: &str) -> Result<Self, PennsieveError> {
        Ok(Self {
            id: opt_string(value, "id"),
            dataset_id: opt_string(value, "datasetId").unwrap_or_else(|| dataset_id.to_string()),
            relationship_type: require_string(value, "type")?,
            source: require_string(value, "from")?,
            destination: require_string(value, "to")?,
            values: array(value, "values")
                .iter()
                .map(ModelValue::from_json)
                .collect::<Result<_, _>>()?,
        })
    }

    pub fn request_body(&self) -> Value {
        json!({
            "values": self.values.iter().map(ModelValue::to_json).collect::<Vec<_>>(),
            "from": self.source,
            "to": self.destination,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Topology {
    pub models: Vec<Model>,
    pub relationships: Vec<RelationshipType>,
    pub linked_properties: Vec<LinkedProperty>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationCount {
    pub name: String,
    pub display_name: String,
    pub count: i64,
}

impl RelationCount {
    pub fn from_json(value: &Value) -> Result<Self, PennsieveError> {
        let name = require_string(value, "name")?;
        Ok(Self {
            display_name: opt_string(value, "displayName").unwrap_or_else(|| name.clone()),
            name,
            count: opt_i64(value, "count").unwrap_or(0),
        })
    }

    // Package proxies show up as a "package" model named "Files".
    fn is_files(&self) -> bool {
        self.name == "package" && self.display_name == "Files"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkedValue {
    pub id: String,
    // Id of the linked property type.
    pub link_id: String,
    pub source: String,
    pub target: String,
}

impl LinkedValue {
    pub fn from_json(value: &Value) -> Result<Self, PennsieveError> {
        Ok(Self {
            id: require_string(value, "id")?,
            link_id: require_string(value, "schemaLinkedPropertyId")?,
            source: require_string(value, "from")?,
            target: require_string(value, "to")?,
        })
    }
}

const RELATED_PAGE: usize = 100;

impl<T: Transport> Pennsieve<T> {
    fn model_request(&self, method: Method, dataset_id: &str, tail: &str) -> ApiRequest {
        let (host, base) = self.settings().model_service();
        ApiRequest::new(method, format!("{base}/{}{tail}", segment(dataset_id))).host(host)
    }

    fn load_model(&mut self, dataset_id: &str, mut model: Model) -> Result<Model, PennsieveError> {
        let id = model.require_id("loading the schema")?.to_string();
        model.schema = self.model_schema(dataset_id, &id)?;
        model.linked = self.linked_properties(dataset_id, &id)?;
        self.cache_mut().snapshot(&id, model.request_body());
        Ok(model)
    }

    pub fn models(&mut self, dataset: NodeKey) -> Result<Vec<Model>, PennsieveError> {
        let dataset_id = self.dataset_id(dataset, "listing models")?;
        let request = self.model_request(Method::Get, &dataset_id, "/concepts");
        let value = self.call(request)?;
        let models = as_list(&value)?
            .iter()
            .map(|entry| Model::from_json(entry, &dataset_id))
            .collect::<Result<Vec<_>, _>>()?;
        models
            .into_iter()
            .map(|model| self.load_model(&dataset_id, model))
            .collect()
    }

    pub fn model(&mut self, dataset: NodeKey, id_or_name: &str) -> Result<Model, PennsieveError> {
        let dataset_id = self.dataset_id(dataset, "reading a model")?;
        let request = self.model_request(
            Method::Get,
            &dataset_id,
            &format!("/concepts/{}", segment(id_or_name)),
        );
        let value = self.call(request)?;
        let model = Model::from_json(&value, &dataset_id)?;
        self.load_model(&dataset_id, model)
    }

    pub fn model_schema(
        &mut self,
        dataset_id: &str,
        model_id: &str,
    ) -> Result<Vec<ModelProperty>, PennsieveError> {
        let request = self.model_request(
            Method::Get,
            dataset_id,
            &format!("/concepts/{}/properties", segment(model_id)),
        );
        let value = self.call(request)?;
        as_list(&value)?.iter().map(ModelProperty::from_json).collect()
    }

    pub fn linked_properties(
        &mut self,
        dataset_id: &str,
        model_id: &str,
    ) -> Result<Vec<LinkedProperty>, PennsieveError> {
        let request = self.model_request(
            Method::Get,
            dataset_id,
            &format!("/concepts/{}/linked", segment(model_id)),
        );
        let value = self.call(request)?;
        as_list(&value)?.iter().map(LinkedProperty::from_json).collect()
    }

    /// Creates a model and its properties. When the properties are rejected
    /// the model is deleted again and the error returned.
    pub fn create_model(&mut self, dataset: NodeKey, model: Model) -> Result<Model, PennsieveError> {
        let dataset_id = self.dataset_id(dataset, "creating a model")?;
        model.validate_schema()?;
        let request = self
            .model_request(Method::Post, &dataset_id, "/concepts")
            .json(model.request_body());
        let value = self.call(request)?;
        let mut created = Model::from_json(&value, &dataset_id)?;
        let id = created.require_id("creating properties")?.to_string();

        if !model.schema.is_empty() {
            let request = self
                .model_request(
                    Method::Put,
                    &dataset_id,
                    &format!("/concepts/{}/properties", segment(&id)),
                )
                .json(model.schema_json());
            match self.call(request) {
                Ok(value) => {
                    created.schema = as_list(&value)?
                        .iter()
                        .map(ModelProperty::from_json)
                        .collect::<Result<_, _>>()?;
                }
                Err(err) => {
                    let rollback = self.model_request(
                        Method::Delete,
                        &dataset_id,
                        &format!("/concepts/{}", segment(&id)),
                    );
                    self.call(rollback)?;
                    return Err(PennsieveError::Rejected(format!(
                        "could not create model properties: {err}"
                    )));
                }
            }
        }
        self.cache_mut().snapshot(&id, created.request_body());
        Ok(created)
    }

    pub fn update_model(&mut self, model: &mut Model) -> Result<bool, PennsieveError> {
        let id = model.require_id("updating")?.to_string();
        let body = model.request_body();
        if self.cache().matches_snapshot(&id, &body) {
            return Ok(false);
        }
        model.validate_schema()?;
        let mut payload = body.clone();
        if let Some(fields) = payload.as_object_mut() {
            fields.insert("id".to_string(), json!(id));
        }
        let request = self
            .model_request(
                Method::Put,
                &model.dataset_id,
                &format!("/concepts/{}", segment(&id)),
            )
            .json(payload);
        let value = self.call(request)?;
        if let Ok(updated) = Model::from_json(&value, &model.dataset_id) {
            model.updated_at = updated.updated_at.or(model.updated_at.take());
        }
        if !model.schema.is_empty() {
            let request = self
                .model_request(
                    Method::Put,
                    &model.dataset_id,
                    &format!("/concepts/{}/properties", segment(&id)),
                )
                .json(model.schema_json());
            let value = self.call(request)?;
            model.schema = as_list(&value)?
                .iter()
                .map(ModelProperty::from_json)
                .collect::<Result<_, _>>()?;
        }
        self.cache_mut().snapshot(&id, model.request_body());
        Ok(true)
    }

    pub fn delete_model(&mut self, model: &mut Model) -> Result<(), PennsieveError> {
        let id = model.require_id("deleting")?.to_string();
        let request = self.model_request(
            Method::Delete,
            &model.dataset_id,
            &format!("/concepts/{}", segment(&id)),
        );
        self.call(request)?;
        self.cache_mut().drop_snapshot(&id);
        model.id = None;
        Ok(())
    }

    pub fn delete_model_property(
        &mut self,
        model: &mut Model,
        name: &str,
    ) -> Result<(), PennsieveError> {
        let model_id = model.require_id("removing a property")?.to_string();
        let position = model
            .schema
            .iter()
            .position(|property| property.name == name)
            .ok_or_else(|| PennsieveError::NotFound(format!("property '{name}'")))?;
        if let Some(property_id) = model.schema[position].id.clone() {
            let request = self.model_request(
                Method::Delete,
                &model.dataset_id,
                &format!(
                    "/concepts/{}/properties/{}",
                    segment(&model_id),
                    segment(&property_id)
                ),
            );
            self.call(request)?;
        }
        model.schema.remove(position);
        self.cache_mut().snapshot(&model_id, model.request_body());
        Ok(())
    }

    pub fn add_linked_property(
        &mut self,
        model: &mut Model,
        link: LinkedProperty,
    ) -> Result<LinkedProperty, PennsieveError> {
        let model_id = model.require_id("linking")?.to_string();
        let existing = self.linked_properties(&model.dataset_id, &model_id)?;
        if existing.iter().any(|current| current.name == link.name) {
            return Err(PennsieveError::Validation(format!(
                "linked property '{}' already exists",
                link.name
            )));
        }
        let request = self
            .model_request(
                Method::Post,
                &model.dataset_id,
                &format!("/concepts/{}/linked", segment(&model_id)),
            )
            .json(link.to_json());
        let value = self.call(request)?;
        let created = LinkedProperty::from_json(&value)?;
        model.linked.push(created.clone());
        self.cache_mut().snapshot(&model_id, model.request_body());
        Ok(created)
    }

    pub fn related_models(&mut self, model: &Model) -> Result<Vec<Model>, PennsieveError> {
        let id = model.require_id("reading related models")?.to_string();
        let request = self.model_request(
            Method::Get,
            &model.dataset_id,
            &format!("/concepts/{}/related", segment(&id)),
        );
        let value = self.call(request)?;
        as_list(&value)?
            .iter()
            .map(|entry| Model::from_json(entry, &model.dataset_id))
            .collect()
    }

    pub fn records(
        &mut self,
        model: &Model,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Record>, PennsieveError> {
        let id = model.require_id("listing records")?.to_string();
        let request = self
            .model_request(
                Method::Get,
                &model.dataset_id,
                &format!("/concepts/{}/instances", segment(&id)),
            )
            .query("limit", limit)
            .query("offset", offset);
        let value = self.call(request)?;
        let records = as_list(&value)?
            .iter()
            .map(|entry| Record::from_json(entry, &model.dataset_id))
            .collect::<Result<Vec<_>, _>>()?;
        for record in &records {
            if let Some(id) = &record.id {
                self.cache_mut().snapshot(id, record.request_body());
            }
        }
        Ok(records)
    }

    pub fn record(&mut self, model: &Model, record_id: &str) -> Result<Record, PennsieveError> {
        let request = self.model_request(
            Method::Get,
            &model.dataset_id,
            &format!(
                "/concepts/{}/instances/{}",
                segment(&model.name),
                segment(record_id)
            ),
        );
        let value = self.call(request)?;
        let record = Record::from_json(&value, &model.dataset_id)?;
        self.cache_mut().snapshot(record_id, record.request_body());
        Ok(record)
    }

    pub fn create_record(
        &mut self,
        model: &Model,
        values: &[(&str, Value)],
    ) -> Result<Record, PennsieveError> {
        model.require_id("creating records")?;
        let record = new_record(model, values)?;
        let request = self
            .model_request(
                Method::Post,
                &model.dataset_id,
                &format!("/concepts/{}/instances", segment(&model.name)),
            )
            .json(record.request_body());
        let value = self.call(request)?;
        let created = Record::from_json(&value, &model.dataset_id)?;
        if let Some(id) = &created.id {
            self.cache_mut().snapshot(id, created.request_body());
        }
        Ok(created)
    }

    pub fn update_record(&mut self, record: &mut Record) -> Result<bool, PennsieveError> {
        let id = record.require_id("updating")?.to_string();
        let body = record.request_body();
        if self.cache().matches_snapshot(&id, &body) {
            return Ok(false);
        }
        let request = self
            .model_request(
                Method::Put,
                &record.dataset_id,
                &format!(
                    "/concepts/{}/instances/{}",
                    segment(&record.model),
                    segment(&id)
                ),
            )
            .json(body);
        let value = self.call(request)?;
        if let Ok(updated) = Record::from_json(&value, &record.dataset_id) {
            record.updated_at = updated.updated_at.or(record.updated_at.take());
            record.updated_by = updated.updated_by.or(record.updated_by.take());
        }
        self.cache_mut().snapshot(&id, record.request_body());
        Ok(true)
    }

    pub fn delete_record(&mut self, record: &mut Record) -> Result<(), PennsieveError> {
        let id = record.require_id("deleting")?.to_string();
        let request = self.model_request(
            Method::Delete,
            &record.dataset_id,
            &format!(
                "/concepts/{}/instances/{}",
                segment(&record.model),
                segment(&id)
            ),
        );
        self.call(request)?;
        self.cache_mut().drop_snapshot(&id);
        record.id = None;
        Ok(())
    }

    pub fn delete_records(
        &mut self,
        model: &Model,
        record_ids: &[String],
    ) -> Result<Vec<String>, PennsieveError> {
        let id = model.require_id("deleting records")?.to_string();
        let request = self
            .model_request(
                Method::Delete,
                &model.dataset_id,
                &format!("/concepts/{}/instances", segment(&id)),
            )
            .json(json!(record_ids));
        let value = self.call(request)?;
        let errors = array(&value, "errors")
            .iter()
            .map(|error| match error {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect();
        for record_id in record_ids {
            self.cache_mut().drop_snapshot(record_id);
        }
        Ok(errors)
    }

    pub fn relationship_types(
        &mut self,
        dataset: NodeKey,
    ) -> Result<Vec<RelationshipType>, PennsieveError> {
        let dataset_id = self.dataset_id(dataset, "listing relationships")?;
        self.relationship_types_of(&dataset_id)
    }

    fn relationship_types_of(
        &mut self,
        dataset_id: &str,
    ) -> Result<Vec<RelationshipType>, PennsieveError> {
        let request = self.model_request(Method::Get, dataset_id, "/relationships");
        let value = self.call(request)?;
        as_list(&value)?
            .iter()
            .map(|entry| RelationshipType::from_json(entry, dataset_id))
            .collect()
    }

    pub fn create_relationship_type(
        &mut self,
        dataset: NodeKey,
        relationship: &RelationshipType,
    ) -> Result<RelationshipType, PennsieveError> {
        let dataset_id = self.dataset_id(dataset, "creating a relationship")?;
        self.create_relationship_type_in(&dataset_id, relationship)
    }

    fn create_relationship_type_in(
        &mut self,
        dataset_id: &str,
        relationship: &RelationshipType,
    ) -> Result<RelationshipType, PennsieveError> {
        let request = self
            .model_request(Method::Post, dataset_id, "/relationships")
            .json(relationship.request_body());
        let value = self.call(request)?;
        RelationshipType::from_json(&value, dataset_id)
    }

    pub fn update_relationship_type(
        &mut self,
        _relationship: &RelationshipType,
    ) -> Result<RelationshipType, PennsieveError> {
        Err(PennsieveError::Unsupported(
            "updating relationship types".to_string(),
        ))
    }

    pub fn delete_relationship_type(
        &mut self,
        _relationship: &RelationshipType,
    ) -> Result<(), PennsieveError> {
        Err(PennsieveError::Unsupported(
            "deleting relationship types".to_string(),
        ))
    }

    pub fn relationships(
        &mut self,
        relationship: &RelationshipType,
    ) -> Result<Vec<Relationship>, PennsieveError> {
        let id = relationship
            .id
            .as_deref()
            .ok_or_else(|| PennsieveError::NotCreated("listing relationships".to_string()))?;
        let request = self.model_request(
            Method::Get,
            &relationship.dataset_id,
            &format!("/relationships/{}/instances", segment(id)),
        );
        let value = self.call(request)?;
        as_list(&value)?
            .iter()
            .map(|entry| Relationship::from_json(entry, &relationship.dataset_id))
            .collect()
    }

    fn ensure_relationship_type(
        &mut self,
        dataset_id: &str,
        name: &str,
        source_model: &str,
        destination_model: Option<&str>,
    ) -> Result<RelationshipType, PennsieveError> {
        if let Some(existing) = self
            .relationship_types_of(dataset_id)?
            .into_iter()
            .find(|relationship| relationship.name == name)
        {
            return Ok(existing);
        }
        let model_id = |pennsieve: &mut Self, model: &str| -> Result<Option<String>, PennsieveError> {
            let request = pennsieve.model_request(
                Method::Get,
                dataset_id,
                &format!("/concepts/{}", segment(model)),
            );
            let value = pennsieve.call(request)?;
            Ok(opt_string(&value, "id"))
        };
        let source = model_id(self, source_model)?;
        let destination = match destination_model {
            Some(model) => model_id(self, model)?,
            None => None,
        };
        let relationship = RelationshipType::new(dataset_id, name)?
            .between(source.as_deref(), destination.as_deref());
        self.create_relationship_type_in(dataset_id, &relationship)
    }

    pub fn relate_to(
        &mut self,
        source: &Record,
        destination: &Record,
        relationship_type: Option<&str>,
    ) -> Result<Relationship, PennsieveError> {
        let source_id = source.require_id("relating")?.to_string();
        let destination_id = destination.require_id("relating")?.to_string();
        let name = relationship_type.unwrap_or(DEFAULT_RELATIONSHIP);
        let relationship = self.ensure_relationship_type(
            &source.dataset_id,
            name,
            &source.model,
            Some(&destination.model),
        )?;
        let instance = Relationship {
            id: None,
            dataset_id: source.dataset_id.clone(),
            relationship_type: relationship.name.clone(),
            source: source_id,
            destination: destination_id,
            values: Vec::new(),
        };
        let type_id = relationship.id.unwrap_or(relationship.name);
        let request = self
            .model_request(
                Method::Post,
                &source.dataset_id,
                &format!("/relationships/{}/instances", segment(&type_id)),
            )
            .json(instance.request_body());
        let value = self.call(request)?;
        let created = match &value {
            Value::Array(items) => items.first().ok_or_else(|| {
                PennsieveError::Json("empty relationship response".to_string())
            })?,
            other => other,
        };
        Relationship::from_json(created, &source.dataset_id)
    }

    pub fn link_package(
        &mut self,
        record: &Record,
        package: NodeKey,
        relationship_type: Option<&str>,
    ) -> Result<Relationship, PennsieveError> {
        let record_id = record.require_id("linking packages")?.to_string();
        let node = self.node(package)?;
        if node.is_container() {
            return Err(PennsieveError::Validation(format!(
                "only packages can be linked to records, got '{}'",
                node.name
            )));
        }
        let package_id = node.require_id("linking")?.to_string();
        let name = relationship_type.unwrap_or(DEFAULT_PACKAGE_RELATIONSHIP);
        let relationship =
            self.ensure_relationship_type(&record.dataset_id, name, &record.model, None)?;
        let body = json!({
            "externalId": package_id,
            "conceptType": record.model,
            "conceptInstanceId": record_id,
            "targets": [{
                "direction": "FromTarget",
                "linkTarget": {"ConceptInstance": {"id": record_id}},
                "relationshipType": relationship.name,
                "relationshipData": [],
            }],
        });
        let request = self
            .model_request(Method::Post, &record.dataset_id, "/proxy/package/instances")
            .json(body);
        let value = self.call(request)?;
        let instance = as_list(&value)?
            .first()
            .and_then(|entry| entry.get("relationshipInstance"))
            .ok_or_else(|| PennsieveError::Json("missing relationshipInstance".to_string()))?;
        Relationship::from_json(instance, &record.dataset_id)
    }
}

impl<T: Transport> Pennsieve<T> {
    pub fn topology(&mut self, dataset: NodeKey) -> Result<Topology, PennsieveError> {
        let dataset_id = self.dataset_id(dataset, "reading the topology")?;
        let request = self.model_request(Method::Get, &dataset_id, "/concepts/schema/graph");
        let value = self.call(request)?;
        let mut topology = Topology::default();
        for entry in as_list(&value)? {
            match entry.get("type").and_then(Value::as_str) {
                Some("schemaRelationship") => topology
                    .relationships
                    .push(RelationshipType::from_json(entry, &dataset_id)?),
                Some("schemaLinkedProperty") => topology
                    .linked_properties
                    .push(LinkedProperty::from_json(entry)?),
                _ => {
                    let model = Model::from_json(entry, &dataset_id)?;
                    topology.models.push(self.load_model(&dataset_id, model)?);
                }
            }
        }
        Ok(topology)
    }

    pub fn graph_summary(&mut self, dataset: NodeKey) -> Result<Value, PennsieveError> {
        let dataset_id = self.dataset_id(dataset, "reading the graph summary")?;
        let request = self.model_request(Method::Get, &dataset_id, "/concepts/graph/summary");
        self.call(request)
    }

    pub fn create_records(
        &mut self,
        model: &Model,
        rows: &[Vec<(&str, Value)>],
    ) -> Result<Vec<Record>, PennsieveError> {
        model.require_id("creating records")?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let bodies = rows
            .iter()
            .map(|values| new_record(model, values).map(|record| record.request_body()))
            .collect::<Result<Vec<_>, _>>()?;
        let request = self
            .model_request(
                Method::Post,
                &model.dataset_id,
                &format!("/concepts/{}/instances/batch", segment(&model.name)),
            )
            .json(Value::Array(bodies));
        let value = self.call(request)?;
        let created = as_list(&value)?
            .iter()
            .map(|entry| Record::from_json(entry, &model.dataset_id))
            .collect::<Result<Vec<_>, _>>()?;
        for record in &created {
            if let Some(id) = &record.id {
                self.cache_mut().snapshot(id, record.request_body());
            }
        }
        Ok(created)
    }

    fn record_path(record: &Record, action: &str, tail: &str) -> Result<String, PennsieveError> {
        let id = record.require_id(action)?;
        Ok(format!(
            "/concepts/{}/instances/{}{tail}",
            segment(&record.model),
            segment(id)
        ))
    }

    pub fn relations(
        &mut self,
        record: &Record,
        related_model: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<(Relationship, Record)>, PennsieveError> {
        let path = Self::record_path(
            record,
            "reading relations",
            &format!("/relations/{}", segment(related_model)),
        )?;
        let request = self
            .model_request(Method::Get, &record.dataset_id, &path)
            .query("limit", limit)
            .query("offset", offset);
        let value = self.call(request)?;
        as_list(&value)?
            .iter()
            .map(|pair| {
                let (edge, node) = match pair.as_array().map(Vec::as_slice) {
                    Some([edge, node]) => (edge, node),
                    _ => {
                        return Err(PennsieveError::Json(
                            "expected [relationship, record] pairs".to_string(),
                        ));
                    }
                };
                Ok((
                    Relationship::from_json(edge, &record.dataset_id)?,
                    Record::from_json(node, &record.dataset_id)?,
                ))
            })
            .collect()
    }

    pub fn related_records(
        &mut self,
        record: &Record,
        related_model: &str,
    ) -> Result<Vec<Record>, PennsieveError> {
        let mut records = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.relations(record, related_model, RELATED_PAGE, offset)?;
            if page.is_empty() {
                break;
            }
            offset += RELATED_PAGE;
            records.extend(page.into_iter().map(|(_, related)| related));
        }
        Ok(records)
    }

    pub fn relation_counts(&mut self, record: &Record) -> Result<Vec<RelationCount>, PennsieveError> {
        let path = Self::record_path(record, "counting relations", "/relationCounts")?;
        let request = self.model_request(Method::Get, &record.dataset_id, &path);
        let value = self.call(request)?;
        as_list(&value)?.iter().map(RelationCount::from_json).collect()
    }

    pub fn all_related(
        &mut self,
        record: &Record,
    ) -> Result<BTreeMap<String, Vec<Record>>, PennsieveError> {
        let mut grouped = BTreeMap::new();
        for count in self.relation_counts(record)? {
            if count.is_files() {
                continue;
            }
            let records = self.related_records(record, &count.name)?;
            grouped.insert(count.name, records);
        }
        Ok(grouped)
    }

    pub fn record_files(&mut self, record: &Record) -> Result<Vec<NodeKey>, PennsieveError> {
        let path = Self::record_path(record, "listing files", "/files")?;
        let request = self.model_request(Method::Get, &record.dataset_id, &path);
        let value = self.call(request)?;
        let mut keys = Vec::new();
        for pair in as_list(&value)? {
            let package = pair
                .as_array()
                .and_then(|pair| pair.get(1))
                .ok_or_else(|| {
                    PennsieveError::Json("expected [relationship, package] pairs".to_string())
                })?;
            keys.push(self.absorb(package)?);
        }
        Ok(keys)
    }

    fn linked_path(model: &Model, record: &Record, tail: &str) -> Result<String, PennsieveError> {
        let model_id = model.require_id("reading linked values")?;
        let record_id = record.require_id("reading linked values")?;
        Ok(format!(
            "/concepts/{}/instances/{}/linked{tail}",
            segment(model_id),
            segment(record_id)
        ))
    }

    pub fn linked_values(
        &mut self,
        model: &Model,
        record: &Record,
    ) -> Result<Vec<LinkedValue>, PennsieveError> {
        let path = Self::linked_path(model, record, "")?;
        let request = self.model_request(Method::Get, &record.dataset_id, &path);
        let value = self.call(request)?;
        as_list(&value)?.iter().map(LinkedValue::from_json).collect()
    }

    pub fn set_linked_value(
        &mut self,
        model: &Model,
        record: &Record,
        link: &str,
        target_id: &str,
    ) -> Result<LinkedValue, PennsieveError> {
        let link_id = model
            .linked
            .iter()
            .find(|property| property.name == link || property.id.as_deref() == Some(link))
            .and_then(|property| property.id.clone())
            .ok_or_else(|| {
                PennsieveError::NotFound(format!("linked property '{link}' on '{}'", model.name))
            })?;
        for existing in self.linked_values(model, record)? {
            if existing.link_id == link_id {
                self.delete_linked_value(model, record, &existing.id)?;
            }
        }
        let path = Self::linked_path(model, record, "")?;
        let request = self
            .model_request(Method::Post, &record.dataset_id, &path)
            .json(json!({"schemaLinkedPropertyId": link_id, "to": target_id}));
        let value = self.call(request)?;
        LinkedValue::from_json(&value)
    }

    pub fn set_linked_values(
        &mut self,
        model: &Model,
        record: &Record,
        links: &[(&str, &str)],
    ) -> Result<Vec<Value>, PennsieveError> {
        let payload = links
            .iter()
            .map(|(link_id, target_id)| json!({"schemaLinkedPropertyId": link_id, "to": target_id}))
            .collect::<Vec<_>>();
        let path = Self::linked_path(model, record, "/batch")?;
        let request = self
            .model_request(Method::Post, &record.dataset_id, &path)
            .json(json!({"data": payload}));
        let value = self.call(request)?;
        Ok(array(&value, "data").to_vec())
    }

    pub fn remove_linked_value(
        &mut self,
        model: &Model,
        record: &Record,
        link: &str,
    ) -> Result<(), PennsieveError> {
        let link_id = model
            .linked
            .iter()
            .find(|property| property.name == link)
            .and_then(|property| property.id.as_deref())
            .unwrap_or(link)
            .to_string();
        let value = self
            .linked_values(model, record)?
            .into_iter()
            .find(|value| value.id == link || value.link_id == link_id)
            .ok_or_else(|| PennsieveError::NotFound(format!("linked value '{link}'")))?;
        self.delete_linked_value(model, record, &value.id)
    }

    fn delete_linked_value(
        &mut self,
        model: &Model,
        record: &Record,
        value_id: &str,
    ) -> Result<(), PennsieveError> {
        let path = Self::linked_path(model, record, &format!("/{}", segment(value_id)))?;
        let request = self.model_request(Method::Delete, &record.dataset_id, &path);
        self.call(request)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn scalar_type_serializes_bare() {
        let plain = ModelPropertyType::scalar(ScalarType::Long);
        assert_eq!(plain.to_json(), json!("long"));
        let with_unit = ModelPropertyType::Scalar {
            data_type: ScalarType::Double,
            format: None,
            unit: Some("kg".to_string()),
        };
        assert_eq!(with_unit.to_json()["unit"], "kg");
        assert_eq!(ModelPropertyType::from_json(&with_unit.to_json()).unwrap(), with_unit);
    }

    #[test]
    fn enum_values_are_checked() {
        let kind = ModelPropertyType::from_json(&json!({
            "type": "enum",
            "items": {"type": "string", "enum": ["a", "b"]}
        }))
        .unwrap();
        assert_eq!(kind.encode(&json!("a")).unwrap(), json!("a"));
        assert_matches!(kind.encode(&json!("c")), Err(PennsieveError::Validation(_)));
    }

    #[test]
    fn dates_always_carry_microseconds() {
        let at = Utc.with_ymd_and_hms(2019, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(encode_date(at), "2019-05-01T12:00:00.000000+00:00");
        let kind = ModelPropertyType::scalar(ScalarType::Date);
        assert_eq!(
            kind.encode(&json!("2019-05-01")).unwrap(),
            json!("2019-05-01T00:00:00.000000+00:00")
        );
    }

    #[test]
    fn booleans_accept_strings() {
        let kind = ModelPropertyType::scalar(ScalarType::Boolean);
        assert_eq!(kind.encode(&json!("TRUE")).unwrap(), json!(true));
        assert_matches!(kind.encode(&json!("yes")), Err(PennsieveError::Validation(_)));
    }

    #[test]
    fn property_defaults_follow_title() {
        let property = ModelProperty::from_json(&json!({
            "name": "name", "dataType": "string", "conceptTitle": true
        }))
        .unwrap();
        assert!(property.required && property.default);
        assert_eq!(property.display_name, "name");
        assert_matches!(
            ModelProperty::new("first name", ModelPropertyType::scalar(ScalarType::String)),
            Err(PennsieveError::Validation(_))
        );
    }

    #[test]
    fn schema_needs_one_title() {
        let mut model = Model::new("N:dataset:1", "patient").unwrap();
        assert!(model.validate_schema().is_ok());
        model.add_property(
            ModelProperty::new("age", ModelPropertyType::scalar(ScalarType::Long)).unwrap(),
        );
        assert_matches!(model.validate_schema(), Err(PennsieveError::Validation(_)));
        model.add_property(
            ModelProperty::new("name", ModelPropertyType::scalar(ScalarType::String))
                .unwrap()
                .as_title(),
        );
        assert!(model.validate_schema().is_ok());
    }
}
