use std::fmt;
use std::str::FromStr;

use serde_json::{Value, json};

use crate::error::PennsieveError;
use crate::wire::{opt_bool, opt_string, require_string};

pub const DEFAULT_CATEGORY: &str = "Pennsieve";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    String,
    Integer,
    Double,
    Date,
    User,
    Boolean,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::String => "string",
            PropertyType::Integer => "integer",
            PropertyType::Double => "double",
            PropertyType::Date => "date",
            PropertyType::User => "user",
            PropertyType::Boolean => "boolean",
        }
    }

    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Bool(_) => PropertyType::Boolean,
            Value::Number(number) if number.is_i64() || number.is_u64() => PropertyType::Integer,
            Value::Number(_) => PropertyType::Double,
            _ => PropertyType::String,
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyType {
    type Err = PennsieveError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "string" => Ok(PropertyType::String),
            "integer" => Ok(PropertyType::Integer),
            "double" => Ok(PropertyType::Double),
            "date" => Ok(PropertyType::Date),
            "user" => Ok(PropertyType::User),
            "boolean" => Ok(PropertyType::Boolean),
            _ => Err(PennsieveError::Validation(format!(
                "invalid property type '{value}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub key: String,
    pub value: String,
    pub data_type: PropertyType,
    pub fixed: bool,
    pub hidden: bool,
    pub category: String,
}

impl Property {
    pub fn new(key: &str, value: Value) -> Self {
        let data_type = PropertyType::infer(&value);
        Self {
            key: key.to_string(),
            value: value_text(&value),
            data_type,
            fixed: false,
            hidden: false,
            category: DEFAULT_CATEGORY.to_string(),
        }
    }

    pub fn typed(key: &str, value: &str, data_type: PropertyType) -> Result<Self, PennsieveError> {
        check_value(value, data_type)?;
        Ok(Self {
            key: key.to_string(),
            value: value.to_string(),
            data_type,
            fixed: false,
            hidden: false,
            category: DEFAULT_CATEGORY.to_string(),
        })
    }

    pub fn in_category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }

    pub fn fixed(mut self, fixed: bool) -> Self {
        self.fixed = fixed;
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn from_json(value: &Value, category: Option<&str>) -> Result<Self, PennsieveError> {
        let raw = value
            .get("value")
            .ok_or_else(|| PennsieveError::Json("property without value".to_string()))?;
        let data_type = match opt_string(value, "dataType") {
            Some(name) => name.parse().unwrap_or_else(|_| PropertyType::infer(raw)),
            None => PropertyType::infer(raw),
        };
        let category = category
            .map(|name| name.to_string())
            .or_else(|| opt_string(value, "category"))
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
        Ok(Self {
            key: require_string(value, "key")?,
            value: value_text(raw),
            data_type,
            fixed: opt_bool(value, "fixed").unwrap_or(false),
            hidden: opt_bool(value, "hidden").unwrap_or(false),
            category,
        })
    }

    pub fn to_json(&self) -> Value {
        json!({
            "key": self.key,
            "value": self.value,
            "dataType": self.data_type.as_str(),
            "fixed": self.fixed,
            "hidden": self.hidden,
            "category": self.category,
        })
    }
}

pub fn parse_properties(values: &[Value]) -> Result<Vec<Property>, PennsieveError> {
    let mut out: Vec<Property> = Vec::new();
    for entry in values {
        match entry.get("properties").and_then(|nested| nested.as_array()) {
            Some(nested) => {
                let category = opt_string(entry, "category");
                for item in nested {
                    upsert(&mut out, Property::from_json(item, category.as_deref())?);
                }
            }
            None => upsert(&mut out, Property::from_json(entry, None)?),
        }
    }
    Ok(out)
}

pub fn upsert(properties: &mut Vec<Property>, property: Property) {
    match properties
        .iter_mut()
        .find(|existing| existing.category == property.category && existing.key == property.key)
    {
        Some(existing) => *existing = property,
        None => properties.push(property),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn check_value(value: &str, data_type: PropertyType) -> Result<(), PennsieveError> {
    let ok = match data_type {
        PropertyType::Integer => value.parse::<i64>().is_ok(),
        PropertyType::Double => value.parse::<f64>().is_ok(),
        PropertyType::Boolean => matches!(value.to_ascii_lowercase().as_str(), "true" | "false"),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(PennsieveError::Validation(format!(
            "value '{value}' is not a valid {data_type}"
        )))
    }
}
