use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::cache::NodeKey;
use crate::client::Pennsieve;
use crate::concepts::ModelProperty;
use crate::error::PennsieveError;
use crate::transport::{ApiRequest, Method, Transport};
use crate::wire::{as_list, opt_string, require_string, segment};

pub const TEMPLATE_SCHEMA: &str = "http://schema.pennsieve.io/model/draft-01/schema";
const TEMPLATES_BASE: &str = "/model-schema";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelTemplate {
    pub id: Option<String>,
    pub schema: String,
    pub name: String,
    pub display_name: Option<String>,
    pub description: String,
    pub category: Option<String>,
    pub required: Vec<String>,
    pub properties: Map<String, Value>,
}

impl ModelTemplate {
    pub fn new(name: &str, category: Option<&str>) -> Result<Self, PennsieveError> {
        if name.trim().is_empty() {
            return Err(PennsieveError::Validation(
                "template name must not be empty".to_string(),
            ));
        }
        Ok(Self {
            id: None,
            schema: TEMPLATE_SCHEMA.to_string(),
            name: name.to_string(),
            display_name: None,
            description: name.to_string(),
            category: category.map(|value| value.to_string()),
            required: Vec::new(),
            properties: Map::new(),
        })
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_property(mut self, name: &str, data_type: &str) -> Self {
        self.properties.insert(
            name.to_string(),
            json!({"type": data_type, "description": name}),
        );
        self
    }

    pub fn with_schema_property(mut self, name: &str, schema: Value) -> Self {
        self.properties.insert(name.to_string(), schema);
        self
    }

    pub fn require(mut self, name: &str) -> Self {
        if !self.required.iter().any(|existing| existing == name) {
            self.required.push(name.to_string());
        }
        self
    }

    pub fn from_json(value: &Value) -> Result<Self, PennsieveError> {
        let name = require_string(value, "name")?;
        Ok(Self {
            id: opt_string(value, "$id"),
            schema: opt_string(value, "$schema").unwrap_or_else(|| TEMPLATE_SCHEMA.to_string()),
            display_name: opt_string(value, "displayName"),
            description: opt_string(value, "description").unwrap_or_else(|| name.clone()),
            category: opt_string(value, "category"),
            required: value
                .get("required")
                .and_then(Value::as_array)
                .map(|names| {
                    names
                        .iter()
                        .filter_map(|name| name.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
            properties: value
                .get("properties")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            name,
        })
    }

    pub fn request_body(&self) -> Value {
        json!({
            "$schema": self.schema,
            "name": self.name,
            "description": self.description,
            "category": self.category,
            "properties": self.properties,
            "required": self.required,
        })
    }

    fn check(&self) -> Result<(), PennsieveError> {
        if self.properties.is_empty() {
            return Err(PennsieveError::Validation(format!(
                "template '{}' has no properties",
                self.name
            )));
        }
        let missing: Vec<&str> = self
            .required
            .iter()
            .filter(|name| !self.properties.contains_key(name.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(PennsieveError::Validation(format!(
                "required properties are not defined: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TemplateValidation {
    Valid,
    Invalid(Vec<String>),
}

impl TemplateValidation {
    fn from_response(value: &Value) -> Self {
        match value {
            Value::Null => Self::Valid,
            Value::String(text) if text.trim().is_empty() => Self::Valid,
            Value::Array(errors) => Self::Invalid(
                errors
                    .iter()
                    .map(|error| match error {
                        Value::String(text) => text.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            Value::String(text) => Self::Invalid(vec![text.clone()]),
            other => Self::Invalid(vec![other.to_string()]),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

impl<T: Transport> Pennsieve<T> {
    fn templates_path(&mut self, tail: &str) -> Result<String, PennsieveError> {
        let organization = self.organization_int_id()?;
        Ok(format!(
            "{TEMPLATES_BASE}/organizations/{organization}/templates{tail}"
        ))
    }

    fn organization_int_id(&mut self) -> Result<i64, PennsieveError> {
        let id = self
            .session()
            .organization()
            .map(str::to_string)
            .ok_or_else(|| PennsieveError::Validation("no organization selected".to_string()))?;
        self.organization(&id)?.int_id.ok_or_else(|| {
            PennsieveError::Json(format!("organization {id} has no integer id"))
        })
    }

    pub fn model_templates(&mut self) -> Result<Vec<ModelTemplate>, PennsieveError> {
        let path = self.templates_path("")?;
        let value = self.call(ApiRequest::get(path))?;
        as_list(&value)?.iter().map(ModelTemplate::from_json).collect()
    }

    pub fn model_template(&mut self, template_id: &str) -> Result<ModelTemplate, PennsieveError> {
        let path = self.templates_path(&format!("/{}", segment(template_id)))?;
        let value = self.call(ApiRequest::get(path))?;
        ModelTemplate::from_json(&value)
    }

    pub fn create_model_template(
        &mut self,
        template: &ModelTemplate,
    ) -> Result<ModelTemplate, PennsieveError> {
        template.check()?;
        let path = self.templates_path("")?;
        let value = self.call(ApiRequest::post(path, template.request_body()))?;
        ModelTemplate::from_json(&value)
    }

    pub fn validate_model_template(
        &mut self,
        template: &ModelTemplate,
    ) -> Result<TemplateValidation, PennsieveError> {
        template.check()?;
        let value = self.call(ApiRequest::post(
            format!("{TEMPLATES_BASE}/validate"),
            template.request_body(),
        ))?;
        Ok(TemplateValidation::from_response(&value))
    }

    pub fn delete_model_template(&mut self, template_id: &str) -> Result<(), PennsieveError> {
        let path = self.templates_path(&format!("/{}", segment(template_id)))?;
        self.call(ApiRequest::delete(path))?;
        Ok(())
    }

    pub fn import_model(
        &mut self,
        dataset: NodeKey,
        template_id: &str,
    ) -> Result<Vec<ModelProperty>, PennsieveError> {
        self.dataset_id(dataset, "importing a model")?;
        let node = self.node(dataset)?;
        let dataset_int_id = node.int_id.ok_or_else(|| {
            PennsieveError::Validation(format!("dataset '{}' has no integer id", node.name))
        })?;
        let path = self.templates_path(&format!(
            "/{}/datasets/{dataset_int_id}",
            segment(template_id)
        ))?;
        let value = self.call(ApiRequest::new(Method::Post, path))?;
        as_list(&value)?.iter().map(ModelProperty::from_json).collect()
    }
}
