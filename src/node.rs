use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::cache::NodeKey;
use crate::error::PennsieveError;
use crate::property::{self, Property};
use crate::wire::{array, opt_bool, opt_i64, opt_string, require_string};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DatasetInfo {
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub status: Option<String>,
    pub automatically_process_packages: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Dataset(DatasetInfo),
    Collection,
    DataPackage,
    TimeSeries,
}

impl NodeKind {
    pub fn from_package_type(package_type: Option<&str>) -> Self {
        match package_type.map(|value| value.to_ascii_lowercase()) {
            None => NodeKind::Dataset(DatasetInfo::default()),
            Some(value) => match value.as_str() {
                "collection" => NodeKind::Collection,
                "timeseries" => NodeKind::TimeSeries,
                "dataset" => NodeKind::Dataset(DatasetInfo::default()),
                _ => NodeKind::DataPackage,
            },
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Dataset(_) => "Dataset",
            NodeKind::Collection => "Collection",
            NodeKind::DataPackage => "DataPackage",
            NodeKind::TimeSeries => "TimeSeries",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataNode {
    pub id: Option<String>,
    pub int_id: Option<i64>,
    pub name: String,
    pub kind: NodeKind,
    pub package_type: String,
    pub parent: Option<String>,
    pub dataset: Option<String>,
    pub owner_id: Option<String>,
    pub state: Option<String>,
    pub provenance_id: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub storage: Option<i64>,
    pub properties: Vec<Property>,
    pub(crate) items: Option<Vec<NodeKey>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedNode {
    pub node: DataNode,
    pub children: Option<Vec<ParsedNode>>,
}

impl DataNode {
    fn blank(name: &str, kind: NodeKind, package_type: &str) -> Self {
        Self {
            id: None,
            int_id: None,
            name: name.to_string(),
            kind,
            package_type: package_type.to_string(),
            parent: None,
            dataset: None,
            owner_id: None,
            state: None,
            provenance_id: None,
            created_at: None,
            updated_at: None,
            storage: None,
            properties: Vec::new(),
            items: None,
        }
    }

    pub fn dataset(name: &str, description: Option<&str>) -> Self {
        let info = DatasetInfo {
            description: description.map(|value| value.to_string()),
            ..DatasetInfo::default()
        };
        Self::blank(name, NodeKind::Dataset(info), "DataSet")
    }

    pub fn collection(name: &str) -> Self {
        Self::blank(name, NodeKind::Collection, "Collection")
    }

    pub fn time_series(name: &str) -> Self {
        Self::blank(name, NodeKind::TimeSeries, "TimeSeries")
    }

    pub fn package(name: &str, package_type: &str) -> Self {
        let kind = match NodeKind::from_package_type(Some(package_type)) {
            NodeKind::Dataset(_) => NodeKind::DataPackage,
            other => other,
        };
        Self::blank(name, kind, package_type)
    }

    pub fn exists(&self) -> bool {
        self.id.is_some()
    }

    pub fn require_id(&self, action: &str) -> Result<&str, PennsieveError> {
        self.id
            .as_deref()
            .ok_or_else(|| PennsieveError::NotCreated(action.to_string()))
    }

    pub fn is_dataset(&self) -> bool {
        matches!(self.kind, NodeKind::Dataset(_))
    }

    pub fn is_container(&self) -> bool {
        matches!(self.kind, NodeKind::Dataset(_) | NodeKind::Collection)
    }

    pub fn dataset_info(&self) -> Option<&DatasetInfo> {
        match &self.kind {
            NodeKind::Dataset(info) => Some(info),
            _ => None,
        }
    }

    pub fn dataset_info_mut(&mut self) -> Option<&mut DatasetInfo> {
        match &mut self.kind {
            NodeKind::Dataset(info) => Some(info),
            _ => None,
        }
    }

    // None until the items are loaded.
    pub fn item_keys(&self) -> Option<&[NodeKey]> {
        self.items.as_deref()
    }

    pub fn property(&self, key: &str) -> Option<&Property> {
        self.properties.iter().find(|property| property.key == key)
    }

    pub fn set_property(&mut self, property: Property) {
        property::upsert(&mut self.properties, property);
    }

    pub fn remove_property(&mut self, key: &str, category: Option<&str>) -> Option<Property> {
        let category = category.unwrap_or(property::DEFAULT_CATEGORY);
        let position = self
            .properties
            .iter()
            .position(|property| property.key == key && property.category == category)?;
        Some(self.properties.remove(position))
    }

    pub fn from_json(value: &Value) -> Result<Self, PennsieveError> {
        let content = value.get("content").unwrap_or(value);
        let raw_type = opt_string(content, "packageType");
        let mut kind = NodeKind::from_package_type(raw_type.as_deref());
        let package_type = raw_type.unwrap_or_else(|| "DataSet".to_string());

        if let NodeKind::Dataset(info) = &mut kind {
            info.description = opt_string(content, "description");
            info.tags = array(content, "tags")
                .iter()
                .filter_map(|tag| tag.as_str().map(|tag| tag.to_string()))
                .collect();
            info.status = content.get("status").and_then(|status| {
                status
                    .as_str()
                    .or_else(|| status.get("name").and_then(|name| name.as_str()))
                    .map(|status| status.to_string())
            });
            info.automatically_process_packages =
                opt_bool(content, "automaticallyProcessPackages").unwrap_or(false);
        }

        let parent = match value.get("parent").or_else(|| content.get("parent")) {
            Some(Value::String(id)) => Some(id.clone()),
            Some(nested @ Value::Object(_)) => DataNode::from_json(nested)?.id,
            _ => None,
        };

        Ok(Self {
            id: opt_string(content, "nodeId").or_else(|| opt_string(content, "id")),
            int_id: opt_i64(content, "intId"),
            name: require_string(content, "name")?,
            kind,
            package_type,
            parent,
            dataset: opt_string(content, "datasetNodeId")
                .or_else(|| opt_string(content, "datasetId")),
            owner_id: opt_string(value, "owner")
                .or_else(|| opt_string(value, "ownerId"))
                .or_else(|| opt_string(content, "ownerId")),
            state: opt_string(content, "state"),
            provenance_id: opt_string(content, "provenanceId"),
            created_at: opt_string(content, "createdAt"),
            updated_at: opt_string(content, "updatedAt"),
            storage: opt_i64(value, "storage"),
            properties: property::parse_properties(array(value, "properties"))?,
            items: None,
        })
    }

    pub fn to_json(&self) -> Value {
        let mut content = Map::new();
        let id_key = if self.is_dataset() { "id" } else { "nodeId" };
        insert_opt(&mut content, id_key, self.id.as_ref().map(|id| json!(id)));
        insert_opt(&mut content, "intId", self.int_id.map(|id| json!(id)));
        content.insert("name".to_string(), json!(self.name));
        content.insert("packageType".to_string(), json!(self.package_type));
        insert_opt(&mut content, "datasetNodeId", self.dataset.as_ref().map(|id| json!(id)));
        insert_opt(&mut content, "ownerId", self.owner_id.as_ref().map(|id| json!(id)));
        insert_opt(&mut content, "state", self.state.as_ref().map(|state| json!(state)));
        insert_opt(
            &mut content,
            "provenanceId",
            self.provenance_id.as_ref().map(|id| json!(id)),
        );
        insert_opt(&mut content, "createdAt", self.created_at.as_ref().map(|at| json!(at)));
        insert_opt(&mut content, "updatedAt", self.updated_at.as_ref().map(|at| json!(at)));
        if let NodeKind::Dataset(info) = &self.kind {
            insert_opt(
                &mut content,
                "description",
                info.description.as_ref().map(|text| json!(text)),
            );
            content.insert("tags".to_string(), json!(info.tags));
            insert_opt(&mut content, "status", info.status.as_ref().map(|status| json!(status)));
            content.insert(
                "automaticallyProcessPackages".to_string(),
                json!(info.automatically_process_packages),
            );
        }

        let mut out = Map::new();
        out.insert("content".to_string(), Value::Object(content));
        insert_opt(&mut out, "parent", self.parent.as_ref().map(|id| json!(id)));
        insert_opt(&mut out, "storage", self.storage.map(|size| json!(size)));
        out.insert("properties".to_string(), self.properties_json());
        Value::Object(out)
    }

    pub fn request_body(&self) -> Value {
        if let NodeKind::Dataset(info) = &self.kind {
            return json!({
                "name": self.name,
                "description": info.description,
                "automaticallyProcessPackages": info.automatically_process_packages,
                "properties": self.properties_json(),
                "tags": info.tags,
            });
        }
        let mut body = Map::new();
        body.insert("name".to_string(), json!(self.name));
        body.insert("packageType".to_string(), json!(self.package_type));
        body.insert("properties".to_string(), self.properties_json());
        insert_opt(&mut body, "parent", self.parent.as_ref().map(|id| json!(id)));
        insert_opt(&mut body, "state", self.state.as_ref().map(|state| json!(state)));
        insert_opt(&mut body, "dataset", self.dataset.as_ref().map(|id| json!(id)));
        insert_opt(
            &mut body,
            "provenanceId",
            self.provenance_id.as_ref().map(|id| json!(id)),
        );
        insert_opt(&mut body, "owner", self.owner_id.as_ref().map(|id| json!(id)));
        Value::Object(body)
    }

    pub fn properties_json(&self) -> Value {
        Value::Array(self.properties.iter().map(Property::to_json).collect())
    }
}

impl ParsedNode {
    pub fn from_json(value: &Value) -> Result<Self, PennsieveError> {
        let node = DataNode::from_json(value)?;
        let children = match value.get("children").and_then(|children| children.as_array()) {
            Some(children) => Some(
                children
                    .iter()
                    .map(ParsedNode::from_json)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            None => None,
        };
        Ok(Self { node, children })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageFile {
    pub id: String,
    pub name: String,
    pub file_type: Option<String>,
    pub size: Option<i64>,
    pub s3_bucket: Option<String>,
    pub s3_key: Option<String>,
    pub created_at: Option<String>,
    pub package_id: String,
}

impl PackageFile {
    pub fn from_json(value: &Value, package_id: &str) -> Result<Self, PennsieveError> {
        let content = value.get("content").unwrap_or(value);
        Ok(Self {
            id: require_string(content, "id")?,
            name: require_string(content, "name")?,
            file_type: opt_string(content, "fileType"),
            size: opt_i64(content, "size"),
            s3_bucket: opt_string(content, "s3bucket"),
            s3_key: opt_string(content, "s3key"),
            created_at: opt_string(content, "createdAt"),
            package_id: package_id.to_string(),
        })
    }
}

fn insert_opt(map: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(value) = value {
        map.insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_class_dispatch() {
        assert_eq!(NodeKind::from_package_type(Some("Collection")), NodeKind::Collection);
        assert_eq!(NodeKind::from_package_type(Some("TimeSeries")), NodeKind::TimeSeries);
        assert_eq!(NodeKind::from_package_type(Some("CSV")), NodeKind::DataPackage);
        assert!(matches!(NodeKind::from_package_type(None), NodeKind::Dataset(_)));
        assert!(matches!(
            NodeKind::from_package_type(Some("DataSet")),
            NodeKind::Dataset(_)
        ));
    }

    #[test]
    fn package_id_comes_from_node_id() {
        let node = DataNode::from_json(&json!({
            "content": {"id": 77, "nodeId": "N:package:1", "name": "eeg.edf", "packageType": "TimeSeries"},
            "parent": {"content": {"nodeId": "N:collection:9", "name": "c", "packageType": "Collection"}}
        }))
        .unwrap();
        assert_eq!(node.id.as_deref(), Some("N:package:1"));
        assert_eq!(node.kind, NodeKind::TimeSeries);
        assert_eq!(node.parent.as_deref(), Some("N:collection:9"));
    }

    #[test]
    fn request_body_drops_unset_fields() {
        let mut node = DataNode::collection("raw");
        node.dataset = Some("N:dataset:1".to_string());
        let body = node.request_body();
        assert_eq!(body["packageType"], "Collection");
        assert_eq!(body["dataset"], "N:dataset:1");
        assert!(body.get("parent").is_none());
        assert!(body.get("state").is_none());
    }
}
