use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::cache::NodeKey;
use crate::client::Pennsieve;
use crate::error::PennsieveError;
use crate::transport::{ApiRequest, Transport};
use crate::wire::{array, as_list, opt_i64, opt_string, require_string, segment};

const PUBLISH_SUCCEEDED: &str = "PUBLISH_SUCCEEDED";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishInfo {
    pub status: Option<String>,
    pub doi: Option<String>,
    pub published_dataset_id: Option<i64>,
    pub version_count: Option<i64>,
    pub last_published: Option<DateTime<Utc>>,
}

impl PublishInfo {
    fn from_json(value: &Value) -> Self {
        Self {
            status: opt_string(value, "status"),
            doi: None,
            published_dataset_id: opt_i64(value, "publishedDatasetId"),
            version_count: opt_i64(value, "publishedVersionCount"),
            last_published: opt_time(value, "lastPublishedDate"),
        }
    }

    pub fn is_published(&self) -> bool {
        self.status.as_deref() == Some(PUBLISH_SUCCEEDED)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusLogEntry {
    pub user_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub status: Option<String>,
    pub status_display_name: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl StatusLogEntry {
    fn from_json(value: &Value) -> Self {
        let user = value.get("user").unwrap_or(&Value::Null);
        let status = value.get("status").unwrap_or(&Value::Null);
        Self {
            user_id: opt_string(user, "nodeId"),
            first_name: opt_string(user, "firstName"),
            last_name: opt_string(user, "lastName"),
            status: opt_string(status, "name"),
            status_display_name: opt_string(status, "displayName"),
            updated_at: opt_time(value, "updatedAt"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusLog {
    pub limit: usize,
    pub offset: usize,
    pub total: i64,
    pub entries: Vec<StatusLogEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamCollaborator {
    pub id: String,
    pub name: String,
    pub role: String,
}

impl TeamCollaborator {
    fn from_json(value: &Value) -> Result<Self, PennsieveError> {
        Ok(Self {
            id: require_string(value, "id")?,
            name: require_string(value, "name")?,
            role: require_string(value, "role")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserCollaborator {
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub role: String,
}

impl UserCollaborator {
    fn from_json(value: &Value) -> Result<Self, PennsieveError> {
        Ok(Self {
            id: require_string(value, "id")?,
            first_name: opt_string(value, "firstName"),
            last_name: opt_string(value, "lastName"),
            email: opt_string(value, "email"),
            role: require_string(value, "role")?,
        })
    }
}

fn opt_time(value: &Value, key: &str) -> Option<DateTime<Utc>> {
    let text = opt_string(value, key)?;
    DateTime::parse_from_rfc3339(&text)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

impl<T: Transport> Pennsieve<T> {
    fn dataset_path(&self, dataset: NodeKey, action: &str, tail: &str) -> Result<String, PennsieveError> {
        let id = self.dataset_id(dataset, action)?;
        Ok(format!("/datasets/{}{tail}", segment(&id)))
    }

    pub fn published(&mut self, dataset: NodeKey) -> Result<PublishInfo, PennsieveError> {
        let path = self.dataset_path(dataset, "reading publication", "/published")?;
        let value = self.call(ApiRequest::get(path))?;
        let mut info = PublishInfo::from_json(&value);
        if info.is_published() {
            let path = self.dataset_path(dataset, "reading the doi", "/doi")?;
            let doi = self.call(ApiRequest::get(path))?;
            info.doi = opt_string(&doi, "doi");
        }
        Ok(info)
    }

    pub fn status_log(
        &mut self,
        dataset: NodeKey,
        limit: usize,
        offset: usize,
    ) -> Result<StatusLog, PennsieveError> {
        let path = self.dataset_path(dataset, "reading the status log", "/status-log")?;
        let value = self.call(
            ApiRequest::get(path)
                .query("limit", limit)
                .query("offset", offset),
        )?;
        let entries: Vec<StatusLogEntry> = array(&value, "entries")
            .iter()
            .map(StatusLogEntry::from_json)
            .collect();
        Ok(StatusLog {
            limit: opt_i64(&value, "limit")
                .and_then(|limit| usize::try_from(limit).ok())
                .unwrap_or(limit),
            offset: opt_i64(&value, "offset")
                .and_then(|offset| usize::try_from(offset).ok())
                .unwrap_or(offset),
            total: opt_i64(&value, "totalCount").unwrap_or(entries.len() as i64),
            entries,
        })
    }

    pub fn team_collaborators(
        &mut self,
        dataset: NodeKey,
    ) -> Result<Vec<TeamCollaborator>, PennsieveError> {
        let path = self.dataset_path(dataset, "listing collaborators", "/collaborators/teams")?;
        let value = self.call(ApiRequest::get(path))?;
        as_list(&value)?.iter().map(TeamCollaborator::from_json).collect()
    }

    pub fn user_collaborators(
        &mut self,
        dataset: NodeKey,
    ) -> Result<Vec<UserCollaborator>, PennsieveError> {
        let path = self.dataset_path(dataset, "listing collaborators", "/collaborators/users")?;
        let value = self.call(ApiRequest::get(path))?;
        as_list(&value)?.iter().map(UserCollaborator::from_json).collect()
    }

    pub fn owner(&mut self, dataset: NodeKey) -> Result<UserCollaborator, PennsieveError> {
        let name = self.node(dataset)?.name.clone();
        self.user_collaborators(dataset)?
            .into_iter()
            .find(|user| user.role == "owner")
            .ok_or_else(|| PennsieveError::NotFound(format!("owner of '{name}'")))
    }
}
