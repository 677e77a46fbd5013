use serde::Serialize;
use serde_json::Value;

use crate::error::PennsieveError;
use crate::wire::{opt_bool, opt_i64, opt_string, require_string};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub preferred_organization: Option<String>,
    pub is_super_admin: bool,
}

impl User {
    pub fn from_json(value: &Value) -> Result<Self, PennsieveError> {
        Ok(Self {
            id: require_string(value, "id")?,
            email: require_string(value, "email")?,
            first_name: opt_string(value, "firstName"),
            last_name: opt_string(value, "lastName"),
            preferred_organization: opt_string(value, "preferredOrganization"),
            is_super_admin: opt_bool(value, "isSuperAdmin").unwrap_or(false),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub int_id: Option<i64>,
    pub subscription_state: Option<String>,
}

impl Organization {
    pub fn from_json(value: &Value) -> Result<Self, PennsieveError> {
        let content = value.get("organization").unwrap_or(value);
        let name = require_string(content, "name")?;
        let slug = opt_string(content, "slug")
            .unwrap_or_else(|| name.to_lowercase().replace(' ', "-"));
        Ok(Self {
            id: require_string(content, "id")?,
            name,
            slug,
            int_id: opt_i64(content, "intId"),
            subscription_state: content
                .get("subscriptionState")
                .and_then(|state| state.get("type").or(Some(state)))
                .and_then(|state| state.as_str())
                .map(|state| state.to_string()),
        })
    }
}
