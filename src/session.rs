use serde_json::{Value, json};
use tracing::{debug, info};

use crate::account::User;
use crate::config::Settings;
use crate::error::PennsieveError;
use crate::transport::{ApiRequest, Transport};
use crate::wire::{opt_string, require_string};

pub const ORGANIZATION_HEADER: &str = "X-ORGANIZATION-ID";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    ApiKey { token: String, secret: String },
    Jwt(String),
}

impl Credentials {
    pub fn from_settings(settings: &Settings) -> Result<Self, PennsieveError> {
        if let Some(jwt) = &settings.jwt {
            return Ok(Credentials::Jwt(jwt.clone()));
        }
        match (&settings.api_token, &settings.api_secret) {
            (Some(token), Some(secret)) => Ok(Credentials::ApiKey {
                token: token.clone(),
                secret: secret.clone(),
            }),
            _ => Err(PennsieveError::MissingCredentials),
        }
    }
}

#[derive(Debug)]
pub struct Session<T: Transport> {
    transport: T,
    credentials: Credentials,
    token: Option<String>,
    organization: Option<String>,
    user: Option<User>,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, credentials: Credentials) -> Self {
        Self {
            transport,
            credentials,
            token: None,
            organization: None,
            user: None,
        }
    }

    pub fn authenticate(&mut self, organization: Option<&str>) -> Result<&User, PennsieveError> {
        let organization = match self.credentials.clone() {
            Credentials::ApiKey { token, secret } => {
                self.token = None;
                let response = self.dispatch(&ApiRequest::post(
                    "/account/api/session",
                    json!({"tokenId": token, "secret": secret}),
                ))?;
                self.token = Some(require_string(&response, "session_token")?);
                let user = User::from_json(&self.dispatch(&ApiRequest::get("/user/"))?)?;
                let organization = organization
                    .map(|org| org.to_string())
                    .or_else(|| opt_string(&response, "organization"))
                    .or_else(|| user.preferred_organization.clone());
                self.user = Some(user);
                organization
            }
            Credentials::Jwt(jwt) => {
                self.token = Some(jwt);
                let user = User::from_json(&self.dispatch(&ApiRequest::get("/user"))?)?;
                let organization = organization
                    .map(|org| org.to_string())
                    .or_else(|| user.preferred_organization.clone());
                self.user = Some(user);
                organization
            }
        };
        self.organization = organization;

        let user = self.user.as_ref().ok_or(PennsieveError::Unauthorized)?;
        info!(
            user = %user.email,
            organization = self.organization.as_deref().unwrap_or("-"),
            "authenticated"
        );
        Ok(user)
    }

    pub fn call(&mut self, request: ApiRequest) -> Result<Value, PennsieveError> {
        match self.dispatch(&request) {
            Err(PennsieveError::Unauthorized) if self.token.is_some() => {
                debug!(path = %request.path, "token rejected, re-authenticating");
                let organization = self.organization.clone();
                self.authenticate(organization.as_deref())?;
                self.dispatch(&request)
            }
            other => other,
        }
    }

    fn dispatch(&self, request: &ApiRequest) -> Result<Value, PennsieveError> {
        let mut request = request.clone();
        if let Some(token) = &self.token {
            request = request.header("Authorization", &format!("Bearer {token}"));
        }
        if let Some(organization) = &self.organization {
            request = request.header(ORGANIZATION_HEADER, organization);
        }
        self.transport.send(&request)
    }

    pub fn set_organization(&mut self, organization: &str) {
        self.organization = Some(organization.to_string());
    }

    pub fn organization(&self) -> Option<&str> {
        self.organization.as_deref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}
