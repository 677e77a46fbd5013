use std::collections::BTreeMap;

use camino::Utf8Path;
use serde::Serialize;
use tracing::debug;

use crate::client::Pennsieve;
use crate::config::{ConfigFile, DEFAULT_PROFILE_KEY, GLOBAL_SECTION, SETTING_KEYS, Settings};
use crate::error::PennsieveError;
use crate::transport::Transport;

pub const RESERVED_PROFILES: &[&str] = &[GLOBAL_SECTION, "agent", "none"];
pub const DEFAULT_PROFILE_NAME: &str = "default";
const NO_PROFILE: &str = "none";

pub trait Prompter {
    fn input(&self, prompt: &str, default: Option<&str>) -> Result<String, PennsieveError>;
    fn secret(&self, prompt: &str) -> Result<String, PennsieveError>;
    fn confirm(&self, prompt: &str) -> Result<bool, PennsieveError>;
}

pub struct NoPrompts;

impl Prompter for NoPrompts {
    fn input(&self, prompt: &str, _default: Option<&str>) -> Result<String, PennsieveError> {
        Err(refused(prompt))
    }

    fn secret(&self, prompt: &str) -> Result<String, PennsieveError> {
        Err(refused(prompt))
    }

    fn confirm(&self, prompt: &str) -> Result<bool, PennsieveError> {
        Err(refused(prompt))
    }
}

fn refused(prompt: &str) -> PennsieveError {
    PennsieveError::Validation(format!(
        "'{prompt}' needs an interactive terminal; pass the value as an argument or use --force"
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueSource {
    Profile,
    Global,
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingValue {
    pub key: String,
    pub value: String,
    pub source: ValueSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileCreated {
    pub name: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileDeleted {
    pub name: String,
    pub default_unset: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileEntry {
    pub name: String,
    pub is_default: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contents: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileList {
    pub profiles: Vec<ProfileEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DefaultChange {
    pub previous: Option<String>,
    pub current: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileContents {
    pub name: String,
    pub values: Vec<SettingValue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyChange {
    pub profile: String,
    pub key: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileKeys {
    pub profile: String,
    pub values: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub active_profile: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub user: Option<String>,
    pub organization: Option<String>,
    pub organization_id: Option<String>,
    pub api_host: String,
}

impl Status {
    pub fn collect<T: Transport>(client: &mut Pennsieve<T>) -> Result<Self, PennsieveError> {
        let organization_id = client.session().organization().map(|id| id.to_string());
        let organization = match &organization_id {
            Some(id) => Some(client.organization(id)?.name),
            None => None,
        };
        let settings = client.settings();
        Ok(Self {
            active_profile: settings.active_profile.clone(),
            environment: settings.env.clone(),
            user: client.user().map(|user| user.email.clone()),
            organization,
            organization_id,
            api_host: client.settings().api_host.clone(),
        })
    }
}

pub struct ProfileManager {
    config: ConfigFile,
    defaults: Settings,
}

impl ProfileManager {
    pub fn open(path: &Utf8Path, defaults: Settings) -> Result<Self, PennsieveError> {
        Ok(Self {
            config: ConfigFile::load(path)?,
            defaults,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn needs_setup(&self) -> bool {
        !self.config.exists()
    }

    pub fn save(&self) -> Result<(), PennsieveError> {
        debug!(path = %self.config.path(), "writing profiles");
        self.config.save()
    }

    pub fn setup(&mut self, prompter: &dyn Prompter) -> Result<ProfileCreated, PennsieveError> {
        self.config.clear();
        self.config.set(GLOBAL_SECTION, DEFAULT_PROFILE_KEY, NO_PROFILE);
        self.create(None, prompter)
    }

    pub fn create(
        &mut self,
        name: Option<&str>,
        prompter: &dyn Prompter,
    ) -> Result<ProfileCreated, PennsieveError> {
        let name = match name {
            Some(name) => name.to_string(),
            None => {
                let entered = prompter.input("Profile name", Some(DEFAULT_PROFILE_NAME))?;
                if entered.trim().is_empty() {
                    DEFAULT_PROFILE_NAME.to_string()
                } else {
                    entered.trim().to_string()
                }
            }
        };
        if RESERVED_PROFILES.contains(&name.as_str()) {
            return Err(PennsieveError::ReservedProfile(name));
        }
        if self.config.has_section(&name) {
            return Err(PennsieveError::ProfileExists(name));
        }
        let token = prompter.input("API token", None)?;
        let secret = prompter.secret("API secret")?;
        self.config.set(&name, "api_token", token.trim());
        self.config.set(&name, "api_secret", secret.trim());

        let is_default = match self.config.default_profile() {
            None => true,
            Some(_) => prompter.confirm(&format!("Would you like to set '{name}' as default?"))?,
        };
        if is_default {
            self.config.set(GLOBAL_SECTION, DEFAULT_PROFILE_KEY, &name);
        }
        Ok(ProfileCreated { name, is_default })
    }

    pub fn delete(
        &mut self,
        name: Option<&str>,
        force: bool,
        prompter: &dyn Prompter,
    ) -> Result<ProfileDeleted, PennsieveError> {
        let name = match name {
            Some(name) => name.to_string(),
            None => prompter.input("Profile to delete", None)?,
        };
        self.require_profile(&name)?;
        if !force && !prompter.confirm(&format!("Delete profile '{name}'?"))? {
            return Err(PennsieveError::Aborted);
        }
        self.config.remove_section(&name);
        let default_unset = self.config.default_profile() == Some(name.as_str());
        if default_unset {
            self.config.set(GLOBAL_SECTION, DEFAULT_PROFILE_KEY, NO_PROFILE);
        }
        Ok(ProfileDeleted {
            name,
            default_unset,
        })
    }

    pub fn list(&self, contents: bool) -> ProfileList {
        let default = self.config.default_profile();
        let profiles = self
            .config
            .sections()
            .into_iter()
            .filter(|section| section != GLOBAL_SECTION)
            .map(|name| ProfileEntry {
                is_default: default == Some(name.as_str()),
                contents: contents.then(|| self.config.section(&name).unwrap_or_default()),
                name,
            })
            .collect();
        let global = self
            .config
            .section(GLOBAL_SECTION)
            .map(|mut values| {
                values.remove(DEFAULT_PROFILE_KEY);
                values
            })
            .filter(|values| contents && !values.is_empty());
        ProfileList { profiles, global }
    }

    pub fn set_default(
        &mut self,
        name: Option<&str>,
        prompter: &dyn Prompter,
    ) -> Result<DefaultChange, PennsieveError> {
        let name = match name {
            Some(name) => name.to_string(),
            None => prompter.input("Profile name to set as default", None)?,
        };
        self.require_profile(&name)?;
        let previous = self.config.default_profile().map(|name| name.to_string());
        self.config.set(GLOBAL_SECTION, DEFAULT_PROFILE_KEY, &name);
        Ok(DefaultChange {
            previous,
            current: Some(name),
        })
    }

    pub fn unset_default(
        &mut self,
        force: bool,
        prompter: &dyn Prompter,
    ) -> Result<DefaultChange, PennsieveError> {
        let previous = self.config.default_profile().map(|name| name.to_string());
        let shown = previous.as_deref().unwrap_or(NO_PROFILE);
        if !force && !prompter.confirm(&format!("Unset default profile '{shown}'?"))? {
            return Err(PennsieveError::Aborted);
        }
        self.config.set(GLOBAL_SECTION, DEFAULT_PROFILE_KEY, NO_PROFILE);
        Ok(DefaultChange {
            previous,
            current: None,
        })
    }

    pub fn show(&self, name: Option<&str>) -> Result<ProfileContents, PennsieveError> {
        let name = self.target(name);
        if name != GLOBAL_SECTION {
            self.require_profile(&name)?;
        }
        let resolved = self.config.profile_settings(&self.defaults, &name)?.values();
        let own = self.config.section(&name).unwrap_or_default();
        let global = self.config.section(GLOBAL_SECTION).unwrap_or_default();
        let values = resolved
            .into_iter()
            .map(|(key, value)| {
                let source = if name != GLOBAL_SECTION && own.contains_key(&key) {
                    ValueSource::Profile
                } else if global.contains_key(&key) {
                    ValueSource::Global
                } else {
                    ValueSource::Default
                };
                SettingValue { key, value, source }
            })
            .collect();
        Ok(ProfileContents { name, values })
    }

    pub fn set_key(
        &mut self,
        key: &str,
        value: &str,
        profile: Option<&str>,
        force: bool,
        prompter: &dyn Prompter,
    ) -> Result<KeyChange, PennsieveError> {
        if !SETTING_KEYS.contains(&key) {
            return Err(PennsieveError::InvalidKey(key.to_string()));
        }
        let name = self.target(profile);
        self.require_section(&name)?;
        if !force
            && self.config.get(&name, key).is_some()
            && !prompter.confirm(&format!("{name}: {key} already set. Overwrite?"))?
        {
            return Err(PennsieveError::Aborted);
        }
        // Rejects values the settings cannot parse.
        self.defaults.clone().apply(key, value)?;
        self.config.set(&name, key, value);
        Ok(KeyChange {
            profile: name,
            key: key.to_string(),
            value: Some(value.to_string()),
        })
    }

    pub fn unset_key(
        &mut self,
        key: &str,
        profile: Option<&str>,
        force: bool,
        prompter: &dyn Prompter,
    ) -> Result<KeyChange, PennsieveError> {
        let name = self.target(profile);
        self.require_section(&name)?;
        if self.config.get(&name, key).is_none() {
            return Err(PennsieveError::KeyNotSet {
                profile: name,
                key: key.to_string(),
            });
        }
        if !force && !prompter.confirm(&format!("{name}: Unset {key}?"))? {
            return Err(PennsieveError::Aborted);
        }
        self.config.remove_key(&name, key);
        Ok(KeyChange {
            profile: name,
            key: key.to_string(),
            value: None,
        })
    }

    pub fn keys(&self, profile: Option<&str>) -> Result<ProfileKeys, PennsieveError> {
        let name = self.target(profile);
        let values = self.config.profile_settings(&self.defaults, &name)?.values();
        Ok(ProfileKeys {
            profile: name,
            values,
        })
    }

    fn target(&self, name: Option<&str>) -> String {
        name.or(self.config.default_profile())
            .unwrap_or(GLOBAL_SECTION)
            .to_string()
    }

    fn require_profile(&self, name: &str) -> Result<(), PennsieveError> {
        if self.config.is_profile(name) {
            Ok(())
        } else {
            Err(PennsieveError::UnknownProfile(name.to_string()))
        }
    }

    fn require_section(&self, name: &str) -> Result<(), PennsieveError> {
        if name == GLOBAL_SECTION || self.config.is_profile(name) {
            Ok(())
        } else {
            Err(PennsieveError::UnknownProfile(name.to_string()))
        }
    }
}
