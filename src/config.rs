use std::collections::{BTreeMap, HashMap};
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use ini::Ini;
use tracing::debug;

use crate::error::PennsieveError;

pub const DEFAULT_API_HOST: &str = "https://api.pennsieve.io";
pub const CONFIG_FILE_NAME: &str = "config.ini";
pub const GLOBAL_SECTION: &str = "global";
pub const DEFAULT_PROFILE_KEY: &str = "default_profile";

pub const SETTING_KEYS: &[&str] = &[
    "api_host",
    "model_service_host",
    "api_token",
    "api_secret",
    "headers",
    "max_request_time",
    "max_request_timeout_retries",
    "max_upload_workers",
    "max_points_per_chunk",
    "s3_host",
    "s3_port",
    "pennsieve_dir",
    "cache_dir",
    "cache_index",
    "cache_max_size",
    "cache_inspect_interval",
    "ts_page_size",
    "use_cache",
];

pub const ENVIRONMENT_VARIABLES: &[(&str, &str)] = &[
    ("api_host", "PENNSIEVE_API_LOC"),
    ("api_token", "PENNSIEVE_API_TOKEN"),
    ("api_secret", "PENNSIEVE_API_SECRET"),
    ("pennsieve_dir", "PENNSIEVE_LOCAL_DIR"),
    ("cache_dir", "PENNSIEVE_CACHE_LOC"),
    ("cache_max_size", "PENNSIEVE_CACHE_MAX_SIZE"),
    ("cache_inspect_interval", "PENNSIEVE_CACHE_INSPECT_EVERY"),
    ("ts_page_size", "PENNSIEVE_TS_PAGE_SIZE"),
    ("use_cache", "PENNSIEVE_USE_CACHE"),
    (DEFAULT_PROFILE_KEY, "PENNSIEVE_PROFILE"),
    ("s3_host", "S3_HOST"),
    ("s3_port", "S3_PORT"),
];

pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_host: String,
    pub model_service_host: Option<String>,
    pub api_token: Option<String>,
    pub api_secret: Option<String>,
    pub jwt: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub max_request_time: u64,
    pub max_request_timeout_retries: u32,
    pub max_upload_workers: u32,
    pub max_points_per_chunk: u64,
    pub s3_host: String,
    pub s3_port: String,
    pub pennsieve_dir: Utf8PathBuf,
    pub cache_dir: Utf8PathBuf,
    pub cache_index: Utf8PathBuf,
    pub cache_max_size: u64,
    pub cache_inspect_interval: u64,
    pub ts_page_size: u64,
    pub use_cache: bool,
    pub active_profile: Option<String>,
    pub env: BTreeMap<String, String>,
    pub config_file: Utf8PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct SettingsOptions {
    pub profile: Option<String>,
    pub overrides: BTreeMap<String, String>,
    pub skip_env_override: bool,
    pub jwt: Option<String>,
    pub home: Option<Utf8PathBuf>,
}

impl Settings {
    pub fn defaults(home: &Utf8Path) -> Self {
        let pennsieve_dir = home.join(".pennsieve");
        let cache_dir = pennsieve_dir.join("cache");
        let cache_index = cache_dir.join("index.db");
        Self {
            api_host: DEFAULT_API_HOST.to_string(),
            model_service_host: None,
            api_token: None,
            api_secret: None,
            jwt: None,
            headers: BTreeMap::new(),
            max_request_time: 120,
            max_request_timeout_retries: 2,
            max_upload_workers: 10,
            max_points_per_chunk: 10_000,
            s3_host: String::new(),
            s3_port: String::new(),
            config_file: pennsieve_dir.join(CONFIG_FILE_NAME),
            pennsieve_dir,
            cache_dir,
            cache_index,
            cache_max_size: 2048,
            cache_inspect_interval: 1000,
            ts_page_size: 3600,
            use_cache: true,
            active_profile: None,
            env: BTreeMap::new(),
        }
    }

    pub fn user_defaults() -> Result<Self, PennsieveError> {
        Ok(Self::defaults(&home_dir()?))
    }

    pub fn load(profile: Option<&str>) -> Result<Self, PennsieveError> {
        let options = SettingsOptions {
            profile: profile.map(|name| name.to_string()),
            ..SettingsOptions::default()
        };
        Self::resolve(&options, &ProcessEnv)
    }

    pub fn resolve(
        options: &SettingsOptions,
        env: &dyn EnvSource,
    ) -> Result<Self, PennsieveError> {
        let home = match &options.home {
            Some(home) => home.clone(),
            None => home_dir()?,
        };
        let defaults = Self::defaults(&home);

        let environs = read_env(env);
        let mut settings = defaults.clone();
        settings.apply_env(&environs)?;

        fs::create_dir_all(settings.pennsieve_dir.as_std_path())
            .map_err(|err| PennsieveError::Filesystem(err.to_string()))?;
        let config_file = settings.pennsieve_dir.join(CONFIG_FILE_NAME);
        let config = ConfigFile::load(&config_file)?;
        let env_record = settings.env.clone();

        let default_profile = config
            .get(GLOBAL_SECTION, DEFAULT_PROFILE_KEY)
            .map(|name| name.to_string());
        settings = match default_profile {
            Some(name) if name != "none" && config.is_profile(&name) => {
                config.profile_settings(&defaults, &name)?
            }
            _ => config.profile_settings(&defaults, GLOBAL_SECTION)?,
        };

        if let Some((_, _, name)) = environs
            .iter()
            .find(|(key, _, _)| *key == DEFAULT_PROFILE_KEY)
        {
            settings = config.profile_settings(&defaults, name)?;
        }
        if let Some(name) = &options.profile {
            settings = config.profile_settings(&defaults, name)?;
        }

        if !options.skip_env_override {
            settings.apply_env(&environs)?;
        }
        for (key, value) in &options.overrides {
            if !SETTING_KEYS.contains(&key.as_str()) {
                return Err(PennsieveError::InvalidKey(key.clone()));
            }
            settings.apply(key, value)?;
        }

        settings.env = env_record;
        settings.config_file = config_file;
        settings.jwt = options.jwt.clone();

        if settings.use_cache && !settings.cache_dir.as_std_path().exists() {
            fs::create_dir_all(settings.cache_dir.as_std_path())
                .map_err(|err| PennsieveError::Filesystem(err.to_string()))?;
        }
        debug!(profile = ?settings.active_profile, host = %settings.api_host, "settings resolved");
        Ok(settings)
    }

    pub fn apply(&mut self, key: &str, raw: &str) -> Result<(), PennsieveError> {
        let is_none = raw == "none";
        match key {
            "api_host" if !is_none => self.api_host = raw.to_string(),
            "model_service_host" => self.model_service_host = optional(raw),
            "api_token" => self.api_token = optional(raw),
            "api_secret" => self.api_secret = optional(raw),
            "headers" => {
                self.headers = if is_none {
                    BTreeMap::new()
                } else {
                    serde_json::from_str(raw).map_err(|err| {
                        PennsieveError::Config(format!("headers must be a JSON object: {err}"))
                    })?
                }
            }
            "max_request_time" => self.max_request_time = parse_number(key, raw)?,
            "max_request_timeout_retries" => {
                self.max_request_timeout_retries = parse_number(key, raw)?
            }
            "max_upload_workers" => self.max_upload_workers = parse_number(key, raw)?,
            "max_points_per_chunk" => self.max_points_per_chunk = parse_number(key, raw)?,
            "s3_host" => self.s3_host = raw.to_string(),
            "s3_port" => self.s3_port = raw.to_string(),
            "pennsieve_dir" if !is_none => self.pennsieve_dir = Utf8PathBuf::from(raw),
            "cache_dir" if !is_none => self.cache_dir = Utf8PathBuf::from(raw),
            "cache_index" if !is_none => self.cache_index = Utf8PathBuf::from(raw),
            "cache_max_size" => self.cache_max_size = parse_number(key, raw)?,
            "cache_inspect_interval" => self.cache_inspect_interval = parse_number(key, raw)?,
            "ts_page_size" => self.ts_page_size = parse_number(key, raw)?,
            "use_cache" => self.use_cache = parse_bool(key, raw)?,
            _ => {}
        }
        Ok(())
    }

    fn apply_env(&mut self, environs: &[(&str, &str, String)]) -> Result<(), PennsieveError> {
        for (key, variable, raw) in environs {
            self.env.insert(variable.to_string(), raw.clone());
            if *key != DEFAULT_PROFILE_KEY {
                self.apply(key, raw)?;
            }
        }
        Ok(())
    }

    pub fn values(&self) -> BTreeMap<String, String> {
        let text = |value: &Option<String>| value.clone().unwrap_or_else(|| "none".to_string());
        let headers = if self.headers.is_empty() {
            "none".to_string()
        } else {
            serde_json::to_string(&self.headers).unwrap_or_default()
        };
        let mut values = BTreeMap::new();
        values.insert("api_host".to_string(), self.api_host.clone());
        values.insert("model_service_host".to_string(), text(&self.model_service_host));
        values.insert("api_token".to_string(), text(&self.api_token));
        values.insert("api_secret".to_string(), text(&self.api_secret));
        values.insert("headers".to_string(), headers);
        values.insert("max_request_time".to_string(), self.max_request_time.to_string());
        values.insert(
            "max_request_timeout_retries".to_string(),
            self.max_request_timeout_retries.to_string(),
        );
        values.insert("max_upload_workers".to_string(), self.max_upload_workers.to_string());
        values.insert(
            "max_points_per_chunk".to_string(),
            self.max_points_per_chunk.to_string(),
        );
        values.insert("s3_host".to_string(), self.s3_host.clone());
        values.insert("s3_port".to_string(), self.s3_port.clone());
        values.insert("pennsieve_dir".to_string(), self.pennsieve_dir.to_string());
        values.insert("cache_dir".to_string(), self.cache_dir.to_string());
        values.insert("cache_index".to_string(), self.cache_index.to_string());
        values.insert("cache_max_size".to_string(), self.cache_max_size.to_string());
        values.insert(
            "cache_inspect_interval".to_string(),
            self.cache_inspect_interval.to_string(),
        );
        values.insert("ts_page_size".to_string(), self.ts_page_size.to_string());
        values.insert("use_cache".to_string(), self.use_cache.to_string());
        values
    }

    pub fn model_service(&self) -> (Option<&str>, &'static str) {
        match &self.model_service_host {
            Some(host) => (Some(host.as_str()), "/datasets"),
            None => (None, "/models/datasets"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: Utf8PathBuf,
    ini: Ini,
}

impl ConfigFile {
    pub fn load(path: &Utf8Path) -> Result<Self, PennsieveError> {
        let ini = if path.as_std_path().exists() {
            Ini::load_from_file(path.as_std_path())
                .map_err(|_| PennsieveError::ConfigRead(path.as_std_path().to_path_buf()))?
        } else {
            Ini::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            ini,
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.as_std_path().exists()
    }

    pub fn sections(&self) -> Vec<String> {
        self.ini
            .sections()
            .flatten()
            .map(|name| name.to_string())
            .collect()
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.ini.section(Some(name)).is_some()
    }

    pub fn is_profile(&self, name: &str) -> bool {
        name != GLOBAL_SECTION && self.has_section(name)
    }

    pub fn section(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.ini.section(Some(name)).map(|props| {
            props
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect()
        })
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.ini.section(Some(section))?.get(key)
    }

    pub fn set(&mut self, section: &str, key: &str, value: &str) {
        self.ini.with_section(Some(section)).set(key, value);
    }

    pub fn remove_key(&mut self, section: &str, key: &str) -> Option<String> {
        self.ini.section_mut(Some(section))?.remove(key)
    }

    pub fn remove_section(&mut self, name: &str) -> bool {
        self.ini.delete(Some(name)).is_some()
    }

    pub fn clear(&mut self) {
        self.ini = Ini::new();
    }

    pub fn default_profile(&self) -> Option<&str> {
        self.get(GLOBAL_SECTION, DEFAULT_PROFILE_KEY)
            .filter(|name| *name != "none")
    }

    /// Settings of one profile: defaults, then `[global]`, then the profile.
    pub fn profile_settings(
        &self,
        defaults: &Settings,
        name: &str,
    ) -> Result<Settings, PennsieveError> {
        let mut settings = defaults.clone();
        if let Some(global) = self.section(GLOBAL_SECTION) {
            for (key, value) in &global {
                settings.apply(key, value)?;
            }
        }
        if name == GLOBAL_SECTION {
            settings.active_profile = None;
            return Ok(settings);
        }
        let section = self
            .section(name)
            .ok_or_else(|| PennsieveError::UnknownProfile(name.to_string()))?;
        for (key, value) in &section {
            settings.apply(key, value)?;
        }
        settings.active_profile = Some(name.to_string());
        Ok(settings)
    }

    pub fn save(&self) -> Result<(), PennsieveError> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| PennsieveError::Filesystem("invalid config path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| PennsieveError::Filesystem(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix("pennsieve-config")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| PennsieveError::Filesystem(err.to_string()))?;
        self.ini
            .write_to(&mut temp)
            .map_err(|err| PennsieveError::Filesystem(err.to_string()))?;
        temp.persist(self.path.as_std_path())
            .map_err(|err| PennsieveError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

fn read_env(env: &dyn EnvSource) -> Vec<(&'static str, &'static str, String)> {
    ENVIRONMENT_VARIABLES
        .iter()
        .filter_map(|(key, variable)| env.var(variable).map(|value| (*key, *variable, value)))
        .collect()
}

fn home_dir() -> Result<Utf8PathBuf, PennsieveError> {
    BaseDirs::new()
        .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.home_dir().to_path_buf()).ok())
        .ok_or_else(|| PennsieveError::Filesystem("unable to resolve home directory".to_string()))
}

fn optional(raw: &str) -> Option<String> {
    if raw == "none" {
        None
    } else {
        Some(raw.to_string())
    }
}

fn parse_number<N: std::str::FromStr>(key: &str, raw: &str) -> Result<N, PennsieveError> {
    raw.trim()
        .parse()
        .map_err(|_| PennsieveError::Config(format!("{key} must be a number, got '{raw}'")))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, PennsieveError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(PennsieveError::Config(format!(
            "{key} must be true or false, got '{raw}'"
        ))),
    }
}
