use std::cell::RefCell;
use std::collections::VecDeque;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use pennsieve_client::config::{ConfigFile, Settings};
use pennsieve_client::error::PennsieveError;
use pennsieve_client::profile::{NoPrompts, ProfileManager, Prompter, ValueSource};

#[derive(Default)]
struct Script {
    inputs: RefCell<VecDeque<String>>,
    confirms: RefCell<VecDeque<bool>>,
    asked: RefCell<Vec<String>>,
}

impl Script {
    fn new(inputs: &[&str], confirms: &[bool]) -> Self {
        Self {
            inputs: RefCell::new(inputs.iter().map(|value| value.to_string()).collect()),
            confirms: RefCell::new(confirms.iter().copied().collect()),
            asked: RefCell::default(),
        }
    }

    fn next_input(&self, prompt: &str) -> Result<String, PennsieveError> {
        self.asked.borrow_mut().push(prompt.to_string());
        self.inputs
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| PennsieveError::Validation(format!("unexpected prompt '{prompt}'")))
    }
}

impl Prompter for Script {
    fn input(&self, prompt: &str, _default: Option<&str>) -> Result<String, PennsieveError> {
        self.next_input(prompt)
    }

    fn secret(&self, prompt: &str) -> Result<String, PennsieveError> {
        self.next_input(prompt)
    }

    fn confirm(&self, prompt: &str) -> Result<bool, PennsieveError> {
        self.asked.borrow_mut().push(prompt.to_string());
        self.confirms
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| PennsieveError::Validation(format!("unexpected confirm '{prompt}'")))
    }
}

struct Workspace {
    _dir: tempfile::TempDir,
    home: Utf8PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let home = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        Self { _dir: dir, home }
    }

    fn manager(&self) -> ProfileManager {
        let defaults = Settings::defaults(&self.home);
        ProfileManager::open(&defaults.config_file.clone(), defaults).unwrap()
    }

    fn with_profiles(&self) -> ProfileManager {
        let mut manager = self.manager();
        manager
            .setup(&Script::new(&["lab", "lab-token", "lab-secret"], &[]))
            .unwrap();
        manager
            .create(Some("clinic"), &Script::new(&["c-token", "c-secret"], &[false]))
            .unwrap();
        manager.save().unwrap();
        manager
    }
}

#[test]
fn first_profile_becomes_default() {
    let workspace = Workspace::new();
    let mut manager = workspace.manager();
    assert!(manager.needs_setup());

    let created = manager
        .setup(&Script::new(&["lab", " token ", "secret"], &[]))
        .unwrap();
    assert_eq!(created.name, "lab");
    assert!(created.is_default);
    manager.save().unwrap();

    let reloaded = workspace.manager();
    assert!(!reloaded.needs_setup());
    assert_eq!(reloaded.config().default_profile(), Some("lab"));
    assert_eq!(reloaded.config().get("lab", "api_token"), Some("token"));
}

#[test]
fn later_profiles_ask_before_taking_the_default() {
    let workspace = Workspace::new();
    let mut manager = workspace.with_profiles();
    let script = Script::new(&["t", "s"], &[true]);
    let created = manager.create(Some("field"), &script).unwrap();
    assert!(created.is_default);
    assert!(script.asked.borrow().iter().any(|prompt| prompt.contains("default")));
    assert_eq!(manager.config().default_profile(), Some("field"));
}

#[test]
fn reserved_and_duplicate_names_are_refused() {
    let workspace = Workspace::new();
    let mut manager = workspace.with_profiles();
    for name in ["global", "agent", "none"] {
        assert_matches!(
            manager.create(Some(name), &NoPrompts),
            Err(PennsieveError::ReservedProfile(_))
        );
    }
    assert_matches!(
        manager.create(Some("lab"), &NoPrompts),
        Err(PennsieveError::ProfileExists(name)) if name == "lab"
    );
}

#[test]
fn deleting_the_default_unsets_it() {
    let workspace = Workspace::new();
    let mut manager = workspace.with_profiles();

    assert_matches!(
        manager.delete(Some("lab"), false, &Script::new(&[], &[false])),
        Err(PennsieveError::Aborted)
    );
    let deleted = manager.delete(Some("lab"), true, &NoPrompts).unwrap();
    assert!(deleted.default_unset);
    assert_eq!(manager.config().default_profile(), None);
    assert_matches!(
        manager.delete(Some("lab"), true, &NoPrompts),
        Err(PennsieveError::UnknownProfile(_))
    );
}

#[test]
fn list_marks_the_default() {
    let workspace = Workspace::new();
    let mut manager = workspace.with_profiles();
    manager.set_key("api_host", "https://global.example", Some("global"), true, &NoPrompts).unwrap();

    let listing = manager.list(false);
    let names: Vec<_> = listing.profiles.iter().map(|entry| entry.name.as_str()).collect();
    assert_eq!(names, vec!["lab", "clinic"]);
    assert!(listing.profiles[0].is_default);
    assert!(listing.profiles[0].contents.is_none());
    assert!(listing.global.is_none());

    let detailed = manager.list(true);
    assert_eq!(
        detailed.profiles[1].contents.as_ref().unwrap().get("api_token").map(String::as_str),
        Some("c-token")
    );
    assert!(detailed.global.unwrap().contains_key("api_host"));
}

#[test]
fn switching_and_clearing_the_default() {
    let workspace = Workspace::new();
    let mut manager = workspace.with_profiles();

    let change = manager.set_default(Some("clinic"), &NoPrompts).unwrap();
    assert_eq!(change.previous.as_deref(), Some("lab"));
    assert_eq!(change.current.as_deref(), Some("clinic"));
    assert_matches!(
        manager.set_default(Some("ghost"), &NoPrompts),
        Err(PennsieveError::UnknownProfile(_))
    );

    let cleared = manager.unset_default(true, &NoPrompts).unwrap();
    assert_eq!(cleared.previous.as_deref(), Some("clinic"));
    assert_eq!(manager.config().default_profile(), None);
    assert_eq!(manager.config().get("global", "default_profile"), Some("none"));
}

#[test]
fn show_reports_where_values_come_from() {
    let workspace = Workspace::new();
    let mut manager = workspace.with_profiles();
    manager.set_key("ts_page_size", "100", Some("global"), true, &NoPrompts).unwrap();

    let shown = manager.show(None).unwrap();
    assert_eq!(shown.name, "lab");
    let source = |key: &str| {
        shown
            .values
            .iter()
            .find(|value| value.key == key)
            .map(|value| (value.value.clone(), value.source))
    };
    assert_eq!(source("api_token"), Some(("lab-token".to_string(), ValueSource::Profile)));
    assert_eq!(source("ts_page_size"), Some(("100".to_string(), ValueSource::Global)));
    assert_eq!(source("use_cache"), Some(("true".to_string(), ValueSource::Default)));
}

#[test]
fn set_key_validates_and_confirms_overwrites() {
    let workspace = Workspace::new();
    let mut manager = workspace.with_profiles();

    assert_matches!(
        manager.set_key("colour", "blue", None, true, &NoPrompts),
        Err(PennsieveError::InvalidKey(_))
    );
    assert_matches!(
        manager.set_key("ts_page_size", "lots", None, true, &NoPrompts),
        Err(PennsieveError::Config(_))
    );
    assert_matches!(
        manager.set_key("api_token", "new", None, false, &Script::new(&[], &[false])),
        Err(PennsieveError::Aborted)
    );
    let change = manager
        .set_key("api_token", "new", None, false, &Script::new(&[], &[true]))
        .unwrap();
    assert_eq!(change.profile, "lab");
    assert_eq!(manager.config().get("lab", "api_token"), Some("new"));
}

#[test]
fn unset_key_requires_a_value() {
    let workspace = Workspace::new();
    let mut manager = workspace.with_profiles();
    assert_matches!(
        manager.unset_key("s3_host", Some("clinic"), true, &NoPrompts),
        Err(PennsieveError::KeyNotSet { profile, key }) if profile == "clinic" && key == "s3_host"
    );
    manager.unset_key("api_secret", Some("clinic"), true, &NoPrompts).unwrap();
    assert_eq!(manager.config().get("clinic", "api_secret"), None);
}

#[test]
fn keys_fall_back_to_global_without_a_default() {
    let workspace = Workspace::new();
    let mut manager = workspace.with_profiles();
    manager.unset_default(true, &NoPrompts).unwrap();
    let keys = manager.keys(None).unwrap();
    assert_eq!(keys.profile, "global");
    assert_eq!(keys.values.get("api_token").map(String::as_str), Some("none"));
}

#[test]
fn saved_profiles_resolve_as_settings() {
    let workspace = Workspace::new();
    workspace.with_profiles();
    let path = Settings::defaults(&workspace.home).config_file;
    let config = ConfigFile::load(&path).unwrap();
    let settings = config
        .profile_settings(&Settings::defaults(&workspace.home), "clinic")
        .unwrap();
    assert_eq!(settings.api_token.as_deref(), Some("c-token"));
    assert_eq!(settings.active_profile.as_deref(), Some("clinic"));
}
