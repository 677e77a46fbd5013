use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::account::{Organization, User};
use crate::cache::{NodeKey, ObjectCache};
use crate::config::Settings;
use crate::error::PennsieveError;
use crate::node::{DataNode, NodeKind, PackageFile, ParsedNode};
use crate::session::{Credentials, Session};
use crate::transport::{ApiRequest, HttpTransport, Method, Transport};
use crate::wire::{array, as_list, opt_string, require_string, segment};

const DATASET_PREFIX: &str = "N:dataset:";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeleteOutcome {
    pub deleted: Vec<String>,
    pub failures: Vec<String>,
}

#[derive(Debug)]
pub struct Pennsieve<T: Transport = HttpTransport> {
    session: Session<T>,
    settings: Settings,
    cache: ObjectCache,
}

impl Pennsieve<HttpTransport> {
    pub fn connect(settings: Settings) -> Result<Self, PennsieveError> {
        let credentials = Credentials::from_settings(&settings)?;
        let transport = HttpTransport::from_settings(&settings)?;
        Self::start(Session::new(transport, credentials), settings)
    }

    pub fn from_profile(profile: Option<&str>) -> Result<Self, PennsieveError> {
        Self::connect(Settings::load(profile)?)
    }
}

impl<T: Transport> Pennsieve<T> {
    pub fn with_transport(transport: T, settings: Settings) -> Result<Self, PennsieveError> {
        let credentials = Credentials::from_settings(&settings)?;
        Self::start(Session::new(transport, credentials), settings)
    }

    fn start(mut session: Session<T>, settings: Settings) -> Result<Self, PennsieveError> {
        session.authenticate(None)?;
        Ok(Self {
            session,
            settings,
            cache: ObjectCache::new(),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    pub fn user(&self) -> Option<&User> {
        self.session.user()
    }

    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    pub(crate) fn cache_mut(&mut self) -> &mut ObjectCache {
        &mut self.cache
    }

    pub fn node(&self, key: NodeKey) -> Result<&DataNode, PennsieveError> {
        self.cache.node(key)
    }

    pub fn node_mut(&mut self, key: NodeKey) -> Result<&mut DataNode, PennsieveError> {
        self.cache.node_mut(key)
    }

    pub(crate) fn call(&mut self, request: ApiRequest) -> Result<Value, PennsieveError> {
        self.session.call(request)
    }

    pub fn use_organization(&mut self, organization_id: &str) {
        self.session.set_organization(organization_id);
    }

    /// Cache first; fetches only ids not seen yet.
    pub fn get(&mut self, id: &str) -> Result<NodeKey, PennsieveError> {
        match self.cache.lookup(id) {
            Some(key) => Ok(key),
            None => self.fetch(id),
        }
    }

    /// Always asks the server and replaces the cached state in place.
    pub fn fetch(&mut self, id: &str) -> Result<NodeKey, PennsieveError> {
        let value = self.call(ApiRequest::get(node_path(id)))?;
        self.absorb(&value)
    }

    pub fn refresh(&mut self, key: NodeKey) -> Result<(), PennsieveError> {
        let id = self.node(key)?.require_id("refreshing")?.to_string();
        self.fetch(&id)?;
        Ok(())
    }

    pub(crate) fn absorb(&mut self, value: &Value) -> Result<NodeKey, PennsieveError> {
        let parsed = ParsedNode::from_json(value)?;
        Ok(self.absorb_parsed(parsed))
    }

    fn absorb_parsed(&mut self, parsed: ParsedNode) -> NodeKey {
        let ParsedNode { mut node, children } = parsed;
        if let Some(children) = children {
            let dataset = if node.is_dataset() {
                node.id.clone()
            } else {
                node.dataset.clone()
            };
            let parent = match node.kind {
                NodeKind::Collection => node.id.clone(),
                _ => None,
            };
            let mut keys = Vec::with_capacity(children.len());
            for mut child in children {
                if child.node.dataset.is_none() {
                    child.node.dataset = dataset.clone();
                }
                if child.node.parent.is_none() {
                    child.node.parent = parent.clone();
                }
                keys.push(self.absorb_parsed(child));
            }
            node.items = Some(keys);
        }
        self.cache.absorb(node)
    }

    pub fn datasets(&mut self) -> Result<Vec<NodeKey>, PennsieveError> {
        let value = self.call(ApiRequest::get("/datasets/"))?;
        as_list(&value)?
            .iter()
            .map(|entry| self.absorb(entry))
            .collect()
    }

    pub fn get_dataset(&mut self, name_or_id: &str) -> Result<NodeKey, PennsieveError> {
        if name_or_id.starts_with(DATASET_PREFIX) {
            return self.get(name_or_id);
        }
        self.find_dataset(name_or_id)?
            .ok_or_else(|| PennsieveError::NotFound(format!("dataset '{name_or_id}'")))
    }

    fn find_dataset(&mut self, name: &str) -> Result<Option<NodeKey>, PennsieveError> {
        let wanted = normalize_name(name);
        for key in self.datasets()? {
            if normalize_name(&self.node(key)?.name) == wanted {
                return Ok(Some(key));
            }
        }
        Ok(None)
    }

    pub fn create_dataset(
        &mut self,
        name: &str,
        description: Option<&str>,
        automatically_process_packages: bool,
    ) -> Result<NodeKey, PennsieveError> {
        if self.find_dataset(name)?.is_some() {
            return Err(PennsieveError::Validation(format!(
                "dataset '{name}' already exists"
            )));
        }
        let mut dataset = DataNode::dataset(name, description);
        if let Some(info) = dataset.dataset_info_mut() {
            info.automatically_process_packages = automatically_process_packages;
        }
        let value = self.call(ApiRequest::post("/datasets", dataset.request_body()))?;
        let key = self.absorb(&value)?;
        if self.node(key)?.item_keys().is_none() {
            self.cache.set_items(key, Vec::new());
        }
        Ok(key)
    }

    pub fn items(&mut self, container: NodeKey) -> Result<Vec<NodeKey>, PennsieveError> {
        let node = self.node(container)?;
        if !node.is_container() {
            return Err(PennsieveError::Validation(format!(
                "{} '{}' has no items",
                node.kind.label(),
                node.name
            )));
        }
        if let Some(items) = node.item_keys() {
            return Ok(items.to_vec());
        }
        let id = node.require_id("listing items")?.to_string();
        self.fetch(&id)?;
        let node = self.node(container)?;
        match node.item_keys() {
            Some(items) => Ok(items.to_vec()),
            None => {
                self.cache.set_items(container, Vec::new());
                Ok(Vec::new())
            }
        }
    }

    pub fn add(&mut self, container: NodeKey, mut node: DataNode) -> Result<NodeKey, PennsieveError> {
        if node.is_dataset() {
            return Err(PennsieveError::Validation(
                "datasets cannot be added to a container".to_string(),
            ));
        }
        if node.exists() {
            return Err(PennsieveError::Validation(format!(
                "'{}' already exists on the platform",
                node.name
            )));
        }
        let parent = self.node(container)?;
        let parent_id = parent.require_id("adding items")?.to_string();
        let (dataset, parent_field) = match parent.kind {
            NodeKind::Dataset(_) => (Some(parent_id), None),
            NodeKind::Collection => (parent.dataset.clone(), Some(parent_id)),
            _ => {
                return Err(PennsieveError::Validation(format!(
                    "cannot add items to {} '{}'",
                    parent.kind.label(),
                    parent.name
                )));
            }
        };
        node.dataset = Some(dataset.ok_or_else(|| {
            PennsieveError::Validation(format!("'{}' requires a dataset", node.name))
        })?);
        node.parent = parent_field;

        self.items(container)?;
        let value = self.call(ApiRequest::post("/packages", node.request_body()))?;
        let mut created = ParsedNode::from_json(&value)?;
        if created.node.dataset.is_none() {
            created.node.dataset = node.dataset.clone();
        }
        if created.node.parent.is_none() {
            created.node.parent = node.parent.clone();
        }
        if created.node.properties.is_empty() {
            created.node.properties = node.properties;
        }
        let is_container = created.node.is_container();
        let key = self.absorb_parsed(created);
        if is_container && self.node(key)?.item_keys().is_none() {
            self.cache.set_items(key, Vec::new());
        }
        self.cache.attach(container, key);
        debug!(id = self.node(key)?.id.as_deref().unwrap_or("-"), "created");
        Ok(key)
    }

    pub fn create_collection(
        &mut self,
        container: NodeKey,
        name: &str,
    ) -> Result<NodeKey, PennsieveError> {
        self.add(container, DataNode::collection(name))
    }

    pub fn update(&mut self, key: NodeKey) -> Result<bool, PennsieveError> {
        let node = self.node(key)?;
        let id = node.require_id("updating")?.to_string();
        if !self.cache.is_dirty(key) {
            return Ok(false);
        }
        let mut body = node.request_body();
        if !node.is_dataset()
            && let Some(fields) = body.as_object_mut()
        {
            fields.remove("state");
        }
        let path = if node.is_dataset() {
            format!("/datasets/{}", segment(&id))
        } else {
            format!("/packages/{}", segment(&id))
        };
        let value = self.call(ApiRequest::put(path, body))?;
        if let Ok(updated) = DataNode::from_json(&value) {
            let node = self.cache.node_mut(key)?;
            node.updated_at = updated.updated_at.or(node.updated_at.take());
            if updated.int_id.is_some() {
                node.int_id = updated.int_id;
            }
            if updated.state.is_some() {
                node.state = updated.state;
            }
        }
        self.cache.mark_synced(key);
        Ok(true)
    }

    pub fn update_properties(&mut self, key: NodeKey) -> Result<(), PennsieveError> {
        let node = self.node(key)?;
        let id = node.require_id("updating properties")?.to_string();
        let body = json!({"properties": node.properties_json()});
        self.call(ApiRequest::put(format!("/data/{}/properties", segment(&id)), body))?;
        Ok(())
    }

    pub fn delete(&mut self, keys: &[NodeKey]) -> Result<DeleteOutcome, PennsieveError> {
        let mut ids = Vec::with_capacity(keys.len());
        for key in keys {
            let node = self.node(*key)?;
            if node.is_dataset() {
                return Err(PennsieveError::Validation(
                    "datasets cannot be deleted through this client".to_string(),
                ));
            }
            ids.push(node.require_id("deleting")?.to_string());
        }
        if ids.is_empty() {
            return Ok(DeleteOutcome::default());
        }
        let value = self.call(ApiRequest::post("/data/delete", json!({"things": ids})))?;
        let failures: Vec<String> = array(&value, "failures")
            .iter()
            .filter_map(|failure| opt_string(failure, "id"))
            .collect();
        if !failures.is_empty() {
            warn!(count = failures.len(), "some deletions failed: {}", failures.join(", "));
        }

        let mut outcome = DeleteOutcome {
            deleted: Vec::new(),
            failures,
        };
        for (key, id) in keys.iter().zip(ids) {
            if outcome.failures.contains(&id) {
                continue;
            }
            self.cache.detach(*key);
            self.cache.forget(*key);
            outcome.deleted.push(id);
        }
        Ok(outcome)
    }

    /// Moves nodes one request at a time into a collection, or to the dataset
    /// root when `destination` is `None`. Stops at the first failure; nodes
    /// moved before it stay moved.
    pub fn move_to(
        &mut self,
        destination: Option<NodeKey>,
        keys: &[NodeKey],
    ) -> Result<(), PennsieveError> {
        let destination_id = match destination {
            Some(dest) => {
                let node = self.node(dest)?;
                if node.kind != NodeKind::Collection {
                    return Err(PennsieveError::Validation(format!(
                        "destination must be a collection, got {} '{}'",
                        node.kind.label(),
                        node.name
                    )));
                }
                Some(node.require_id("moving items into it")?.to_string())
            }
            None => None,
        };

        let mut moves = Vec::with_capacity(keys.len());
        for key in keys {
            let node = self.node(*key)?;
            if node.is_dataset() {
                return Err(PennsieveError::Validation(
                    "datasets cannot be moved".to_string(),
                ));
            }
            if let Some(dest) = destination
                && self.is_within(dest, *key)
            {
                return Err(PennsieveError::Validation(format!(
                    "cannot move '{}' into itself or one of its collections",
                    node.name
                )));
            }
            moves.push((*key, node.require_id("moving")?.to_string(), node.dataset.clone()));
        }

        for (key, id, dataset) in moves {
            let value = self.call(ApiRequest::post(
                "/data/move",
                json!({"things": [id], "destination": destination_id}),
            ))?;
            if let Some(failure) = array(&value, "failures").first() {
                let reason = opt_string(failure, "error").unwrap_or_else(|| "unknown".to_string());
                return Err(PennsieveError::Rejected(format!("could not move {id}: {reason}")));
            }

            self.cache.detach(key);
            let target = match destination {
                Some(dest) => Some(dest),
                None => dataset.as_deref().and_then(|id| self.cache.lookup(id)),
            };
            if let Some(target) = target {
                self.cache.attach(target, key);
            }
            self.cache.node_mut(key)?.parent = destination_id.clone();
            self.cache.mark_synced(key);
        }
        Ok(())
    }

    pub fn search(&mut self, query: &str, max_results: usize) -> Result<Vec<NodeKey>, PennsieveError> {
        let value = self.call(ApiRequest::post(
            "/search",
            json!({"query": query, "maxResults": max_results}),
        ))?;
        let hits = match value.get("results") {
            Some(results) => as_list(results)?,
            None => as_list(&value)?,
        };
        let ids: Vec<String> = hits
            .iter()
            .map(|hit| DataNode::from_json(hit).map(|node| node.id))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .flatten()
            .collect();
        ids.iter().map(|id| self.get(id)).collect()
    }

    pub fn organizations(&mut self) -> Result<Vec<Organization>, PennsieveError> {
        let value = self.call(ApiRequest::get("/organizations").query("includeAdmins", "false"))?;
        let entries = match value.get("organizations") {
            Some(entries) => as_list(entries)?,
            None => as_list(&value)?,
        };
        entries.iter().map(Organization::from_json).collect()
    }

    pub fn organization(&mut self, id: &str) -> Result<Organization, PennsieveError> {
        let value = self.call(ApiRequest::get(format!("/organizations/{}", segment(id))))?;
        Organization::from_json(&value)
    }

    pub fn members(&mut self, organization_id: &str) -> Result<Vec<User>, PennsieveError> {
        let value = self.call(ApiRequest::get(format!(
            "/organizations/{}/members",
            segment(organization_id)
        )))?;
        as_list(&value)?.iter().map(User::from_json).collect()
    }

    pub fn sources(&mut self, package: NodeKey) -> Result<Vec<PackageFile>, PennsieveError> {
        self.package_files(package, "sources")
    }

    pub fn files(&mut self, package: NodeKey) -> Result<Vec<PackageFile>, PennsieveError> {
        self.package_files(package, "files")
    }

    pub fn view(&mut self, package: NodeKey) -> Result<Vec<PackageFile>, PennsieveError> {
        self.package_files(package, "view")
    }

    fn package_files(
        &mut self,
        package: NodeKey,
        kind: &str,
    ) -> Result<Vec<PackageFile>, PennsieveError> {
        let id = self.package_id(package, "listing files")?;
        let value = self.call(ApiRequest::get(format!("/packages/{}/{kind}", segment(&id))))?;
        as_list(&value)?
            .iter()
            .map(|entry| PackageFile::from_json(entry, &id))
            .collect()
    }

    pub fn file_url(&mut self, package: NodeKey, file_id: &str) -> Result<String, PennsieveError> {
        let id = self.package_id(package, "downloading")?;
        let value = self.call(ApiRequest::get(format!(
            "/packages/{}/files/{}",
            segment(&id),
            segment(file_id)
        )))?;
        require_string(&value, "url")
    }

    pub fn process(&mut self, package: NodeKey) -> Result<(), PennsieveError> {
        let id = self.package_id(package, "processing")?;
        self.call(ApiRequest::new(
            Method::Put,
            format!("/packages/{}/process", segment(&id)),
        ))?;
        Ok(())
    }

    pub fn package_count(&mut self, dataset: NodeKey) -> Result<i64, PennsieveError> {
        let id = self.dataset_id(dataset, "counting packages")?;
        let value = self.call(ApiRequest::get(format!(
            "/datasets/{}/packageTypeCounts",
            segment(&id)
        )))?;
        Ok(value
            .as_object()
            .map(|counts| counts.values().filter_map(Value::as_i64).sum())
            .unwrap_or(0))
    }

    pub fn packages_by_filename(
        &mut self,
        dataset: NodeKey,
        filename: &str,
    ) -> Result<Vec<NodeKey>, PennsieveError> {
        let id = self.dataset_id(dataset, "searching packages")?;
        let value = self.call(
            ApiRequest::get(format!("/datasets/{}/packages", segment(&id)))
                .query("filename", filename),
        )?;
        let packages = match value.get("packages") {
            Some(packages) => as_list(packages)?,
            None => as_list(&value)?,
        };
        packages.iter().map(|entry| self.absorb(entry)).collect()
    }

    pub fn items_by_name(
        &mut self,
        container: NodeKey,
        name: &str,
    ) -> Result<Vec<NodeKey>, PennsieveError> {
        let mut found = Vec::new();
        for key in self.items(container)? {
            if self.node(key)?.name == name {
                found.push(key);
            }
        }
        Ok(found)
    }

    pub fn tree(&mut self, container: NodeKey) -> Result<String, PennsieveError> {
        let mut out = String::new();
        self.render_tree(container, 0, &mut out)?;
        Ok(out)
    }

    fn render_tree(
        &mut self,
        key: NodeKey,
        depth: usize,
        out: &mut String,
    ) -> Result<(), PennsieveError> {
        let node = self.node(key)?;
        out.push_str(&"  ".repeat(depth));
        out.push_str(&format!("{} ({})\n", node.name, node.kind.label()));
        if node.is_container() {
            for child in self.items(key)? {
                self.render_tree(child, depth + 1, out)?;
            }
        }
        Ok(())
    }

    fn package_id(&self, key: NodeKey, action: &str) -> Result<String, PennsieveError> {
        let node = self.node(key)?;
        if node.is_container() {
            return Err(PennsieveError::Validation(format!(
                "'{}' is not a package",
                node.name
            )));
        }
        Ok(node.require_id(action)?.to_string())
    }

    pub(crate) fn dataset_id(&self, key: NodeKey, action: &str) -> Result<String, PennsieveError> {
        let node = self.node(key)?;
        if !node.is_dataset() {
            return Err(PennsieveError::Validation(format!(
                "'{}' is not a dataset",
                node.name
            )));
        }
        Ok(node.require_id(action)?.to_string())
    }

    pub(crate) fn owning_dataset_id(
        &self,
        key: NodeKey,
        action: &str,
    ) -> Result<String, PennsieveError> {
        let node = self.node(key)?;
        if node.is_dataset() {
            return Ok(node.require_id(action)?.to_string());
        }
        node.require_id(action)?;
        node.dataset.clone().ok_or_else(|| {
            PennsieveError::Validation(format!("'{}' does not belong to a dataset", node.name))
        })
    }

    fn is_within(&self, key: NodeKey, ancestor: NodeKey) -> bool {
        let mut current = Some(key);
        let mut steps = 0;
        while let Some(at) = current {
            if at == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.cache.len() {
                return false;
            }
            current = self
                .cache
                .get(at)
                .and_then(|node| node.parent.as_deref())
                .and_then(|id| self.cache.lookup(id));
        }
        false
    }
}

fn node_path(id: &str) -> String {
    if id.starts_with(DATASET_PREFIX) {
        format!("/datasets/{}", segment(id))
    } else {
        format!("/packages/{}", segment(id))
    }
}

fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|ch| !matches!(ch, ' ' | '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}
