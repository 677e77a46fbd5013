#![allow(dead_code)]

use std::sync::Mutex;

use camino::Utf8Path;
use serde_json::{Value, json};

use pennsieve_client::Pennsieve;
use pennsieve_client::config::Settings;
use pennsieve_client::error::PennsieveError;
use pennsieve_client::transport::{ApiRequest, Method, Transport, handle_status};

pub const USER_ID: &str = "N:user:1";
pub const ORGANIZATION_ID: &str = "N:organization:1";
pub const DATASET_ID: &str = "N:dataset:1";

#[derive(Debug)]
struct Route {
    method: Method,
    path: String,
    status: u16,
    body: Value,
    once: bool,
}

// Scripted transport that records every request. Later routes win over
// earlier ones for the same method and path.
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        let transport = Self::default();
        transport.on(
            Method::Post,
            "/account/api/session",
            json!({"session_token": "session-1", "organization": ORGANIZATION_ID}),
        );
        transport.on(
            Method::Get,
            "/user/",
            json!({"id": USER_ID, "email": "ada@example.org", "preferredOrganization": ORGANIZATION_ID}),
        );
        transport
    }

    pub fn on(&self, method: Method, path: &str, body: Value) {
        self.push(method, path, 200, body, false);
    }

    pub fn once(&self, method: Method, path: &str, body: Value) {
        self.push(method, path, 200, body, true);
    }

    pub fn fail_once(&self, method: Method, path: &str, status: u16) {
        self.push(method, path, status, json!({"message": "scripted failure"}), true);
    }

    pub fn fail(&self, method: Method, path: &str, status: u16) {
        self.push(method, path, status, json!({"message": "scripted failure"}), false);
    }

    fn push(&self, method: Method, path: &str, status: u16, body: Value, once: bool) {
        self.routes.lock().unwrap().push(Route {
            method,
            path: path.to_string(),
            status,
            body,
            once,
        });
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.method == method && request.path == path)
            .count()
    }

    pub fn api_requests(&self) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.path != "/account/api/session" && request.path != "/user/")
            .collect()
    }

    pub fn last(&self, method: Method, path: &str) -> Option<ApiRequest> {
        self.requests()
            .into_iter()
            .rev()
            .find(|request| request.method == method && request.path == path)
    }

    pub fn clear_requests(&self) {
        self.requests.lock().unwrap().clear();
    }
}

impl Transport for MockTransport {
    fn send(&self, request: &ApiRequest) -> Result<Value, PennsieveError> {
        self.requests.lock().unwrap().push(request.clone());
        let mut routes = self.routes.lock().unwrap();
        let position = routes
            .iter()
            .rposition(|route| route.method == request.method && route.path == request.path)
            .ok_or_else(|| {
                PennsieveError::NotFound(format!(
                    "no route for {} {}",
                    request.method.as_str(),
                    request.path
                ))
            })?;
        let (status, body) = {
            let route = &routes[position];
            (route.status, route.body.clone())
        };
        if routes[position].once {
            routes.remove(position);
        }
        handle_status(status, body.to_string())
    }
}

pub fn settings() -> Settings {
    let mut settings = Settings::defaults(Utf8Path::new("/tmp/pennsieve-tests"));
    settings.api_token = Some("token".to_string());
    settings.api_secret = Some("secret".to_string());
    settings
}

pub fn client() -> Pennsieve<MockTransport> {
    client_with(MockTransport::new())
}

pub fn client_with(transport: MockTransport) -> Pennsieve<MockTransport> {
    Pennsieve::with_transport(transport, settings()).unwrap()
}

pub fn transport(client: &Pennsieve<MockTransport>) -> &MockTransport {
    client.session().transport()
}

pub fn dataset_json(id: &str, name: &str) -> Value {
    json!({"content": {"id": id, "name": name, "description": "test data", "tags": []}})
}

pub fn dataset_with_children(id: &str, name: &str, children: Vec<Value>) -> Value {
    let mut value = dataset_json(id, name);
    value["children"] = Value::Array(children);
    value
}

pub fn package_json(id: &str, name: &str, package_type: &str, parent: Option<&str>) -> Value {
    let mut value = json!({
        "content": {
            "nodeId": id,
            "name": name,
            "packageType": package_type,
            "datasetNodeId": DATASET_ID,
            "state": "READY",
        },
        "properties": [],
    });
    if let Some(parent) = parent {
        value["parent"] = json!(parent);
    }
    value
}
