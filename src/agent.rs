use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, error, info};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use crate::cache::NodeKey;
use crate::client::Pennsieve;
use crate::config::{EnvSource, Settings};
use crate::error::PennsieveError;
use crate::node::{DataNode, NodeKind};
use crate::output::{ProgressEvent, ProgressSink};
use crate::transport::Transport;

pub const MINIMUM_AGENT_VERSION: &str = "0.3.4";
pub const DEFAULT_LISTEN_PORT: u16 = 11235;
pub const LOG_LEVEL_VAR: &str = "PENNSIEVE_LOG_LEVEL";
const INSTALL_HELP: &str =
    "Agent not installed. Visit https://developer.pennsieve.io/agent for installation directions.";
const WINDOWS_PATH_PREFIX: &str = r"\\?\";

pub fn agent_command() -> Result<Utf8PathBuf, PennsieveError> {
    let path = if cfg!(target_os = "macos") {
        "/usr/local/opt/pennsieve/bin/pennsieve"
    } else if cfg!(target_os = "linux") {
        "/opt/pennsieve/bin/pennsieve"
    } else if cfg!(windows) {
        "C:/Program Files/Pennsieve/pennsieve.exe"
    } else {
        return Err(PennsieveError::Agent(format!(
            "platform {} is not supported",
            std::env::consts::OS
        )));
    };
    Ok(Utf8PathBuf::from(path))
}

pub fn log_level(env: &dyn EnvSource) -> String {
    env.var(LOG_LEVEL_VAR)
        .map(|level| level.to_ascii_uppercase())
        .unwrap_or_else(|| "INFO".to_string())
}

pub fn agent_env(settings: &Settings, log_level: &str) -> Vec<(String, String)> {
    let mut env = vec![
        ("PENNSIEVE_API_ENVIRONMENT".to_string(), "local".to_string()),
        ("PENNSIEVE_API_LOC".to_string(), settings.api_host.clone()),
        (
            "PENNSIEVE_API_TOKEN".to_string(),
            settings.api_token.clone().unwrap_or_default(),
        ),
        (
            "PENNSIEVE_API_SECRET".to_string(),
            settings.api_secret.clone().unwrap_or_default(),
        ),
        (LOG_LEVEL_VAR.to_string(), log_level.to_string()),
    ];
    if cfg!(windows)
        && let Ok(root) = std::env::var("SYSTEMROOT")
    {
        env.push(("SYSTEMROOT".to_string(), root));
    }
    env
}

pub fn parse_agent_version(raw: &str) -> Result<Version, PennsieveError> {
    let found = Version::parse(raw.trim())
        .map_err(|_| PennsieveError::Agent(format!("invalid version string '{}'", raw.trim())))?;
    let required = Version::parse(MINIMUM_AGENT_VERSION)
        .map_err(|err| PennsieveError::Agent(err.to_string()))?;
    if found < required {
        return Err(PennsieveError::AgentVersion {
            found: found.to_string(),
            required: required.to_string(),
        });
    }
    Ok(found)
}

pub fn validate_installation(settings: &Settings) -> Result<Version, PennsieveError> {
    let program = agent_command()?;
    let output = Command::new(program.as_std_path())
        .arg("version")
        .env_clear()
        .envs(agent_env(settings, "ERROR"))
        .output()
        .map_err(|_| PennsieveError::Agent(INSTALL_HELP.to_string()))?;
    if !output.status.success() {
        return Err(PennsieveError::Agent(INSTALL_HELP.to_string()));
    }
    let version = parse_agent_version(&String::from_utf8_lossy(&output.stdout))?;
    info!(%version, "agent found");
    Ok(version)
}

pub fn socket_address(port: u16) -> String {
    if cfg!(windows) {
        format!("ws://127.0.0.1:{port}")
    } else {
        format!("ws://0.0.0.0:{port}")
    }
}

fn socket_host() -> &'static str {
    if cfg!(windows) { "127.0.0.1" } else { "0.0.0.0" }
}

pub fn check_port(port: u16) -> Result<(), PennsieveError> {
    debug!(port, "checking agent port");
    let addrs = (socket_host(), port)
        .to_socket_addrs()
        .map_err(|err| PennsieveError::Agent(err.to_string()))?;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, Duration::from_secs(1)) {
            Ok(_) => {
                return Err(PennsieveError::Agent(
                    "the agent is already running, stop any running processes and try again"
                        .to_string(),
                ));
            }
            Err(err) if err.kind() == io::ErrorKind::ConnectionRefused => {}
            Err(err) => return Err(PennsieveError::Agent(err.to_string())),
        }
    }
    debug!(port, "no agent found");
    Ok(())
}

pub struct AgentListener {
    child: Child,
}

impl AgentListener {
    pub fn start(settings: &Settings, port: u16, log_level: &str) -> Result<Self, PennsieveError> {
        check_port(port)?;
        let program = agent_command()?;
        let verbose = log_level.eq_ignore_ascii_case("DEBUG");
        let output = || {
            if verbose {
                Stdio::inherit()
            } else {
                Stdio::null()
            }
        };
        let child = Command::new(program.as_std_path())
            .args(["upload-status", "--listen", "--port", &port.to_string()])
            .env_clear()
            .envs(agent_env(settings, log_level))
            .stdout(output())
            .stderr(output())
            .spawn()
            .map_err(|err| PennsieveError::Agent(format!("{INSTALL_HELP} ({err})")))?;
        info!(port, "agent listening");
        Ok(Self { child })
    }
}

impl Drop for AgentListener {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub trait AgentSocket {
    fn send_text(&mut self, text: String) -> Result<(), PennsieveError>;
    fn next_text(&mut self) -> Result<Option<String>, PennsieveError>;
    fn close(&mut self);
}

pub struct WsAgentSocket {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
}

impl AgentSocket for WsAgentSocket {
    fn send_text(&mut self, text: String) -> Result<(), PennsieveError> {
        self.socket
            .send(Message::Text(text))
            .map_err(|err| PennsieveError::Agent(err.to_string()))
    }

    fn next_text(&mut self) -> Result<Option<String>, PennsieveError> {
        loop {
            match self.socket.read() {
                Ok(Message::Text(text)) => return Ok(Some(text.to_string())),
                Ok(Message::Close(_)) => return Ok(None),
                Ok(_) => continue,
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    return Ok(None);
                }
                Err(err) => return Err(PennsieveError::Agent(err.to_string())),
            }
        }
    }

    fn close(&mut self) {
        let _ = self.socket.close(None);
    }
}

/// Waits for the agent socket, backing off 2^i seconds for i in -2..=3.
pub fn connect_with_backoff(port: u16) -> Result<WsAgentSocket, PennsieveError> {
    let address = socket_address(port);
    for exponent in -2..=3 {
        match tungstenite::connect(address.as_str()) {
            Ok((socket, _)) => return Ok(WsAgentSocket { socket }),
            Err(tungstenite::Error::Io(err)) if err.kind() == io::ErrorKind::ConnectionRefused => {
                let delay = Duration::from_secs_f64(2f64.powi(exponent));
                debug!(?delay, "agent connection refused, retrying");
                thread::sleep(delay);
            }
            Err(err) => return Err(PennsieveError::Agent(err.to_string())),
        }
    }
    Err(PennsieveError::Agent("could not connect to the agent".to_string()))
}

#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub files: Vec<Utf8PathBuf>,
    pub append: bool,
    pub recursive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadPlan {
    pub dataset: String,
    pub package: Option<String>,
    pub files: Vec<Utf8PathBuf>,
    pub append: bool,
    pub recursive: bool,
    #[serde(skip)]
    pub expected: Vec<Utf8PathBuf>,
}

impl UploadPlan {
    pub fn message(&self) -> Value {
        json!({
            "message": "queue_upload",
            "body": {
                "dataset": self.dataset,
                "package": self.package,
                "files": self.files,
                "append": self.append,
                "recursive": self.recursive,
            },
        })
    }
}

pub fn plan_upload(
    destination: &DataNode,
    dataset_id: &str,
    request: &UploadRequest,
) -> Result<UploadPlan, PennsieveError> {
    if request.files.is_empty() {
        return Err(PennsieveError::Validation("no files to upload".to_string()));
    }
    for file in &request.files {
        if !file.exists() {
            return Err(PennsieveError::Validation(format!("{file} does not exist")));
        }
    }
    let directory_upload = request.files.iter().any(|file| file.is_dir());
    if directory_upload && request.files.len() > 1 {
        return Err(PennsieveError::Validation(
            "can only upload a single directory".to_string(),
        ));
    }
    if request.recursive && !directory_upload {
        return Err(PennsieveError::Validation(
            "recursive uploads are only allowed with directories".to_string(),
        ));
    }
    if request.recursive && request.append {
        return Err(PennsieveError::Validation(
            "recursive uploads cannot append".to_string(),
        ));
    }

    let package = match &destination.kind {
        NodeKind::Dataset(_) => None,
        NodeKind::Collection => Some(destination.require_id("uploading")?.to_string()),
        NodeKind::DataPackage | NodeKind::TimeSeries if request.append => {
            Some(destination.require_id("uploading")?.to_string())
        }
        NodeKind::DataPackage | NodeKind::TimeSeries => {
            return Err(PennsieveError::Validation(format!(
                "can only append to the package '{}'",
                destination.name
            )));
        }
    };
    let dataset = match &destination.kind {
        NodeKind::Dataset(_) => destination.require_id("uploading")?.to_string(),
        _ => dataset_id.to_string(),
    };

    let expected = if directory_upload {
        list_files(&request.files[0], request.recursive)?
    } else {
        request.files.clone()
    };
    let expected = expected
        .iter()
        .map(|path| absolute(path))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(UploadPlan {
        dataset,
        package,
        files: request.files.clone(),
        append: request.append,
        recursive: request.recursive,
        expected,
    })
}

fn list_files(directory: &Utf8Path, recursive: bool) -> Result<Vec<Utf8PathBuf>, PennsieveError> {
    let mut files = Vec::new();
    let entries = directory
        .read_dir_utf8()
        .map_err(|err| PennsieveError::Filesystem(format!("{directory}: {err}")))?;
    for entry in entries {
        let entry = entry.map_err(|err| PennsieveError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if path.is_file() {
            files.push(path.to_path_buf());
        } else if recursive && path.is_dir() {
            files.extend(list_files(path, true)?);
        }
    }
    files.sort();
    Ok(files)
}

fn absolute(path: &Utf8Path) -> Result<Utf8PathBuf, PennsieveError> {
    let full = std::path::absolute(path.as_std_path())
        .map_err(|err| PennsieveError::Filesystem(err.to_string()))?;
    Utf8PathBuf::from_path_buf(full)
        .map_err(|full| PennsieveError::Filesystem(format!("{} is not UTF-8", full.display())))
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "message", rename_all = "snake_case")]
pub enum AgentMessage {
    FileQueuedForUpload {
        path: String,
        import_id: String,
    },
    UploadProgress {
        path: String,
        import_id: String,
        percent_done: f64,
        #[serde(default)]
        done: bool,
    },
    UploadComplete {
        import_id: String,
    },
    UploadError {
        #[serde(default)]
        context: String,
        import_id: String,
    },
    Error {
        #[serde(default)]
        context: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadState {
    Waiting,
    Uploading,
    Done,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileProgress {
    pub path: String,
    pub import_id: Option<String>,
    pub ours: bool,
    percent: f64,
    pub queued: bool,
    pub done: bool,
    pub errored: bool,
}

impl FileProgress {
    fn new(path: &str, import_id: Option<&str>, ours: bool) -> Self {
        Self {
            path: path.to_string(),
            import_id: import_id.map(|id| id.to_string()),
            ours,
            percent: 0.0,
            queued: false,
            done: false,
            errored: false,
        }
    }

    pub fn name(&self) -> &str {
        Utf8Path::new(&self.path).file_name().unwrap_or(self.path.as_str())
    }

    pub fn percent_done(&self) -> f64 {
        if self.done { 100.0 } else { self.percent }
    }

    pub fn set_percent(&mut self, percent: f64) {
        if percent > self.percent {
            self.percent = percent;
        }
    }

    pub fn state(&self) -> UploadState {
        if self.done {
            UploadState::Done
        } else if self.errored {
            UploadState::Errored
        } else if self.queued {
            UploadState::Uploading
        } else {
            UploadState::Waiting
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadManager {
    uploads: Vec<FileProgress>,
}

impl UploadManager {
    pub fn new(files: &[Utf8PathBuf]) -> Self {
        Self {
            uploads: files
                .iter()
                .map(|file| FileProgress::new(file.as_str(), None, true))
                .collect(),
        }
    }

    pub fn files(&self) -> &[FileProgress] {
        &self.uploads
    }

    fn tracked(&mut self, path: &str, import_id: Option<&str>) -> Option<&mut FileProgress> {
        let path = path.strip_prefix(WINDOWS_PATH_PREFIX).unwrap_or(path);
        self.uploads
            .iter_mut()
            .find(|file| file.path == path && file.import_id.as_deref() == import_id)
    }

    pub fn set_queued(&mut self, path: &str, import_id: &str) {
        if let Some(file) = self.tracked(path, None) {
            file.queued = true;
            file.import_id = Some(import_id.to_string());
        }
    }

    pub fn set_progress(&mut self, path: &str, import_id: &str, percent_done: f64) {
        if self.tracked(path, Some(import_id)).is_none() {
            let path = path.strip_prefix(WINDOWS_PATH_PREFIX).unwrap_or(path);
            self.uploads
                .push(FileProgress::new(path, Some(import_id), false));
        }
        if let Some(file) = self.tracked(path, Some(import_id)) {
            file.set_percent(percent_done);
        }
    }

    pub fn set_complete(&mut self, import_id: &str) {
        for file in &mut self.uploads {
            if file.import_id.as_deref() == Some(import_id) {
                file.done = true;
            }
        }
    }

    pub fn set_error(&mut self, import_id: &str) {
        for file in &mut self.uploads {
            if file.import_id.as_deref() == Some(import_id) {
                file.errored = true;
            }
        }
    }

    pub fn is_done(&self) -> bool {
        self.uploads.iter().filter(|file| file.ours).all(|file| file.done)
    }

    pub fn is_settled(&self) -> bool {
        self.uploads
            .iter()
            .filter(|file| file.ours)
            .all(|file| file.done || file.errored)
    }

    fn failed(&self) -> Vec<&str> {
        self.uploads
            .iter()
            .filter(|file| file.ours && file.errored && !file.done)
            .map(|file| file.name())
            .collect()
    }

    pub fn handle(&mut self, message: AgentMessage) -> Result<(), PennsieveError> {
        match message {
            AgentMessage::FileQueuedForUpload { path, import_id } => {
                self.set_queued(&path, &import_id)
            }
            AgentMessage::UploadProgress {
                path,
                import_id,
                percent_done,
                ..
            } => self.set_progress(&path, &import_id, percent_done),
            AgentMessage::UploadComplete { import_id } => self.set_complete(&import_id),
            AgentMessage::UploadError { context, import_id } => {
                error!(%context, "upload failed");
                self.set_error(&import_id);
            }
            AgentMessage::Error { context } => return Err(PennsieveError::Agent(context)),
            AgentMessage::Unknown => debug!("unknown agent message"),
        }
        Ok(())
    }

    pub fn report(&self, sink: &dyn ProgressSink, elapsed: Duration) {
        const WIDTH: usize = 24;
        for file in &self.uploads {
            let filled = ((file.percent_done() / 100.0) * WIDTH as f64) as usize;
            let filled = filled.min(WIDTH);
            let state = format!("{:?}", file.state()).to_ascii_uppercase();
            sink.event(ProgressEvent {
                message: format!(
                    " [ {}{} ] {state:12} {:05.1}% {}",
                    "#".repeat(filled),
                    "-".repeat(WIDTH - filled),
                    file.percent_done(),
                    file.name()
                ),
                elapsed: Some(elapsed),
            });
        }
    }
}

pub fn run_upload(
    socket: &mut dyn AgentSocket,
    plan: &UploadPlan,
    sink: &dyn ProgressSink,
) -> Result<UploadManager, PennsieveError> {
    let started = Instant::now();
    let result = drive_upload(socket, plan, sink, started);
    socket.close();
    result
}

fn drive_upload(
    socket: &mut dyn AgentSocket,
    plan: &UploadPlan,
    sink: &dyn ProgressSink,
    started: Instant,
) -> Result<UploadManager, PennsieveError> {
    socket.send_text(plan.message().to_string())?;
    let mut manager = UploadManager::new(&plan.expected);
    manager.report(sink, started.elapsed());
    while !manager.is_settled() {
        let Some(text) = socket.next_text()? else {
            return Err(PennsieveError::Agent(
                "agent closed the connection before the upload finished".to_string(),
            ));
        };
        let message: AgentMessage = serde_json::from_str(&text)
            .map_err(|err| PennsieveError::Agent(format!("invalid agent message: {err}")))?;
        manager.handle(message)?;
        manager.report(sink, started.elapsed());
    }
    let failed = manager.failed();
    if !failed.is_empty() {
        return Err(PennsieveError::Agent(format!(
            "upload failed for {}",
            failed.join(", ")
        )));
    }
    Ok(manager)
}

impl<T: Transport> Pennsieve<T> {
    pub fn prepare_upload(
        &self,
        destination: NodeKey,
        request: &UploadRequest,
    ) -> Result<UploadPlan, PennsieveError> {
        let dataset_id = self.owning_dataset_id(destination, "uploading")?;
        plan_upload(self.node(destination)?, &dataset_id, request)
    }

    pub fn upload(
        &mut self,
        destination: NodeKey,
        request: &UploadRequest,
        env: &dyn EnvSource,
        sink: &dyn ProgressSink,
    ) -> Result<UploadManager, PennsieveError> {
        let plan = self.prepare_upload(destination, request)?;
        validate_installation(self.settings())?;
        let level = log_level(env);
        let _listener = AgentListener::start(self.settings(), DEFAULT_LISTEN_PORT, &level)?;
        let mut socket = connect_with_backoff(DEFAULT_LISTEN_PORT)?;
        let manager = run_upload(&mut socket, &plan, sink)?;
        // New packages show up on the next listing.
        self.cache_mut().node_mut(destination)?.items = None;
        Ok(manager)
    }
}
