//! Bundled components as coarse start/stop services.
//!
//! Every component (database, cache, backend, frontend, AI server) is a
//! black box behind [`Service`]. On Windows each one gets its own console
//! window, the way operators are used to seeing them; elsewhere they run as
//! background children logging to `<root>/logs/<name>.log`.

pub mod mysql;
pub mod probe;

pub use mysql::{DatabaseEngine, MysqlServer};
pub use probe::HttpProbe;

use crate::config::{Bundle, RuntimeEnv, paths::exe};
use crate::sys;
use crate::{Error, Result};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

/// Grace period between SIGTERM and kill when stopping a child
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Poll interval for process-based readiness
const PROCESS_POLL: Duration = Duration::from_millis(500);

pub trait Service {
    fn name(&self) -> &str;
    fn is_running(&self) -> bool;
    fn start(&mut self) -> Result<ServiceHandle>;
    fn stop(&mut self, handle: ServiceHandle) -> Result<()>;
    /// Block until the service answers or `timeout` passes.
    fn wait_ready(&self, timeout: Duration) -> bool;
}

/// What `start` left behind.
#[derive(Debug)]
pub enum ServiceHandle {
    /// Background child owned by this process
    Child { name: String, child: Child },
    /// Running in its own console window; only reachable by image name
    Detached { name: String, image: Option<String> },
    /// Nothing was started because an instance was already up
    AlreadyRunning { name: String },
}

impl ServiceHandle {
    pub fn name(&self) -> &str {
        match self {
            ServiceHandle::Child { name, .. }
            | ServiceHandle::Detached { name, .. }
            | ServiceHandle::AlreadyRunning { name } => name,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        match self {
            ServiceHandle::Child { child, .. } => Some(child.id()),
            _ => None,
        }
    }
}

/// A command run to completion before the service itself starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupStep {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// How to tell that a started service is usable.
#[derive(Debug, Clone)]
pub enum Readiness {
    /// The process image shows up in the process list
    Process,
    Http(HttpProbe),
    /// No check; ready as soon as it is launched
    Immediate,
}

/// Everything needed to launch one component.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub name: String,
    /// Console window title
    pub title: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Process image name (`mysqld.exe`) used for running checks and stop
    pub image: Option<String>,
    pub setup: Option<SetupStep>,
    pub readiness: Readiness,
}

impl ServiceSpec {
    fn command_line(&self) -> String {
        let mut line = self.program.to_string_lossy().into_owned();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// The components shipped in the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceKind {
    Mysql,
    Redis,
    Frontend,
    Backend,
    AiServer,
}

impl ServiceKind {
    /// Start order for "start all".
    pub const ALL: [ServiceKind; 5] = [
        ServiceKind::Mysql,
        ServiceKind::Redis,
        ServiceKind::Frontend,
        ServiceKind::Backend,
        ServiceKind::AiServer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Mysql => "mysql",
            ServiceKind::Redis => "redis",
            ServiceKind::Frontend => "frontend",
            ServiceKind::Backend => "backend",
            ServiceKind::AiServer => "ai-server",
        }
    }

    pub fn spec(&self, bundle: &Bundle) -> ServiceSpec {
        let paths = &bundle.paths;
        match self {
            ServiceKind::Mysql => {
                let mut args = Vec::new();
                if paths.my_ini().exists() {
                    args.push(format!("--defaults-file={}", paths.my_ini().display()));
                }
                args.push("--console".to_string());
                ServiceSpec {
                    name: self.as_str().to_string(),
                    title: "MySQL服务器".to_string(),
                    program: paths.mysqld(),
                    args,
                    cwd: paths.mysql_dir.clone(),
                    image: Some(exe("mysqld")),
                    setup: None,
                    readiness: Readiness::Process,
                }
            }
            ServiceKind::Redis => ServiceSpec {
                name: self.as_str().to_string(),
                title: "Redis服务器".to_string(),
                program: paths.redis_dir.join(exe("redis-server")),
                args: Vec::new(),
                cwd: paths.data_dir.clone(),
                image: Some(exe("redis-server")),
                setup: None,
                readiness: Readiness::Process,
            },
            ServiceKind::Frontend => ServiceSpec {
                name: self.as_str().to_string(),
                title: "前端服务器".to_string(),
                program: PathBuf::from("npm"),
                args: vec!["run".to_string(), "serve".to_string()],
                cwd: paths.frontend_dir.clone(),
                image: None,
                setup: Some(SetupStep {
                    program: PathBuf::from("npm"),
                    args: vec!["install".to_string()],
                }),
                readiness: Readiness::Immediate,
            },
            ServiceKind::Backend => ServiceSpec {
                name: self.as_str().to_string(),
                title: "后端API服务器".to_string(),
                program: PathBuf::from("mvn"),
                args: vec!["spring-boot:run".to_string()],
                cwd: paths.backend_dir.clone(),
                image: None,
                setup: None,
                readiness: Readiness::Http(HttpProbe::new(&bundle.settings.backend.probe_url)),
            },
            ServiceKind::AiServer => ServiceSpec {
                name: self.as_str().to_string(),
                title: "小智AI服务器".to_string(),
                program: paths.python(),
                args: vec!["app.py".to_string()],
                cwd: paths.server_dir.clone(),
                image: None,
                setup: None,
                readiness: Readiness::Immediate,
            },
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A [`ServiceSpec`] launched with the bundle's runtime environment.
#[derive(Debug, Clone)]
pub struct ProcessService {
    spec: ServiceSpec,
    env: RuntimeEnv,
    logs_dir: PathBuf,
    /// Force a background child even on Windows
    background: bool,
}

impl ProcessService {
    pub fn new(spec: ServiceSpec, env: RuntimeEnv, logs_dir: &Path) -> Self {
        Self {
            spec,
            env,
            logs_dir: logs_dir.to_path_buf(),
            background: !cfg!(windows),
        }
    }

    pub fn for_kind(kind: ServiceKind, bundle: &Bundle) -> Self {
        Self::new(kind.spec(bundle), bundle.runtime_env(), &bundle.paths.logs_dir)
    }

    /// Run as a background child with output in the log dir.
    pub fn background(mut self) -> Self {
        self.background = true;
        self
    }

    fn run_setup(&self, step: &SetupStep) -> Result<()> {
        tracing::info!(service = %self.spec.name, "running {}", step.program.display());
        let mut cmd = shell_command(&step.program, &step.args);
        cmd.current_dir(&self.spec.cwd);
        self.env.apply(&mut cmd);
        let status = cmd.status().map_err(|e| spawn_error(&step.program, e))?;
        if !status.success() {
            return Err(Error::Process(format!(
                "{} setup step exited with {}",
                self.spec.name, status
            )));
        }
        Ok(())
    }

    fn spawn_background(&self) -> Result<ServiceHandle> {
        fs::create_dir_all(&self.logs_dir)?;
        let log_path = self.logs_dir.join(format!("{}.log", self.spec.name));
        let log = OpenOptions::new().create(true).append(true).open(&log_path)?;

        let mut cmd = shell_command(&self.spec.program, &self.spec.args);
        cmd.current_dir(&self.spec.cwd)
            .stdin(Stdio::null())
            .stdout(log.try_clone()?)
            .stderr(log);
        self.env.apply(&mut cmd);

        let child = cmd
            .spawn()
            .map_err(|e| spawn_error(&self.spec.program, e))?;
        tracing::info!(
            service = %self.spec.name,
            pid = child.id(),
            "started, logging to {}",
            log_path.display()
        );
        Ok(ServiceHandle::Child {
            name: self.spec.name.clone(),
            child,
        })
    }

    #[cfg(windows)]
    fn spawn_console(&self) -> Result<ServiceHandle> {
        use std::os::windows::process::CommandExt;

        // `start` takes the first quoted argument as the window title, so
        // the line has to reach cmd.exe without Rust's own quoting.
        let mut cmd = Command::new("cmd");
        cmd.raw_arg(format!(
            "/c start \"{}\" /D \"{}\" cmd /k \"{}\"",
            self.spec.title,
            self.spec.cwd.display(),
            self.spec.command_line()
        ));
        self.env.apply(&mut cmd);
        let status = cmd
            .status()
            .map_err(|e| spawn_error(Path::new("cmd"), e))?;
        if !status.success() {
            return Err(Error::Process(format!(
                "could not open a console for {}",
                self.spec.name
            )));
        }
        tracing::info!(service = %self.spec.name, "started in window \"{}\"", self.spec.title);
        Ok(ServiceHandle::Detached {
            name: self.spec.name.clone(),
            image: self.spec.image.clone(),
        })
    }

    #[cfg(not(windows))]
    fn spawn_console(&self) -> Result<ServiceHandle> {
        self.spawn_background()
    }
}

impl Service for ProcessService {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn is_running(&self) -> bool {
        self.spec
            .image
            .as_deref()
            .is_some_and(sys::is_process_running)
    }

    fn start(&mut self) -> Result<ServiceHandle> {
        if self.is_running() {
            tracing::info!(service = %self.spec.name, "already running");
            return Ok(ServiceHandle::AlreadyRunning {
                name: self.spec.name.clone(),
            });
        }
        if !self.spec.cwd.is_dir() {
            return Err(Error::NotFound(self.spec.cwd.clone()));
        }
        tracing::debug!(service = %self.spec.name, "{}", self.spec.command_line());
        if let Some(step) = &self.spec.setup {
            self.run_setup(step)?;
        }
        if self.background {
            self.spawn_background()
        } else {
            self.spawn_console()
        }
    }

    fn stop(&mut self, handle: ServiceHandle) -> Result<()> {
        match handle {
            ServiceHandle::Child { mut child, .. } => {
                sys::terminate_child(&mut child, STOP_GRACE);
                Ok(())
            }
            ServiceHandle::Detached {
                image: Some(image), ..
            } => {
                sys::kill_by_name(&image)?;
                Ok(())
            }
            ServiceHandle::Detached { name, image: None } => {
                tracing::warn!(service = %name, "runs in its own window; close it there");
                Ok(())
            }
            // Not ours to stop
            ServiceHandle::AlreadyRunning { .. } => Ok(()),
        }
    }

    fn wait_ready(&self, timeout: Duration) -> bool {
        match &self.spec.readiness {
            Readiness::Immediate => true,
            Readiness::Process => sys::poll_until(timeout, PROCESS_POLL, || self.is_running()),
            Readiness::Http(probe) => probe.wait(timeout),
        }
    }
}

/// `npm` and `mvn` are batch scripts on Windows and need cmd.exe to run.
#[cfg(windows)]
fn shell_command(program: &Path, args: &[String]) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(program).args(args);
    cmd
}

#[cfg(not(windows))]
fn shell_command(program: &Path, args: &[String]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd
}

fn spawn_error(program: &Path, e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::NotFound(program.to_path_buf())
    } else {
        Error::Process(format!("failed to start {}: {}", program.display(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BundlePaths, LauncherSettings};
    use tempfile::TempDir;

    fn bundle(root: &Path) -> Bundle {
        Bundle::from_parts(BundlePaths::new(root), LauncherSettings::default())
    }

    fn spec(dir: &Path, program: &str, args: &[&str]) -> ServiceSpec {
        ServiceSpec {
            name: "test".to_string(),
            title: "test".to_string(),
            program: PathBuf::from(program),
            args: args.iter().map(|s| s.to_string()).collect(),
            cwd: dir.to_path_buf(),
            image: None,
            setup: None,
            readiness: Readiness::Immediate,
        }
    }

    #[test]
    fn test_specs_follow_bundle_layout() {
        let b = bundle(Path::new("/bundle"));
        let redis = ServiceKind::Redis.spec(&b);
        assert_eq!(redis.cwd, Path::new("/bundle/data"));
        assert_eq!(redis.image.as_deref(), Some(exe("redis-server").as_str()));

        let ai = ServiceKind::AiServer.spec(&b);
        assert_eq!(ai.cwd, Path::new("/bundle/src/main/xiaozhi-server"));
        assert_eq!(ai.args, vec!["app.py"]);

        let frontend = ServiceKind::Frontend.spec(&b);
        assert_eq!(frontend.setup.unwrap().args, vec!["install"]);
        assert!(matches!(
            ServiceKind::Backend.spec(&b).readiness,
            Readiness::Http(_)
        ));
    }

    #[test]
    fn test_missing_working_dir_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let mut service = ProcessService::new(
            spec(&tmp.path().join("absent"), "true", &[]),
            RuntimeEnv::from_paths(&BundlePaths::new(tmp.path())),
            &tmp.path().join("logs"),
        )
        .background();
        assert!(matches!(service.start(), Err(Error::NotFound(_))));
    }

    #[test]
    #[cfg(unix)]
    fn test_background_child_logs_and_stops() {
        let tmp = TempDir::new().unwrap();
        let logs = tmp.path().join("logs");
        let mut service = ProcessService::new(
            spec(tmp.path(), "sh", &["-c", "echo hello; sleep 30"]),
            RuntimeEnv::from_paths(&BundlePaths::new(tmp.path())),
            &logs,
        )
        .background();

        let handle = service.start().unwrap();
        assert!(handle.pid().is_some());
        assert!(service.wait_ready(Duration::from_secs(1)));
        assert!(sys::poll_until(
            Duration::from_secs(5),
            Duration::from_millis(50),
            || fs::read_to_string(logs.join("test.log")).is_ok_and(|s| s.contains("hello"))
        ));
        service.stop(handle).unwrap();
    }

    #[test]
    #[cfg(unix)]
    fn test_failing_setup_step_prevents_start() {
        let tmp = TempDir::new().unwrap();
        let mut s = spec(tmp.path(), "sleep", &["30"]);
        s.setup = Some(SetupStep {
            program: PathBuf::from("false"),
            args: Vec::new(),
        });
        let mut service = ProcessService::new(
            s,
            RuntimeEnv::from_paths(&BundlePaths::new(tmp.path())),
            &tmp.path().join("logs"),
        )
        .background();
        assert!(matches!(service.start(), Err(Error::Process(_))));
        assert!(!tmp.path().join("logs").join("test.log").exists());
    }

    #[test]
    #[cfg(unix)]
    fn test_missing_program_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let mut service = ProcessService::new(
            spec(tmp.path(), "/definitely/not/here/prog", &[]),
            RuntimeEnv::from_paths(&BundlePaths::new(tmp.path())),
            &tmp.path().join("logs"),
        )
        .background();
        assert!(matches!(service.start(), Err(Error::NotFound(_))));
    }
}
