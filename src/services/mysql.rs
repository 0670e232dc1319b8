//! The bundled MySQL server.
//!
//! [`MysqlServer`] is both a launcher [`Service`] and the
//! [`DatabaseEngine`] the database bootstrap drives. SQL goes through the
//! bundled `mysql` command-line client, so no driver is linked in.

use super::{Service, ServiceHandle};
use crate::config::{Bundle, RuntimeEnv, paths::exe};
use crate::sys;
use crate::{Error, Result};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

const STOP_GRACE: Duration = Duration::from_secs(10);

/// Operations the database bootstrap needs beyond start/stop.
pub trait DatabaseEngine: Service {
    fn data_dir(&self) -> &Path;

    /// Write the server option file. Returns its path.
    fn write_config(&self) -> Result<PathBuf>;

    /// Create the system tables with a password-less root account.
    fn initialize(&mut self, timeout: Duration) -> Result<()>;

    /// Run `sql` as root and return the tab-separated result rows.
    fn execute(&self, password: Option<&str>, sql: &str) -> Result<String>;

    /// Stop every server instance, ours or not. Returns whether any ran.
    fn kill_running(&mut self) -> Result<bool>;
}

/// Option file contents for the bundled server.
///
/// Paths use forward slashes because the option file format treats
/// backslashes as escapes.
pub fn render_my_ini(data_dir: &Path, port: u16) -> String {
    let datadir = data_dir.to_string_lossy().replace('\\', "/");
    format!(
        "[mysqld]
datadir={datadir}
port={port}
character-set-server=utf8mb4
collation-server=utf8mb4_unicode_ci
max_connections=151
default-storage-engine=INNODB
innodb_buffer_pool_size=128M
innodb_redo_log_capacity=512M
innodb_file_per_table=1

[mysql]
default-character-set=utf8mb4

[client]
default-character-set=utf8mb4
port={port}
"
    )
}

/// Quote `value` as a single-quoted SQL string literal.
pub fn sql_quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

#[derive(Debug, Clone)]
pub struct MysqlServer {
    mysqld: PathBuf,
    client: PathBuf,
    admin: PathBuf,
    my_ini: PathBuf,
    data_dir: PathBuf,
    logs_dir: PathBuf,
    port: u16,
    retry_interval: Duration,
    env: RuntimeEnv,
}

impl MysqlServer {
    pub fn new(bundle: &Bundle) -> Self {
        let paths = &bundle.paths;
        Self {
            mysqld: paths.mysqld(),
            client: paths.mysql_client(),
            admin: paths.mysqladmin(),
            my_ini: paths.my_ini(),
            data_dir: paths.mysql_data_dir.clone(),
            logs_dir: paths.logs_dir.clone(),
            port: bundle.settings.mysql.port,
            retry_interval: bundle.settings.mysql.retry_interval,
            env: bundle.runtime_env(),
        }
    }

    fn command(&self, program: &Path) -> Command {
        let mut cmd = Command::new(program);
        self.env.apply(&mut cmd);
        cmd
    }

    /// `--defaults-file` must come first on the mysqld command line.
    fn server_command(&self) -> Command {
        let mut cmd = self.command(&self.mysqld);
        if self.my_ini.exists() {
            cmd.arg(format!("--defaults-file={}", self.my_ini.display()));
        }
        cmd
    }

    fn require(path: &Path) -> Result<()> {
        if path.exists() {
            Ok(())
        } else {
            Err(Error::NotFound(path.to_path_buf()))
        }
    }

    fn init_log(&self) -> PathBuf {
        self.logs_dir.join("mysql_init.log")
    }
}

impl Service for MysqlServer {
    fn name(&self) -> &str {
        "mysql"
    }

    fn is_running(&self) -> bool {
        sys::is_process_running(&exe("mysqld"))
    }

    fn start(&mut self) -> Result<ServiceHandle> {
        if self.is_running() {
            return Ok(ServiceHandle::AlreadyRunning {
                name: "mysql".to_string(),
            });
        }
        Self::require(&self.mysqld)?;
        fs::create_dir_all(&self.logs_dir)?;
        let log_path = self.logs_dir.join("mysqld.log");
        let log = OpenOptions::new().create(true).append(true).open(&log_path)?;

        let child = self
            .server_command()
            .arg(format!("--datadir={}", self.data_dir.display()))
            .arg("--console")
            .stdin(Stdio::null())
            .stdout(log.try_clone()?)
            .stderr(log)
            .spawn()
            .map_err(|e| Error::Process(format!("failed to start mysqld: {}", e)))?;
        tracing::info!(pid = child.id(), "mysqld started, logging to {}", log_path.display());
        Ok(ServiceHandle::Child {
            name: "mysql".to_string(),
            child,
        })
    }

    fn stop(&mut self, handle: ServiceHandle) -> Result<()> {
        match handle {
            ServiceHandle::Child { mut child, .. } => {
                sys::terminate_child(&mut child, STOP_GRACE);
                tracing::info!("mysqld stopped");
            }
            ServiceHandle::Detached { .. } => {
                sys::kill_by_name(&exe("mysqld"))?;
            }
            ServiceHandle::AlreadyRunning { .. } => {}
        }
        Ok(())
    }

    /// `mysqladmin ping` exits 0 once the server accepts connections, even
    /// when the credentials are wrong.
    fn wait_ready(&self, timeout: Duration) -> bool {
        sys::poll_until(timeout, self.retry_interval, || {
            self.command(&self.admin)
                .args(["--protocol=TCP", "-h", "127.0.0.1", "-P"])
                .arg(self.port.to_string())
                .args(["-u", "root", "ping"])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .is_ok_and(|s| s.success())
        })
    }
}

impl DatabaseEngine for MysqlServer {
    fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn write_config(&self) -> Result<PathBuf> {
        if let Some(parent) = self.my_ini.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.my_ini, render_my_ini(&self.data_dir, self.port))?;
        tracing::info!("wrote {}", self.my_ini.display());
        Ok(self.my_ini.clone())
    }

    fn initialize(&mut self, timeout: Duration) -> Result<()> {
        Self::require(&self.mysqld)?;
        fs::create_dir_all(&self.logs_dir)?;
        let log_path = self.init_log();
        let log = fs::File::create(&log_path)?;

        tracing::info!("initializing {} (this can take a few minutes)", self.data_dir.display());
        let mut child = self
            .server_command()
            .arg("--initialize-insecure")
            .arg(format!("--datadir={}", self.data_dir.display()))
            .arg("--console")
            .stdin(Stdio::null())
            .stdout(log.try_clone()?)
            .stderr(log)
            .spawn()
            .map_err(|e| Error::Process(format!("failed to run mysqld: {}", e)))?;

        let status = match child.wait_timeout(timeout)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Timeout {
                    what: "mysqld --initialize-insecure".to_string(),
                    waited: timeout,
                });
            }
        };

        if !status.success() {
            let errors = fs::read_to_string(&log_path)
                .map(|log| error_lines(&log, 5))
                .unwrap_or_default();
            return Err(Error::Process(format!(
                "mysqld initialization exited with {}{}",
                status,
                if errors.is_empty() {
                    String::new()
                } else {
                    format!(":\n{}", errors)
                }
            )));
        }
        tracing::info!("data directory initialized");
        Ok(())
    }

    fn execute(&self, password: Option<&str>, sql: &str) -> Result<String> {
        Self::require(&self.client)?;
        let mut cmd = self.command(&self.client);
        cmd.args(["--protocol=TCP", "-h", "127.0.0.1", "-P"])
            .arg(self.port.to_string())
            .args(["-u", "root", "--batch", "--skip-column-names"]);
        if let Some(password) = password {
            cmd.arg(format!("--password={}", password));
        }
        let output = cmd
            .arg("-e")
            .arg(sql)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::Process(format!("failed to run mysql client: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Process(format!("mysql: {}", stderr.trim())));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn kill_running(&mut self) -> Result<bool> {
        let killed = sys::kill_by_name(&exe("mysqld"))?;
        if killed {
            tracing::info!("stopped running mysqld");
            sys::poll_until(STOP_GRACE, Duration::from_millis(250), || !self.is_running());
        }
        Ok(killed)
    }
}

/// The last `limit` lines mentioning ERROR.
fn error_lines(log: &str, limit: usize) -> String {
    let errors: Vec<&str> = log
        .lines()
        .filter(|line| line.contains("ERROR"))
        .map(str::trim)
        .collect();
    errors[errors.len().saturating_sub(limit)..].join("\n")
}
