//! Fixed relative layout of the bundle.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

const JDK_DIR: &str = "jdk-21.0.9";
const MAVEN_DIR: &str = "maven-3.9.11";
const MYSQL_DIR: &str = "mysql-9.4.0";
const NODE_DIR: &str = "nodejs-v24.11.0";

/// Append the platform executable suffix (`.exe` on Windows).
pub fn exe(name: &str) -> String {
    format!("{}{}", name, std::env::consts::EXE_SUFFIX)
}

/// Absolute locations of everything the launcher touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlePaths {
    pub root: PathBuf,
    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub runtime_dir: PathBuf,

    /// Python inference server and its config
    pub server_dir: PathBuf,
    pub server_config: PathBuf,
    pub server_config_template: PathBuf,

    /// Java backend and its datasource config
    pub backend_dir: PathBuf,
    pub backend_config: PathBuf,

    pub frontend_dir: PathBuf,

    pub jdk_dir: PathBuf,
    pub maven_dir: PathBuf,
    pub mysql_dir: PathBuf,
    pub mysql_data_dir: PathBuf,
    pub redis_dir: PathBuf,
    pub node_dir: PathBuf,
    pub python_dir: PathBuf,
    pub ffmpeg_dir: PathBuf,
    pub git_dir: PathBuf,

    pub settings_file: PathBuf,
    pub version_file: PathBuf,
    pub release_state_file: PathBuf,
    pub skip_update_file: PathBuf,
    pub password_file: PathBuf,
    pub readme_file: PathBuf,
}

impl BundlePaths {
    pub fn new(root: &Path) -> Self {
        let root = root.to_path_buf();
        let data_dir = root.join("data");
        let runtime_dir = root.join("runtime");
        let server_dir = root.join("src").join("main").join("xiaozhi-server");
        let backend_dir = root.join("src").join("main").join("manager-api");

        Self {
            logs_dir: root.join("logs"),
            server_config: server_dir.join("data").join(".config.yaml"),
            server_config_template: server_dir.join("config_from_api.yaml"),
            backend_config: backend_dir
                .join("src")
                .join("main")
                .join("resources")
                .join("application-dev.yml"),
            frontend_dir: root.join("src").join("main").join("manager-web"),
            jdk_dir: runtime_dir.join(JDK_DIR),
            maven_dir: runtime_dir.join(MAVEN_DIR),
            mysql_dir: runtime_dir.join(MYSQL_DIR),
            mysql_data_dir: data_dir.join("mysql"),
            redis_dir: runtime_dir.join("Redis"),
            node_dir: runtime_dir.join(NODE_DIR),
            python_dir: runtime_dir.join("conda_env"),
            ffmpeg_dir: runtime_dir.join("ffmpeg"),
            git_dir: runtime_dir.join("git-2.48.1"),
            settings_file: data_dir.join("launcher.kdl"),
            version_file: root.join("version.json"),
            release_state_file: data_dir.join("release_check_state.json"),
            skip_update_file: root.join("skip_update.txt"),
            password_file: root.join("MySQL密码.txt"),
            readme_file: root.join("必看说明.txt"),
            server_dir,
            backend_dir,
            data_dir,
            runtime_dir,
            root,
        }
    }

    pub fn mysqld(&self) -> PathBuf {
        self.mysql_dir.join("bin").join(exe("mysqld"))
    }

    pub fn mysql_client(&self) -> PathBuf {
        self.mysql_dir.join("bin").join(exe("mysql"))
    }

    pub fn mysqladmin(&self) -> PathBuf {
        self.mysql_dir.join("bin").join(exe("mysqladmin"))
    }

    pub fn my_ini(&self) -> PathBuf {
        self.mysql_dir.join("my.ini")
    }

    pub fn python(&self) -> PathBuf {
        self.python_dir.join(exe("python"))
    }

    /// Bundled git client, falling back to `git` on PATH.
    pub fn git(&self) -> PathBuf {
        let bundled = self.git_dir.join("cmd").join(exe("git"));
        if bundled.exists() {
            bundled
        } else {
            PathBuf::from("git")
        }
    }
}

/// Environment for bundled child processes.
///
/// Built from [`BundlePaths`] and applied per `Command`, so the launcher's
/// own process environment stays untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEnv {
    /// Directories prepended to PATH, highest priority first
    pub path_prefix: Vec<PathBuf>,
    /// Extra variables (JAVA_HOME and friends)
    pub vars: Vec<(String, PathBuf)>,
}

impl RuntimeEnv {
    pub fn from_paths(paths: &BundlePaths) -> Self {
        let path_prefix = vec![
            paths.runtime_dir.clone(),
            paths.jdk_dir.join("bin"),
            paths.maven_dir.join("bin"),
            paths.mysql_dir.join("bin"),
            paths.redis_dir.clone(),
            paths.node_dir.clone(),
            paths.python_dir.clone(),
            paths.ffmpeg_dir.join("bin"),
        ];

        let vars = vec![
            ("RUNTIME_PATH".to_string(), paths.runtime_dir.clone()),
            ("JDK_PATH".to_string(), paths.jdk_dir.join("bin")),
            ("JAVA_HOME".to_string(), paths.jdk_dir.clone()),
            ("MAVEN_PATH".to_string(), paths.maven_dir.join("bin")),
            ("M2_HOME".to_string(), paths.maven_dir.clone()),
            ("MYSQL_PATH".to_string(), paths.mysql_dir.join("bin")),
            ("REDIS_PATH".to_string(), paths.redis_dir.clone()),
            ("NODE_PATH".to_string(), paths.node_dir.clone()),
            ("PYTHON_PATH".to_string(), paths.python_dir.clone()),
        ];

        Self { path_prefix, vars }
    }

    /// PATH value for children: the bundle prefix followed by `inherited`.
    pub fn joined_path(&self, inherited: Option<OsString>) -> OsString {
        let mut entries: Vec<PathBuf> = self.path_prefix.clone();
        if let Some(inherited) = inherited {
            entries.extend(std::env::split_paths(&inherited));
        }
        // join_paths only fails on entries containing the separator itself
        std::env::join_paths(&entries).unwrap_or_else(|_| {
            entries
                .first()
                .map(|p| p.clone().into_os_string())
                .unwrap_or_default()
        })
    }

    /// Apply this environment to a command about to be spawned.
    pub fn apply(&self, cmd: &mut Command) {
        for (key, value) in &self.vars {
            cmd.env(key, value);
        }
        cmd.env("PATH", self.joined_path(std::env::var_os("PATH")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_relative_to_root() {
        let paths = BundlePaths::new(Path::new("/bundle"));
        assert_eq!(
            paths.server_config,
            Path::new("/bundle/src/main/xiaozhi-server/data/.config.yaml")
        );
        assert_eq!(
            paths.backend_config,
            Path::new("/bundle/src/main/manager-api/src/main/resources/application-dev.yml")
        );
        assert_eq!(paths.mysql_data_dir, Path::new("/bundle/data/mysql"));
        assert_eq!(paths.my_ini(), Path::new("/bundle/runtime/mysql-9.4.0/my.ini"));
    }

    #[test]
    fn test_runtime_path_prefix_precedes_inherited() {
        let paths = BundlePaths::new(Path::new("/bundle"));
        let env = RuntimeEnv::from_paths(&paths);
        let joined = env.joined_path(Some(OsString::from("/usr/bin")));
        let entries: Vec<PathBuf> = std::env::split_paths(&joined).collect();
        assert_eq!(entries.first(), Some(&PathBuf::from("/bundle/runtime")));
        assert_eq!(entries.last(), Some(&PathBuf::from("/usr/bin")));
        assert!(entries.contains(&PathBuf::from("/bundle/runtime/jdk-21.0.9/bin")));
    }

    #[test]
    fn test_runtime_env_sets_java_home() {
        let paths = BundlePaths::new(Path::new("/bundle"));
        let env = RuntimeEnv::from_paths(&paths);
        let java_home = env.vars.iter().find(|(k, _)| k == "JAVA_HOME");
        assert_eq!(
            java_home.map(|(_, v)| v.as_path()),
            Some(Path::new("/bundle/runtime/jdk-21.0.9"))
        );
    }
}
