//! Database bootstrap: initialize the bundled MySQL, give root a random
//! password, create the application database, and point the backend at it.

use crate::config::{BundlePaths, MysqlSettings};
use crate::gate::ConfirmationGate;
use crate::markers::{Marker, MarkerStore};
use crate::reconcile::writer::write_atomic;
use crate::reconcile::{
    ApplyOutcome, FieldTarget, Mutation, SafeWriter, Snapshot, document, mask_secret,
};
use crate::services::mysql::sql_quote;
use crate::services::{DatabaseEngine, Service, ServiceHandle};
use crate::sys::poll_until;
use crate::{Error, Result};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";
const SPECIAL: &[u8] = b"!@#$%^&*()_+-=[]{}|;:,.<>?";

/// How far below the `druid:` header the password line may sit.
const DRUID_WINDOW: usize = 12;

/// What happened to the data directory before initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataDirAction {
    Created,
    /// Existed and was empty
    Reused,
    /// Existed with content the operator agreed to delete
    Wiped,
}

#[derive(Debug, Clone, Serialize)]
pub struct DbInitReport {
    pub data_dir: PathBuf,
    pub data_dir_action: DataDirAction,
    pub database: String,
    /// Masked; the full password is only in `password_file`
    pub password: String,
    pub password_file: PathBuf,
    pub backend_config: PathBuf,
    pub marked: bool,
}

/// Random password with at least one character from each class.
pub fn generate_password<R: Rng + ?Sized>(length: usize, rng: &mut R) -> String {
    let classes = [UPPER, LOWER, DIGITS, SPECIAL];
    let all: Vec<u8> = classes.concat();

    let mut chars: Vec<u8> = classes
        .iter()
        .map(|class| class[rng.gen_range(0..class.len())])
        .collect();
    while chars.len() < length {
        chars.push(all[rng.gen_range(0..all.len())]);
    }
    chars.shuffle(rng);
    chars.into_iter().map(char::from).collect()
}

/// Run the whole database bootstrap.
///
/// The server is stopped again before returning, whatever happened, and the
/// `mysql_init` marker is written only when every step succeeded.
pub fn bootstrap_database<E, G>(
    engine: &mut E,
    gate: &mut G,
    paths: &BundlePaths,
    settings: &MysqlSettings,
    markers: &MarkerStore,
    interrupt: &AtomicBool,
) -> Result<DbInitReport>
where
    E: DatabaseEngine + ?Sized,
    G: ConfirmationGate + ?Sized,
{
    // Fail before root's password changes if the password has nowhere to go
    check_backend_config(paths)?;
    engine.write_config()?;
    let data_dir_action = prepare_data_dir(engine, gate)?;
    check_interrupt(interrupt)?;

    engine.initialize(settings.init_timeout)?;
    check_interrupt(interrupt)?;

    let handle = engine.start()?;
    let result = configure_running(engine, paths, settings, interrupt);
    stop_quietly(engine, handle);
    let password = result?;

    markers.mark_complete(Marker::MysqlInit)?;
    tracing::info!("database bootstrap complete");

    Ok(DbInitReport {
        data_dir: engine.data_dir().to_path_buf(),
        data_dir_action,
        database: settings.database.clone(),
        password: mask_secret(&password),
        password_file: paths.password_file.clone(),
        backend_config: paths.backend_config.clone(),
        marked: true,
    })
}

fn check_interrupt(interrupt: &AtomicBool) -> Result<()> {
    if interrupt.load(Ordering::SeqCst) {
        Err(Error::Interrupted)
    } else {
        Ok(())
    }
}

fn stop_quietly<E: DatabaseEngine + ?Sized>(engine: &mut E, handle: ServiceHandle) {
    if let Err(e) = engine.stop(handle) {
        tracing::warn!("could not stop {}: {}", engine.name(), e);
    }
}

/// Make sure the data directory exists and is empty.
fn prepare_data_dir<E, G>(engine: &mut E, gate: &mut G) -> Result<DataDirAction>
where
    E: DatabaseEngine + ?Sized,
    G: ConfirmationGate + ?Sized,
{
    let dir = engine.data_dir().to_path_buf();
    if !dir.exists() {
        fs::create_dir_all(&dir)?;
        tracing::info!("created {}", dir.display());
        return Ok(DataDirAction::Created);
    }
    if fs::read_dir(&dir)?.next().is_none() {
        return Ok(DataDirAction::Reused);
    }

    let question = format!(
        "{} already contains data. Delete everything in it and initialize again?",
        dir.display()
    );
    if !gate.request_approval(&question)? {
        return Err(Error::Cancelled("data directory kept".to_string()));
    }
    engine.kill_running()?;
    fs::remove_dir_all(&dir)?;
    fs::create_dir_all(&dir)?;
    tracing::info!("wiped {}", dir.display());
    Ok(DataDirAction::Wiped)
}

/// Steps that need the server running. Returns the new root password.
fn configure_running<E>(
    engine: &E,
    paths: &BundlePaths,
    settings: &MysqlSettings,
    interrupt: &AtomicBool,
) -> Result<String>
where
    E: DatabaseEngine + ?Sized,
{
    let ready = poll_until(settings.ready_timeout, settings.retry_interval, || {
        interrupt.load(Ordering::SeqCst) || engine.execute(None, "SELECT 1").is_ok()
    });
    check_interrupt(interrupt)?;
    if !ready {
        return Err(Error::Timeout {
            what: "MySQL to accept connections".to_string(),
            waited: settings.ready_timeout,
        });
    }

    let password = generate_password(settings.password_length, &mut rand::thread_rng());
    set_root_password(engine, &password)?;
    save_password_file(&paths.password_file, &password)?;
    check_interrupt(interrupt)?;

    create_database(engine, &password, &settings.database)?;
    write_backend_password(paths, &password)?;
    Ok(password)
}

fn set_root_password<E: DatabaseEngine + ?Sized>(engine: &E, password: &str) -> Result<()> {
    let quoted = sql_quote(password);
    let alter = format!(
        "ALTER USER 'root'@'localhost' IDENTIFIED BY {}; FLUSH PRIVILEGES;",
        quoted
    );
    if let Err(e) = engine.execute(None, &alter) {
        tracing::warn!("ALTER USER failed ({}), trying SET PASSWORD", e);
        let set = format!("SET PASSWORD FOR 'root'@'localhost' = {}; FLUSH PRIVILEGES;", quoted);
        engine.execute(None, &set)?;
    }

    engine
        .execute(Some(password), "SELECT 1")
        .map_err(|e| Error::Process(format!("new root password does not work: {}", e)))?;
    tracing::info!(password = %mask_secret(password), "root password set");
    Ok(())
}

fn save_password_file(path: &Path, password: &str) -> Result<()> {
    let content = format!(
        "你的MySQL账号是: root \n你的MySQL数据库密码是: {}",
        password
    );
    write_atomic(path, content.as_bytes())?;
    tracing::info!("password saved to {}", path.display());
    Ok(())
}

fn create_database<E: DatabaseEngine + ?Sized>(
    engine: &E,
    password: &str,
    database: &str,
) -> Result<()> {
    if !database.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::InvalidInput(format!(
            "database name {:?} must be letters, digits and underscores",
            database
        )));
    }
    engine.execute(
        Some(password),
        &format!(
            "CREATE DATABASE IF NOT EXISTS `{}` CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci",
            database
        ),
    )?;
    let found = engine.execute(Some(password), &format!("SHOW DATABASES LIKE '{}'", database))?;
    if !found.lines().any(|line| line.trim() == database) {
        return Err(Error::Process(format!(
            "database {} missing after creation",
            database
        )));
    }
    tracing::info!(database, "database ready");
    Ok(())
}

/// Store the database password as `spring.datasource.druid.password` in the
/// backend's datasource config.
pub fn write_backend_password(paths: &BundlePaths, password: &str) -> Result<ApplyOutcome> {
    let config = paths.backend_config.as_path();
    check_backend_config(paths)?;
    let outcome = SafeWriter::new().apply(
        config,
        &Mutation::ReplaceField {
            target: FieldTarget::new("druid", "password")
                .with_window(DRUID_WINDOW)
                .no_append(),
            value: password.to_string(),
        },
    )?;
    tracing::info!(strategy = ?outcome.strategy, "backend datasource password written");
    Ok(outcome)
}

/// The backend config must exist and hold a `spring.datasource.druid` mapping.
fn check_backend_config(paths: &BundlePaths) -> Result<()> {
    let config = paths.backend_config.as_path();
    let doc = match document::read(config)? {
        Snapshot::Absent => return Err(Error::NotFound(config.to_path_buf())),
        Snapshot::Present(doc) => doc,
    };
    if doc
        .get_path(&["spring", "datasource", "druid"])
        .is_none_or(|druid| !druid.is_mapping())
    {
        return Err(Error::InvalidInput(format!(
            "{} has no spring.datasource.druid section",
            config.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestEnv;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::cell::RefCell;
    use std::time::Duration;

    const APPLICATION_DEV: &str = "\
spring:
  datasource:
    druid:
      #MySQL
      driver-class-name: com.mysql.cj.jdbc.Driver
      url: jdbc:mysql://127.0.0.1:3306/xiaozhi_esp32_server?useUnicode=true
      username: root
      password: 123456
      initial-size: 10
  data:
    redis:
      password:
";

    /// In-memory stand-in that records every SQL statement.
    struct FakeEngine {
        data_dir: PathBuf,
        running: bool,
        initialized: bool,
        fail_alter: bool,
        never_ready: bool,
        password: RefCell<Option<String>>,
        databases: RefCell<Vec<String>>,
        sql: RefCell<Vec<String>>,
        stopped: bool,
    }

    impl FakeEngine {
        fn new(data_dir: &Path) -> Self {
            Self {
                data_dir: data_dir.to_path_buf(),
                running: false,
                initialized: false,
                fail_alter: false,
                never_ready: false,
                password: RefCell::new(None),
                databases: RefCell::new(Vec::new()),
                sql: RefCell::new(Vec::new()),
                stopped: false,
            }
        }
    }

    impl Service for FakeEngine {
        fn name(&self) -> &str {
            "fake"
        }
        fn is_running(&self) -> bool {
            self.running
        }
        fn start(&mut self) -> Result<ServiceHandle> {
            self.running = true;
            Ok(ServiceHandle::AlreadyRunning {
                name: "fake".to_string(),
            })
        }
        fn stop(&mut self, _handle: ServiceHandle) -> Result<()> {
            self.running = false;
            self.stopped = true;
            Ok(())
        }
        fn wait_ready(&self, _timeout: Duration) -> bool {
            self.running
        }
    }

    impl DatabaseEngine for FakeEngine {
        fn data_dir(&self) -> &Path {
            &self.data_dir
        }
        fn write_config(&self) -> Result<PathBuf> {
            Ok(self.data_dir.with_extension("ini"))
        }
        fn initialize(&mut self, _timeout: Duration) -> Result<()> {
            fs::write(self.data_dir.join("ibdata1"), b"x")?;
            self.initialized = true;
            Ok(())
        }
        fn execute(&self, password: Option<&str>, sql: &str) -> Result<String> {
            if !self.running || self.never_ready {
                return Err(Error::Process("can't connect".to_string()));
            }
            if password.map(str::to_string) != *self.password.borrow() {
                return Err(Error::Process("access denied".to_string()));
            }
            self.sql.borrow_mut().push(sql.to_string());
            let literal = |sql: &str| {
                let start = sql.rfind("BY '").or_else(|| sql.rfind("= '"))?;
                let rest = &sql[start..];
                let open = rest.find('\'')? + 1;
                let close = rest[open..].find("';")? + open;
                Some(rest[open..close].replace("''", "'"))
            };
            if sql.starts_with("ALTER USER") {
                if self.fail_alter {
                    return Err(Error::Process("syntax".to_string()));
                }
                *self.password.borrow_mut() = literal(sql);
            } else if sql.starts_with("SET PASSWORD") {
                *self.password.borrow_mut() = literal(sql);
            } else if let Some(rest) = sql.strip_prefix("CREATE DATABASE IF NOT EXISTS `") {
                let name = rest.split('`').next().unwrap_or_default();
                self.databases.borrow_mut().push(name.to_string());
            } else if let Some(rest) = sql.strip_prefix("SHOW DATABASES LIKE '") {
                let name = rest.trim_end_matches('\'');
                if self.databases.borrow().iter().any(|d| d == name) {
                    return Ok(format!("{}\n", name));
                }
                return Ok(String::new());
            }
            Ok("1\n".to_string())
        }
        fn kill_running(&mut self) -> Result<bool> {
            Ok(false)
        }
    }

    fn setup() -> (TestEnv, BundlePaths, MysqlSettings, MarkerStore) {
        let env = TestEnv::new();
        let paths = env.paths();
        fs::create_dir_all(paths.backend_config.parent().unwrap()).unwrap();
        fs::write(&paths.backend_config, APPLICATION_DEV).unwrap();
        let settings = MysqlSettings {
            ready_timeout: Duration::from_millis(200),
            retry_interval: Duration::from_millis(10),
            ..MysqlSettings::default()
        };
        let markers = MarkerStore::new(&paths.data_dir);
        (env, paths, settings, markers)
    }

    #[test]
    fn test_password_has_every_class() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let pw = generate_password(16, &mut rng);
            assert_eq!(pw.len(), 16);
            assert!(pw.bytes().any(|b| UPPER.contains(&b)));
            assert!(pw.bytes().any(|b| LOWER.contains(&b)));
            assert!(pw.bytes().any(|b| DIGITS.contains(&b)));
            assert!(pw.bytes().any(|b| SPECIAL.contains(&b)));
        }
    }

    #[test]
    fn test_full_bootstrap() {
        let (_env, paths, settings, markers) = setup();
        let mut engine = FakeEngine::new(&paths.mysql_data_dir);
        let mut gate = crate::gate::PresetGate::new();
        let interrupt = AtomicBool::new(false);

        let report =
            bootstrap_database(&mut engine, &mut gate, &paths, &settings, &markers, &interrupt)
                .unwrap();

        assert_eq!(report.data_dir_action, DataDirAction::Created);
        assert!(engine.stopped);
        assert!(markers.is_complete(Marker::MysqlInit));

        let password = engine.password.borrow().clone().unwrap();
        let saved = fs::read_to_string(&paths.password_file).unwrap();
        assert!(saved.ends_with(&password));

        let backend = fs::read_to_string(&paths.backend_config).unwrap();
        let doc = crate::reconcile::ConfigDocument::parse(&paths.backend_config, backend).unwrap();
        let stored = doc
            .get_path(&["spring", "datasource", "druid", "password"])
            .and_then(crate::reconcile::document::scalar_to_string);
        assert_eq!(stored.as_deref(), Some(password.as_str()));
        // Redis password line is left alone
        assert!(doc.raw().contains("    redis:\n      password:\n"));
        assert_eq!(
            engine.databases.borrow().as_slice(),
            ["xiaozhi_esp32_server".to_string()]
        );
    }

    #[test]
    fn test_set_password_fallback() {
        let (_env, paths, settings, markers) = setup();
        let mut engine = FakeEngine::new(&paths.mysql_data_dir);
        engine.fail_alter = true;
        let mut gate = crate::gate::PresetGate::new();

        bootstrap_database(
            &mut engine,
            &mut gate,
            &paths,
            &settings,
            &markers,
            &AtomicBool::new(false),
        )
        .unwrap();
        assert!(
            engine
                .sql
                .borrow()
                .iter()
                .any(|s| s.starts_with("SET PASSWORD"))
        );
    }

    #[test]
    fn test_non_empty_data_dir_declined_is_cancelled() {
        let (_env, paths, settings, markers) = setup();
        fs::create_dir_all(&paths.mysql_data_dir).unwrap();
        fs::write(paths.mysql_data_dir.join("keep.ibd"), b"data").unwrap();
        let mut engine = FakeEngine::new(&paths.mysql_data_dir);
        let mut gate = crate::gate::PresetGate::new().with_approval(false);

        let err = bootstrap_database(
            &mut engine,
            &mut gate,
            &paths,
            &settings,
            &markers,
            &AtomicBool::new(false),
        )
        .unwrap_err();
        assert!(err.is_cancellation());
        assert!(paths.mysql_data_dir.join("keep.ibd").exists());
        assert!(!engine.initialized);
        assert!(!markers.is_complete(Marker::MysqlInit));
    }

    #[test]
    fn test_non_empty_data_dir_wiped_on_approval() {
        let (_env, paths, settings, markers) = setup();
        fs::create_dir_all(&paths.mysql_data_dir).unwrap();
        fs::write(paths.mysql_data_dir.join("old.ibd"), b"data").unwrap();
        let mut engine = FakeEngine::new(&paths.mysql_data_dir);
        let mut gate = crate::gate::PresetGate::new().with_approval(true);

        let report = bootstrap_database(
            &mut engine,
            &mut gate,
            &paths,
            &settings,
            &markers,
            &AtomicBool::new(false),
        )
        .unwrap();
        assert_eq!(report.data_dir_action, DataDirAction::Wiped);
        assert!(!paths.mysql_data_dir.join("old.ibd").exists());
    }

    #[test]
    fn test_not_ready_times_out_and_stops_server() {
        let (_env, paths, settings, markers) = setup();
        let mut engine = FakeEngine::new(&paths.mysql_data_dir);
        engine.never_ready = true;
        let mut gate = crate::gate::PresetGate::new();

        let err = bootstrap_database(
            &mut engine,
            &mut gate,
            &paths,
            &settings,
            &markers,
            &AtomicBool::new(false),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(engine.stopped);
        assert!(!markers.is_complete(Marker::MysqlInit));
        assert!(!paths.password_file.exists());
    }

    #[test]
    fn test_interrupt_stops_before_initialize() {
        let (_env, paths, settings, markers) = setup();
        let mut engine = FakeEngine::new(&paths.mysql_data_dir);
        let mut gate = crate::gate::PresetGate::new();

        let err = bootstrap_database(
            &mut engine,
            &mut gate,
            &paths,
            &settings,
            &markers,
            &AtomicBool::new(true),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Interrupted));
        assert!(!engine.initialized);
    }

    #[test]
    fn test_backend_without_druid_section_rejected() {
        let (_env, paths, _settings, _markers) = setup();
        fs::write(&paths.backend_config, "spring:\n  datasource:\n    url: x\n").unwrap();
        let err = write_backend_password(&paths, "pw").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(
            fs::read_to_string(&paths.backend_config).unwrap(),
            "spring:\n  datasource:\n    url: x\n"
        );
    }

    #[test]
    fn test_backend_without_druid_section_stops_before_initialize() {
        let (_env, paths, settings, markers) = setup();
        fs::write(&paths.backend_config, "spring:\n  datasource:\n    url: x\n").unwrap();
        let mut engine = FakeEngine::new(&paths.mysql_data_dir);
        let mut gate = crate::gate::PresetGate::new();

        let err = bootstrap_database(
            &mut engine,
            &mut gate,
            &paths,
            &settings,
            &markers,
            &AtomicBool::new(false),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(!engine.initialized);
        assert!(!paths.mysql_data_dir.exists());
        assert!(engine.password.borrow().is_none());
        assert!(!paths.password_file.exists());
    }

    #[test]
    fn test_backend_password_with_specials_round_trips() {
        let (_env, paths, _settings, _markers) = setup();
        let password = "#a:b'c{d}";
        write_backend_password(&paths, password).unwrap();
        let raw = fs::read_to_string(&paths.backend_config).unwrap();
        let doc = crate::reconcile::ConfigDocument::parse(&paths.backend_config, raw).unwrap();
        let stored = doc
            .get_path(&["spring", "datasource", "druid", "password"])
            .and_then(crate::reconcile::document::scalar_to_string);
        assert_eq!(stored.as_deref(), Some(password));
    }
}
