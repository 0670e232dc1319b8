//! Interactive launcher: sanity checks, first-run notice, update offer, and
//! the service menu.

use crate::bootstrap::{self, ConfigInitReport, DbInitReport, UpgradeMode};
use crate::config::{Bundle, UpdateSource};
use crate::gate::ConfirmationGate;
use crate::markers::{Marker, MarkerStore};
use crate::services::{MysqlServer, ProcessService, Service, ServiceHandle, ServiceKind};
use crate::update::{self, GitSource, ReleaseSource, UpdateChoice, UpdateReport, VersionSource};
use crate::{Error, Result, sys, worker};
use serde::Serialize;
use std::fs;

pub const MENU: &str = "\
==============================
 1. 一键启动全部服务 (默认)
 2. 启动 MySQL
 3. 启动 Redis
 4. 启动前端
 5. 启动后端
 6. 启动小智AI服务端
 7. 退出
==============================";

/// One line of the service menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    StartAll,
    Start(ServiceKind),
    Exit,
}

impl MenuChoice {
    /// Blank input picks the default (start everything).
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim() {
            "" | "1" => Some(MenuChoice::StartAll),
            "2" => Some(MenuChoice::Start(ServiceKind::Mysql)),
            "3" => Some(MenuChoice::Start(ServiceKind::Redis)),
            "4" => Some(MenuChoice::Start(ServiceKind::Frontend)),
            "5" => Some(MenuChoice::Start(ServiceKind::Backend)),
            "6" => Some(MenuChoice::Start(ServiceKind::AiServer)),
            "7" | "q" | "exit" => Some(MenuChoice::Exit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartState {
    Started,
    AlreadyRunning,
    /// Setup was declined or cancelled, so the service was not started
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStart {
    pub service: ServiceKind,
    pub state: StartState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StartReport {
    pub services: Vec<ServiceStart>,
    /// Backend answered its readiness probe (start-all only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_ready: Option<bool>,
}

impl StartReport {
    pub fn all_ok(&self) -> bool {
        !self
            .services
            .iter()
            .any(|s| matches!(s.state, StartState::Failed))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LaunchOutcome {
    /// Operator chose to update first; nothing was started
    UpdateRequested,
    Exited { runs: Vec<StartReport> },
}

/// Refuse bundle locations the bundled runtimes can't cope with.
pub fn check_bundle_path(bundle: &Bundle) -> Result<()> {
    match sys::cjk_in_path(&bundle.paths.root) {
        Some(path) => Err(Error::InvalidInput(format!(
            "the bundle path {} contains Chinese or full-width characters; \
             move it to a plain ASCII path such as D:\\xiaozhi",
            path
        ))),
        None => Ok(()),
    }
}

/// Show the readme once and record the acknowledgement.
///
/// Returns `true` when the notice was shown on this call.
pub fn acknowledge_first_run<G>(bundle: &Bundle, markers: &MarkerStore, gate: &mut G) -> Result<bool>
where
    G: ConfirmationGate + ?Sized,
{
    if markers.is_complete(Marker::FirstRun) {
        return Ok(false);
    }
    match fs::read_to_string(&bundle.paths.readme_file) {
        Ok(text) => gate.notify(&text),
        Err(e) => tracing::warn!("cannot read {}: {}", bundle.paths.readme_file.display(), e),
    }
    if !gate.request_approval("我已阅读并了解以上说明 (I have read the notes above)")? {
        return Err(Error::Cancelled("first-run notes not acknowledged".to_string()));
    }
    markers.mark_complete(Marker::FirstRun)?;
    Ok(true)
}

pub fn version_source(bundle: &Bundle, source: UpdateSource) -> Box<dyn VersionSource> {
    let settings = &bundle.settings.update;
    match source {
        UpdateSource::Git => Box::new(GitSource::new(
            bundle.paths.git(),
            &bundle.paths.root,
            settings.mirror_url.clone(),
        )),
        UpdateSource::Release => Box::new(ReleaseSource::new(
            &settings.repo_owner,
            &settings.repo_name,
            &bundle.paths.version_file,
        )),
    }
}

/// Check for updates and offer them. Failures are logged, never fatal.
pub fn check_and_offer<G>(bundle: &Bundle, gate: &mut G) -> Result<Option<(UpdateReport, UpdateChoice)>>
where
    G: ConfirmationGate + ?Sized,
{
    if bundle.paths.skip_update_file.exists() {
        tracing::info!("{} present, skipping update check", bundle.paths.skip_update_file.display());
        return Ok(None);
    }
    let source = version_source(bundle, bundle.settings.update.source);
    let report = match update::check(source.as_ref()) {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!("update check failed: {}", e);
            return Ok(None);
        }
    };
    let now = chrono::Local::now().naive_local();
    let choice = update::offer_update(&report, &bundle.paths.release_state_file, gate, now)?;
    Ok(Some((report, choice)))
}

/// Run the config flow on a worker thread, answering prompts through `presenter`.
pub fn run_config_init<P>(bundle: &Bundle, mode: UpgradeMode, presenter: &mut P) -> Result<ConfigInitReport>
where
    P: ConfirmationGate + ?Sized,
{
    let paths = bundle.paths.clone();
    let settings = bundle.settings.secret.clone();
    let markers = MarkerStore::new(&paths.data_dir);
    worker::run_with_presenter(presenter, move |gate| {
        bootstrap::reconcile_config(&paths, &settings, &markers, mode, gate)
    })
}

/// Run the database bootstrap on a worker thread.
pub fn run_db_init<P>(bundle: &Bundle, presenter: &mut P) -> Result<DbInitReport>
where
    P: ConfirmationGate + ?Sized,
{
    let mut engine = MysqlServer::new(bundle);
    let paths = bundle.paths.clone();
    let settings = bundle.settings.mysql.clone();
    let markers = MarkerStore::new(&paths.data_dir);
    let interrupt = sys::interrupt_flag();
    worker::run_with_presenter(presenter, move |gate| {
        bootstrap::bootstrap_database(&mut engine, gate, &paths, &settings, &markers, &interrupt)
    })
}

fn started(kind: ServiceKind, handle: ServiceHandle) -> ServiceStart {
    let state = match handle {
        ServiceHandle::AlreadyRunning { .. } => StartState::AlreadyRunning,
        _ => StartState::Started,
    };
    ServiceStart {
        service: kind,
        state,
        pid: handle.pid(),
        detail: None,
    }
}

fn failed(kind: ServiceKind, error: &Error) -> ServiceStart {
    tracing::error!(service = %kind, "{}", error);
    ServiceStart {
        service: kind,
        state: StartState::Failed,
        pid: None,
        detail: Some(error.to_string()),
    }
}

fn start_plain(kind: ServiceKind, bundle: &Bundle) -> ServiceStart {
    match ProcessService::for_kind(kind, bundle).start() {
        Ok(handle) => started(kind, handle),
        Err(e) => failed(kind, &e),
    }
}

/// Start one service, running its one-time setup first when needed.
pub fn start_service<G>(kind: ServiceKind, bundle: &Bundle, gate: &mut G) -> ServiceStart
where
    G: ConfirmationGate + ?Sized,
{
    let markers = MarkerStore::new(&bundle.paths.data_dir);
    match kind {
        ServiceKind::Mysql if !markers.is_complete(Marker::MysqlInit) => {
            let question = "MySQL has not been initialized yet. Initialize it now?";
            match gate.request_approval(question) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!("starting MySQL without initialization");
                    return start_plain(kind, bundle);
                }
                Err(e) => return failed(kind, &e),
            }
            if let Err(e) = run_db_init(bundle, gate) {
                if e.is_cancellation() {
                    return ServiceStart {
                        service: kind,
                        state: StartState::Skipped,
                        pid: None,
                        detail: Some(e.to_string()),
                    };
                }
                return failed(kind, &e);
            }
            start_plain(kind, bundle)
        }
        ServiceKind::AiServer if !markers.is_complete(Marker::ConfigInit) => {
            tracing::info!("server config not initialized; running config init first");
            match run_config_init(bundle, UpgradeMode::default(), gate) {
                Ok(_) => start_plain(kind, bundle),
                Err(e) if e.is_cancellation() => ServiceStart {
                    service: kind,
                    state: StartState::Skipped,
                    pid: None,
                    detail: Some(e.to_string()),
                },
                Err(e) => failed(kind, &e),
            }
        }
        _ => start_plain(kind, bundle),
    }
}

/// Start everything in dependency order.
///
/// The AI server needs the backend's API for its config, so it is only
/// started once the backend answers (or the wait times out).
pub fn start_all<G>(bundle: &Bundle, gate: &mut G) -> StartReport
where
    G: ConfirmationGate + ?Sized,
{
    let mut report = StartReport::default();
    for kind in ServiceKind::ALL {
        if kind != ServiceKind::AiServer {
            report.services.push(start_service(kind, bundle, gate));
        }
    }

    let backend = ProcessService::for_kind(ServiceKind::Backend, bundle);
    let ready = backend.wait_ready(bundle.settings.backend.ready_timeout);
    if !ready {
        tracing::warn!(
            "backend did not answer within {}s; starting the AI server anyway",
            bundle.settings.backend.ready_timeout.as_secs()
        );
    }
    report.backend_ready = Some(ready);

    report
        .services
        .push(start_service(ServiceKind::AiServer, bundle, gate));
    report
}

/// Menu loop until the operator exits or input ends.
pub fn run_menu<G>(bundle: &Bundle, gate: &mut G) -> Result<Vec<StartReport>>
where
    G: ConfirmationGate + ?Sized,
{
    let mut runs = Vec::new();
    loop {
        gate.notify(MENU);
        let Some(input) = gate.request_value("请选择 (1-7)")? else {
            break;
        };
        match MenuChoice::parse(&input) {
            Some(MenuChoice::Exit) => break,
            Some(MenuChoice::StartAll) => runs.push(start_all(bundle, gate)),
            Some(MenuChoice::Start(kind)) => runs.push(StartReport {
                services: vec![start_service(kind, bundle, gate)],
                backend_ready: None,
            }),
            None => gate.notify(&format!("无效的选择: {:?}", input.trim())),
        }
    }
    Ok(runs)
}

/// The full launch sequence.
pub fn launch<G>(bundle: &Bundle, gate: &mut G) -> Result<LaunchOutcome>
where
    G: ConfirmationGate + ?Sized,
{
    check_bundle_path(bundle)?;
    let markers = MarkerStore::new(&bundle.paths.data_dir);
    acknowledge_first_run(bundle, &markers, gate)?;

    if let Some((_, UpdateChoice::UpdateNow)) = check_and_offer(bundle, gate)? {
        return Ok(LaunchOutcome::UpdateRequested);
    }

    let runs = run_menu(bundle, gate)?;
    Ok(LaunchOutcome::Exited { runs })
}
