//! System utilities for process management and OS-level checks

use regex::Regex;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

/// CJK punctuation, unified ideographs, and full-width forms.
static CJK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\x{3000}-\x{303f}\x{4e00}-\x{9fff}\x{ff00}-\x{ffef}]")
        .expect("static regex is valid")
});

/// Returns the offending path string when `path` contains CJK characters.
///
/// Several bundled runtimes (MySQL, Maven) fail in confusing ways when the
/// bundle lives under such a directory, so the launcher refuses early.
pub fn cjk_in_path(path: &Path) -> Option<String> {
    let display = path.to_string_lossy();
    CJK.is_match(&display).then(|| display.into_owned())
}

/// Whether a process with this image name (e.g. `mysqld.exe`) is running.
#[cfg(windows)]
pub fn is_process_running(image: &str) -> bool {
    Command::new("tasklist")
        .args(["/FI", &format!("IMAGENAME eq {}", image), "/NH"])
        .stderr(Stdio::null())
        .output()
        .map(|out| {
            String::from_utf8_lossy(&out.stdout)
                .to_lowercase()
                .contains(&image.to_lowercase())
        })
        .unwrap_or(false)
}

#[cfg(not(windows))]
pub fn is_process_running(image: &str) -> bool {
    !pids_by_name(image).is_empty()
}

#[cfg(not(windows))]
fn pids_by_name(image: &str) -> Vec<i32> {
    let name = image.strip_suffix(".exe").unwrap_or(image);
    Command::new("pgrep")
        .args(["-x", name])
        .stderr(Stdio::null())
        .output()
        .map(|out| {
            String::from_utf8_lossy(&out.stdout)
                .lines()
                .filter_map(|line| line.trim().parse().ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Forcefully stop every process with this image name.
///
/// Returns `true` if anything was signalled.
#[cfg(windows)]
pub fn kill_by_name(image: &str) -> std::io::Result<bool> {
    if !is_process_running(image) {
        return Ok(false);
    }
    let status = Command::new("taskkill")
        .args(["/F", "/T", "/IM", image])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    Ok(status.success())
}

#[cfg(unix)]
pub fn kill_by_name(image: &str) -> std::io::Result<bool> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let pids = pids_by_name(image);
    for pid in &pids {
        kill(Pid::from_raw(*pid), Signal::SIGTERM)
            .map_err(|e| std::io::Error::other(format!("kill {}: {}", pid, e)))?;
    }
    Ok(!pids.is_empty())
}

/// Stop a child we spawned: polite signal first, then kill after `grace`.
pub fn terminate_child(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let _ = kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM);
        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if start.elapsed() < grace => thread::sleep(Duration::from_millis(100)),
                _ => break,
            }
        }
    }

    #[cfg(not(unix))]
    let _ = grace;

    let _ = child.kill();
    let _ = child.wait();
}

static INTERRUPT: OnceLock<Arc<AtomicBool>> = OnceLock::new();

/// Flag set by Ctrl-C, installing the handler on first use.
///
/// Long-running steps check it between operations so they can clean up.
/// A second Ctrl-C exits immediately.
pub fn interrupt_flag() -> Arc<AtomicBool> {
    INTERRUPT
        .get_or_init(|| {
            let flag = Arc::new(AtomicBool::new(false));
            let handler_flag = Arc::clone(&flag);
            let result = ctrlc::set_handler(move || {
                if handler_flag.swap(true, Ordering::SeqCst) {
                    std::process::exit(130);
                }
                eprintln!("Interrupted, cleaning up (Ctrl-C again to force quit)");
            });
            if let Err(e) = result {
                tracing::warn!("could not install Ctrl-C handler: {}", e);
            }
            flag
        })
        .clone()
}

/// Poll `check` every `interval` until it returns true or `timeout` passes.
///
/// `check` always runs at least once.
pub fn poll_until(timeout: Duration, interval: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    loop {
        if check() {
            return true;
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return false;
        }
        thread::sleep(interval.min(timeout - elapsed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cjk_path_detected() {
        assert!(cjk_in_path(Path::new("D:/小智/bundle")).is_some());
        assert!(cjk_in_path(Path::new("D:/bundle（1）")).is_some());
        assert_eq!(cjk_in_path(Path::new("D:/xiaozhi/bundle")), None);
        // Accented latin is not what breaks the runtimes
        assert_eq!(cjk_in_path(Path::new("/home/josé/bundle")), None);
    }

    #[test]
    fn test_poll_until_succeeds_eventually() {
        let mut calls = 0;
        let ok = poll_until(Duration::from_secs(2), Duration::from_millis(10), || {
            calls += 1;
            calls >= 3
        });
        assert!(ok);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_poll_until_times_out() {
        let start = Instant::now();
        let ok = poll_until(Duration::from_millis(50), Duration::from_millis(10), || false);
        assert!(!ok);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_unknown_process_not_running() {
        assert!(!is_process_running("definitely-not-a-real-process-4242.exe"));
    }

    #[test]
    #[cfg(unix)]
    fn test_terminate_child_stops_process() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        terminate_child(&mut child, Duration::from_secs(2));
        assert!(child.try_wait().unwrap().is_some());
    }
}
