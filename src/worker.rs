//! Background worker with an ordered event channel to a presenter.
//!
//! The worker thread owns all file I/O. The presenting side only answers
//! questions and displays lines, so nothing mutable is shared.

use crate::gate::ConfirmationGate;
use crate::{Error, Result};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

/// Everything the worker can tell the presenter, in emission order.
#[derive(Debug)]
pub enum WorkerEvent {
    Log(String),
    RequestValue {
        prompt: String,
        respond: Sender<Option<String>>,
    },
    RequestApproval {
        message: String,
        respond: Sender<bool>,
    },
    Finished {
        success: bool,
        message: String,
    },
}

/// Gate used inside the worker: every question becomes an event and the
/// worker blocks until the presenter replies.
#[derive(Debug, Clone)]
pub struct ChannelGate {
    events: Sender<WorkerEvent>,
}

impl ChannelGate {
    pub fn new(events: Sender<WorkerEvent>) -> Self {
        Self { events }
    }

    pub fn log(&self, message: impl Into<String>) {
        let _ = self.events.send(WorkerEvent::Log(message.into()));
    }
}

impl ConfirmationGate for ChannelGate {
    fn request_value(&mut self, prompt: &str) -> Result<Option<String>> {
        let (tx, rx) = mpsc::channel();
        self.events
            .send(WorkerEvent::RequestValue {
                prompt: prompt.to_string(),
                respond: tx,
            })
            .map_err(|_| Error::Cancelled("presenter closed".to_string()))?;
        // A presenter that hangs up without answering counts as cancel
        Ok(rx.recv().unwrap_or(None))
    }

    fn request_approval(&mut self, message: &str) -> Result<bool> {
        let (tx, rx) = mpsc::channel();
        self.events
            .send(WorkerEvent::RequestApproval {
                message: message.to_string(),
                respond: tx,
            })
            .map_err(|_| Error::Cancelled("presenter closed".to_string()))?;
        Ok(rx.recv().unwrap_or(false))
    }

    fn notify(&mut self, message: &str) {
        self.log(message);
    }
}

/// Run `job` on a worker thread while `presenter` handles its events on
/// the calling thread.
///
/// Returns the job's own result once the worker has finished.
pub fn run_with_presenter<T, F, P>(presenter: &mut P, job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut ChannelGate) -> Result<T> + Send + 'static,
    P: ConfirmationGate + ?Sized,
{
    let (tx, rx) = mpsc::channel();
    let handle = thread::Builder::new()
        .name("onekey-worker".to_string())
        .spawn(move || {
            let mut gate = ChannelGate::new(tx.clone());
            let result = job(&mut gate);
            let finished = match &result {
                Ok(_) => WorkerEvent::Finished {
                    success: true,
                    message: "done".to_string(),
                },
                Err(e) => WorkerEvent::Finished {
                    success: false,
                    message: e.to_string(),
                },
            };
            let _ = tx.send(finished);
            result
        })?;

    present(&rx, presenter);

    handle
        .join()
        .map_err(|_| Error::Other("worker thread panicked".to_string()))?
}

/// Drain events until `Finished` (or the worker hangs up).
///
/// Returns the finished event's `(success, message)` when one arrived.
pub fn present<P>(events: &Receiver<WorkerEvent>, presenter: &mut P) -> Option<(bool, String)>
where
    P: ConfirmationGate + ?Sized,
{
    while let Ok(event) = events.recv() {
        match event {
            WorkerEvent::Log(line) => presenter.notify(&line),
            WorkerEvent::RequestValue { prompt, respond } => {
                let answer = presenter.request_value(&prompt).unwrap_or_else(|e| {
                    tracing::warn!("prompt failed: {}", e);
                    None
                });
                let _ = respond.send(answer);
            }
            WorkerEvent::RequestApproval { message, respond } => {
                let answer = presenter.request_approval(&message).unwrap_or_else(|e| {
                    tracing::warn!("prompt failed: {}", e);
                    false
                });
                let _ = respond.send(answer);
            }
            WorkerEvent::Finished { success, message } => {
                tracing::debug!(success, "worker finished: {}", message);
                return Some((success, message));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{PresetGate, acquire_secret};

    const UUID: &str = "f47ac10b-58cc-4372-a567-0e02b2c3d479";

    #[test]
    fn test_worker_questions_reach_presenter() {
        let mut presenter = PresetGate::new().with_value(UUID).with_approval(true);

        let result = run_with_presenter(&mut presenter, |gate| {
            gate.log("starting");
            let approved = gate.request_approval("Upgrade?")?;
            let secret = acquire_secret(gate, "placeholder", 3)?;
            Ok((approved, secret))
        })
        .unwrap();

        assert_eq!(result, (true, UUID.to_string()));
        assert_eq!(presenter.asked.len(), 2);
        assert_eq!(presenter.asked[0], "Upgrade?");
    }

    #[test]
    fn test_worker_error_is_returned() {
        let mut presenter = PresetGate::new();
        let err = run_with_presenter(&mut presenter, |gate| -> Result<()> {
            acquire_secret(gate, "placeholder", 3)?;
            Ok(())
        })
        .unwrap_err();
        assert!(err.is_cancellation());
    }

    #[test]
    fn test_events_arrive_in_order() {
        let (tx, rx) = mpsc::channel();
        let worker = thread::spawn(move || {
            let gate = ChannelGate::new(tx.clone());
            gate.log("one");
            gate.log("two");
            let _ = tx.send(WorkerEvent::Finished {
                success: true,
                message: "ok".to_string(),
            });
        });
        worker.join().unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                WorkerEvent::Log(line) => seen.push(line),
                WorkerEvent::Finished { message, .. } => seen.push(format!("finished:{}", message)),
                _ => {}
            }
        }
        assert_eq!(seen, vec!["one", "two", "finished:ok"]);
    }
}
