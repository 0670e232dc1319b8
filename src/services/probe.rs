//! HTTP readiness probe.

use crate::sys::poll_until;
use std::time::Duration;

/// Considers a service ready once it answers HTTP at all.
///
/// A 404 or 401 still proves the server is listening and routing, which is
/// all the launcher needs before starting dependents. Only 5xx responses and
/// transport errors count as not ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpProbe {
    url: String,
    request_timeout: Duration,
    interval: Duration,
}

impl HttpProbe {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            request_timeout: Duration::from_secs(2),
            interval: Duration::from_secs(2),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// One request.
    pub fn check(&self) -> bool {
        match ureq::get(&self.url).timeout(self.request_timeout).call() {
            Ok(_) => true,
            Err(ureq::Error::Status(code, _)) => code < 500,
            Err(e) => {
                tracing::trace!(url = %self.url, "probe failed: {}", e);
                false
            }
        }
    }

    /// Repeat [`check`](Self::check) until it succeeds or `timeout` passes.
    pub fn wait(&self, timeout: Duration) -> bool {
        tracing::info!(url = %self.url, "waiting up to {}s for readiness", timeout.as_secs());
        poll_until(timeout, self.interval, || self.check())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    fn serve_status(status: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut line = String::new();
                while reader.read_line(&mut line).unwrap_or(0) > 2 {
                    line.clear();
                }
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    status
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{}/xiaozhi/", addr)
    }

    #[test]
    fn test_not_found_counts_as_ready() {
        let probe = HttpProbe::new(&serve_status("404 Not Found"));
        assert!(probe.check());
    }

    #[test]
    fn test_server_error_is_not_ready() {
        let probe = HttpProbe::new(&serve_status("503 Service Unavailable"));
        assert!(!probe.check());
    }

    #[test]
    fn test_closed_port_times_out() {
        // Bind then drop to get a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let probe = HttpProbe::new(&format!("http://127.0.0.1:{}/", port))
            .with_interval(Duration::from_millis(20));
        assert!(!probe.wait(Duration::from_millis(100)));
    }
}
