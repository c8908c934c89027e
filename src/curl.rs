//! HTTP reachability via `curl`

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::cli::{CliError, CommandRunner, SystemRunner};

/// Single-shot HTTP GET through the local `curl` binary
///
/// Any HTTP response counts as reachable; only a transport failure (DNS,
/// refused connection, timeout) is an error.
#[derive(Debug, Clone)]
pub struct Curl {
    runner: Arc<dyn CommandRunner>,
    max_time: Duration,
}

impl Default for Curl {
    fn default() -> Self {
        Self::new()
    }
}

impl Curl {
    #[must_use]
    pub fn new() -> Self {
        Self::with_runner(Arc::new(SystemRunner))
    }

    #[must_use]
    pub fn with_runner(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            max_time: Duration::from_secs(30),
        }
    }

    /// Upper bound on the whole transfer
    #[must_use]
    pub fn max_time(mut self, max_time: Duration) -> Self {
        self.max_time = max_time;
        self
    }

    /// GET `url`, returning the response body
    #[instrument(skip(self))]
    pub fn get(&self, url: &str) -> Result<String, CliError> {
        let max_time = self.max_time.as_secs().max(1).to_string();
        let body = self
            .runner
            .stdout("curl", &["-sS", "-k", "--max-time", max_time.as_str(), url])?;
        debug!(bytes = body.len(), "HTTP GET completed");
        Ok(body)
    }
}

/// `http://` URL for a bare host or IP
pub fn http_url(host: &str) -> String {
    format!("http://{host}")
}
