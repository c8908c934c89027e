//! Fixed-interval polling for eventually-consistent cluster state
//!
//! Right after a manifest is applied, the API server and the cloud load
//! balancer lag behind: the pod may not be scheduled yet, its IP may not be
//! assigned, the ingress may have no address. [`Poller`] runs an ordered set
//! of [`Query`]s, and if any of them fails it sleeps a fixed delay and runs
//! the whole set again, up to a fixed number of retries.
//!
//! Every attempt produces a fresh [`PollResult`]; nothing carries over from
//! one attempt to the next.
//!
//! # Example
//!
//! ```no_run
//! use aksprobe::poll::{Poller, Query, QueryError, RetryBudget};
//! use std::time::Duration;
//!
//! let poller = Poller::new(RetryBudget::new(3, Duration::from_secs(30)));
//! let mut queries = vec![
//!     Query::new("pod name", |_| Ok::<_, QueryError>("\"nginx-7c5\"".to_string())),
//!     Query::new("pod ip", |seen| {
//!         let pod = seen.require("pod name")?;
//!         Ok::<_, QueryError>(format!("'10.244.0.{}'", pod.len()))
//!     }),
//! ];
//!
//! let settled = poller.run(&mut queries)?;
//! assert_eq!(settled.result.get("pod name"), Some("nginx-7c5"));
//! # Ok::<(), aksprobe::poll::PollError>(())
//! ```

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::text::trim_quotes;

/// How many times to retry and how long to wait between attempts
///
/// The delay is constant. There is no backoff: the worst-case wall clock of
/// a poll is `max_retries * delay` on top of the query time itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    max_retries: u32,
    delay: Duration,
}

impl RetryBudget {
    /// Create a budget of `max_retries` retries spaced `delay` apart
    #[must_use]
    pub const fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Retries allowed after the initial attempt
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Fixed wait before every retry
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Total attempts, counting the initial one
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Total time spent sleeping if every retry is used
    #[must_use]
    pub fn worst_case_wait(&self) -> Duration {
        self.delay.saturating_mul(self.max_retries)
    }
}

impl Default for RetryBudget {
    /// Three retries, thirty seconds apart
    fn default() -> Self {
        Self::new(3, Duration::from_secs(30))
    }
}

/// Why a single query did not produce a value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct QueryError(String);

impl QueryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<crate::cli::CliError> for QueryError {
    fn from(err: crate::cli::CliError) -> Self {
        Self(err.to_string())
    }
}

type QueryFn<'a> = Box<dyn FnMut(&PollResult) -> Result<String, QueryError> + Send + 'a>;

/// A named lookup against an external system
///
/// The closure sees the values resolved so far in the current attempt, so a
/// query can depend on one that runs before it (pod IP needs the pod name).
/// Queries that don't care can ignore the argument.
pub struct Query<'a> {
    name: String,
    run: QueryFn<'a>,
}

impl<'a> Query<'a> {
    pub fn new<F, E>(name: impl Into<String>, mut run: F) -> Self
    where
        F: FnMut(&PollResult) -> Result<String, E> + Send + 'a,
        E: Into<QueryError>,
    {
        Self {
            name: name.into(),
            run: Box::new(move |seen| run(seen).map_err(Into::into)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Query<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query").field("name", &self.name).finish_non_exhaustive()
    }
}

/// A query that failed during an attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFailure {
    pub query: String,
    pub error: QueryError,
}

impl fmt::Display for QueryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.query, self.error)
    }
}

/// Outcome of one pass over every query
///
/// Successful values have already had one layer of outer quotes removed.
/// They are not otherwise validated: an empty string is a valid value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollResult {
    values: Vec<(String, String)>,
    failures: Vec<QueryFailure>,
}

impl PollResult {
    /// Value of a query that succeeded in this attempt
    pub fn get(&self, query: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(name, _)| name == query)
            .map(|(_, value)| value.as_str())
    }

    /// Like [`get`](Self::get), but an unresolved value is a [`QueryError`]
    ///
    /// Meant for dependent queries: `seen.require("pod name")?`.
    pub fn require(&self, query: &str) -> Result<&str, QueryError> {
        self.get(query)
            .ok_or_else(|| QueryError::new(format!("depends on unresolved query '{query}'")))
    }

    /// Queries that failed in this attempt, in query order
    pub fn failures(&self) -> &[QueryFailure] {
        &self.failures
    }

    /// `true` when every query succeeded
    pub fn is_settled(&self) -> bool {
        self.failures.is_empty()
    }

    /// Resolved `(query, value)` pairs in query order
    pub fn values(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn record(&mut self, query: &str, outcome: Result<String, QueryError>) {
        match outcome {
            Ok(raw) => {
                let value = trim_quotes(&raw).to_string();
                self.values.push((query.to_string(), value));
            }
            Err(error) => self.failures.push(QueryFailure {
                query: query.to_string(),
                error,
            }),
        }
    }
}

/// Where the poll loop stands after an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Some query failed and retries remain; `next_attempt` is 1-based
    Probing { next_attempt: u32 },
    /// Every query succeeded
    Settled,
    /// Some query failed and the budget is spent
    Exhausted,
}

impl PollState {
    /// Transition after attempt number `attempt` (1-based) produced `result`
    pub fn after(attempt: u32, result: &PollResult, budget: &RetryBudget) -> Self {
        if result.is_settled() {
            Self::Settled
        } else if attempt >= budget.max_attempts() {
            Self::Exhausted
        } else {
            Self::Probing {
                next_attempt: attempt + 1,
            }
        }
    }
}

/// Blocking wait between attempts
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

impl<S: Sleeper + ?Sized> Sleeper for &S {
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration);
    }
}

/// Blocks the current thread with [`std::thread::sleep`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Records requested sleeps instead of blocking
///
/// Useful to assert on the timing of a poll without waiting for it.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every duration requested so far
    pub fn sleeps(&self) -> Vec<Duration> {
        self.slept
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Sum of every duration requested so far
    pub fn total(&self) -> Duration {
        self.sleeps().into_iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.slept
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(duration);
    }
}

/// Error type for polling
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("queries still failing after {attempts} attempts over {waited:?}: {}", join_failures(.failures))]
    Exhausted {
        attempts: u32,
        waited: Duration,
        failures: Vec<QueryFailure>,
    },
}

impl PollError {
    /// Failures from the final attempt
    pub fn failures(&self) -> &[QueryFailure] {
        match self {
            Self::Exhausted { failures, .. } => failures,
        }
    }
}

fn join_failures(failures: &[QueryFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A successful poll
#[derive(Debug, Clone)]
pub struct Settled {
    /// Values from the attempt that succeeded
    pub result: PollResult,
    /// Attempts made, counting the initial one
    pub attempts: u32,
    /// Time spent sleeping between attempts
    pub waited: Duration,
}

/// Runs queries until they all succeed or the retry budget is spent
#[derive(Debug, Clone)]
pub struct Poller<S = ThreadSleeper> {
    budget: RetryBudget,
    sleeper: S,
}

impl Poller<ThreadSleeper> {
    /// Poller that blocks the calling thread between attempts
    #[must_use]
    pub fn new(budget: RetryBudget) -> Self {
        Self::with_sleeper(budget, ThreadSleeper)
    }
}

impl<S: Sleeper> Poller<S> {
    #[must_use]
    pub fn with_sleeper(budget: RetryBudget, sleeper: S) -> Self {
        Self { budget, sleeper }
    }

    pub fn budget(&self) -> &RetryBudget {
        &self.budget
    }

    /// Run every query once, then retry the whole set while any fails
    ///
    /// The first attempt starts immediately. Each retry is preceded by a
    /// full `budget.delay()` sleep. Only query errors trigger a retry; the
    /// content of a successful value is never inspected.
    pub fn run(&self, queries: &mut [Query<'_>]) -> Result<Settled, PollError> {
        let mut attempt = 1;
        let mut waited = Duration::ZERO;

        loop {
            let result = attempt_all(queries);

            match PollState::after(attempt, &result, &self.budget) {
                PollState::Settled => {
                    info!(attempts = attempt, waited = ?waited, "All queries resolved");
                    return Ok(Settled {
                        result,
                        attempts: attempt,
                        waited,
                    });
                }
                PollState::Exhausted => {
                    warn!(
                        attempts = attempt,
                        waited = ?waited,
                        failures = %join_failures(result.failures()),
                        "Retry budget exhausted"
                    );
                    return Err(PollError::Exhausted {
                        attempts: attempt,
                        waited,
                        failures: result.failures,
                    });
                }
                PollState::Probing { next_attempt } => {
                    debug!(
                        attempt = attempt,
                        max_attempts = self.budget.max_attempts(),
                        delay = ?self.budget.delay(),
                        failures = %join_failures(result.failures()),
                        "Queries not resolved yet, waiting"
                    );
                    self.sleeper.sleep(self.budget.delay());
                    waited += self.budget.delay();
                    attempt = next_attempt;
                }
            }
        }
    }
}

fn attempt_all(queries: &mut [Query<'_>]) -> PollResult {
    let mut result = PollResult::default();
    for query in queries.iter_mut() {
        let outcome = (query.run)(&result);
        result.record(&query.name, outcome);
    }
    result
}
