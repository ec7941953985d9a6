//! Purpose: HTTP client for the Dune analytics API (execute, poll status, fetch results).
//! Exports: `AnalyticsClient`, `PollOptions`, `ExecutionState`, `ExecutionStatus`, `ExecutionResult`.
//! Role: Submit-and-poll transport consumed by the sync and snapshot commands.
//! Invariants: Every request carries the `X-Dune-API-Key` header.
//! Invariants: Transport and HTTP failures surface as errors; they are never retried here.
//! Invariants: Polling is bounded by `PollOptions::max_wait`.
#![allow(clippy::result_large_err)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info};
use url::Url;

use super::queries::Query;
use crate::core::error::{Error, ErrorKind};
use crate::core::record::Row;

type ApiResult<T> = Result<T, Error>;

pub const DEFAULT_BASE_URL: &str = "https://api.dune.com";
const API_KEY_HEADER: &str = "X-Dune-API-Key";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollOptions {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_wait: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExecutionState {
    Pending,
    Executing,
    Completed,
    Failed,
    Cancelled,
    Expired,
    Unknown,
}

impl ExecutionState {
    fn parse(raw: &str) -> Self {
        match raw {
            "QUERY_STATE_PENDING" => Self::Pending,
            "QUERY_STATE_EXECUTING" => Self::Executing,
            "QUERY_STATE_COMPLETED" => Self::Completed,
            "QUERY_STATE_FAILED" => Self::Failed,
            "QUERY_STATE_CANCELLED" => Self::Cancelled,
            "QUERY_STATE_EXPIRED" => Self::Expired,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "QUERY_STATE_PENDING",
            Self::Executing => "QUERY_STATE_EXECUTING",
            Self::Completed => "QUERY_STATE_COMPLETED",
            Self::Failed => "QUERY_STATE_FAILED",
            Self::Cancelled => "QUERY_STATE_CANCELLED",
            Self::Expired => "QUERY_STATE_EXPIRED",
            Self::Unknown => "QUERY_STATE_UNKNOWN",
        }
    }

    pub fn is_complete(self) -> bool {
        self == Self::Completed
    }

    /// Finished without results; polling further cannot help.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled | Self::Expired)
    }
}

#[derive(Clone, Debug)]
pub struct ExecutionStatus {
    pub execution_id: String,
    pub state: ExecutionState,
}

#[derive(Clone, Debug)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub state: ExecutionState,
    pub rows: Vec<Row>,
}

#[derive(Clone)]
pub struct AnalyticsClient {
    inner: Arc<AnalyticsClientInner>,
}

struct AnalyticsClientInner {
    base_url: Url,
    api_key: String,
    agent: ureq::Agent,
    poll: PollOptions,
}

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    query_parameters: &'a Map<String, Value>,
}

#[derive(Deserialize)]
struct ExecuteEnvelope {
    execution_id: String,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Deserialize)]
struct StatusEnvelope {
    execution_id: String,
    state: String,
}

#[derive(Deserialize)]
struct ResultsEnvelope {
    execution_id: String,
    state: String,
    #[serde(default)]
    result: Option<ResultBody>,
}

#[derive(Deserialize)]
struct ResultBody {
    #[serde(default)]
    rows: Vec<Row>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: String,
}

impl AnalyticsClient {
    pub fn new(api_key: impl Into<String>) -> ApiResult<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("analytics api key is empty")
                .with_hint("Set DUNE_API_KEY or pass --api-key."));
        }
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Ok(Self {
            inner: Arc::new(AnalyticsClientInner {
                base_url: normalize_base_url(DEFAULT_BASE_URL.to_string())?,
                api_key,
                agent,
                poll: PollOptions::default(),
            }),
        })
    }

    pub fn with_base_url(self, base_url: impl Into<String>) -> ApiResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        Ok(self.rebuild(|inner| inner.base_url = base_url))
    }

    pub fn with_poll_options(self, poll: PollOptions) -> Self {
        self.rebuild(|inner| inner.poll = poll)
    }

    /// Starts an execution and returns its id.
    pub fn execute(&self, query: &Query) -> ApiResult<String> {
        let url = build_url(
            &self.inner.base_url,
            &["api", "v1", "query", &query.query_id.to_string(), "execute"],
        )?;
        let parameters = query.parameters_json();
        let payload = ExecuteRequest {
            query_parameters: &parameters,
        };
        let envelope: ExecuteEnvelope = self.request_json("POST", &url, Some(&payload))?;
        debug!(
            query_id = query.query_id,
            execution_id = %envelope.execution_id,
            state = envelope.state.as_deref().unwrap_or("-"),
            "submitted query"
        );
        Ok(envelope.execution_id)
    }

    pub fn status(&self, execution_id: &str) -> ApiResult<ExecutionStatus> {
        let url = build_url(
            &self.inner.base_url,
            &["api", "v1", "execution", execution_id, "status"],
        )?;
        let envelope: StatusEnvelope = self.request_json::<(), _>("GET", &url, None)?;
        Ok(ExecutionStatus {
            execution_id: envelope.execution_id,
            state: ExecutionState::parse(&envelope.state),
        })
    }

    pub fn results(&self, execution_id: &str) -> ApiResult<ExecutionResult> {
        let url = build_url(
            &self.inner.base_url,
            &["api", "v1", "execution", execution_id, "results"],
        )?;
        let envelope: ResultsEnvelope = self.request_json::<(), _>("GET", &url, None)?;
        Ok(ExecutionResult {
            execution_id: envelope.execution_id,
            state: ExecutionState::parse(&envelope.state),
            rows: envelope.result.map(|result| result.rows).unwrap_or_default(),
        })
    }

    /// Executes `query`, polls until it finishes, and returns its rows.
    pub fn refresh(&self, query: &Query) -> ApiResult<Vec<Row>> {
        info!(%query, "executing");
        let execution_id = self.execute(query)?;
        let started = Instant::now();
        loop {
            let status = self.status(&execution_id)?;
            if status.state.is_complete() {
                break;
            }
            if status.state.is_failure() {
                let message = format!(
                    "query execution {execution_id} incomplete {}",
                    status.state.as_str()
                );
                error!(query_id = query.query_id, "{message}");
                return Err(Error::new(ErrorKind::Remote).with_message(message));
            }
            if started.elapsed() >= self.inner.poll.max_wait {
                return Err(Error::new(ErrorKind::Remote)
                    .with_message(format!(
                        "query execution {execution_id} still {} after {}s",
                        status.state.as_str(),
                        self.inner.poll.max_wait.as_secs()
                    ))
                    .with_hint("Raise --max-wait-secs or check the query on the analytics service."));
            }
            debug!(%execution_id, state = status.state.as_str(), "waiting for execution");
            thread::sleep(self.inner.poll.interval);
        }

        let result = self.results(&execution_id)?;
        if !result.state.is_complete() {
            return Err(Error::new(ErrorKind::Remote).with_message(format!(
                "query execution {execution_id} returned results in state {}",
                result.state.as_str()
            )));
        }
        debug!(
            count = result.rows.len(),
            %execution_id,
            "got results for execution"
        );
        Ok(result.rows)
    }

    fn request_json<T, R>(&self, method: &str, url: &Url, body: Option<&T>) -> ApiResult<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let request = self
            .inner
            .agent
            .request(method, url.as_str())
            .set(API_KEY_HEADER, &self.inner.api_key)
            .set("Accept", "application/json");
        let response = match body {
            None => request.call(),
            Some(body) => {
                let payload = serde_json::to_string(body).map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to encode request json")
                        .with_source(err)
                })?;
                request
                    .set("Content-Type", "application/json")
                    .send_string(&payload)
            }
        };

        match response {
            Ok(resp) => read_json_response(resp),
            Err(ureq::Error::Status(code, resp)) => Err(parse_error_response(code, resp)),
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Remote)
                .with_message(format!("request to {} failed", url.path()))
                .with_source(err)),
        }
    }

    fn rebuild(mut self, apply: impl FnOnce(&mut AnalyticsClientInner)) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            apply(inner);
            return self;
        }
        let mut inner = AnalyticsClientInner {
            base_url: self.inner.base_url.clone(),
            api_key: self.inner.api_key.clone(),
            agent: self.inner.agent.clone(),
            poll: self.inner.poll,
        };
        apply(&mut inner);
        self.inner = Arc::new(inner);
        self
    }
}

fn normalize_base_url(raw: String) -> ApiResult<Url> {
    let mut url = Url::parse(&raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid analytics base url")
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("analytics base url must use http or https scheme"));
    }
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn build_url(base_url: &Url, segments: &[&str]) -> ApiResult<Url> {
    let mut url = base_url.clone();
    {
        let mut path = url.path_segments_mut().map_err(|_| {
            Error::new(ErrorKind::Usage).with_message("analytics base url cannot be a base")
        })?;
        path.clear();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}

fn read_json_response<R>(response: ureq::Response) -> ApiResult<R>
where
    R: DeserializeOwned,
{
    let body = response.into_string().map_err(|err| {
        Error::new(ErrorKind::Remote)
            .with_message("failed to read response body")
            .with_source(err)
    })?;
    serde_json::from_str(&body).map_err(|err| {
        Error::new(ErrorKind::Remote)
            .with_message("invalid response json")
            .with_source(err)
    })
}

fn parse_error_response(status: u16, response: ureq::Response) -> Error {
    let body = response.into_string().unwrap_or_default();
    let kind = error_kind_from_status(status);
    let detail = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|envelope| envelope.error)
        .unwrap_or_else(|_| body.trim().chars().take(200).collect());
    let mut err = Error::new(kind).with_message(if detail.is_empty() {
        format!("analytics api status {status}")
    } else {
        format!("analytics api status {status}: {detail}")
    });
    if kind == ErrorKind::Permission {
        err = err.with_hint("Check that DUNE_API_KEY is valid for this query.");
    }
    err
}

fn error_kind_from_status(status: u16) -> ErrorKind {
    match status {
        401 | 403 => ErrorKind::Permission,
        404 => ErrorKind::NotFound,
        429 => ErrorKind::Remote,
        400..=499 => ErrorKind::Usage,
        _ => ErrorKind::Remote,
    }
}
