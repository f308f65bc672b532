//! [`SessionHandle`] backed by a JSON-RPC 2.0 messaging gateway over HTTP.
//!
//! Two construction modes: [`GatewaySession::with_token`] trusts a stored token and performs
//! no network call, [`GatewaySession::login`] exchanges credentials for a token first.

use super::auth::{basic_auth_headers, bearer_auth_headers};
use super::circuit_breaker::{CircuitState, GatewayCircuitBreaker};
use super::metrics::{GatewayMetrics, GatewayMetricsSnapshot};
use super::options::GatewayOptions;
use crate::job::{Message, TargetId};
use crate::session::{SessionError, SessionFuture, SessionHandle, ThreadRecord};
use jsonrpsee::core::client::{ClientT, Error as JsonRpcError};
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::{HeaderMap, HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{timeout, Instant};

/// Application error codes returned by the gateway.
pub const CODE_UNAUTHORIZED: i32 = -32001;
pub const CODE_RATE_LIMITED: i32 = -32002;
pub const CODE_UNKNOWN_THREAD: i32 = -32004;

const METHOD_LOGIN: &str = "auth.login";
const METHOD_LOGOUT: &str = "auth.logout";
const METHOD_CLOSE: &str = "session.close";
const METHOD_SEND: &str = "messages.send";
const METHOD_PING: &str = "session.ping";
const METHOD_LIST_THREADS: &str = "threads.list";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid gateway configuration: {0}")]
    Config(String),
    #[error("gateway {method} timed out")]
    Timeout { method: &'static str },
    #[error("gateway circuit breaker is open")]
    CircuitOpen,
    #[error("gateway {method} call failed (code={code}, message={message})")]
    Rpc {
        method: &'static str,
        code: i32,
        message: String,
    },
    #[error("gateway {method} transport failure: {reason}")]
    Transport { method: &'static str, reason: String },
    #[error("gateway session is closed")]
    Closed,
}

impl GatewayError {
    /// Whether the failure says something about gateway health (as opposed to an
    /// application-level answer from a healthy gateway).
    fn counts_against_breaker(&self) -> bool {
        match self {
            GatewayError::Rpc { code, .. } => *code == CODE_RATE_LIMITED,
            GatewayError::Timeout { .. } | GatewayError::Transport { .. } => true,
            _ => false,
        }
    }

    /// Maps into the session contract; `target` is attached to unknown-thread answers.
    pub fn into_session_error(self, target: Option<&TargetId>) -> SessionError {
        match self {
            GatewayError::Rpc { code, message, .. } if code == CODE_UNAUTHORIZED => {
                SessionError::Fatal(message)
            }
            GatewayError::Rpc { code, message, .. } if code == CODE_UNKNOWN_THREAD => {
                SessionError::TargetUnreachable {
                    target: target.map(TargetId::to_string).unwrap_or_default(),
                    reason: message,
                }
            }
            GatewayError::Timeout { method } => SessionError::Timeout { operation: method },
            GatewayError::Config(reason) => SessionError::Fatal(reason),
            GatewayError::Closed => SessionError::Closed,
            other => SessionError::Transient(other.to_string()),
        }
    }
}

impl From<GatewayError> for SessionError {
    fn from(err: GatewayError) -> Self {
        err.into_session_error(None)
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

/// One authenticated gateway account. Clones share the client, breaker, and metrics.
#[derive(Debug, Clone)]
pub struct GatewaySession {
    endpoint: Arc<String>,
    label: Arc<String>,
    token: Arc<String>,
    client: HttpClient,
    options: GatewayOptions,
    metrics: Arc<GatewayMetrics>,
    breaker: Arc<GatewayCircuitBreaker>,
    closed: Arc<AtomicBool>,
}

impl GatewaySession {
    /// Builds a session from a stored token. No request is made; an invalid token surfaces as
    /// [`SessionError::Fatal`] on the first call.
    pub fn with_token(
        endpoint: impl Into<String>,
        label: impl Into<String>,
        token: impl Into<String>,
        options: GatewayOptions,
    ) -> Result<Self, SessionError> {
        let endpoint = endpoint.into();
        let token = token.into();
        let breaker = Arc::new(GatewayCircuitBreaker::new(
            options.breaker_failure_threshold,
            options.breaker_cooldown,
        ));
        let client = build_client(&endpoint, &options, bearer_headers(&token)?)?;

        Ok(Self {
            endpoint: Arc::new(endpoint),
            label: Arc::new(label.into()),
            token: Arc::new(token),
            client,
            options,
            metrics: Arc::new(GatewayMetrics::default()),
            breaker,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Exchanges credentials for a session token. Rejected credentials fail fast with
    /// [`SessionError::Fatal`].
    pub async fn login(
        endpoint: impl Into<String>,
        username: &str,
        password: &str,
        options: GatewayOptions,
    ) -> Result<Self, SessionError> {
        let endpoint = endpoint.into();
        let headers = basic_auth_headers(username, password)
            .map_err(|err| SessionError::fatal(format!("{err:#}")))?;
        let client = build_client(&endpoint, &options, headers)?;

        let response: LoginResponse = match timeout(
            options.request_timeout,
            client.request(METHOD_LOGIN, rpc_params![]),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => return Err(map_rpc_error(METHOD_LOGIN, err).into()),
            Err(_) => {
                return Err(SessionError::Timeout {
                    operation: METHOD_LOGIN,
                })
            }
        };

        if response.token.trim().is_empty() {
            return Err(SessionError::fatal("gateway returned an empty session token"));
        }

        tracing::info!(account = username, endpoint = %endpoint, "gateway login succeeded");
        Self::with_token(endpoint, username, response.token, options)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Session token, suitable for persisting and later [`GatewaySession::with_token`].
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> GatewayMetricsSnapshot {
        self.metrics.snapshot(self.breaker.snapshot().state)
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.snapshot().state
    }

    /// Revokes the token on the gateway and closes this session.
    pub async fn logout(&self) -> Result<(), SessionError> {
        self.closed.store(true, Ordering::SeqCst);
        self.release(METHOD_LOGOUT).await
    }

    async fn release(&self, method: &'static str) -> Result<(), SessionError> {
        match self
            .call_unchecked::<serde_json::Value>(method, rpc_params![])
            .await
        {
            Ok(_) => Ok(()),
            // A revoked token has nothing left to release.
            Err(GatewayError::Rpc { code, .. }) if code == CODE_UNAUTHORIZED => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn call<R>(&self, method: &'static str, params: ArrayParams) -> Result<R, GatewayError>
    where
        R: DeserializeOwned,
    {
        if self.is_closed() {
            return Err(GatewayError::Closed);
        }
        self.call_unchecked(method, params).await
    }

    async fn call_unchecked<R>(
        &self,
        method: &'static str,
        params: ArrayParams,
    ) -> Result<R, GatewayError>
    where
        R: DeserializeOwned,
    {
        if self.breaker.acquire().is_err() {
            self.metrics.record_rejected();
            tracing::debug!(method, account = %self.label, "circuit open; call rejected");
            return Err(GatewayError::CircuitOpen);
        }

        let start = Instant::now();
        let outcome = timeout(
            self.options.request_timeout,
            self.client.request(method, params),
        )
        .await;
        let elapsed = start.elapsed();

        match outcome {
            Ok(Ok(value)) => {
                self.metrics.record_success(elapsed);
                self.breaker.record_success();
                Ok(value)
            }
            Ok(Err(err)) => {
                let err = map_rpc_error(method, err);
                self.metrics.record_failure(elapsed);
                if err.counts_against_breaker() {
                    self.breaker.record_failure();
                } else {
                    self.breaker.record_success();
                }
                tracing::debug!(method, account = %self.label, error = %err, "gateway call failed");
                Err(err)
            }
            Err(_) => {
                self.metrics.record_timeout(elapsed);
                self.breaker.record_failure();
                Err(GatewayError::Timeout { method })
            }
        }
    }
}

impl SessionHandle for GatewaySession {
    fn label(&self) -> &str {
        &self.label
    }

    fn send_one<'a>(&'a self, target: &'a TargetId, message: &'a Message) -> SessionFuture<'a, ()> {
        Box::pin(async move {
            self.call::<serde_json::Value>(
                METHOD_SEND,
                rpc_params![target.as_str(), message.as_str()],
            )
            .await
            .map(|_| ())
            .map_err(|err| err.into_session_error(Some(target)))
        })
    }

    fn refresh(&self, worker: usize) -> SessionFuture<'_, ()> {
        Box::pin(async move {
            self.call::<serde_json::Value>(METHOD_PING, rpc_params![])
                .await
                .map_err(SessionError::from)?;
            tracing::debug!(worker, account = %self.label, "gateway session refreshed");
            Ok(())
        })
    }

    fn list_threads(&self, limit: usize) -> SessionFuture<'_, Vec<ThreadRecord>> {
        Box::pin(async move {
            self.call::<Vec<ThreadRecord>>(METHOD_LIST_THREADS, rpc_params![limit])
                .await
                .map_err(SessionError::from)
        })
    }

    /// Releases the server-side channel. The token stays valid for later sessions.
    fn close(&self) -> SessionFuture<'_, ()> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            self.release(METHOD_CLOSE).await
        })
    }
}

fn bearer_headers(token: &str) -> Result<HeaderMap, SessionError> {
    if token.trim().is_empty() {
        return Err(SessionError::fatal("session token is empty"));
    }
    bearer_auth_headers(token).map_err(|err| SessionError::fatal(format!("{err:#}")))
}

fn build_client(
    endpoint: &str,
    options: &GatewayOptions,
    headers: HeaderMap,
) -> Result<HttpClient, SessionError> {
    options
        .validate()
        .map_err(|err| GatewayError::Config(format!("{err:#}")))?;

    let max_response_body_size = options.max_response_body_bytes.min(u32::MAX as usize) as u32;
    HttpClientBuilder::default()
        .set_headers(headers)
        .request_timeout(options.request_timeout)
        .max_concurrent_requests(options.max_concurrent_requests)
        .max_response_size(max_response_body_size)
        .build(endpoint)
        .map_err(|err| GatewayError::Config(format!("failed to build gateway client: {err}")).into())
}

fn map_rpc_error(method: &'static str, err: JsonRpcError) -> GatewayError {
    match err {
        JsonRpcError::Call(object) => GatewayError::Rpc {
            method,
            code: object.code(),
            message: object.message().to_string(),
        },
        JsonRpcError::RequestTimeout => GatewayError::Timeout { method },
        other => GatewayError::Transport {
            method,
            reason: other.to_string(),
        },
    }
}
