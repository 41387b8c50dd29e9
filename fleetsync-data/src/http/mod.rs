//! HTTP implementation of [`FeedSource`] for the MyGeotab-style JSON-RPC API.

mod wire;

use std::cell::RefCell;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use fleetsync_core::{
    Controller, Device, Diagnostic, EntityId, FailureMode, FaultData, FeedError, FeedKind,
    FeedPage, FeedSource, FeedStart, LogRecord, StatusData, UnitOfMeasure,
};
use log::{debug, info};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use url::Url;

use wire::{
    AuthenticateResult, Credentials, FeedResult, RpcRequest, RpcResponse, classify, feed_params,
    get_params,
};

/// Server used when none is configured.
pub const DEFAULT_SERVER: &str = "my.geotab.com";
const API_PATH: &str = "apiv1";
/// Authentication path meaning "keep using the server you asked".
const THIS_SERVER: &str = "ThisServer";
const DEFAULT_USER_AGENT: &str = "fleetsync/0.1";

/// Account used to open a session.
#[derive(Clone, PartialEq, Eq)]
pub struct Login {
    /// Database (tenant) name.
    pub database: String,
    /// User name.
    pub user_name: String,
    /// Password.
    pub password: String,
}

impl fmt::Debug for Login {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Login")
            .field("database", &self.database)
            .field("user_name", &self.user_name)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Errors raised while constructing an [`HttpFeedSource`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HttpSourceError {
    /// The server name does not form a valid endpoint.
    #[error("invalid server {server:?}: {source}")]
    InvalidServer {
        /// Configured server.
        server: String,
        /// Parse failure.
        #[source]
        source: url::ParseError,
    },
    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// JSON-RPC backed [`FeedSource`].
#[derive(Debug)]
pub struct HttpFeedSource {
    client: Client,
    endpoint: RefCell<Url>,
    login: Login,
    session: RefCell<Option<Credentials>>,
}

impl HttpFeedSource {
    /// Build a source for `server` (a host name or a full endpoint URL).
    ///
    /// # Errors
    ///
    /// Returns [`HttpSourceError`] for an unusable server or client setup.
    pub fn new(server: &str, login: Login) -> Result<Self, HttpSourceError> {
        let endpoint = endpoint_for(server).map_err(|source| HttpSourceError::InvalidServer {
            server: server.to_owned(),
            source,
        })?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(300))
            .user_agent(DEFAULT_USER_AGENT)
            .build()
            .map_err(HttpSourceError::Client)?;
        Ok(Self {
            client,
            endpoint: RefCell::new(endpoint),
            login,
            session: RefCell::new(None),
        })
    }

    /// Endpoint calls are currently sent to.
    #[must_use]
    pub fn endpoint(&self) -> Url {
        self.endpoint.borrow().clone()
    }

    fn credentials(&self, method: &'static str) -> Result<Credentials, FeedError> {
        self.session
            .borrow()
            .clone()
            .ok_or(FeedError::NotAuthenticated { method })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Value,
    ) -> Result<T, FeedError> {
        let url = self.endpoint();
        let response = self
            .client
            .post(url)
            .json(&RpcRequest { method, params })
            .send()
            .await
            .map_err(|err| convert_reqwest_error(&err, method))?
            .error_for_status()
            .map_err(|err| convert_reqwest_error(&err, method))?;
        let envelope: RpcResponse<T> = response
            .json()
            .await
            .map_err(|err| convert_reqwest_error(&err, method))?;
        match envelope {
            RpcResponse {
                error: Some(error), ..
            } => Err(classify(method, error)),
            RpcResponse {
                result: Some(result),
                ..
            } => Ok(result),
            RpcResponse { .. } => Err(FeedError::Decode {
                method,
                message: "response carried neither result nor error".to_owned(),
            }),
        }
    }

    async fn get_feed<T: DeserializeOwned>(
        &self,
        kind: FeedKind,
        start: FeedStart,
        limit: usize,
    ) -> Result<FeedPage<T>, FeedError> {
        const METHOD: &str = "GetFeed";
        let credentials = self.credentials(METHOD)?;
        let result: FeedResult<T> = self
            .call(METHOD, feed_params(kind, start, limit, &credentials))
            .await?;
        debug!(
            "{kind} feed returned {} records up to version {}",
            result.data.len(),
            result.to_version
        );
        Ok(FeedPage::new(result.data, result.to_version))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        type_name: &str,
        id: Option<&EntityId>,
    ) -> Result<Vec<T>, FeedError> {
        const METHOD: &str = "Get";
        let credentials = self.credentials(METHOD)?;
        self.call(METHOD, get_params(type_name, id, &credentials))
            .await
    }
}

#[async_trait(?Send)]
impl FeedSource for HttpFeedSource {
    async fn authenticate(&self) -> Result<(), FeedError> {
        const METHOD: &str = "Authenticate";
        let params = json!({
            "database": self.login.database,
            "userName": self.login.user_name,
            "password": self.login.password,
        });
        let result: AuthenticateResult = self.call(METHOD, params).await?;
        if let Some(path) = result.path.filter(|path| path != THIS_SERVER) {
            let redirected = endpoint_for(&path).map_err(|err| FeedError::Decode {
                method: METHOD,
                message: format!("invalid server path {path:?}: {err}"),
            })?;
            info!("session for {} lives on {path}", self.login.database);
            *self.endpoint.borrow_mut() = redirected;
        }
        *self.session.borrow_mut() = Some(result.credentials);
        Ok(())
    }

    async fn log_records(
        &self,
        start: FeedStart,
        limit: usize,
    ) -> Result<FeedPage<LogRecord>, FeedError> {
        self.get_feed(FeedKind::LogRecord, start, limit).await
    }

    async fn status_data(
        &self,
        start: FeedStart,
        limit: usize,
    ) -> Result<FeedPage<StatusData>, FeedError> {
        self.get_feed(FeedKind::StatusData, start, limit).await
    }

    async fn fault_data(
        &self,
        start: FeedStart,
        limit: usize,
    ) -> Result<FeedPage<FaultData>, FeedError> {
        self.get_feed(FeedKind::FaultData, start, limit).await
    }

    async fn devices(
        &self,
        start: FeedStart,
        limit: usize,
    ) -> Result<FeedPage<Device>, FeedError> {
        self.get_feed(FeedKind::Device, start, limit).await
    }

    async fn diagnostics(
        &self,
        start: FeedStart,
        limit: usize,
    ) -> Result<FeedPage<Diagnostic>, FeedError> {
        self.get_feed(FeedKind::Diagnostic, start, limit).await
    }

    async fn controllers(&self) -> Result<Vec<Controller>, FeedError> {
        self.get("Controller", None).await
    }

    async fn failure_modes(&self) -> Result<Vec<FailureMode>, FeedError> {
        self.get("FailureMode", None).await
    }

    async fn units_of_measure(&self) -> Result<Vec<UnitOfMeasure>, FeedError> {
        self.get("UnitOfMeasure", None).await
    }

    async fn controller(&self, id: &EntityId) -> Result<Option<Controller>, FeedError> {
        let found: Vec<Controller> = self.get("Controller", Some(id)).await?;
        Ok(found.into_iter().next())
    }

    async fn failure_mode(&self, id: &EntityId) -> Result<Option<FailureMode>, FeedError> {
        let found: Vec<FailureMode> = self.get("FailureMode", Some(id)).await?;
        Ok(found.into_iter().next())
    }
}

fn endpoint_for(server: &str) -> Result<Url, url::ParseError> {
    let trimmed = server.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        Url::parse(trimmed)
    } else {
        Url::parse(&format!("https://{trimmed}/{API_PATH}"))
    }
}

fn convert_reqwest_error(error: &reqwest::Error, method: &'static str) -> FeedError {
    if let Some(status) = error.status() {
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return FeedError::Unavailable {
                method,
                message: error.to_string(),
            };
        }
        return FeedError::Transport {
            method,
            message: format!("HTTP {}: {error}", status.as_u16()),
        };
    }
    if error.is_decode() {
        return FeedError::Decode {
            method,
            message: error.to_string(),
        };
    }
    let message = if error.is_timeout() {
        format!("timed out: {error}")
    } else {
        error.to_string()
    };
    FeedError::Transport { method, message }
}
