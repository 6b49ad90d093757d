//! Shared client construction, error types, and argument parsers for the CLI.

use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use anyhow::anyhow;
use beacon_client::{
    AuthenticatedClient, ClientConfig, ClientError, ErrorBody, InMemorySessionStore, Session,
    SessionUser,
};
use beacon_telemetry::LogFormat;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Method, StatusCode, Url};

use crate::cli::Cli;

pub(crate) const HEADER_REQUEST_ID: &str = "x-request-id";

/// CLI-level error type to distinguish validation from operational failures.
#[derive(Debug)]
pub(crate) enum CliError {
    Validation(String),
    Failure(anyhow::Error),
}

/// Convenience alias for functions returning a `CliError`.
pub(crate) type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn failure(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure(error.into())
    }

    pub(crate) const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::Failure(_) => 3,
        }
    }

    pub(crate) fn display_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Failure(error) => format!("{error:#}"),
        }
    }
}

impl Display for CliError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("cli error")
    }
}

impl std::error::Error for CliError {}

impl From<ClientError> for CliError {
    fn from(error: ClientError) -> Self {
        classify_client_error(error)
    }
}

/// HTTP client configured from CLI options, tagged with the invocation's trace id.
#[derive(Clone)]
pub(crate) struct CliDependencies {
    pub(crate) http: Client,
}

impl CliDependencies {
    pub(crate) fn from_cli(cli: &Cli, trace_id: &str) -> CliResult<Self> {
        let mut default_headers = HeaderMap::new();
        let request_id = HeaderValue::from_str(trace_id).map_err(|_| {
            CliError::failure(anyhow!("trace identifier contains invalid characters"))
        })?;
        default_headers.insert(HEADER_REQUEST_ID, request_id);

        let http = Client::builder()
            .timeout(Duration::from_secs(cli.timeout))
            .default_headers(default_headers)
            .build()
            .map_err(|err| CliError::failure(anyhow!("failed to build HTTP client: {err}")))?;

        Ok(Self { http })
    }
}

/// Application context passed to command handlers.
#[derive(Clone)]
pub(crate) struct AppContext {
    pub(crate) api: AuthenticatedClient,
}

impl AppContext {
    pub(crate) fn new(http: Client, config: ClientConfig, session: Session) -> CliResult<Self> {
        let api = AuthenticatedClient::builder(config, InMemorySessionStore::shared(session))
            .http_client(http)
            .build()
            .map_err(|err| CliError::failure(anyhow!("failed to build API client: {err}")))?;
        Ok(Self { api })
    }

    pub(crate) fn from_cli(deps: &CliDependencies, cli: &Cli) -> CliResult<Self> {
        let config = ClientConfig::new(cli.api_url.clone())
            .with_timeout(Duration::from_secs(cli.timeout));
        Self::new(deps.http.clone(), config, session_from_cli(cli))
    }
}

/// Session assembled from token flags; nothing is persisted between invocations.
pub(crate) fn session_from_cli(cli: &Cli) -> Session {
    session_from_parts(
        cli.access_token.clone(),
        cli.refresh_token.clone(),
        cli.tenant.clone(),
        cli.platform_user,
    )
}

pub(crate) fn session_from_parts(
    access_token: Option<String>,
    refresh_token: Option<String>,
    tenant: Option<String>,
    platform_user: bool,
) -> Session {
    let user = platform_user.then(|| SessionUser {
        id: "cli".to_string(),
        email: String::new(),
        display_name: None,
        is_platform_user: true,
        tenant_id: None,
        roles: Vec::new(),
    });
    Session {
        access_token,
        refresh_token,
        selected_tenant: tenant,
        user,
        ..Session::default()
    }
}

/// Map an API client failure onto the CLI's exit-code classes.
pub(crate) fn classify_client_error(error: ClientError) -> CliError {
    if matches!(
        error,
        ClientError::Refresh { .. } | ClientError::RefreshAbandoned
    ) {
        return CliError::failure(
            anyhow::Error::new(error).context("session could not be renewed; log in again"),
        );
    }
    if error.is_timeout() {
        return CliError::failure(anyhow::Error::new(error).context("request timed out"));
    }
    let Some(status) = error.status() else {
        return CliError::failure(error);
    };

    let message = error.body().and_then(ErrorBody::message).map(str::to_string);
    match status {
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            CliError::validation(
                message.unwrap_or_else(|| format!("request rejected with status {status}")),
            )
        }
        StatusCode::UNAUTHORIZED => CliError::failure(anyhow!(
            "authentication rejected; log in again ({})",
            message.as_deref().unwrap_or("status 401")
        )),
        _ => {
            let detail = message.map_or_else(
                || format!("request failed with status {status}"),
                |message| format!("{message} (status {status})"),
            );
            CliError::failure(anyhow!(detail))
        }
    }
}

/// Parse the API URL provided to the CLI.
pub(crate) fn parse_url(input: &str) -> Result<Url, String> {
    input
        .parse::<Url>()
        .map_err(|err| format!("invalid URL '{input}': {err}"))
}

/// Parse an HTTP method name, case-insensitively.
pub(crate) fn parse_method(input: &str) -> Result<Method, String> {
    Method::from_bytes(input.trim().to_ascii_uppercase().as_bytes())
        .map_err(|_| format!("invalid HTTP method '{input}'"))
}

/// Parse a `key=value` query parameter; the value may itself contain `=`.
pub(crate) fn parse_query_pair(input: &str) -> Result<(String, String), String> {
    let (key, value) = input
        .split_once('=')
        .ok_or_else(|| format!("query parameter '{input}' must be key=value"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("query parameter '{input}' has an empty key"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Parse the log format flag.
pub(crate) fn parse_log_format(input: &str) -> Result<LogFormat, String> {
    input.parse::<LogFormat>().map_err(|err| err.to_string())
}
