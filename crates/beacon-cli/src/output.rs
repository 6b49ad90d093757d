//! Output renderers and formatting helpers for CLI commands.

use anyhow::anyhow;
use beacon_client::Session;
use reqwest::header::HeaderMap;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::cli::OutputFormat;
use crate::client::{CliError, CliResult};

pub(crate) fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> CliResult<String> {
    serde_json::to_string_pretty(value)
        .map_err(|err| CliError::failure(anyhow!("failed to format JSON: {err}")))
}

pub(crate) fn render_value(value: &Value, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => println!("{}", to_pretty_json(value)?),
        OutputFormat::Table => {
            for line in value_lines(value) {
                println!("{line}");
            }
        }
    }
    Ok(())
}

pub(crate) fn render_session(session: &Session, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => println!("{}", to_pretty_json(session)?),
        OutputFormat::Table => {
            for line in session_lines(session) {
                println!("{line}");
            }
        }
    }
    Ok(())
}

pub(crate) fn render_session_headers(
    session: &Session,
    headers: &HeaderMap,
    format: OutputFormat,
) -> CliResult<()> {
    match format {
        OutputFormat::Json => {
            let payload = serde_json::json!({
                "session": session,
                "headers": header_object(headers),
            });
            println!("{}", to_pretty_json(&payload)?);
        }
        OutputFormat::Table => {
            for line in session_lines(session) {
                println!("{line}");
            }
            println!("headers:");
            if headers.is_empty() {
                println!("  (none)");
            }
            for (name, value) in headers {
                println!("  {name}: {}", value.to_str().unwrap_or("<binary>"));
            }
        }
    }
    Ok(())
}

/// One line per top-level field for objects, one compact JSON row per element for arrays.
pub(crate) fn value_lines(value: &Value) -> Vec<String> {
    match value {
        Value::Null => vec!["(empty response)".to_string()],
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| format!("{key}: {}", scalar_text(value)))
            .collect(),
        Value::Array(items) if items.is_empty() => vec!["(no items)".to_string()],
        Value::Array(items) => items.iter().map(scalar_text).collect(),
        other => vec![scalar_text(other)],
    }
}

pub(crate) fn session_lines(session: &Session) -> Vec<String> {
    let mut lines = vec![format!(
        "authenticated: {}",
        if session.is_authenticated() { "yes" } else { "no" }
    )];
    if let Some(session_id) = &session.session_id {
        lines.push(format!("session: {session_id}"));
    }
    if let Some(expires) = session.access_token_expires_at {
        lines.push(format!("access token expires: {}", expires.to_rfc3339()));
    }
    if let Some(expires) = session.refresh_token_expires_at {
        lines.push(format!("refresh token expires: {}", expires.to_rfc3339()));
    }
    if let Some(user) = &session.user {
        if !user.email.is_empty() {
            lines.push(format!("user: {}", user.email));
        }
        lines.push(format!(
            "scope: {}",
            if user.is_platform_user {
                "platform"
            } else {
                "tenant"
            }
        ));
        if !user.roles.is_empty() {
            lines.push(format!("roles: {}", user.roles.join(", ")));
        }
    }
    if let Some(tenant) = &session.selected_tenant {
        lines.push(format!("selected tenant: {tenant}"));
    }
    if !session.accessible_tenants.is_empty() {
        let tenants: Vec<String> = session
            .accessible_tenants
            .iter()
            .map(|tenant| format!("{} ({})", tenant.name, tenant.id))
            .collect();
        lines.push(format!("tenants: {}", tenants.join(", ")));
    }
    lines
}

fn header_object(headers: &HeaderMap) -> Value {
    let map: Map<String, Value> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                Value::String(value.to_str().unwrap_or("<binary>").to_string()),
            )
        })
        .collect();
    Value::Object(map)
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}
