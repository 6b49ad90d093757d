use beacon_client::{ApiRequest, Session};
use serde_json::Value;

use crate::cli::{OutputFormat, RequestArgs};
use crate::client::{AppContext, CliError, CliResult};
use crate::output::{render_value, to_pretty_json};

pub(crate) async fn handle_request(
    ctx: &AppContext,
    args: RequestArgs,
    format: OutputFormat,
) -> CliResult<()> {
    let request = build_request(args)?;
    let before = ctx.api.session();
    let body: Value = ctx.api.send(request).await?;
    render_value(&body, format)?;

    if let Some(session) = renewed_session(&before, &ctx.api.session()) {
        eprintln!("session renewed during request; store the new tokens:");
        eprintln!("{}", to_pretty_json(session)?);
    }
    Ok(())
}

fn build_request(args: RequestArgs) -> CliResult<ApiRequest> {
    let path = args.path.trim();
    if path.is_empty() {
        return Err(CliError::validation("request path cannot be empty"));
    }

    let mut request = args
        .query
        .into_iter()
        .fold(ApiRequest::new(args.method, path), |request, (key, value)| {
            request.with_query(key, value)
        });
    if let Some(data) = args.data {
        let body: Value = serde_json::from_str(&data)
            .map_err(|err| CliError::validation(format!("--data is not valid JSON: {err}")))?;
        request = request.with_body(body);
    }
    Ok(request)
}

/// The session after a call, when the call rotated its tokens.
fn renewed_session<'a>(before: &Session, after: &'a Session) -> Option<&'a Session> {
    (after.is_authenticated() && after.bearer_token() != before.bearer_token()).then_some(after)
}
