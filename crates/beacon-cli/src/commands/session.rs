use reqwest::header::HeaderMap;

use crate::cli::OutputFormat;
use crate::client::{AppContext, CliResult};
use crate::output::render_session_headers;

/// Show the session built from flags and the headers the client would add; no network call.
pub(crate) fn handle_session(ctx: &AppContext, format: OutputFormat) -> CliResult<()> {
    let session = ctx.api.session();
    let headers = beacon_client::outgoing_headers(
        &HeaderMap::new(),
        &session,
        ctx.api.config().tenant_header(),
    )?;
    render_session_headers(&session, &headers, format)
}
