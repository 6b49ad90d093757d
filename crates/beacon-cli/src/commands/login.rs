use anyhow::anyhow;
use beacon_client::LoginCredentials;

use crate::cli::{LoginArgs, OutputFormat};
use crate::client::{AppContext, CliError, CliResult};
use crate::output::render_session;

pub(crate) async fn handle_login(
    ctx: &AppContext,
    args: LoginArgs,
    format: OutputFormat,
) -> CliResult<()> {
    let email = args.email.trim();
    if email.is_empty() {
        return Err(CliError::validation("email cannot be empty"));
    }

    let password = match args.password {
        Some(password) => password,
        None => rpassword::prompt_password("Password: ")
            .map_err(|err| CliError::failure(anyhow!("failed to read password: {err}")))?,
    };
    if password.is_empty() {
        return Err(CliError::validation("password cannot be empty"));
    }

    ctx.api
        .login(&LoginCredentials::new(email, password))
        .await?;
    render_session(&ctx.api.session(), format)
}
