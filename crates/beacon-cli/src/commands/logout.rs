use crate::client::{AppContext, CliResult};

pub(crate) async fn handle_logout(ctx: &AppContext) -> CliResult<()> {
    let had_refresh_token = ctx.api.session().refresh_token().is_some();
    ctx.api.logout().await;
    if had_refresh_token {
        println!("Logged out; refresh token revoked.");
    } else {
        println!("No refresh token held; nothing to revoke.");
    }
    Ok(())
}
