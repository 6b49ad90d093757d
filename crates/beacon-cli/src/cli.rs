//! Argument parsing and command dispatch.

use beacon_telemetry::{LogFormat, LoggingConfig, init_logging};
use clap::{Args, Parser, Subcommand, ValueEnum};
use reqwest::{Method, Url};
use uuid::Uuid;

use crate::client::{
    AppContext, CliDependencies, CliResult, parse_log_format, parse_method, parse_query_pair,
    parse_url,
};
use crate::commands::login::handle_login;
use crate::commands::logout::handle_logout;
use crate::commands::request::handle_request;
use crate::commands::session::handle_session;

pub(crate) const DEFAULT_API_URL: &str = "http://127.0.0.1:8080";
pub(crate) const DEFAULT_TIMEOUT_SECS: u64 = 25;
pub(crate) const DEFAULT_CLI_LOG_LEVEL: &str = "warn";

/// Parses CLI arguments, executes the requested command, and reports failures.
/// Returns the process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    let logging = LoggingConfig {
        level: &cli.log_level,
        format: cli.log_format.unwrap_or_else(LogFormat::infer),
        build_sha: option_env!("BEACON_BUILD_SHA").unwrap_or("dev"),
    };
    if let Err(err) = init_logging(&logging) {
        eprintln!("warning: {err}");
    }

    let trace_id = Uuid::new_v4().to_string();
    tracing::debug!(trace_id = %trace_id, command = command_label(&cli.command), "dispatching");

    let result = match CliDependencies::from_cli(&cli, &trace_id) {
        Ok(deps) => dispatch(cli, &deps).await,
        Err(err) => Err(err),
    };

    match result {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {}", err.display_message());
            err.exit_code()
        }
    }
}

async fn dispatch(cli: Cli, deps: &CliDependencies) -> CliResult<()> {
    let ctx = AppContext::from_cli(deps, &cli)?;

    match cli.command {
        Command::Login(args) => handle_login(&ctx, args, cli.output).await,
        Command::Logout => handle_logout(&ctx).await,
        Command::Request(args) => handle_request(&ctx, args, cli.output).await,
        Command::Session => handle_session(&ctx, cli.output),
    }
}

const fn command_label(command: &Command) -> &'static str {
    match command {
        Command::Login(_) => "login",
        Command::Logout => "logout",
        Command::Request(_) => "request",
        Command::Session => "session",
    }
}

#[derive(Parser)]
#[command(name = "beacon", about = "Command-line client for the Beacon admin API")]
pub(crate) struct Cli {
    #[arg(
        long,
        global = true,
        env = "BEACON_API_URL",
        value_parser = parse_url,
        default_value = DEFAULT_API_URL
    )]
    pub(crate) api_url: Url,
    #[arg(
        long,
        global = true,
        env = "BEACON_HTTP_TIMEOUT_SECS",
        default_value_t = DEFAULT_TIMEOUT_SECS
    )]
    pub(crate) timeout: u64,
    #[arg(long, global = true, env = "BEACON_ACCESS_TOKEN", hide_env_values = true)]
    pub(crate) access_token: Option<String>,
    #[arg(long, global = true, env = "BEACON_REFRESH_TOKEN", hide_env_values = true)]
    pub(crate) refresh_token: Option<String>,
    #[arg(
        long,
        global = true,
        env = "BEACON_TENANT",
        help = "Tenant to act on (platform users only)"
    )]
    pub(crate) tenant: Option<String>,
    #[arg(
        long,
        global = true,
        help = "Treat the supplied tokens as belonging to a platform-wide user"
    )]
    pub(crate) platform_user: bool,
    #[arg(
        long = "output",
        alias = "format",
        global = true,
        value_enum,
        default_value_t = OutputFormat::Table,
        help = "Select output format for commands that render structured data"
    )]
    pub(crate) output: OutputFormat,
    #[arg(
        long,
        global = true,
        env = "BEACON_LOG_LEVEL",
        default_value = DEFAULT_CLI_LOG_LEVEL
    )]
    pub(crate) log_level: String,
    #[arg(long, global = true, env = "BEACON_LOG_FORMAT", value_parser = parse_log_format)]
    pub(crate) log_format: Option<LogFormat>,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Log in with email and password and print the new session.
    Login(LoginArgs),
    /// Revoke the refresh token and clear the session.
    Logout,
    /// Send an authenticated request and print the JSON response.
    Request(RequestArgs),
    /// Show the session and the credential headers it produces.
    Session,
}

#[derive(Args, Debug, Clone)]
pub(crate) struct LoginArgs {
    #[arg(long, env = "BEACON_EMAIL")]
    pub(crate) email: String,
    #[arg(
        long,
        env = "BEACON_PASSWORD",
        hide_env_values = true,
        help = "Password; prompted for when omitted"
    )]
    pub(crate) password: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub(crate) struct RequestArgs {
    #[arg(value_parser = parse_method)]
    pub(crate) method: Method,
    pub(crate) path: String,
    #[arg(long, help = "JSON request body")]
    pub(crate) data: Option<String>,
    #[arg(
        long = "query",
        value_parser = parse_query_pair,
        help = "Query parameter as key=value; repeatable"
    )]
    pub(crate) query: Vec<(String, String)>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    #[default]
    Table,
    Json,
}
