use std::fs;
use std::io::{self, Write};

use clap::{Args, Parser, Subcommand, ValueEnum};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("missing access token; run `elos-cli login`, then pass --token or set ELOS_TOKEN")]
    MissingToken,
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
    #[error("server returned HTTP {status}: {message}")]
    ServerError { status: u16, message: String },
    #[error("missing expected field `{0}`")]
    MissingField(&'static str),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "elos-cli", about = "ELOS Services API client")]
struct Cli {
    #[arg(long, env = "ELOS_BASE_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,

    #[arg(long, env = "ELOS_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone)]
struct CliContext {
    base_url: String,
    token: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    Ping,
    /// Sign in and print the access token.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "ELOS_PASSWORD")]
        password: String,
    },
    Requests(RequestsCommand),
    Estimate(EstimateArgs),
    Invoices(InvoicesCommand),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum View {
    Active,
    Inactive,
    All,
}

impl View {
    fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::All => "all",
        }
    }
}

#[derive(Args, Debug)]
struct RequestsCommand {
    #[command(subcommand)]
    command: RequestsSubcommand,
}

#[derive(Subcommand, Debug)]
enum RequestsSubcommand {
    List {
        #[arg(long, value_enum, default_value_t = View::All)]
        view: View,
        #[arg(long, default_value = "")]
        query: String,
    },
    Export {
        #[arg(long, default_value = "elos-requests.csv", help = "Output file path, or - for stdout")]
        out: String,
        #[arg(long, value_enum, default_value_t = View::All)]
        view: View,
        #[arg(long, default_value = "")]
        query: String,
        #[arg(long, value_delimiter = ',', help = "Only export these request ids")]
        ids: Vec<Uuid>,
    },
}

#[derive(Args, Debug)]
struct EstimateArgs {
    #[arg(long)]
    location: String,
    #[arg(long, default_value = "")]
    accommodation: String,
    #[arg(long, default_value_t = 1)]
    travelers: i32,
    #[arg(long, default_value = "")]
    season: String,
}

#[derive(Args, Debug)]
struct InvoicesCommand {
    #[command(subcommand)]
    command: InvoicesSubcommand,
}

#[derive(Subcommand, Debug)]
enum InvoicesSubcommand {
    List,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let ctx = CliContext { base_url: cli.base_url, token: cli.token };

    match cli.command {
        Command::Ping => run_ping(&ctx).await,
        Command::Login { email, password } => run_login(&ctx, &email, &password).await,
        Command::Requests(requests) => run_requests(&ctx, requests).await,
        Command::Estimate(args) => run_estimate(&ctx, args).await,
        Command::Invoices(invoices) => run_invoices(&ctx, invoices).await,
    }
}

async fn run_ping(cli: &CliContext) -> Result<(), CliError> {
    let client = reqwest::Client::new();
    let response = client.get(api_url(&cli.base_url, "/healthz")).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::ServerError { status: status.as_u16(), message: "health check failed".to_owned() });
    }
    println!("ok");
    Ok(())
}

async fn run_login(cli: &CliContext, email: &str, password: &str) -> Result<(), CliError> {
    let body = serde_json::json!({ "email": email, "password": password });
    let json = send_json(cli, reqwest::Method::POST, "/api/auth/signin", &[], Some(body), false).await?;
    let token = json
        .get("access_token")
        .and_then(Value::as_str)
        .ok_or(CliError::MissingField("access_token"))?;
    println!("{token}");
    Ok(())
}

async fn run_requests(cli: &CliContext, requests: RequestsCommand) -> Result<(), CliError> {
    match requests.command {
        RequestsSubcommand::List { view, query } => {
            let params = dashboard_params(view, &query, &[]);
            let json = send_json(cli, reqwest::Method::GET, "/api/dashboard", &params, None, true).await?;
            print_json(&json)
        }
        RequestsSubcommand::Export { out, view, query, ids } => {
            let params = dashboard_params(view, &query, &ids);
            let csv = send_text(cli, "/api/dashboard/export.csv", &params).await?;
            if out == "-" {
                io::stdout().write_all(csv.as_bytes())?;
            } else {
                fs::write(&out, csv)?;
                eprintln!("wrote {out}");
            }
            Ok(())
        }
    }
}

async fn run_estimate(cli: &CliContext, args: EstimateArgs) -> Result<(), CliError> {
    let body = serde_json::json!({
        "location": args.location,
        "accommodation": args.accommodation,
        "travelers": args.travelers,
        "season": args.season,
    });
    let json = send_json(cli, reqwest::Method::POST, "/api/estimate", &[], Some(body), true).await?;
    print_json(&json)
}

async fn run_invoices(cli: &CliContext, invoices: InvoicesCommand) -> Result<(), CliError> {
    match invoices.command {
        InvoicesSubcommand::List => {
            let json = send_json(cli, reqwest::Method::GET, "/api/invoices", &[], None, true).await?;
            print_json(&json)
        }
    }
}

// =============================================================================
// HTTP
// =============================================================================

fn api_url(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

fn dashboard_params(view: View, query: &str, ids: &[Uuid]) -> Vec<(&'static str, String)> {
    let mut params = vec![("view", view.as_str().to_owned())];
    if !query.trim().is_empty() {
        params.push(("q", query.trim().to_owned()));
    }
    if !ids.is_empty() {
        let joined = ids.iter().map(Uuid::to_string).collect::<Vec<_>>().join(",");
        params.push(("ids", joined));
    }
    params
}

/// Pull the `error` field out of an API error body, else the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(ToOwned::to_owned))
        .unwrap_or_else(|| body.trim().to_owned())
}

fn client(cli: &CliContext, authenticated: bool) -> Result<reqwest::Client, CliError> {
    let mut headers = HeaderMap::new();
    if authenticated {
        let token = cli.token.as_deref().ok_or(CliError::MissingToken)?;
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}"))?);
    }
    Ok(reqwest::Client::builder().default_headers(headers).build()?)
}

async fn send(
    cli: &CliContext,
    method: reqwest::Method,
    path: &str,
    params: &[(&'static str, String)],
    body: Option<Value>,
    authenticated: bool,
) -> Result<String, CliError> {
    let request = client(cli, authenticated)?
        .request(method, api_url(&cli.base_url, path))
        .query(params);
    let request = if let Some(json) = body { request.json(&json) } else { request };

    let response = request.send().await?;
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        return Err(CliError::ServerError { status: status.as_u16(), message: error_message(&text) });
    }
    Ok(text)
}

async fn send_json(
    cli: &CliContext,
    method: reqwest::Method,
    path: &str,
    params: &[(&'static str, String)],
    body: Option<Value>,
    authenticated: bool,
) -> Result<Value, CliError> {
    let text = send(cli, method, path, params, body, authenticated).await?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text)?)
}

async fn send_text(cli: &CliContext, path: &str, params: &[(&'static str, String)]) -> Result<String, CliError> {
    send(cli, reqwest::Method::GET, path, params, None, true).await
}

fn print_json(value: &Value) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_url_joins_without_double_slash() {
        assert_eq!(api_url("http://127.0.0.1:3000/", "/healthz"), "http://127.0.0.1:3000/healthz");
        assert_eq!(api_url("http://host", "/api/invoices"), "http://host/api/invoices");
    }

    #[test]
    fn dashboard_params_skip_empty_values() {
        let params = dashboard_params(View::All, "  ", &[]);
        assert_eq!(params, vec![("view", "all".to_owned())]);
    }

    #[test]
    fn dashboard_params_join_ids() {
        let a = Uuid::nil();
        let b = Uuid::max();
        let params = dashboard_params(View::Active, " dubai ", &[a, b]);
        assert_eq!(params[0], ("view", "active".to_owned()));
        assert_eq!(params[1], ("q", "dubai".to_owned()));
        assert_eq!(params[2], ("ids", format!("{a},{b}")));
    }

    #[test]
    fn error_message_prefers_error_field() {
        assert_eq!(error_message(r#"{"error":"admin access required"}"#), "admin access required");
        assert_eq!(error_message("  Bad Gateway \n"), "Bad Gateway");
    }

    #[test]
    fn authenticated_client_requires_token() {
        let ctx = CliContext { base_url: "http://host".into(), token: None };
        assert!(matches!(client(&ctx, true), Err(CliError::MissingToken)));
        assert!(client(&ctx, false).is_ok());
    }

    #[test]
    fn cli_parses_export_ids() {
        let cli = Cli::parse_from([
            "elos-cli",
            "--token",
            "t",
            "requests",
            "export",
            "--out",
            "-",
            "--ids",
            "00000000-0000-0000-0000-000000000000,ffffffff-ffff-ffff-ffff-ffffffffffff",
        ]);
        let Command::Requests(RequestsCommand { command: RequestsSubcommand::Export { out, ids, .. } }) = cli.command
        else {
            panic!("expected requests export");
        };
        assert_eq!(out, "-");
        assert_eq!(ids, vec![Uuid::nil(), Uuid::max()]);
    }
}
