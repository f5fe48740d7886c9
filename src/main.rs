use anyhow::{Context, Result, anyhow};
use clap::Parser;
use dbapi::{AuthType, ClientConfig, Query, RequestPayload, SecretsMask, perform_query};
use reqwest::Method;
use std::io::Write;

/// dbapi - call a workspace REST API
///
/// Sends one authenticated request and prints the response body. Transient
/// provisioning errors are retried; any other API error is printed and the
/// command exits non-zero.
///
/// Examples:
///   dbapi GET /clusters/list
///   dbapi GET /clusters/get --data '{"cluster_id":"0123-abc"}'
///   dbapi POST /clusters/delete --data '{"cluster_id":"0123-abc"}'
#[derive(Parser, Debug)]
#[command(author, version = env!("DBAPI_VERSION"), about)]
struct Cli {
    /// HTTP method
    #[arg(value_name = "METHOD", value_parser = parse_method)]
    method: Method,

    /// API path such as /clusters/list, or a full URL with --raw-path
    #[arg(value_name = "PATH")]
    path: String,

    /// Workspace URL
    #[arg(
        long,
        env = "DATABRICKS_HOST",
        value_name = "URL",
        required_unless_present = "raw_path"
    )]
    host: Option<String>,

    /// Access token (or base64 user:password with --basic)
    #[arg(long, env = "DATABRICKS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Use Basic instead of Bearer authorization
    #[arg(long)]
    basic: bool,

    /// API version (defaults to 2.0)
    #[arg(long, value_name = "VERSION")]
    api_version: Option<String>,

    /// Skip TLS certificate verification
    #[arg(long)]
    insecure: bool,

    /// Per-request timeout in seconds (defaults to 60)
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Extra request header, repeatable
    #[arg(short = 'H', long = "header", value_name = "KEY:VALUE", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Treat PATH as a complete URL
    #[arg(long)]
    raw_path: bool,

    /// JSON payload; query parameters for GET, request body otherwise
    #[arg(long, value_name = "JSON", conflicts_with = "body")]
    data: Option<String>,

    /// Raw request body, sent as-is
    #[arg(long, value_name = "TEXT")]
    body: Option<String>,
}

fn parse_method(s: &str) -> Result<Method> {
    Method::from_bytes(s.to_uppercase().as_bytes()).map_err(|_| anyhow!("invalid HTTP method '{}'", s))
}

fn parse_header(s: &str) -> Result<(String, String)> {
    let (key, value) = s
        .split_once(':')
        .ok_or_else(|| anyhow!("expected KEY:VALUE, got '{}'", s))?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}

impl Cli {
    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.host.clone().unwrap_or_default())
            .with_user_agent(format!("dbapi-cli/{}", env!("DBAPI_VERSION")))
            .with_insecure_skip_verify(self.insecure);
        if let Some(token) = &self.token {
            config = config.with_token(token.clone());
        }
        if self.basic {
            config = config.with_auth_type(AuthType::Basic);
        }
        if let Some(timeout) = self.timeout {
            config = config.with_timeout_seconds(timeout);
        }
        config
    }

    fn payload(&self) -> Result<RequestPayload> {
        if let Some(data) = &self.data {
            let value = serde_json::from_str(data).context("--data is not valid JSON")?;
            return Ok(RequestPayload::Json(value));
        }
        Ok(self
            .body
            .clone()
            .map(RequestPayload::Raw)
            .unwrap_or_default())
    }
}

async fn run(cli: &Cli) -> Result<Vec<u8>> {
    let config = cli.client_config();
    let mask = SecretsMask::new(cli.token.clone());

    let mut query = Query::new(cli.method.clone(), cli.path.clone())
        .payload(cli.payload()?)
        .mask(&mask);
    if let Some(version) = &cli.api_version {
        query = query.api_version(version.clone());
    }
    if cli.raw_path {
        query = query.raw_path();
    }
    for (key, value) in &cli.headers {
        query = query.header(key.clone(), value.clone());
    }

    perform_query(&config, query).await
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let body = run(&cli).await?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&body)?;
    if !body.ends_with(b"\n") {
        writeln!(stdout)?;
    }
    Ok(())
}
