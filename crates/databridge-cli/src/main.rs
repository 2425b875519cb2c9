//! `DataBridge` CLI — command-line client for the `DataBridge` server.
//!
//! A standalone HTTP client that talks to a running `databridge-server`
//! process over its REST surface (vault lifecycle, connector registry,
//! connection monitor). It carries no internal crate dependency on
//! `databridge-core` — only `reqwest` + `serde_json` — mirroring the
//! server's own "thin HTTP bootstrap over a library core" split.
//!
//! Exit codes follow spec §6: `0` success, `1` user error (bad args,
//! unknown backend), `2` connection/auth failure, `3` integrity
//! verification failure, `4` recovery failure.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const WHITE: &str = "\x1b[37m";

/// DataBridge — unified, pooled, audited access to heterogeneous databases.
#[derive(Parser)]
#[command(
    name = "databridge",
    version,
    about = "DataBridge CLI — manage connectors, vault lifecycle, and health over the DataBridge server",
    long_about = None,
)]
struct Cli {
    /// DataBridge server address.
    #[arg(long, env = "DATABRIDGE_ADDR", default_value = "http://127.0.0.1:8420")]
    addr: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Liveness check against `/v1/sys/health`.
    Status,
    /// Show vault seal status.
    SealStatus,
    /// Initialize the vault with Shamir's Secret Sharing.
    Init {
        /// Number of unseal key shares to generate.
        #[arg(long, default_value = "5")]
        shares: u8,
        /// Minimum shares required to unseal.
        #[arg(long, default_value = "3")]
        threshold: u8,
    },
    /// Submit an unseal key share.
    Unseal {
        /// Base64-encoded unseal key share.
        share: String,
    },
    /// Connector registry operations.
    Connector {
        #[command(subcommand)]
        action: ConnectorCommands,
    },
    /// Connection health and performance alert operations.
    Monitor {
        #[command(subcommand)]
        action: MonitorCommands,
    },
}

#[derive(Subcommand)]
enum ConnectorCommands {
    /// List registered connector ids.
    List,
    /// Register a connector from a connection URI.
    Register {
        /// Stable connector id.
        id: String,
        /// Connection URI (`postgresql://`, `mysql://`, `mongodb://`, …).
        uri: String,
        /// Username for the connection.
        #[arg(long)]
        username: String,
        /// Password for the connection.
        #[arg(long)]
        password: String,
        /// Require TLS.
        #[arg(long, default_value = "false")]
        tls: bool,
        #[arg(long, default_value = "1")]
        pool_min: usize,
        #[arg(long, default_value = "10")]
        pool_max: usize,
    },
    /// Discover and print the normalized schema snapshot for a connector.
    Schema {
        /// Connector id.
        id: String,
    },
}

#[derive(Subcommand)]
enum MonitorCommands {
    /// Print aggregated connection health for every registered connector.
    Health,
    /// Print open performance alerts and clear them.
    Alerts,
}

struct Client {
    http: reqwest::Client,
    addr: String,
}

impl Client {
    fn new(addr: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            addr,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.addr)
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let resp = self
            .http
            .get(self.url(path))
            .send()
            .await
            .context("request failed")?;
        handle_response(resp).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let resp = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .context("request failed")?;
        handle_response(resp).await
    }
}

/// Error carrying the HTTP status so [`run`] can translate it into the
/// spec §6 exit-code taxonomy.
#[derive(Debug)]
struct HttpStatusError {
    status: reqwest::StatusCode,
    body: String,
}

impl std::fmt::Display for HttpStatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "server returned {}: {}", self.status, self.body)
    }
}

impl std::error::Error for HttpStatusError {}

async fn handle_response(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    let body = resp.text().await.context("failed to read response body")?;
    if !status.is_success() {
        return Err(HttpStatusError { status, body }.into());
    }
    if body.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).context("failed to parse response JSON")
}

fn header(icon: &str, title: &str) {
    println!("{BOLD}{CYAN}{icon} {title}{RESET}");
    println!("{DIM}─────────────────────────────────────────{RESET}");
}

fn kv_line(key: &str, value: &str) {
    println!("  {DIM}{key:<18}{RESET} {WHITE}{value}{RESET}");
}

fn success(msg: &str) {
    println!("{GREEN}{BOLD}✓{RESET} {msg}");
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let client = Client::new(cli.addr);

    match run(&client, cli.command).await {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            eprintln!();
            eprintln!("  {RED}{BOLD}✗ Error:{RESET} {e:#}");
            eprintln!();
            ExitCode::from(exit_code_for(&e))
        }
    }
}

/// Map an error into the spec §6 exit-code taxonomy.
///
/// User-error (bad args, unknown backend) and connection/auth failures are
/// distinguishable via the HTTP status the server mapped them to
/// (`databridge_server::error::AppError`); anything else falls back to `1`.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(http_err) = err.downcast_ref::<HttpStatusError>() {
        return match http_err.status {
            reqwest::StatusCode::BAD_REQUEST | reqwest::StatusCode::CONFLICT | reqwest::StatusCode::NOT_FOUND => 1,
            reqwest::StatusCode::UNAUTHORIZED
            | reqwest::StatusCode::FORBIDDEN
            | reqwest::StatusCode::SERVICE_UNAVAILABLE => 2,
            _ => 1,
        };
    }
    1
}

async fn run(client: &Client, cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Status => cmd_status(client).await,
        Commands::SealStatus => cmd_seal_status(client).await,
        Commands::Init { shares, threshold } => cmd_init(client, shares, threshold).await,
        Commands::Unseal { share } => cmd_unseal(client, &share).await,
        Commands::Connector { action } => cmd_connector(client, action).await,
        Commands::Monitor { action } => cmd_monitor(client, action).await,
    }
}

async fn cmd_status(client: &Client) -> Result<()> {
    let resp = client.get("/v1/sys/health").await?;
    println!();
    header("🩺", "Server Health");
    let status = resp.get("status").and_then(Value::as_str).unwrap_or("unknown");
    kv_line("Status", status);
    println!();
    Ok(())
}

async fn cmd_seal_status(client: &Client) -> Result<()> {
    let resp = client.get("/v1/sys/seal-status").await?;
    println!();
    header("🔐", "Vault Seal Status");
    let initialized = resp.get("initialized").and_then(Value::as_bool).unwrap_or(false);
    let sealed = resp.get("sealed").and_then(Value::as_bool).unwrap_or(true);
    kv_line("Initialized", if initialized { "yes" } else { "no" });
    kv_line("Sealed", if sealed { "yes" } else { "no" });
    if let Some(threshold) = resp.get("threshold").and_then(Value::as_u64) {
        kv_line("Threshold", &threshold.to_string());
    }
    if let Some(shares) = resp.get("shares").and_then(Value::as_u64) {
        kv_line("Shares", &shares.to_string());
    }
    if let Some(progress) = resp.get("progress").and_then(Value::as_u64) {
        kv_line("Unseal progress", &progress.to_string());
    }
    println!();
    Ok(())
}

async fn cmd_init(client: &Client, shares: u8, threshold: u8) -> Result<()> {
    let body = serde_json::json!({ "shares": shares, "threshold": threshold });
    let resp = client.post("/v1/sys/init", &body).await?;
    println!();
    header("🔑", "Vault Initialized");
    if let Some(shares) = resp.get("unseal_shares").and_then(Value::as_array) {
        println!("  {YELLOW}⚠  Store these unseal key shares separately — shown once.{RESET}");
        println!();
        for (i, share) in shares.iter().enumerate() {
            if let Some(s) = share.as_str() {
                kv_line(&format!("Share {}", i + 1), s);
            }
        }
    }
    if let Some(token) = resp.get("root_token").and_then(Value::as_str) {
        println!();
        kv_line("Root token", token);
    }
    println!();
    Ok(())
}

async fn cmd_unseal(client: &Client, share: &str) -> Result<()> {
    let body = serde_json::json!({ "share": share });
    let resp = client.post("/v1/sys/unseal", &body).await?;
    let sealed = resp.get("sealed").and_then(Value::as_bool).unwrap_or(true);
    println!();
    if sealed {
        let threshold = resp.get("threshold").and_then(Value::as_u64).unwrap_or(0);
        let submitted = resp.get("submitted").and_then(Value::as_u64).unwrap_or(0);
        header("🔓", "Unseal Progress");
        kv_line("Submitted", &format!("{submitted}/{threshold}"));
    } else {
        success("Vault unsealed — ready to accept requests.");
    }
    println!();
    Ok(())
}

async fn cmd_connector(client: &Client, action: ConnectorCommands) -> Result<()> {
    match action {
        ConnectorCommands::List => {
            let resp = client.get("/v1/connectors").await?;
            println!();
            header("🔌", "Registered Connectors");
            if let Some(ids) = resp.as_array() {
                if ids.is_empty() {
                    println!("  {DIM}(none registered){RESET}");
                } else {
                    for id in ids {
                        if let Some(s) = id.as_str() {
                            println!("  {CYAN}├─{RESET} {s}");
                        }
                    }
                }
            }
            println!();
        }
        ConnectorCommands::Register {
            id,
            uri,
            username,
            password,
            tls,
            pool_min,
            pool_max,
        } => {
            let body = serde_json::json!({
                "id": id,
                "uri": uri,
                "username": username,
                "password": password,
                "tls": tls,
                "pool_min": pool_min,
                "pool_max": pool_max,
            });
            let resp = client.post("/v1/connectors", &body).await?;
            println!();
            let backend = resp.get("backend").and_then(Value::as_str).unwrap_or("?");
            success(&format!("Connector {BOLD}{id}{RESET} registered ({backend})."));
            println!();
        }
        ConnectorCommands::Schema { id } => {
            let resp = client.get(&format!("/v1/connectors/{id}/schema")).await?;
            println!();
            header("🗂️", &format!("Schema: {id}"));
            println!("{}", serde_json::to_string_pretty(&resp).unwrap_or_default());
            println!();
        }
    }
    Ok(())
}

async fn cmd_monitor(client: &Client, action: MonitorCommands) -> Result<()> {
    match action {
        MonitorCommands::Health => {
            let resp = client.get("/v1/monitor/health").await?;
            println!();
            header("📈", "Connection Health");
            println!("{}", serde_json::to_string_pretty(&resp).unwrap_or_default());
            println!();
        }
        MonitorCommands::Alerts => {
            let resp = client.get("/v1/monitor/alerts").await?;
            println!();
            header("🚨", "Performance Alerts");
            println!("{}", serde_json::to_string_pretty(&resp).unwrap_or_default());
            println!();
        }
    }
    Ok(())
}
