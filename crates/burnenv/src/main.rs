use std::io::{IsTerminal, Read, Write};

use anyhow::{Context, Result};
use burnenv_server::envelope::{self, Envelope, EnvelopeError};
use burnenv_server::store::unix_now;
use clap::{Parser, Subcommand};
use dialoguer::Password;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "burnenv",
    about = "BurnEnv — secrets that self-destruct. Encrypted locally; the server never sees plaintext.",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the BurnEnv HTTP server (in-memory only: restart loses all data)
    Serve {
        /// Port to listen on
        #[arg(long, env = "BURNENV_PORT", default_value = "8080")]
        port: u16,
        /// Host to bind
        #[arg(long, env = "BURNENV_HOST", default_value = "0.0.0.0")]
        host: String,
        /// Base URL for generated links (default: http://localhost:<port>)
        #[arg(long, env = "BURNENV_BASE_URL")]
        base_url: Option<String>,
    },
    /// Encrypt a secret read from stdin and print its burn link
    Create {
        /// Server base URL
        #[arg(long, env = "BURNENV_SERVER", default_value = "http://localhost:8080")]
        server: String,
        /// Time until the secret burns, e.g. 3m, 1h
        #[arg(long, default_value = "3m")]
        ttl: String,
        /// Successful retrievals allowed before the secret burns
        #[arg(long, default_value_t = 1)]
        max_views: u32,
        /// Password (prefer $BURNENV_PASSWORD or the prompt over the flag)
        #[arg(long, env = "BURNENV_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Retrieve, decrypt and burn a secret; plaintext goes to stdout
    Open {
        /// Burn link printed by `create`
        link: String,
        #[arg(long, env = "BURNENV_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Destroy a secret before anyone retrieves it
    Revoke {
        /// Burn link printed by `create`
        link: String,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_env("BURNENV_LOG_LEVEL")
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Serve {
            port,
            host,
            base_url,
        } => cmd_serve(host, port, base_url).await,

        Commands::Create {
            server,
            ttl,
            max_views,
            password,
            json,
        } => cmd_create(&server, &ttl, max_views, password, json).await,

        Commands::Open { link, password } => cmd_open(&link, password).await,

        Commands::Revoke { link } => cmd_revoke(&link).await,
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(host: String, port: u16, base_url: Option<String>) -> Result<()> {
    let cfg = burnenv_server::ServerConfig {
        host,
        port,
        base_url,
        ..Default::default()
    };
    burnenv_server::run(cfg).await
}

#[derive(Deserialize)]
struct CreateResponse {
    id: String,
    link: String,
}

async fn cmd_create(
    server: &str,
    ttl: &str,
    max_views: u32,
    password: Option<String>,
    json: bool,
) -> Result<()> {
    let ttl_seconds = parse_duration(ttl)?;
    if max_views == 0 {
        anyhow::bail!("--max-views must be at least 1");
    }

    let secret = read_secret()?;
    if secret.is_empty() {
        anyhow::bail!("secret cannot be empty");
    }
    let password = resolve_password(password, true)?;

    // Argon2id at 64 MiB is too heavy for the async executor.
    let sealed = tokio::task::spawn_blocking(move || envelope::seal(&secret, &password))
        .await
        .context("seal task panicked")??;
    let expiry = unix_now() + ttl_seconds as i64;
    let body = sealed.with_lifecycle(expiry, max_views).to_json()?;

    let url = format!("{}/v1/drop", server.trim_end_matches('/'));
    debug!(%url, expiry, max_views, "uploading sealed envelope");
    let resp = Client::new()
        .post(&url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .context("HTTP request failed")?;

    if resp.status() != StatusCode::CREATED {
        let status = resp.status();
        let json: Value = resp.json().await.unwrap_or_default();
        anyhow::bail!(
            "server returned {status}: {}",
            json["error"].as_str().unwrap_or("")
        );
    }
    let created: CreateResponse = resp.json().await.context("parse create response")?;

    if json {
        let out = serde_json::json!({
            "id": created.id,
            "link": created.link,
            "ttl_seconds": ttl_seconds,
            "max_views": max_views,
        });
        println!("{out}");
    } else {
        eprintln!("✓ Secret encrypted. Burn link:");
        println!("{}", created.link);
        eprintln!(
            "Expires in {} | Max views: {max_views}",
            humantime::format_duration(std::time::Duration::from_secs(ttl_seconds))
        );
    }
    Ok(())
}

async fn cmd_open(link: &str, password: Option<String>) -> Result<()> {
    require_http_link(link)?;

    debug!(%link, "fetching envelope");
    let resp = Client::new()
        .get(link)
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    if !status.is_success() {
        let json: Value = resp.json().await.unwrap_or_default();
        anyhow::bail!(
            "server returned {status}: {}",
            json["error"].as_str().unwrap_or("")
        );
    }
    let blob = resp.bytes().await.context("read response body")?;
    let sealed = Envelope::from_json(&blob).context("incomplete payload from server")?;

    let password = resolve_password(password, false)?;
    let plaintext = tokio::task::spawn_blocking(move || envelope::open(&sealed, &password))
        .await
        .context("open task panicked")?
        .map_err(|e| match e {
            EnvelopeError::AuthFailure => anyhow::anyhow!(
                "decryption failed: wrong password or corrupted data (the view was still spent)"
            ),
            other => other.into(),
        })?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&plaintext).context("write plaintext")?;
    if std::io::stdout().is_terminal() {
        writeln!(stdout)?;
    }
    Ok(())
}

async fn cmd_revoke(link: &str) -> Result<()> {
    require_http_link(link)?;

    debug!(%link, "revoking");
    let resp = Client::new()
        .delete(link)
        .send()
        .await
        .context("HTTP request failed")?;

    match resp.status() {
        StatusCode::OK => eprintln!("🧨 Secret revoked and burned."),
        StatusCode::NOT_FOUND => eprintln!("Nothing to revoke: already burned or never existed."),
        status => {
            let json: Value = resp.json().await.unwrap_or_default();
            anyhow::bail!(
                "server returned {status}: {}",
                json["error"].as_str().unwrap_or("")
            );
        }
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Parse human duration strings like "3m", "1h", "90s" into seconds.
fn parse_duration(s: &str) -> Result<u64> {
    let d: humantime::Duration = s
        .parse()
        .with_context(|| format!("invalid duration: {s}"))?;
    Ok(d.as_secs())
}

fn require_http_link(link: &str) -> Result<()> {
    if link.starts_with("http://") || link.starts_with("https://") {
        Ok(())
    } else {
        anyhow::bail!("expected an http(s) burn link, got: {link}")
    }
}

/// Read the secret from piped stdin, dropping one trailing newline.
fn read_secret() -> Result<Vec<u8>> {
    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        eprintln!("Secret (end with Ctrl+D):");
    }
    let mut data = Vec::new();
    stdin.read_to_end(&mut data).context("read secret from stdin")?;
    Ok(strip_trailing_newline(data))
}

fn strip_trailing_newline(mut data: Vec<u8>) -> Vec<u8> {
    if data.last() == Some(&b'\n') {
        data.pop();
        if data.last() == Some(&b'\r') {
            data.pop();
        }
    }
    data
}

/// Password from flag or `BURNENV_PASSWORD`, else a hidden prompt.
fn resolve_password(given: Option<String>, confirm: bool) -> Result<String> {
    if let Some(pw) = given.filter(|p| !p.is_empty()) {
        return Ok(pw);
    }
    let mut prompt = Password::new().with_prompt("Password");
    if confirm {
        prompt = prompt.with_confirmation("Confirm password", "Passwords do not match");
    }
    let pw = prompt
        .interact()
        .map_err(|e| anyhow::anyhow!("failed to read password: {e}"))?;
    if pw.is_empty() {
        anyhow::bail!("password cannot be empty");
    }
    Ok(pw)
}
