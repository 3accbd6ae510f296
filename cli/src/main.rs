//! chainfilter CLI: watch an Ethereum node through server-side filters.
//!
//! Usage:
//! ```bash
//! # Stream matching logs
//! chainfilter watch --url https://cloudflare-eth.com --address 0xa0b8... --topic 0xddf2...
//!
//! # Stream new block headers
//! chainfilter heads --url https://cloudflare-eth.com
//!
//! # Poll a block filter
//! chainfilter blocks --url https://cloudflare-eth.com
//! ```

mod logging;

use std::env;
use std::future::Future;
use std::path::Path;
use std::process;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chainfilter_core::{BlockTracker, EthQuery, FilterConfig, JsonRpcRequest, PollingBlockTracker, RpcTransport};
use chainfilter_engine::{FilterMiddleware, SubscriptionNotification, Upstream};
use chainfilter_http::HttpRpcClient;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::logging::{init_tracing, LogConfig};

/// Contents of `--config <FILE>`.
#[derive(Debug, Default, Deserialize)]
struct CliConfig {
    #[serde(default)]
    filter: FilterConfig,
    #[serde(default)]
    log: LogConfig,
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "watch" => cmd_watch(&args[2..]).await,
        "heads" => cmd_heads(&args[2..]).await,
        "blocks" => cmd_blocks(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("chainfilter {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("chainfilter {}", env!("CARGO_PKG_VERSION"));
    println!("Watch an Ethereum node through server-side filters\n");
    println!("USAGE:");
    println!("    chainfilter <COMMAND> [FLAGS]\n");
    println!("COMMANDS:");
    println!("    watch      Stream logs matching --address / --topic");
    println!("    heads      Stream new block headers");
    println!("    blocks     Poll a block filter and print new block hashes");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("FLAGS:");
    println!("    --url <URL>            RPC endpoint URL  [required]");
    println!("    --address <ADDR>       Only logs from this contract (watch)");
    println!("    --topic <T|T1,T2|*>    Topic position; repeat per position, '*' for any (watch)");
    println!("    --from-block <BLOCK>   Lower bound for watch (default: latest)");
    println!("    --poll-interval <MS>   Head polling interval");
    println!("    --config <FILE>        JSON file with \"filter\" and \"log\" sections");
    println!("    --log-level <LEVEL>    Log level (default: warn)");
    println!("    --json                 Print raw notification envelopes");
}

// ─── Wiring ──────────────────────────────────────────────────────────────────

struct Session {
    middleware: FilterMiddleware,
    notifications: mpsc::UnboundedReceiver<SubscriptionNotification>,
    config: FilterConfig,
    json: bool,
    // Keeps the polling task alive.
    _tracker: Arc<dyn BlockTracker>,
}

fn load_config(args: &[String]) -> Result<CliConfig> {
    let mut config = match parse_flag(args, "--config") {
        Some(path) => read_config(Path::new(&path))?,
        None => CliConfig::default(),
    };
    if let Some(ms) = parse_flag(args, "--poll-interval") {
        config.filter.poll_interval_ms = ms
            .parse()
            .with_context(|| format!("invalid --poll-interval {ms:?}"))?;
    }
    if let Some(level) = parse_flag(args, "--log-level") {
        config.log.level = level;
    }
    Ok(config)
}

fn read_config(path: &Path) -> Result<CliConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read config file '{}'", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse config file '{}'", path.display()))
}

fn connect(args: &[String]) -> Result<Session> {
    let url = parse_flag(args, "--url").ok_or_else(|| anyhow!("--url is required"))?;
    let config = load_config(args)?;
    init_tracing(&config.log);

    let client: Arc<dyn RpcTransport> = Arc::new(HttpRpcClient::default_for(&url)?);
    let tracker = PollingBlockTracker::spawn(EthQuery::new(client.clone()), &config.filter);
    let upstream = Upstream::new(client, tracker.clone(), config.filter.clone());
    let (middleware, notifications) = FilterMiddleware::new(upstream);
    tracing::info!(%url, "connected");

    Ok(Session {
        middleware,
        notifications,
        config: config.filter,
        json: has_flag(args, "--json"),
        _tracker: tracker,
    })
}

impl Session {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let resp = self.middleware.send(JsonRpcRequest::new(1, method, params)).await?;
        resp.into_result().map_err(|e| anyhow!("{method} failed: {e}"))
    }

    /// Print notifications until Ctrl-C, then tear everything down.
    async fn stream(mut self, render: fn(&Value) -> String) -> Result<()> {
        loop {
            tokio::select! {
                notification = self.notifications.recv() => {
                    let Some(notification) = notification else { break };
                    if self.json {
                        println!("{}", serde_json::to_string(&notification)?);
                    } else {
                        println!("{}", render(&notification.params.result));
                    }
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        self.middleware.destroy().await;
        Ok(())
    }
}

// ─── Commands ────────────────────────────────────────────────────────────────

async fn cmd_watch(args: &[String]) -> Result<()> {
    let params = build_filter_params(args)?;
    let session = connect(args)?;
    let id = session.call("eth_subscribe", vec![json!("logs"), params]).await?;
    eprintln!("Watching logs (subscription {})...", id.as_str().unwrap_or_default());
    session.stream(render_log).await
}

async fn cmd_heads(args: &[String]) -> Result<()> {
    let session = connect(args)?;
    let id = session.call("eth_subscribe", vec![json!("newHeads")]).await?;
    eprintln!("Watching heads (subscription {})...", id.as_str().unwrap_or_default());
    session.stream(render_head).await
}

async fn cmd_blocks(args: &[String]) -> Result<()> {
    let session = connect(args)?;
    run_blocks(&session, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

/// Install a block filter and print its new hashes until `stop` resolves or
/// a poll fails. The filter is uninstalled and the middleware destroyed on
/// every exit.
async fn run_blocks(session: &Session, stop: impl Future<Output = ()>) -> Result<()> {
    let id = session.call("eth_newBlockFilter", vec![]).await?;
    eprintln!("Polling block filter {}...", id.as_str().unwrap_or_default());

    let polled = poll_block_filter(session, &id, stop).await;
    let uninstalled = session.call("eth_uninstallFilter", vec![id]).await;
    session.middleware.destroy().await;
    polled?;
    uninstalled.map(drop)
}

async fn poll_block_filter(session: &Session, id: &Value, stop: impl Future<Output = ()>) -> Result<()> {
    tokio::pin!(stop);
    let mut ticker = tokio::time::interval(session.config.poll_interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let changes = session.call("eth_getFilterChanges", vec![id.clone()]).await?;
                for hash in changes.as_array().into_iter().flatten() {
                    if session.json {
                        println!("{hash}");
                    } else {
                        println!("{}", hash.as_str().unwrap_or_default());
                    }
                }
            }
            _ = &mut stop => return Ok(()),
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn build_filter_params(args: &[String]) -> Result<Value> {
    let mut params = serde_json::Map::new();
    if let Some(from) = parse_flag(args, "--from-block") {
        params.insert("fromBlock".into(), json!(from));
    }
    if let Some(address) = parse_flag(args, "--address") {
        params.insert("address".into(), json!(address));
    }
    let topics: Vec<Value> = parse_flags(args, "--topic")
        .into_iter()
        .map(|t| match t.as_str() {
            "*" | "null" => Value::Null,
            alternatives if alternatives.contains(',') => {
                json!(alternatives.split(',').map(str::trim).collect::<Vec<_>>())
            }
            single => json!(single),
        })
        .collect();
    if !topics.is_empty() {
        params.insert("topics".into(), Value::Array(topics));
    }
    if parse_flag(args, "--topic").is_none() && has_flag(args, "--topic") {
        bail!("--topic needs a value");
    }
    Ok(Value::Object(params))
}

fn render_log(log: &Value) -> String {
    format!(
        "block {} tx {} log {} from {} topics {}",
        log["blockNumber"].as_str().unwrap_or("?"),
        log["transactionHash"].as_str().unwrap_or("?"),
        log["logIndex"].as_str().unwrap_or("?"),
        log["address"].as_str().unwrap_or("?"),
        log["topics"],
    )
}

fn render_head(header: &Value) -> String {
    format!(
        "block {} {} ({} gas used)",
        header["number"].as_str().unwrap_or("?"),
        header["hash"].as_str().unwrap_or("?"),
        header["gasUsed"].as_str().unwrap_or("?"),
    )
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).filter(|v| !v.starts_with("--")).cloned()
}

fn parse_flags(args: &[String], flag: &str) -> Vec<String> {
    args.windows(2)
        .filter(|w| w[0] == flag && !w[1].starts_with("--"))
        .map(|w| w[1].clone())
        .collect()
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}
