//! raft-node: a standalone binary wiring `raft-core` to a UDP transport and
//! a WAL-backed store.

use clap::Parser;
use raft_core::config::Tunables;
use raft_core::{ClusterConfig, FileStorage, NodeActor, NodeState, Storage, UdpTransport};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{self, BufRead};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Standalone replicated-log node.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// This node's logical cluster address (must match an entry in --peer / config).
    #[arg(long)]
    self_addr: Option<String>,

    /// Local UDP socket address to bind, e.g. 127.0.0.1:9990.
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Other cluster members as `addr=host:port`, repeatable.
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Directory for the write-ahead log.
    #[arg(long, default_value = "./raft-data")]
    data_dir: PathBuf,

    /// JSON config file; overrides --self-addr/--bind/--peer when present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    self_addr: String,
    bind: SocketAddr,
    peers: HashMap<String, SocketAddr>,
    #[serde(default)]
    tunables: Option<Tunables>,
    #[serde(default = "default_data_dir")]
    data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./raft-data")
}

struct ResolvedConfig {
    self_addr: String,
    bind: SocketAddr,
    peers: HashMap<String, SocketAddr>,
    tunables: Tunables,
    data_dir: PathBuf,
}

fn resolve_config(args: &Args) -> Result<ResolvedConfig, Box<dyn std::error::Error>> {
    if let Some(path) = &args.config {
        let data = std::fs::read_to_string(path)?;
        let file: ConfigFile = serde_json::from_str(&data)?;
        return Ok(ResolvedConfig {
            self_addr: file.self_addr,
            bind: file.bind,
            peers: file.peers,
            tunables: file.tunables.unwrap_or_default(),
            data_dir: file.data_dir,
        });
    }

    let self_addr = args
        .self_addr
        .clone()
        .ok_or("--self-addr is required when --config is not given")?;
    let bind = args.bind.ok_or("--bind is required when --config is not given")?;

    let mut peers = HashMap::new();
    for entry in &args.peers {
        let (addr, sock) = entry
            .split_once('=')
            .ok_or_else(|| format!("invalid --peer entry (expected addr=host:port): {entry}"))?;
        peers.insert(addr.to_string(), sock.parse::<SocketAddr>()?);
    }

    Ok(ResolvedConfig {
        self_addr,
        bind,
        peers,
        tunables: Tunables::default(),
        data_dir: args.data_dir.clone(),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let resolved = resolve_config(&args)?;
    info!(self_addr = %resolved.self_addr, bind = %resolved.bind, "raft-node starting");

    let mut cluster_addrs: Vec<String> = resolved.peers.keys().cloned().collect();
    cluster_addrs.push(resolved.self_addr.clone());
    let cluster = ClusterConfig::new(resolved.self_addr.clone(), cluster_addrs)
        .with_tunables(resolved.tunables);

    let storage = FileStorage::open(&resolved.data_dir)?;
    let recovered = storage.load()?;
    let state = NodeState::from_recovered(cluster, recovered);

    let transport = UdpTransport::bind(resolved.bind, resolved.peers).await?;

    let (handle, mut apply_rx) = NodeActor::spawn(state, storage, transport);

    tokio::spawn(async move {
        while let Some(entry) = apply_rx.recv().await {
            info!(term = entry.term, bytes = entry.command.len(), "applying committed entry");
        }
    });

    let mut watch_handle = handle.clone();
    tokio::spawn(async move {
        loop {
            if watch_handle.changed().await.is_err() {
                break;
            }
            let snap = watch_handle.current_snapshot();
            info!(
                role = ?snap.role,
                term = snap.current_term,
                leader = ?snap.leader,
                commit_index = snap.commit_index,
                "state changed"
            );
        }
    });

    println!("Commands: submit <text> | state | quit");
    let (line_tx, mut line_rx) = tokio::sync::mpsc::channel::<String>(16);
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines().flatten() {
            if line_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    while let Some(line) = line_rx.recv().await {
        let mut parts = line.trim().splitn(2, ' ');
        match parts.next() {
            Some("submit") => {
                let payload = parts.next().unwrap_or("").as_bytes().to_vec();
                let accepted = handle.submit_command(payload).await;
                if accepted {
                    println!("accepted");
                } else {
                    let leader = handle.current_snapshot().leader;
                    println!("not leader, current leader: {leader:?}");
                }
            }
            Some("state") => {
                let snap = handle.current_snapshot();
                println!(
                    "role={:?} term={} leader={:?} commit_index={}",
                    snap.role, snap.current_term, snap.leader, snap.commit_index
                );
            }
            Some("quit") | Some("exit") => break,
            _ => println!("unknown command"),
        }
    }

    Ok(())
}
