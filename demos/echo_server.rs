//! Echo server.
//!
//! Demonstrates:
//! - Building an engine with custom heartbeat timings
//! - Serving it on a TCP port
//! - Echoing every message back on the same session
//! - Logging upgrades and closes
//!
//! Usage:
//!   cargo run --example echo_server
//!   cargo run --example echo_server -- --debug
//!   cargo run --example echo_server -- --port 4000

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use engine_io_server::{
    HttpServer, Server, ServerEvent, ServerOptions, Session, SessionEvent,
};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Args
// ============================================================================

#[derive(Debug, Clone)]
struct Args {
    debug: bool,
    port: u16,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let port = args
            .iter()
            .position(|a| a == "--port")
            .and_then(|i| args.get(i + 1))
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);
        Self {
            debug: args.iter().any(|a| a == "--debug"),
            port,
        }
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "engine_io_server=debug"
    } else {
        "engine_io_server=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let engine = Server::builder()
        .options(
            ServerOptions::new()
                .with_ping_interval(Duration::from_secs(10))
                .with_ping_timeout(Duration::from_secs(5))
                .with_allow_eio3(true),
        )
        .build()
        .context("invalid engine options")?;

    let mut events = engine.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ServerEvent::Connection(session) => {
                    tokio::spawn(echo(session));
                }
                ServerEvent::ConnectionError(error) => {
                    println!("[Rejected] {} ({:?})", error.message, error.context);
                }
                ServerEvent::Close => break,
            }
        }
    });

    let listener = HttpServer::bind(("127.0.0.1", args.port))
        .await
        .with_context(|| format!("cannot bind port {}", args.port))?;
    println!("Listening on http://127.0.0.1:{}/engine.io/", args.port);
    println!("Press Ctrl+C to exit...");

    HttpServer::new(engine)
        .serve(listener, async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;
    Ok(())
}

async fn echo(session: Arc<Session>) {
    let Some(mut events) = session.events() else {
        return;
    };
    println!("[{}] connected over {}", session.sid(), session.transport_kind());

    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Message(data) => session.send(data),
            SessionEvent::Upgrade(kind) => println!("[{}] upgraded to {kind}", session.sid()),
            SessionEvent::Close { reason, description } => {
                println!("[{}] closed: {reason} {description:?}", session.sid());
                break;
            }
            _ => {}
        }
    }
}
