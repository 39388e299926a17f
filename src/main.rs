//! The `baton` server.
//!
//! Run with:
//!   cargo run -- --port 8080 --verbose
//!
//! Try:
//!   curl http://localhost:8080/                      # public.index
//!   curl 'http://localhost:8080/public/index?terrain=ocean'
//!   curl -X POST http://localhost:8080/upgrade       # hand the socket to a new process
//!   curl http://localhost:8080/readyz

mod controllers;

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use baton::config::{Cli, Settings};
use baton::handoff::{self, ExecHandoff, Readiness};
use baton::{
    health, restart, ActionRegistry, Dispatcher, Method, RestartCoordinator, Router, Server,
    TrackedListener,
};

use controllers::{Base, Generator, Public, View};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Slots 3 and 4 must be claimed before the runtime opens descriptors of
    // its own.
    let inherited = if cli.inherit {
        Some(handoff::inherit().context("claiming the inherited listener")?)
    } else {
        None
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_directive()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = Settings::load(cli.config.as_deref()).context("loading site settings")?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting the runtime")?
        .block_on(run(cli, settings, inherited))
}

async fn run(
    cli: Cli,
    settings: Settings,
    inherited: Option<(std::net::TcpListener, Readiness)>,
) -> anyhow::Result<()> {
    let (listener, readiness) = match inherited {
        Some((listener, readiness)) => {
            let listener = TrackedListener::from_std(listener)
                .context("adopting the inherited listener")?;
            info!(pid = std::process::id(), addr = %listener.local_addr(), "inherited listener");
            (listener, Some(readiness))
        }
        None => {
            let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, cli.port));
            let listener = TrackedListener::bind(addr)
                .await
                .with_context(|| format!("binding {addr}"))?;
            (listener, None)
        }
    };

    let view = View::new("Planet generator");
    let registry = ActionRegistry::builder(Base::new(view.clone()))
        .controller("public", Public::new(view, Generator::default()))
        .build()
        .context("building the action table")?;
    let dispatcher = Dispatcher::new(registry);
    debug!("action map:\n{}", dispatcher.action_map());

    let server = Server::new(listener).header_read_timeout(settings.site.header_read_timeout());
    let restarts = RestartCoordinator::new(
        server.handle(),
        ExecHandoff::current_exe(cli.successor_args()).context("locating the executable")?,
    );

    let restart_path = settings.site.restart_path.as_str();
    let app = Router::new()
        .mount(dispatcher, settings.site.root.as_deref())
        .on(Method::Get,  "/healthz",    health::liveness)
        .on(Method::Get,  "/readyz",     health::readiness(server.handle()))
        .try_on(Method::Get, restart_path, restart::endpoint(Arc::clone(&restarts)))
        .and_then(|app| app.try_on(Method::Post, restart_path, restart::endpoint(restarts)))
        .with_context(|| format!("registering the restart endpoint at {restart_path}"))?;

    if let Some(readiness) = readiness {
        readiness.notify().context("acknowledging readiness")?;
    }

    server.serve(app).await.context("serving")
}
