//! IDMEFv2 connector: binary entrypoint.
//!
//! Loads the TOML configuration, builds the connector for the configured
//! source tool and runs its input driver until Ctrl-C.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use idmefv2_connectors::client::{AlertSink, Idmefv2Client};
use idmefv2_connectors::config::Config;
use idmefv2_connectors::connectors::kismet::KismetSource;
use idmefv2_connectors::connectors::prometheus::PrometheusSource;
use idmefv2_connectors::connectors::zabbix::{ZabbixApi, ZabbixPoller, ZabbixPush};
use idmefv2_connectors::connectors::{kismet, prometheus, zabbix, ConnectorKind, InputMode};
use idmefv2_connectors::driver::poll::{Poller, PollerCfg};
use idmefv2_connectors::driver::tail::TailCfg;
use idmefv2_connectors::driver::{push, socket, tail, ConnectorContext};
use idmefv2_connectors::metrics::Metrics;
use idmefv2_connectors::sighting::SightingCache;

type Task = Pin<Box<dyn Future<Output = Result<()>>>>;

#[derive(Parser, Debug)]
#[command(name = "idmefv2-connector", version, about = "Normalize tool alerts into IDMEFv2")]
struct Cli {
    /// Configuration file (TOML).
    #[arg(short = 'c', long = "conf", env = "IDMEFV2_CONNECTOR_CONF")]
    conf: PathBuf,

    /// Log filter, overrides [logging].level (RUST_LOG still wins).
    #[arg(long)]
    log_level: Option<String>,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.conf)?;
    init_tracing(cli.log_level.as_deref().unwrap_or(&cfg.logging.level));

    let kind = cfg.connector.kind;
    let mode = cfg.mode();
    tracing::info!(connector = %kind, %mode, collector = %cfg.idmefv2.url, "starting connector");

    let metrics = Metrics::init(kind.name())?;
    let converter = kind.converter(mode, cfg.connector.template.as_deref())?;
    let sink: Arc<dyn AlertSink> = Arc::new(
        Idmefv2Client::new(cfg.idmefv2.url.clone()).with_timeout(cfg.idmefv2.timeout_secs),
    );
    let ctx = ConnectorContext::new(kind.name(), converter, sink);

    let connector = build_driver(&cfg, ctx, &metrics).await?;
    let metrics_server: Task = match cfg.metrics.listen {
        Some(addr) => Box::pin(async move { metrics.serve(addr).await }),
        None => Box::pin(std::future::pending()),
    };

    tokio::select! {
        r = connector => r,
        r = metrics_server => r,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
            Ok(())
        }
    }
}

async fn build_driver(cfg: &Config, ctx: ConnectorContext, metrics: &Metrics) -> Result<Task> {
    let kind = cfg.connector.kind;
    let task: Task = match cfg.mode() {
        InputMode::Tail => {
            let path = cfg
                .connector
                .logfile
                .clone()
                .context("mode tail needs [connector].logfile")?;
            Box::pin(tail::run(ctx, TailCfg::new(path)))
        }
        InputMode::Socket => {
            let path = cfg
                .connector
                .unixsocket
                .as_deref()
                .context("mode socket needs [connector].unixsocket")?;
            Box::pin(socket::serve(socket::bind(path)?, ctx))
        }
        InputMode::Push => {
            let ctx = match kind {
                ConnectorKind::Zabbix => ctx.with_enricher(Arc::new(ZabbixPush::new(zabbix_api(cfg).await?))),
                _ => ctx,
            };
            let router = push::router(ctx).merge(metrics.router());
            Box::pin(push::serve(cfg.push_addr()?, router))
        }
        InputMode::Poll => build_poller(cfg, ctx).await?,
    };
    Ok(task)
}

async fn build_poller(cfg: &Config, ctx: ConnectorContext) -> Result<Task> {
    let poller_cfg = PollerCfg {
        interval: cfg.poll.interval(),
        seed: !cfg.poll.disable_seeding,
    };
    let url = cfg.poll.url.clone().unwrap_or_default();

    let task: Task = match cfg.connector.kind {
        ConnectorKind::Prometheus => {
            let cache = SightingCache::new(&prometheus::sighting())?;
            let poller = Poller::new(PrometheusSource::new(&url), cache, ctx, poller_cfg);
            Box::pin(async move {
                poller.run().await;
                Ok(())
            })
        }
        ConnectorKind::Kismet => {
            let mut source = KismetSource::new(url);
            if let Some(user) = &cfg.poll.username {
                source = source.with_basic_auth(user, cfg.poll.password.clone().unwrap_or_default());
            }
            let cache = SightingCache::new(&kismet::sighting(cfg.poll.fuzzy_window()))?;
            let poller = Poller::new(source, cache, ctx, poller_cfg);
            Box::pin(async move {
                poller.run().await;
                Ok(())
            })
        }
        ConnectorKind::Zabbix => {
            let source = ZabbixPoller::new(zabbix_api(cfg).await?);
            let ctx = ctx.with_enricher(Arc::new(source.clone()));
            let cache = SightingCache::new(&zabbix::sighting())?;
            let poller = Poller::new(source, cache, ctx, poller_cfg);
            Box::pin(async move {
                poller.run().await;
                Ok(())
            })
        }
        other => bail!("connector {other} cannot poll"),
    };
    Ok(task)
}

async fn zabbix_api(cfg: &Config) -> Result<Arc<ZabbixApi>> {
    let z = cfg.zabbix.as_ref().context("zabbix connector needs a [zabbix] section")?;
    let api = ZabbixApi::new(z.url.clone(), z.user.clone(), z.password.clone()).await?;
    api.login().await.context("Zabbix login")?;
    Ok(Arc::new(api))
}
