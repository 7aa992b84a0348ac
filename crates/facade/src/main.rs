mod config;

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use common::Outbound;
use log::{info, warn};
use socks::SocksServer;
use tokio::task::JoinSet;
use vmess::{
    AuthCache, Clock, EndpointSelector, SystemClock, VmessOutbound, VmessServer, SWEEP_INTERVAL,
};

use crate::config::Config;

#[derive(Debug, Parser)]
#[command(version, about = "SOCKS5 and VMess proxy")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;

    env_logger::Builder::new()
        .parse_filters(&config.log_level)
        .parse_default_env()
        .init();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut servers = JoinSet::new();

    let outbound = match &config.vmess_outbound {
        Some(vmess) => {
            let selector = EndpointSelector::new(Arc::clone(&clock), vmess.endpoints()?);
            info!("routing through {} vmess servers", selector.len());
            Outbound::Vmess(Arc::new(VmessOutbound::new(
                Arc::new(selector),
                Arc::clone(&clock),
            )))
        }
        None => Outbound::Direct,
    };

    let mut cache = None;
    if let Some(inbound) = &config.vmess_inbound {
        let auth = Arc::new(AuthCache::spawn(Arc::clone(&clock), SWEEP_INTERVAL));
        for user in &inbound.users {
            auth.add(user.identity())?;
        }
        info!("registered {} vmess users", auth.len());
        let server = VmessServer::bind(inbound.listen, Arc::clone(&auth)).await?;
        servers.spawn(server.serve());
        cache = Some(auth);
    }

    if let Some(socks) = &config.socks {
        let server = SocksServer::bind(socks.listen, Arc::new(outbound)).await?;
        servers.spawn(server.serve());
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
        Some(result) = servers.join_next() => {
            if let Err(e) = result? {
                warn!("server stopped: {}", e);
                return Err(e.into());
            }
        }
    }

    servers.shutdown().await;
    if let Some(Ok(mut cache)) = cache.map(Arc::try_unwrap) {
        cache.shutdown().await;
    }
    Ok(())
}
