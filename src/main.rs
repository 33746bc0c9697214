use anyhow::{Context, Result};
use clap::{Arg, Command};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fabric_dispatcher::{Broadcaster, LoadBalancer, MachineMapServer, SocketRouter};
use fabric_domain::{BalancerConfig, RouterConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("fabric")
        .version("1.0.0")
        .about("自托管任务分发网格")
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["balancer", "broadcast", "machine-map"])
                .default_value("balancer"),
        )
        .arg(
            Arg::new("address")
                .short('a')
                .long("address")
                .value_name("ADDR")
                .help("对外通告的本机地址")
                .default_value("127.0.0.1"),
        )
        .arg(
            Arg::new("client-port")
                .long("client-port")
                .value_name("PORT")
                .help("客户端侧端口")
                .default_value("8765"),
        )
        .arg(
            Arg::new("worker-port")
                .long("worker-port")
                .value_name("PORT")
                .help("worker侧端口 (balancer模式)")
                .default_value("8766"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .default_value("info"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"])
                .default_value("pretty"),
        )
        .get_matches();

    let log_level = matches
        .get_one::<String>("log-level")
        .map(String::as_str)
        .unwrap_or("info");
    let log_format = matches
        .get_one::<String>("log-format")
        .map(String::as_str)
        .unwrap_or("pretty");
    init_logging(log_level, log_format)?;

    let mode = matches
        .get_one::<String>("mode")
        .map(String::as_str)
        .unwrap_or("balancer")
        .to_string();
    let address = matches
        .get_one::<String>("address")
        .map(String::as_str)
        .unwrap_or("127.0.0.1")
        .to_string();
    let client_port: u16 = matches
        .get_one::<String>("client-port")
        .map(String::as_str)
        .unwrap_or("8765")
        .parse()
        .context("客户端端口无效")?;
    let worker_port: u16 = matches
        .get_one::<String>("worker-port")
        .map(String::as_str)
        .unwrap_or("8766")
        .parse()
        .context("worker端口无效")?;

    info!("Starting fabric in {} mode", mode);

    match mode.as_str() {
        "balancer" => {
            let config = BalancerConfig {
                address: address.clone(),
                client_port,
                worker_port,
                router: RouterConfig::default(),
            };
            let balancer = LoadBalancer::bind(config).await?;
            balancer.run().await?;
            wait_for_shutdown().await;
        }
        "broadcast" => {
            let broadcaster = Broadcaster::bind(client_port, RouterConfig::default()).await?;
            tokio::select! {
                result = broadcaster.run() => { result?; }
                _ = wait_for_shutdown() => {}
            }
        }
        "machine-map" => {
            let router = std::sync::Arc::new(
                SocketRouter::bind(
                    "Machine Map",
                    &format!("0.0.0.0:{client_port}"),
                    "mapEvent",
                    RouterConfig::default(),
                )
                .await?,
            );
            let server = MachineMapServer::new(router);
            tokio::select! {
                result = server.run() => { result?; }
                _ = wait_for_shutdown() => {}
            }
        }
        other => anyhow::bail!("未知运行模式: {other}"),
    }

    info!("fabric shut down");
    Ok(())
}

fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    } else {
        info!("Received shutdown signal");
    }
}
