use std::net::IpAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use metrics_exporter_prometheus::PrometheusBuilder;
use miniservice::{Endpoint, MiniService, Registry, Resolver, ServiceConfig, tag};
use miniservice_registry::{ConsulConfig, ConsulRegistry, SqliteRegistry};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "miniservice")]
#[command(about = "Publish, inspect and resolve miniservice instances", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Registry backend
    #[arg(long, env = "MINISERVICE_REGISTRY", value_enum, default_value_t = Backend::Consul)]
    registry: Backend,

    /// Consul agent address (host:port or URL)
    #[arg(long, env = "CONSUL_HTTP_ADDR")]
    consul_addr: Option<String>,

    /// SQLite registry file
    #[arg(long, env = "MINISERVICE_DB", default_value = "miniservice.db")]
    db: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Consul,
    Sqlite,
}

#[derive(Subcommand)]
enum Commands {
    /// Discovery tag encoding
    Tag {
        #[command(subcommand)]
        sub: TagCommands,
    },
    /// Resolve an instance to its RPC endpoint
    Resolve {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
    },
    /// List the instances registered under a name
    List {
        #[arg(long)]
        name: String,
    },
    /// Run an instance with a health probe until interrupted
    Serve {
        #[arg(long)]
        name: String,
        /// Instance id, generated when omitted
        #[arg(long)]
        id: Option<String>,
        /// Host to publish instead of the detected one
        #[arg(long, env = "MINISERVICE_ADVERTISE_HOST")]
        advertise_host: Option<String>,
        #[arg(long, default_value = "0.0.0.0")]
        bind: IpAddr,
        #[arg(long, default_value = "2s")]
        check_interval: String,
        #[arg(long, default_value = "2s")]
        check_timeout: String,
    },
    /// Remove an instance from the registry
    Deregister {
        #[arg(long)]
        id: String,
    },
}

#[derive(Subcommand)]
enum TagCommands {
    Encode {
        #[arg(long)]
        host: String,
        #[arg(long)]
        port: u16,
    },
    Decode {
        tag: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Tag { sub } => match sub {
            TagCommands::Encode { host, port } => {
                println!("{}", tag::encode(&Endpoint::new(host, port)));
            }
            TagCommands::Decode { tag: raw } => {
                let endpoint = tag::decode(&raw)?;
                println!("{:<20} {}", "Host:", endpoint.host);
                println!("{:<20} {}", "Port:", endpoint.port);
            }
        },
        Commands::Resolve { id, name } => {
            let resolver = Resolver::new(open_registry(cli.registry, cli.consul_addr, &cli.db)?);
            let endpoint = resolver.resolve(&id, &name).await?;
            println!("{endpoint}");
        }
        Commands::List { name } => {
            let registry = open_registry(cli.registry, cli.consul_addr, &cli.db)?;
            let entries = registry.list_services(&name).await?;

            println!("Instances of {name}:");
            println!("{:<38} {:<24} {:<10}", "ID", "RPC Endpoint", "Probe");
            println!("{}", "-".repeat(72));
            for entry in entries {
                let rpc = match entry.discovery_tag().map(tag::decode) {
                    Some(Ok(endpoint)) => endpoint.to_string(),
                    Some(Err(_)) => "<malformed tag>".to_string(),
                    None => "<no tag>".to_string(),
                };
                println!("{:<38} {:<24} {:<10}", entry.service_id, rpc, entry.service_port);
            }
        }
        Commands::Serve {
            name,
            id,
            advertise_host,
            bind,
            check_interval,
            check_timeout,
        } => {
            let registry = open_registry(cli.registry, cli.consul_addr, &cli.db)?;
            let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let config = ServiceConfig {
                bind_address: bind,
                advertise_host,
                check_interval,
                check_timeout,
                ..Default::default()
            };

            let mut service = MiniService::new(id, name, registry).with_config(config);
            match PrometheusBuilder::new().install_recorder() {
                Ok(handle) => service = service.with_metrics(handle),
                Err(e) => tracing::warn!("metrics disabled: {}", e),
            }

            tracing::info!(id = %service.identity().id, name = %service.identity().name, "starting");
            service.listen_until(shutdown_signal()).await?;
        }
        Commands::Deregister { id } => {
            let registry = open_registry(cli.registry, cli.consul_addr, &cli.db)?;
            registry.deregister(&id).await?;
            println!("Instance deregistered: {id}");
        }
    }

    Ok(())
}

fn open_registry(
    backend: Backend,
    consul_addr: Option<String>,
    db: &str,
) -> Result<Arc<dyn Registry>, Box<dyn std::error::Error>> {
    Ok(match backend {
        Backend::Consul => {
            let mut config = ConsulConfig::from_env();
            if let Some(address) = consul_addr {
                config.address = address;
            }
            Arc::new(ConsulRegistry::new(config)?)
        }
        Backend::Sqlite => Arc::new(SqliteRegistry::open(db)?),
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}
