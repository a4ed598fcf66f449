//! Manual smoke-test harness: opens one connection, runs the handshake, and
//! issues `ping`. Not a product surface — there is no pooling, retry, or
//! topology awareness here, only enough wiring to exercise the core against
//! a real server by hand.

use std::sync::Arc;

use clap::Parser;
use uuid::Uuid;

use mongo_core::auth::{Credential, CredentialWithCache, Mechanism};
use mongo_core::compression::{CompressorList, SnappyCompressor, ZlibCompressor, ZstdCompressor};
use mongo_core::config::{ConnectionSettings, TlsSettings};
use mongo_core::connection::factory::InternalConnectionFactory;
use mongo_core::identity::{ServerAddress, ServerId};
use mongo_core::stream::OperationContext;

#[derive(Debug, Parser)]
#[command(name = "mongo-core-probe", version, about = "Manual smoke test for mongo-core")]
struct Cli {
    /// Server address, host:port or a .sock path
    #[arg(long, env = "MONGO_CORE_ADDRESS", default_value = "127.0.0.1:27017")]
    address: String,

    /// Log level or filter spec (e.g. info or mongo_core=debug)
    #[arg(long, env = "MONGO_CORE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Username for SCRAM/PLAIN authentication
    #[arg(long, env = "MONGO_CORE_USERNAME")]
    username: Option<String>,

    /// Password for SCRAM/PLAIN authentication
    #[arg(long, env = "MONGO_CORE_PASSWORD")]
    password: Option<String>,

    /// Authentication source database
    #[arg(long, env = "MONGO_CORE_AUTH_SOURCE", default_value = "admin")]
    auth_source: String,

    /// Enable TLS
    #[arg(long, env = "MONGO_CORE_TLS")]
    tls: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let filter_spec = cli
        .log_level
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter_spec))
        .compact()
        .init();

    let address = ServerAddress::parse(&cli.address)
        .ok_or_else(|| anyhow::anyhow!("invalid address {}", cli.address))?;
    let server_id = ServerId::new(Uuid::new_v4(), address);

    let settings = ConnectionSettings::default();
    settings.validate()?;
    let tls = TlsSettings {
        enabled: cli.tls,
        ..TlsSettings::default()
    };

    let compressors = CompressorList::new(vec![
        Box::new(ZstdCompressor::default()),
        Box::new(SnappyCompressor),
        Box::new(ZlibCompressor::default()),
    ]);

    let credential = cli.username.map(|username| {
        CredentialWithCache::new(Credential {
            mechanism: Mechanism::Default,
            source: cli.auth_source,
            username: Some(username),
            password: cli.password,
            mechanism_properties: Vec::new(),
        })
    });

    let factory = InternalConnectionFactory::new(tls, Arc::new(compressors), credential);
    let pool = mongo_core::buffer::BufferPool::new();
    let ctx = OperationContext::new(settings.connect_timeout(), settings.read_timeout(), pool);

    tracing::info!(address = %server_id.address, "opening connection");
    let mut connection = factory.open(server_id, &ctx).await?;
    connection.initialize().await?;
    tracing::info!(description = ?connection.description(), "handshake complete");

    let reply = connection.send_and_receive("admin", bson::doc! { "ping": 1 }).await?;
    tracing::info!(?reply, "ping succeeded");

    connection.close().await;
    Ok(())
}
