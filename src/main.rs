use clap::Parser;
use ext_host::config::{Args, HostConfig};
use ext_host::extensions::StaticEntryPointLoader;
use ext_host::host::{ExtensionHost, RpcHostSink};
use ext_host::io::{RealFileSystem, StreamTransport};
use ext_host::logging::{LogConfig, init_logging};
use ext_host::rpc::{RpcConnection, RpcHandler};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging with configuration from env vars and CLI args
    let log_config = LogConfig::from_env().with_overrides(args.log_level.clone(), args.log_file.clone());

    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let config = match HostConfig::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to resolve workspace root: {e}");
            std::process::exit(1);
        }
    };

    info!(
        "Starting extension host for {} ({} extension dir(s), storage {})",
        config.workspace_root.display(),
        config.extension_dirs.len(),
        config.storage_dir.display()
    );

    // stdout carries the RPC stream; logs go to stderr or a file
    let (connection, incoming) = RpcConnection::new(StreamTransport::stdio());
    let sink = Arc::new(RpcHostSink::new(Arc::clone(&connection)));

    let host = ExtensionHost::new(
        &config,
        Arc::new(StaticEntryPointLoader::new()),
        sink,
        Arc::new(RealFileSystem),
    )
    .await?;

    let active = host.start().await;
    info!("Active extensions: {:?}", active);

    let handler: Arc<dyn RpcHandler> = host.clone();
    connection.serve(incoming, handler).await;

    info!("Shell disconnected, shutting down");
    host.shutdown().await;
    Ok(())
}
