mod cli;

use crate::cli::SecureProxyArguments;
use anyhow::Result;
use clap::Parser;
use log::{LevelFilter, info, trace};
use secureproxy::{config::Config, proxy};

#[tokio::main]
async fn main() -> Result<()> {
    let args = SecureProxyArguments::parse();
    pretty_env_logger::env_logger::builder()
        .format_timestamp(None)
        .filter_level(if args.verbose { LevelFilter::Trace } else { LevelFilter::Info })
        .init();

    // Handle command line arguments
    args.handle_arguments().await?;

    info!("Starting secureproxy");
    trace!("Arguments: {:#?}", args);

    let effective_config_path = Config::resolve_config_path(args.config_path.clone());
    let mut config = Config::try_load(&effective_config_path).await?;
    args.apply_overrides(&mut config);

    proxy::run(&config).await
}
