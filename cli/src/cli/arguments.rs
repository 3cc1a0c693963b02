use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use log::info;
use secureproxy::config::Config;

#[derive(Parser, Debug, Clone)]
#[command(name = "secureproxy", about, author, version, long_about = None, propagate_version = true)]
pub struct SecureProxyArguments {
    #[arg(short = 'c', long = "config", help = "Path to the configuration file")]
    pub(crate) config_path: Option<String>,
    #[arg(short = 'v', long = "verbose", help = "Enable verbose logging")]
    pub(crate) verbose: bool,
    #[arg(long = "http-port", help = "Override the plaintext listener port")]
    pub(crate) http_port: Option<u16>,
    #[arg(long = "https-port", help = "Override the TLS listener port")]
    pub(crate) https_port: Option<u16>,
    #[command(subcommand)]
    pub(crate) command: Option<SecureProxyCommands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SecureProxyCommands {
    #[clap(name = "whitelist", about = "Manage CONNECT tunnel destinations")]
    Whitelist {
        #[clap(subcommand)]
        command: WhitelistCommands,
    },
    #[clap(name = "upgrade", about = "Manage hosts relayed over HTTPS")]
    Upgrade {
        #[clap(subcommand)]
        command: UpgradeCommands,
    },
    #[clap(name = "config", about = "Manage the configuration file")]
    Config {
        #[clap(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum WhitelistCommands {
    #[clap(name = "list", about = "List whitelisted destinations")]
    List,
    #[clap(name = "add", about = "Allow tunnels to a destination")]
    Add {
        /// `host` (any port) or `host:port`
        entry: String,
    },
    #[clap(name = "remove", about = "Stop allowing tunnels to a destination")]
    Remove { entry: String },
}

#[derive(Subcommand, Debug, Clone)]
pub enum UpgradeCommands {
    #[clap(name = "list", about = "List hosts relayed over HTTPS")]
    List,
    #[clap(name = "add", about = "Relay plaintext requests for a host over HTTPS")]
    Add { host: String },
    #[clap(name = "remove", about = "Relay a host as addressed")]
    Remove { host: String },
    #[clap(name = "all", about = "Relay every plaintext request over HTTPS (true/false)")]
    All {
        #[arg(action = ArgAction::Set)]
        enabled: bool,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    #[clap(name = "show", about = "Show the current configuration")]
    Show,
    #[clap(name = "show-path", about = "Show the path to the configuration file")]
    ShowPath,
}

impl SecureProxyArguments {
    /// Run a management subcommand against the config file and exit. Without a subcommand
    /// this returns and the proxy starts.
    pub async fn handle_arguments(&self) -> Result<()> {
        if let Some(command) = &self.command {
            let effective_config_path = Config::resolve_config_path(self.config_path.clone());
            let mut config = Config::try_load(&effective_config_path).await?;
            match command {
                // ---
                // Whitelist subcommand
                // ---
                SecureProxyCommands::Whitelist { command } => match command {
                    WhitelistCommands::List => {
                        for entry in config.get_whitelist() {
                            println!("\x1b[1;32m{}\x1b[0m", entry);
                        }
                    }
                    WhitelistCommands::Add { entry } => {
                        config.add_whitelist_entry(entry)?;
                        config.save().await?;
                    }
                    WhitelistCommands::Remove { entry } => {
                        config.remove_whitelist_entry(entry)?;
                        config.save().await?;
                    }
                },

                // ---
                // Upgrade subcommand
                // ---
                SecureProxyCommands::Upgrade { command } => match command {
                    UpgradeCommands::List => {
                        if config.is_upgrade_all() {
                            println!("\x1b[1;33mall plaintext requests\x1b[0m -> \x1b[1;33mhttps://<host>:443\x1b[0m");
                        }
                        for host in config.get_upgrade_hosts() {
                            println!("\x1b[1;36m{}\x1b[0m -> \x1b[1;33mhttps://{}:443\x1b[0m", host, host);
                        }
                    }
                    UpgradeCommands::Add { host } => {
                        config.add_upgrade_host(host)?;
                        config.save().await?;
                    }
                    UpgradeCommands::Remove { host } => {
                        config.remove_upgrade_host(host)?;
                        config.save().await?;
                    }
                    UpgradeCommands::All { enabled } => {
                        config.set_upgrade_all(*enabled);
                        config.save().await?;
                    }
                },

                // ---
                // Config subcommand
                // ---
                SecureProxyCommands::Config { command } => match command {
                    ConfigCommands::Show => {
                        println!("{}", config);
                    }
                    ConfigCommands::ShowPath => {
                        println!("{}", config.get_path().to_string_lossy())
                    }
                },
            }
            // Exit after the command has been executed
            std::process::exit(0);
        }
        Ok(())
    }

    /// Apply command line overrides on top of the loaded file. Overrides are not saved.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(port) = self.http_port {
            info!("Overriding http_port: {}", port);
            config.set_http_port(port);
        }
        if let Some(port) = self.https_port {
            info!("Overriding https_port: {}", port);
            config.set_https_port(port);
        }
    }
}
