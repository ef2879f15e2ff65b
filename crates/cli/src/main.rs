use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chatrep")]
#[command(about = "ChatRep — Telegram auto-responder", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and default files (config, rules).
    Init {
        /// Config file path (default: CHATREP_CONFIG_PATH or ~/.chatrep/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the responder daemon (Telegram channel + HTTP health/webhook).
    Run {
        /// Config file path (default: CHATREP_CONFIG_PATH or ~/.chatrep/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from config or 15152)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Print the configured trigger rules.
    Rules {
        /// Config file path (default: CHATREP_CONFIG_PATH or ~/.chatrep/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("chatrep {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Run { config, port }) => {
            if let Err(e) = run_daemon(config, port).await {
                log::error!("daemon failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Rules { config }) => {
            if let Err(e) = run_rules(config) {
                log::error!("rules failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_daemon(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = lib::config::load_config(config_path)?;
    if let Some(p) = port {
        config.daemon.port = p;
    }
    log::info!("starting daemon on {}:{}", config.daemon.bind, config.daemon.port);
    lib::daemon::run_daemon(config, path).await
}

fn run_rules(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, path) = lib::config::load_config(config_path)?;
    let rules_path = lib::config::resolve_rules_path(&config, &path);
    let rules = lib::rules::RuleSet::load(&rules_path)?;
    println!("{} rules in {}", rules.len(), rules_path.display());
    for rule in rules.iter() {
        println!("{}", lib::admin::format_rule(rule));
    }
    Ok(())
}
