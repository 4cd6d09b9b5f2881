use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use ledger_relay::application::errors::RelayError;
use ledger_relay::application::services::{Authorizer, Executor, PollingSupervisor, Relay, SupervisorSettings};
use ledger_relay::infrastructure::adapters::{appservice, MatrixClient};
use ledger_relay::infrastructure::config::{Config, Registration};

/// Extra time the worker gets to finish after shutdown is requested
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "ledger-relay")]
#[command(about = "Run whitelisted chat commands on the local shell", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and poll the homeserver for events
    Run {
        /// https://matrix.example.com
        #[arg(short = 's', long)]
        homeserver: Option<String>,

        /// @ledger:matrix.example.com
        #[arg(short, long)]
        username: Option<String>,

        #[arg(short, long)]
        password: Option<String>,

        /// @user1:matrix.example.com,@user2:matrix.example.com
        #[arg(short, long)]
        allowed_users: Option<String>,
    },
    /// Serve application-service transactions pushed by the homeserver
    Serve {
        /// Registration file with as_token, hs_token and hs_url
        #[arg(short, long)]
        registration: Option<PathBuf>,

        /// Address to listen on, e.g. 127.0.0.1:9000
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Show version
    Version,
    /// Generate default config
    InitConfig,
}

fn main() {
    let cli = Cli::parse();

    let (mut config, command) = match cli.command {
        Commands::Version => {
            println!("ledger-relay v{}", env!("CARGO_PKG_VERSION"));
            return;
        }
        Commands::InitConfig => {
            init_config();
            return;
        }
        command => match Config::load_with_env(&cli.config) {
            Ok(config) => (config, command),
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        },
    };

    apply_cli_overrides(&mut config, &command);
    init_logging(&config.bot.log_level);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    let result = rt.block_on(async {
        match command {
            Commands::Serve { .. } => run_appservice(config).await,
            _ => run_polling(config).await,
        }
    });

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn init_logging(level: &str) {
    // RUST_LOG wins over the configured level
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_names(true)
        .with_env_filter(filter)
        .init();
}

fn apply_cli_overrides(config: &mut Config, command: &Commands) {
    match command {
        Commands::Run {
            homeserver,
            username,
            password,
            allowed_users,
        } => {
            if let Some(v) = homeserver {
                config.matrix.homeserver = Some(v.clone());
            }
            if let Some(v) = username {
                config.matrix.username = Some(v.clone());
            }
            if let Some(v) = password {
                config.matrix.password = Some(v.clone());
            }
            if let Some(v) = allowed_users {
                config.whitelist.users = ledger_relay::application::services::authorizer::split_user_list(v);
            }
        }
        Commands::Serve { registration, bind } => {
            if let Some(v) = registration {
                config.appservice.registration = v.clone();
            }
            if let Some(v) = bind {
                config.appservice.bind_address = v.clone();
            }
        }
        _ => {}
    }
}

async fn run_polling(config: Config) -> Result<(), RelayError> {
    let params = config.polling_params()?;
    tracing::info!("Starting ledger-relay as {} on {}", params.user, params.homeserver);
    tracing::debug!("Allowed users: {}", params.allow_list.len());

    let client = Arc::new(MatrixClient::with_password(
        &params.homeserver,
        params.user.clone(),
        params.password,
    )?);
    let relay = Arc::new(
        Relay::new(
            client.clone(),
            params.user,
            Authorizer::new(params.allow_list),
            Executor::new(config.sh_timeout()),
        )
        .with_sender_policy(config.whitelist.sender_policy),
    );

    let settings = SupervisorSettings {
        poll_interval: config.poll_interval(),
        retry_delay: config.retry_delay(),
    };
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor = PollingSupervisor::new(client, relay, settings, shutdown_rx);
    let worker = tokio::spawn(supervisor.run());

    shutdown_signal().await;
    tracing::info!("Shutdown requested, attempting to stop the worker");
    let _ = shutdown_tx.send(true);

    let grace = settings.poll_interval + config.sh_timeout() + SHUTDOWN_GRACE;
    match tokio::time::timeout(grace, worker).await {
        Ok(Ok(())) => tracing::info!("Quitting"),
        Ok(Err(e)) => tracing::error!("Worker panicked: {}", e),
        Err(_) => tracing::warn!("Worker did not stop within {:?}, quitting anyway", grace),
    }
    Ok(())
}

async fn run_appservice(config: Config) -> Result<(), RelayError> {
    let registration = Registration::load(&config.appservice.registration)?;
    let params = config.appservice_params(&registration)?;
    tracing::info!("Starting ledger-relay application service as {}", params.user);

    let client = Arc::new(MatrixClient::with_token(
        &params.hs_url,
        params.user.clone(),
        params.as_token,
    )?);
    let relay = Arc::new(
        Relay::new(
            client,
            params.user.clone(),
            Authorizer::new(params.allow_list),
            Executor::new(config.sh_timeout()),
        )
        .with_sender_policy(config.whitelist.sender_policy)
        .with_join_before_reply(true),
    );

    let router = appservice::router(relay, &params.hs_token, params.user);
    appservice::serve(router, &params.bind_address, shutdown_signal()).await
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn init_config() {
    let config = Config::default();
    match serde_yaml::to_string(&config) {
        Ok(yaml) => {
            println!("{}", yaml);
            println!("\nSave this to config.yaml and adjust as needed.");
        }
        Err(e) => {
            eprintln!("Failed to render config: {}", e);
            std::process::exit(1);
        }
    }
}
