use clap::{Parser, Subcommand};
use flowlink::callback::CallbackPayload;
use flowlink::conversation::LogConversation;
use flowlink::dispatch::DispatchPayload;
use flowlink::service::DispatchService;
use flowlink::workflow::ProvisionOutcome;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "flowlink")]
#[command(about = "flowlink CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and default files (config.json, workflow.json).
    Init {
        /// Config file path (default: FLOWLINK_CONFIG_PATH or ~/.flowlink/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run the gateway: callback route, health probe, session sweep, and the chat channel when configured.
    Serve {
        /// Config file path (default: FLOWLINK_CONFIG_PATH or ~/.flowlink/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port (default from config or 8889)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Reconcile the remote workflow once against the local template.
    Provision {
        /// Config file path (default: FLOWLINK_CONFIG_PATH or ~/.flowlink/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Dispatch one test prompt to the workflow webhook and print the result.
    Ping {
        /// Config file path (default: FLOWLINK_CONFIG_PATH or ~/.flowlink/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        #[arg(long, default_value = "bob, this is a connectivity test")]
        prompt: String,
    },

    /// Post a test callback to the running gateway.
    Callback {
        /// Config file path (default: FLOWLINK_CONFIG_PATH or ~/.flowlink/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        #[arg(long, value_name = "ID")]
        session: String,

        #[arg(long, conflicts_with = "error")]
        response: Option<String>,

        #[arg(long)]
        error: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = match cli.command {
        Some(Commands::Serve { .. }) => "info",
        _ => "warn",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("flowlink {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config),
        Some(Commands::Serve { config, port }) => run_serve(config, port).await,
        Some(Commands::Provision { config }) => run_provision(config).await,
        Some(Commands::Ping { config, prompt }) => run_ping(config, prompt).await,
        Some(Commands::Callback {
            config,
            session,
            response,
            error,
        }) => run_callback(config, session, response, error).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };
    if let Err(e) = result {
        log::error!("{:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(flowlink::config::default_config_path);
    let dir = flowlink::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_serve(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, path) = flowlink::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!("starting gateway on {}:{}", config.gateway.bind, config.gateway.port);
    flowlink::gateway::run_gateway(config, path).await
}

fn offline_service(config_path: Option<PathBuf>) -> anyhow::Result<DispatchService> {
    let (config, path) = flowlink::config::load_config(config_path)?;
    Ok(DispatchService::from_config(
        &config,
        &path,
        Arc::new(LogConversation::new()),
    ))
}

async fn run_provision(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let service = offline_service(config_path)?;
    let Some(provisioner) = service.provisioner() else {
        anyhow::bail!("workflow api not configured (set workflow.apiKey or N8N_API_KEY)");
    };
    let outcome = provisioner.reconcile().await?;
    let state = match outcome {
        ProvisionOutcome::Created { .. } => "created and activated",
        ProvisionOutcome::Updated { .. } => "updated and activated",
        ProvisionOutcome::ActivationConflict { .. } => "uploaded, activation refused (webhook path conflict)",
    };
    println!(
        "workflow '{}' (id {}): {}",
        provisioner.name(),
        outcome.workflow_id(),
        state
    );
    Ok(())
}

async fn run_ping(config_path: Option<PathBuf>, prompt: String) -> anyhow::Result<()> {
    let service = offline_service(config_path)?;
    let Some(client) = service.client() else {
        anyhow::bail!("webhook url not configured (set workflow.webhookUrl or N8N_WEBHOOK_URL)");
    };
    let payload = DispatchPayload {
        prompt,
        user: "flowlink-cli".to_string(),
        user_id: "cli".to_string(),
        session_id: flowlink::session::new_session_id(),
        channel_id: "cli".to_string(),
        message_id: "cli".to_string(),
        status_message_id: None,
        timestamp: chrono::Utc::now(),
    };
    println!("dispatching session {} to {}", payload.session_id, client.webhook_url());
    let result = client.dispatch(&payload).await;
    println!("{}", serde_json::to_string_pretty(&result.to_json())?);
    if !result.is_ok() {
        anyhow::bail!("dispatch failed");
    }
    Ok(())
}

async fn run_callback(
    config_path: Option<PathBuf>,
    session: String,
    response: Option<String>,
    error: Option<String>,
) -> anyhow::Result<()> {
    let (config, _) = flowlink::config::load_config(config_path)?;
    let host = match config.gateway.bind.trim() {
        "0.0.0.0" | "" => "127.0.0.1",
        other => other,
    };
    let url = format!("http://{}:{}/callback", host, config.gateway.port);
    let payload = CallbackPayload {
        session_id: Some(session),
        response: response.map(serde_json::Value::String),
        error: error.map(serde_json::Value::String),
    };
    let mut req = reqwest::Client::new().post(&url).json(&payload);
    if let Some(secret) = flowlink::config::resolve_callback_secret(&config) {
        req = req.header(flowlink::gateway::CALLBACK_SECRET_HEADER, secret);
    }
    let res = req.send().await?;
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    println!("{} {}", status, body);
    if !status.is_success() {
        anyhow::bail!("gateway answered {}", status);
    }
    Ok(())
}
