//! biot device client CLI.
//!
//! Runs a device session against the cloud from a TOML configuration.
//!
//! # Commands
//!
//! - `check-config` - Validate a configuration file and print the result
//! - `run` - Connect, answer server requests and publish attributes

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use biot::{
    auth::{AuthStrategy, BasicAuth, DirectAuth, MutualTlsAuth, UserLoginAuth},
    message::{codes, Message},
    ClientConfig, MessageListener, Session, SessionState, VERSION,
};
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "biot")]
#[command(version = VERSION)]
#[command(about = "Device-side IoT cloud protocol client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file
    CheckConfig {
        /// Config file path (default: ~/.config/biot/config.toml)
        file: Option<PathBuf>,
    },

    /// Connect and keep the session alive until Ctrl-C
    Run {
        /// Config file path (default: ~/.config/biot/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Authentication method
        #[arg(short, long, value_enum, default_value = "direct")]
        auth: AuthMethod,

        /// Auth code (direct), basic credential (basic) or password (login)
        #[arg(long, env = "BIOT_SECRET", hide_env_values = true)]
        secret: Option<String>,

        /// Portal user id (login)
        #[arg(long)]
        user: Option<String>,

        /// Publish an attribute notification every N seconds
        #[arg(long)]
        notify_every: Option<u64>,

        /// Log level (trace, debug, info, warn, error)
        #[arg(long, default_value = "info")]
        log_level: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum AuthMethod {
    Direct,
    Basic,
    Login,
    Mtls,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig { file } => check_config(file),
        Commands::Run {
            config,
            auth,
            secret,
            user,
            notify_every,
            log_level,
        } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run(
                config,
                auth,
                secret,
                user,
                notify_every,
                &log_level,
            ))
        },
    }
}

fn load_config(file: Option<PathBuf>) -> anyhow::Result<ClientConfig> {
    let path = file
        .or_else(ClientConfig::default_path)
        .context("No config file given and no config directory available")?;
    let config = ClientConfig::from_file(&path)
        .with_context(|| format!("Loading {}", path.display()))?
        .with_env();
    Ok(config)
}

fn check_config(file: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(file)?;
    config.validate()?;

    println!("site:        {}", config.site_id);
    println!("thing:       {}", config.thing_name);
    println!("api server:  {}", config.api_server_addr);
    println!(
        "broker:      {}",
        config.server_addr.as_deref().unwrap_or("(assigned by server)")
    );
    println!("protocol:    {}", config.protocol_type);
    println!("enc type:    {}", config.enc_type);
    println!(
        "compression: {}",
        if config.compress_use_bytes == 0 {
            "off".to_string()
        } else {
            format!(">= {} bytes", config.compress_use_bytes)
        }
    );
    match config.keep_alive() {
        Some(interval) => println!("keep-alive:  {}s", interval.as_secs()),
        None => println!("keep-alive:  off"),
    }
    println!("OK");
    Ok(())
}

fn build_auth(
    method: AuthMethod,
    secret: Option<String>,
    user: Option<String>,
) -> anyhow::Result<Box<dyn AuthStrategy>> {
    let secret = || secret.clone().context("--secret is required for this auth method");
    Ok(match method {
        AuthMethod::Direct => Box::new(DirectAuth::new(secret()?)),
        AuthMethod::Basic => Box::new(BasicAuth::new(secret()?)),
        AuthMethod::Login => {
            let user = user.context("--user is required for login auth")?;
            Box::new(UserLoginAuth::new(user, &secret()?))
        },
        AuthMethod::Mtls => Box::new(MutualTlsAuth::new()),
    })
}

/// Answers every server request with `200 OK` and logs notifications.
struct AckListener;

impl MessageListener for AckListener {
    fn on_notification(&self, _session: &Session, msg: Message) {
        tracing::info!(
            msg_code = msg.code(),
            payload = %String::from_utf8_lossy(&msg.payload),
            "notification"
        );
    }

    fn on_request(&self, session: &Session, msg: Message) {
        let session = session.clone();
        tokio::spawn(async move {
            let answer = msg.create_response("200", "OK");
            if !session.send(answer).await {
                tracing::warn!(msg_id = msg.id(), "failed to answer request");
            }
        });
    }
}

async fn run(
    config_path: Option<PathBuf>,
    method: AuthMethod,
    secret: Option<String>,
    user: Option<String>,
    notify_every: Option<u64>,
    log_level: &str,
) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let config = load_config(config_path)?;
    let auth = build_auth(method, secret, user)?;

    let session = Session::builder(config)
        .auth_arc(auth.into())
        .listener(AckListener)
        .build()?;

    println!("biot v{VERSION}");
    session.connect().await?;
    println!("Connected ({})", session.state());

    let mut state = session.subscribe_state();
    let mut ticker = notify_every
        .filter(|secs| *secs > 0)
        .map(|secs| tokio::time::interval(Duration::from_secs(secs)));
    let mut seq: u64 = 0;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            },
            changed = state.changed() => {
                if changed.is_err() || *state.borrow() == SessionState::Terminated {
                    anyhow::bail!("Session terminated");
                }
            },
            _ = async {
                match ticker.as_mut() {
                    Some(ticker) => ticker.tick().await,
                    None => std::future::pending().await,
                }
            } => {
                seq += 1;
                let notify = Message::notify(codes::NOTIFY_ATTR)
                    .with_json(&serde_json::json!({ "seq": seq, "uptime": seq * notify_every.unwrap_or(0) }))?;
                if !session.send(notify).await {
                    tracing::warn!(seq, "attribute notification not sent");
                }
            },
        }
    }

    session.disconnect().await?;
    Ok(())
}
