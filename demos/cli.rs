use clap::{Args, Parser, Subcommand};
use notifi_client::{Config, Credentials, Error, PollOptions, Publisher, Subscriber};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "notifi-client",
    about = "Publish and receive Notifi notifications",
    arg_required_else_help = true
)]
struct Cli {
    #[arg(long, env = "NOTIFI_CLIENT_ID", help = "Publisher or subscriber client ID")]
    client_id: String,

    #[arg(long, env = "NOTIFI_CLIENT_SECRET", hide_env_values = true)]
    client_secret: String,

    #[arg(long, help = "API base URL (overrides NOTIFI_API_BASE)")]
    api_base: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Publish a message
    Publish {
        #[arg(long)]
        message: String,
        /// Target categories; defaults to every category
        #[arg(long = "category")]
        categories: Vec<String>,
    },
    /// Fetch pending messages once
    Poll {
        #[arg(long)]
        confirm: bool,
    },
    /// Poll in the background and confirm each message until Ctrl-C
    Listen(ListenArgs),
}

#[derive(Args, Debug)]
struct ListenArgs {
    #[arg(long, default_value_t = 10, help = "Seconds between polls")]
    every: u64,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = build_config(cli.api_base.clone())?;
    let credentials = Credentials::new(cli.client_id, cli.client_secret);

    match cli.command {
        Commands::Publish { message, categories } => {
            let publisher = Publisher::with_config(credentials, config)?;
            let resp = if categories.is_empty() {
                publisher.publish_to_all(&message).await?
            } else {
                publisher.publish(&message, categories).await?
            };
            println!(
                "Delivered to {}/{} subscriber(s) ({:.0}% ok)",
                resp.passed,
                resp.total,
                resp.passed_percent() * 100.0
            );
        }
        Commands::Poll { confirm } => {
            let subscriber = Subscriber::with_config(credentials, config)?;
            let messages = subscriber.poll().await?;
            if messages.is_empty() {
                println!("No messages found.");
            }
            for mut msg in messages {
                println!("{}. [{}] {}", msg.id(), msg.created(), msg.body());
                if confirm {
                    msg.confirm().await?;
                }
            }
        }
        Commands::Listen(args) => {
            let subscriber = Subscriber::with_config(credentials, config)?;
            let handle = subscriber.poll_async(
                |mut msg| async move {
                    println!("{}. [{}] {}", msg.id(), msg.created(), msg.body());
                    msg.confirm().await
                },
                PollOptions {
                    interval: Duration::from_secs(args.every),
                    ..PollOptions::default()
                },
            )?;

            let stopper = handle.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    stopper.cancel();
                }
            });
            handle.join().await?;
        }
    }

    Ok(())
}

fn build_config(api_base: Option<String>) -> Result<Config, Error> {
    let mut cfg = Config::from_env()?;
    if let Some(api_base) = api_base {
        cfg.api_base = api_base;
    }
    Ok(cfg)
}
