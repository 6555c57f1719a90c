mod cmd;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use cmd::config::{Cli, Command, Effective, PublishCommand, ReceiveCommand, SubscriptionCommand, TopicCommand, log_filter};
use cmd::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| log_filter(&cli.global).into()),
        )
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let eff = Effective::new(&cli.global)?;
    let mut stdout = std::io::stdout();

    match cli.command {
        Command::Publish { cmd } => {
            let backend = eff.backend()?;
            match cmd {
                PublishCommand::Data(args) => cmd::publish::data(&backend, &eff, &args, &mut stdout).await,
                PublishCommand::Avro(args) => cmd::publish::avro(&backend, &eff, &args, &mut stdout).await,
            }
        }
        Command::Receive { cmd: ReceiveCommand::Data(args) } => {
            // Fail on a missing subscription name before touching the network.
            eff.subscription(args.subscription.as_deref())?;
            let backend = eff.backend()?;

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupted, shutting down");
                    on_signal.cancel();
                }
            });

            cmd::receive::data(&backend, &eff, &args, tokio::io::stdout(), cancel).await?;
            Ok(())
        }
        Command::Topic { cmd } => {
            let backend = eff.backend()?;
            match cmd {
                TopicCommand::List => cmd::topic::list(&backend, &mut stdout).await,
                TopicCommand::New { names } => cmd::topic::create(&backend, &names, &mut stdout).await,
                TopicCommand::Delete { names } => cmd::topic::delete(&backend, &names, &mut stdout).await,
            }
        }
        Command::Subscription { cmd } => match cmd {
            SubscriptionCommand::List => cmd::subscription::list(&eff.backend()?, &mut stdout).await,
            SubscriptionCommand::New { topic, names } => {
                let topic = eff.topic(topic.as_deref())?;
                cmd::subscription::create(&eff.backend()?, &topic, &names, &mut stdout).await
            }
            SubscriptionCommand::Delete { names } => {
                cmd::subscription::delete(&eff.backend()?, &names, &mut stdout).await
            }
        },
    }
}
