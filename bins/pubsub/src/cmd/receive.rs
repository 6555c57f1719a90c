use humantime_serde::re::humantime::format_duration;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use pipeline::{Limit, ReceiveOptions, ReceivePipeline, ReceiveSummary, TerminationPolicy};
use pubsub_api::{Backend, BackendError, ReceiveSettings};

use super::config::{Effective, ReceiveArgs};
use super::error::CliError;

/// Resolve the receive flags against the merged config.
pub fn options(eff: &Effective, args: &ReceiveArgs) -> ReceiveOptions {
    let wait = args.wait.or(eff.wait);
    let concurrency = args.concurrency.or(eff.concurrency).unwrap_or(1);
    ReceiveOptions {
        policy: TerminationPolicy::from_flags(Some(args.count), Some(args.expect), wait),
        output: args.output.or(eff.output).unwrap_or_default(),
        quiet: eff.quiet,
        verbose: eff.verbose,
        no_ack: args.no_ack,
        settings: ReceiveSettings::for_concurrency(concurrency),
    }
}

/// One line telling the operator what this receive will wait for.
pub fn preamble(policy: &TerminationPolicy, subscription: &str, topic: &str) -> String {
    let wait = policy.idle_timeout.map(|w| format_duration(w).to_string());
    match (policy.limit, wait) {
        (Limit::ExpectLimited(n), Some(w)) => format!("Expecting {n} messages from {subscription} ({topic}) for {w}..."),
        (Limit::CountLimited(n), Some(w)) => {
            format!("Receiving up to {n} messages from {subscription} ({topic}) for {w}...")
        }
        (Limit::ExpectLimited(n), None) => format!("Expecting {n} messages from {subscription} ({topic})..."),
        (Limit::CountLimited(n), None) => format!("Receiving {n} messages from {subscription} ({topic})..."),
        (Limit::Unbounded, Some(w)) => format!("Receiving from {subscription} ({topic}) for {w}..."),
        (Limit::Unbounded, None) => format!("Receiving forever from {subscription} ({topic})..."),
    }
}

pub async fn data<W>(
    backend: &dyn Backend,
    eff: &Effective,
    args: &ReceiveArgs,
    out: W,
    cancel: CancellationToken,
) -> Result<(ReceiveSummary, W), CliError>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let subscription = eff.subscription(args.subscription.as_deref())?;
    if !backend.subscription_exists(&subscription).await? {
        return Err(BackendError::not_found(format!("No such subscription: {subscription}")).into());
    }

    let options = options(eff, args);
    if eff.verbose {
        let info = backend.subscription_info(&subscription).await?;
        eprintln!("{}", preamble(&options.policy, &subscription, &info.topic));
    }

    let delivery = backend.open_subscription(&subscription, options.settings).await?;
    let (summary, out) = ReceivePipeline::new(options).run(delivery, out, cancel).await?;

    if eff.verbose {
        eprintln!("{}", summary.describe(&subscription));
    }
    Ok((summary, out))
}
