use std::io::Write;

use humantime_serde::re::humantime::format_duration;

use pubsub_api::{Backend, BackendError, SubscriptionInfo};

use super::error::CliError;

fn describe(info: &SubscriptionInfo) -> String {
    format!(
        "{} {{ topic: {}, deadline: {}, retain: {} }}",
        info.name,
        info.topic,
        format_duration(info.ack_deadline),
        info.retain_acked_messages
    )
}

pub async fn list(backend: &dyn Backend, out: &mut (dyn Write + Send)) -> Result<(), CliError> {
    for info in backend.list_subscriptions().await? {
        writeln!(out, "{}", describe(&info))?;
    }
    Ok(())
}

/// Create each named subscription on `topic`, which must exist.
pub async fn create(
    backend: &dyn Backend,
    topic: &str,
    names: &[String],
    out: &mut (dyn Write + Send),
) -> Result<(), CliError> {
    if !backend.topic_exists(topic).await? {
        return Err(BackendError::not_found(format!("No such topic: {topic}")).into());
    }

    let mut failed = 0;
    for name in names {
        let result = async {
            if backend.subscription_exists(name).await? {
                return Ok("exists");
            }
            backend.create_subscription(name, topic).await?;
            Ok::<_, CliError>("create")
        }
        .await;
        match result {
            Ok(status) => writeln!(out, "--> [{status}] {name}")?,
            Err(e) => {
                failed += 1;
                tracing::warn!(subscription = %name, topic = %topic, error = %e, "create subscription failed");
                writeln!(out, "--> [failed] {name}: {e}")?;
            }
        }
    }
    CliError::check_batch(failed, names.len())
}

pub async fn delete(backend: &dyn Backend, names: &[String], out: &mut (dyn Write + Send)) -> Result<(), CliError> {
    let mut failed = 0;
    for name in names {
        let result = async {
            if !backend.subscription_exists(name).await? {
                return Ok("missing");
            }
            backend.delete_subscription(name).await?;
            Ok::<_, CliError>("deleted")
        }
        .await;
        match result {
            Ok(status) => writeln!(out, "--> [{status}] {name}")?,
            Err(e) => {
                failed += 1;
                tracing::warn!(subscription = %name, error = %e, "delete subscription failed");
                writeln!(out, "--> [failed] {name}: {e}")?;
            }
        }
    }
    CliError::check_batch(failed, names.len())
}
