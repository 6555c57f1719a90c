use std::io::Write;

use pubsub_api::Backend;

use super::error::CliError;

pub async fn list(backend: &dyn Backend, out: &mut (dyn Write + Send)) -> Result<(), CliError> {
    for name in backend.list_topics().await? {
        writeln!(out, "--> {name}")?;
    }
    Ok(())
}

/// Create each named topic. Existing topics are reported and skipped;
/// failures are reported per name and fail the batch at the end.
pub async fn create(backend: &dyn Backend, names: &[String], out: &mut (dyn Write + Send)) -> Result<(), CliError> {
    let mut failed = 0;
    for name in names {
        let result = async {
            if backend.topic_exists(name).await? {
                return Ok("exists");
            }
            backend.create_topic(name).await?;
            Ok::<_, CliError>("create")
        }
        .await;
        match result {
            Ok(status) => writeln!(out, "--> [{status}] {name}")?,
            Err(e) => {
                failed += 1;
                tracing::warn!(topic = %name, error = %e, "create topic failed");
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
            if !backend.topic_exists(name).await? {
                return Ok("missing");
            }
            backend.delete_topic(name).await?;
            Ok::<_, CliError>("deleted")
        }
        .await;
        match result {
            Ok(status) => writeln!(out, "--> [{status}] {name}")?,
            Err(e) => {
                failed += 1;
                tracing::warn!(topic = %name, error = %e, "delete topic failed");
                writeln!(out, "--> [failed] {name}: {e}")?;
            }
        }
    }
    CliError::check_batch(failed, names.len())
}
