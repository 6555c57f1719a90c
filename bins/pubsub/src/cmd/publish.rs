use std::io::Write;

use tokio::io::AsyncReadExt;

use pubsub_api::{Attributes, Backend, BackendError, OutgoingMessage, format_bytes};

use super::avro;
use super::config::{Effective, PublishAvroArgs, PublishDataArgs};
use super::error::CliError;

const STDIN: &str = "-";

/// Parse `key=value` pairs. Split on the first `=`, trim both sides.
pub fn parse_attributes(pairs: &[String]) -> Result<Attributes, CliError> {
    let mut attrs = Attributes::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(CliError::Config(format!("Invalid attribute format: {pair}")));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(CliError::Config(format!("Invalid attribute format: {pair}")));
        }
        attrs.insert(key.to_string(), value.trim().to_string());
    }
    Ok(attrs)
}

pub(crate) async fn read_input(input: &str) -> Result<Vec<u8>, CliError> {
    let mut data = Vec::new();
    if input == STDIN {
        tokio::io::stdin().read_to_end(&mut data).await?;
    } else {
        data = tokio::fs::read(input)
            .await
            .map_err(|e| CliError::Config(format!("cannot read {input}: {e}")))?;
    }
    Ok(data)
}

pub(crate) async fn ensure_topic(backend: &dyn Backend, topic: &str) -> Result<(), CliError> {
    if backend.topic_exists(topic).await? {
        Ok(())
    } else {
        Err(BackendError::not_found(format!("No such topic: {topic}")).into())
    }
}

/// Running totals for one publish command.
#[derive(Debug, Default)]
pub(crate) struct Tally {
    pub messages: u64,
    pub bytes: u64,
}

impl Tally {
    pub(crate) fn report(
        &mut self,
        out: &mut (dyn Write + Send),
        verbose: bool,
        topic: &str,
        size: usize,
        id: &str,
    ) -> std::io::Result<()> {
        self.messages += 1;
        self.bytes += size as u64;
        if verbose {
            writeln!(out, "--> Published {} to {topic} ({id})", format_bytes(size as u64))
        } else {
            write!(out, ".")?;
            out.flush()
        }
    }

    pub(crate) fn finish(&self, out: &mut (dyn Write + Send), verbose: bool, topic: &str) -> std::io::Result<()> {
        if verbose {
            return Ok(());
        }
        writeln!(
            out,
            "\n--> Published {} messages ({}) to {topic}",
            self.messages,
            format_bytes(self.bytes)
        )
    }
}

// ═══════════════════════════════════════════════════════════════
//  publish data
// ═══════════════════════════════════════════════════════════════

pub async fn data(
    backend: &dyn Backend,
    eff: &Effective,
    args: &PublishDataArgs,
    out: &mut (dyn Write + Send),
) -> Result<(), CliError> {
    let topic = eff.topic(args.topic.as_deref())?;
    let attrs = parse_attributes(&args.attrs)?;
    ensure_topic(backend, &topic).await?;

    let repeat = args.count.max(1);
    let mut tally = Tally::default();
    for input in &args.inputs {
        let data = read_input(input).await?;
        for _ in 0..repeat {
            let message = OutgoingMessage::new(data.clone()).with_attributes(attrs.clone());
            let id = backend
                .publish(&topic, message)
                .await
                .map_err(|e| BackendError::new(e.kind(), format!("Publish failed: {e}")))?;
            tracing::debug!(topic = %topic, id = %id, bytes = data.len(), "published");
            tally.report(out, eff.verbose, &topic, data.len(), &id)?;
        }
    }
    tally.finish(out, eff.verbose, &topic)?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════
//  publish avro
// ═══════════════════════════════════════════════════════════════

pub async fn avro(
    backend: &dyn Backend,
    eff: &Effective,
    args: &PublishAvroArgs,
    out: &mut (dyn Write + Send),
) -> Result<(), CliError> {
    let topic = eff.topic(args.topic.as_deref())?;
    ensure_topic(backend, &topic).await?;

    let fields = avro::FieldMapping {
        id_field: args.field_id.clone(),
        timestamp_field: args.field_timestamp.clone(),
        id_attr: args.attr_id.clone(),
        timestamp_attr: args.attr_timestamp.clone(),
    };

    let mut tally = Tally::default();
    for input in &args.inputs {
        let bytes = read_input(input).await?;
        for message in avro::read_messages(&bytes, &fields)? {
            let size = message.data.len();
            let attrs = message.attributes.clone();
            let id = backend
                .publish(&topic, message)
                .await
                .map_err(|e| BackendError::new(e.kind(), format!("Publish failed: {e}")))?;
            tally.report(out, eff.verbose, &topic, size, &id)?;
            if eff.verbose && !attrs.is_empty() {
                let line: Vec<String> = attrs.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                writeln!(out, "    {}", line.join(", "))?;
            }
        }
    }
    tally.finish(out, eff.verbose, &topic)?;
    Ok(())
}
