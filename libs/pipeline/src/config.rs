use std::time::Duration;

use serde::Deserialize;

use pubsub_api::ReceiveSettings;

// ═══════════════════════════════════════════════════════════════
//  Output mode
// ═══════════════════════════════════════════════════════════════

/// How received messages are written to the terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// One progress marker per message, no content.
    None,
    /// Header line, plus attributes and payload when verbose.
    #[default]
    Pretty,
    /// One JSON envelope per line.
    Json,
}

impl std::str::FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(OutputMode::None),
            "pretty" => Ok(OutputMode::Pretty),
            "json" => Ok(OutputMode::Json),
            other => Err(format!("unknown output format '{other}' (none|pretty|json)")),
        }
    }
}

impl std::fmt::Display for OutputMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputMode::None => f.write_str("none"),
            OutputMode::Pretty => f.write_str("pretty"),
            OutputMode::Json => f.write_str("json"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Termination policy
// ═══════════════════════════════════════════════════════════════

/// Count limit applied by the decision stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Unbounded,
    /// Accept at most `n` messages, then stop.
    CountLimited(i64),
    /// Like `CountLimited`, and the run fails unless exactly `n` were processed.
    ExpectLimited(i64),
}

/// Outcome of evaluating the limit for one processed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub accept: bool,
    pub stop: bool,
}

impl Limit {
    /// Judge the `n`-th processed message (1-based).
    pub fn judge(&self, n: u64) -> Verdict {
        match *self {
            Limit::Unbounded => Verdict { accept: true, stop: false },
            Limit::CountLimited(k) | Limit::ExpectLimited(k) => {
                let n = i64::try_from(n).unwrap_or(i64::MAX);
                Verdict {
                    accept: n <= k,
                    stop: n.saturating_add(1) > k,
                }
            }
        }
    }

    pub fn expected(&self) -> Option<i64> {
        match *self {
            Limit::ExpectLimited(k) => Some(k),
            _ => None,
        }
    }
}

/// When a receive invocation cancels itself. Fixed for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationPolicy {
    pub limit: Limit,
    /// Cancel if no message arrives for this long. `None` disables it.
    pub idle_timeout: Option<Duration>,
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self { limit: Limit::Unbounded, idle_timeout: None }
    }
}

impl TerminationPolicy {
    /// Build from command-line style values: negative counts are unset,
    /// `expect` takes precedence over `count`, a zero wait disables the
    /// idle timeout.
    pub fn from_flags(count: Option<i64>, expect: Option<i64>, wait: Option<Duration>) -> Self {
        let limit = match (expect.filter(|e| *e >= 0), count.filter(|c| *c >= 0)) {
            (Some(e), _) => Limit::ExpectLimited(e),
            (None, Some(c)) => Limit::CountLimited(c),
            (None, None) => Limit::Unbounded,
        };
        Self {
            limit,
            idle_timeout: wait.filter(|w| !w.is_zero()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Receive options
// ═══════════════════════════════════════════════════════════════

/// Everything one receive invocation needs besides the delivery handle.
#[derive(Debug, Clone)]
pub struct ReceiveOptions {
    pub policy: TerminationPolicy,
    pub output: OutputMode,
    /// 0 = normal, 1 = progress markers only, 2+ = nothing.
    pub quiet: u8,
    pub verbose: bool,
    /// Skip backend ack/nack calls. Counters still advance.
    pub no_ack: bool,
    pub settings: ReceiveSettings,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            policy: TerminationPolicy::default(),
            output: OutputMode::default(),
            quiet: 0,
            verbose: false,
            no_ack: false,
            settings: ReceiveSettings::default(),
        }
    }
}
