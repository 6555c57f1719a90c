use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Deserialize;

use pipeline::OutputMode;
use pubsub_rest::{DEFAULT_TIMEOUT, RestBackend, RestConfig};

use super::error::CliError;

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(s).map_err(|e| e.to_string())
}

// ═══════════════════════════════════════════════════════════════
//  CLI
// ═══════════════════════════════════════════════════════════════

#[derive(Parser, Debug)]
#[command(name = "pubsub", version, about = "A command-line interface to the Pub/Sub service")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Clone, Debug, Default)]
pub struct GlobalArgs {
    /// The project we are operating on
    #[arg(long, global = true, env = "PUBSUB_PROJECT_ID")]
    pub project: Option<String>,

    /// Be more verbose
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Be extremely verbose
    #[arg(long, global = true)]
    pub debug: bool,

    /// Be quieter; repeat to suppress all message output
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub quiet: u8,

    /// Path to the TOML config file [default: pubsub.toml]
    #[arg(long, global = true, env = "PUBSUB_CONFIG")]
    pub config: Option<String>,

    /// OAuth2 access token, e.g. from `gcloud auth print-access-token`
    #[arg(long, global = true, env = "PUBSUB_ACCESS_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// host:port of a local emulator
    #[arg(long, global = true, env = "PUBSUB_EMULATOR_HOST")]
    pub emulator_host: Option<String>,

    /// Base URL of the REST API
    #[arg(long, global = true)]
    pub endpoint: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Publish messages to a topic
    Publish {
        #[command(subcommand)]
        cmd: PublishCommand,
    },
    /// Receive messages from a subscription
    #[command(alias = "recv")]
    Receive {
        #[command(subcommand)]
        cmd: ReceiveCommand,
    },
    /// Manage topics
    #[command(alias = "topics")]
    Topic {
        #[command(subcommand)]
        cmd: TopicCommand,
    },
    /// Manage subscriptions
    #[command(aliases = ["subscriptions", "subs", "sub"])]
    Subscription {
        #[command(subcommand)]
        cmd: SubscriptionCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum PublishCommand {
    /// Publish raw data from files or stdin
    Data(PublishDataArgs),
    /// Publish every record of Avro container files
    Avro(PublishAvroArgs),
}

#[derive(Args, Clone, Debug, Default)]
pub struct PublishDataArgs {
    /// The topic to publish to
    #[arg(long, env = "PUBSUB_TOPIC")]
    pub topic: Option<String>,

    /// Publish each input this many times
    #[arg(long, default_value_t = 1)]
    pub count: usize,

    /// Attribute to set on every message, as key=value. Repeatable
    #[arg(long = "attr", value_name = "KEY=VALUE")]
    pub attrs: Vec<String>,

    /// Input files; `-` reads stdin
    #[arg(default_value = "-")]
    pub inputs: Vec<String>,
}

#[derive(Args, Clone, Debug)]
pub struct PublishAvroArgs {
    /// The topic to publish to
    #[arg(long, env = "PUBSUB_TOPIC")]
    pub topic: Option<String>,

    /// Record field copied into the id attribute
    #[arg(long)]
    pub field_id: Option<String>,

    /// Record field copied into the timestamp attribute
    #[arg(long)]
    pub field_timestamp: Option<String>,

    /// Attribute name for the record id
    #[arg(long, default_value = "id")]
    pub attr_id: String,

    /// Attribute name for the record timestamp
    #[arg(long, default_value = "ts")]
    pub attr_timestamp: String,

    /// Avro object container files; `-` reads stdin
    #[arg(default_value = "-")]
    pub inputs: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum ReceiveCommand {
    /// Receive data from a subscription
    Data(ReceiveArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ReceiveArgs {
    /// The subscription to receive from
    #[arg(long, env = "PUBSUB_SUBSCRIPTION")]
    pub subscription: Option<String>,

    /// Maximum number of messages to accept; negative means unlimited
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub count: i64,

    /// Like --count, and fail unless exactly this many messages arrive
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub expect: i64,

    /// Stop after this long without a message, e.g. 500ms, 5s
    #[arg(long, value_parser = parse_duration)]
    pub wait: Option<Duration>,

    /// Do not acknowledge received messages
    #[arg(long)]
    pub no_ack: bool,

    /// Maximum outstanding messages
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Output format (none|pretty|json)
    #[arg(long)]
    pub output: Option<OutputMode>,
}

impl Default for ReceiveArgs {
    fn default() -> Self {
        Self {
            subscription: None,
            count: -1,
            expect: -1,
            wait: None,
            no_ack: false,
            concurrency: None,
            output: None,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum TopicCommand {
    /// List topics
    #[command(alias = "ls")]
    List,
    /// Create topics
    #[command(aliases = ["create", "make"])]
    New {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Delete topics
    #[command(alias = "rm")]
    Delete {
        #[arg(required = true)]
        names: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum SubscriptionCommand {
    /// List subscriptions
    #[command(alias = "ls")]
    List,
    /// Create subscriptions on a topic
    #[command(aliases = ["create", "make"])]
    New {
        /// The topic to subscribe to
        #[arg(long, env = "PUBSUB_TOPIC")]
        topic: Option<String>,
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Delete subscriptions
    #[command(alias = "rm")]
    Delete {
        #[arg(required = true)]
        names: Vec<String>,
    },
}

// ═══════════════════════════════════════════════════════════════
//  Config file (TOML)
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    pub project: Option<String>,
    pub topic: Option<String>,
    pub subscription: Option<String>,
    pub access_token: Option<String>,
    pub emulator_host: Option<String>,
    pub endpoint: Option<String>,
    pub concurrency: Option<usize>,
    pub output: Option<OutputMode>,
    #[serde(default, with = "humantime_serde")]
    pub wait: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

/// Read when `--config` is not given; it may be absent.
pub const DEFAULT_CONFIG: &str = "pubsub.toml";

pub fn load_config(path: &str) -> Result<Config, CliError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| CliError::Config(format!("cannot read config {path}: {e}")))?;
    toml::from_str(&content).map_err(|e| CliError::Config(format!("bad config {path}: {e}")))
}

// ═══════════════════════════════════════════════════════════════
//  Effective: merged config
// ═══════════════════════════════════════════════════════════════

/// Settings after merging: config file < env/CLI.
#[derive(Debug, Clone)]
pub struct Effective {
    pub project: Option<String>,
    pub topic: Option<String>,
    pub subscription: Option<String>,
    pub access_token: Option<String>,
    pub emulator_host: Option<String>,
    pub endpoint: Option<String>,
    pub concurrency: Option<usize>,
    pub output: Option<OutputMode>,
    pub wait: Option<Duration>,
    pub timeout: Duration,
    pub verbose: bool,
    pub quiet: u8,
}

impl Effective {
    pub fn new(args: &GlobalArgs) -> Result<Self, CliError> {
        let cfg = match &args.config {
            Some(path) => load_config(path)?,
            None if std::path::Path::new(DEFAULT_CONFIG).exists() => load_config(DEFAULT_CONFIG)?,
            None => Config::default(),
        };
        Ok(Self::merge(args, cfg))
    }

    fn merge(args: &GlobalArgs, cfg: Config) -> Self {
        Self {
            project: args.project.clone().or(cfg.project),
            topic: cfg.topic,
            subscription: cfg.subscription,
            access_token: args.token.clone().or(cfg.access_token),
            emulator_host: args.emulator_host.clone().or(cfg.emulator_host),
            endpoint: args.endpoint.clone().or(cfg.endpoint),
            concurrency: cfg.concurrency,
            output: cfg.output,
            wait: cfg.wait,
            timeout: cfg.timeout.unwrap_or(DEFAULT_TIMEOUT),
            verbose: args.verbose || args.debug,
            quiet: args.quiet,
        }
    }

    pub fn project(&self) -> Result<&str, CliError> {
        self.project
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| CliError::Config("No project defined (--project or PUBSUB_PROJECT_ID)".into()))
    }

    /// Topic from the command line, else from the config file.
    pub fn topic(&self, flag: Option<&str>) -> Result<String, CliError> {
        flag.or(self.topic.as_deref())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or_else(|| CliError::Config("No topic defined (--topic or PUBSUB_TOPIC)".into()))
    }

    pub fn subscription(&self, flag: Option<&str>) -> Result<String, CliError> {
        flag.or(self.subscription.as_deref())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| CliError::Config("No subscription defined (--subscription or PUBSUB_SUBSCRIPTION)".into()))
    }

    pub fn rest_config(&self) -> Result<RestConfig, CliError> {
        Ok(RestConfig {
            project: self.project()?.to_string(),
            endpoint: self.endpoint.clone(),
            emulator_host: self.emulator_host.clone().filter(|h| !h.is_empty()),
            access_token: self.access_token.clone(),
            timeout: self.timeout,
        })
    }

    pub fn backend(&self) -> Result<RestBackend, CliError> {
        Ok(RestBackend::new(&self.rest_config()?)?)
    }
}

/// Default tracing filter for the verbosity flags. `RUST_LOG` overrides it.
pub fn log_filter(args: &GlobalArgs) -> &'static str {
    if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn args_with_config(path: &str) -> GlobalArgs {
        GlobalArgs { config: Some(path.to_string()), ..GlobalArgs::default() }
    }

    #[test]
    fn missing_default_file_is_fine() {
        assert!(!std::path::Path::new(DEFAULT_CONFIG).exists());
        let eff = Effective::new(&GlobalArgs::default()).unwrap();
        assert!(eff.project.is_none());
        assert_eq!(eff.timeout, DEFAULT_TIMEOUT);
        assert!(matches!(eff.project(), Err(CliError::Config(_))));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = Effective::new(&args_with_config("/nonexistent/pubsub.toml")).unwrap_err();
        assert!(matches!(err, CliError::Config(m) if m.starts_with("cannot read config")));
    }

    #[test]
    fn file_values_fill_gaps_and_flags_win() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
project = "from-file"
topic = "orders"
subscription = "orders-sub"
emulator_host = "localhost:8085"
concurrency = 4
output = "json"
wait = "250ms"
timeout = "5s"
"#
        )
        .unwrap();
        let path = file.path().to_str().unwrap();

        let eff = Effective::new(&args_with_config(path)).unwrap();
        assert_eq!(eff.project().unwrap(), "from-file");
        assert_eq!(eff.topic(None).unwrap(), "orders");
        assert_eq!(eff.subscription(None).unwrap(), "orders-sub");
        assert_eq!(eff.concurrency, Some(4));
        assert_eq!(eff.output, Some(OutputMode::Json));
        assert_eq!(eff.wait, Some(Duration::from_millis(250)));
        assert_eq!(eff.timeout, Duration::from_secs(5));

        let mut args = args_with_config(path);
        args.project = Some("from-flag".into());
        let eff = Effective::new(&args).unwrap();
        assert_eq!(eff.project().unwrap(), "from-flag");
        assert_eq!(eff.topic(Some("other")).unwrap(), "other");

        let rest = eff.rest_config().unwrap();
        assert_eq!(rest.base_url(), "http://localhost:8085/v1");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "project = [").unwrap();
        let err = Effective::new(&args_with_config(file.path().to_str().unwrap())).unwrap_err();
        assert!(matches!(err, CliError::Config(m) if m.starts_with("bad config")));
    }

    #[test]
    fn missing_names_are_config_errors() {
        let eff = Effective::merge(&GlobalArgs::default(), Config::default());
        assert!(matches!(eff.topic(None), Err(CliError::Config(_))));
        assert!(matches!(eff.subscription(Some("")), Err(CliError::Config(_))));
    }

    #[test]
    fn verbosity_maps_to_filter() {
        let mut args = GlobalArgs::default();
        assert_eq!(log_filter(&args), "warn");
        args.verbose = true;
        assert_eq!(log_filter(&args), "info");
        args.debug = true;
        assert_eq!(log_filter(&args), "debug");
    }

    #[test]
    fn cli_parses_aliases_and_flags() {
        let cli = Cli::try_parse_from([
            "pubsub", "recv", "data", "--subscription", "s", "--count", "5", "--wait", "1s500ms",
            "--output", "json", "-qq", "--project", "p",
        ])
        .unwrap();
        assert_eq!(cli.global.quiet, 2);
        assert_eq!(cli.global.project.as_deref(), Some("p"));
        let Command::Receive { cmd: ReceiveCommand::Data(args) } = cli.command else {
            panic!("expected receive data");
        };
        assert_eq!(args.count, 5);
        assert_eq!(args.expect, -1);
        assert_eq!(args.wait, Some(Duration::from_millis(1500)));
        assert_eq!(args.output, Some(OutputMode::Json));

        let cli = Cli::try_parse_from(["pubsub", "subs", "make", "--topic", "t", "a", "b"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Subscription { cmd: SubscriptionCommand::New { ref names, .. } } if names.len() == 2
        ));

        let cli = Cli::try_parse_from(["pubsub", "topics", "rm", "x"]).unwrap();
        assert!(matches!(cli.command, Command::Topic { cmd: TopicCommand::Delete { .. } }));

        let cli = Cli::try_parse_from(["pubsub", "recv", "data", "--count", "-1"]).unwrap();
        let Command::Receive { cmd: ReceiveCommand::Data(args) } = cli.command else {
            panic!("expected receive data");
        };
        assert_eq!(args.count, -1);
    }
}
