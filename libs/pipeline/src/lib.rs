pub mod config;
pub mod display;
pub mod error;
pub mod record;
mod decision;
mod intake;
mod receive;
mod writer;

pub use config::{Limit, OutputMode, ReceiveOptions, TerminationPolicy, Verdict};
pub use display::Display;
pub use error::ReceiveError;
pub use receive::{ReceivePipeline, ReceiveSummary};
pub use record::{Decision, FormattedRecord, ReceiveCounts, ReceiveState};
