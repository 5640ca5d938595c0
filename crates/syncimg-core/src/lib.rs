pub mod cache;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod ledger;
pub mod listing;
pub mod notify;
pub mod paths;
pub mod retention;
pub mod source;
pub mod state;
pub mod template;

pub mod reporter;

pub use cache::ContentCache;
pub use command::{CommandOutput, CommandRunner, Invocation, ShellRunner};
pub use config::{Config, SuiteConfig};
pub use engine::{Decision, DistroReport, Engine, EngineOptions, RunReport, decide};
pub use error::SyncError;
pub use fetch::{DefaultTransport, FetchError, Transport};
pub use ledger::{Ledger, LedgerRecord, LedgerStore};
pub use paths::*;
pub use reporter::{NullReporter, Reporter, TracingReporter};
