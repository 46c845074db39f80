pub mod config;
pub mod driver;
pub mod error;
pub mod reconcile;

pub use config::{Cli, ConfigError, RunConfig};
pub use driver::{run, run_with, PassSummary};
pub use error::{codes, AppError, AppResult};
pub use reconcile::{
    diff, Operation, OutcomeStatus, PassState, ReconcileError, ReconcileEvent, ReconcileObserver,
    ReconcileOutcome, Reconciler, Reconciliation, TracingObserver,
};
