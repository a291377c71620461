pub mod engine;
pub mod ledger;
pub mod notifier;
pub mod scanner;
pub mod scheduler;

pub use engine::{FailedFile, PassPhase, PassResult, SyncConfig, SyncEngine};
pub use ledger::TransferLedger;
pub use notifier::{create_notifier, LogNotifier, Notifier, WebhookNotifier};
pub use scanner::{FileScanner, ScanConfig};
pub use scheduler::{next_daily_fire, PassTrigger, Scheduler, SchedulerHandle};
