pub mod ledger;
pub mod log;
pub mod schedule;
pub mod sync;
