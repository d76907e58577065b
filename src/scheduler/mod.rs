pub mod sweeper;

pub use sweeper::{ReleaseScheduler, SchedulerConfig};
