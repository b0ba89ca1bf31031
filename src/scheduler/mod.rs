//! Tag-key polling: one shared poll loop per distinct tag key.

mod poll;
#[allow(clippy::module_inception)]
mod scheduler;


pub use poll::{MIN_POLL_INTERVAL, PollConfig};
pub use scheduler::{
    ItemBus, PollError, PollOutcome, PollReport, RunState, SchedulerError, TagScheduler,
};
