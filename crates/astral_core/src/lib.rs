#![doc = include_str!("../README.md")]

mod id;
mod scheduler;
mod time;

pub use id::{EntityId, EntityIdAllocator};
pub use scheduler::{Scheduler, WorkItem};
pub use time::{ClientTime, ServerClock, ServerTime};
