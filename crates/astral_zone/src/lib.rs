#![doc = include_str!("../README.md")]

mod manager;
mod partial;
mod zone;

pub use manager::{Placement, ZoneKey, ZoneManager};
pub use partial::merged_zone;
pub use zone::{Subscriber, Zone};
