//! Configuration models for scheduling, reservation leases and consumable matching.

pub mod scheduler;

pub use scheduler::{
    ConsumableConfig, ReservationConfig, SchedulerConfig, UnresolvedConsumablePolicy,
};
