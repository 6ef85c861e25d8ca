//! API surface and background maintenance tasks.

pub mod api;
pub mod sweeper;

pub use api::{
    force_release, health, list_schedules, submit_schedule, ActiveSchedulesResponse,
    ForceReleaseRequest, ForceReleaseResponse, Health, ScheduleRequest, ScheduleResponse,
};
pub use sweeper::{spawn_expiry_sweeper, spawn_from_config};
