//! # Workcell Scheduler
//!
//! Protocol scheduling and asset reservation for a lab-automation workcell.
//!
//! Before a protocol run may execute, every physical asset it needs (machines,
//! labware, the deck) must be exclusively claimed so no concurrent run touches
//! the same hardware. This crate admits runs, claims their assets all-or-nothing,
//! suggests concrete consumables for unbound labware, hands admitted runs to an
//! execution queue and releases everything when they finish.
//!
//! ## Core Problem Solved
//!
//! - **Exclusive Hardware**: Two runs must never drive the same liquid handler or
//!   pipette from the same plate at the same time
//! - **Partial Claims**: A run that gets three of its four assets must not keep
//!   any of them
//! - **Restarts**: Claims and schedules held in memory vanish with the process,
//!   so runs left half-scheduled are failed on startup
//! - **Flaky Brokers**: An unreachable execution queue degrades to direct
//!   execution instead of losing the run
//!
//! ## Key Pieces
//!
//! - [`core::AssetReservationManager`]: check-then-act claims under per-key locks,
//!   backed by a uniqueness constraint in the store
//! - [`core::ConsumableAssignmentService`]: scores catalog entries on volume,
//!   type, expiry and batch
//! - [`core::ProtocolScheduler`]: analyze → reserve → enqueue → track → release
//!
//! ```rust,ignore
//! use workcell_scheduler::builders::ProtocolSchedulerBuilder;
//! use workcell_scheduler::config::SchedulerConfig;
//!
//! let scheduler = ProtocolSchedulerBuilder::in_memory(SchedulerConfig::from_env()?)
//!     .build()?;
//! scheduler.recover_stale_runs().await?;
//! let admitted = scheduler.schedule(run_id, &params, None).await?;
//! ```
//!
//! For complete flows, see `tests/scheduler_test.rs`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions, reservations and consumable matching.
pub mod core;
/// Configuration models for scheduling, leases and consumable scoring.
pub mod config;
/// Builders to construct a scheduler from configuration.
pub mod builders;
/// Infrastructure adapters for stores and the execution queue.
pub mod infra;
/// API surface and background maintenance tasks.
pub mod runtime;
/// Shared utilities.
pub mod util;
