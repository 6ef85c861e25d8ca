//! Scheduler, reservation and consumable-matching configuration.

use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What scheduling does when a required consumable has no binding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedConsumablePolicy {
    /// Schedule anyway; the run binds consumables itself.
    #[default]
    Proceed,
    /// Fail the run before any asset is reserved.
    Block,
}

impl FromStr for UnresolvedConsumablePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "proceed" => Ok(Self::Proceed),
            "block" => Ok(Self::Block),
            other => Err(format!("unknown unresolved consumable policy `{other}`")),
        }
    }
}

/// Reservation lease settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservationConfig {
    /// Lease length for new reservations; `None` disables expiry.
    pub timeout_secs: Option<u64>,
    /// Interval between expiry sweeps.
    pub sweep_interval_secs: u64,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            sweep_interval_secs: 30,
        }
    }
}

/// Consumable matching settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumableConfig {
    /// Suggest concrete consumables during requirement analysis.
    pub auto_assign: bool,
    /// Behaviour for required consumables left unbound.
    pub unresolved_policy: UnresolvedConsumablePolicy,
    /// Items expiring within this many days score 0.8.
    pub expiry_warning_days: i64,
    /// Items expiring within this many days score 0.5.
    pub expiry_critical_days: i64,
}

impl Default for ConsumableConfig {
    fn default() -> Self {
        Self {
            auto_assign: true,
            unresolved_policy: UnresolvedConsumablePolicy::Proceed,
            expiry_warning_days: 30,
            expiry_critical_days: 7,
        }
    }
}

/// Root scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Page size for the startup recovery sweep.
    pub recovery_batch_size: usize,
    /// Task name submitted to the execution queue.
    pub execution_task_name: String,
    /// Reservation lease settings.
    pub reservation: ReservationConfig,
    /// Consumable matching settings.
    pub consumables: ConsumableConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            recovery_batch_size: 100,
            execution_task_name: "execute_protocol_run".into(),
            reservation: ReservationConfig::default(),
            consumables: ConsumableConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.recovery_batch_size == 0 {
            return Err("recovery_batch_size must be greater than 0".into());
        }
        if self.execution_task_name.trim().is_empty() {
            return Err("execution_task_name must not be empty".into());
        }
        if self.reservation.timeout_secs == Some(0) {
            return Err("reservation.timeout_secs must be greater than 0 when set".into());
        }
        if self.reservation.sweep_interval_secs == 0 {
            return Err("reservation.sweep_interval_secs must be greater than 0".into());
        }
        let consumables = &self.consumables;
        if consumables.expiry_critical_days < 0 {
            return Err("consumables.expiry_critical_days must not be negative".into());
        }
        if consumables.expiry_critical_days >= consumables.expiry_warning_days {
            return Err(
                "consumables.expiry_critical_days must be less than expiry_warning_days".into(),
            );
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from defaults overridden by `WORKCELL_*` environment
    /// variables. A `.env` file in the working directory is loaded first if present.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`Self::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(v) = lookup("WORKCELL_RECOVERY_BATCH_SIZE") {
            cfg.recovery_batch_size = parse_var("WORKCELL_RECOVERY_BATCH_SIZE", &v)?;
        }
        if let Some(v) = lookup("WORKCELL_EXECUTION_TASK") {
            cfg.execution_task_name = v;
        }
        if let Some(v) = lookup("WORKCELL_RESERVATION_TIMEOUT_SECS") {
            cfg.reservation.timeout_secs = Some(parse_var("WORKCELL_RESERVATION_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("WORKCELL_SWEEP_INTERVAL_SECS") {
            cfg.reservation.sweep_interval_secs = parse_var("WORKCELL_SWEEP_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("WORKCELL_AUTO_ASSIGN") {
            cfg.consumables.auto_assign = parse_var("WORKCELL_AUTO_ASSIGN", &v)?;
        }
        if let Some(v) = lookup("WORKCELL_UNRESOLVED_CONSUMABLES") {
            cfg.consumables.unresolved_policy = v.parse()?;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| format!("{key}: cannot parse `{value}`: {e}"))
}
