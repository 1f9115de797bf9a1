//! Schedule calculator: maps a schedule and the current time to the next trigger.
//!
//! Supports three kinds:
//! - `at`: one-shot at an absolute epoch-ms timestamp
//! - `every`: fixed interval aligned to an anchor instant (no drift)
//! - `cron`: 5-field ("MIN HOUR DOM MON DOW") or 6/7-field cron, optional IANA timezone
//!
//! Cron evaluation is delegated to the `cron` crate; timezones come from `chrono-tz`.

use std::str::FromStr;

use chrono::{DateTime, Local, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tickflow_core::{Result, TickflowError};

/// When a job fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum Schedule {
    /// Fire once at an absolute time.
    At { at_ms: i64 },
    /// Fire every `every_ms`, measured from `anchor_ms`.
    Every {
        every_ms: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        anchor_ms: Option<i64>,
    },
    /// Fire per a cron expression. `tz` defaults to the process-local zone.
    Cron {
        expr: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tz: Option<String>,
    },
}

impl Schedule {
    pub fn at(at_ms: i64) -> Self {
        Self::At { at_ms }
    }

    pub fn every(every_ms: i64) -> Self {
        Self::Every {
            every_ms,
            anchor_ms: None,
        }
    }

    pub fn cron(expr: &str) -> Self {
        Self::Cron {
            expr: expr.to_string(),
            tz: None,
        }
    }

    /// Short kind name, as serialized in the `kind` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::At { .. } => "at",
            Self::Every { .. } => "every",
            Self::Cron { .. } => "cron",
        }
    }

    pub fn is_one_shot(&self) -> bool {
        matches!(self, Self::At { .. })
    }

    /// Check the schedule can ever be evaluated.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::At { .. } => Ok(()),
            Self::Every { every_ms, .. } => {
                if *every_ms < 1 {
                    return Err(TickflowError::Schedule(format!(
                        "interval must be at least 1ms, got {every_ms}"
                    )));
                }
                Ok(())
            }
            Self::Cron { expr, tz } => {
                parse_cron(expr)?;
                if let Some(name) = tz {
                    parse_tz(name)?;
                }
                Ok(())
            }
        }
    }

    /// Fill in an `every` anchor that was left unset.
    pub fn with_default_anchor(mut self, anchor: i64) -> Self {
        if let Self::Every { anchor_ms, .. } = &mut self
            && anchor_ms.is_none()
        {
            *anchor_ms = Some(anchor);
        }
        self
    }
}

/// Compute the next trigger strictly after `now_ms`.
///
/// `Ok(None)` means the schedule is exhausted (past one-shot, or a cron
/// expression that never matches again).
pub fn compute_next_run(schedule: &Schedule, now_ms: i64) -> Result<Option<i64>> {
    match schedule {
        Schedule::At { at_ms } => Ok((*at_ms > now_ms).then_some(*at_ms)),
        Schedule::Every {
            every_ms,
            anchor_ms,
        } => {
            if *every_ms < 1 {
                return Err(TickflowError::Schedule(format!(
                    "interval must be at least 1ms, got {every_ms}"
                )));
            }
            let anchor = anchor_ms.unwrap_or(now_ms);
            if anchor > now_ms {
                return Ok(Some(anchor));
            }
            let out_of_range = || {
                TickflowError::Schedule(format!("anchor {anchor} is out of range for now {now_ms}"))
            };
            let elapsed = now_ms.checked_sub(anchor).ok_or_else(out_of_range)?;
            let next = (elapsed / every_ms)
                .checked_add(1)
                .and_then(|steps| steps.checked_mul(*every_ms))
                .and_then(|offset| anchor.checked_add(offset))
                .ok_or_else(out_of_range)?;
            Ok(Some(next))
        }
        Schedule::Cron { expr, tz } => {
            let cron = parse_cron(expr)?;
            let now = Utc
                .timestamp_millis_opt(now_ms)
                .single()
                .ok_or_else(|| TickflowError::Schedule(format!("timestamp out of range: {now_ms}")))?;
            let next = match tz {
                Some(name) => next_after(&cron, &now.with_timezone(&parse_tz(name)?)),
                None => next_after(&cron, &now.with_timezone(&Local)),
            };
            Ok(next)
        }
    }
}

fn next_after<Z: TimeZone>(cron: &cron::Schedule, after: &DateTime<Z>) -> Option<i64> {
    cron.after(after).next().map(|dt| dt.timestamp_millis())
}

/// Parse a cron expression, accepting the classic 5-field form by
/// pinning the seconds field to 0.
fn parse_cron(expr: &str) -> Result<cron::Schedule> {
    let fields = expr.split_whitespace().count();
    let normalized = match fields {
        5 => format!("0 {}", expr.trim()),
        6 | 7 => expr.trim().to_string(),
        _ => {
            return Err(TickflowError::Schedule(format!(
                "invalid cron expression '{expr}' (need 5 fields: MIN HOUR DOM MON DOW)"
            )));
        }
    };
    cron::Schedule::from_str(&normalized)
        .map_err(|e| TickflowError::Schedule(format!("invalid cron expression '{expr}': {e}")))
}

fn parse_tz(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| TickflowError::Schedule(format!("unknown timezone '{name}'")))
}
