//! Condition evaluator: pure predicates over a value and the time of day.

use crate::error::{Error, Result};

use super::{Condition, TimeOfDay};

/// Evaluate `condition` against a telemetry value at wall-clock `now`.
///
/// Threshold comparisons are exact IEEE comparisons; no tolerance is
/// applied, so `==`/`!=` on readings behave exactly like `f64` equality.
pub fn evaluate(value: f64, condition: &Condition, now: TimeOfDay) -> Result<bool> {
    match condition {
        Condition::Threshold { op, setpoint } => Ok(op.compare(value, *setpoint)),
        Condition::TimeRange { from, to } => Ok(within_range(now, *from, *to)),
        Condition::Unconditional => Ok(true),
        Condition::Invalid { op } => Err(Error::InvalidOperator(op.clone())),
    }
}

/// Whether `now` lies strictly inside the `from`..`to` window.
///
/// A window with `from > to` wraps past midnight.  A window with
/// `from == to` degenerates to that single minute.
pub fn within_range(now: TimeOfDay, from: TimeOfDay, to: TimeOfDay) -> bool {
    if from > to {
        now > from || now < to
    } else if from < to {
        now > from && now < to
    } else {
        now == from
    }
}
