//! Typed rules.
//!
//! Rule blocks from the configuration are compiled once at startup into
//! [`Rule`]s whose condition blocks are already resolved to a
//! [`Condition`] variant; evaluation never re-inspects the raw JSON.
//!
//! ```text
//!  ConfigFile ──▶ RuleConfig ──compile──▶ Rule ──▶ RuleEngine
//!                                          │
//!                                          └─ RuleKey (alert dedupe)
//! ```

pub mod condition;

use std::collections::BTreeMap;
use std::fmt;

use chrono::Timelike;
use log::error;
use serde::Serialize;

use crate::alerts::RuleKey;
use crate::config::{ConditionConfig, ControllerConfig, RuleConfig, SIGNAL_RULES, TIMER_RULES};
use crate::error::{Error, Result};

// ═══════════════════════════════════════════════════════════════
//  Condition types
// ═══════════════════════════════════════════════════════════════

/// Numeric comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Comparator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparator {
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "==" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }

    pub fn compare(self, value: f64, setpoint: f64) -> bool {
        match self {
            Self::Eq => value == setpoint,
            Self::Ne => value != setpoint,
            Self::Gt => value > setpoint,
            Self::Ge => value >= setpoint,
            Self::Lt => value < setpoint,
            Self::Le => value <= setpoint,
        }
    }
}

/// Wall-clock time with minute resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    /// Parse `"HH:MM"`.
    pub fn parse(s: &str) -> Result<Self> {
        let bad = || Error::Config(format!("bad time of day {s:?}, expected HH:MM"));
        let (h, m) = s.trim().split_once(':').ok_or_else(bad)?;
        let hour = h.parse().map_err(|_| bad())?;
        let minute = m.parse().map_err(|_| bad())?;
        Self::new(hour, minute).ok_or_else(bad)
    }

    /// Truncate a chrono time to the minute.
    pub fn from_time<T: Timelike>(t: &T) -> Self {
        Self {
            hour: t.hour() as u8,
            minute: t.minute() as u8,
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// A guard on a rule block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Condition {
    /// `value <op> setpoint`.
    Threshold { op: Comparator, setpoint: f64 },
    /// Current time strictly inside `from`..`to`, wrapping past midnight.
    TimeRange { from: TimeOfDay, to: TimeOfDay },
    /// No guard: a bare command.
    Unconditional,
    /// Operator outside the comparator set.  Evaluating it is an error,
    /// which aborts the owning rule.
    Invalid { op: String },
}

impl Condition {
    /// Operator and operand text for notifications.
    pub fn operands(&self) -> (String, String) {
        match self {
            Self::Threshold { op, setpoint } => (op.symbol().into(), setpoint.to_string()),
            Self::TimeRange { from, to } => ("in".into(), format!("{from}-{to}")),
            Self::Unconditional => (String::new(), String::new()),
            Self::Invalid { op } => (op.clone(), String::new()),
        }
    }

    fn compile(block: &ConditionConfig) -> Result<Self> {
        if let (Some(from), Some(to)) = (&block.from, &block.to) {
            return Ok(Self::TimeRange {
                from: TimeOfDay::parse(from)?,
                to: TimeOfDay::parse(to)?,
            });
        }
        if let Some(op) = &block.op {
            let setpoint = block
                .setpoint
                .as_ref()
                .ok_or_else(|| Error::Config(format!("operator {op:?} without setpoint")))
                .and_then(parse_setpoint)?;
            return Ok(match Comparator::parse(op) {
                Some(op) => Self::Threshold { op, setpoint },
                None => Self::Invalid { op: op.clone() },
            });
        }
        if block.cmd.is_some() {
            return Ok(Self::Unconditional);
        }
        Err(Error::Config(
            "condition needs {op, setpoint}, {from, to} or {cmd}".into(),
        ))
    }
}

fn parse_setpoint(v: &serde_json::Value) -> Result<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| Error::Config(format!("setpoint {v} is not a number")))
}

// ═══════════════════════════════════════════════════════════════
//  Rules
// ═══════════════════════════════════════════════════════════════

/// Alert block: a condition and the title used in notifications.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertSpec {
    pub condition: Condition,
    pub title: String,
}

/// `on`/`off` block: a guard and the command template it dispatches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Action {
    pub condition: Condition,
    pub command: String,
}

/// Which action block a dispatch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    On,
    Off,
}

impl fmt::Display for Switch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::On => "on",
            Self::Off => "off",
        })
    }
}

/// A compiled rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub enabled: bool,
    /// Only apply to telemetry from the node with this name.
    pub node: Option<String>,
    /// Telemetry field supplying the value.
    pub value: String,
    pub alert: Option<AlertSpec>,
    /// Allowed time window; outside it the `off` action is forced.
    pub time: Option<Condition>,
    pub on: Option<Action>,
    pub off: Option<Action>,
    key: RuleKey,
}

impl Rule {
    pub fn compile(raw: &RuleConfig) -> Result<Self> {
        let alert = raw
            .alert
            .as_ref()
            .map(|b| -> Result<AlertSpec> {
                Ok(AlertSpec {
                    condition: Condition::compile(b)?,
                    title: b.title.clone().unwrap_or_else(|| raw.value.clone()),
                })
            })
            .transpose()?;
        let time = raw.time.as_ref().map(Condition::compile).transpose()?;
        let on = raw.on.as_ref().map(compile_action).transpose()?;
        let off = raw.off.as_ref().map(compile_action).transpose()?;
        let key = RuleKey::of(&(raw.enabled, &raw.node, &raw.value, &alert, &time, &on, &off))?;
        Ok(Self {
            enabled: raw.enabled,
            node: raw.node.clone(),
            value: raw.value.clone(),
            alert,
            time,
            on,
            off,
            key,
        })
    }

    /// Stable identity digest (definition fields only).
    pub fn key(&self) -> RuleKey {
        self.key
    }

    pub fn action(&self, switch: Switch) -> Option<&Action> {
        match switch {
            Switch::On => self.on.as_ref(),
            Switch::Off => self.off.as_ref(),
        }
    }

    fn conditions(&self) -> impl Iterator<Item = &Condition> {
        self.alert
            .as_ref()
            .map(|a| &a.condition)
            .into_iter()
            .chain(self.time.as_ref())
            .chain(self.on.as_ref().map(|a| &a.condition))
            .chain(self.off.as_ref().map(|a| &a.condition))
    }
}

fn compile_action(block: &ConditionConfig) -> Result<Action> {
    let command = block
        .cmd
        .clone()
        .ok_or_else(|| Error::Config("on/off block without cmd".into()))?;
    Ok(Action {
        condition: Condition::compile(block)?,
        command,
    })
}

/// All compiled rule lists.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    by_type: BTreeMap<String, Vec<Rule>>,
    signal: Vec<Rule>,
    timers: Vec<Rule>,
}

impl RuleSet {
    /// Compile every rule list in the configuration.
    ///
    /// Rules with an operator outside the comparator set still compile
    /// (they fail at evaluation), but are reported here so the
    /// misconfiguration is visible at startup.
    pub fn compile(config: &ControllerConfig) -> Result<Self> {
        let mut set = Self::default();
        for (list, raw_rules) in &config.rules {
            let mut rules = Vec::with_capacity(raw_rules.len());
            for (i, raw) in raw_rules.iter().enumerate() {
                let rule = Rule::compile(raw)
                    .map_err(|e| Error::Config(format!("rules.{list}[{i}]: {e}")))?;
                for c in rule.conditions() {
                    if let Condition::Invalid { op } = c {
                        error!("rules: {list}[{i}] uses invalid operator {op:?}");
                    }
                }
                rules.push(rule);
            }
            match list.as_str() {
                SIGNAL_RULES => set.signal = rules,
                TIMER_RULES => set.timers = rules,
                _ => {
                    set.by_type.insert(list.clone(), rules);
                }
            }
        }
        Ok(set)
    }

    /// Rules for a sensor type (empty when none are configured).
    pub fn for_type(&self, kind: &str) -> &[Rule] {
        self.by_type.get(kind).map_or(&[][..], Vec::as_slice)
    }

    /// Rules applied to every accepted telemetry message.
    pub fn signal(&self) -> &[Rule] {
        &self.signal
    }

    /// Rules evaluated on every tick.
    pub fn timers(&self) -> &[Rule] {
        &self.timers
    }

    pub fn len(&self) -> usize {
        self.by_type.values().map(Vec::len).sum::<usize>() + self.signal.len() + self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
