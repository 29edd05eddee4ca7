//! Controller configuration.
//!
//! Mirrors the JSON configuration document: bus topics, accepted sensor
//! types, the node table, symbol tables used to resolve command
//! templates, rule lists and timing parameters.  Loaded once at startup;
//! rule blocks are compiled into typed [`Rule`](crate::rules::Rule)s by
//! [`RuleSet::compile`](crate::rules::RuleSet::compile).

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Rule list evaluated against every accepted telemetry message.
pub const SIGNAL_RULES: &str = "signal";
/// Rule list evaluated on every tick.
pub const TIMER_RULES: &str = "timers";

/// Core controller configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub topics: Topics,
    /// Sensor types (`t=` field) accepted from the telemetry topic.
    pub accept: Vec<String>,
    /// Node id → human-readable name.
    pub node: BTreeMap<String, String>,
    /// Field → (id → name) tables for resolving symbolic command fields.
    /// The `node` table is implicitly available under the `node` field.
    pub symbols: BTreeMap<String, BTreeMap<String, String>>,
    /// Rule lists keyed by sensor type, plus `signal` and `timers`.
    pub rules: BTreeMap<String, Vec<RuleConfig>>,
    pub node_timeout: NodeTimeoutConfig,
    pub tick: TickConfig,
    pub shell: ShellConfig,
    pub dispatch: DispatchConfig,
    pub report: ReportConfig,
}

/// Bus topic names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Topics {
    /// Node → controller telemetry; also carries command results.
    pub telemetry: String,
    /// Controller → node commands.
    pub command: String,
    pub tick: String,
    /// Administrative commands.
    pub shell: String,
    /// Push notification forwarder.
    pub notify: String,
    /// Retained copy of the running configuration.
    pub config: String,
}

/// One rule block as written in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default = "enabled_default", deserialize_with = "flag")]
    pub enabled: bool,
    #[serde(default)]
    pub node: Option<String>,
    /// Telemetry field supplying the compared value.
    pub value: String,
    #[serde(default)]
    pub alert: Option<ConditionConfig>,
    #[serde(default)]
    pub time: Option<ConditionConfig>,
    #[serde(default)]
    pub on: Option<ConditionConfig>,
    #[serde(default)]
    pub off: Option<ConditionConfig>,
}

/// A condition block: `{op, setpoint}`, `{from, to}` or just `{cmd}`.
/// `cmd` carries the command template for `on`/`off`; `title` names an
/// `alert`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionConfig {
    pub op: Option<String>,
    pub setpoint: Option<serde_json::Value>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub cmd: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeTimeoutConfig {
    /// Seconds of silence before a node is reported.
    pub freq_secs: f64,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Tick period in seconds.
    pub freq_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Accept commands on the shell topic at all.
    #[serde(deserialize_with = "flag")]
    pub enabled: bool,
    /// Answer `get=report`.
    #[serde(deserialize_with = "flag")]
    pub report_enabled: bool,
}

/// Acknowledgement/retry protocol parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Countdown per attempt (seconds).
    pub timeout_secs: f64,
    /// Extra attempts after the first.
    pub retries: u32,
    /// Countdown clock period (milliseconds).
    pub clock_interval_ms: u64,
    /// Fallback wake period for waiting senders (milliseconds).
    pub wait_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub title: String,
    pub divider: String,
    /// Node name → report lines.
    pub node: BTreeMap<String, Vec<ReportEntryConfig>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEntryConfig {
    pub label: String,
    /// Telemetry field holding the value.
    pub value: String,
    #[serde(default)]
    pub unit: String,
    /// When set, the entry tracks `value → state` pairs instead of a
    /// single reading.
    #[serde(default)]
    pub state: Option<String>,
}

// ── Defaults ─────────────────────────────────────────────────

fn enabled_default() -> bool {
    true
}

/// Accept `0`/`1` as well as `true`/`false`.
fn flag<'de, D>(deserializer: D) -> core::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Bool(b) => Ok(b),
        serde_json::Value::Number(n) => Ok(n.as_f64().is_some_and(|v| v != 0.0)),
        other => Err(serde::de::Error::custom(format!(
            "expected 0, 1 or a boolean, got {other}"
        ))),
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            telemetry: "serial/pub".into(),
            command: "serial/sub".into(),
            tick: "control/tick".into(),
            shell: "control/command".into(),
            notify: "notify/sub".into(),
            config: "control/config".into(),
        }
    }
}

impl Default for NodeTimeoutConfig {
    fn default() -> Self {
        Self {
            freq_secs: 600.0, // 10 min
            title: "node timeout".into(),
        }
    }
}

impl Default for TickConfig {
    fn default() -> Self {
        Self { freq_secs: 60.0 }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            report_enabled: true,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 0.5,
            retries: 2,
            clock_interval_ms: 10,
            wait_interval_ms: 10,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            title: "Status report".into(),
            divider: "----".into(),
            node: BTreeMap::new(),
        }
    }
}

// ── Loading and lookups ──────────────────────────────────────

/// Longest accepted period for any timer: one year.
pub const MAX_PERIOD_SECS: f64 = 365.0 * 24.0 * 3600.0;

fn check_period(name: &str, secs: f64) -> Result<()> {
    if secs > 0.0 && secs <= MAX_PERIOD_SECS {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "{name} must be positive and at most {MAX_PERIOD_SECS}s, got {secs}"
        )))
    }
}

impl ControllerConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject periods that would stall the clock or the tick generator, or
    /// overflow a timer.
    pub fn validate(&self) -> Result<()> {
        check_period("tick.freq_secs", self.tick.freq_secs)?;
        check_period("node_timeout.freq_secs", self.node_timeout.freq_secs)?;
        check_period("dispatch.timeout_secs", self.dispatch.timeout_secs)?;
        for (name, ms) in [
            ("dispatch.clock_interval_ms", self.dispatch.clock_interval_ms),
            ("dispatch.wait_interval_ms", self.dispatch.wait_interval_ms),
        ] {
            check_period(name, ms as f64 / 1000.0)?;
        }
        Ok(())
    }

    /// Whether telemetry of sensor type `kind` is processed.
    pub fn accepts(&self, kind: &str) -> bool {
        self.accept.iter().any(|t| t == kind)
    }

    pub fn node_name(&self, id: &str) -> Option<&str> {
        self.node.get(id).map(String::as_str)
    }

    /// Reverse-lookup table for a command field, if the field is symbolic.
    pub fn symbol_table(&self, field: &str) -> Option<&BTreeMap<String, String>> {
        self.symbols
            .get(field)
            .or_else(|| (field == "node").then_some(&self.node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "accept": ["soil", "light"],
        "node": {"3": "garden"},
        "symbols": {"cmd": {"1": "pump"}},
        "rules": {
            "soil": [{
                "enabled": 1,
                "value": "moisture",
                "on": {"op": "<", "setpoint": 20, "cmd": "node=3&cmd=pump&r=1&s=1"}
            }],
            "signal": [{"enabled": 0, "value": "rssi"}]
        },
        "node_timeout": {"freq_secs": 300, "title": "silent node"},
        "dispatch": {"retries": 4}
    }"#;

    #[test]
    fn default_config_is_sane() {
        let c = ControllerConfig::default();
        assert!(c.validate().is_ok());
        assert!(c.dispatch.timeout_secs > 0.0);
        assert!(
            (c.dispatch.clock_interval_ms as f64) < c.dispatch.timeout_secs * 1000.0,
            "countdown clock must tick several times per attempt"
        );
        assert!(c.tick.freq_secs < c.node_timeout.freq_secs);
    }

    #[test]
    fn parses_sample_document() {
        let c = ControllerConfig::from_json(SAMPLE).unwrap();
        assert!(c.accepts("soil"));
        assert!(!c.accepts("rain"));
        assert_eq!(c.node_name("3"), Some("garden"));
        assert_eq!(c.rules["soil"].len(), 1);
        assert!(c.rules["soil"][0].enabled);
        assert!(!c.rules["signal"][0].enabled);
        assert_eq!(c.node_timeout.freq_secs, 300.0);
        assert_eq!(c.dispatch.retries, 4);
        // Unspecified sections fall back to defaults.
        assert_eq!(c.dispatch.timeout_secs, 0.5);
        assert_eq!(c.topics.command, "serial/sub");
    }

    #[test]
    fn node_table_doubles_as_symbol_table() {
        let c = ControllerConfig::from_json(SAMPLE).unwrap();
        assert_eq!(c.symbol_table("node").unwrap()["3"], "garden");
        assert_eq!(c.symbol_table("cmd").unwrap()["1"], "pump");
        assert!(c.symbol_table("r").is_none());
    }

    #[test]
    fn rejects_zero_tick() {
        let err = ControllerConfig::from_json(r#"{"tick": {"freq_secs": 0}}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_periods_that_overflow_timers() {
        for raw in [
            r#"{"tick": {"freq_secs": 1e20}}"#,
            r#"{"node_timeout": {"freq_secs": 1e300}}"#,
            r#"{"dispatch": {"timeout_secs": -1}}"#,
            r#"{"dispatch": {"clock_interval_ms": 0}}"#,
            r#"{"dispatch": {"wait_interval_ms": 18446744073709551615}}"#,
        ] {
            let err = ControllerConfig::from_json(raw).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{raw}: {err}");
        }
        assert!(ControllerConfig::from_json(r#"{"tick": {"freq_secs": 86400}}"#).is_ok());
    }

    #[test]
    fn shell_flags_accept_numbers() {
        let c = ControllerConfig::from_json(r#"{"shell": {"enabled": 1, "report_enabled": 0}}"#)
            .unwrap();
        assert!(c.shell.enabled);
        assert!(!c.shell.report_enabled);
        let c = ControllerConfig::from_json(r#"{"shell": {"report_enabled": false}}"#).unwrap();
        assert!(c.shell.enabled, "missing flag keeps its default");
    }

    #[test]
    fn rejects_non_flag_enabled() {
        let raw = r#"{"rules": {"soil": [{"enabled": "yes", "value": "m"}]}}"#;
        assert!(ControllerConfig::from_json(raw).is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let c = ControllerConfig::from_json(SAMPLE).unwrap();
        let json = serde_json::to_string(&c).unwrap();
        let c2 = ControllerConfig::from_json(&json).unwrap();
        assert_eq!(c2.node, c.node);
        assert_eq!(c2.dispatch.retries, c.dispatch.retries);
    }
}
