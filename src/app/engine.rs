//! Rule engine: turns telemetry and ticks into alerts and commands.
//!
//! ```text
//!  telemetry ─▶ decode ─▶ accepted type? ─▶ liveness reset
//!                                           │
//!                     rules[type] ++ rules[signal], in order
//!                                           │
//!            ┌─ alert   → AlertTracker raise/clear → notify
//!    per rule┤  time=false → dispatch off
//!            └─ on? → dispatch on, else off? → dispatch off
//!
//!  tick ─▶ rules[timers] (same steps) ─▶ liveness tick → notify
//! ```
//!
//! A failing rule is logged and skipped; its siblings still run.  At most
//! one command is dispatched per rule per event.

use std::sync::Arc;

use chrono::NaiveDateTime;
use log::{debug, error, info, warn};

use crate::alerts::AlertTracker;
use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::liveness::{NodeLivenessTracker, TIMEOUT_OP};
use crate::rules::condition::evaluate;
use crate::rules::{AlertSpec, Rule, RuleSet, Switch, TimeOfDay};
use crate::wire::Payload;

use super::events::{AlertNotice, Notification};
use super::ports::{Bus, Clock, CommandPort};
use super::report::StatusReport;

pub struct RuleEngine {
    rules: RuleSet,
    config: ControllerConfig,
    alerts: Arc<AlertTracker>,
    liveness: NodeLivenessTracker,
    report: StatusReport,
    commands: Arc<dyn CommandPort>,
    bus: Arc<dyn Bus>,
    clock: Arc<dyn Clock>,
}

impl RuleEngine {
    /// Compile the rule lists and set up the trackers.
    pub fn new(
        config: &ControllerConfig,
        commands: Arc<dyn CommandPort>,
        bus: Arc<dyn Bus>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let rules = RuleSet::compile(config)?;
        let alerts = Arc::new(AlertTracker::new());
        let liveness = NodeLivenessTracker::new(config, Arc::clone(&alerts))?;
        if rules.is_empty() {
            warn!("engine: no rules configured, only liveness and reports are active");
        }
        info!(
            "engine: {} rules, {} nodes, accepting {:?}",
            rules.len(),
            config.node.len(),
            config.accept
        );
        Ok(Self {
            rules,
            config: config.clone(),
            alerts,
            liveness,
            report: StatusReport::new(config),
            commands,
            bus,
            clock,
        })
    }

    /// Handle one telemetry message.  Malformed messages and messages of
    /// unaccepted types are dropped.
    pub fn on_telemetry(&self, raw: &str) {
        match self.telemetry(raw) {
            Ok(()) => {}
            Err(Error::UnknownField(field)) => debug!("engine: telemetry without {field}, dropped"),
            Err(e) => warn!("engine: dropped telemetry {raw:?}: {e}"),
        }
    }

    /// Handle one tick: timer rules first, then node liveness.
    pub fn on_tick(&self, raw: &str) {
        let payload = match Payload::decode(raw) {
            Ok(p) if p.contains("ts") => p,
            Ok(_) => {
                debug!("engine: tick without ts, ignored");
                return;
            }
            Err(e) => {
                warn!("engine: dropped tick {raw:?}: {e}");
                return;
            }
        };
        let now = self.clock.now();
        let node = payload.first("node");
        for rule in self.rules.timers() {
            self.apply(rule, &payload, node, now);
        }
        for id in self.liveness.tick(self.config.tick.freq_secs, now) {
            self.notify(&Notification::Alert(self.liveness_notice(&id, false, now)));
        }
    }

    /// Publish a notification; failures are logged, never propagated.
    pub fn notify(&self, notification: &Notification) {
        if let Err(e) = self
            .bus
            .publish(&self.config.topics.notify, &notification.to_payload(), false)
        {
            warn!("engine: notification not published: {e}");
        }
    }

    /// Current status report as a note.
    pub fn report_note(&self) -> Notification {
        Notification::Note {
            title: self.report.title().to_owned(),
            body: self.report.body(),
            at: self.clock.now(),
        }
    }

    pub fn alerts(&self) -> &AlertTracker {
        &self.alerts
    }

    fn telemetry(&self, raw: &str) -> Result<()> {
        let payload = Payload::decode(raw)?;
        let kind = payload
            .first("t")
            .ok_or_else(|| Error::UnknownField("t".into()))?;
        if !self.config.accepts(kind) {
            debug!("engine: type {kind:?} not accepted");
            return Ok(());
        }

        let now = self.clock.now();
        let node = payload.first("node");
        if let Some(id) = node {
            if self.liveness.reset(id) {
                self.notify(&Notification::Alert(self.liveness_notice(id, true, now)));
            }
        }

        for rule in self.rules.for_type(kind).iter().chain(self.rules.signal()) {
            self.apply(rule, &payload, node, now);
        }
        self.report.update(&payload);
        Ok(())
    }

    fn apply(&self, rule: &Rule, payload: &Payload, node: Option<&str>, now: NaiveDateTime) {
        match self.run_rule(rule, payload, node, now) {
            Ok(_) => {}
            Err(Error::UnknownField(field)) => {
                debug!("engine: rule on {}: no field {field}", rule.value)
            }
            Err(e @ Error::InvalidOperator(_)) => {
                error!("engine: rule on {} aborted: {e}", rule.value)
            }
            Err(e) => warn!("engine: rule on {} failed: {e}", rule.value),
        }
    }

    /// Run one rule.  Returns the action dispatched, if any.
    fn run_rule(
        &self,
        rule: &Rule,
        payload: &Payload,
        node: Option<&str>,
        now: NaiveDateTime,
    ) -> Result<Option<Switch>> {
        if !rule.enabled {
            return Ok(None);
        }
        if let (Some(scope), Some(id)) = (&rule.node, node) {
            let name = self.config.node_name(id).unwrap_or(id);
            if scope != name && scope != id {
                return Ok(None);
            }
        }

        let raw = payload
            .first(&rule.value)
            .ok_or_else(|| Error::UnknownField(rule.value.clone()))?;
        let value: f64 = raw.trim().parse().map_err(|_| {
            Error::MalformedMessage(format!("{}={raw:?} is not a number", rule.value))
        })?;
        let tod = TimeOfDay::from_time(&now);

        if let (Some(alert), Some(id)) = (&rule.alert, node) {
            let hit = evaluate(value, &alert.condition, tod)?;
            let changed = if hit {
                self.alerts.raise(&rule.key(), id, now)
            } else {
                self.alerts.clear(&rule.key(), id)
            };
            if changed {
                let notice = self.alert_notice(id, alert, value, !hit, now);
                self.notify(&Notification::Alert(notice));
            }
        }

        if let Some(window) = &rule.time {
            if !evaluate(value, window, tod)? {
                return self.fire(rule, Switch::Off);
            }
        }
        for switch in [Switch::On, Switch::Off] {
            let Some(action) = rule.action(switch) else {
                continue;
            };
            if evaluate(value, &action.condition, tod)? {
                return self.fire(rule, switch);
            }
        }
        Ok(None)
    }

    fn fire(&self, rule: &Rule, switch: Switch) -> Result<Option<Switch>> {
        let Some(action) = rule.action(switch) else {
            return Ok(None);
        };
        let result = self.commands.dispatch(&action.command)?;
        info!("engine: {} {switch} ({}) -> {result}", rule.value, action.command);
        Ok(Some(switch))
    }

    fn display_name(&self, id: &str) -> String {
        self.config.node_name(id).unwrap_or("?").to_owned()
    }

    fn alert_notice(
        &self,
        id: &str,
        alert: &AlertSpec,
        value: f64,
        cleared: bool,
        at: NaiveDateTime,
    ) -> AlertNotice {
        let (op, setpoint) = alert.condition.operands();
        AlertNotice {
            node: self.display_name(id),
            title: alert.title.clone(),
            cleared,
            // Readings always show as floats: `12.0`, `35.5`.
            value: format!("{value:?}"),
            op,
            setpoint,
            at,
        }
    }

    fn liveness_notice(&self, id: &str, cleared: bool, at: NaiveDateTime) -> AlertNotice {
        let timeout = self.liveness.timeout_secs().to_string();
        AlertNotice {
            node: self.display_name(id),
            title: self.liveness.title().to_owned(),
            cleared,
            value: timeout.clone(),
            op: TIMEOUT_OP.into(),
            setpoint: timeout,
            at,
        }
    }
}
