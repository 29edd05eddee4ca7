//! Status report: the latest reading of selected fields per node.
//!
//! Entries come from the `report.node` configuration section.  A plain
//! entry keeps the last value of one field; an entry with `state` keeps
//! a `value → state` map instead (e.g. relay number → on/off).  Symbolic
//! fields are shown by name.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Mutex, PoisonError};

use log::debug;

use crate::config::{ControllerConfig, ReportEntryConfig};
use crate::wire::Payload;

#[derive(Debug, Clone)]
struct Entry {
    spec: ReportEntryConfig,
    value: Option<String>,
    states: BTreeMap<String, String>,
}

pub struct StatusReport {
    title: String,
    divider: String,
    node_names: BTreeMap<String, String>,
    symbols: BTreeMap<String, BTreeMap<String, String>>,
    entries: Mutex<BTreeMap<String, Vec<Entry>>>,
}

impl StatusReport {
    pub fn new(config: &ControllerConfig) -> Self {
        let entries = config
            .report
            .node
            .iter()
            .map(|(name, specs)| {
                let list = specs
                    .iter()
                    .map(|spec| Entry {
                        spec: spec.clone(),
                        value: None,
                        states: BTreeMap::new(),
                    })
                    .collect();
                (name.clone(), list)
            })
            .collect();
        let mut symbols = config.symbols.clone();
        symbols
            .entry("node".into())
            .or_insert_with(|| config.node.clone());
        Self {
            title: config.report.title.clone(),
            divider: config.report.divider.clone(),
            node_names: config.node.clone(),
            symbols,
            entries: Mutex::new(entries),
        }
    }

    /// Record the fields of an accepted telemetry message.
    pub fn update(&self, payload: &Payload) {
        let Some(id) = payload.first("node") else {
            return;
        };
        let Some(name) = self.node_names.get(id) else {
            return;
        };
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = entries.get_mut(name) else {
            return;
        };
        for entry in list.iter_mut() {
            let Some(value) = self.display(payload, &entry.spec.value) else {
                continue;
            };
            match &entry.spec.state {
                Some(field) if payload.contains(field) => {
                    let state = payload
                        .first(field)
                        .map(|raw| self.lookup(field, raw))
                        .unwrap_or_default();
                    entry.states.insert(value, state);
                }
                _ => entry.value = Some(value),
            }
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Render the report, one block per configured node.
    pub fn body(&self) -> String {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = String::new();
        for (name, list) in entries.iter() {
            let _ = write!(out, "Node: {name}\r\n");
            for entry in list {
                if !entry.states.is_empty() {
                    for (k, v) in &entry.states {
                        let _ = write!(out, "{k}: {v}\r\n");
                    }
                } else if let Some(value) = &entry.value {
                    let _ = write!(out, "{}: {} {}\r\n", entry.spec.label, value, entry.spec.unit);
                }
            }
            let _ = write!(out, "{}\r\n", self.divider);
        }
        out
    }

    /// Display form of `field`: symbol name for symbolic fields, otherwise
    /// the reading as a number.
    fn display(&self, payload: &Payload, field: &str) -> Option<String> {
        let raw = payload.first(field)?;
        if self.symbols.contains_key(field) {
            return Some(self.lookup(field, raw));
        }
        match raw.trim().parse::<f64>() {
            Ok(v) => Some(v.to_string()),
            Err(_) => {
                debug!("report: {field}={raw:?} is not numeric");
                None
            }
        }
    }

    fn lookup(&self, field: &str, raw: &str) -> String {
        self.symbols
            .get(field)
            .and_then(|table| table.get(raw))
            .cloned()
            .unwrap_or_else(|| raw.to_owned())
    }
}
