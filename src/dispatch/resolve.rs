//! Symbolic command resolution.
//!
//! Command templates may name things instead of numbering them:
//! `node=garden&cmd=pump&r=1&s=1`.  Fields that have a symbol table in
//! the configuration are rewritten to the numeric id the nodes expect.
//! Values that already parse as base-10 integers pass through untouched.

use std::collections::BTreeMap;

use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::wire::Payload;

/// Reverse lookup tables (name → id), one per symbolic field.
#[derive(Debug, Clone, Default)]
pub struct SymbolResolver {
    tables: BTreeMap<String, BTreeMap<String, String>>,
}

impl SymbolResolver {
    pub fn from_config(config: &ControllerConfig) -> Self {
        let mut tables = BTreeMap::new();
        let fields = config
            .symbols
            .keys()
            .map(String::as_str)
            .chain(std::iter::once("node"));
        for field in fields {
            if let Some(table) = config.symbol_table(field) {
                let reverse = table
                    .iter()
                    .map(|(id, name)| (name.clone(), id.clone()))
                    .collect();
                tables.insert(field.to_owned(), reverse);
            }
        }
        Self { tables }
    }

    /// Decode `template` and replace every symbolic value with its id.
    pub fn resolve(&self, template: &str) -> Result<Payload> {
        let mut payload = Payload::decode(template)?;
        let fields: Vec<String> = payload.keys().map(str::to_owned).collect();
        for field in fields {
            let Some(table) = self.tables.get(&field) else {
                continue;
            };
            let Some(value) = payload.first(&field) else {
                continue;
            };
            if value.parse::<i64>().is_ok() {
                continue;
            }
            let id = table.get(value).cloned().ok_or_else(|| Error::UnresolvedSymbol {
                field: field.clone(),
                value: value.to_owned(),
            })?;
            payload.set_first(&field, id);
        }
        Ok(payload)
    }
}
