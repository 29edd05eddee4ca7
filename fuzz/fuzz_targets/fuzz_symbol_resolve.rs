//! Fuzz target: `SymbolResolver::resolve`
//!
//! Resolves arbitrary command templates against a small symbol table.
//! Resolution never panics, and a resolved `cmd` is always numeric.
//!
//! cargo fuzz run fuzz_symbol_resolve

#![no_main]

use std::sync::OnceLock;

use fieldctl::config::ControllerConfig;
use fieldctl::dispatch::SymbolResolver;
use libfuzzer_sys::fuzz_target;

const CONFIG: &str = r#"{
    "node": {"3": "garden", "4": "shed"},
    "symbols": {"cmd": {"1": "pump", "2": "light"}}
}"#;

fn resolver() -> &'static SymbolResolver {
    static RESOLVER: OnceLock<SymbolResolver> = OnceLock::new();
    RESOLVER.get_or_init(|| {
        let config = ControllerConfig::from_json(CONFIG).expect("fuzz config");
        SymbolResolver::from_config(&config)
    })
}

fuzz_target!(|data: &[u8]| {
    let Ok(template) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(payload) = resolver().resolve(template) {
        if let Some(cmd) = payload.first("cmd") {
            assert!(cmd.parse::<i64>().is_ok(), "unresolved cmd {cmd:?}");
        }
    }
});
