use std::env;
use std::sync::OnceLock;

use crate::Symbol;

static GRAPHFOLD_VERIFY: OnceLock<bool> = OnceLock::new();
static GRAPHFOLD_EXECUTOR: OnceLock<Option<Symbol>> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

/// `GRAPHFOLD_VERIFY`: lint the graph after every folding run.
pub fn verify_enabled() -> bool {
    *GRAPHFOLD_VERIFY.get_or_init(|| match env::var("GRAPHFOLD_VERIFY") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}

/// `GRAPHFOLD_EXECUTOR`: executor name selected for the process, if any.
pub fn executor_override() -> Option<Symbol> {
    GRAPHFOLD_EXECUTOR
        .get_or_init(|| match env::var("GRAPHFOLD_EXECUTOR") {
            Ok(value) if !value.trim().is_empty() => Some(Symbol::from(value.trim())),
            _ => None,
        })
        .clone()
}
