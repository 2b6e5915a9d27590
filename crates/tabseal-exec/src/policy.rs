//! Run-level policy checks evaluated at finish.
//!
//! - `max_run_size_exceeded`: persisted bytes under the run prefix exceed
//!   `runtime.max_run_bytes`.
//! - `prod_verification_failed`: the run is tagged `env=prod|production`,
//!   `runtime.require_verify_for_prod` is set, and the chain so far does not
//!   verify.
//!
//! Violations are recorded in the `run_finish` payload; they never abort the run.

use std::collections::BTreeMap;

use tabseal_core::config::RuntimeConfig;
use tabseal_core::error::Result;
use tabseal_seal::{verify_chain, Chain, VerifyMode};
use tabseal_store::Store;

use crate::payload::PolicyOutcome;

pub const MAX_RUN_SIZE_EXCEEDED: &str = "max_run_size_exceeded";
pub const PROD_VERIFICATION_FAILED: &str = "prod_verification_failed";

pub fn is_prod(tags: &BTreeMap<String, String>) -> bool {
    tags.get("env")
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "prod" | "production"))
        .unwrap_or(false)
}

/// Sum of object sizes under `prefix`.
pub fn run_bytes(store: &dyn Store, prefix: &str) -> Result<u64> {
    let mut total = 0u64;
    for key in store.list(prefix)? {
        total += store.size(&key)?;
    }
    Ok(total)
}

pub fn evaluate(
    cfg: &RuntimeConfig,
    store: &dyn Store,
    prefix: &str,
    tags: &BTreeMap<String, String>,
    chain: Option<&Chain>,
) -> Result<PolicyOutcome> {
    let total_bytes = run_bytes(store, prefix)?;
    let mut violations = Vec::new();
    if let Some(max) = cfg.max_run_bytes {
        if total_bytes > max {
            tracing::warn!(total_bytes, max, "run exceeds max_run_bytes");
            violations.push(MAX_RUN_SIZE_EXCEEDED.to_string());
        }
    }

    let mut verification = None;
    if cfg.require_verify_for_prod && is_prod(tags) {
        match chain {
            Some(chain) => {
                let report = verify_chain(chain, store, VerifyMode::Shallow, None);
                if !report.ok {
                    violations.push(PROD_VERIFICATION_FAILED.to_string());
                }
                verification = Some(report);
            }
            // An unsealed prod run cannot be verified at all.
            None => violations.push(PROD_VERIFICATION_FAILED.to_string()),
        }
    }

    violations.sort();
    violations.dedup();
    Ok(PolicyOutcome {
        total_bytes,
        max_run_bytes: cfg.max_run_bytes,
        violations,
        verification,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabseal_core::hash::HashAlgo;
    use tabseal_seal::{EntryKind, RunIdentity};
    use tabseal_store::MemoryStore;

    fn tags(env: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("env".to_string(), env.to_string())])
    }

    #[test]
    fn prod_tag_detection() {
        assert!(is_prod(&tags("prod")));
        assert!(is_prod(&tags("Production")));
        assert!(!is_prod(&tags("staging")));
        assert!(!is_prod(&BTreeMap::new()));
    }

    #[test]
    fn size_limit_is_reported() {
        let store = MemoryStore::new();
        store.put("p/d/r/a", &[0u8; 64]).unwrap();
        store.put("p/d/other/a", &[0u8; 64]).unwrap();
        let cfg = RuntimeConfig {
            max_run_bytes: Some(10),
            ..RuntimeConfig::default()
        };
        let out = evaluate(&cfg, &store, "p/d/r/", &BTreeMap::new(), None).unwrap();
        assert_eq!(out.total_bytes, 64);
        assert_eq!(out.violations, vec![MAX_RUN_SIZE_EXCEEDED.to_string()]);
    }

    #[test]
    fn prod_runs_are_verified() {
        let store = MemoryStore::new();
        let mut chain = Chain::new(RunIdentity::new("p", "d", "r"), HashAlgo::Blake3, 0);
        let (entry, bytes) = chain
            .prepare(EntryKind::RunStart, None, "p/d/r/run_start.json", &serde_json::json!({"a": 1}), 1)
            .unwrap();
        store.put("p/d/r/run_start.json", &bytes).unwrap();
        chain.push(entry).unwrap();

        let cfg = RuntimeConfig::default();
        let out = evaluate(&cfg, &store, "p/d/r/", &tags("prod"), Some(&chain)).unwrap();
        assert!(out.violations.is_empty());
        assert!(out.verification.unwrap().ok);

        store.put("p/d/r/run_start.json", b"{\"a\":2}").unwrap();
        let out = evaluate(&cfg, &store, "p/d/r/", &tags("prod"), Some(&chain)).unwrap();
        assert_eq!(out.violations, vec![PROD_VERIFICATION_FAILED.to_string()]);
    }
}
