//! Persisted run layout.
//!
//! ```text
//! <project>/<dataset>/<run_id>/
//!     run.json             identity, tags, status, head
//!     run_start.json       sealed payload
//!     run_finish.json      sealed payload
//!     chain.json           ordered chain entries
//!     events.jsonl         buffered run events, written at finish
//!     steps/<NNNN>_<name>/
//!         step.json        sealed payload
//!         artifacts/       input.json, output.json, diff.json, *.snap
//! ```
//!
//! Every user-supplied component passes through `safe_component`.

use tabseal_core::id::Ordinal;

use crate::chain::RunIdentity;

pub const MAX_COMPONENT_LEN: usize = 64;

/// Keep `[A-Za-z0-9_-]`, replace anything else with `_`, cap at 64 chars.
pub fn safe_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_COMPONENT_LEN)
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    root: String,
}

impl RunPaths {
    pub fn new(id: &RunIdentity) -> Self {
        Self {
            root: format!(
                "{}/{}/{}",
                safe_component(&id.project),
                safe_component(&id.dataset),
                safe_component(&id.run_id)
            ),
        }
    }

    /// Prefix of every key belonging to this run (with trailing `/`).
    pub fn prefix(&self) -> String {
        format!("{}/", self.root)
    }

    pub fn run_json(&self) -> String {
        format!("{}/run.json", self.root)
    }

    pub fn run_start_json(&self) -> String {
        format!("{}/run_start.json", self.root)
    }

    pub fn run_finish_json(&self) -> String {
        format!("{}/run_finish.json", self.root)
    }

    pub fn chain_json(&self) -> String {
        format!("{}/chain.json", self.root)
    }

    pub fn events_jsonl(&self) -> String {
        format!("{}/events.jsonl", self.root)
    }

    pub fn steps_prefix(&self) -> String {
        format!("{}/steps/", self.root)
    }

    pub fn step_dir(&self, ordinal: Ordinal, name: &str) -> String {
        format!(
            "{}/steps/{:04}_{}",
            self.root,
            ordinal.get(),
            safe_component(name)
        )
    }

    pub fn step_json(&self, ordinal: Ordinal, name: &str) -> String {
        format!("{}/step.json", self.step_dir(ordinal, name))
    }

    pub fn artifact(&self, ordinal: Ordinal, name: &str, file: &str) -> String {
        format!("{}/artifacts/{}", self.step_dir(ordinal, name), file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn components_are_sanitized() {
        assert_eq!(safe_component("clean-name_1"), "clean-name_1");
        assert_eq!(safe_component("../etc/passwd"), "___etc_passwd");
        assert_eq!(safe_component(""), "_");
        assert_eq!(safe_component(&"x".repeat(100)).len(), MAX_COMPONENT_LEN);
    }

    #[test]
    fn step_layout() {
        let p = RunPaths::new(&RunIdentity::new("acme", "sales 2024", "run_1"));
        assert_eq!(p.run_json(), "acme/sales_2024/run_1/run.json");
        assert_eq!(
            p.step_json(Ordinal::new(3), "clean/nulls"),
            "acme/sales_2024/run_1/steps/0003_clean_nulls/step.json"
        );
        assert_eq!(
            p.artifact(Ordinal::new(3), "x", "diff.json"),
            "acme/sales_2024/run_1/steps/0003_x/artifacts/diff.json"
        );
    }
}
