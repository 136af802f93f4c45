//! Result composition
//!
//! The returned report is the apply output verbatim, a fixed separator and
//! label, then the outputs capture verbatim. Parsing the outputs is only
//! done for the run log; it never alters the report.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Label introducing the outputs section
pub const OUTPUTS_LABEL: &str = "Outputs:";

/// Concatenate the apply and outputs captures.
#[must_use]
pub fn compose_report(apply: &str, outputs: &str) -> String {
    format!("{apply}\n\n{OUTPUTS_LABEL}\n{outputs}")
}

#[derive(Debug, Deserialize)]
struct RawOutput {
    #[serde(default)]
    sensitive: bool,
    #[serde(default)]
    value: serde_json::Value,
}

/// One entry of the structured outputs
#[derive(Debug, Clone, PartialEq)]
pub struct OutputValue {
    /// Marked sensitive by the IaC tool
    pub sensitive: bool,
    /// Value (JSON)
    pub value: serde_json::Value,
}

/// Parsed `output -json` document, ordered by key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeployOutputs {
    entries: BTreeMap<String, OutputValue>,
}

impl DeployOutputs {
    /// Parse the IaC tool's JSON outputs. Returns `None` if the text is not
    /// a JSON object of output entries.
    #[must_use]
    pub fn parse(json: &str) -> Option<Self> {
        let raw: BTreeMap<String, RawOutput> = serde_json::from_str(json.trim()).ok()?;
        let entries = raw
            .into_iter()
            .map(|(key, raw)| {
                (
                    key,
                    OutputValue {
                        sensitive: raw.sensitive,
                        value: raw.value,
                    },
                )
            })
            .collect();
        Some(Self { entries })
    }

    /// Output names, sorted
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Look up an output
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&OutputValue> {
        self.entries.get(key)
    }

    /// Number of outputs
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no outputs
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
