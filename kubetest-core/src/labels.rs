//! Selection labels and selectors
//!
//! Discovery of submitted workloads relies on labels only, never on
//! naming conventions. Annotations carry display metadata.

use std::collections::BTreeMap;
use std::fmt;

use crate::domain::job::JobKind;

/// Label holding the job kind (`test` or `benchmark`)
pub const TYPE_LABEL: &str = "type";
/// Label holding the job's test ID
pub const TEST_LABEL: &str = "test";

pub const TEST_ID_ANNOTATION: &str = "test-id";
pub const SUITE_ANNOTATION: &str = "suite";
pub const TEST_NAME_ANNOTATION: &str = "test-name";

/// Environment variable telling a process which context it runs in
pub const CONTEXT_ENV: &str = "TEST_CONTEXT";
/// Environment variable naming the file a unit writes its termination message to
pub const TERMINATION_LOG_ENV: &str = "KUBETEST_TERMINATION_LOG";

/// Equality-based label selector (`k1=v1,k2=v2`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects every unit of the given kind
    pub fn for_kind(kind: JobKind) -> Self {
        Self::new().with(TYPE_LABEL, kind.as_str())
    }

    /// Selects the unit(s) of a single job
    pub fn for_test(test_id: &str) -> Self {
        Self::new().with(TEST_LABEL, test_id)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }

    pub fn requirements(&self) -> impl Iterator<Item = (&str, &str)> {
        self.requirements
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .requirements
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        f.write_str(&parts.join(","))
    }
}

/// Labels put on every workload submitted for a job
pub fn job_labels(kind: JobKind, test_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (TYPE_LABEL.to_string(), kind.as_str().to_string()),
        (TEST_LABEL.to_string(), test_id.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_display() {
        let selector = LabelSelector::for_kind(JobKind::Test).with(TEST_LABEL, "t-1");
        assert_eq!(selector.to_string(), "test=t-1,type=test");
        assert_eq!(LabelSelector::new().to_string(), "");
    }

    #[test]
    fn test_selector_matches_exactly() {
        let test_labels = job_labels(JobKind::Test, "t-1");
        let bench_labels = job_labels(JobKind::Benchmark, "b-1");

        let tests = LabelSelector::for_kind(JobKind::Test);
        assert!(tests.matches(&test_labels));
        assert!(!tests.matches(&bench_labels));

        assert!(LabelSelector::for_test("t-1").matches(&test_labels));
        assert!(!LabelSelector::for_test("t-10").matches(&test_labels));
        assert!(LabelSelector::new().matches(&bench_labels));
    }
}
