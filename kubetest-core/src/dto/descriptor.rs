//! Job descriptor
//!
//! The serialized `JobSpec` stored as one entry (keyed by test ID) of the
//! shared configuration resource, and read back by in-cluster processes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::job::{JobKind, JobSpec, PullPolicy};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    #[serde(rename = "testID")]
    pub test_id: String,
    pub kind: JobKind,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suite: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_name: Option<String>,
    /// Zero means unbounded
    #[serde(default)]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub pull_policy: PullPolicy,
}

impl JobDescriptor {
    pub fn to_document(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_document(document: &str) -> Result<Self> {
        Ok(serde_json::from_str(document)?)
    }
}

impl From<&JobSpec> for JobDescriptor {
    fn from(spec: &JobSpec) -> Self {
        Self {
            test_id: spec.test_id.clone(),
            kind: spec.kind,
            image: spec.image.clone(),
            suite: spec.suite.clone(),
            test_name: spec.test_name.clone(),
            timeout_seconds: spec.timeout.as_secs(),
            pull_policy: spec.pull_policy,
        }
    }
}

impl From<JobDescriptor> for JobSpec {
    fn from(descriptor: JobDescriptor) -> Self {
        Self {
            test_id: descriptor.test_id,
            kind: descriptor.kind,
            // Blank strings from hand-written descriptors mean "not set"
            suite: descriptor.suite.filter(|s| !s.is_empty()),
            test_name: descriptor.test_name.filter(|s| !s.is_empty()),
            image: descriptor.image,
            pull_policy: descriptor.pull_policy,
            timeout: Duration::from_secs(descriptor.timeout_seconds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_field_names() {
        let spec = JobSpec::new(JobKind::Benchmark, "onos/bench:1.0")
            .with_test_id("b-42")
            .with_suite("map")
            .with_timeout(Duration::from_secs(90))
            .with_pull_policy(PullPolicy::Always);

        let document = JobDescriptor::from(&spec).to_document().unwrap();
        let value: serde_json::Value = serde_json::from_str(&document).unwrap();

        assert_eq!(value["testID"], "b-42");
        assert_eq!(value["kind"], "benchmark");
        assert_eq!(value["suite"], "map");
        assert_eq!(value["timeoutSeconds"], 90);
        assert_eq!(value["pullPolicy"], "Always");
        assert!(value.get("testName").is_none());
    }

    #[test]
    fn test_minimal_document() {
        let descriptor = JobDescriptor::from_document(
            r#"{"testID": "t-1", "kind": "test", "image": "img", "suite": ""}"#,
        )
        .unwrap();
        let spec = JobSpec::from(descriptor);

        assert_eq!(spec.suite, None);
        assert_eq!(spec.timeout, Duration::ZERO);
        assert_eq!(spec.pull_policy, PullPolicy::IfNotPresent);
    }

    #[test]
    fn test_malformed_document() {
        assert!(JobDescriptor::from_document("{\"kind\": \"test\"}").is_err());
    }
}
