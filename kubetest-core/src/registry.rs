//! Suite registry
//!
//! A statically built table mapping suite names to ordered lists of named
//! entries. Test images build one registry at startup and hand it to the
//! coordinator and worker; nothing is discovered at runtime.
//!
//! ```
//! use kubetest_core::registry::{Entry, EntryFuture, SuiteRegistry};
//!
//! fn ping() -> EntryFuture {
//!     Box::pin(async { Ok(()) })
//! }
//!
//! let registry = SuiteRegistry::builder()
//!     .test_suite("smoke", [Entry::new("ping", ping)])
//!     .build();
//!
//! assert_eq!(registry.suite_names(kubetest_core::domain::job::JobKind::Test), vec!["smoke"]);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::domain::job::JobKind;

/// Future produced by running one entry
pub type EntryFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Body of a test or benchmark entry
pub type EntryFn = fn() -> EntryFuture;

/// A single named test or benchmark
#[derive(Clone)]
pub struct Entry {
    name: String,
    run: EntryFn,
}

impl Entry {
    pub fn new(name: impl Into<String>, run: EntryFn) -> Self {
        Self {
            name: name.into(),
            run,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts the entry
    pub fn run(&self) -> EntryFuture {
        (self.run)()
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry").field("name", &self.name).finish()
    }
}

/// Ordered group of entries run by one job
#[derive(Debug, Clone)]
pub struct Suite {
    name: String,
    kind: JobKind,
    entries: Vec<Entry>,
}

impl Suite {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entry(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

/// Registry of test and benchmark suites
#[derive(Debug, Clone, Default)]
pub struct SuiteRegistry {
    tests: BTreeMap<String, Suite>,
    benchmarks: BTreeMap<String, Suite>,
}

impl SuiteRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    fn table(&self, kind: JobKind) -> &BTreeMap<String, Suite> {
        match kind {
            JobKind::Test => &self.tests,
            JobKind::Benchmark => &self.benchmarks,
        }
    }

    /// Suites of `kind`, sorted by name
    pub fn suites(&self, kind: JobKind) -> impl Iterator<Item = &Suite> {
        self.table(kind).values()
    }

    pub fn suite_names(&self, kind: JobKind) -> Vec<&str> {
        self.table(kind).keys().map(String::as_str).collect()
    }

    pub fn get(&self, kind: JobKind, name: &str) -> Option<&Suite> {
        self.table(kind).get(name)
    }

    pub fn is_empty(&self, kind: JobKind) -> bool {
        self.table(kind).is_empty()
    }
}

/// Builds a `SuiteRegistry`; registering a name twice replaces the suite
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    registry: SuiteRegistry,
}

impl RegistryBuilder {
    pub fn test_suite(self, name: &str, entries: impl IntoIterator<Item = Entry>) -> Self {
        self.suite(JobKind::Test, name, entries)
    }

    pub fn benchmark_suite(self, name: &str, entries: impl IntoIterator<Item = Entry>) -> Self {
        self.suite(JobKind::Benchmark, name, entries)
    }

    pub fn suite(
        mut self,
        kind: JobKind,
        name: &str,
        entries: impl IntoIterator<Item = Entry>,
    ) -> Self {
        let suite = Suite {
            name: name.to_string(),
            kind,
            entries: entries.into_iter().collect(),
        };
        let table = match kind {
            JobKind::Test => &mut self.registry.tests,
            JobKind::Benchmark => &mut self.registry.benchmarks,
        };
        table.insert(name.to_string(), suite);
        self
    }

    pub fn build(self) -> SuiteRegistry {
        self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass() -> EntryFuture {
        Box::pin(async { Ok(()) })
    }

    fn fail() -> EntryFuture {
        Box::pin(async { Err(anyhow::anyhow!("boom")) })
    }

    fn registry() -> SuiteRegistry {
        SuiteRegistry::builder()
            .test_suite("smoke", [Entry::new("ping", pass), Entry::new("boom", fail)])
            .test_suite("ha", [Entry::new("failover", pass)])
            .benchmark_suite("map", [Entry::new("put", pass)])
            .build()
    }

    #[test]
    fn test_suites_are_sorted_and_separated_by_kind() {
        let registry = registry();
        assert_eq!(registry.suite_names(JobKind::Test), vec!["ha", "smoke"]);
        assert_eq!(registry.suite_names(JobKind::Benchmark), vec!["map"]);
        assert!(registry.get(JobKind::Benchmark, "smoke").is_none());
    }

    #[test]
    fn test_entries_keep_registration_order() {
        let registry = registry();
        let smoke = registry.get(JobKind::Test, "smoke").unwrap();
        let names: Vec<&str> = smoke.entries().iter().map(Entry::name).collect();
        assert_eq!(names, vec!["ping", "boom"]);
        assert!(smoke.entry("boom").is_some());
        assert_eq!(smoke.kind(), JobKind::Test);
    }

    #[tokio::test]
    async fn test_entries_run() {
        let registry = registry();
        let smoke = registry.get(JobKind::Test, "smoke").unwrap();
        assert!(smoke.entry("ping").unwrap().run().await.is_ok());
        assert!(smoke.entry("boom").unwrap().run().await.is_err());
    }
}
