// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::graph::JobGraph;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Registry mapping job names to their built graphs.
///
/// Graphs are held as `Arc<JobGraph>` so a launched run and the registry share one
/// immutable graph; re-registering a name only affects runs launched afterwards.
///
/// # Example
/// ```
/// use the_runwood::demo;
/// use the_runwood::instance::JobMap;
///
/// let mut jobs = JobMap::new();
/// jobs.insert(demo::basic_example().unwrap());
///
/// assert!(jobs.contains_key("basic_example"));
/// assert_eq!(jobs.names().collect::<Vec<_>>(), vec!["basic_example"]);
/// ```
#[derive(Clone, Default)]
pub struct JobMap(pub BTreeMap<String, Arc<JobGraph>>);

impl JobMap {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Inserts under the graph's own name, replacing any previous graph.
    pub fn insert(&mut self, job: JobGraph) -> Arc<JobGraph> {
        let job = Arc::new(job);
        self.0.insert(job.name().to_string(), job.clone());
        job
    }

    pub fn get(&self, name: &str) -> Option<&Arc<JobGraph>> {
        self.0.get(name)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Job names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for JobMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobMap")
            .field("job_count", &self.0.len())
            .field("job_names", &self.0.keys().collect::<Vec<_>>())
            .finish()
    }
}
