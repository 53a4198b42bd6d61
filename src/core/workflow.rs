//! Workflow (pipeline document) model
//!
//! A workflow is an ordered list of stages plus a collection of jobs and
//! triggers keyed by their unique name. Jobs only refer to each other by
//! name through `needs`.

use crate::core::job::Job;
use crate::core::trigger::{Include, Trigger};
use crate::error::{JobCreatorError, Result};
use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// A job or a trigger stored in a workflow
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEntry {
    Job(Job),
    Trigger(Trigger),
}

impl WorkflowEntry {
    pub fn name(&self) -> &str {
        match self {
            WorkflowEntry::Job(job) => &job.name,
            WorkflowEntry::Trigger(trigger) => &trigger.name,
        }
    }

    pub fn stage(&self) -> Option<&str> {
        match self {
            WorkflowEntry::Job(job) => job.stage.as_deref(),
            WorkflowEntry::Trigger(trigger) => trigger.stage.as_deref(),
        }
    }

    pub fn needs(&self) -> &[crate::core::job::Need] {
        match self {
            WorkflowEntry::Job(job) => &job.needs,
            WorkflowEntry::Trigger(trigger) => &trigger.needs,
        }
    }

    pub fn as_job(&self) -> Option<&Job> {
        match self {
            WorkflowEntry::Job(job) => Some(job),
            WorkflowEntry::Trigger(_) => None,
        }
    }

    pub fn as_trigger(&self) -> Option<&Trigger> {
        match self {
            WorkflowEntry::Trigger(trigger) => Some(trigger),
            WorkflowEntry::Job(_) => None,
        }
    }
}

impl Serialize for WorkflowEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            WorkflowEntry::Job(job) => job.serialize(serializer),
            WorkflowEntry::Trigger(trigger) => trigger.serialize(serializer),
        }
    }
}

/// GitLab workflow model
///
/// Stages execute in the order they were added.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workflow {
    pub stages: Vec<String>,
    entries: IndexMap<String, WorkflowEntry>,
    pub include: Vec<Include>,
}

impl Workflow {
    /// Create an empty workflow
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty workflow including the given files
    pub fn with_includes(include: Vec<Include>) -> Self {
        Workflow {
            include,
            ..Self::default()
        }
    }

    /// Declare a stage, keeping the first position if already declared
    pub fn add_stage(&mut self, stage: impl Into<String>) {
        let stage = stage.into();
        if !self.stages.contains(&stage) {
            self.stages.push(stage);
        }
    }

    /// Add a job; its stage is declared if needed
    pub fn add_job(&mut self, job: Job) -> Result<()> {
        self.insert(WorkflowEntry::Job(job))
    }

    /// Add a trigger; its stage is declared if needed
    pub fn add_trigger(&mut self, trigger: Trigger) -> Result<()> {
        self.insert(WorkflowEntry::Trigger(trigger))
    }

    fn insert(&mut self, entry: WorkflowEntry) -> Result<()> {
        if self.entries.contains_key(entry.name()) {
            return Err(JobCreatorError::DuplicateJob {
                name: entry.name().to_string(),
            });
        }
        if let Some(stage) = entry.stage() {
            self.add_stage(stage);
        }
        debug!("Adding {} to workflow", entry.name());
        self.entries.insert(entry.name().to_string(), entry);
        Ok(())
    }

    /// Append another workflow to this one.
    ///
    /// Stages and includes are concatenated without duplicates, keeping
    /// order. A job name present in both workflows is an error.
    pub fn extend(&mut self, other: Workflow) -> Result<()> {
        if let Some(name) = other.entries.keys().find(|name| self.entries.contains_key(*name)) {
            return Err(JobCreatorError::DuplicateJob { name: name.clone() });
        }

        for stage in other.stages {
            self.add_stage(stage);
        }
        for include in other.include {
            if !self.include.contains(&include) {
                self.include.push(include);
            }
        }
        for (_, entry) in other.entries {
            self.insert(entry)?;
        }
        Ok(())
    }

    /// Union of two workflows, see [`Workflow::extend`]
    pub fn merge(mut self, other: Workflow) -> Result<Workflow> {
        self.extend(other)?;
        Ok(self)
    }

    /// Whether a job or trigger with this name is part of the workflow
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn entry(&self, name: &str) -> Option<&WorkflowEntry> {
        self.entries.get(name)
    }

    pub fn job(&self, name: &str) -> Option<&Job> {
        self.entries.get(name).and_then(WorkflowEntry::as_job)
    }

    pub fn job_mut(&mut self, name: &str) -> Option<&mut Job> {
        match self.entries.get_mut(name) {
            Some(WorkflowEntry::Job(job)) => Some(job),
            _ => None,
        }
    }

    pub fn trigger(&self, name: &str) -> Option<&Trigger> {
        self.entries.get(name).and_then(WorkflowEntry::as_trigger)
    }

    /// All entries, in insertion order
    pub fn entries(&self) -> impl Iterator<Item = &WorkflowEntry> {
        self.entries.values()
    }

    /// All plain jobs, in insertion order
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.entries.values().filter_map(WorkflowEntry::as_job)
    }

    /// All plain jobs, mutably
    pub fn jobs_mut(&mut self) -> impl Iterator<Item = &mut Job> {
        self.entries.values_mut().filter_map(|entry| match entry {
            WorkflowEntry::Job(job) => Some(job),
            WorkflowEntry::Trigger(_) => None,
        })
    }

    /// All triggers, in insertion order
    pub fn triggers(&self) -> impl Iterator<Item = &Trigger> {
        self.entries.values().filter_map(WorkflowEntry::as_trigger)
    }

    /// Jobs whose name starts with `prefix`
    pub fn get_jobs_with_prefix(&self, prefix: &str) -> Vec<&Job> {
        self.jobs().filter(|job| job.name.starts_with(prefix)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check the workflow can be emitted: every stage is declared and the
    /// local `needs` graph has no cycle
    pub fn validate(&self) -> Result<()> {
        for entry in self.entries.values() {
            if let Some(stage) = entry.stage() {
                if !self.stages.iter().any(|declared| declared == stage) {
                    return Err(JobCreatorError::UndeclaredStage {
                        job: entry.name().to_string(),
                        stage: stage.to_string(),
                    });
                }
            }
        }

        self.check_cycles()
    }

    /// Needs pointing to other pipelines, or to jobs outside this workflow,
    /// are not part of the graph
    fn check_cycles(&self) -> Result<()> {
        let mut visited = HashSet::new();
        let mut recursion_stack = HashSet::new();

        for name in self.entries.keys() {
            if !visited.contains(name.as_str()) {
                self.dfs_check(name, &mut visited, &mut recursion_stack)?;
            }
        }

        Ok(())
    }

    fn dfs_check<'a>(
        &'a self,
        name: &'a str,
        visited: &mut HashSet<&'a str>,
        recursion_stack: &mut HashSet<&'a str>,
    ) -> Result<()> {
        visited.insert(name);
        recursion_stack.insert(name);

        if let Some(entry) = self.entries.get(name) {
            for need in entry.needs().iter().filter(|need| need.is_local()) {
                let dep = need.job_name();
                if !self.entries.contains_key(dep) {
                    continue;
                }
                if recursion_stack.contains(dep) {
                    return Err(JobCreatorError::DependencyCycle {
                        job: dep.to_string(),
                    });
                }
                if !visited.contains(dep) {
                    self.dfs_check(dep, visited, recursion_stack)?;
                }
            }
        }

        recursion_stack.remove(name);
        Ok(())
    }

    /// Render the workflow as YAML after validating it
    pub fn to_yaml(&self) -> Result<String> {
        self.validate()?;
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the workflow and write it to `path`
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let yaml = self.to_yaml()?;
        std::fs::write(path, yaml).map_err(JobCreatorError::io_at(path))?;
        Ok(())
    }
}

impl std::ops::Add for Workflow {
    type Output = Result<Workflow>;

    fn add(self, other: Workflow) -> Result<Workflow> {
        self.merge(other)
    }
}

impl Serialize for Workflow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let include_len = usize::from(!self.include.is_empty());
        let mut map = serializer.serialize_map(Some(1 + self.entries.len() + include_len))?;
        map.serialize_entry("stages", &self.stages)?;
        for (name, entry) in &self.entries {
            map.serialize_entry(name, entry)?;
        }
        if !self.include.is_empty() {
            map.serialize_entry("include", &self.include)?;
        }
        map.end()
    }
}
