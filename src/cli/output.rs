//! CLI output formatting

use crate::core::{Workflow, WorkflowEntry};
use crate::generate::{SplitOutcome, SplitPipeline};
use console::Emoji;
use std::path::Path;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// One line per stage: its name and the entries running in it
pub fn format_stages(workflow: &Workflow) -> Vec<String> {
    workflow
        .stages
        .iter()
        .map(|stage| {
            let entries: Vec<&WorkflowEntry> = workflow
                .entries()
                .filter(|entry| entry.stage() == Some(stage.as_str()))
                .collect();
            let triggers = entries.iter().filter(|entry| entry.as_trigger().is_some()).count();
            let mut line = format!(
                "  {} {}",
                style(stage).bold(),
                style(format!("({} jobs)", entries.len() - triggers)).dim()
            );
            if triggers > 0 {
                line.push_str(&format!(" {}", style(format!("{} triggers", triggers)).cyan()));
            }
            line
        })
        .collect()
}

/// Summary of a written workflow
pub fn format_workflow_summary(workflow: &Workflow, path: &Path) -> String {
    format!(
        "{} Wrote {} ({} jobs in {} stages)",
        CHECK,
        style(path.display()).bold(),
        style(workflow.len()).cyan(),
        style(workflow.stages.len()).cyan()
    )
}

/// Summary of a processed spack pipeline
pub fn format_split_outcome(outcome: &SplitOutcome, root_file: &Path) -> String {
    match outcome {
        SplitOutcome::NothingToRebuild => format!(
            "{} Nothing to rebuild, copied the pipeline to {}",
            INFO,
            style(root_file.display()).bold()
        ),
        SplitOutcome::Split(split) => format_split(split, root_file),
    }
}

fn format_split(split: &SplitPipeline, root_file: &Path) -> String {
    let stages: Vec<String> = split
        .stage_groups
        .iter()
        .map(|group| group.stage.clone())
        .collect();
    format!(
        "{} Split the {} pipeline into {} stage pipelines ({}), triggered from {}",
        CHECK,
        style(&split.architecture).bold(),
        style(split.stage_groups.len()).cyan(),
        style(stages.join(" → ")).dim(),
        style(root_file.display()).bold()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Job;

    fn plain(text: String) -> String {
        console::strip_ansi_codes(&text).to_string()
    }

    #[test]
    fn test_format_stages() {
        let mut workflow = Workflow::new();
        let mut job = Job::new("build");
        job.stage = Some("build".to_string());
        workflow.add_job(job).unwrap();
        workflow.add_stage("test");

        let lines: Vec<String> = format_stages(&workflow).into_iter().map(plain).collect();
        assert_eq!(lines, vec!["  build (1 jobs)", "  test (0 jobs)"]);
    }

    #[test]
    fn test_format_nothing_to_rebuild() {
        let line = plain(format_split_outcome(
            &SplitOutcome::NothingToRebuild,
            Path::new("spack_pipeline.yaml"),
        ));
        assert!(line.ends_with("Nothing to rebuild, copied the pipeline to spack_pipeline.yaml"));
    }
}
