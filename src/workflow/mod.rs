//! Declarative workflow execution.
//!
//! A definition (YAML or JSON) carries a shared env, lifecycle hooks, and
//! named workflows of shell steps and sub-workflow calls. Execution merges
//! env layers (process < definition < workflow < call-site `with:` <
//! runtime params), never expands env values into the rendered command
//! text, and always produces a machine-readable result (even on failure)
//! so CI can parse outcomes from stdout.

pub mod validate;

use crate::constants;
use crate::error::Error;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;

/// Top-level workflow definition file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Definition {
    #[serde(default)]
    pub env: IndexMap<String, String>,
    #[serde(default)]
    pub before_all: Option<String>,
    #[serde(default)]
    pub after_all: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub workflows: IndexMap<String, Workflow>,
}

/// One named workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default)]
    pub description: Option<String>,
    /// Private workflows are only reachable through sub-workflow calls.
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// A step: either a shell command or a call into another workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Step {
    Run {
        run: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
        condition: Option<String>,
    },
    Call {
        workflow: String,
        #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
        with: IndexMap<String, String>,
        #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
        condition: Option<String>,
    },
}

impl Definition {
    /// Parse a definition from JSON or YAML text.
    ///
    /// # Errors
    ///
    /// Returns a validation error when neither format matches.
    pub fn parse(content: &str) -> Result<Self, Error> {
        if let Ok(definition) = serde_json::from_str::<Self>(content) {
            return Ok(definition);
        }
        serde_yaml::from_str::<Self>(content).map_err(|e| {
            Error::WorkflowValidation(format!("not valid JSON or YAML: {e}"))
        })
    }

    /// Load a definition file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the file cannot be read, or a parse error.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    Ok,
    Error,
    Skipped,
    DryRun,
}

/// Flattened record of one executed (or skipped) step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub status: StepStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    /// The workflow this step belongs to, after sub-workflow flattening.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_workflow: Option<String>,
}

/// The outcome the dispatcher prints as JSON on stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub status: RunStatus,
    pub duration_ms: u64,
    pub steps: Vec<StepRecord>,
}

/// Inputs to one engine run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub workflow: String,
    pub params: IndexMap<String, String>,
    pub dry_run: bool,
}

/// Which shell executes run steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shell {
    Bash,
    Sh,
}

impl Shell {
    /// `bash -o pipefail -c` when available, else `sh -c`.
    fn detect() -> Result<Self, Error> {
        if find_on_path("bash").is_some() {
            Ok(Self::Bash)
        } else if find_on_path("sh").is_some() {
            Ok(Self::Sh)
        } else {
            Err(Error::ShellUnavailable)
        }
    }

    fn command(self, script: &str) -> tokio::process::Command {
        let mut command = match self {
            Self::Bash => {
                let mut c = tokio::process::Command::new("bash");
                c.arg("-o").arg("pipefail").arg("-c").arg(script);
                c
            }
            Self::Sh => {
                let mut c = tokio::process::Command::new("sh");
                c.arg("-c").arg(script);
                c
            }
        };
        command.kill_on_drop(true);
        command
    }
}

fn find_on_path(program: &str) -> Option<std::path::PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// `if: NAME` is truthy when the merged env or the process env holds NAME
/// set to 1/true/yes/y/on (case-insensitive). Unknown values are falsy.
fn condition_met(condition: Option<&str>, merged_env: &IndexMap<String, String>) -> bool {
    let Some(name) = condition else {
        return true;
    };
    let name = name.trim();
    if let Some(value) = merged_env.get(name) {
        return constants::is_truthy(value);
    }
    std::env::var(name).is_ok_and(|value| constants::is_truthy(&value))
}

/// Run `opts.workflow` from `definition`.
///
/// Step failures are reported through the returned [`RunResult`], not as an
/// `Err`: the result must reach stdout even when the run fails.
///
/// # Errors
///
/// Returns an error only for definition-level problems: unknown or private
/// workflow, call-depth overflow, or no usable shell.
pub async fn run(definition: &Definition, opts: &RunOptions) -> Result<RunResult, Error> {
    let workflow = definition
        .workflows
        .get(&opts.workflow)
        .ok_or_else(|| Error::UnknownWorkflow {
            name: opts.workflow.clone(),
        })?;
    if workflow.private {
        return Err(Error::PrivateWorkflow {
            name: opts.workflow.clone(),
        });
    }

    let shell = if opts.dry_run {
        // Nothing executes in dry-run; bash may legitimately be absent
        Shell::detect().unwrap_or(Shell::Sh)
    } else {
        Shell::detect()?
    };

    let mut engine = Engine {
        definition,
        params: &opts.params,
        dry_run: opts.dry_run,
        shell,
        records: Vec::new(),
    };

    let started = Instant::now();

    if let Some(script) = &definition.before_all {
        if !engine.run_hook("before_all", script).await {
            // before_all failure aborts without running steps
            engine.run_error_hook().await;
            return Ok(finish(RunStatus::Error, started, engine.records));
        }
    }

    let mut failed = false;
    let caller_env = IndexMap::new();
    if let Err(step_failure) = Box::pin(engine.run_workflow(&opts.workflow, &caller_env, 0)).await {
        // Depth overflow inside a call chain is a definition problem
        if matches!(
            step_failure,
            Error::MaxCallDepth { .. } | Error::UnknownWorkflow { .. }
        ) {
            return Err(step_failure);
        }
        failed = true;
    }

    if let Some(script) = &definition.after_all {
        if !engine.run_hook("after_all", script).await {
            failed = true;
        }
    }

    if failed {
        engine.run_error_hook().await;
        return Ok(finish(RunStatus::Error, started, engine.records));
    }
    Ok(finish(RunStatus::Ok, started, engine.records))
}

fn finish(status: RunStatus, started: Instant, steps: Vec<StepRecord>) -> RunResult {
    RunResult {
        status,
        duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        steps,
    }
}

struct Engine<'a> {
    definition: &'a Definition,
    params: &'a IndexMap<String, String>,
    dry_run: bool,
    shell: Shell,
    records: Vec<StepRecord>,
}

impl Engine<'_> {
    /// Execute one workflow's steps with the env visible at this call site.
    ///
    /// `caller_env` is the `with:` map of the call that entered this
    /// workflow; it shadows the workflow's own env and vanishes on return.
    async fn run_workflow(
        &mut self,
        name: &str,
        caller_env: &IndexMap<String, String>,
        depth: usize,
    ) -> Result<(), Error> {
        if depth > constants::MAX_WORKFLOW_CALL_DEPTH {
            return Err(Error::MaxCallDepth {
                limit: constants::MAX_WORKFLOW_CALL_DEPTH,
            });
        }
        let workflow = self
            .definition
            .workflows
            .get(name)
            .ok_or_else(|| Error::UnknownWorkflow {
                name: name.to_string(),
            })?;

        let merged = self.merge_env(&workflow.env, caller_env);

        for step in &workflow.steps {
            match step {
                Step::Run {
                    run,
                    name: step_name,
                    condition,
                } => {
                    if !condition_met(condition.as_deref(), &merged) {
                        self.records.push(StepRecord {
                            status: StepStatus::Skipped,
                            duration_ms: 0,
                            name: step_name.clone(),
                            command: Some(run.clone()),
                            workflow: None,
                            parent_workflow: Some(name.to_string()),
                        });
                        continue;
                    }
                    self.run_step(name, run, step_name.as_deref(), &merged)
                        .await?;
                }
                Step::Call {
                    workflow: callee,
                    with,
                    condition,
                } => {
                    if !condition_met(condition.as_deref(), &merged) {
                        self.records.push(StepRecord {
                            status: StepStatus::Skipped,
                            duration_ms: 0,
                            name: None,
                            command: None,
                            workflow: Some(callee.clone()),
                            parent_workflow: Some(name.to_string()),
                        });
                        continue;
                    }
                    Box::pin(self.run_workflow(callee, with, depth + 1)).await?;
                }
            }
        }
        Ok(())
    }

    /// Layering, later wins: definition < workflow < call-site `with:` <
    /// runtime params. The process env underlies all of it at spawn time.
    fn merge_env(
        &self,
        workflow_env: &IndexMap<String, String>,
        caller_env: &IndexMap<String, String>,
    ) -> IndexMap<String, String> {
        let mut merged = self.definition.env.clone();
        merged.extend(workflow_env.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged.extend(caller_env.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged.extend(self.params.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    async fn run_step(
        &mut self,
        parent: &str,
        script: &str,
        step_name: Option<&str>,
        merged: &IndexMap<String, String>,
    ) -> Result<(), Error> {
        if self.dry_run {
            // Preview carries the unexpanded command text: env values are
            // never substituted into it, so secrets cannot leak here.
            eprintln!("[dry-run] {parent}: would run: {script}");
            self.records.push(StepRecord {
                status: StepStatus::DryRun,
                duration_ms: 0,
                name: step_name.map(str::to_string),
                command: Some(script.to_string()),
                workflow: None,
                parent_workflow: Some(parent.to_string()),
            });
            return Ok(());
        }

        let started = Instant::now();
        let status = self.spawn_shell(script, merged).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match status {
            Ok(()) => {
                self.records.push(StepRecord {
                    status: StepStatus::Ok,
                    duration_ms,
                    name: step_name.map(str::to_string),
                    command: Some(script.to_string()),
                    workflow: None,
                    parent_workflow: Some(parent.to_string()),
                });
                Ok(())
            }
            Err(e) => {
                self.records.push(StepRecord {
                    status: StepStatus::Error,
                    duration_ms,
                    name: step_name.map(str::to_string),
                    command: Some(script.to_string()),
                    workflow: None,
                    parent_workflow: Some(parent.to_string()),
                });
                Err(e)
            }
        }
    }

    async fn spawn_shell(
        &self,
        script: &str,
        merged: &IndexMap<String, String>,
    ) -> Result<(), Error> {
        let mut command = self.shell.command(script);
        command.envs(merged);

        let status = command
            .status()
            .await
            .map_err(|e| Error::config(format!("failed to spawn shell: {e}")))?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::config(format!(
                "command exited with {}",
                status.code().map_or_else(|| "signal".to_string(), |c| c.to_string())
            )))
        }
    }

    /// Run a lifecycle hook. Returns whether it succeeded; in dry-run the
    /// hook is previewed and counted as successful.
    async fn run_hook(&mut self, hook: &str, script: &str) -> bool {
        if self.dry_run {
            eprintln!("[dry-run] {hook}: would run: {script}");
            return true;
        }
        let merged = self.merge_env(&IndexMap::new(), &IndexMap::new());
        self.spawn_shell(script, &merged).await.is_ok()
    }

    /// The error hook's own failure is swallowed.
    async fn run_error_hook(&mut self) {
        if let Some(script) = &self.definition.error {
            let script = script.clone();
            let _ = self.run_hook("error", &script).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(yaml: &str) -> Definition {
        Definition::parse(yaml).unwrap()
    }

    fn run_opts(name: &str) -> RunOptions {
        RunOptions {
            workflow: name.to_string(),
            params: IndexMap::new(),
            dry_run: false,
        }
    }

    #[tokio::test]
    async fn test_single_step_ok() {
        let def = definition(
            "workflows:\n  main:\n    steps:\n      - run: \"true\"\n",
        );
        let result = run(&def, &run_opts("main")).await.unwrap();
        assert_eq!(result.status, RunStatus::Ok);
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].status, StepStatus::Ok);
        assert_eq!(result.steps[0].parent_workflow.as_deref(), Some("main"));
    }

    #[tokio::test]
    async fn test_pipefail_catches_midpipe_failure() {
        let def = definition(
            "workflows:\n  main:\n    steps:\n      - run: \"false | cat\"\n",
        );
        let result = run(&def, &run_opts("main")).await.unwrap();
        assert_eq!(result.status, RunStatus::Error);
        assert_eq!(result.steps[0].status, StepStatus::Error);
    }

    #[tokio::test]
    async fn test_sub_workflow_steps_carry_parent() {
        let def = definition(
            "workflows:\n  main:\n    steps:\n      - workflow: helper\n  helper:\n    private: true\n    steps:\n      - run: \"echo hi\"\n",
        );
        let result = run(&def, &run_opts("main")).await.unwrap();
        assert_eq!(result.status, RunStatus::Ok);
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].parent_workflow.as_deref(), Some("helper"));
    }

    #[tokio::test]
    async fn test_private_workflow_rejected_at_top_level() {
        let def = definition(
            "workflows:\n  hidden:\n    private: true\n    steps:\n      - run: \"true\"\n",
        );
        assert!(matches!(
            run(&def, &run_opts("hidden")).await,
            Err(Error::PrivateWorkflow { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_workflow_rejected() {
        let def = definition("workflows: {}\n");
        assert!(matches!(
            run(&def, &run_opts("missing")).await,
            Err(Error::UnknownWorkflow { .. })
        ));
    }

    #[tokio::test]
    async fn test_env_layering_params_win() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("observed");
        let def = definition(&format!(
            "env:\n  X: d\nworkflows:\n  main:\n    env:\n      X: w\n    steps:\n      - workflow: child\n        with:\n          X: c\n  child:\n    private: true\n    steps:\n      - run: \"printf '%s' \\\"$X\\\" > {}\"\n",
            out.display()
        ));
        let mut opts = run_opts("main");
        opts.params.insert("X".to_string(), "r".to_string());

        let result = run(&def, &opts).await.unwrap();
        assert_eq!(result.status, RunStatus::Ok);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "r");
    }

    #[tokio::test]
    async fn test_with_env_does_not_leak_back_to_parent() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("observed");
        let def = definition(&format!(
            "env:\n  X: parent\nworkflows:\n  main:\n    steps:\n      - workflow: child\n        with:\n          X: child\n      - run: \"printf '%s' \\\"$X\\\" > {}\"\n  child:\n    private: true\n    steps:\n      - run: \"true\"\n",
            out.display()
        ));
        let result = run(&def, &run_opts("main")).await.unwrap();
        assert_eq!(result.status, RunStatus::Ok);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "parent");
    }

    #[tokio::test]
    async fn test_condition_skips_step() {
        let def = definition(
            "workflows:\n  main:\n    steps:\n      - run: \"exit 1\"\n        if: ASC_TEST_NEVER_SET_FLAG\n      - run: \"true\"\n",
        );
        let result = run(&def, &run_opts("main")).await.unwrap();
        assert_eq!(result.status, RunStatus::Ok);
        assert_eq!(result.steps[0].status, StepStatus::Skipped);
        assert_eq!(result.steps[1].status, StepStatus::Ok);
    }

    #[tokio::test]
    async fn test_condition_truthy_from_merged_env() {
        let def = definition(
            "env:\n  GO: \"yes\"\nworkflows:\n  main:\n    steps:\n      - run: \"true\"\n        if: GO\n",
        );
        let result = run(&def, &run_opts("main")).await.unwrap();
        assert_eq!(result.steps[0].status, StepStatus::Ok);
    }

    #[tokio::test]
    async fn test_dry_run_executes_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        let def = definition(&format!(
            "before_all: \"touch {m}\"\nworkflows:\n  main:\n    steps:\n      - run: \"touch {m}\"\n",
            m = marker.display()
        ));
        let mut opts = run_opts("main");
        opts.dry_run = true;

        let result = run(&def, &opts).await.unwrap();
        assert_eq!(result.status, RunStatus::Ok);
        assert_eq!(result.steps[0].status, StepStatus::DryRun);
        assert!(!marker.exists(), "dry-run must not execute commands");
    }

    #[tokio::test]
    async fn test_step_failure_stops_later_steps() {
        let def = definition(
            "workflows:\n  main:\n    steps:\n      - run: \"exit 3\"\n      - run: \"true\"\n",
        );
        let result = run(&def, &run_opts("main")).await.unwrap();
        assert_eq!(result.status, RunStatus::Error);
        assert_eq!(result.steps.len(), 1);
    }

    #[tokio::test]
    async fn test_before_all_failure_aborts_steps() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        let def = definition(&format!(
            "before_all: \"exit 1\"\nworkflows:\n  main:\n    steps:\n      - run: \"touch {}\"\n",
            marker.display()
        ));
        let result = run(&def, &run_opts("main")).await.unwrap();
        assert_eq!(result.status, RunStatus::Error);
        assert!(result.steps.is_empty());
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_after_all_runs_after_failure_and_its_failure_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("after");
        let def = definition(&format!(
            "after_all: \"touch {}\"\nworkflows:\n  main:\n    steps:\n      - run: \"exit 1\"\n",
            marker.display()
        ));
        let result = run(&def, &run_opts("main")).await.unwrap();
        assert_eq!(result.status, RunStatus::Error);
        assert!(marker.exists(), "after_all runs regardless of step failure");

        let def = definition(
            "after_all: \"exit 1\"\nworkflows:\n  main:\n    steps:\n      - run: \"true\"\n",
        );
        let result = run(&def, &run_opts("main")).await.unwrap();
        assert_eq!(result.status, RunStatus::Error);
    }

    #[tokio::test]
    async fn test_error_hook_runs_on_failure() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("error-hook");
        let def = definition(&format!(
            "error: \"touch {}\"\nworkflows:\n  main:\n    steps:\n      - run: \"exit 1\"\n",
            marker.display()
        ));
        let result = run(&def, &run_opts("main")).await.unwrap();
        assert_eq!(result.status, RunStatus::Error);
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn test_call_depth_limit() {
        let def = definition(
            "workflows:\n  main:\n    steps:\n      - workflow: main\n",
        );
        assert!(matches!(
            run(&def, &run_opts("main")).await,
            Err(Error::MaxCallDepth { .. })
        ));
    }

    #[test]
    fn test_parse_json_definition() {
        let def = Definition::parse(
            r#"{"workflows": {"main": {"steps": [{"run": "true"}]}}}"#,
        )
        .unwrap();
        assert!(def.workflows.contains_key("main"));
    }

    #[test]
    fn test_step_record_serialization_shape() {
        let record = StepRecord {
            status: StepStatus::DryRun,
            duration_ms: 3,
            name: None,
            command: Some("echo hi".to_string()),
            workflow: None,
            parent_workflow: Some("main".to_string()),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "dry-run");
        assert_eq!(json["parentWorkflow"], "main");
        assert!(json.get("workflow").is_none());
    }
}
