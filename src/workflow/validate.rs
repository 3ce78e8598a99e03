//! Static validation of workflow definitions.
//!
//! Checks unknown workflow references, cycles in the sub-workflow call
//! graph (Kahn's algorithm), missing keys, and malformed `if` expressions.
//! Returns every problem found rather than stopping at the first.

use crate::workflow::{Definition, Step};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};

/// One problem in a definition, with enough location to act on.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Where the problem is, e.g. `workflows.main.steps[2]`.
    pub location: String,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

/// Validate a definition, returning every issue found.
#[must_use]
pub fn validate(definition: &Definition) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if definition.workflows.is_empty() {
        issues.push(ValidationIssue {
            location: "workflows".to_string(),
            message: "definition declares no workflows".to_string(),
        });
    }

    for (name, workflow) in &definition.workflows {
        if workflow.steps.is_empty() {
            issues.push(ValidationIssue {
                location: format!("workflows.{name}"),
                message: "workflow has no steps".to_string(),
            });
        }
        for (index, step) in workflow.steps.iter().enumerate() {
            let location = format!("workflows.{name}.steps[{index}]");
            match step {
                Step::Run { run, condition, .. } => {
                    if run.trim().is_empty() {
                        issues.push(ValidationIssue {
                            location: location.clone(),
                            message: "run command is empty".to_string(),
                        });
                    }
                    check_condition(&location, condition.as_deref(), &mut issues);
                }
                Step::Call {
                    workflow: callee,
                    condition,
                    ..
                } => {
                    if !definition.workflows.contains_key(callee) {
                        issues.push(ValidationIssue {
                            location: location.clone(),
                            message: format!("references unknown workflow '{callee}'"),
                        });
                    }
                    check_condition(&location, condition.as_deref(), &mut issues);
                }
            }
        }
    }

    issues.extend(find_cycles(definition));
    issues
}

/// `if:` takes a single environment variable name.
fn check_condition(location: &str, condition: Option<&str>, issues: &mut Vec<ValidationIssue>) {
    let Some(condition) = condition else { return };
    let name = condition.trim();
    let well_formed = !name.is_empty()
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !well_formed {
        issues.push(ValidationIssue {
            location: location.to_string(),
            message: format!("malformed if expression '{condition}': expected an environment variable name"),
        });
    }
}

/// Kahn's algorithm over the call graph: anything not drained is on a cycle.
fn find_cycles(definition: &Definition) -> Vec<ValidationIssue> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();

    for name in definition.workflows.keys() {
        adjacency.entry(name).or_default();
        in_degree.entry(name).or_insert(0);
    }
    for (name, workflow) in &definition.workflows {
        for step in &workflow.steps {
            if let Step::Call {
                workflow: callee, ..
            } = step
            {
                if definition.workflows.contains_key(callee.as_str()) {
                    adjacency.entry(name.as_str()).or_default().push(callee);
                    *in_degree.entry(callee.as_str()).or_insert(0) += 1;
                }
            }
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut drained: HashSet<&str> = HashSet::new();

    while let Some(name) = queue.pop_front() {
        drained.insert(name);
        if let Some(callees) = adjacency.get(name) {
            for callee in callees {
                let degree = in_degree.get_mut(callee).expect("callee registered above");
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(callee);
                }
            }
        }
    }

    let mut cyclic: Vec<&str> = definition
        .workflows
        .keys()
        .map(String::as_str)
        .filter(|name| !drained.contains(name))
        .collect();
    cyclic.sort_unstable();

    cyclic
        .into_iter()
        .map(|name| ValidationIssue {
            location: format!("workflows.{name}"),
            message: "participates in a sub-workflow cycle".to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::Definition;

    fn parse(yaml: &str) -> Definition {
        Definition::parse(yaml).unwrap()
    }

    #[test]
    fn test_valid_definition_has_no_issues() {
        let def = parse(
            "workflows:\n  main:\n    steps:\n      - run: \"echo hi\"\n      - workflow: helper\n  helper:\n    private: true\n    steps:\n      - run: \"true\"\n        if: CI\n",
        );
        assert!(validate(&def).is_empty());
    }

    #[test]
    fn test_unknown_reference_reported() {
        let def = parse(
            "workflows:\n  main:\n    steps:\n      - workflow: ghost\n",
        );
        let issues = validate(&def);
        assert!(issues
            .iter()
            .any(|i| i.message.contains("unknown workflow 'ghost'")));
    }

    #[test]
    fn test_direct_and_indirect_cycles_reported() {
        let def = parse(
            "workflows:\n  a:\n    steps:\n      - workflow: b\n  b:\n    steps:\n      - workflow: a\n",
        );
        let issues = validate(&def);
        let cycle_count = issues
            .iter()
            .filter(|i| i.message.contains("cycle"))
            .count();
        assert_eq!(cycle_count, 2);
    }

    #[test]
    fn test_self_call_is_a_cycle() {
        let def = parse(
            "workflows:\n  loop:\n    steps:\n      - workflow: loop\n",
        );
        let issues = validate(&def);
        assert!(issues.iter().any(|i| i.message.contains("cycle")));
    }

    #[test]
    fn test_empty_run_and_empty_workflow_reported() {
        let def = parse(
            "workflows:\n  main:\n    steps:\n      - run: \"  \"\n  empty:\n    steps: []\n",
        );
        let issues = validate(&def);
        assert!(issues.iter().any(|i| i.message.contains("run command is empty")));
        assert!(issues.iter().any(|i| i.message.contains("no steps")));
    }

    #[test]
    fn test_malformed_if_reported() {
        let def = parse(
            "workflows:\n  main:\n    steps:\n      - run: \"true\"\n        if: \"$(rm -rf /)\"\n",
        );
        let issues = validate(&def);
        assert!(issues.iter().any(|i| i.message.contains("malformed if")));
    }

    #[test]
    fn test_no_workflows_reported() {
        let def = parse("env: {}\n");
        let issues = validate(&def);
        assert!(issues.iter().any(|i| i.message.contains("no workflows")));
    }
}
