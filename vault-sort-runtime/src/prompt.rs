//! Prompt assembly. Identical inputs always produce identical bytes.

use crate::memory::{MemoryEntry, MemoryWindow};
use crate::run_config::DestinationPolicy;
use serde::Serialize;
use std::collections::BTreeMap;
use vault_sort::infra::Stage;
use vault_sort_tools::{Observation, TreeNode};

pub struct PromptContext<'a> {
    pub stage: Stage,
    pub memory: &'a MemoryWindow,
    pub target: &'a Observation,
    /// Present in the decide stage only.
    pub destination_trees: Option<&'a BTreeMap<String, TreeNode>>,
    pub policy_hint: Option<&'a str>,
}

#[derive(Serialize)]
struct ObservationBlock<'a> {
    #[serde(rename = "STAGE")]
    stage: Stage,
    #[serde(rename = "CURRENT_TARGET")]
    current_target: &'a Observation,
    #[serde(rename = "DESTINATION_TREES", skip_serializing_if = "Option::is_none")]
    destination_trees: Option<&'a BTreeMap<String, TreeNode>>,
}

pub struct PromptBuilder {
    system: String,
}

impl PromptBuilder {
    pub fn new(policy: &DestinationPolicy) -> Self {
        let roots = policy
            .roots()
            .iter()
            .map(|r| r.label())
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            system: system_prompt(&roots, &policy.describe()),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system
    }

    pub fn build(&self, ctx: &PromptContext<'_>) -> String {
        let recent: Vec<&MemoryEntry> = ctx.memory.observations();
        let block = ObservationBlock {
            stage: ctx.stage,
            current_target: ctx.target,
            destination_trees: ctx.destination_trees,
        };

        let mut prompt = String::with_capacity(self.system.len() + 2048);
        prompt.push_str(&self.system);
        if let Some(hint) = ctx.policy_hint {
            prompt.push_str("\nPOLICY_HINT:\n");
            prompt.push_str(hint);
            prompt.push('\n');
        }
        prompt.push_str("\nRECENT_TOOL_OBS:\n");
        prompt.push_str(&serde_json::to_string(&recent).unwrap_or_else(|_| "[]".to_string()));
        prompt.push_str("\nOBSERVATION:\n");
        prompt.push_str(&serde_json::to_string(&block).unwrap_or_else(|_| "{}".to_string()));
        prompt.push('\n');
        prompt
    }
}

fn system_prompt(roots: &str, patterns: &str) -> String {
    format!(
        r#"You sort the files of a personal archive, one inbox item at a time.

Reply with a single minified JSON object {{"actions":[ACTION]}} and nothing else.

ACTION is one of (absolute paths):
{{"tool":"list_dir","path":"<dir>"}}
{{"tool":"inspect_file","path":"<file>"}}
{{"tool":"plan_move","src":"<file or dir>","destination_root":"<{roots}>","subpath":"<folder/subfolder or empty>","filename":"<name with extension>"}}

Allowed destinations: {patterns}. A trailing /* means a subfolder is required.

Rules:
- Reuse folders listed in DESTINATION_TREES when one fits; create a new subfolder only when none does.
- Identity papers, contracts, payslips and similar records go under a Documents category, scans and photos included.
- Keep related media together: move a season or album folder as a whole rather than its files.
- Keep the original file name unless it is meaningless.
- An item with "png_asset_hint":true holds icons or UI graphics, not photos; file it with design or project assets.

When STAGE is "decide":
- Return exactly one action and it must be plan_move.
- Never target the bare root of a destination that requires a subfolder.
"#
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::memory::MemoryEntry;
    use serde_json::json;
    use vault_sort_tools::snapshot::EntryKind;
    use vault_sort_tools::MediaGroup;

    fn policy() -> DestinationPolicy {
        DestinationPolicy::parse(&["Documents/*".into(), "Media/*".into(), "Projects".into()])
            .unwrap()
    }

    fn observation() -> Observation {
        Observation {
            path: "/v/INBOX/report.pdf".into(),
            name: "report.pdf".into(),
            kind: EntryKind::File,
            size: 10,
            ext: "pdf".into(),
            group: MediaGroup::Document,
            excerpt: None,
            excerpt_truncated: false,
            children: None,
            png_asset_hint: false,
            error: None,
        }
    }

    #[test]
    fn test_probe_prompt_sections() {
        let builder = PromptBuilder::new(&policy());
        let memory = MemoryWindow::new(4);
        let target = observation();
        let prompt = builder.build(&PromptContext {
            stage: Stage::Probe,
            memory: &memory,
            target: &target,
            destination_trees: None,
            policy_hint: None,
        });

        assert!(prompt.starts_with(builder.system_prompt()));
        assert!(prompt.contains("Documents/*, Media/*, Projects"));
        assert!(prompt.contains("\nRECENT_TOOL_OBS:\n[]\n"));
        assert!(prompt.contains(r#""STAGE":"probe""#));
        assert!(!prompt.contains("DESTINATION_TREES\":"));
        assert!(!prompt.contains("POLICY_HINT"));
    }

    #[test]
    fn test_decide_prompt_carries_trees_and_hint() {
        let builder = PromptBuilder::new(&policy());
        let mut memory = MemoryWindow::new(4);
        memory.push(MemoryEntry {
            step: 1,
            tool: "inspect_file".into(),
            path: "/v/INBOX/report.pdf".into(),
            summary: json!({"ext": "pdf"}),
            progressed: true,
        });
        let mut trees = BTreeMap::new();
        trees.insert(
            "Documents".to_string(),
            TreeNode {
                name: "Documents".into(),
                dirs: 0,
                children: Vec::new(),
            },
        );
        let target = observation();
        let ctx = PromptContext {
            stage: Stage::Decide,
            memory: &memory,
            target: &target,
            destination_trees: Some(&trees),
            policy_hint: Some("return plan_move"),
        };

        let first = builder.build(&ctx);
        assert!(first.contains("POLICY_HINT:\nreturn plan_move"));
        assert!(first.contains(r#""DESTINATION_TREES":{"Documents""#));
        assert!(first.contains(r#""tool":"inspect_file""#));
        assert_eq!(first, builder.build(&ctx));
    }

    #[test]
    fn test_png_asset_hint_reaches_prompt() {
        let builder = PromptBuilder::new(&policy());
        let memory = MemoryWindow::new(4);
        let plain = observation();
        let icons = Observation {
            path: "/v/INBOX/icons".into(),
            name: "icons".into(),
            kind: EntryKind::Dir,
            ext: String::new(),
            group: MediaGroup::Other,
            png_asset_hint: true,
            ..observation()
        };
        let prompt_for = |target: &Observation| {
            builder.build(&PromptContext {
                stage: Stage::Probe,
                memory: &memory,
                target,
                destination_trees: None,
                policy_hint: None,
            })
        };

        assert!(!prompt_for(&plain).contains(r#""png_asset_hint":true"#));
        let prompt = prompt_for(&icons);
        assert!(prompt.contains(r#""png_asset_hint":true"#));
        assert!(prompt.contains("icons or UI graphics"));
    }
}
