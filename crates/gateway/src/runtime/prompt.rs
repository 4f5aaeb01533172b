//! System-prompt composition.
//!
//! Assembled fresh each iteration from stable sections first (identity,
//! mode, persona, skill index) so the prompt-cache prefix stays byte-stable
//! across iterations; volatile sections (loaded skills, context notes,
//! task board) come last.

use dp_domain::chat::{ChatMode, Persona};
use dp_domain::task::{TaskItem, TaskStatus};

use crate::skills::SkillLibrary;

pub struct PromptInputs<'a> {
    pub mode: ChatMode,
    pub persona: Persona,
    pub skills: &'a SkillLibrary,
    pub loaded_skills: &'a [String],
    pub context_notes: &'a [String],
    pub tasks: &'a [TaskItem],
}

const IDENTITY: &str = "You are docpilot, a configuration copilot for a document-processing \
platform. You help users inspect and change queues, schemas, hooks, and the rest of the \
platform's configuration through the tools provided. Ground every statement about the \
user's account in tool results; never invent entity ids or field values.";

const TOOL_GUIDANCE: &str = "The initial tool surface is deliberately small. Call \
`load_tool_category` to pull in the tools for a platform area before working in it. When \
several independent lookups are needed, request them in one turn so they run in parallel. \
Use `update_tasks` to keep a visible task list on multi-step work, and \
`write_output_file` for any artifact worth keeping.";

pub fn compose(inputs: &PromptInputs<'_>) -> String {
    let mut sections: Vec<String> = vec![IDENTITY.to_string(), TOOL_GUIDANCE.to_string()];

    sections.push(match inputs.mode {
        ChatMode::ReadOnly => "## Mode: read-only\n\
            This chat cannot modify the platform. Write tools are not available. If the user \
            asks for a change, explain what you would do and tell them to switch the chat to \
            read-write mode; do not attempt the change."
            .to_string(),
        ChatMode::ReadWrite => "## Mode: read-write\n\
            Writes are enabled and every change is recorded in a revertable commit log. \
            Before any write, read the current state of the entity you are changing. State \
            clearly what you changed afterwards."
            .to_string(),
    });

    if inputs.persona == Persona::Cautious {
        sections.push(
            "## Persona: cautious\n\
            Prefer asking one clarifying question over guessing. Before a write, restate \
            the exact change and its blast radius. Flag destructive operations and suggest \
            a dry-run or a narrower change when one exists."
                .to_string(),
        );
    }

    if !inputs.skills.is_empty() {
        let index = inputs.skills.summaries().join("\n- ");
        sections.push(format!(
            "## Skills\nPlaybooks available via `load_skill`:\n- {index}"
        ));
    }

    for name in inputs.loaded_skills {
        if let Some(skill) = inputs.skills.get(name) {
            sections.push(format!("## Skill: {}\n{}", skill.name, skill.body));
        }
    }

    if !inputs.context_notes.is_empty() {
        sections.push(format!(
            "## Pinned context\n{}",
            inputs.context_notes.join("\n---\n")
        ));
    }

    if !inputs.tasks.is_empty() {
        let board = inputs
            .tasks
            .iter()
            .map(|t| {
                let mark = match t.status {
                    TaskStatus::Pending => " ",
                    TaskStatus::InProgress => ">",
                    TaskStatus::Completed => "x",
                };
                format!("[{mark}] {} {}", t.id, t.subject)
            })
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(format!("## Task board\n{board}"));
    }

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn empty_skills() -> SkillLibrary {
        SkillLibrary::load(Path::new("/nonexistent"))
    }

    fn inputs(skills: &SkillLibrary) -> PromptInputs<'_> {
        PromptInputs {
            mode: ChatMode::ReadOnly,
            persona: Persona::Default,
            skills,
            loaded_skills: &[],
            context_notes: &[],
            tasks: &[],
        }
    }

    #[test]
    fn read_only_mode_forbids_writes() {
        let skills = empty_skills();
        let prompt = compose(&inputs(&skills));
        assert!(prompt.contains("read-only"));
        assert!(prompt.contains("do not attempt the change"));
    }

    #[test]
    fn cautious_persona_adds_section() {
        let skills = empty_skills();
        let mut i = inputs(&skills);
        i.persona = Persona::Cautious;
        let prompt = compose(&i);
        assert!(prompt.contains("Persona: cautious"));
        assert!(prompt.contains("clarifying question"));
    }

    #[test]
    fn stable_prefix_across_volatile_changes() {
        let skills = empty_skills();
        let base = compose(&inputs(&skills));

        let notes = vec!["see https://example.com/plan".to_string()];
        let mut with_notes = inputs(&skills);
        with_notes.context_notes = &notes;
        let extended = compose(&with_notes);

        // Volatile sections append; the cacheable prefix is unchanged.
        assert!(extended.starts_with(&base));
    }

    #[test]
    fn task_board_renders_status_marks() {
        let skills = empty_skills();
        let tasks = vec![
            TaskItem {
                id: 1,
                subject: "audit queues".into(),
                status: TaskStatus::Completed,
            },
            TaskItem {
                id: 2,
                subject: "patch schema".into(),
                status: TaskStatus::InProgress,
            },
        ];
        let mut i = inputs(&skills);
        i.tasks = &tasks;
        let prompt = compose(&i);
        assert!(prompt.contains("[x] 1 audit queues"));
        assert!(prompt.contains("[>] 2 patch schema"));
    }
}
