//! Skill playbooks — markdown files the agent can pull into its system
//! prompt on demand via the `load_skill` tool.

use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct Skill {
    pub name: String,
    /// First non-heading line of the file.
    pub summary: String,
    pub body: String,
}

pub struct SkillLibrary {
    skills: BTreeMap<String, Skill>,
}

impl SkillLibrary {
    /// Load every `*.md` under `dir`. A missing directory yields an empty
    /// library — skills are optional.
    pub fn load(dir: &Path) -> Self {
        let mut skills = BTreeMap::new();
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => {
                tracing::debug!(dir = %dir.display(), "no skills directory");
                return Self { skills };
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match std::fs::read_to_string(&path) {
                Ok(body) => {
                    let summary = body
                        .lines()
                        .find(|l| !l.trim().is_empty() && !l.starts_with('#'))
                        .unwrap_or_default()
                        .trim()
                        .to_string();
                    skills.insert(
                        name.to_string(),
                        Skill {
                            name: name.to_string(),
                            summary,
                            body,
                        },
                    );
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable skill"),
            }
        }

        tracing::info!(count = skills.len(), dir = %dir.display(), "skill library loaded");
        Self { skills }
    }

    pub fn get(&self, name: &str) -> Option<&Skill> {
        self.skills.get(name)
    }

    /// `name — summary` lines for the system prompt.
    pub fn summaries(&self) -> Vec<String> {
        self.skills
            .values()
            .map(|s| format!("{} — {}", s.name, s.summary))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library_with(files: &[(&str, &str)]) -> SkillLibrary {
        let dir = tempfile::tempdir().unwrap();
        for (name, body) in files {
            std::fs::write(dir.path().join(format!("{name}.md")), body).unwrap();
        }
        SkillLibrary::load(dir.path())
    }

    #[test]
    fn loads_and_summarizes() {
        let lib = library_with(&[(
            "queue-setup",
            "# Queue setup\nHow to lay out intake queues.\n\nDetails...",
        )]);
        let skill = lib.get("queue-setup").unwrap();
        assert_eq!(skill.summary, "How to lay out intake queues.");
        assert_eq!(lib.summaries().len(), 1);
    }

    #[test]
    fn missing_dir_is_empty() {
        let lib = SkillLibrary::load(Path::new("/nonexistent/skills"));
        assert!(lib.is_empty());
        assert!(lib.get("anything").is_none());
    }

    #[test]
    fn non_markdown_files_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "nope").unwrap();
        let lib = SkillLibrary::load(dir.path());
        assert!(lib.is_empty());
    }
}
