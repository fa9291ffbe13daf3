//! Context assembly for task prompts.
//!
//! The injector builds the final prompt text handed to a CLI, compressing
//! or dropping optional sections according to the current budget zone.

pub mod loader;

pub use loader::{read_text, PersonaLoader};

use crate::budget::{optimize_context, BudgetZone};

/// Section separator in the assembled prompt.
const SEPARATOR: &str = "\n\n---\n\n";

/// Inputs for one context build.
#[derive(Debug, Clone, Default)]
pub struct BuildOpts {
    pub zone: BudgetZone,
    /// Explicit skill name; when empty, one is auto-selected from the prompt.
    pub skill_name: String,
    pub project_instructions: String,
    pub project_memory: String,
    pub checkpoint: String,
    pub prompt: String,
}

/// Assembles the full context string for a task.
pub struct Injector {
    loader: PersonaLoader,
}

impl Injector {
    pub fn new(loader: PersonaLoader) -> Self {
        Self { loader }
    }

    /// Build context in the canonical nine-part injection order:
    ///
    /// 1. IDENTITY (compressed at YELLOW+)
    /// 2. THINKING (compressed at YELLOW+)
    /// 3. RULES (never compressed)
    /// 4. MEMORY (dropped at ORANGE+)
    /// 5. Skill file
    /// 6. Project instructions (dropped at RED)
    /// 7. Project memory (dropped at ORANGE+)
    /// 8. Checkpoint output (when resuming)
    /// 9. Task prompt (never compressed)
    pub fn build_context(&self, opts: &BuildOpts) -> String {
        let zone = opts.zone;
        let mut parts: Vec<String> = Vec::new();

        let mut add = |label: &str, content: &str| {
            if !content.is_empty() {
                parts.push(format!("# {label}\n\n{content}"));
            }
        };

        let mut identity = self.loader.load_identity();
        if zone >= BudgetZone::Yellow {
            identity = optimize_context(&identity, zone);
        }
        add("IDENTITY", &identity);

        let mut thinking = self.loader.load_thinking();
        if zone >= BudgetZone::Yellow {
            thinking = optimize_context(&thinking, zone);
        }
        add("THINKING", &thinking);

        add("RULES", &self.loader.load_rules());

        if zone < BudgetZone::Orange {
            let memory = self.loader.load_memory();
            if !memory.is_empty() {
                add("MEMORY", &optimize_context(&memory, zone));
            }
        }

        let skill_name = if opts.skill_name.is_empty() {
            self.loader.auto_select_skill(&opts.prompt)
        } else {
            Some(opts.skill_name.clone())
        };
        if let Some(name) = skill_name {
            add("SKILL", &self.loader.load_skill(&name));
        }

        if zone < BudgetZone::Red {
            add("PROJECT INSTRUCTIONS", &opts.project_instructions);
        }

        if zone < BudgetZone::Orange {
            add("PROJECT MEMORY", &opts.project_memory);
        }

        add("CHECKPOINT (resuming from)", &opts.checkpoint);

        if !opts.prompt.is_empty() {
            parts.push(format!("# TASK\n\n{}", opts.prompt));
        }

        parts.join(SEPARATOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn injector_with(files: &[(&str, &str)]) -> (Injector, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(path, content).unwrap();
        }
        (Injector::new(PersonaLoader::new(dir.path())), dir)
    }

    #[test]
    fn sections_appear_in_canonical_order() {
        let (injector, _dir) = injector_with(&[
            ("IDENTITY.md", "identity text"),
            ("THINKING.md", "thinking text"),
            ("RULES.md", "rules text"),
            ("MEMORY.md", "memory text"),
        ]);

        let ctx = injector.build_context(&BuildOpts {
            project_instructions: "project instructions".into(),
            project_memory: "project memory".into(),
            checkpoint: "checkpoint text".into(),
            prompt: "the actual prompt".into(),
            ..BuildOpts::default()
        });

        let order = [
            "# IDENTITY",
            "# THINKING",
            "# RULES",
            "# MEMORY",
            "# PROJECT INSTRUCTIONS",
            "# PROJECT MEMORY",
            "# CHECKPOINT (resuming from)",
            "# TASK",
        ];
        let mut last = 0;
        for header in order {
            let pos = ctx.find(header).unwrap_or_else(|| panic!("missing {header}"));
            assert!(pos >= last, "{header} out of order");
            last = pos;
        }
        assert!(ctx.contains("\n\n---\n\n"));
    }

    #[test]
    fn empty_sections_are_omitted() {
        let (injector, _dir) = injector_with(&[("RULES.md", "rules")]);
        let ctx = injector.build_context(&BuildOpts {
            prompt: "p".into(),
            ..BuildOpts::default()
        });
        assert!(!ctx.contains("# IDENTITY"));
        assert!(!ctx.contains("# CHECKPOINT"));
        assert!(ctx.contains("# RULES"));
        assert!(ctx.contains("# TASK"));
    }

    #[test]
    fn rules_and_prompt_survive_red_zone() {
        let long = "Important sentence. ".repeat(2000);
        let (injector, _dir) = injector_with(&[
            ("IDENTITY.md", long.as_str()),
            ("RULES.md", long.as_str()),
            ("MEMORY.md", "memory"),
        ]);

        let ctx = injector.build_context(&BuildOpts {
            zone: BudgetZone::Red,
            project_instructions: "instructions".into(),
            project_memory: "project memory".into(),
            prompt: long.clone(),
            ..BuildOpts::default()
        });

        // Identity compressed, rules and prompt intact.
        assert!(ctx.contains("[... context compressed for token budget ...]"));
        assert!(ctx.contains(&format!("# RULES\n\n{long}")));
        assert!(ctx.ends_with(&long));
        // Optional sections dropped entirely.
        assert!(!ctx.contains("# MEMORY"));
        assert!(!ctx.contains("# PROJECT INSTRUCTIONS"));
        assert!(!ctx.contains("# PROJECT MEMORY"));
    }

    #[test]
    fn orange_drops_memory_but_keeps_instructions() {
        let (injector, _dir) = injector_with(&[("MEMORY.md", "memory")]);
        let ctx = injector.build_context(&BuildOpts {
            zone: BudgetZone::Orange,
            project_instructions: "instructions".into(),
            project_memory: "project memory".into(),
            prompt: "p".into(),
            ..BuildOpts::default()
        });
        assert!(!ctx.contains("# MEMORY"));
        assert!(!ctx.contains("# PROJECT MEMORY"));
        assert!(ctx.contains("# PROJECT INSTRUCTIONS"));
    }

    #[test]
    fn checkpoint_round_trips_into_prompt() {
        let (injector, _dir) = injector_with(&[]);
        let ctx = injector.build_context(&BuildOpts {
            checkpoint: "partial output from the last attempt".into(),
            prompt: "continue the work".into(),
            ..BuildOpts::default()
        });
        assert!(ctx.contains("# CHECKPOINT (resuming from)\n\npartial output from the last attempt"));
        // The checkpoint precedes the task prompt.
        assert!(ctx.find("# CHECKPOINT").unwrap() < ctx.find("# TASK").unwrap());
    }

    #[test]
    fn explicit_skill_wins_over_auto_selection() {
        let (injector, _dir) = injector_with(&[
            ("skills/devops.md", "devops skill"),
            ("skills/bug-fixer.md", "bug skill"),
        ]);
        let ctx = injector.build_context(&BuildOpts {
            skill_name: "devops".into(),
            prompt: "fix this bug".into(),
            ..BuildOpts::default()
        });
        assert!(ctx.contains("devops skill"));
        assert!(!ctx.contains("bug skill"));
    }
}
