//! Persona file loading.
//!
//! Reads the persona context files (identity, thinking, rules, memory,
//! skills) from a directory. Missing files read as empty strings — every
//! section is optional except what the injector decides to require.

use std::path::{Path, PathBuf};

/// Reads persona definition files from the persona directory.
pub struct PersonaLoader {
    persona_dir: PathBuf,
}

impl PersonaLoader {
    pub fn new(persona_dir: impl Into<PathBuf>) -> Self {
        Self {
            persona_dir: persona_dir.into(),
        }
    }

    pub fn load_identity(&self) -> String {
        self.read_file("IDENTITY.md")
    }

    pub fn load_thinking(&self) -> String {
        self.read_file("THINKING.md")
    }

    /// Operating rules. Never compressed by the injector.
    pub fn load_rules(&self) -> String {
        self.read_file("RULES.md")
    }

    pub fn load_memory(&self) -> String {
        self.read_file("MEMORY.md")
    }

    /// Read a skill file by name from the skills/ subdirectory. The name
    /// is sanitized to `[A-Za-z0-9_-]` so a stored skill name can never
    /// escape the directory.
    pub fn load_skill(&self, name: &str) -> String {
        let safe = sanitize_name(name);
        if safe.is_empty() {
            return String::new();
        }
        self.read_file(&format!("skills/{safe}.md"))
    }

    /// Pick a skill based on keywords found in the prompt. Only skills
    /// that actually exist on disk are considered.
    pub fn auto_select_skill(&self, prompt: &str) -> Option<String> {
        let lower = prompt.to_lowercase();

        static KEYWORD_MAP: &[(&str, &[&str])] = &[
            ("bug-fixer", &["bug", "fix", "error", "crash", "exception", "debug"]),
            ("code-reviewer", &["review", "code review", "pull request", "feedback"]),
            ("devops", &["docker", "kubernetes", "ci/cd", "nginx", "deploy", "pipeline"]),
            ("seo-writer", &["seo", "meta", "keyword", "article", "blog"]),
            ("test-writer", &["test", "e2e", "coverage", "regression"]),
        ];

        let available = self.list_skills();
        for (skill, keywords) in KEYWORD_MAP {
            if !available.iter().any(|s| s == skill) {
                continue;
            }
            if keywords.iter().any(|kw| lower.contains(kw)) {
                return Some(skill.to_string());
            }
        }
        None
    }

    /// All skill names (file stems) in the skills/ subdirectory.
    pub fn list_skills(&self) -> Vec<String> {
        let skills_dir = self.persona_dir.join("skills");
        let Ok(entries) = std::fs::read_dir(&skills_dir) else {
            return Vec::new();
        };

        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let path = e.path();
                if path.extension().is_some_and(|ext| ext == "md") {
                    path.file_stem().map(|s| s.to_string_lossy().into_owned())
                } else {
                    None
                }
            })
            .collect()
    }

    fn read_file(&self, name: &str) -> String {
        read_text(&self.persona_dir.join(name))
    }
}

/// Read a file path, returning an empty string on any error.
pub fn read_text(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persona_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("IDENTITY.md"), "I am the agent.").unwrap();
        std::fs::write(dir.path().join("RULES.md"), "Never push to main.").unwrap();
        std::fs::create_dir(dir.path().join("skills")).unwrap();
        std::fs::write(dir.path().join("skills/bug-fixer.md"), "Fix bugs well.").unwrap();
        dir
    }

    #[test]
    fn missing_files_read_empty() {
        let dir = persona_dir();
        let loader = PersonaLoader::new(dir.path());
        assert_eq!(loader.load_identity(), "I am the agent.");
        assert_eq!(loader.load_memory(), "");
    }

    #[test]
    fn skill_names_are_sanitized() {
        let dir = persona_dir();
        let loader = PersonaLoader::new(dir.path());
        assert_eq!(loader.load_skill("bug-fixer"), "Fix bugs well.");
        // Traversal attempts collapse to a non-existent name.
        assert_eq!(loader.load_skill("../../etc/passwd"), "");
    }

    #[test]
    fn auto_select_requires_skill_on_disk() {
        let dir = persona_dir();
        let loader = PersonaLoader::new(dir.path());
        assert_eq!(
            loader.auto_select_skill("please fix this bug in the parser"),
            Some("bug-fixer".to_string())
        );
        // devops keywords match but no devops skill file exists.
        assert_eq!(loader.auto_select_skill("deploy with docker"), None);
    }
}
