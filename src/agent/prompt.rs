//! System prompt for the security-testing agent.

/// Fixed role description sent as the first message of every run.
pub const SYSTEM_PROMPT: &str = "You are a professional network security penetration testing expert. \
You can use a wide range of security tools to carry out autonomous penetration tests. \
Analyze the target and choose the best testing strategy. \
When you need to run a tool, use the provided tool functions.";

/// The system prompt, extended with the skills recommended for this run.
pub fn build_system_prompt(skill_hints: &[String]) -> String {
    let hints: Vec<&str> = skill_hints
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    if hints.is_empty() {
        return SYSTEM_PROMPT.to_string();
    }

    let list = hints
        .iter()
        .map(|s| format!("- {}", s))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{SYSTEM_PROMPT}\n\n## Recommended Skills\n\n\
The following skills are relevant to this task. Use `read_skill` to load one before relying on it:\n{list}"
    )
}
