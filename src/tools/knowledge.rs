//! Knowledge base search and skill documents.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use walkdir::WalkDir;

use super::{optional_str, required_str, Tool, ToolContext};
use super::{TOOL_LIST_SKILLS, TOOL_READ_SKILL, TOOL_SEARCH_KNOWLEDGE_BASE};

const MAX_SEARCH_RESULTS: usize = 5;
const SNIPPET_CHARS: usize = 600;

/// Keyword search over markdown/text documents in the knowledge directory.
pub struct SearchKnowledgeBase;

#[async_trait]
impl Tool for SearchKnowledgeBase {
    fn name(&self) -> &str {
        TOOL_SEARCH_KNOWLEDGE_BASE
    }

    fn description(&self) -> &str {
        "Search the security knowledge base for techniques, payloads and vulnerability background. Returns the best matching documents with a short excerpt."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look for, e.g. 'blind sql injection time based'"
                },
                "risk_type": {
                    "type": "string",
                    "description": "Optional category; only documents whose path contains it are searched (e.g. 'xss', 'sqli')"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: &Map<String, Value>, ctx: &ToolContext) -> anyhow::Result<String> {
        let query = required_str(args, "query")?.to_string();
        let risk_type = optional_str(args, "risk_type").map(str::to_lowercase);
        let dir = ctx
            .knowledge_dir
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Knowledge base is not configured"))?;

        let hits = tokio::task::spawn_blocking(move || search_dir(&dir, &query, risk_type.as_deref()))
            .await??;

        if hits.is_empty() {
            return Ok("No matching knowledge base entries found.".to_string());
        }

        let mut out = String::new();
        for (idx, hit) in hits.iter().enumerate() {
            out.push_str(&format!(
                "## {}. {} (score {})\n{}\n\n",
                idx + 1,
                hit.path,
                hit.score,
                hit.snippet
            ));
        }
        Ok(out.trim_end().to_string())
    }
}

/// List the available skill documents.
pub struct ListSkills;

#[async_trait]
impl Tool for ListSkills {
    fn name(&self) -> &str {
        TOOL_LIST_SKILLS
    }

    fn description(&self) -> &str {
        "List the available skills. A skill is a playbook describing how to test a specific class of vulnerability."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _args: &Map<String, Value>, ctx: &ToolContext) -> anyhow::Result<String> {
        let dir = skills_dir(ctx)?;
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read skills directory: {}", e))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if let Some(name) = skill_name(&path).await {
                names.push(name);
            }
        }
        names.sort();

        if names.is_empty() {
            return Ok("No skills available.".to_string());
        }
        Ok(format!("Available skills:\n{}", names.iter().map(|n| format!("- {}", n)).collect::<Vec<_>>().join("\n")))
    }
}

/// Read one skill document by name.
pub struct ReadSkill;

#[async_trait]
impl Tool for ReadSkill {
    fn name(&self) -> &str {
        TOOL_READ_SKILL
    }

    fn description(&self) -> &str {
        "Read the full content of a skill by name (as returned by list_skills)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Skill name"
                }
            },
            "required": ["name"]
        })
    }

    async fn execute(&self, args: &Map<String, Value>, ctx: &ToolContext) -> anyhow::Result<String> {
        let name = required_str(args, "name")?;
        if name.contains('/') || name.contains('\\') || name.contains("..") {
            anyhow::bail!("Invalid skill name: {}", name);
        }
        let dir = skills_dir(ctx)?;

        for candidate in [dir.join(format!("{}.md", name)), dir.join(name).join("SKILL.md")] {
            if tokio::fs::metadata(&candidate).await.map(|m| m.is_file()).unwrap_or(false) {
                return tokio::fs::read_to_string(&candidate)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to read skill {}: {}", name, e));
            }
        }
        anyhow::bail!("Skill not found: {}", name)
    }
}

fn skills_dir(ctx: &ToolContext) -> anyhow::Result<PathBuf> {
    ctx.skills_dir
        .clone()
        .ok_or_else(|| anyhow::anyhow!("Skills directory is not configured"))
}

/// `foo.md` and `foo/SKILL.md` both name the skill `foo`.
async fn skill_name(path: &Path) -> Option<String> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    if meta.is_dir() {
        let doc = tokio::fs::metadata(path.join("SKILL.md")).await.ok()?;
        if !doc.is_file() {
            return None;
        }
        return path.file_name().map(|n| n.to_string_lossy().into_owned());
    }
    if path.extension().and_then(|e| e.to_str()) == Some("md") {
        return path.file_stem().map(|n| n.to_string_lossy().into_owned());
    }
    None
}

#[derive(Debug)]
struct SearchHit {
    path: String,
    score: usize,
    snippet: String,
}

fn search_dir(dir: &Path, query: &str, risk_type: Option<&str>) -> anyhow::Result<Vec<SearchHit>> {
    if !dir.is_dir() {
        anyhow::bail!("Knowledge directory does not exist: {}", dir.display());
    }
    let terms: Vec<String> = query
        .split_whitespace()
        .map(str::to_lowercase)
        .filter(|t| !t.is_empty())
        .collect();
    if terms.is_empty() {
        return Ok(Vec::new());
    }

    let mut hits = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false).into_iter().filter_map(Result::ok) {
        let path = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if ext != "md" && ext != "txt" {
            continue;
        }
        let relative = path.strip_prefix(dir).unwrap_or(path).to_string_lossy().into_owned();
        if let Some(risk) = risk_type {
            if !relative.to_lowercase().contains(risk) {
                continue;
            }
        }
        let Ok(content) = std::fs::read_to_string(path) else {
            continue;
        };
        let lower = content.to_lowercase();
        let score: usize = terms.iter().map(|t| lower.matches(t.as_str()).count()).sum();
        if score == 0 {
            continue;
        }
        hits.push(SearchHit {
            path: relative,
            score,
            snippet: snippet_around(&content, &lower, &terms[0]),
        });
    }

    hits.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.path.cmp(&b.path)));
    hits.truncate(MAX_SEARCH_RESULTS);
    Ok(hits)
}

/// Excerpt starting a little before the first occurrence of `term`.
fn snippet_around(content: &str, lower: &str, term: &str) -> String {
    let start_byte = lower.find(term).unwrap_or(0);
    // Lowercasing can shift byte offsets; map back through char counts.
    let start_char = lower[..start_byte].chars().count().saturating_sub(100);
    let snippet: String = content.chars().skip(start_char).take(SNIPPET_CHARS).collect();
    snippet.trim().to_string()
}
