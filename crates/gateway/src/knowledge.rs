//! Bundled reference docs with keyword-overlap search, backing the
//! `knowledge_base_search` tool.

use std::path::Path;

#[derive(Debug, Clone)]
pub struct KnowledgeDoc {
    pub name: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct KnowledgeHit {
    pub name: String,
    pub score: f32,
    pub snippet: String,
}

pub struct KnowledgeBase {
    docs: Vec<KnowledgeDoc>,
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_string)
        .collect()
}

impl KnowledgeBase {
    pub fn load(dir: &Path) -> Self {
        let mut docs = Vec::new();
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("md") {
                    continue;
                }
                let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                if let Ok(body) = std::fs::read_to_string(&path) {
                    docs.push(KnowledgeDoc {
                        name: name.to_string(),
                        body,
                    });
                }
            }
        }
        tracing::info!(count = docs.len(), dir = %dir.display(), "knowledge base loaded");
        Self { docs }
    }

    /// Score docs by query-term overlap; return the top `k` with a snippet
    /// around the best-matching line.
    pub fn search(&self, query: &str, k: usize) -> Vec<KnowledgeHit> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Vec::new();
        }

        let mut hits: Vec<KnowledgeHit> = self
            .docs
            .iter()
            .filter_map(|doc| {
                let body_lower = doc.body.to_lowercase();
                let matched = terms
                    .iter()
                    .filter(|t| body_lower.contains(t.as_str()))
                    .count();
                if matched == 0 {
                    return None;
                }
                let score = matched as f32 / terms.len() as f32;
                let snippet = doc
                    .body
                    .lines()
                    .find(|line| {
                        let l = line.to_lowercase();
                        terms.iter().any(|t| l.contains(t.as_str()))
                    })
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                Some(KnowledgeHit {
                    name: doc.name.clone(),
                    score,
                    snippet,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.name.cmp(&b.name)));
        hits.truncate(k);
        hits
    }

    pub fn get(&self, name: &str) -> Option<&KnowledgeDoc> {
        self.docs.iter().find(|d| d.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}
