//! Link graph across notes.
//!
//! Built from stored `note_links` rows. A reference that matches no note is
//! kept as an unresolved reference for the report; it never stops the build.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::errors::Error;
use crate::storage::Database;
use crate::storage::notes::NoteRecord;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    /// Relative note path.
    pub id: String,
    pub label: String,
    pub category: Option<String>,
    pub in_degree: usize,
    pub out_degree: usize,
}

impl GraphNode {
    pub fn degree(&self) -> usize {
        self.in_degree + self.out_degree
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct UnresolvedReference {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hub {
    pub path: String,
    pub title: String,
    pub degree: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphReport {
    pub note_count: usize,
    pub edge_count: usize,
    pub density: f64,
    pub hubs: Vec<Hub>,
    pub orphans: Vec<String>,
    pub unresolved: Vec<UnresolvedReference>,
}

/// Export formats for [`KnowledgeGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphFormat {
    /// Graphviz DOT digraph.
    Dot,
    /// Node-link JSON for d3-force or vis-network.
    Json,
}

/// In-memory directed graph, nodes sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KnowledgeGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub unresolved: Vec<UnresolvedReference>,
}

/// Resolves references against the indexed notes.
struct Resolver<'a> {
    by_path: HashMap<&'a str, &'a NoteRecord>,
    by_slug: HashMap<String, &'a str>,
    by_title: HashMap<String, &'a str>,
}

impl<'a> Resolver<'a> {
    fn new(notes: &'a [NoteRecord]) -> Self {
        let mut by_path = HashMap::new();
        let mut by_slug = HashMap::new();
        let mut by_title = HashMap::new();
        // Notes arrive sorted by path, so the first claimant of a slug or
        // title wins deterministically.
        for note in notes {
            by_path.insert(note.file_path.as_str(), note);
            by_slug
                .entry(slugify(stem(&note.file_path)))
                .or_insert(note.file_path.as_str());
            by_title
                .entry(note.title.to_lowercase())
                .or_insert(note.file_path.as_str());
        }
        for note in notes {
            for alias in &note.aliases {
                by_title
                    .entry(alias.to_lowercase())
                    .or_insert(note.file_path.as_str());
            }
        }
        Self {
            by_path,
            by_slug,
            by_title,
        }
    }

    fn resolve(&self, target: &str) -> Option<&'a str> {
        let target = target.trim().trim_start_matches("./");
        if let Some(note) = self.by_path.get(target).copied() {
            return Some(note.file_path.as_str());
        }
        for ext in [".md", ".markdown"] {
            if let Some(note) = self.by_path.get(format!("{target}{ext}").as_str()).copied() {
                return Some(note.file_path.as_str());
            }
        }
        if let Some(path) = self.by_slug.get(&slugify(stem(target))).copied() {
            return Some(path);
        }
        self.by_title.get(&target.to_lowercase()).copied()
    }
}

fn stem(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.strip_suffix(".md")
        .or_else(|| name.strip_suffix(".markdown"))
        .unwrap_or(name)
}

/// Lowercase, alphanumerics kept, every other run collapsed to one `-`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Builds [`KnowledgeGraph`]s from the store.
pub struct GraphBuilder;

impl GraphBuilder {
    /// Build the graph. Archived notes are left out unless `include_archive`.
    ///
    /// # Errors
    ///
    /// Returns error only when the store cannot be read.
    pub fn build(db: &Database, include_archive: bool) -> Result<KnowledgeGraph, Error> {
        let notes = db.list_notes()?;
        let links = db.list_links()?;
        let graph = Self::from_parts(&notes, &links, include_archive);

        tracing::debug!(
            target: "notekeep.graph",
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            unresolved = graph.unresolved.len(),
            "graph built"
        );
        Ok(graph)
    }

    /// Build from already-loaded notes and `(source, target_ref)` links.
    pub fn from_parts(
        notes: &[NoteRecord],
        links: &[(String, String)],
        include_archive: bool,
    ) -> KnowledgeGraph {
        let resolver = Resolver::new(notes);
        let included = |path: &str| {
            resolver
                .by_path
                .get(path)
                .is_some_and(|n| include_archive || !n.archived)
        };

        let mut edges: BTreeSet<GraphEdge> = BTreeSet::new();
        let mut unresolved: BTreeSet<UnresolvedReference> = BTreeSet::new();
        for (source, target_ref) in links {
            if !included(source) {
                continue;
            }
            match resolver.resolve(target_ref) {
                Some(target) if target == source => {}
                Some(target) => {
                    if included(target) {
                        edges.insert(GraphEdge {
                            source: source.clone(),
                            target: target.to_string(),
                        });
                    }
                }
                None => {
                    unresolved.insert(UnresolvedReference {
                        source: source.clone(),
                        target: target_ref.clone(),
                    });
                }
            }
        }

        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut out_degree: HashMap<&str, usize> = HashMap::new();
        for edge in &edges {
            *out_degree.entry(edge.source.as_str()).or_default() += 1;
            *in_degree.entry(edge.target.as_str()).or_default() += 1;
        }

        let nodes = notes
            .iter()
            .filter(|n| include_archive || !n.archived)
            .map(|n| GraphNode {
                id: n.file_path.clone(),
                label: n.title.clone(),
                category: n.category_tag.clone(),
                in_degree: in_degree.get(n.file_path.as_str()).copied().unwrap_or(0),
                out_degree: out_degree.get(n.file_path.as_str()).copied().unwrap_or(0),
            })
            .collect();

        KnowledgeGraph {
            nodes,
            edges: edges.into_iter().collect(),
            unresolved: unresolved.into_iter().collect(),
        }
    }
}

impl KnowledgeGraph {
    /// Summary statistics with the `top_n` highest-degree notes as hubs.
    pub fn report(&self, top_n: usize) -> GraphReport {
        let n = self.nodes.len();
        let e = self.edges.len();
        let density = if n > 1 {
            e as f64 / (n as f64 * (n as f64 - 1.0))
        } else {
            0.0
        };

        let mut ranked: Vec<&GraphNode> = self.nodes.iter().filter(|n| n.degree() > 0).collect();
        ranked.sort_by(|a, b| b.degree().cmp(&a.degree()).then_with(|| a.id.cmp(&b.id)));
        let hubs = ranked
            .into_iter()
            .take(top_n)
            .map(|n| Hub {
                path: n.id.clone(),
                title: n.label.clone(),
                degree: n.degree(),
            })
            .collect();

        let orphans = self
            .nodes
            .iter()
            .filter(|n| n.degree() == 0)
            .map(|n| n.id.clone())
            .collect();

        GraphReport {
            note_count: n,
            edge_count: e,
            density,
            hubs,
            orphans,
            unresolved: self.unresolved.clone(),
        }
    }

    /// Graphviz DOT digraph.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph notekeep {\n  node [shape=box];\n");
        for node in &self.nodes {
            out.push_str(&format!(
                "  \"{}\" [label=\"{}\"];\n",
                dot_escape(&node.id),
                dot_escape(&node.label)
            ));
        }
        for edge in &self.edges {
            out.push_str(&format!(
                "  \"{}\" -> \"{}\";\n",
                dot_escape(&edge.source),
                dot_escape(&edge.target)
            ));
        }
        out.push_str("}\n");
        out
    }

    /// Node-link JSON: `{"nodes": [{id, label, category, degree}], "links": [{source, target}]}`.
    pub fn to_visualization_json(&self) -> serde_json::Value {
        let nodes: Vec<serde_json::Value> = self
            .nodes
            .iter()
            .map(|n| {
                json!({
                    "id": n.id,
                    "label": n.label,
                    "category": n.category,
                    "degree": n.degree(),
                })
            })
            .collect();
        let links: Vec<serde_json::Value> = self
            .edges
            .iter()
            .map(|e| json!({ "source": e.source, "target": e.target }))
            .collect();
        json!({ "nodes": nodes, "links": links })
    }

    /// Render in `format`.
    pub fn export(&self, format: GraphFormat) -> Result<String, Error> {
        match format {
            GraphFormat::Dot => Ok(self.to_dot()),
            GraphFormat::Json => Ok(serde_json::to_string_pretty(&self.to_visualization_json())?),
        }
    }
}

fn dot_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
