//! Note metadata: `---` frontmatter, inline `#tags`, headings and links.
//!
//! The frontmatter reader is a small line-oriented subset of YAML: scalar
//! `key: value` pairs, inline `[a, b]` lists and `- item` block lists.

use regex::Regex;

use crate::errors::Error;
use crate::storage::notes::Maturity;

/// Metadata extracted from one note's text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedNote {
    pub title: Option<String>,
    pub category: Option<String>,
    pub maturity: Option<Maturity>,
    /// Frontmatter tags followed by inline tags, deduplicated case-insensitively.
    pub tags: Vec<String>,
    pub aliases: Vec<String>,
    /// Text after the frontmatter block.
    pub body: String,
    /// Outgoing references: wikilink targets as written, markdown link
    /// targets as paths relative to the notes root.
    pub links: Vec<String>,
}

/// Compiled patterns for note parsing. Build once per indexing run.
#[derive(Debug)]
pub struct NoteParser {
    wikilink: Regex,
    markdown_link: Regex,
    inline_tag: Regex,
}

impl NoteParser {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            wikilink: Regex::new(r"\[\[([^\]\n]+)\]\]")?,
            markdown_link: Regex::new(r"\[[^\]\n]*\]\(([^)\s]+)\)")?,
            inline_tag: Regex::new(r"(?:^|\s)#([A-Za-z][A-Za-z0-9_/-]*)")?,
        })
    }

    /// Parse `content` of the note stored at `rel_path` (relative, `/`-separated).
    pub fn parse(&self, rel_path: &str, content: &str) -> ParsedNote {
        let (yaml, body) = split_frontmatter(content);
        let mut note = parse_frontmatter(yaml);
        let prose = strip_code_fences(body);

        if note.title.is_none() {
            note.title = body
                .lines()
                .find_map(|line| line.strip_prefix("# "))
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty());
        }

        for caps in self.inline_tag.captures_iter(&prose) {
            push_unique(&mut note.tags, caps[1].trim_end_matches('/'));
        }

        let wikilinks = self
            .wikilink
            .captures_iter(&prose)
            .filter_map(|caps| wikilink_target(&caps[1]));
        let md_links = self
            .markdown_link
            .captures_iter(&prose)
            .filter_map(|caps| markdown_target(rel_path, &caps[1]));

        let mut links: Vec<String> = Vec::new();
        for target in wikilinks.chain(md_links) {
            if !links.contains(&target) {
                links.push(target);
            }
        }

        note.links = links;
        note.body = body.to_string();
        note
    }
}

fn split_frontmatter(content: &str) -> (&str, &str) {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let Some(rest) = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))
    else {
        return ("", content);
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let body = &rest[offset + line.len()..];
            return (&rest[..offset], body);
        }
        offset += line.len();
    }
    ("", content)
}

fn parse_frontmatter(yaml: &str) -> ParsedNote {
    let mut note = ParsedNote::default();
    let mut list_key: Option<String> = None;

    for line in yaml.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        if let Some(item) = trimmed.strip_prefix("- ") {
            match list_key.as_deref() {
                Some("tags") => push_unique(&mut note.tags, &unquote(item)),
                Some("aliases") => push_unique(&mut note.aliases, &unquote(item)),
                _ => {}
            }
            continue;
        }

        let Some((key, value)) = trimmed.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        list_key = value.is_empty().then(|| key.clone());

        match key.as_str() {
            "title" if !value.is_empty() => note.title = Some(unquote(value)),
            "category" if !value.is_empty() => note.category = Some(unquote(value)),
            "maturity" | "status" => {
                if let Some(m) = Maturity::parse(&unquote(value)) {
                    note.maturity = Some(m);
                }
            }
            "tags" | "aliases" if !value.is_empty() => {
                let items = if value.starts_with('[') {
                    parse_inline_list(value)
                } else {
                    value.split(',').map(unquote).collect()
                };
                let target = if key == "tags" {
                    &mut note.tags
                } else {
                    &mut note.aliases
                };
                for item in items {
                    push_unique(target, &item);
                }
            }
            _ => {}
        }
    }
    note
}

fn parse_inline_list(value: &str) -> Vec<String> {
    value
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(unquote)
        .filter(|s| !s.is_empty())
        .collect()
}

fn unquote(value: &str) -> String {
    let v = value.trim();
    let v = v
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| v.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(v);
    v.trim().to_string()
}

/// Append `value` (minus a leading `#`) unless an equal one exists, ignoring case.
fn push_unique(list: &mut Vec<String>, value: &str) {
    let value = value.trim().trim_start_matches('#');
    if value.is_empty() {
        return;
    }
    if !list.iter().any(|v| v.eq_ignore_ascii_case(value)) {
        list.push(value.to_string());
    }
}

fn strip_code_fences(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut in_fence = false;
    for line in body.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if !in_fence {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

/// `target|alias` and `target#heading` both resolve to `target`.
fn wikilink_target(inner: &str) -> Option<String> {
    let target = inner.split('|').next().unwrap_or(inner);
    let target = target.split('#').next().unwrap_or(target).trim();
    (!target.is_empty()).then(|| target.to_string())
}

/// Resolve a relative markdown link against the source note's directory.
/// External URLs, anchors and non-note files are ignored.
fn markdown_target(source_rel: &str, raw: &str) -> Option<String> {
    if raw.contains("://") || raw.starts_with("mailto:") || raw.starts_with('#') {
        return None;
    }
    let raw = raw.split('#').next().unwrap_or(raw);
    if !(raw.ends_with(".md") || raw.ends_with(".markdown")) {
        return None;
    }

    let mut parts: Vec<&str> = if raw.starts_with('/') {
        Vec::new()
    } else {
        let mut dir: Vec<&str> = source_rel.split('/').collect();
        dir.pop();
        dir
    };
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            s => parts.push(s),
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> NoteParser {
        NoteParser::new().unwrap()
    }

    #[test]
    fn test_frontmatter_fields() {
        let text = "---\ntitle: \"Async Python\"\ntags: [python, Async]\ncategory: 10.01\nstatus: stable\naliases:\n  - asyncio\n---\n# Heading\nBody #python #extra\n";
        let note = parser().parse("a.md", text);
        assert_eq!(note.title.as_deref(), Some("Async Python"));
        assert_eq!(note.category.as_deref(), Some("10.01"));
        assert_eq!(note.maturity, Some(Maturity::Stable));
        assert_eq!(note.tags, vec!["python", "Async", "extra"]);
        assert_eq!(note.aliases, vec!["asyncio"]);
        assert!(note.body.starts_with("# Heading"));
    }

    #[test]
    fn test_block_list_tags() {
        let text = "---\ntags:\n  - one\n  - two\ntitle: T\n---\nbody";
        let note = parser().parse("a.md", text);
        assert_eq!(note.tags, vec!["one", "two"]);
        assert_eq!(note.title.as_deref(), Some("T"));
    }

    #[test]
    fn test_title_falls_back_to_heading() {
        let note = parser().parse("a.md", "intro\n# Real Title\ntext");
        assert_eq!(note.title.as_deref(), Some("Real Title"));
    }

    #[test]
    fn test_no_frontmatter_without_closing_fence() {
        let note = parser().parse("a.md", "---\ntitle: nope\nbody");
        assert!(note.title.is_none());
        assert!(note.body.starts_with("---"));
    }

    #[test]
    fn test_wikilinks_strip_alias_and_heading() {
        let note = parser().parse("a.md", "See [[Target|alias]] and [[Other#Section]] and [[Target]].");
        assert_eq!(note.links, vec!["Target", "Other"]);
    }

    #[test]
    fn test_markdown_links_resolve_relative() {
        let note = parser().parse(
            "dir/sub/a.md",
            "[x](../b.md) [y](./c.md#h) [z](https://e.com/d.md) [w](image.png)",
        );
        assert_eq!(note.links, vec!["dir/b.md", "dir/sub/c.md"]);
    }

    #[test]
    fn test_markdown_link_escaping_root_is_ignored() {
        let note = parser().parse("a.md", "[x](../../outside.md)");
        assert!(note.links.is_empty());
    }

    #[test]
    fn test_code_fences_are_ignored() {
        let note = parser().parse("a.md", "```\n#notatag [[nolink]]\n```\n#real");
        assert_eq!(note.tags, vec!["real"]);
        assert!(note.links.is_empty());
    }

    #[test]
    fn test_heading_is_not_a_tag() {
        let note = parser().parse("a.md", "# Title\n## Sub");
        assert!(note.tags.is_empty());
    }
}
