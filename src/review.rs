//! Review comments accumulated during a diff review, and their rendered
//! markdown summary.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use uuid::Uuid;

/// Which side of a split diff a comment is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentSide {
    Old,
    New,
}

/// A saved review comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewComment {
    pub id: Uuid,
    pub file_path: String,
    pub line_number: u32,
    pub side: CommentSide,
    pub text: String,
    pub code_line: Option<String>,
}

/// An in-progress comment, keyed by its anchor while being edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewDraft {
    pub file_path: String,
    pub side: CommentSide,
    pub line_number: u32,
    pub text: String,
    pub code_line: Option<String>,
}

/// In-memory store of review comments and drafts for one review session.
#[derive(Debug, Default)]
pub struct ReviewStore {
    comments: Vec<ReviewComment>,
    drafts: HashMap<String, ReviewDraft>,
}

impl ReviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn comments(&self) -> &[ReviewComment] {
        &self.comments
    }

    pub fn drafts(&self) -> &HashMap<String, ReviewDraft> {
        &self.drafts
    }

    /// Adds a comment and returns its generated id.
    pub fn add_comment(
        &mut self,
        file_path: impl Into<String>,
        line_number: u32,
        side: CommentSide,
        text: impl Into<String>,
        code_line: Option<String>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.comments.push(ReviewComment {
            id,
            file_path: file_path.into(),
            line_number,
            side,
            text: text.into(),
            code_line,
        });
        id
    }

    /// Replaces the text of an existing comment.
    pub fn update_comment(&mut self, id: Uuid, text: impl Into<String>) -> bool {
        match self.comments.iter_mut().find(|c| c.id == id) {
            Some(comment) => {
                comment.text = text.into();
                true
            }
            None => false,
        }
    }

    pub fn delete_comment(&mut self, id: Uuid) -> bool {
        let before = self.comments.len();
        self.comments.retain(|c| c.id != id);
        self.comments.len() != before
    }

    /// Drops all comments and drafts.
    pub fn clear(&mut self) {
        self.comments.clear();
        self.drafts.clear();
    }

    /// Sets or removes the draft at `key`.
    pub fn set_draft(&mut self, key: impl Into<String>, draft: Option<ReviewDraft>) {
        match draft {
            Some(draft) => {
                self.drafts.insert(key.into(), draft);
            }
            None => {
                self.drafts.remove(&key.into());
            }
        }
    }

    /// Renders the accumulated comments as a markdown block.
    ///
    /// Empty store yields an empty string, no header. Each comment renders
    /// as `**<filePath>** (Line <lineNumber>)`, an optional code excerpt
    /// (triple-fenced when the line itself contains a backtick), and a
    /// block-quoted body with path-like tokens wrapped in backticks.
    pub fn generate_markdown(&self) -> String {
        if self.comments.is_empty() {
            return String::new();
        }

        let header = format!("## Review Comments ({})\n\n", self.comments.len());

        let blocks: Vec<String> = self
            .comments
            .iter()
            .map(|comment| {
                let code_line = format_code_line(comment.code_line.as_deref());
                let body = wrap_path_tokens(comment.text.trim());
                if code_line.is_empty() {
                    format!(
                        "**{}** (Line {})\n\n> {}\n",
                        comment.file_path, comment.line_number, body
                    )
                } else {
                    format!(
                        "**{}** (Line {})\n{}\n\n> {}\n",
                        comment.file_path, comment.line_number, code_line, body
                    )
                }
            })
            .collect();

        header + &blocks.join("\n")
    }
}

fn format_code_line(line: Option<&str>) -> String {
    match line {
        None | Some("") => String::new(),
        Some(line) if line.contains('`') => format!("```\n{}\n```", line),
        Some(line) => format!("`{}`", line),
    }
}

/// Wraps path-like tokens (word characters separated by slashes or
/// backslashes, at least one separator) in backticks.
fn wrap_path_tokens(text: &str) -> String {
    static PATH_TOKEN: OnceLock<Regex> = OnceLock::new();
    let re = PATH_TOKEN.get_or_init(|| {
        Regex::new(r"([/\\]?[\w.\-]+(?:[/\\][\w.\-]+)+)").expect("path token regex")
    });
    re.replace_all(text, "`${1}`").into_owned()
}
