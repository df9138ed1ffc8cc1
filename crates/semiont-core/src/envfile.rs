//! Minimal `.env` file editing that keeps comments and ordering intact.

use crate::error::{Result, SemiontError};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
enum Line {
    Entry { key: String, value: String },
    Other(String),
}

#[derive(Debug, Clone)]
pub struct EnvFile {
    path: PathBuf,
    lines: Vec<Line>,
}

impl EnvFile {
    /// Load `path`. A missing file is an empty env file.
    pub fn load(path: &Path) -> Result<Self> {
        let mut lines = Vec::new();
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            for (i, raw) in content.lines().enumerate() {
                lines.push(parse_line(i + 1, raw)?);
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
            lines,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().rev().find_map(|l| match l {
            Line::Entry { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Set `key`, replacing an existing entry in place or appending.
    pub fn set(&mut self, key: &str, value: &str) {
        for line in &mut self.lines {
            if let Line::Entry { key: k, value: v } = line {
                if k == key {
                    *v = value.to_string();
                    return;
                }
            }
        }
        self.lines.push(Line::Entry {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    /// Remove every entry for `key`. Returns true if any existed.
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.lines.len();
        self.lines
            .retain(|l| !matches!(l, Line::Entry { key: k, .. } if k == key));
        before != self.lines.len()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .lines
            .iter()
            .filter_map(|l| match l {
                Line::Entry { key, .. } => Some(key.clone()),
                Line::Other(_) => None,
            })
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Entry { key, value } => {
                    out.push_str(key);
                    out.push('=');
                    out.push_str(&quote(value));
                }
                Line::Other(text) => out.push_str(text),
            }
            out.push('\n');
        }
        out
    }

    pub fn save(&self) -> Result<()> {
        crate::io::atomic_write(&self.path, self.render().as_bytes())
    }
}

fn parse_line(line_no: usize, raw: &str) -> Result<Line> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(Line::Other(raw.to_string()));
    }
    let body = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    let Some((key, value)) = body.split_once('=') else {
        return Err(SemiontError::InvalidEnvLine {
            line: line_no,
            content: raw.to_string(),
        });
    };
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(SemiontError::InvalidEnvLine {
            line: line_no,
            content: raw.to_string(),
        });
    }
    Ok(Line::Entry {
        key: key.to_string(),
        value: unquote(value.trim()),
    })
}

fn unquote(value: &str) -> String {
    for q in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(q) && value.ends_with(q) {
            let inner = &value[1..value.len() - 1];
            return if q == '"' {
                inner.replace("\\\"", "\"").replace("\\n", "\n")
            } else {
                inner.to_string()
            };
        }
    }
    value.to_string()
}

fn quote(value: &str) -> String {
    if value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '#' || c == '"' || c == '\'')
    {
        format!(
            "\"{}\"",
            value.replace('"', "\\\"").replace('\n', "\\n")
        )
    } else {
        value.to_string()
    }
}
