//! Agent profiles and their prompt pattern tables
//!
//! Agent UI prompts are data, not code. Each profile carries an ordered list
//! of patterns; the first pattern whose regex matches the tail of a worker's
//! captured output decides what the daemon does. Patterns without a response
//! are known prompts that need a human.
//!
//! Profiles ship built in and can be overridden or extended by `*.json`
//! files in the project's profiles directory.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use crate::{Error, Result};

const SCHEMA_FILE: &str = "schema.json";

/// One known prompt and the text that answers it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptPattern {
    pub name: String,
    pub regex: String,
    #[serde(default)]
    pub response: Option<String>,
}

impl PromptPattern {
    pub fn new<N: Into<String>, R: Into<String>>(name: N, regex: R) -> Self {
        Self {
            name: name.into(),
            regex: regex.into(),
            response: None,
        }
    }

    pub fn respond_with<S: Into<String>>(mut self, response: S) -> Self {
        self.response = Some(response.into());
        self
    }
}

/// How to launch an agent and recognise its prompts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentProfile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub launch_command: String,
    #[serde(default)]
    pub patterns: Vec<PromptPattern>,
}

impl AgentProfile {
    pub fn new<I: Into<String>, N: Into<String>, L: Into<String>>(
        id: I,
        name: N,
        launch_command: L,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            launch_command: launch_command.into(),
            patterns: Vec::new(),
        }
    }

    pub fn pattern(mut self, pattern: PromptPattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    /// Profiles compiled into the binary
    pub fn builtins() -> Vec<AgentProfile> {
        vec![
            AgentProfile::new("claude-code", "Claude Code", "claude")
                .pattern(
                    PromptPattern::new(
                        "permission_menu",
                        r"(?i)1\.\s*Yes[\s\S]*2\.\s*Yes,? and don'?t ask again",
                    )
                    .respond_with("1\n"),
                )
                .pattern(
                    PromptPattern::new(
                        "confirm_access",
                        r"(?i)(do you trust the files in this folder|confirm access)",
                    )
                    .respond_with("1\n"),
                )
                .pattern(
                    PromptPattern::new("yes_no", r"(?i)(\(y/n\)|\[y/n\])").respond_with("y\n"),
                )
                .pattern(PromptPattern::new(
                    "api_error",
                    r"(?i)(API Error|rate limit(ed)? exceeded)",
                )),
            AgentProfile::new("aider", "Aider", "aider")
                .pattern(
                    PromptPattern::new("add_file", r"(?i)Add .+ to the chat\?").respond_with("y\n"),
                )
                .pattern(
                    PromptPattern::new("yes_no", r"(?i)\(Y\)es/\(N\)o").respond_with("y\n"),
                ),
            AgentProfile::new("generic", "Generic agent", "")
                .pattern(
                    PromptPattern::new("yes_no", r"(?i)(\(y/n\)|\[y/n\]|continue\?)")
                        .respond_with("y\n"),
                )
                .pattern(
                    PromptPattern::new("press_enter", r"(?i)press enter to continue")
                        .respond_with("\n"),
                ),
        ]
    }
}

/// A pattern with its regex compiled
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub name: String,
    pub regex: Regex,
    pub response: Option<String>,
}

/// Ordered, compiled patterns of one profile
#[derive(Debug, Clone)]
pub struct PatternTable {
    profile_id: String,
    patterns: Vec<CompiledPattern>,
}

impl PatternTable {
    pub fn compile(profile: &AgentProfile) -> Result<Self> {
        let patterns = profile
            .patterns
            .iter()
            .map(|pattern| {
                let regex = Regex::new(&pattern.regex).map_err(|e| Error::InvalidPattern {
                    profile: profile.id.clone(),
                    pattern: pattern.name.clone(),
                    message: e.to_string(),
                })?;
                Ok(CompiledPattern {
                    name: pattern.name.clone(),
                    regex,
                    response: pattern.response.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            profile_id: profile.id.clone(),
            patterns,
        })
    }

    pub fn profile_id(&self) -> &str {
        &self.profile_id
    }

    /// First pattern matching `text`, in table order
    pub fn first_match(&self, text: &str) -> Option<&CompiledPattern> {
        self.patterns.iter().find(|p| p.regex.is_match(text))
    }

    /// First match within the last `window` lines of `output`
    pub fn match_tail(&self, output: &str, window: usize) -> Option<&CompiledPattern> {
        self.first_match(tail_lines(output, window))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Last `count` lines of `text`, ignoring trailing blank lines
pub fn tail_lines(text: &str, count: usize) -> &str {
    let trimmed = text.trim_end();
    if count == 0 {
        return "";
    }
    let mut seen = 0;
    for (index, byte) in trimmed.bytes().enumerate().rev() {
        if byte == b'\n' {
            seen += 1;
            if seen == count {
                return &trimmed[index + 1..];
            }
        }
    }
    trimmed
}

/// Known agent profiles, keyed by id
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, (AgentProfile, PatternTable)>,
}

impl ProfileRegistry {
    /// Registry holding only the built-in profiles
    pub fn builtin() -> Result<Self> {
        let mut registry = Self {
            profiles: BTreeMap::new(),
        };
        for profile in AgentProfile::builtins() {
            registry.insert(profile)?;
        }
        Ok(registry)
    }

    /// Built-ins overridden and extended by `*.json` profiles in `dir`
    ///
    /// A missing directory is not an error.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut registry = Self::builtin()?;
        if !dir.is_dir() {
            debug!("Profiles directory {} not found, using built-ins", dir.display());
            return Ok(registry);
        }

        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::validation(format!("Cannot read profiles directory {}: {}", dir.display(), e))
        })?;
        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter(|path| path.file_name().is_some_and(|name| name != SCHEMA_FILE))
            .collect();
        paths.sort();

        for path in paths {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                Error::validation(format!("Cannot read profile {}: {}", path.display(), e))
            })?;
            let profile: AgentProfile = serde_json::from_str(&content).map_err(|e| {
                Error::validation(format!("Invalid profile {}: {}", path.display(), e))
            })?;
            info!("Loaded agent profile '{}' from {}", profile.id, path.display());
            registry.insert(profile)?;
        }

        Ok(registry)
    }

    /// Add or replace a profile, compiling its patterns
    pub fn insert(&mut self, profile: AgentProfile) -> Result<()> {
        if profile.id.trim().is_empty() {
            return Err(Error::validation("Agent profile id cannot be empty"));
        }
        let table = PatternTable::compile(&profile)?;
        self.profiles.insert(profile.id.clone(), (profile, table));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<&AgentProfile> {
        self.profiles
            .get(id)
            .map(|(profile, _)| profile)
            .ok_or_else(|| Error::ProfileNotFound { id: id.to_string() })
    }

    pub fn patterns(&self, id: &str) -> Result<&PatternTable> {
        self.profiles
            .get(id)
            .map(|(_, table)| table)
            .ok_or_else(|| Error::ProfileNotFound { id: id.to_string() })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.profiles.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.profiles.keys()
    }
}
