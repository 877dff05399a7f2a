//! Rule engine mapping filenames to encoding profiles and output paths.

use crate::config::{PatternType, RuleConfig};
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Error type for rule compilation
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Invalid {pattern_type} pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        pattern_type: PatternType,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone)]
enum Matcher {
    Exact(String),
    Pattern(Regex),
    /// Pattern failed to compile; the rule never matches
    Never,
}

/// Convert a shell glob into an anchored regex.
///
/// `*` matches any run of characters, `?` exactly one, everything else is literal.
pub fn glob_to_regex(glob: &str) -> String {
    let escaped = regex::escape(glob)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");
    format!("^{}$", escaped)
}

fn compile(pattern: &str, pattern_type: PatternType) -> Result<Matcher, RuleError> {
    let source = match pattern_type {
        PatternType::Exact => return Ok(Matcher::Exact(pattern.to_string())),
        PatternType::Glob => glob_to_regex(pattern),
        PatternType::Regex => format!("^(?:{})", pattern),
    };
    Regex::new(&source)
        .map(Matcher::Pattern)
        .map_err(|source| RuleError::InvalidPattern {
            pattern: pattern.to_string(),
            pattern_type,
            source,
        })
}

/// A pattern → profile mapping with priority and output template.
#[derive(Debug, Clone, Serialize)]
pub struct Rule {
    pub pattern: String,
    pub pattern_type: PatternType,
    pub profile: String,
    pub output_pattern: String,
    pub priority: i64,
    pub delete_input: bool,
    #[serde(skip)]
    matcher: Matcher,
}

impl Rule {
    /// Compile a rule. Malformed patterns are an error.
    pub fn try_new(config: &RuleConfig) -> Result<Self, RuleError> {
        let matcher = compile(&config.pattern, config.pattern_type)?;
        Ok(Self::with_matcher(config, matcher))
    }

    /// Compile a rule, logging a malformed pattern and keeping the rule as never-matching.
    pub fn from_config(config: &RuleConfig) -> Self {
        match compile(&config.pattern, config.pattern_type) {
            Ok(matcher) => Self::with_matcher(config, matcher),
            Err(e) => {
                warn!(profile = %config.profile, "{}; rule will never match", e);
                Self::with_matcher(config, Matcher::Never)
            }
        }
    }

    fn with_matcher(config: &RuleConfig, matcher: Matcher) -> Self {
        Self {
            pattern: config.pattern.clone(),
            pattern_type: config.pattern_type,
            profile: config.profile.clone(),
            output_pattern: config.output_pattern.clone(),
            priority: config.priority,
            delete_input: config.delete_input,
            matcher,
        }
    }

    /// Whether the pattern compiled.
    pub fn is_valid(&self) -> bool {
        !matches!(self.matcher, Matcher::Never)
    }

    /// Check a bare filename (no directory) against this rule.
    pub fn matches(&self, filename: &str) -> bool {
        match &self.matcher {
            Matcher::Exact(name) => name == filename,
            Matcher::Pattern(re) => re.is_match(filename),
            Matcher::Never => false,
        }
    }

    /// Render the output template for `input` under `output_dir`.
    ///
    /// Templates may contain subdirectories; the caller creates them.
    pub fn output_path(&self, input: &Path, output_dir: &Path) -> PathBuf {
        let filename = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = input
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let rendered = self
            .output_pattern
            .replace("{filename_no_ext}", &stem)
            .replace("{stem}", &stem)
            .replace("{filename}", &filename);

        output_dir.join(rendered)
    }
}

/// Rules kept in descending priority order; equal priorities keep insertion order.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        let mut set = Self { rules };
        set.sort();
        set
    }

    pub fn from_configs(configs: &[RuleConfig]) -> Self {
        Self::new(configs.iter().map(Rule::from_config).collect())
    }

    /// Append a rule and re-sort.
    pub fn add(&mut self, rule: Rule) {
        self.rules.push(rule);
        self.sort();
    }

    fn sort(&mut self) {
        // sort_by_key is stable, so ties stay in insertion order
        self.rules.sort_by_key(|r| std::cmp::Reverse(r.priority));
    }

    /// First rule, in priority order, matching the bare filename.
    pub fn match_filename(&self, filename: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.matches(filename))
    }

    /// Output path for `input` using the first matching rule.
    pub fn resolve_output(&self, input: &Path, output_dir: &Path) -> Option<PathBuf> {
        let filename = input.file_name()?.to_str()?;
        self.match_filename(filename)
            .map(|rule| rule.output_path(input, output_dir))
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
