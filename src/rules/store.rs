//! Rule file persistence

use super::{ConfigError, Rule, RuleDocument};
use crate::error::{Result, StoreError};
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// JSON rule file holding `{"rules": [...]}`
#[derive(Debug, Clone)]
pub struct RuleStore {
    path: PathBuf,
}

impl RuleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse and validate a rule document
    pub fn parse(json: &str) -> std::result::Result<Vec<Rule>, ConfigError> {
        let doc: RuleDocument = serde_json::from_str(json)?;
        doc.into_rules()
    }

    /// Load all rules in stored order
    pub fn load(&self) -> Result<Vec<Rule>> {
        let json = fs::read_to_string(&self.path).map_err(|source| StoreError::RuleFile {
            path: self.path.clone(),
            source,
        })?;
        let rules = Self::parse(&json)?;
        log::debug!("Loaded {} rules from {:?}", rules.len(), self.path);
        Ok(rules)
    }

    /// Like `load`, but a missing file is an empty rule set
    pub fn load_or_default(&self) -> Result<Vec<Rule>> {
        match fs::metadata(&self.path) {
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            _ => self.load(),
        }
    }

    /// Replace the whole rule set
    pub fn save(&self, rules: &[Rule]) -> Result<()> {
        let doc = RuleDocument::from_rules(rules);

        // four-space indentation, matching hand-edited rule files
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        doc.serialize(&mut ser).map_err(StoreError::from)?;
        buf.push(b'\n');

        let io_err = |source| StoreError::RuleFile {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        // write then rename so a crash never leaves a truncated rule file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &buf).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;

        log::info!("Saved {} rules to {:?}", rules.len(), self.path);
        Ok(())
    }

    /// Append one rule and persist; returns its index
    pub fn add_rule(&self, rule: Rule) -> Result<usize> {
        let mut rules = self.load_or_default()?;
        rules.push(rule);
        self.save(&rules)?;
        Ok(rules.len() - 1)
    }
}
