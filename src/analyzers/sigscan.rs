//! Signature-scanner analyzer.
//!
//! Scans sample bytes against a set of named byte patterns. The rule set is
//! a JSON array of `{name, pattern}` objects, loaded from a local file or
//! downloaded from a configured URI, optionally XZ-compressed. Rules are
//! (re)compiled on `reinitialize`, so a reload control event picks up new
//! rule files without a restart.

use std::io::Read;

use async_trait::async_trait;
use parking_lot::RwLock;
use regex::bytes::Regex;
use serde::Deserialize;
use serde_json::json;

use crate::analyzers::{Analysis, Analyzer, FileSample};
use crate::error::{AppError, Result};

/// Maximum number of match locations reported per rule.
const MAX_MATCHES_PER_RULE: usize = 8;

/// Where the rule set comes from.
#[derive(Debug, Clone)]
pub struct RuleSource {
    /// Path of a local rule file; takes precedence over the URI.
    pub file: Option<std::path::PathBuf>,
    /// Download URL used when no local file is configured.
    pub uri: String,
    /// Whether the rule data is XZ-compressed.
    pub xz: bool,
}

#[derive(Debug, Deserialize)]
struct RuleSpec {
    name: String,
    pattern: String,
}

struct CompiledRule {
    name: String,
    pattern: Regex,
}

/// Byte-pattern analyzer over the configured rule set.
pub struct SignatureScanner {
    source: RuleSource,
    rules: RwLock<Vec<CompiledRule>>,
}

impl SignatureScanner {
    pub fn new(source: RuleSource) -> Self {
        Self {
            source,
            rules: RwLock::new(Vec::new()),
        }
    }

    async fn fetch_rule_data(&self) -> Result<Vec<u8>> {
        match &self.source.file {
            Some(path) => {
                tracing::info!(path = %path.display(), "loading rule file");
                Ok(tokio::fs::read(path).await?)
            }
            None => {
                tracing::debug!(uri = %self.source.uri, "retrieving rule file via HTTP");
                let response = reqwest::get(&self.source.uri).await?.error_for_status()?;
                Ok(response.bytes().await?.to_vec())
            }
        }
    }

    fn compile(&self, data: &[u8]) -> Result<Vec<CompiledRule>> {
        let data = if self.source.xz {
            let mut decoded = Vec::new();
            xz2::read::XzDecoder::new(data).read_to_end(&mut decoded)?;
            decoded
        } else {
            data.to_vec()
        };
        let specs: Vec<RuleSpec> = serde_json::from_slice(&data)?;
        let mut rules = Vec::with_capacity(specs.len());
        for spec in specs {
            rules.push(CompiledRule {
                pattern: Regex::new(&spec.pattern)?,
                name: spec.name,
            });
        }
        Ok(rules)
    }
}

#[async_trait]
impl Analyzer for SignatureScanner {
    fn name(&self) -> &str {
        "sigscan"
    }

    async fn reinitialize(&self) -> Result<()> {
        let data = self.fetch_rule_data().await?;
        let rules = self.compile(&data)?;
        if rules.is_empty() {
            return Err(AppError::Analyzer("rule set is empty".into()));
        }
        tracing::info!(count = rules.len(), "loaded rules");
        *self.rules.write() = rules;
        Ok(())
    }

    async fn process_file(&self, sample: FileSample<'_>) -> Result<Analysis> {
        let mut handle = sample.file;
        let mut contents = Vec::with_capacity(sample.metadata.len() as usize);
        handle.read_to_end(&mut contents)?;

        let rules = self.rules.read();
        let mut matched_rules = Vec::new();
        let mut rule_details = serde_json::Map::new();
        for rule in rules.iter() {
            let locations: Vec<_> = rule
                .pattern
                .find_iter(&contents)
                .take(MAX_MATCHES_PER_RULE)
                .map(|m| {
                    json!({
                        "offset": m.start(),
                        "data": String::from_utf8_lossy(m.as_bytes()),
                    })
                })
                .collect();
            if !locations.is_empty() {
                matched_rules.push(rule.name.clone());
                rule_details.insert(rule.name.clone(), json!(locations));
            }
        }

        if matched_rules.is_empty() {
            tracing::debug!(path = %sample.path.display(), "processed file");
            return Ok(Analysis::default());
        }
        tracing::warn!(path = %sample.path.display(), rules = ?matched_rules, "matches found");
        Ok(Analysis {
            reason: Some(json!({
                "MatchedRules": matched_rules,
                "RuleDetails": rule_details,
            })),
            suspicious: true,
        })
    }
}
