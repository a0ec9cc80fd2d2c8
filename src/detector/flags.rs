use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};

use super::CriteriaError;

pub const BUILTIN_PREFIXES: [&str; 4] = ["flag", "ctf", "nssctf", "hgame"];

static BUILTIN: OnceLock<Option<FlagExtractor>> = OnceLock::new();

/// Finds `prefix{...}` markers. Matching is case-insensitive and stops at the first `}`.
///
/// Each prefix is scanned on its own, so `NSSCTF{x}` also reports `CTF{x}`.
#[derive(Clone, Debug)]
pub struct FlagExtractor {
    patterns: Vec<Regex>,
}

impl FlagExtractor {
    pub fn new<S: AsRef<str>>(extra_prefixes: &[S]) -> Result<Self, CriteriaError> {
        let mut prefixes: Vec<String> = BUILTIN_PREFIXES.iter().map(|p| p.to_string()).collect();
        for raw in extra_prefixes {
            let prefix = raw.as_ref().trim();
            if prefix.is_empty() {
                continue;
            }
            if prefix.contains(|c: char| c == '{' || c == '}') {
                return Err(CriteriaError::InvalidFlagPrefix {
                    prefix: prefix.to_string(),
                    message: "braces are added automatically".to_string(),
                });
            }
            if !prefixes.iter().any(|p| p.eq_ignore_ascii_case(prefix)) {
                prefixes.push(prefix.to_string());
            }
        }
        Self::from_prefixes(&prefixes)
    }

    fn from_prefixes(prefixes: &[String]) -> Result<Self, CriteriaError> {
        let patterns = prefixes
            .iter()
            .map(|prefix| {
                let source = format!(r"{}\{{[^}}]+\}}", regex::escape(prefix));
                RegexBuilder::new(&source)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| CriteriaError::InvalidFlagPrefix {
                        prefix: prefix.clone(),
                        message: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn extract(&self, text: &str) -> BTreeSet<String> {
        self.patterns
            .iter()
            .flat_map(|pattern| pattern.find_iter(text))
            .map(|m| m.as_str().to_string())
            .collect()
    }
}

pub fn extract_flags(text: &str) -> BTreeSet<String> {
    BUILTIN
        .get_or_init(|| {
            let prefixes: Vec<String> = BUILTIN_PREFIXES.iter().map(|p| p.to_string()).collect();
            FlagExtractor::from_prefixes(&prefixes).ok()
        })
        .as_ref()
        .map(|extractor| extractor.extract(text))
        .unwrap_or_default()
}
