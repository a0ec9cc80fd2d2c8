use std::fmt;

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use thiserror::Error;

pub mod flags;
pub mod response;

pub use flags::{extract_flags, FlagExtractor};
pub use response::ResponseView;

// Body keywords that mark a rejected login unless overridden.
pub const DEFAULT_FAIL_KEYWORDS: [&str; 8] = [
    "错误",
    "失败",
    "error",
    "invalid",
    "incorrect",
    "wrong",
    "denied",
    "bad",
];

pub const SMART_MIN_DELTA: f64 = 50.0;
pub const SMART_RATIO: f64 = 0.1;

#[derive(Debug, Error)]
pub enum CriteriaError {
    #[error("invalid success regex {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid flag prefix {prefix:?}: {message}")]
    InvalidFlagPrefix { prefix: String, message: String },
}

#[derive(Clone, Debug)]
pub struct CriteriaConfig {
    pub fail_keywords: Vec<String>,
    pub success_keywords: Vec<String>,
    pub success_regex: Option<String>,
    pub success_length: Option<usize>,
    pub success_length_not: Option<usize>,
    pub success_status: Option<u16>,
    pub smart_mode: bool,
}

impl Default for CriteriaConfig {
    fn default() -> Self {
        Self {
            fail_keywords: DEFAULT_FAIL_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            success_keywords: Vec::new(),
            success_regex: None,
            success_length: None,
            success_length_not: None,
            success_status: None,
            smart_mode: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum MatchReason {
    SuccessKeyword { keyword: String },
    Regex { pattern: String },
    Length { length: usize },
    LengthNot { expected: usize, length: usize },
    Status { status: u16 },
    Baseline { baseline: usize, length: usize },
}

impl fmt::Display for MatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SuccessKeyword { keyword } => write!(f, "keyword {keyword:?}"),
            Self::Regex { pattern } => write!(f, "regex /{pattern}/"),
            Self::Length { length } => write!(f, "length == {length}"),
            Self::LengthNot { expected, length } => write!(f, "length {length} != {expected}"),
            Self::Status { status } => write!(f, "status {status}"),
            Self::Baseline { baseline, length } => {
                write!(f, "length {length} deviates from baseline {baseline}")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Success(MatchReason),
    Failure,
}

impl Verdict {
    pub fn is_success(&self) -> bool {
        matches!(self, Verdict::Success(_))
    }
}

#[derive(Clone, Debug)]
pub struct SuccessCriteria {
    fail_keywords: Vec<String>,
    success_keywords: Vec<String>,
    success_regex: Option<Regex>,
    success_length: Option<usize>,
    success_length_not: Option<usize>,
    success_status: Option<u16>,
    smart_mode: bool,
}

impl SuccessCriteria {
    pub fn new(config: CriteriaConfig) -> Result<Self, CriteriaError> {
        let success_regex = match config.success_regex.as_deref() {
            Some(pattern) if !pattern.is_empty() => Some(
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| CriteriaError::InvalidRegex {
                        pattern: pattern.to_string(),
                        source,
                    })?,
            ),
            _ => None,
        };

        Ok(Self {
            fail_keywords: lowercase_keywords(config.fail_keywords),
            success_keywords: lowercase_keywords(config.success_keywords),
            success_regex,
            success_length: config.success_length,
            success_length_not: config.success_length_not,
            success_status: config.success_status,
            smart_mode: config.smart_mode,
        })
    }

    pub fn smart_mode(&self) -> bool {
        self.smart_mode
    }

    /// First matching rule wins; a fail keyword short-circuits everything else.
    pub fn classify(
        &self,
        text: &str,
        length: usize,
        status: u16,
        baseline: Option<usize>,
    ) -> Verdict {
        let lowered = text.to_lowercase();

        if self.fail_keywords.iter().any(|kw| lowered.contains(kw.as_str())) {
            return Verdict::Failure;
        }

        if let Some(kw) = self
            .success_keywords
            .iter()
            .find(|kw| lowered.contains(kw.as_str()))
        {
            return Verdict::Success(MatchReason::SuccessKeyword {
                keyword: kw.clone(),
            });
        }

        if let Some(re) = self.success_regex.as_ref() {
            if re.is_match(text) {
                return Verdict::Success(MatchReason::Regex {
                    pattern: re.as_str().to_string(),
                });
            }
        }

        if self.success_length == Some(length) {
            return Verdict::Success(MatchReason::Length { length });
        }

        if let Some(expected) = self.success_length_not {
            if length != expected {
                return Verdict::Success(MatchReason::LengthNot { expected, length });
            }
        }

        if self.success_status == Some(status) {
            return Verdict::Success(MatchReason::Status { status });
        }

        if self.smart_mode {
            if let Some(baseline) = baseline {
                if deviates_from_baseline(length, baseline) {
                    return Verdict::Success(MatchReason::Baseline { baseline, length });
                }
            }
        }

        Verdict::Failure
    }
}

pub fn smart_threshold(baseline: usize) -> f64 {
    SMART_MIN_DELTA.max(baseline as f64 * SMART_RATIO)
}

pub fn deviates_from_baseline(length: usize, baseline: usize) -> bool {
    (length.abs_diff(baseline) as f64) > smart_threshold(baseline)
}

// an empty keyword would match every response
fn lowercase_keywords(keywords: Vec<String>) -> Vec<String> {
    keywords
        .into_iter()
        .filter(|kw| !kw.is_empty())
        .map(|kw| kw.to_lowercase())
        .collect()
}
