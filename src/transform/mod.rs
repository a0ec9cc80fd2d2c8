use std::fmt;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Serialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const MAX_REPEAT: usize = 1024;
pub const MAX_PAD_WIDTH: usize = 4096;
// upper bound on what a repeat or pad step may produce
pub const MAX_OUTPUT_LEN: usize = 1 << 20;

/// Failure of a single step on a single value. The candidate is dropped, the run goes on.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("invalid base64 input: {message}")]
    InvalidBase64 { message: String },

    #[error("decoded bytes are not valid UTF-8")]
    InvalidUtf8,

    #[error("custom transform '{name}' failed: {message}")]
    Custom { name: String, message: String },

    #[error("output would exceed 1 MiB")]
    TooLong,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransformSpecError {
    #[error("empty transform spec")]
    Empty,

    #[error("unknown transform '{name}'")]
    Unknown { name: String },

    #[error("transform '{name}' requires {expected}")]
    MissingParameter {
        name: String,
        expected: &'static str,
    },

    #[error("invalid parameter for '{name}': {message}")]
    InvalidParameter { name: String, message: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepKind {
    Affix,
    Codec,
    Hash,
    Case,
    Edit,
    Pad,
    Custom,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Affix => "affix",
            StepKind::Codec => "codec",
            StepKind::Hash => "hash",
            StepKind::Case => "case",
            StepKind::Edit => "edit",
            StepKind::Pad => "pad",
            StepKind::Custom => "custom",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Codec {
    Base64Encode,
    Base64Decode,
    UrlEncode,
    UrlEncodeAll,
    UrlDecode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashAlgorithm {
    Md5,
    /// Characters 8..24 of the MD5 hex digest, the "16 digit" MD5 found in a lot of PHP code.
    Md5Middle16,
    Sha1,
    Sha256,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaseFold {
    Upper,
    Lower,
}

pub type CustomFn = dyn Fn(&str) -> Result<String, String> + Send + Sync;

/// Escape hatch for bespoke logic. The function must be pure: the same input
/// always yields the same output, since one pipeline serves every candidate of a slot.
#[derive(Clone)]
pub struct CustomTransform {
    name: String,
    func: Arc<CustomFn>,
}

impl CustomTransform {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&str) -> Result<String, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for CustomTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomTransform")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub enum TransformStep {
    Prefix(String),
    Suffix(String),
    Codec(Codec),
    Hash(HashAlgorithm),
    Case(CaseFold),
    Reverse,
    Repeat(usize),
    Replace { from: String, to: String },
    /// Character slice `[start, end)` with negative indices counting from the end.
    Substring { start: isize, end: Option<isize> },
    PadLeft { width: usize, fill: char },
    PadRight { width: usize, fill: char },
    Custom(CustomTransform),
}

impl TransformStep {
    pub fn prefix(text: impl Into<String>) -> Self {
        TransformStep::Prefix(text.into())
    }

    pub fn suffix(text: impl Into<String>) -> Self {
        TransformStep::Suffix(text.into())
    }

    pub fn zero_pad(width: usize) -> Self {
        TransformStep::PadLeft { width, fill: '0' }
    }

    pub fn custom<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&str) -> Result<String, String> + Send + Sync + 'static,
    {
        TransformStep::Custom(CustomTransform::new(name, func))
    }

    pub fn kind(&self) -> StepKind {
        match self {
            TransformStep::Prefix(_) | TransformStep::Suffix(_) => StepKind::Affix,
            TransformStep::Codec(_) => StepKind::Codec,
            TransformStep::Hash(_) => StepKind::Hash,
            TransformStep::Case(_) => StepKind::Case,
            TransformStep::Reverse
            | TransformStep::Repeat(_)
            | TransformStep::Replace { .. }
            | TransformStep::Substring { .. } => StepKind::Edit,
            TransformStep::PadLeft { .. } | TransformStep::PadRight { .. } => StepKind::Pad,
            TransformStep::Custom(_) => StepKind::Custom,
        }
    }

    pub fn apply(&self, input: &str) -> Result<String, TransformError> {
        let out = match self {
            TransformStep::Prefix(text) => format!("{text}{input}"),
            TransformStep::Suffix(text) => format!("{input}{text}"),
            TransformStep::Codec(codec) => return apply_codec(*codec, input),
            TransformStep::Hash(algorithm) => hash_hex(*algorithm, input),
            TransformStep::Case(CaseFold::Upper) => input.to_uppercase(),
            TransformStep::Case(CaseFold::Lower) => input.to_lowercase(),
            TransformStep::Reverse => input.chars().rev().collect(),
            TransformStep::Repeat(count) => match input.len().checked_mul(*count) {
                Some(len) if len <= MAX_OUTPUT_LEN => input.repeat(*count),
                _ => return Err(TransformError::TooLong),
            },
            TransformStep::Replace { from, to } => input.replace(from.as_str(), to),
            TransformStep::Substring { start, end } => slice_chars(input, *start, *end),
            TransformStep::PadLeft { width, .. } | TransformStep::PadRight { width, .. }
                if *width > MAX_OUTPUT_LEN =>
            {
                return Err(TransformError::TooLong)
            }
            TransformStep::PadLeft { width, fill } => {
                if *fill == '0' {
                    zero_fill(input, *width)
                } else {
                    pad_left(input, *width, *fill)
                }
            }
            TransformStep::PadRight { width, fill } => pad_right(input, *width, *fill),
            TransformStep::Custom(custom) => {
                return (custom.func)(input).map_err(|message| TransformError::Custom {
                    name: custom.name.clone(),
                    message,
                })
            }
        };
        Ok(out)
    }
}

impl fmt::Display for TransformStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformStep::Prefix(text) => write!(f, "prefix({text:?})"),
            TransformStep::Suffix(text) => write!(f, "suffix({text:?})"),
            TransformStep::Codec(Codec::Base64Encode) => write!(f, "base64"),
            TransformStep::Codec(Codec::Base64Decode) => write!(f, "base64-decode"),
            TransformStep::Codec(Codec::UrlEncode) => write!(f, "urlencode"),
            TransformStep::Codec(Codec::UrlEncodeAll) => write!(f, "urlencode-all"),
            TransformStep::Codec(Codec::UrlDecode) => write!(f, "urldecode"),
            TransformStep::Hash(HashAlgorithm::Md5) => write!(f, "md5"),
            TransformStep::Hash(HashAlgorithm::Md5Middle16) => write!(f, "md5-16"),
            TransformStep::Hash(HashAlgorithm::Sha1) => write!(f, "sha1"),
            TransformStep::Hash(HashAlgorithm::Sha256) => write!(f, "sha256"),
            TransformStep::Case(CaseFold::Upper) => write!(f, "upper"),
            TransformStep::Case(CaseFold::Lower) => write!(f, "lower"),
            TransformStep::Reverse => write!(f, "reverse"),
            TransformStep::Repeat(count) => write!(f, "repeat({count})"),
            TransformStep::Replace { from, to } => write!(f, "replace({from:?} -> {to:?})"),
            TransformStep::Substring { start, end } => match end {
                Some(end) => write!(f, "substring({start}:{end})"),
                None => write!(f, "substring({start}:)"),
            },
            TransformStep::PadLeft { width, fill: '0' } => write!(f, "zfill({width})"),
            TransformStep::PadLeft { width, fill } => write!(f, "pad-left({width}, {fill:?})"),
            TransformStep::PadRight { width, fill } => write!(f, "pad-right({width}, {fill:?})"),
            TransformStep::Custom(custom) => write!(f, "custom({})", custom.name),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub original: String,
    pub processed: String,
}

#[derive(Clone, Debug, Default)]
pub struct Pipeline {
    steps: Vec<TransformStep>,
}

impl Pipeline {
    pub fn new(steps: Vec<TransformStep>) -> Self {
        Self { steps }
    }

    /// Parses a list of textual step specs such as `["prefix=admin:", "base64"]`.
    pub fn parse_list<S: AsRef<str>>(specs: &[S]) -> Result<Self, TransformSpecError> {
        let steps = specs
            .iter()
            .map(|s| parse_step(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { steps })
    }

    pub fn with_step(mut self, step: TransformStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(&self) -> &[TransformStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn apply(&self, raw: &str) -> Result<String, TransformError> {
        let mut value = raw.to_string();
        for step in self.steps.iter() {
            value = step.apply(&value)?;
        }
        Ok(value)
    }

    pub fn candidate(&self, raw: &str) -> Result<Candidate, TransformError> {
        Ok(Candidate {
            original: raw.to_string(),
            processed: self.apply(raw)?,
        })
    }

    pub fn describe(&self) -> String {
        if self.steps.is_empty() {
            return "none".to_string();
        }
        self.steps
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

pub fn parse_step(spec: &str) -> Result<TransformStep, TransformSpecError> {
    let trimmed = spec.trim_start();
    if trimmed.trim().is_empty() {
        return Err(TransformSpecError::Empty);
    }
    // affix and replace values keep their whitespace
    let (name, value) = match trimmed.split_once('=') {
        Some((k, v)) => (k.trim().to_ascii_lowercase().replace('_', "-"), Some(v)),
        None => (trimmed.trim().to_ascii_lowercase().replace('_', "-"), None),
    };

    let require = |expected: &'static str| {
        value.ok_or_else(|| TransformSpecError::MissingParameter {
            name: name.clone(),
            expected,
        })
    };
    let invalid = |message: String| TransformSpecError::InvalidParameter {
        name: name.clone(),
        message,
    };

    let step = match name.as_str() {
        "prefix" => TransformStep::Prefix(require("prefix=<TEXT>")?.to_string()),
        "suffix" => TransformStep::Suffix(require("suffix=<TEXT>")?.to_string()),
        "base64" | "b64" | "base64-encode" => TransformStep::Codec(Codec::Base64Encode),
        "base64-decode" | "b64d" => TransformStep::Codec(Codec::Base64Decode),
        "urlencode" | "url" => TransformStep::Codec(Codec::UrlEncode),
        "urlencode-all" | "url-all" => TransformStep::Codec(Codec::UrlEncodeAll),
        "urldecode" | "url-decode" => TransformStep::Codec(Codec::UrlDecode),
        "md5" => TransformStep::Hash(HashAlgorithm::Md5),
        "md5-16" => TransformStep::Hash(HashAlgorithm::Md5Middle16),
        "sha1" => TransformStep::Hash(HashAlgorithm::Sha1),
        "sha256" => TransformStep::Hash(HashAlgorithm::Sha256),
        "upper" => TransformStep::Case(CaseFold::Upper),
        "lower" => TransformStep::Case(CaseFold::Lower),
        "reverse" | "rev" => TransformStep::Reverse,
        "repeat" => {
            let raw = require("repeat=<N>")?;
            let count = raw
                .trim()
                .parse::<usize>()
                .map_err(|_| invalid(format!("expected a count, got '{raw}'")))?;
            if count > MAX_REPEAT {
                return Err(invalid(format!("count {count} exceeds {MAX_REPEAT}")));
            }
            TransformStep::Repeat(count)
        }
        "replace" => {
            let raw = require("replace=<FROM:TO>")?;
            let (from, to) = raw
                .split_once(':')
                .ok_or_else(|| invalid("expected FROM:TO".to_string()))?;
            if from.is_empty() {
                return Err(invalid("FROM cannot be empty".to_string()));
            }
            TransformStep::Replace {
                from: from.to_string(),
                to: to.to_string(),
            }
        }
        "substring" | "substr" | "slice" => {
            let raw = require("substring=<START[:END]>")?;
            let parse_index = |s: &str| {
                s.trim()
                    .parse::<isize>()
                    .map_err(|_| invalid(format!("invalid index '{s}'")))
            };
            match raw.split_once(':') {
                Some((start, end)) => {
                    let start = if start.trim().is_empty() {
                        0
                    } else {
                        parse_index(start)?
                    };
                    let end = if end.trim().is_empty() {
                        None
                    } else {
                        Some(parse_index(end)?)
                    };
                    TransformStep::Substring { start, end }
                }
                None => TransformStep::Substring {
                    start: parse_index(raw)?,
                    end: None,
                },
            }
        }
        "zfill" | "zero-pad" => {
            let raw = require("zfill=<WIDTH>")?;
            TransformStep::zero_pad(parse_width(raw).map_err(invalid)?)
        }
        "pad-left" | "lpad" => {
            let (width, fill) =
                parse_pad(require("pad-left=<WIDTH[:CHAR]>")?, '0').map_err(invalid)?;
            TransformStep::PadLeft { width, fill }
        }
        "pad-right" | "rpad" => {
            let (width, fill) =
                parse_pad(require("pad-right=<WIDTH[:CHAR]>")?, ' ').map_err(invalid)?;
            TransformStep::PadRight { width, fill }
        }
        other => {
            return Err(TransformSpecError::Unknown {
                name: other.to_string(),
            })
        }
    };
    Ok(step)
}

fn parse_width(raw: &str) -> Result<usize, String> {
    let width = raw
        .trim()
        .parse::<usize>()
        .map_err(|_| format!("expected a width, got '{raw}'"))?;
    if width > MAX_PAD_WIDTH {
        return Err(format!("width {width} exceeds {MAX_PAD_WIDTH}"));
    }
    Ok(width)
}

fn parse_pad(raw: &str, default_fill: char) -> Result<(usize, char), String> {
    let (width_raw, fill_raw) = match raw.split_once(':') {
        Some((w, f)) => (w, Some(f)),
        None => (raw, None),
    };
    let width = parse_width(width_raw)?;
    let fill = match fill_raw {
        None | Some("") => default_fill,
        Some(f) => {
            let mut chars = f.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => return Err(format!("fill must be a single character, got '{f}'")),
            }
        }
    };
    Ok((width, fill))
}

fn apply_codec(codec: Codec, input: &str) -> Result<String, TransformError> {
    match codec {
        Codec::Base64Encode => Ok(STANDARD.encode(input.as_bytes())),
        Codec::Base64Decode => {
            let bytes = STANDARD
                .decode(input.trim().as_bytes())
                .map_err(|e| TransformError::InvalidBase64 {
                    message: e.to_string(),
                })?;
            String::from_utf8(bytes).map_err(|_| TransformError::InvalidUtf8)
        }
        Codec::UrlEncode => Ok(percent_encode(input, b"/")),
        Codec::UrlEncodeAll => Ok(percent_encode(input, b"")),
        Codec::UrlDecode => Ok(percent_decode(input)),
    }
}

fn hash_hex(algorithm: HashAlgorithm, input: &str) -> String {
    match algorithm {
        HashAlgorithm::Md5 => format!("{:x}", md5::compute(input.as_bytes())),
        HashAlgorithm::Md5Middle16 => {
            let full = format!("{:x}", md5::compute(input.as_bytes()));
            full[8..24].to_string()
        }
        HashAlgorithm::Sha1 => format!("{:x}", Sha1::digest(input.as_bytes())),
        HashAlgorithm::Sha256 => format!("{:x}", Sha256::digest(input.as_bytes())),
    }
}

fn percent_encode(input: &str, safe: &[u8]) -> String {
    let mut out = String::with_capacity(input.len() * 3);
    for b in input.as_bytes() {
        match *b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(*b as char)
            }
            other if safe.contains(&other) => out.push(other as char),
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

fn percent_decode(input: &str) -> String {
    fn hex_val(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }

    let bytes = input.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn resolve_index(index: isize, len: usize) -> usize {
    if index < 0 {
        len.saturating_sub(index.unsigned_abs())
    } else {
        (index as usize).min(len)
    }
}

fn slice_chars(input: &str, start: isize, end: Option<isize>) -> String {
    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();
    let from = resolve_index(start, len);
    let to = end.map(|e| resolve_index(e, len)).unwrap_or(len);
    if from >= to {
        return String::new();
    }
    chars[from..to].iter().collect()
}

fn zero_fill(input: &str, width: usize) -> String {
    let len = input.chars().count();
    if len >= width {
        return input.to_string();
    }
    let padding = "0".repeat(width - len);
    match input.chars().next() {
        Some(sign @ ('+' | '-')) => format!("{sign}{padding}{}", &input[1..]),
        _ => format!("{padding}{input}"),
    }
}

fn pad_left(input: &str, width: usize, fill: char) -> String {
    let len = input.chars().count();
    if len >= width {
        return input.to_string();
    }
    let mut out: String = std::iter::repeat(fill).take(width - len).collect();
    out.push_str(input);
    out
}

fn pad_right(input: &str, width: usize, fill: char) -> String {
    let len = input.chars().count();
    let mut out = input.to_string();
    if len < width {
        out.extend(std::iter::repeat(fill).take(width - len));
    }
    out
}
