use std::collections::HashSet;
use std::iter::FusedIterator;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

use itertools::structs::MultiProduct;
use itertools::Itertools;
use serde::ser::{Serialize, SerializeMap, Serializer};
use thiserror::Error;

use crate::transform::{Candidate, Pipeline};

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("dictionary file for slot {slot} not found: {path}")]
    DictionaryMissing { slot: String, path: String },

    #[error("failed to read dictionary for slot {slot}: {path}: {source}")]
    DictionaryRead {
        slot: String,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid range step {step} for slot {slot}, expected a positive integer")]
    InvalidStep { slot: String, step: i64 },

    #[error("invalid range format '{format}': {message}")]
    InvalidFormat { format: String, message: String },

    #[error("slot {name} is defined more than once")]
    DuplicateSlot { name: String },

    #[error("slot names must be non-empty and must not contain braces")]
    InvalidSlotName,

    #[error("payload space is too large to count")]
    Overflow,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Radix {
    Decimal,
    LowerHex,
    UpperHex,
}

/// A `str.format`-like template with at most one integer placeholder:
/// `{}`, `{:04}`, `{:04d}`, `{:6}`, `{:x}`, `{:08X}`. `{{` and `}}` are literal braces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeFormat {
    prefix: String,
    suffix: String,
    has_placeholder: bool,
    zero: bool,
    width: usize,
    radix: Radix,
}

impl Default for RangeFormat {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            suffix: String::new(),
            has_placeholder: true,
            zero: false,
            width: 0,
            radix: Radix::Decimal,
        }
    }
}

impl RangeFormat {
    pub fn parse(template: &str) -> Result<Self, GeneratorError> {
        let fail = |message: &str| GeneratorError::InvalidFormat {
            format: template.to_string(),
            message: message.to_string(),
        };

        let mut out = RangeFormat {
            has_placeholder: false,
            ..RangeFormat::default()
        };
        let mut spec: Option<String> = None;
        let mut chars = template.chars().peekable();
        while let Some(ch) = chars.next() {
            let target = if out.has_placeholder {
                &mut out.suffix
            } else {
                &mut out.prefix
            };
            match ch {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    target.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    target.push('}');
                }
                '{' => {
                    if out.has_placeholder {
                        return Err(fail("only one placeholder is supported"));
                    }
                    let mut inner = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => inner.push(c),
                            None => return Err(fail("unterminated placeholder")),
                        }
                    }
                    out.has_placeholder = true;
                    spec = Some(inner);
                }
                '}' => return Err(fail("single '}' encountered")),
                other => target.push(other),
            }
        }

        if let Some(inner) = spec {
            // an optional positional index, which can only be 0
            let (index, body) = match inner.split_once(':') {
                Some((index, body)) => (index, Some(body)),
                None => (inner.as_str(), None),
            };
            if !(index.is_empty() || index == "0") {
                return Err(fail("unsupported placeholder"));
            }
            if let Some(body) = body {
                let mut body = body.to_string();
                match body.chars().last() {
                    Some('d') => {
                        body.pop();
                    }
                    Some('x') => {
                        body.pop();
                        out.radix = Radix::LowerHex;
                    }
                    Some('X') => {
                        body.pop();
                        out.radix = Radix::UpperHex;
                    }
                    _ => {}
                }
                if let Some(rest) = body.strip_prefix('0') {
                    out.zero = true;
                    body = rest.to_string();
                }
                if !body.is_empty() {
                    out.width = body
                        .parse::<usize>()
                        .map_err(|_| fail("unsupported format spec"))?;
                }
            }
        }
        Ok(out)
    }

    pub fn render(&self, value: i64) -> String {
        if !self.has_placeholder {
            return format!("{}{}", self.prefix, self.suffix);
        }
        let magnitude = value.unsigned_abs();
        let digits = match self.radix {
            Radix::Decimal => magnitude.to_string(),
            Radix::LowerHex => format!("{magnitude:x}"),
            Radix::UpperHex => format!("{magnitude:X}"),
        };
        let sign = if value < 0 { "-" } else { "" };
        let len = sign.len() + digits.len();
        let number = if len >= self.width {
            format!("{sign}{digits}")
        } else if self.zero {
            format!("{sign}{}{digits}", "0".repeat(self.width - len))
        } else {
            format!("{}{sign}{digits}", " ".repeat(self.width - len))
        };
        format!("{}{}{}", self.prefix, number, self.suffix)
    }
}

#[derive(Clone, Debug)]
pub enum PayloadSource {
    Enumerated {
        values: Vec<String>,
    },
    Range {
        start: i64,
        end: i64,
        step: i64,
        format: RangeFormat,
    },
    Dictionary {
        path: PathBuf,
    },
}

impl PayloadSource {
    pub fn describe(&self) -> String {
        match self {
            PayloadSource::Enumerated { values } => format!("list ({} items)", values.len()),
            PayloadSource::Range {
                start, end, step, ..
            } => {
                if *step == 1 {
                    format!("range({start}, {end})")
                } else {
                    format!("range({start}, {end}, step {step})")
                }
            }
            PayloadSource::Dictionary { path } => path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PayloadSlot {
    pub name: String,
    pub source: PayloadSource,
    pub pipeline: Pipeline,
}

impl PayloadSlot {
    pub fn new(name: impl Into<String>, source: PayloadSource) -> Self {
        Self {
            name: name.into(),
            source,
            pipeline: Pipeline::default(),
        }
    }

    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }
}

#[derive(Clone, Debug)]
pub struct MaterializedSlot {
    pub name: Arc<str>,
    pub source: String,
    pub pipeline: String,
    pub candidates: Vec<Arc<Candidate>>,
    pub dropped: usize,
}

impl MaterializedSlot {
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

pub fn range_count(start: i64, end: i64, step: i64) -> u64 {
    if step <= 0 || end < start {
        return 0;
    }
    ((end as i128 - start as i128) / step as i128 + 1) as u64
}

pub async fn raw_values(slot: &PayloadSlot) -> Result<Vec<String>, GeneratorError> {
    match &slot.source {
        PayloadSource::Enumerated { values } => Ok(values.clone()),
        PayloadSource::Range {
            start,
            end,
            step,
            format,
        } => {
            if *step <= 0 {
                return Err(GeneratorError::InvalidStep {
                    slot: slot.name.clone(),
                    step: *step,
                });
            }
            let count = range_count(*start, *end, *step);
            let mut out = Vec::with_capacity(count.min(1 << 20) as usize);
            for i in 0..count {
                let value = *start as i128 + i as i128 * *step as i128;
                out.push(format.render(value as i64));
            }
            Ok(out)
        }
        PayloadSource::Dictionary { path } => {
            let bytes = tokio::fs::read(path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    GeneratorError::DictionaryMissing {
                        slot: slot.name.clone(),
                        path: path.display().to_string(),
                    }
                } else {
                    GeneratorError::DictionaryRead {
                        slot: slot.name.clone(),
                        path: path.display().to_string(),
                        source: e,
                    }
                }
            })?;
            Ok(dictionary_lines(&decode_dropping_invalid(&bytes)))
        }
    }
}

/// Decodes UTF-8, skipping invalid byte sequences instead of replacing them.
pub fn decode_dropping_invalid(mut bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    loop {
        match std::str::from_utf8(bytes) {
            Ok(valid) => {
                out.push_str(valid);
                return out;
            }
            Err(e) => {
                let (valid, rest) = bytes.split_at(e.valid_up_to());
                // valid_up_to marks a checked boundary
                out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                match e.error_len() {
                    Some(len) => bytes = &rest[len..],
                    None => return out,
                }
            }
        }
    }
}

pub fn dictionary_lines(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect()
}

pub fn materialize_values(slot: &PayloadSlot, raw: Vec<String>) -> MaterializedSlot {
    let mut candidates = Vec::with_capacity(raw.len());
    let mut dropped = 0usize;
    for value in raw {
        match slot.pipeline.candidate(&value) {
            Ok(candidate) => candidates.push(Arc::new(candidate)),
            Err(e) => {
                tracing::trace!(slot = %slot.name, value = %value, error = %e, "candidate dropped");
                dropped += 1;
            }
        }
    }
    if dropped > 0 {
        tracing::warn!(
            slot = %slot.name,
            dropped,
            kept = candidates.len(),
            "some candidates failed transformation and were dropped"
        );
    }
    MaterializedSlot {
        name: Arc::from(slot.name.as_str()),
        source: slot.source.describe(),
        pipeline: slot.pipeline.describe(),
        candidates,
        dropped,
    }
}

pub async fn materialize(slot: &PayloadSlot) -> Result<MaterializedSlot, GeneratorError> {
    let raw = raw_values(slot).await?;
    Ok(materialize_values(slot, raw))
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Combination {
    entries: Vec<(Arc<str>, Arc<Candidate>)>,
}

impl Combination {
    pub fn from_candidates<I, N>(entries: I) -> Self
    where
        I: IntoIterator<Item = (N, Candidate)>,
        N: AsRef<str>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(n, c)| (Arc::from(n.as_ref()), Arc::new(c)))
                .collect(),
        }
    }

    pub fn get(&self, slot: &str) -> Option<&Candidate> {
        self.entries
            .iter()
            .find(|(name, _)| name.as_ref() == slot)
            .map(|(_, c)| c.as_ref())
    }

    pub fn processed(&self, slot: &str) -> Option<&str> {
        self.get(slot).map(|c| c.processed.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Candidate)> {
        self.entries.iter().map(|(n, c)| (n.as_ref(), c.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for Combination {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, candidate) in self.entries.iter() {
            map.serialize_entry(name.as_ref(), candidate.as_ref())?;
        }
        map.end()
    }
}

#[derive(Clone, Debug)]
pub struct PayloadSpace {
    slots: Arc<[MaterializedSlot]>,
    total: u64,
}

impl PayloadSpace {
    /// Materializes every slot. Any configuration problem surfaces here, before dispatch.
    pub async fn build(slots: &[PayloadSlot]) -> Result<Self, GeneratorError> {
        let mut seen: HashSet<&str> = HashSet::new();
        for slot in slots {
            if slot.name.is_empty() || slot.name.contains(|c: char| c == '{' || c == '}') {
                return Err(GeneratorError::InvalidSlotName);
            }
            if !seen.insert(slot.name.as_str()) {
                return Err(GeneratorError::DuplicateSlot {
                    name: slot.name.clone(),
                });
            }
        }
        let mut materialized = Vec::with_capacity(slots.len());
        for slot in slots {
            materialized.push(materialize(slot).await?);
        }
        Self::from_materialized(materialized)
    }

    pub fn from_materialized(slots: Vec<MaterializedSlot>) -> Result<Self, GeneratorError> {
        let mut total: u64 = 1;
        for slot in slots.iter() {
            total = total
                .checked_mul(slot.len() as u64)
                .ok_or(GeneratorError::Overflow)?;
        }
        Ok(Self {
            slots: slots.into(),
            total,
        })
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn slots(&self) -> &[MaterializedSlot] {
        &self.slots
    }

    pub fn first(&self) -> Option<Combination> {
        self.iter().next()
    }

    /// Lazy Cartesian product, last-declared slot varying fastest.
    pub fn iter(&self) -> Combinations {
        let indices = if self.slots.is_empty() {
            IndexSource::Single { done: false }
        } else {
            IndexSource::Product(
                self.slots
                    .iter()
                    .map(|s| 0..s.len())
                    .multi_cartesian_product(),
            )
        };
        Combinations {
            slots: Arc::clone(&self.slots),
            indices,
        }
    }
}

enum IndexSource {
    Single { done: bool },
    Product(MultiProduct<Range<usize>>),
    Exhausted,
}

// Stays exhausted once it returns `None`; `MultiProduct` alone would cycle.
pub struct Combinations {
    slots: Arc<[MaterializedSlot]>,
    indices: IndexSource,
}

impl Iterator for Combinations {
    type Item = Combination;

    fn next(&mut self) -> Option<Combination> {
        let next = match &mut self.indices {
            IndexSource::Single { done } if !*done => {
                *done = true;
                Some(Vec::new())
            }
            IndexSource::Product(product) => product.next(),
            _ => None,
        };
        let Some(indices) = next else {
            self.indices = IndexSource::Exhausted;
            return None;
        };
        let entries = self
            .slots
            .iter()
            .zip(indices)
            .map(|(slot, i)| (Arc::clone(&slot.name), Arc::clone(&slot.candidates[i])))
            .collect();
        Some(Combination { entries })
    }
}

impl FusedIterator for Combinations {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::TransformStep;

    fn list(name: &str, values: &[&str]) -> PayloadSlot {
        PayloadSlot::new(
            name,
            PayloadSource::Enumerated {
                values: values.iter().map(|s| s.to_string()).collect(),
            },
        )
    }

    fn range(name: &str, start: i64, end: i64, step: i64) -> PayloadSlot {
        PayloadSlot::new(
            name,
            PayloadSource::Range {
                start,
                end,
                step,
                format: RangeFormat::default(),
            },
        )
    }

    #[tokio::test]
    async fn range_count_matches_formula() {
        for (start, end, step) in [(0, 10, 1), (0, 10, 3), (5, 5, 1), (-4, 7, 2), (1, 100, 7)] {
            let slot = materialize(&range("N", start, end, step)).await.unwrap();
            let expected = ((end - start) / step + 1) as usize;
            assert_eq!(slot.len(), expected, "range({start}, {end}, {step})");
            assert_eq!(range_count(start, end, step) as usize, expected);
        }
        let empty = materialize(&range("N", 5, 1, 1)).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn range_end_is_inclusive() {
        let slot = materialize(&range("N", 0, 6, 3)).await.unwrap();
        let values: Vec<_> = slot
            .candidates
            .iter()
            .map(|c| c.processed.clone())
            .collect();
        assert_eq!(values, vec!["0", "3", "6"]);
    }

    #[tokio::test]
    async fn non_positive_step_is_rejected() {
        let err = PayloadSpace::build(&[range("N", 0, 10, 0)]).await.unwrap_err();
        assert!(matches!(err, GeneratorError::InvalidStep { step: 0, .. }));
    }

    #[test]
    fn range_format_renders_padding_and_hex() {
        assert_eq!(RangeFormat::parse("{}").unwrap().render(7), "7");
        assert_eq!(RangeFormat::parse("{:04}").unwrap().render(7), "0007");
        assert_eq!(RangeFormat::parse("{:04d}").unwrap().render(-7), "-007");
        assert_eq!(RangeFormat::parse("{:3}").unwrap().render(7), "  7");
        assert_eq!(RangeFormat::parse("id-{:x}").unwrap().render(255), "id-ff");
        assert_eq!(RangeFormat::parse("{0:04X}!").unwrap().render(255), "00FF!");
        assert_eq!(RangeFormat::parse("{{{}}}").unwrap().render(1), "{1}");
        assert_eq!(RangeFormat::parse("static").unwrap().render(1), "static");
        assert!(RangeFormat::parse("{}{}").is_err());
        assert!(RangeFormat::parse("{:abc}").is_err());
        assert!(RangeFormat::parse("{").is_err());
    }

    #[tokio::test]
    async fn product_size_and_order() {
        let space = PayloadSpace::build(&[list("A", &["a1", "a2"]), list("B", &["b1", "b2", "b3"])])
            .await
            .unwrap();
        assert_eq!(space.total(), 6);
        let combos: Vec<_> = space
            .iter()
            .map(|c| {
                format!(
                    "{}{}",
                    c.processed("A").unwrap(),
                    c.processed("B").unwrap()
                )
            })
            .collect();
        assert_eq!(
            combos,
            vec!["a1b1", "a1b2", "a1b3", "a2b1", "a2b2", "a2b3"]
        );
        assert_eq!(space.iter().count() as u64, space.total());
    }

    #[tokio::test]
    async fn iterator_stays_exhausted() {
        let space = PayloadSpace::build(&[list("A", &["x", "y"])]).await.unwrap();
        let mut iter = space.iter();
        let seen: Vec<_> = (0..6)
            .map(|_| iter.next().map(|c| c.processed("A").unwrap_or_default().to_string()))
            .collect();
        assert_eq!(
            seen,
            vec![Some("x".to_string()), Some("y".to_string()), None, None, None, None]
        );

        let empty = PayloadSpace::build(&[]).await.unwrap();
        let mut iter = empty.iter();
        assert!(iter.next().is_some());
        assert!(iter.next().is_none());
        assert!(iter.next().is_none());
    }

    #[tokio::test]
    async fn batched_takes_end_at_total() {
        let space = PayloadSpace::build(&[list("A", &["a1", "a2"]), list("B", &["b1", "b2", "b3"])])
            .await
            .unwrap();
        let mut iter = space.iter();
        let mut sizes = Vec::new();
        loop {
            let batch: Vec<_> = iter.by_ref().take(4).collect();
            if batch.is_empty() {
                break;
            }
            sizes.push(batch.len());
        }
        assert_eq!(sizes, vec![4, 2]);
    }

    #[tokio::test]
    async fn empty_slot_set_yields_one_empty_combination() {
        let space = PayloadSpace::build(&[]).await.unwrap();
        assert_eq!(space.total(), 1);
        let combos: Vec<_> = space.iter().collect();
        assert_eq!(combos.len(), 1);
        assert!(combos[0].is_empty());
    }

    #[tokio::test]
    async fn empty_slot_empties_the_product() {
        let space = PayloadSpace::build(&[list("A", &["a"]), list("B", &[])])
            .await
            .unwrap();
        assert_eq!(space.total(), 0);
        assert_eq!(space.iter().count(), 0);
    }

    #[tokio::test]
    async fn failing_candidates_are_dropped() {
        let slot = list("P", &["YWRtaW4=", "%%%", "cm9vdA=="]).with_pipeline(
            Pipeline::default().with_step(TransformStep::Codec(crate::transform::Codec::Base64Decode)),
        );
        let m = materialize(&slot).await.unwrap();
        assert_eq!(m.dropped, 1);
        let processed: Vec<_> = m.candidates.iter().map(|c| c.processed.as_str()).collect();
        assert_eq!(processed, vec!["admin", "root"]);
        assert_eq!(m.candidates[1].original, "cm9vdA==");
    }

    #[tokio::test]
    async fn missing_dictionary_fails_before_dispatch() {
        let slot = PayloadSlot::new(
            "PASS",
            PayloadSource::Dictionary {
                path: PathBuf::from("/definitely/not/here/rockyou.txt"),
            },
        );
        let err = PayloadSpace::build(&[slot]).await.unwrap_err();
        assert!(matches!(err, GeneratorError::DictionaryMissing { .. }));
    }

    #[tokio::test]
    async fn invalid_utf8_bytes_are_dropped() {
        assert_eq!(decode_dropping_invalid(b"pa\xffss\xc3\xa9"), "passé");
        assert_eq!(decode_dropping_invalid(b"ok\xe2\x82"), "ok");

        let path = std::env::temp_dir().join(format!("brutex-dict-bin-{}.txt", std::process::id()));
        tokio::fs::write(&path, b"ad\xfemin\n\xff\nroot\n").await.unwrap();
        let slot = PayloadSlot::new("PASS", PayloadSource::Dictionary { path: path.clone() });
        let m = materialize(&slot).await.unwrap();
        let _ = tokio::fs::remove_file(&path).await;
        let values: Vec<_> = m.candidates.iter().map(|c| c.original.as_str()).collect();
        assert_eq!(values, vec!["admin", "root"]);
    }

    #[tokio::test]
    async fn dictionary_lines_are_trimmed_and_non_empty() {
        let path = std::env::temp_dir().join(format!("brutex-dict-{}.txt", std::process::id()));
        tokio::fs::write(&path, "  admin \r\n\n123456\n   \nletmein\n")
            .await
            .unwrap();
        let slot = PayloadSlot::new("PASS", PayloadSource::Dictionary { path: path.clone() });
        let m = materialize(&slot).await.unwrap();
        let _ = tokio::fs::remove_file(&path).await;
        let values: Vec<_> = m.candidates.iter().map(|c| c.original.as_str()).collect();
        assert_eq!(values, vec!["admin", "123456", "letmein"]);
        assert_eq!(m.source, path.file_name().unwrap().to_string_lossy());
    }

    #[tokio::test]
    async fn duplicate_and_invalid_slot_names_are_rejected() {
        let err = PayloadSpace::build(&[list("A", &["1"]), list("A", &["2"])])
            .await
            .unwrap_err();
        assert!(matches!(err, GeneratorError::DuplicateSlot { .. }));
        let err = PayloadSpace::build(&[list("{A}", &["1"])]).await.unwrap_err();
        assert!(matches!(err, GeneratorError::InvalidSlotName));
    }
}
