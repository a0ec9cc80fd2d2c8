use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::Serialize;
use serde_yaml::{Mapping, Value};

use crate::generator::{PayloadSlot, PayloadSource, RangeFormat};
use crate::transform::Pipeline;

#[derive(Debug, Default, Deserialize, Serialize, Clone)]
pub struct ConfigFile {
    pub url: Option<String>,
    pub method: Option<String>,
    pub data: Option<Mapping>,
    pub headers: Option<Mapping>,
    pub cookies: Option<Mapping>,
    pub payloads: Option<Mapping>,
    #[serde(alias = "threads")]
    pub concurrency: Option<usize>,
    pub timeout: Option<f64>,
    pub retries: Option<u32>,
    pub batch_size: Option<usize>,
    pub rate: Option<u32>,
    pub fail_keywords: Option<Vec<String>>,
    pub success_keywords: Option<Vec<String>>,
    pub success_regex: Option<String>,
    pub success_length: Option<usize>,
    pub success_length_not: Option<usize>,
    pub success_status: Option<u16>,
    pub smart_mode: Option<bool>,
    pub auto_stop: Option<bool>,
    pub proxy: Option<String>,
    pub follow_redirects: Option<bool>,
    pub flag_patterns: Option<Vec<String>>,
    pub excerpt_len: Option<usize>,
    pub output: Option<String>,
    pub output_format: Option<String>,
    pub no_color: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone)]
pub struct PayloadConfig {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub values: Option<Vec<Value>>,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub step: Option<i64>,
    pub format: Option<String>,
    pub path: Option<String>,
    pub processors: Option<Vec<String>>,
}

impl PayloadConfig {
    pub fn to_slot(&self, name: &str) -> Result<PayloadSlot, String> {
        let kind = self.kind.as_deref().unwrap_or("list").trim().to_lowercase();
        let source = match kind.as_str() {
            "list" | "values" => {
                let values = self.values.as_deref().unwrap_or_default();
                let mut out = Vec::with_capacity(values.len());
                for value in values {
                    let text = yaml_scalar(value).ok_or_else(|| {
                        format!("payload '{name}': list values must be scalars, got {value:?}")
                    })?;
                    out.push(text);
                }
                PayloadSource::Enumerated { values: out }
            }
            "range" => {
                let format = match self.format.as_deref() {
                    Some(f) => RangeFormat::parse(f).map_err(|e| format!("payload '{name}': {e}"))?,
                    None => RangeFormat::default(),
                };
                PayloadSource::Range {
                    start: self.start.unwrap_or(0),
                    end: self.end.unwrap_or(100),
                    step: self.step.unwrap_or(1),
                    format,
                }
            }
            "file" | "dict" | "dictionary" => {
                let path = self
                    .path
                    .as_deref()
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| format!("payload '{name}': type file requires a path"))?;
                PayloadSource::Dictionary {
                    path: expand_tilde(path),
                }
            }
            other => {
                return Err(format!(
                    "payload '{name}': unknown type '{other}', expected list, range or file"
                ))
            }
        };

        let pipeline = Pipeline::parse_list(self.processors.as_deref().unwrap_or_default())
            .map_err(|e| format!("payload '{name}': {e}"))?;
        Ok(PayloadSlot::new(name, source).with_pipeline(pipeline))
    }
}

/// Converts the `payloads:` mapping into slots, keeping declaration order.
pub fn payload_slots(payloads: &Mapping) -> Result<Vec<PayloadSlot>, String> {
    let mut out = Vec::with_capacity(payloads.len());
    for (key, value) in payloads.iter() {
        let name = yaml_scalar(key).ok_or_else(|| format!("invalid payload name {key:?}"))?;
        let cfg: PayloadConfig = serde_yaml::from_value(value.clone())
            .map_err(|e| format!("payload '{name}': {e}"))?;
        out.push(cfg.to_slot(&name)?);
    }
    Ok(out)
}

pub fn string_pairs(map: &Mapping, what: &str) -> Result<Vec<(String, String)>, String> {
    let mut out = Vec::with_capacity(map.len());
    for (key, value) in map.iter() {
        let k = yaml_scalar(key).ok_or_else(|| format!("{what}: invalid key {key:?}"))?;
        let v = yaml_scalar(value).ok_or_else(|| format!("{what}.{k}: value must be a scalar"))?;
        out.push((k, v));
    }
    Ok(out)
}

fn yaml_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("USERPROFILE").map(PathBuf::from))
        .or_else(|| {
            let drive = env::var_os("HOMEDRIVE")?;
            let path = env::var_os("HOMEPATH")?;
            Some(PathBuf::from(drive).join(path))
        })
}

pub fn default_config_path() -> Option<PathBuf> {
    Some(home_dir()?.join(".brutex").join("config.yml"))
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn load_config(path: &Path, allow_missing: bool) -> Result<ConfigFile, String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => parse_config(&contents)
            .map_err(|e| format!("failed to parse config '{}': {e}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && allow_missing => {
            Ok(ConfigFile::default())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(format!("config file not found '{}'", path.display()))
        }
        Err(e) => Err(format!("failed to read config '{}': {e}", path.display())),
    }
}

pub fn parse_config(contents: &str) -> Result<ConfigFile, serde_yaml::Error> {
    if contents.trim().is_empty() {
        return Ok(ConfigFile::default());
    }
    serde_yaml::from_str::<ConfigFile>(contents)
}

fn default_config_yaml() -> String {
    r#"# brutex config
#
# Location (default):
#   ~/.brutex/config.yml
#
# Placeholders {NAME} in `data` are replaced by the processed value of the
# payload slot NAME. Slots are combined in the order they are declared here,
# the last slot varying fastest.

url: http://127.0.0.1/
method: POST          # GET | POST | JSON

data:
  username: "{USER}"
  password: "{PASS}"

# headers:
#   X-Requested-With: XMLHttpRequest
# cookies:
#   PHPSESSID: deadbeef

payloads:
  USER:
    type: list
    values: [admin]
  PASS:
    type: file
    path: ./top1000.txt
    # processors are applied left to right, for example:
    #   [md5]
    #   ["prefix=admin:", base64]
    #   [sha1]
    processors: []
  # PIN:
  #   type: range
  #   start: 0
  #   end: 9999
  #   step: 1
  #   format: "{:04}"

# Performance
concurrency: 500
timeout: 5
retries: 2
batch_size: 2000
# rate: 1000          # requests per second, unlimited when unset

# Success detection, evaluated in this order
fail_keywords: ["错误", "失败", "error", "invalid", "incorrect", "wrong", "denied", "bad"]
success_keywords: []
# success_regex: "welcome.*admin"
# success_length: 1234
# success_length_not: 1234
# success_status: 302
smart_mode: true
auto_stop: true

# HTTP
# proxy: http://127.0.0.1:8080
follow_redirects: false

# Flags: extra prefixes besides flag, ctf, nssctf, hgame
flag_patterns: []
excerpt_len: 2000

# Output
# output: ./results.json
# output_format: json   # json | text
no_color: false
"#
    .to_string()
}

pub fn ensure_default_config_file(path: &Path) -> Result<(), String> {
    if path.exists() {
        return Ok(());
    }
    let parent = path
        .parent()
        .ok_or_else(|| format!("invalid config path '{}'", path.display()))?;
    std::fs::create_dir_all(parent).map_err(|e| {
        format!(
            "failed to create config directory '{}': {e}",
            parent.display()
        )
    })?;
    let contents = default_config_yaml();
    std::fs::write(path, contents)
        .map_err(|e| format!("failed to write config file '{}': {e}", path.display()))?;
    Ok(())
}
