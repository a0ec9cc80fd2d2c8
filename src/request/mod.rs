use std::fmt;

use serde::Serialize;

use crate::generator::Combination;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
    Get,
    #[default]
    Post,
    Json,
}

impl RequestMethod {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" | "FORM" => Some(Self::Post),
            "JSON" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Json => "JSON",
        }
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestTemplate {
    fields: Vec<(String, String)>,
}

impl RequestTemplate {
    pub fn new<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn placeholders(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for (_, template) in self.fields.iter() {
            let mut rest = template.as_str();
            while let Some(open) = rest.find('{') {
                let after = &rest[open + 1..];
                match after.find(|c: char| c == '{' || c == '}') {
                    Some(close) if after.as_bytes()[close] == b'}' && close > 0 => {
                        let name = &after[..close];
                        if !out.iter().any(|n| n == name) {
                            out.push(name.to_string());
                        }
                        rest = &after[close + 1..];
                    }
                    _ => rest = after,
                }
            }
        }
        out
    }

    pub fn build(&self, combination: &Combination) -> Vec<(String, String)> {
        self.fields
            .iter()
            .map(|(field, template)| (field.clone(), substitute(template, combination)))
            .collect()
    }
}

/// Replaces every `{SLOT}` with the slot's processed value in one left-to-right pass.
/// Inserted values are never rescanned; unknown slots stay verbatim.
pub fn substitute(template: &str, combination: &Combination) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let resolved = after
            .find(|c: char| c == '{' || c == '}')
            .filter(|&close| after.as_bytes()[close] == b'}')
            .and_then(|close| {
                combination
                    .processed(&after[..close])
                    .map(|value| (value, close))
            });
        match resolved {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn build_request(
    client: &reqwest::Client,
    method: RequestMethod,
    url: &str,
    data: &[(String, String)],
) -> reqwest::RequestBuilder {
    match method {
        RequestMethod::Get => client.get(url).query(data),
        RequestMethod::Post => client.post(url).form(data),
        RequestMethod::Json => {
            let body: serde_json::Map<String, serde_json::Value> = data
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            client.post(url).json(&body)
        }
    }
}
