use std::path::Path;

use crate::runner::RunReport;
use crate::utils;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    #[default]
    Json,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "text" | "txt" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub fn infer_format_from_path(path: &str) -> Option<OutputFormat> {
    let lower = path.trim().to_lowercase();
    if lower.ends_with(".json") {
        return Some(OutputFormat::Json);
    }
    if lower.ends_with(".txt") || lower.ends_with(".log") {
        return Some(OutputFormat::Text);
    }
    None
}

pub fn render_json(report: &RunReport) -> Vec<u8> {
    let mut out = serde_json::to_vec_pretty(report).unwrap_or_else(|_| b"{}".to_vec());
    out.push(b'\n');
    out
}

pub fn render_text(report: &RunReport) -> Vec<u8> {
    let mut out = String::new();
    out.push_str(&format!("target: {} {}\n", report.method, report.url));
    out.push_str(&format!("stopped: {}\n", report.stop_reason));
    out.push('\n');

    if report.results.is_empty() {
        out.push_str("no successful combination\n");
    }
    for record in report.results.iter() {
        let payload = record
            .combination
            .iter()
            .map(|(name, c)| {
                if c.original == c.processed {
                    format!("{name}={}", c.original)
                } else {
                    format!("{name}={} ({})", c.original, c.processed)
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        out.push_str(&format!(
            "[+] {payload} status={} length={} matched={}\n",
            record.status, record.response_length, record.reason
        ));
        for flag in record.flags.iter() {
            out.push_str(&format!("    flag: {flag}\n"));
        }
    }

    if !report.flags.is_empty() {
        out.push_str("\nflags:\n");
        for flag in report.flags.iter() {
            out.push_str(&format!("  {flag}\n"));
        }
    }

    let s = &report.stats;
    out.push_str(&format!(
        "\nsettled {}/{} completed {} success {} errors {} retried {} elapsed {} avg {}\n",
        s.settled,
        s.total,
        s.completed,
        s.success,
        s.errors,
        s.retried,
        utils::format_elapsed(s.elapsed),
        utils::format_speed(s.average_speed())
    ));
    out.into_bytes()
}

pub fn render(report: &RunReport, format: OutputFormat) -> Vec<u8> {
    match format {
        OutputFormat::Json => render_json(report),
        OutputFormat::Text => render_text(report),
    }
}

pub async fn write_report(path: &Path, format: OutputFormat, report: &RunReport) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("failed to create output directory '{}': {e}", parent.display()))?;
    }
    tokio::fs::write(path, render(report, format))
        .await
        .map_err(|e| format!("failed to write output '{}': {e}", path.display()))
}
