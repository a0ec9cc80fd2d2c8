use std::time::Duration;

// ETAs beyond this are shown as "calculating".
pub const MAX_DISPLAY_ETA: Duration = Duration::from_secs(10 * 3600);

/// Parses a `Key: Value` header line.
pub fn parse_header_line(value: &str) -> Result<(String, String), String> {
    let (name, val) = value
        .split_once(':')
        .ok_or_else(|| format!("invalid header '{value}', expected 'Key: Value'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("invalid header '{value}', empty name"));
    }
    Ok((name.to_string(), val.trim().to_string()))
}

pub fn parse_header_lines(values: &[String]) -> Result<Vec<(String, String)>, String> {
    values
        .iter()
        .filter(|v| !v.trim().is_empty())
        .map(|v| parse_header_line(v))
        .collect()
}

pub fn format_eta(eta: Option<Duration>) -> String {
    match eta {
        Some(eta) if eta <= MAX_DISPLAY_ETA => {
            let secs = eta.as_secs_f64();
            if secs < 60.0 {
                format!("{}s", secs.round() as u64)
            } else if secs < 3600.0 {
                format!("{:.1}m", secs / 60.0)
            } else {
                format!("{:.1}h", secs / 3600.0)
            }
        }
        _ => "calculating".to_string(),
    }
}

pub fn format_speed(speed: f64) -> String {
    if speed >= 1000.0 {
        format!("{:.1}k/s", speed / 1000.0)
    } else {
        format!("{:.0}/s", speed)
    }
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.2}s", elapsed.as_secs_f64())
    }
}

pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
