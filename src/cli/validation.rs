use crate::cli::args::CliArgs;
use crate::request::RequestMethod;

pub fn validate(args: &CliArgs) -> Result<(), String> {
    if let Some(method) = args.method.as_deref() {
        if RequestMethod::parse(method).is_none() {
            return Err(format!("invalid --method '{method}', expected GET, POST or JSON"));
        }
    }
    if args.threads == Some(0) {
        return Err("invalid --threads, expected positive integer".to_string());
    }
    if args.batch_size == Some(0) {
        return Err("invalid --batch-size, expected positive integer".to_string());
    }
    if args.rate == Some(0) {
        return Err("invalid --rate, expected positive integer".to_string());
    }
    if let Some(timeout) = args.timeout {
        if !timeout.is_finite() || timeout <= 0.0 {
            return Err(format!("invalid --timeout '{timeout}', expected seconds > 0"));
        }
    }
    if let Some(format) = args.output_format.as_deref() {
        crate::output::OutputFormat::parse(format)
            .ok_or_else(|| format!("invalid --output-format '{format}', expected json or text"))?;
    }
    if args.dict_slot.trim().is_empty() {
        return Err("invalid --dict-slot, expected a slot name".to_string());
    }
    crate::utils::parse_header_lines(&args.header)?;
    for raw in args.data.iter() {
        parse_assignment(raw).map_err(|e| format!("invalid --data: {e}"))?;
    }
    for raw in args.cookie.iter() {
        parse_assignment(raw).map_err(|e| format!("invalid --cookie: {e}"))?;
    }
    Ok(())
}

pub fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("'{raw}' is not NAME=VALUE"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("'{raw}' has an empty name"));
    }
    Ok((name.to_string(), value.to_string()))
}
