use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::{error::ErrorKind, CommandFactory, Parser};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::bruteforcer::{EngineEvent, SuccessRecord};
use crate::cli::args::CliArgs;
use crate::cli::validation::{self, parse_assignment};
use crate::config::{self, ConfigFile};
use crate::generator::{PayloadSlot, PayloadSource, PayloadSpace};
use crate::output::{self, OutputFormat};
use crate::request::RequestMethod;
use crate::runner::{Options, RunReport, Runner};
use crate::utils;

const PREVIEW_EXCERPT_CHARS: usize = 1000;

fn print_banner() {
    const BANNER: &str = r#"
    __                __
   / /_  _______  __/ /____  _  __
  / __ \/ ___/ / / / __/ _ \| |/_/
 / /_/ / /  / /_/ / /_/  __/>  <
/_.___/_/   \__,_/\__/\___/_/|_|
       credential brute-forcer for CTF targets
    "#;
    print!("{}", BANNER);
    println!();
}

fn format_kv_line(label: &str, value: &str) {
    println!(":: {:<12}: {}", label, value);
}

fn render_custom_help() -> String {
    let cmd = CliArgs::command();
    let mut out = String::new();

    out.push_str(cmd.get_name());
    if let Some(version) = cmd.get_version() {
        out.push(' ');
        out.push_str(version);
    }
    out.push('\n');
    if let Some(long_about) = cmd.get_long_about().or_else(|| cmd.get_about()) {
        out.push_str(&long_about.to_string());
        out.push('\n');
    }
    out.push_str("\nUsage: ");
    out.push_str(cmd.get_name());
    out.push_str(" [OPTIONS]\n\n");

    let mut sections: Vec<(String, Vec<&clap::Arg>)> = Vec::new();
    let mut section_idx: HashMap<String, usize> = HashMap::new();
    for arg in cmd.get_arguments() {
        if arg.is_hide_set() {
            continue;
        }
        let heading = arg.get_help_heading().unwrap_or("Options").to_string();
        let idx = match section_idx.get(&heading).copied() {
            Some(i) => i,
            None => {
                sections.push((heading.clone(), Vec::new()));
                section_idx.insert(heading, sections.len() - 1);
                sections.len() - 1
            }
        };
        sections[idx].1.push(arg);
    }

    for (heading, args) in sections {
        out.push_str(&heading);
        out.push_str(":\n");
        for arg in args {
            let mut parts: Vec<String> = Vec::new();
            if let Some(short) = arg.get_short() {
                parts.push(format!("-{short}"));
            }
            if let Some(long) = arg.get_long() {
                parts.push(format!("--{long}"));
            }
            if let Some(aliases) = arg.get_visible_aliases() {
                parts.extend(aliases.into_iter().map(|a| format!("--{a}")));
            }
            let mut flags = parts.join(", ");
            if arg.get_action().takes_values() {
                let value_name = arg
                    .get_value_names()
                    .and_then(|names| names.first())
                    .map(|name| name.as_str())
                    .unwrap_or("VALUE");
                flags.push_str(&format!(" <{value_name}>"));
            }
            out.push_str("  ");
            out.push_str(&flags);
            out.push('\n');
            if let Some(help) = arg.get_help() {
                out.push_str("          ");
                out.push_str(help.to_string().trim());
                out.push('\n');
            }
        }
        out.push('\n');
    }
    out
}

/// Installs the stderr log subscriber. `RUST_LOG` wins over `-v`.
fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("brutex={default_level}")));
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}

#[derive(Debug)]
struct RunConfig {
    options: Options,
    output: Option<PathBuf>,
    output_format: OutputFormat,
    no_color: bool,
    verbose: u8,
}

// Later entries replace earlier ones with the same name; header names compare case-insensitively.
fn merge_pairs(
    base: Vec<(String, String)>,
    overrides: Vec<(String, String)>,
    ignore_case: bool,
) -> Vec<(String, String)> {
    let mut out = base;
    for (name, value) in overrides {
        let existing = out.iter_mut().find(|(n, _)| {
            if ignore_case {
                n.eq_ignore_ascii_case(&name)
            } else {
                *n == name
            }
        });
        match existing {
            Some(slot) => slot.1 = value,
            None => out.push((name, value)),
        }
    }
    out
}

fn apply_dict_override(slots: &mut Vec<PayloadSlot>, slot_name: &str, path: &str) {
    let source = PayloadSource::Dictionary {
        path: config::expand_tilde(path),
    };
    match slots.iter_mut().find(|s| s.name == slot_name) {
        Some(slot) => slot.source = source,
        None => slots.push(PayloadSlot::new(slot_name, source)),
    }
}

fn build_run_config(args: CliArgs, cfg: ConfigFile) -> Result<RunConfig, String> {
    validation::validate(&args)?;
    let defaults = Options::default();

    let url = args
        .url
        .or(cfg.url)
        .map(|u| u.trim().to_string())
        .unwrap_or(defaults.url);
    let method = match args.method.or(cfg.method) {
        Some(raw) => RequestMethod::parse(&raw)
            .ok_or_else(|| format!("invalid method '{raw}', expected GET, POST or JSON"))?,
        None => defaults.method,
    };

    let mut data = match cfg.data.as_ref() {
        Some(map) => config::string_pairs(map, "data")?,
        None => defaults.data,
    };
    let cli_data = args
        .data
        .iter()
        .map(|raw| parse_assignment(raw))
        .collect::<Result<Vec<_>, _>>()?;
    data = merge_pairs(data, cli_data, false);

    let mut headers = defaults.headers;
    if let Some(map) = cfg.headers.as_ref() {
        headers = merge_pairs(headers, config::string_pairs(map, "headers")?, true);
    }
    headers = merge_pairs(headers, utils::parse_header_lines(&args.header)?, true);

    let mut cookies = match cfg.cookies.as_ref() {
        Some(map) => config::string_pairs(map, "cookies")?,
        None => Vec::new(),
    };
    let cli_cookies = args
        .cookie
        .iter()
        .map(|raw| parse_assignment(raw))
        .collect::<Result<Vec<_>, _>>()?;
    cookies = merge_pairs(cookies, cli_cookies, false);

    let mut payloads = match cfg.payloads.as_ref() {
        Some(map) => config::payload_slots(map)?,
        None => defaults.payloads,
    };
    if let Some(dict) = args.dict.as_deref() {
        apply_dict_override(&mut payloads, args.dict_slot.trim(), dict);
    }

    let timeout_secs = args.timeout.or(cfg.timeout).unwrap_or(defaults.timeout.as_secs_f64());
    if !timeout_secs.is_finite() || timeout_secs <= 0.0 {
        return Err(format!("invalid timeout '{timeout_secs}', expected seconds > 0"));
    }

    let mut criteria = defaults.criteria;
    if !args.fail.is_empty() {
        criteria.fail_keywords = args.fail;
    } else if let Some(keywords) = cfg.fail_keywords {
        criteria.fail_keywords = keywords;
    }
    let mut success_keywords = cfg.success_keywords.unwrap_or_default();
    success_keywords.extend(args.success);
    criteria.success_keywords = success_keywords;
    criteria.success_regex = args
        .success_regex
        .or(cfg.success_regex)
        .filter(|r| !r.is_empty());
    criteria.success_length = args.success_length.or(cfg.success_length);
    criteria.success_length_not = args.success_length_not.or(cfg.success_length_not);
    criteria.success_status = args.success_status.or(cfg.success_status);
    criteria.smart_mode = !args.no_smart && cfg.smart_mode.unwrap_or(true);

    let mut flag_patterns = cfg.flag_patterns.unwrap_or_default();
    flag_patterns.extend(args.flag_prefix);

    let options = Options {
        url,
        method,
        data,
        headers,
        cookies,
        payloads,
        concurrency: args.threads.or(cfg.concurrency).unwrap_or(defaults.concurrency),
        timeout: Duration::from_secs_f64(timeout_secs),
        retries: args.retries.or(cfg.retries).unwrap_or(defaults.retries),
        batch_size: args.batch_size.or(cfg.batch_size).unwrap_or(defaults.batch_size),
        rate: args.rate.or(cfg.rate),
        criteria,
        auto_stop: !args.no_auto_stop && cfg.auto_stop.unwrap_or(true),
        proxy: args.proxy.or(cfg.proxy).filter(|p| !p.trim().is_empty()),
        follow_redirects: args.follow_redirects || cfg.follow_redirects.unwrap_or(false),
        flag_patterns,
        excerpt_len: cfg.excerpt_len.unwrap_or(defaults.excerpt_len),
    };

    let output = args
        .output
        .or(cfg.output)
        .filter(|p| !p.trim().is_empty());
    let output_format = match args.output_format.or(cfg.output_format) {
        Some(raw) => OutputFormat::parse(&raw)
            .ok_or_else(|| format!("invalid output format '{raw}', expected json or text"))?,
        None => output
            .as_deref()
            .and_then(output::infer_format_from_path)
            .unwrap_or_default(),
    };

    Ok(RunConfig {
        options,
        output: output.map(|p| config::expand_tilde(&p)),
        output_format,
        no_color: args.no_color || cfg.no_color.unwrap_or(false),
        verbose: args.verbose,
    })
}

fn print_run_config(options: &Options) {
    format_kv_line("Target", &options.url);
    format_kv_line("Method", options.method.as_str());
    format_kv_line("Concurrency", &options.concurrency.to_string());
    format_kv_line("Timeout", &format!("{}s", options.timeout.as_secs_f64()));
    format_kv_line("Retries", &options.retries.to_string());
    if let Some(rate) = options.rate {
        format_kv_line("Rate", &format!("{rate}/s"));
    }
    if let Some(proxy) = options.proxy.as_deref() {
        format_kv_line("Proxy", proxy);
    }
    let fields = options
        .data
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    format_kv_line("Data", &fields);
    format_kv_line(
        "Smart mode",
        if options.criteria.smart_mode { "on" } else { "off" },
    );
    format_kv_line("Auto stop", if options.auto_stop { "on" } else { "off" });
}

fn print_payload_preview(space: &PayloadSpace) {
    println!();
    for slot in space.slots() {
        let mut line = format!(
            "{} ({} candidates, processors: {})",
            slot.source,
            slot.len(),
            slot.pipeline
        );
        if slot.dropped > 0 {
            line.push_str(&format!(", {} dropped", slot.dropped));
        }
        format_kv_line(&slot.name, &line);
    }
    format_kv_line("Total", &space.total().to_string());

    if let Some(first) = space.first() {
        println!("{}", ":: Sample payload".magenta());
        for (name, candidate) in first.iter() {
            if candidate.original != candidate.processed {
                println!(
                    "     {}: {} -> {}",
                    name.yellow(),
                    candidate.original,
                    candidate.processed.green()
                );
            } else {
                println!("     {}: {}", name.yellow(), candidate.original);
            }
        }
    }
    println!();
}

fn render_hit(record: &SuccessRecord) -> String {
    let mut out = format!(
        "{} status={} length={} ({})",
        "[+] SUCCESS".green().bold(),
        record.status,
        record.response_length,
        record.reason
    );
    for (name, candidate) in record.combination.iter() {
        if candidate.original != candidate.processed {
            out.push_str(&format!(
                "\n    {}: {} -> {}",
                name.yellow(),
                candidate.original,
                candidate.processed
            ));
        } else {
            out.push_str(&format!("\n    {}: {}", name.yellow(), candidate.original));
        }
    }
    for flag in record.flags.iter() {
        out.push_str(&format!("\n    {} {}", "flag:".red().bold(), flag.red().bold()));
    }
    out
}

fn print_summary(report: &RunReport) {
    let s = &report.stats;
    println!();
    if report.results.is_empty() {
        println!("{}", "[-] no valid combination found".red());
    }
    for record in report.results.iter() {
        println!("{}", render_hit(record));
        println!("{}", "[+] response:".blue());
        println!("{}", utils::truncate_chars(&record.excerpt, PREVIEW_EXCERPT_CHARS).dimmed());
    }
    if !report.flags.is_empty() {
        println!();
        for flag in report.flags.iter() {
            println!("{} {}", "[FLAG]".red().bold(), flag.bold());
        }
    }
    println!();
    format_kv_line("Stopped", &report.stop_reason.to_string());
    format_kv_line("Settled", &format!("{}/{}", s.settled, s.total));
    format_kv_line("Completed", &s.completed.to_string());
    format_kv_line("Success", &s.success.to_string());
    format_kv_line("Errors", &s.errors.to_string());
    format_kv_line("Retried", &s.retried.to_string());
    format_kv_line("Elapsed", &utils::format_elapsed(s.elapsed));
    format_kv_line("Avg speed", &utils::format_speed(s.average_speed()));
}

async fn wait_for_interrupt() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn run_async(run: RunConfig) -> Result<(), String> {
    if run.no_color {
        colored::control::set_override(false);
    }
    print_banner();
    print_run_config(&run.options);

    let runner = Runner::new(run.options).map_err(|e| e.to_string())?;
    let prepared = runner.prepare().await.map_err(|e| e.to_string())?;
    print_payload_preview(prepared.space());
    println!("{}", ":: Starting".green().bold());

    let total = prepared.space().total();
    let pb = ProgressBar::new(total.max(1));
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.enable_steady_tick(Duration::from_millis(200));
    pb.set_style(
        ProgressStyle::with_template(
            ":: Progress: [{pos}/{len}] {percent}% :: Duration: [{elapsed_precise}] :: {msg}",
        )
        .map_err(|e| format!("failed to build progress bar style: {e}"))?
        .progress_chars(r#"#>-"#),
    );

    let progress = pb.clone();
    let report = prepared
        .execute(wait_for_interrupt(), move |event| match event {
            EngineEvent::Batch(snapshot) => {
                progress.set_position(snapshot.settled);
                progress.set_message(format!(
                    "{} :: ETA {} :: errors {}",
                    utils::format_speed(snapshot.speed),
                    utils::format_eta(snapshot.eta),
                    snapshot.errors
                ));
            }
            EngineEvent::Hit(record) => progress.println(render_hit(record)),
        })
        .await;
    pb.finish_and_clear();

    print_summary(&report);

    if let Some(path) = run.output.as_ref() {
        output::write_report(path, run.output_format, &report).await?;
        format_kv_line("Output", &path.display().to_string());
    }
    Ok(())
}

pub fn run_cli() -> Result<(), String> {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp => {
                print!("{}", render_custom_help());
                return Ok(());
            }
            ErrorKind::DisplayVersion => {
                let cmd = CliArgs::command();
                print!("{}", cmd.render_version());
                return Ok(());
            }
            _ => return Err(e.to_string()),
        },
    };

    let config_path = match args.config.as_deref() {
        Some(p) => Some(config::expand_tilde(p)),
        None => config::default_config_path(),
    };

    if args.init_config {
        let path = config_path.ok_or_else(|| "cannot determine home directory".to_string())?;
        config::ensure_default_config_file(&path)?;
        println!("config: {}", path.display());
        return Ok(());
    }

    let cfg = match config_path.as_ref() {
        Some(path) => config::load_config(path, args.config.is_none())?,
        None => ConfigFile::default(),
    };

    let run = build_run_config(args, cfg)?;
    init_logging(run.verbose);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to build runtime: {e}"))?;
    rt.block_on(run_async(run))
}

#[cfg(test)]
mod cli_tests {
    use super::*;

    fn parse(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["brutex"];
        argv.extend_from_slice(extra);
        CliArgs::parse_from(argv)
    }

    #[test]
    fn defaults_without_config() {
        let run = build_run_config(parse(&[]), ConfigFile::default()).unwrap();
        assert_eq!(run.options.concurrency, 500);
        assert_eq!(run.options.method, RequestMethod::Post);
        assert!(run.options.auto_stop);
        assert_eq!(run.output_format, OutputFormat::Json);
        let names: Vec<&str> = run.options.payloads.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["USER", "PASS"]);
    }

    #[test]
    fn cli_overrides_config() {
        let cfg = config::parse_config(
            r#"
url: http://from-config/
method: GET
concurrency: 10
timeout: 2.5
auto_stop: true
"#,
        )
        .unwrap();
        let run = build_run_config(
            parse(&["-u", "http://from-cli/", "-t", "3", "--no-auto-stop"]),
            cfg,
        )
        .unwrap();
        assert_eq!(run.options.url, "http://from-cli/");
        assert_eq!(run.options.method, RequestMethod::Get);
        assert_eq!(run.options.concurrency, 3);
        assert_eq!(run.options.timeout, Duration::from_millis(2500));
        assert!(!run.options.auto_stop);
    }

    #[test]
    fn dict_flag_replaces_named_slot_source() {
        let cfg = config::parse_config(
            r#"
payloads:
  PASS:
    type: list
    values: [a]
    processors: [md5]
"#,
        )
        .unwrap();
        let run = build_run_config(parse(&["-d", "/tmp/words.txt"]), cfg).unwrap();
        let slot = &run.options.payloads[0];
        assert!(matches!(slot.source, PayloadSource::Dictionary { .. }));
        assert_eq!(slot.pipeline.describe(), "md5");

        let run = build_run_config(
            parse(&["-d", "/tmp/users.txt", "--dict-slot", "USER"]),
            ConfigFile::default(),
        )
        .unwrap();
        let user = run
            .options
            .payloads
            .iter()
            .find(|s| s.name == "USER")
            .unwrap();
        assert!(matches!(user.source, PayloadSource::Dictionary { .. }));
    }

    #[test]
    fn headers_merge_case_insensitively() {
        let run = build_run_config(
            parse(&["-H", "user-agent: brutex-test", "-H", "X-Forwarded-For: 127.0.0.1"]),
            ConfigFile::default(),
        )
        .unwrap();
        let ua: Vec<_> = run
            .options
            .headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("user-agent"))
            .collect();
        assert_eq!(ua.len(), 1);
        assert_eq!(ua[0].1, "brutex-test");
        assert!(run.options.headers.iter().any(|(k, _)| k == "X-Forwarded-For"));
    }

    #[test]
    fn matching_flags_fill_criteria() {
        let run = build_run_config(
            parse(&["-s", "welcome", "-f", "nope", "--success-status", "302", "--no-smart"]),
            ConfigFile::default(),
        )
        .unwrap();
        let c = &run.options.criteria;
        assert_eq!(c.success_keywords, vec!["welcome"]);
        assert_eq!(c.fail_keywords, vec!["nope"]);
        assert_eq!(c.success_status, Some(302));
        assert!(!c.smart_mode);
    }

    #[test]
    fn output_format_is_inferred_from_extension() {
        let run = build_run_config(parse(&["-o", "hits.txt"]), ConfigFile::default()).unwrap();
        assert_eq!(run.output_format, OutputFormat::Text);
        let run = build_run_config(
            parse(&["-o", "hits.txt", "--output-format", "json"]),
            ConfigFile::default(),
        )
        .unwrap();
        assert_eq!(run.output_format, OutputFormat::Json);
    }

    #[test]
    fn data_flags_extend_the_template() {
        let run = build_run_config(
            parse(&["-D", "password={PASS}x", "-D", "captcha=1"]),
            ConfigFile::default(),
        )
        .unwrap();
        assert_eq!(
            run.options.data,
            vec![
                ("username".to_string(), "{USER}".to_string()),
                ("password".to_string(), "{PASS}x".to_string()),
                ("captcha".to_string(), "1".to_string()),
            ]
        );
    }
}
