use clap::{ArgAction, Parser};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "brutex",
    version,
    about = "concurrent HTTP credential brute-forcer for CTF targets",
    long_about = "brutex drives a login endpoint with every combination of the configured payload slots and reports the ones whose response stands out.\n\nExamples:\n  brutex -u http://target/login -d top1000.txt\n  brutex -u http://target/api/login -m JSON -t 200 --timeout 3 -s welcome\n  brutex --config ./challenge.yml -o results.json\n\nTip: run --init-config once and describe payload slots and processors in the config file."
)]
pub struct CliArgs {
    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        help_heading = "Output",
        help = "Increase log verbosity (-v, -vv)."
    )]
    pub verbose: u8,

    #[arg(
        long = "no-color",
        visible_alias = "nc",
        help_heading = "Output",
        help = "Disable colored output."
    )]
    pub no_color: bool,

    #[arg(
        short = 'o',
        long = "output",
        value_name = "FILE",
        help_heading = "Output",
        help = "Write results to a file."
    )]
    pub output: Option<String>,

    #[arg(
        long = "output-format",
        visible_alias = "of",
        value_name = "FORMAT",
        help_heading = "Output",
        help = "Result file format: json or text (default json)."
    )]
    pub output_format: Option<String>,

    #[arg(
        short = 'u',
        long = "url",
        value_name = "URL",
        help_heading = "Target",
        help = "Target URL."
    )]
    pub url: Option<String>,

    #[arg(
        short = 'm',
        long = "method",
        value_name = "METHOD",
        help_heading = "Target",
        help = "GET (query string), POST (form) or JSON (JSON body)."
    )]
    pub method: Option<String>,

    #[arg(
        short = 'D',
        long = "data",
        value_name = "FIELD=TEMPLATE",
        action = ArgAction::Append,
        help_heading = "Target",
        help = "Request field template, e.g. password={PASS} (repeatable)."
    )]
    pub data: Vec<String>,

    #[arg(
        short = 'H',
        long = "header",
        value_name = "HEADER",
        action = ArgAction::Append,
        help_heading = "HTTP",
        help = "Extra request header 'Key: Value' (repeatable)."
    )]
    pub header: Vec<String>,

    #[arg(
        short = 'b',
        long = "cookie",
        value_name = "NAME=VALUE",
        action = ArgAction::Append,
        help_heading = "HTTP",
        help = "Cookie sent with every request (repeatable)."
    )]
    pub cookie: Vec<String>,

    #[arg(
        short = 'x',
        long = "proxy",
        value_name = "URL",
        help_heading = "HTTP",
        help = "HTTP(S) proxy for all requests."
    )]
    pub proxy: Option<String>,

    #[arg(
        long = "follow-redirects",
        visible_alias = "fr",
        help_heading = "HTTP",
        help = "Follow redirects (up to 10 hops)."
    )]
    pub follow_redirects: bool,

    #[arg(
        short = 'd',
        long = "dict",
        value_name = "FILE",
        help_heading = "Payloads",
        help = "Dictionary file for the slot named by --dict-slot."
    )]
    pub dict: Option<String>,

    #[arg(
        long = "dict-slot",
        value_name = "SLOT",
        default_value = "PASS",
        help_heading = "Payloads",
        help = "Slot that --dict replaces."
    )]
    pub dict_slot: String,

    #[arg(
        short = 't',
        long = "threads",
        visible_alias = "concurrency",
        value_name = "N",
        help_heading = "Performance",
        help = "Maximum in-flight requests."
    )]
    pub threads: Option<usize>,

    #[arg(
        long = "timeout",
        value_name = "SECONDS",
        help_heading = "Performance",
        help = "Per-request timeout in seconds (fractions allowed)."
    )]
    pub timeout: Option<f64>,

    #[arg(
        long = "retries",
        value_name = "N",
        help_heading = "Performance",
        help = "Retries after a timeout or transport error."
    )]
    pub retries: Option<u32>,

    #[arg(
        long = "batch-size",
        visible_alias = "bs",
        value_name = "N",
        help_heading = "Performance",
        help = "Combinations dispatched per batch."
    )]
    pub batch_size: Option<usize>,

    #[arg(
        short = 'r',
        long = "rate",
        value_name = "RPS",
        help_heading = "Performance",
        help = "Request rate limit (requests per second)."
    )]
    pub rate: Option<u32>,

    #[arg(
        short = 's',
        long = "success",
        value_name = "KEYWORD",
        action = ArgAction::Append,
        help_heading = "Matching",
        help = "Success keyword (repeatable, case-insensitive)."
    )]
    pub success: Vec<String>,

    #[arg(
        short = 'f',
        long = "fail",
        value_name = "KEYWORD",
        action = ArgAction::Append,
        help_heading = "Matching",
        help = "Fail keyword, replaces the configured list (repeatable)."
    )]
    pub fail: Vec<String>,

    #[arg(
        long = "success-regex",
        value_name = "REGEX",
        help_heading = "Matching",
        help = "Case-insensitive regex marking success."
    )]
    pub success_regex: Option<String>,

    #[arg(
        long = "success-length",
        value_name = "N",
        help_heading = "Matching",
        help = "Response length marking success."
    )]
    pub success_length: Option<usize>,

    #[arg(
        long = "success-length-not",
        value_name = "N",
        help_heading = "Matching",
        help = "Any response length other than N marks success."
    )]
    pub success_length_not: Option<usize>,

    #[arg(
        long = "success-status",
        value_name = "CODE",
        help_heading = "Matching",
        help = "Status code marking success."
    )]
    pub success_status: Option<u16>,

    #[arg(
        long = "no-smart",
        help_heading = "Matching",
        help = "Disable baseline length detection."
    )]
    pub no_smart: bool,

    #[arg(
        long = "no-auto-stop",
        help_heading = "Matching",
        help = "Keep going after the first success."
    )]
    pub no_auto_stop: bool,

    #[arg(
        long = "flag-prefix",
        value_name = "PREFIX",
        action = ArgAction::Append,
        help_heading = "Matching",
        help = "Extra flag prefix to extract, e.g. DASCTF (repeatable)."
    )]
    pub flag_prefix: Vec<String>,

    #[arg(
        short = 'C',
        long = "config",
        value_name = "FILE",
        help_heading = "Config",
        help = "Path to config file (defaults to ~/.brutex/config.yml)."
    )]
    pub config: Option<String>,

    #[arg(
        long = "init-config",
        help_heading = "Config",
        help = "Write a default config file and exit."
    )]
    pub init_config: bool,
}
