use colored::Colorize;

fn main() {
    if let Err(e) = brutex::app::run_cli() {
        eprintln!("{} {e}", "error:".red().bold());
        std::process::exit(1);
    }
}
