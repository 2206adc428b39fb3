mod harness;
mod reports;
mod scenario;
mod tester;
mod util;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::fs::File;
use std::io::{BufWriter, Write, stdout};
use std::path::PathBuf;
use std::time::Instant;

use scenario::{expand_scenarios, find_scenario, list_scenarios};
use tester::{ReplayTester, ScenarioResult};
use util::{parse_seeds, split_csv};

#[derive(Debug, Parser)]
#[command(name = "gambit-tester", version = "0.1.0")]
#[command(about = "Scripted replay QA for the Harvest Gambit session sync core")]
struct Args {
    /// Scenarios to run (comma-separated; `smoke` and `all` expand to groups)
    #[arg(long, default_value = "smoke")]
    scenarios: String,

    /// List all available scenarios and exit
    #[arg(long)]
    list_scenarios: bool,

    /// Seeds to run (comma-separated)
    #[arg(long, default_value = "1337")]
    seeds: String,

    /// Number of replays per scenario and seed
    #[arg(long, default_value_t = 3)]
    iterations: usize,

    /// Output report format
    #[arg(long, default_value = "console")]
    #[arg(value_parser = ["json", "markdown", "console"])]
    report: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Optional path to write the report output instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Directory for failure artifacts (state, sent frames, error chain)
    #[arg(long)]
    artifacts_dir: Option<String>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if maybe_list_scenarios(&args)? {
        return Ok(());
    }

    announce_banner();

    let start_time = Instant::now();
    let scenarios = expand_scenarios(&split_csv(&args.scenarios));
    let seeds = parse_seeds(&args.seeds)?;

    let results = run_scenarios(&args, &scenarios, &seeds);

    write_reports(&args, &results, start_time)?;

    if results.iter().any(|r| !r.passed) {
        std::process::exit(1);
    }

    Ok(())
}

fn maybe_list_scenarios(args: &Args) -> Result<bool> {
    if !args.list_scenarios {
        return Ok(false);
    }
    let mut output_target = OutputTarget::new(args.output.clone())?;
    writeln!(output_target.writer(), "Available scenarios:")?;
    for (key, description) in list_scenarios() {
        writeln!(output_target.writer(), "  {key:25} - {description}")?;
    }
    output_target.flush_inner()?;
    Ok(true)
}

fn announce_banner() {
    println!("{}", "♟️  Harvest Gambit Replay Tester".bright_cyan().bold());
    println!("{}", "================================".cyan());
}

fn run_scenarios(args: &Args, scenarios: &[String], seeds: &[u64]) -> Vec<ScenarioResult> {
    println!("{}", "🧠 Running Replays".bright_yellow().bold());
    println!("{}", "-".repeat(30).yellow());

    let mut tester = ReplayTester::new(args.verbose);
    if let Some(dir) = &args.artifacts_dir {
        tester = tester.with_artifacts(dir.clone());
    }

    let mut results = Vec::new();
    for name in scenarios {
        if let Some(scenario) = find_scenario(name) {
            results.extend(tester.run_scenario(&scenario, seeds, args.iterations));
        } else {
            eprintln!("⚠️  Unknown scenario: {}", name.yellow());
        }
    }
    results
}

fn write_reports(args: &Args, results: &[ScenarioResult], start_time: Instant) -> Result<()> {
    let mut output_target = OutputTarget::new(args.output.clone())?;

    match args.report.as_str() {
        "json" => {
            if results.is_empty() {
                writeln!(&mut output_target, "[]")?;
            } else {
                reports::generate_json_report(&mut output_target, results)?;
            }
        }
        "markdown" => {
            if results.is_empty() {
                writeln!(
                    &mut output_target,
                    "# Harvest Gambit Replay Results\n\n_No scenarios executed._"
                )?;
            } else {
                reports::generate_markdown_report(&mut output_target, results)?;
            }
        }
        _ => {
            if results.is_empty() {
                writeln!(&mut output_target, "No scenarios executed.")?;
            } else {
                reports::generate_console_report(
                    &mut output_target,
                    results,
                    start_time.elapsed(),
                )?;
            }
        }
    }

    if args.report != "json" {
        let duration = start_time.elapsed();
        writeln!(&mut output_target)?;
        writeln!(&mut output_target, "🏁 Total time: {duration:?}")?;
    }
    output_target.flush_inner()?;
    Ok(())
}

enum OutputTarget {
    Stdout(BufWriter<std::io::Stdout>),
    File(BufWriter<File>),
}

impl OutputTarget {
    fn new(path: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = path {
            let file = File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            Ok(Self::File(BufWriter::new(file)))
        } else {
            Ok(Self::Stdout(BufWriter::new(stdout())))
        }
    }

    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Self::Stdout(w) => w,
            Self::File(w) => w,
        }
    }

    fn flush_inner(&mut self) -> std::io::Result<()> {
        match self {
            Self::Stdout(w) => w.flush(),
            Self::File(w) => w.flush(),
        }
    }
}

impl Write for OutputTarget {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flush_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn base_args(output: Option<PathBuf>) -> Args {
        Args {
            scenarios: "smoke".to_string(),
            list_scenarios: false,
            seeds: "1337".to_string(),
            iterations: 1,
            report: "json".to_string(),
            verbose: false,
            output,
            artifacts_dir: None,
        }
    }

    fn temp_file(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "gambit-main-{label}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ))
    }

    #[test]
    fn json_report_is_plain_json() {
        let path = temp_file("json");
        let args = base_args(Some(path.clone()));
        let results = vec![ScenarioResult {
            scenario_name: "smoke-turn".to_string(),
            seed: 1337,
            passed: true,
            iterations_run: 1,
            successful_iterations: 1,
            steps: 4,
            failures: Vec::new(),
            average_duration: Duration::from_millis(1),
        }];
        write_reports(&args, &results, Instant::now()).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed[0]["scenario_name"], "smoke-turn");
    }

    #[test]
    fn empty_markdown_report_says_so() {
        let path = temp_file("md");
        let mut args = base_args(Some(path.clone()));
        args.report = "markdown".to_string();
        write_reports(&args, &[], Instant::now()).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("_No scenarios executed._"));
        assert!(text.contains("Total time"));
    }

    #[test]
    fn smoke_group_runs_clean() {
        let args = base_args(None);
        let scenarios = expand_scenarios(&split_csv(&args.scenarios));
        let results = run_scenarios(&args, &scenarios, &[1, 2]);
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.passed), "{results:#?}");
    }
}
