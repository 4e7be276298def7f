mod common;
mod live;
mod logic;

use anyhow::{Context, Result, ensure};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use crumbforge_game::EconomyConfig;
use std::fs::File;
use std::io::{BufWriter, Write, stdout};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use common::scenario::{all_scenario_keys, get_scenario, list_scenarios};
use common::{parse_seeds, split_csv};
use live::{LiveOptions, run_live_sessions};
use logic::{LogicTester, ScenarioResult};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TestMode {
    /// Deterministic economy scenarios (fast, no timers)
    Logic,
    /// A real tokio session against a flaky simulated backend
    Live,
    /// Run both logic and live tests
    Both,
}

#[derive(Debug, Parser)]
#[command(name = "crumbforge-tester", version = "0.1.0")]
#[command(about = "Automated QA testing for the Crumbforge economy engine")]
struct Args {
    /// Test mode: logic (fast), live (real timers), or both
    #[arg(long, value_enum, default_value_t = TestMode::Logic)]
    mode: TestMode,

    /// Scenarios to run (comma-separated, or "all")
    #[arg(long, default_value = "smoke")]
    scenarios: String,

    /// List all available scenarios and exit
    #[arg(long)]
    list_scenarios: bool,

    /// Seeds to run (comma-separated)
    #[arg(long, default_value = "1337")]
    seeds: String,

    /// Number of iterations per scenario (logic mode only)
    #[arg(long, default_value_t = 10)]
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

    // Live-session options
    /// How long each live session runs, in seconds
    #[arg(long, default_value_t = 5)]
    live_secs: u64,

    /// Probability that a simulated backend call fails (0.0 - 1.0)
    #[arg(long, default_value_t = 0.1)]
    failure_rate: f64,

    /// Mean simulated backend latency in milliseconds
    #[arg(long, default_value_t = 150)]
    latency_ms: u64,

    /// Directory backing the local handoff cache
    #[arg(long, default_value = "target/crumbforge-cache")]
    cache_dir: PathBuf,

    /// Economy config JSON (timer cadences, cache key prefix)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if maybe_list_scenarios(&args)? {
        return Ok(());
    }

    announce_banner();

    let start_time = Instant::now();
    let scenarios = expand_scenarios(&args.scenarios);
    let seeds = parse_seeds(&split_csv(&args.seeds))?;
    ensure!(!seeds.is_empty(), "at least one seed is required");

    let mut all_results = run_logic_scenarios(&args, &scenarios, &seeds).await;
    all_results.extend(run_live_mode(&args, &seeds).await?);

    write_reports(&args, &all_results, start_time)?;

    if all_results.iter().any(|r| !r.passed) {
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
        writeln!(output_target.writer(), "  {key:20} - {description}")?;
    }
    output_target.flush_inner()?;
    Ok(true)
}

fn announce_banner() {
    println!("{}", "🍪 Crumbforge Automated Tester".bright_cyan().bold());
    println!("{}", "================================".cyan());
}

fn expand_scenarios(scenarios_arg: &str) -> Vec<String> {
    let mut scenarios = split_csv(scenarios_arg);
    if scenarios.iter().any(|s| s == "all") {
        scenarios.retain(|s| s != "all");
        for key in all_scenario_keys() {
            if !scenarios.iter().any(|s| s == key) {
                scenarios.push(key.to_string());
            }
        }
    }
    scenarios
}

fn load_config(path: Option<&PathBuf>) -> Result<EconomyConfig> {
    let Some(path) = path else {
        return Ok(EconomyConfig::default());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    EconomyConfig::from_json(&json).with_context(|| format!("invalid config {}", path.display()))
}

async fn run_logic_scenarios(
    args: &Args,
    scenarios: &[String],
    seeds: &[u64],
) -> Vec<ScenarioResult> {
    let mut results: Vec<ScenarioResult> = Vec::new();
    if !matches!(args.mode, TestMode::Logic | TestMode::Both) {
        return results;
    }

    println!("{}", "🧠 Running Logic Tests".bright_yellow().bold());
    println!("{}", "-".repeat(30).yellow());

    let logic_tester = LogicTester::new(args.verbose);

    for scenario_name in scenarios {
        if let Some(scenario) = get_scenario(scenario_name) {
            let scenario_results = logic_tester
                .run_scenario(scenario, seeds, args.iterations)
                .await;
            results.extend(scenario_results);
        } else {
            eprintln!("⚠️  Unknown scenario: {}", scenario_name.yellow());
        }
    }

    results
}

async fn run_live_mode(args: &Args, seeds: &[u64]) -> Result<Vec<ScenarioResult>> {
    if !matches!(args.mode, TestMode::Live | TestMode::Both) {
        return Ok(Vec::new());
    }
    ensure!(
        (0.0..=1.0).contains(&args.failure_rate),
        "--failure-rate must be between 0 and 1 (got {})",
        args.failure_rate
    );

    println!("{}", "🔌 Running Live Sessions".bright_blue().bold());
    println!("{}", "-".repeat(30).blue());

    let options = LiveOptions {
        duration: Duration::from_secs(args.live_secs),
        failure_rate: args.failure_rate,
        latency: Duration::from_millis(args.latency_ms),
        cache_dir: args.cache_dir.clone(),
        config: load_config(args.config.as_ref())?,
        verbose: args.verbose,
    };
    Ok(run_live_sessions(&options, seeds).await)
}

fn write_reports(args: &Args, results: &[ScenarioResult], start_time: Instant) -> Result<()> {
    let mut output_target = OutputTarget::new(args.output.clone())?;

    match args.report.as_str() {
        "json" => logic::reports::generate_json_report(&mut output_target, results)?,
        "markdown" => {
            if results.is_empty() {
                writeln!(
                    &mut output_target,
                    "# Crumbforge Test Results\n\n_No scenarios executed._"
                )?;
            } else {
                logic::reports::generate_markdown_report(&mut output_target, results)?;
            }
        }
        _ => {
            if results.is_empty() {
                writeln!(&mut output_target, "No scenarios executed.")?;
            } else {
                logic::reports::generate_console_report(
                    &mut output_target,
                    results,
                    start_time.elapsed(),
                )?;
            }
            writeln!(&mut output_target)?;
            writeln!(
                &mut output_target,
                "🏁 Total time: {:?}",
                start_time.elapsed()
            )?;
        }
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

    fn base_args() -> Args {
        Args {
            mode: TestMode::Logic,
            scenarios: "smoke".to_string(),
            list_scenarios: false,
            seeds: "1337".to_string(),
            iterations: 1,
            report: "json".to_string(),
            verbose: false,
            output: None,
            live_secs: 1,
            failure_rate: 0.0,
            latency_ms: 0,
            cache_dir: std::env::temp_dir().join("crumbforge-main-tests"),
            config: None,
        }
    }

    #[test]
    fn expand_all_adds_every_scenario_once() {
        let scenarios = expand_scenarios("reload-race,all");
        assert_eq!(scenarios.len(), all_scenario_keys().count());
        assert_eq!(scenarios[0], "reload-race");
        assert_eq!(
            scenarios.iter().filter(|s| s.as_str() == "reload-race").count(),
            1
        );
    }

    #[test]
    fn config_file_overrides_cadences() {
        let path = std::env::temp_dir().join(format!(
            "crumbforge-config-{}.json",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ));
        std::fs::write(&path, r#"{"autosave_interval_ms": 500}"#).unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.autosave_interval(), Duration::from_millis(500));
        assert_eq!(config.tick_interval_ms, EconomyConfig::default().tick_interval_ms);

        std::fs::write(&path, r#"{"tick_interval_ms": 0}"#).unwrap();
        assert!(load_config(Some(&path)).is_err());
        assert_eq!(load_config(None).unwrap(), EconomyConfig::default());
    }

    #[tokio::test]
    async fn logic_mode_skips_live_sessions() {
        let args = base_args();
        assert!(run_live_mode(&args, &[1]).await.unwrap().is_empty());
        let results = run_logic_scenarios(&args, &expand_scenarios("smoke,bogus"), &[1]).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].passed);
    }

    #[tokio::test]
    async fn live_mode_rejects_out_of_range_failure_rate() {
        let mut args = base_args();
        args.mode = TestMode::Live;
        args.failure_rate = 1.5;
        assert!(run_live_mode(&args, &[1]).await.is_err());
    }

    #[test]
    fn write_reports_to_file() {
        let mut args = base_args();
        let path = std::env::temp_dir().join(format!(
            "crumbforge-report-{}.md",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ));
        args.output = Some(path.clone());
        args.report = "markdown".to_string();
        write_reports(&args, &[], Instant::now()).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("_No scenarios executed._"));
    }
}
