//! Adversarial Attacks Explorer CLI
//!
//! Usage:
//!   advex <COMMAND> [OPTIONS]
//!
//! Example:
//!   advex generate cat.jpg --attack fgsm --epsilon 0.03 --out results/
//!   advex compare-defenses --attack pgd --epsilon 0.05

use advex::client::{ExplorerBackend, PrecomputedChart, SAMPLE_IMAGES};
use advex::session::{AttackSession, DefenseSession, LeaderboardSession, Phase};
use advex::{ExplorerConfig, HttpBackend, ImagePayload};
use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const PREVIEW_MAX_WIDTH: u32 = 800;
const PREVIEW_MAX_HEIGHT: u32 = 600;

fn print_usage() {
    eprintln!(
        r#"
{} - Explore adversarial attacks and defenses from the command line

{}
    advex <COMMAND> [OPTIONS]

{}
    attacks                     List attack types served by the backend
    defenses                    List defense models served by the backend
    generate <IMAGE>            Generate one adversarial example
    compare-attacks <IMAGE>     Run every attack against one image
    evaluate                    Evaluate one defense model
    compare-defenses            Compare all defense models
    charts [NAME]               Download precomputed charts

{}
    -c, --config <FILE>         TOML config file (default: advex.toml if present)
    -b, --base-url <URL>        Backend base URL (overrides config)
    -a, --attack <NAME>         Attack type (default: fgsm / pgd for defenses)
    -m, --model <NAME>          Defense model file name
    -e, --epsilon <VALUE>       Perturbation budget (clamped per command)
    -o, --out <DIR>             Directory for downloaded images (default: .)
    -s, --sample <N>            Use backend sample image 1-3 instead of a file
    --resize                    Downscale the upload to 800x600 before sending
    --stats                     Print per-endpoint request stats on exit
    -v, --verbose               Debug logging
    -h, --help                  Print this help message

{}
    advex attacks
    advex generate cat.jpg -a pgd -e 0.05 -o results/
    advex compare-attacks --sample 1
    advex evaluate -m best_adv_pgd_model.pth -a pgd -e 0.03
    advex charts robustness_overview
"#,
        "advex".bold(),
        "USAGE:".bold(),
        "COMMANDS:".bold(),
        "OPTIONS:".bold(),
        "EXAMPLES:".bold(),
    );
}

struct CliArgs {
    command: String,
    positional: Option<String>,
    config: Option<PathBuf>,
    base_url: Option<String>,
    attack: Option<String>,
    model: Option<String>,
    epsilon: Option<f64>,
    out_dir: PathBuf,
    sample: Option<usize>,
    resize: bool,
    stats: bool,
    verbose: bool,
}

fn parse_args() -> Result<CliArgs> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.is_empty() || args.iter().any(|a| a == "-h" || a == "--help") {
        print_usage();
        std::process::exit(if args.is_empty() { 1 } else { 0 });
    }

    let mut parsed = CliArgs {
        command: args[0].clone(),
        positional: None,
        config: None,
        base_url: None,
        attack: None,
        model: None,
        epsilon: None,
        out_dir: PathBuf::from("."),
        sample: None,
        resize: false,
        stats: false,
        verbose: false,
    };

    let mut i = 1;
    while i < args.len() {
        let arg = &args[i];
        let take_value = |i: &mut usize| -> Result<String> {
            *i += 1;
            args.get(*i)
                .cloned()
                .with_context(|| format!("{arg} requires a value"))
        };

        match arg.as_str() {
            "-c" | "--config" => parsed.config = Some(PathBuf::from(take_value(&mut i)?)),
            "-b" | "--base-url" => parsed.base_url = Some(take_value(&mut i)?),
            "-a" | "--attack" => parsed.attack = Some(take_value(&mut i)?),
            "-m" | "--model" => parsed.model = Some(take_value(&mut i)?),
            "-e" | "--epsilon" => {
                let value = take_value(&mut i)?;
                parsed.epsilon =
                    Some(value.parse().with_context(|| format!("bad epsilon: {value}"))?);
            }
            "-o" | "--out" => parsed.out_dir = PathBuf::from(take_value(&mut i)?),
            "-s" | "--sample" => {
                let value = take_value(&mut i)?;
                let n: usize = value.parse().with_context(|| format!("bad sample: {value}"))?;
                if n == 0 || n > SAMPLE_IMAGES.len() {
                    bail!("sample must be between 1 and {}", SAMPLE_IMAGES.len());
                }
                parsed.sample = Some(n);
            }
            "--resize" => parsed.resize = true,
            "--stats" => parsed.stats = true,
            "-v" | "--verbose" => parsed.verbose = true,
            other if !other.starts_with('-') && parsed.positional.is_none() => {
                parsed.positional = Some(other.to_string());
            }
            other => bail!("unknown argument: {other}"),
        }
        i += 1;
    }

    Ok(parsed)
}

fn load_config(args: &CliArgs) -> Result<ExplorerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        }
        None => match std::fs::read_to_string("advex.toml") {
            Ok(contents) => toml::from_str(&contents).context("Failed to parse advex.toml")?,
            Err(_) => ExplorerConfig::default(),
        },
    };

    if let Some(base_url) = &args.base_url {
        config.base_url = base_url.clone();
    }
    Ok(config)
}

/// Backend plots can exceed the upload size cap, so decode them directly
/// instead of routing through the upload normalizer.
fn save_base64_image(data: &str, path: &Path) -> Result<()> {
    let raw = data.split_once(',').map(|(_, d)| d).unwrap_or(data);
    let bytes = BASE64
        .decode(raw)
        .with_context(|| format!("backend returned an undecodable image for {}", path.display()))?;
    std::fs::write(path, bytes)?;
    println!("  wrote {}", path.display().to_string().cyan());
    Ok(())
}

/// Load the input image: either a local file or one of the backend samples.
async fn load_input(session: &mut AttackSession, args: &CliArgs) -> Result<()> {
    if let Some(n) = args.sample {
        session
            .load_sample(SAMPLE_IMAGES[n - 1])
            .await
            .with_context(|| format!("failed to fetch sample {n}"))?;
        return Ok(());
    }

    let path = args
        .positional
        .as_ref()
        .context("an image file (or --sample <N>) is required")?;
    let mut payload = ImagePayload::from_file(path)?;
    if args.resize {
        payload = payload.resize(PREVIEW_MAX_WIDTH, PREVIEW_MAX_HEIGHT)?;
    }
    info!(bytes = payload.byte_len(), mime = payload.mime(), "Loaded input image");
    session.set_image(payload);
    Ok(())
}

fn print_metric_row(label: &str, value: String) {
    println!("  {:<22} {}", label.bold(), value);
}

async fn cmd_generate(backend: Arc<HttpBackend>, config: &ExplorerConfig, args: &CliArgs) -> Result<()> {
    let mut session = AttackSession::new(
        Arc::clone(&backend) as Arc<dyn ExplorerBackend>,
        config.fallback_attacks.clone(),
    );
    session.refresh_catalog().await;
    load_input(&mut session, args).await?;

    if let Some(attack) = &args.attack {
        session.set_attack_type(attack)?;
    }
    if let Some(epsilon) = args.epsilon {
        session.set_epsilon(epsilon);
    }

    println!(
        "Generating {} adversarial example (epsilon = {})...",
        session.attack_type().to_uppercase().yellow(),
        session.epsilon()
    );
    session.generate().await?;

    match session.generation() {
        Phase::Success(result) => {
            let flipped = if result.success {
                "yes".green()
            } else {
                "no".red()
            };
            print_metric_row(
                "original prediction",
                format!("{} ({:.2})", result.original_pred, result.original_conf),
            );
            print_metric_row(
                "adversarial prediction",
                format!("{} ({:.2})", result.adv_pred, result.adv_conf),
            );
            print_metric_row("attack succeeded", flipped.to_string());
            print_metric_row("L2 distance", format!("{:.4}", result.l2_dist));
            print_metric_row("Linf distance", format!("{:.4}", result.linf_dist));

            std::fs::create_dir_all(&args.out_dir)?;
            save_base64_image(&result.original_image, &args.out_dir.join("original.png"))?;
            save_base64_image(
                &result.adversarial_image,
                &args.out_dir.join("adversarial.png"),
            )?;
            save_base64_image(
                &result.comparison_plot,
                &args.out_dir.join("comparison_plot.png"),
            )?;
            Ok(())
        }
        Phase::Failed(message) => bail!("generation failed: {message}"),
        _ => bail!("generation did not complete"),
    }
}

async fn cmd_compare_attacks(
    backend: Arc<HttpBackend>,
    config: &ExplorerConfig,
    args: &CliArgs,
) -> Result<()> {
    let mut session = AttackSession::new(
        Arc::clone(&backend) as Arc<dyn ExplorerBackend>,
        config.fallback_attacks.clone(),
    );
    session.refresh_catalog().await;
    load_input(&mut session, args).await?;
    if let Some(epsilon) = args.epsilon {
        session.set_epsilon(epsilon);
    }

    println!(
        "Comparing attacks [{}] (epsilon = {})...",
        session.attacks().join(", ").yellow(),
        session.epsilon()
    );
    session.compare().await?;

    match session.comparison() {
        Phase::Success(result) => {
            // Iterate in request order; the backend map is unordered.
            for attack in session.attacks() {
                let Some(record) = result.attack_results.get(attack) else {
                    continue;
                };
                let flipped = if record.success { "flipped".green() } else { "held".red() };
                println!(
                    "  {:<10} {} -> {} ({})  L2 {:.4}  Linf {:.4}",
                    attack.to_uppercase().bold(),
                    record.original_pred,
                    record.adv_pred,
                    flipped,
                    record.l2_dist,
                    record.linf_dist,
                );
            }
            std::fs::create_dir_all(&args.out_dir)?;
            save_base64_image(
                &result.comparison_plot,
                &args.out_dir.join("attack_comparison.png"),
            )?;
            save_base64_image(
                &result.confidence_plot,
                &args.out_dir.join("confidence_comparison.png"),
            )?;
            Ok(())
        }
        Phase::Failed(message) => bail!("comparison failed: {message}"),
        _ => bail!("comparison did not complete"),
    }
}

async fn cmd_evaluate(backend: Arc<HttpBackend>, config: &ExplorerConfig, args: &CliArgs) -> Result<()> {
    let mut session = DefenseSession::new(
        Arc::clone(&backend) as Arc<dyn ExplorerBackend>,
        config.fallback_defenses.clone(),
    );
    session.refresh_catalog().await;

    if let Some(model) = &args.model {
        session.set_model(model)?;
    }
    if let Some(attack) = &args.attack {
        session.set_attack_type(attack);
    }
    if let Some(epsilon) = args.epsilon {
        session.set_epsilon(epsilon);
    }

    println!(
        "Evaluating {} under {} (epsilon = {})...",
        session.model_name().yellow(),
        session.attack_type().to_uppercase(),
        session.epsilon()
    );
    session.evaluate().await;

    match session.evaluation() {
        Phase::Success(result) => {
            print_metric_row("clean accuracy", format!("{:.2}%", result.clean_accuracy * 100.0));
            print_metric_row("adversarial accuracy", format!("{:.2}%", result.adv_accuracy * 100.0));
            std::fs::create_dir_all(&args.out_dir)?;
            for (i, plot) in result.example_plots.iter().enumerate() {
                save_base64_image(plot, &args.out_dir.join(format!("example_plot_{i}.png")))?;
            }
            Ok(())
        }
        Phase::Failed(message) => bail!("evaluation failed: {message}"),
        _ => bail!("evaluation did not complete"),
    }
}

async fn cmd_compare_defenses(
    backend: Arc<HttpBackend>,
    config: &ExplorerConfig,
    args: &CliArgs,
) -> Result<()> {
    let mut session = DefenseSession::new(
        Arc::clone(&backend) as Arc<dyn ExplorerBackend>,
        config.fallback_defenses.clone(),
    );
    session.refresh_catalog().await;

    if let Some(attack) = &args.attack {
        session.set_attack_type(attack);
    }
    if let Some(epsilon) = args.epsilon {
        session.set_epsilon(epsilon);
    }

    println!(
        "Comparing {} models under {} (epsilon = {})...",
        session.models().len(),
        session.attack_type().to_uppercase(),
        session.epsilon()
    );
    session.compare().await;

    match session.comparison() {
        Phase::Success(result) => {
            println!(
                "  {:<36} {:>8} {:>8} {:>8}",
                "model".bold(),
                "clean".bold(),
                "adv".bold(),
                "ratio".bold()
            );
            for model in session.models() {
                let Some(score) = result.model_results.get(model) else {
                    continue;
                };
                println!(
                    "  {:<36} {:>7.2}% {:>7.2}% {:>8.3}",
                    model,
                    score.clean_accuracy * 100.0,
                    score.adv_accuracy * 100.0,
                    score.robustness_ratio,
                );
            }
            std::fs::create_dir_all(&args.out_dir)?;
            save_base64_image(
                &result.robustness_bar_chart,
                &args.out_dir.join("robustness_bar_chart.png"),
            )?;
            save_base64_image(
                &result.robustness_by_class,
                &args.out_dir.join("robustness_by_class.png"),
            )?;
            save_base64_image(&result.feature_maps, &args.out_dir.join("feature_maps.png"))?;
            Ok(())
        }
        Phase::Failed(message) => bail!("comparison failed: {message}"),
        _ => bail!("comparison did not complete"),
    }
}

async fn cmd_charts(backend: Arc<HttpBackend>, args: &CliArgs) -> Result<()> {
    std::fs::create_dir_all(&args.out_dir)?;

    if let Some(name) = &args.positional {
        let chart: PrecomputedChart = name.parse().map_err(anyhow::Error::msg)?;
        let bytes = backend.fetch_precomputed(chart).await?;
        let path = args.out_dir.join(format!("{}.png", chart.as_str()));
        std::fs::write(&path, bytes)?;
        println!("  wrote {}", path.display().to_string().cyan());
        return Ok(());
    }

    let mut session = LeaderboardSession::new(Arc::clone(&backend) as Arc<dyn ExplorerBackend>);
    session.load().await;
    match session.charts() {
        Phase::Success(charts) => {
            for (chart, bytes) in charts {
                let path = args.out_dir.join(format!("{}.png", chart.as_str()));
                std::fs::write(&path, bytes)?;
                println!("  wrote {}", path.display().to_string().cyan());
            }
            println!("Downloaded {} charts", charts.len());
            Ok(())
        }
        Phase::Failed(message) => bail!("chart download failed: {message}"),
        _ => bail!("chart download did not complete"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;

    let level = if args.verbose { Level::DEBUG } else { Level::WARN };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(&args)?;
    let backend = Arc::new(HttpBackend::from_config(&config));
    info!(base_url = backend.base_url(), "Using backend");

    let result = match args.command.as_str() {
        "attacks" => {
            let attacks = backend.list_attacks().await?;
            println!("{}", "Available attacks:".bold());
            for attack in attacks {
                println!("  {attack}");
            }
            Ok(())
        }
        "defenses" => {
            let defenses = backend.list_defenses().await?;
            println!("{}", "Available defense models:".bold());
            for model in defenses {
                println!("  {model}");
            }
            Ok(())
        }
        "generate" => cmd_generate(Arc::clone(&backend), &config, &args).await,
        "compare-attacks" => cmd_compare_attacks(Arc::clone(&backend), &config, &args).await,
        "evaluate" => cmd_evaluate(Arc::clone(&backend), &config, &args).await,
        "compare-defenses" => cmd_compare_defenses(Arc::clone(&backend), &config, &args).await,
        "charts" => cmd_charts(Arc::clone(&backend), &args).await,
        other => {
            print_usage();
            bail!("unknown command: {other}");
        }
    };

    if args.stats {
        println!("\n{}", "Request stats:".bold());
        for (endpoint, requests, successes, failures, mean_ms) in backend.stats().snapshot() {
            println!(
                "  {:<22} {} requests, {} ok, {} failed, mean {} ms",
                endpoint, requests, successes, failures, mean_ms
            );
        }
    }

    result
}
