use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use miette::{IntoDiagnostic, Result};

use prepdiff_compare::{Collector, MarkdownSink, RunConfig, RunSummary, TextSink};
use prepdiff_core::{OutputFormat, PrepdiffConfig, CONFIG_FILE_NAME};
use prepdiff_dataset::fetch::Retriever;
use prepdiff_dataset::{DataladRetriever, DryRunRetriever, FetchOptions, FetchSummary};

#[derive(Parser)]
#[command(
    name = "prepdiff",
    version,
    about = "Compare preprocessing outputs and fetch task sessions",
    long_about = "prepdiff quantifies what an optional preprocessing step changed.\n\n\
                   It compares two output trees file by file (NIfTI volumes and TSV tables),\n\
                   finds the sessions in which subjects performed a task, and fetches\n\
                   those sessions from a DataLad dataset.\n\n\
                   Examples:\n  \
                     prepdiff compare --root-a no_sdc/sub-S01 --root-b sdc/sub-S01 --paths-file files.txt\n  \
                     prepdiff sessions --dataset /data/ds004892 --task TheSecretNumber\n  \
                     prepdiff fetch --dataset /data/ds004892 --dry-run\n  \
                     prepdiff init                 Create a .prepdiff.toml config file"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (default: .prepdiff.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for command results.\n\n\
                       Formats:\n  \
                         text      Human-readable report blocks (default)\n  \
                         json      Machine-readable JSON with camelCase keys\n  \
                         markdown  GitHub-flavored Markdown"
    )]
    format: OutputFormat,

    /// Enable debug logging (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    verbose: bool,

    /// When to use colors
    #[arg(long, global = true, default_value = "auto")]
    color: ColorChoice,
}

#[derive(Subcommand)]
enum Command {
    /// Compare the same files under two output roots
    #[command(long_about = "Compare the same files under two output roots.\n\n\
        Volumes (.nii, .nii.gz) are compared voxel by voxel; tables (.tsv) column by\n\
        column with a numeric tolerance. A file that fails to load is reported and\n\
        the remaining files are still compared.\n\n\
        Exit codes: 0 no differences, 1 differences found, 2 a file failed to load.\n\n\
        Examples:\n  prepdiff compare --root-a run1 --root-b run2 ses-1/anat/T1w.nii.gz\n  \
        PREPDIFF_ROOT_A=run1 PREPDIFF_ROOT_B=run2 prepdiff compare --paths-file files.txt")]
    Compare {
        /// First output root (e.g. the run without SDC)
        #[arg(long, env = "PREPDIFF_ROOT_A")]
        root_a: Option<PathBuf>,

        /// Second output root (e.g. the run with SDC)
        #[arg(long, env = "PREPDIFF_ROOT_B")]
        root_b: Option<PathBuf>,

        /// Relative paths to compare (default: [compare].paths from config)
        paths: Vec<String>,

        /// Read relative paths from a file, one per line
        #[arg(long)]
        paths_file: Option<PathBuf>,

        /// Relative tolerance for numeric table columns
        #[arg(long)]
        rtol: Option<f64>,

        /// Absolute tolerance for numeric table columns
        #[arg(long)]
        atol: Option<f64>,
    },
    /// Find the first session in which each subject performed a task
    #[command(long_about = "Find the first session in which each subject performed a task.\n\n\
        Reads sub-*/ses-*/sub-<S>_ses-<N>_scans.tsv and looks for task-<TASK>_bold.\n\
        Writes a subject,session CSV for 'prepdiff fetch'.\n\n\
        Example:\n  prepdiff sessions --dataset /data/ds004892 --output secret_number_sessions.csv")]
    Sessions {
        /// Dataset root
        #[arg(long, env = "PREPDIFF_DATASET")]
        dataset: Option<PathBuf>,

        /// Task label (default: [dataset].task)
        #[arg(long)]
        task: Option<String>,

        /// Glob for subject directories (default: sub-*)
        #[arg(long)]
        subject_glob: Option<String>,

        /// CSV to write (default: [dataset].sessions_file)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Fetch task, events, fieldmap, and anatomical files for each session
    #[command(long_about = "Fetch the files of each session listed in a sessions CSV.\n\n\
        For every subject,session row, runs 'datalad get' on the task's functional\n\
        runs and events, the session's fieldmaps, and the anatomical session.\n\
        Failed retrievals are retried, reported, and do not stop the batch.\n\n\
        Examples:\n  prepdiff fetch --dataset /data/ds004892\n  prepdiff fetch --dataset /data/ds004892 --dry-run")]
    Fetch {
        /// Dataset root
        #[arg(long, env = "PREPDIFF_DATASET")]
        dataset: Option<PathBuf>,

        /// Sessions CSV (default: [dataset].sessions_file)
        #[arg(long)]
        sessions: Option<PathBuf>,

        /// Task label (default: [dataset].task)
        #[arg(long)]
        task: Option<String>,

        /// Session holding the anatomical images (default: 1)
        #[arg(long)]
        anat_session: Option<String>,

        /// Extra attempts for a failed retrieval (default: 2)
        #[arg(long)]
        retries: Option<u32>,

        /// Print the commands instead of running them
        #[arg(long)]
        dry_run: bool,
    },
    /// Create a default .prepdiff.toml configuration file
    #[command(long_about = "Create a default .prepdiff.toml configuration file.\n\n\
        Generates a commented-out template with all available options.\n\
        Fails if .prepdiff.toml already exists.")]
    Init,
    /// Generate shell completion scripts
    #[command(hide = true)]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Clone, PartialEq, Eq, ValueEnum)]
enum ColorChoice {
    /// Auto-detect based on terminal
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

fn print_welcome(use_color: bool) {
    let version = env!("CARGO_PKG_VERSION");

    if use_color {
        println!("\x1b[1mprepdiff\x1b[0m v{version}: what did the preprocessing step change?\n");
        println!("Commands:");
        println!("  \x1b[32mcompare\x1b[0m   Compare files under two output roots");
        println!("  \x1b[32msessions\x1b[0m  Find the session each subject performed a task in");
        println!("  \x1b[32mfetch\x1b[0m     Fetch those sessions with datalad get");
        println!("  \x1b[32minit\x1b[0m      Create default configuration\n");
    } else {
        println!("prepdiff v{version}: what did the preprocessing step change?\n");
        println!("Commands:");
        println!("  compare   Compare files under two output roots");
        println!("  sessions  Find the session each subject performed a task in");
        println!("  fetch     Fetch those sessions with datalad get");
        println!("  init      Create default configuration\n");
    }

    println!("Run 'prepdiff <command> --help' for details.");
}

fn load_config(explicit: Option<&Path>) -> Result<PrepdiffConfig> {
    match explicit {
        Some(path) => Ok(PrepdiffConfig::from_file(path)?),
        None => {
            let default_path = Path::new(CONFIG_FILE_NAME);
            if default_path.exists() {
                Ok(PrepdiffConfig::from_file(default_path)?)
            } else {
                Ok(PrepdiffConfig::default())
            }
        }
    }
}

fn print_compare_summary(summary: &RunSummary, use_color: bool) {
    let line = format!("Summary: {summary}");
    if use_color {
        let code = match summary.exit_code() {
            prepdiff_compare::runner::EXIT_IDENTICAL => "32",
            prepdiff_compare::runner::EXIT_DIFFERENCES => "33",
            _ => "31",
        };
        println!("\n\x1b[{code}m{line}\x1b[0m");
    } else {
        println!("\n{line}");
    }
    if !summary.failures.is_empty() {
        println!("Failed to load:");
        for failure in &summary.failures {
            println!("  {}: {}", failure.path, failure.message);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_compare(
    config: &PrepdiffConfig,
    format: OutputFormat,
    use_color: bool,
    root_a: &Option<PathBuf>,
    root_b: &Option<PathBuf>,
    paths: &[String],
    paths_file: &Option<PathBuf>,
    rtol: Option<f64>,
    atol: Option<f64>,
) -> Result<i32> {
    let mut compare = config.compare.clone();
    if let Some(root) = root_a {
        compare.root_a = Some(root.clone());
    }
    if let Some(root) = root_b {
        compare.root_b = Some(root.clone());
    }
    if let Some(rtol) = rtol {
        compare.rtol = rtol;
    }
    if let Some(atol) = atol {
        compare.atol = atol;
    }

    let mut run_config = RunConfig::from_config(&compare).map_err(|e| {
        miette::miette!(
            help = "pass --root-a/--root-b, set PREPDIFF_ROOT_A/PREPDIFF_ROOT_B, or set them under [compare]",
            "{e}"
        )
    })?;
    if let Some(file) = paths_file {
        run_config.pairs = prepdiff_compare::runner::read_path_list(file)?;
    }
    if !paths.is_empty() {
        run_config.pairs = paths.iter().map(prepdiff_compare::FilePairSpec::new).collect();
    }
    run_config.validate()?;
    log::debug!(
        "comparing {} paths: {} vs {}",
        run_config.pairs.len(),
        run_config.root_a.display(),
        run_config.root_b.display()
    );

    let summary = match format {
        OutputFormat::Text => {
            let mut sink = TextSink::new(std::io::stdout().lock());
            let summary = prepdiff_compare::run(&run_config, &mut sink)?;
            print_compare_summary(&summary, use_color);
            summary
        }
        OutputFormat::Markdown => {
            println!("# Output comparison\n");
            println!("- **Root A:** `{}`", run_config.root_a.display());
            println!("- **Root B:** `{}`\n", run_config.root_b.display());
            let mut sink = MarkdownSink::new(std::io::stdout().lock());
            let summary = prepdiff_compare::run(&run_config, &mut sink)?;
            println!("**Summary:** {summary}");
            summary
        }
        OutputFormat::Json => {
            let mut collector = Collector::default();
            let summary = prepdiff_compare::run(&run_config, &mut collector)?;
            let json = serde_json::json!({
                "rootA": run_config.root_a,
                "rootB": run_config.root_b,
                "reports": collector.reports,
                "summary": summary,
            });
            println!("{}", serde_json::to_string_pretty(&json).into_diagnostic()?);
            summary
        }
    };

    Ok(summary.exit_code())
}

fn require_dataset(dataset: &Option<PathBuf>, config: &PrepdiffConfig) -> Result<PathBuf> {
    dataset
        .clone()
        .or_else(|| config.dataset.root.clone())
        .ok_or_else(|| {
            miette::miette!(
                help = "pass --dataset, set PREPDIFF_DATASET, or set root under [dataset]",
                "no dataset root configured"
            )
        })
}

fn print_fetch_summary(summary: &FetchSummary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(summary).into_diagnostic()?);
        }
        OutputFormat::Markdown => {
            println!("# Fetch summary\n");
            println!("- **Sessions:** {}", summary.sessions);
            println!("- **Files fetched:** {}", summary.files);
            println!("- **Unmatched patterns:** {}", summary.unmatched.len());
            println!("- **Failures:** {}", summary.failures.len());
            for failure in &summary.failures {
                println!(
                    "  - sub-{} ses-{} `{}`: {}",
                    failure.subject, failure.session, failure.pattern, failure.message
                );
            }
        }
        OutputFormat::Text => {
            println!(
                "\nProcessed {} sessions: {} files fetched, {} patterns unmatched, {} failed",
                summary.sessions,
                summary.files,
                summary.unmatched.len(),
                summary.failures.len()
            );
            for pattern in &summary.unmatched {
                println!("  no match: {pattern}");
            }
            for failure in &summary.failures {
                println!("  failed: {} ({})", failure.pattern, failure.message);
            }
        }
    }
    Ok(())
}

const DEFAULT_CONFIG: &str = r#"# prepdiff configuration

[compare]
# Two output trees of the same pipeline, e.g. without and with SDC
# root_a = "/data/fmriprep_without_sdc/sub-S01"
# root_b = "/data/fmriprep_with_sdc/sub-S01"
# paths = [
#     "ses-1/anat/sub-S01_ses-1_desc-preproc_T1w.nii.gz",
#     "ses-2/func/sub-S01_ses-2_task-TheSecretNumber_desc-confounds_timeseries.tsv",
# ]
# Tolerance for numeric TSV columns: |a - b| <= atol + rtol * |b|
# rtol = 1e-5
# atol = 1e-8

[dataset]
# root = "/data/ds004892"
# task = "TheSecretNumber"
# subject_glob = "sub-*"
# anat_session = "1"
# sessions_file = "sessions.csv"
# datalad = "datalad"
# retries = 2
"#;

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    human_panic::setup_panic!();

    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config = load_config(cli.config.as_deref())?;

    let use_color = match cli.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => std::io::stdout().is_terminal(),
    };

    match cli.command {
        None => {
            print_welcome(use_color);
        }
        Some(Command::Compare {
            ref root_a,
            ref root_b,
            ref paths,
            ref paths_file,
            rtol,
            atol,
        }) => {
            let code = run_compare(
                &config, cli.format, use_color, root_a, root_b, paths, paths_file, rtol, atol,
            )?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Some(Command::Sessions {
            ref dataset,
            ref task,
            ref subject_glob,
            ref output,
        }) => {
            let root = require_dataset(dataset, &config)?;
            let task = task.clone().unwrap_or_else(|| config.dataset.task.clone());
            let subject_glob = subject_glob
                .clone()
                .unwrap_or_else(|| config.dataset.subject_glob.clone());
            let output = output
                .clone()
                .unwrap_or_else(|| config.dataset.sessions_file.clone());

            let records = prepdiff_dataset::find_sessions(&root, &task, &subject_glob)?;
            prepdiff_dataset::write_sessions(&output, &records)?;

            match cli.format {
                OutputFormat::Json => {
                    let json = serde_json::json!({
                        "task": task,
                        "output": output,
                        "sessions": records,
                    });
                    println!("{}", serde_json::to_string_pretty(&json).into_diagnostic()?);
                }
                OutputFormat::Markdown => {
                    println!("# Sessions with task-{task}\n");
                    println!("| Subject | Session |\n|---|---|");
                    for r in &records {
                        println!("| {} | {} |", r.subject, r.session);
                    }
                }
                OutputFormat::Text => {
                    println!("Found {} subjects with task '{task}'", records.len());
                    println!("Results saved to {}", output.display());
                }
            }
        }
        Some(Command::Fetch {
            ref dataset,
            ref sessions,
            ref task,
            ref anat_session,
            retries,
            dry_run,
        }) => {
            let root = require_dataset(dataset, &config)?;
            let sessions_file = sessions
                .clone()
                .unwrap_or_else(|| config.dataset.sessions_file.clone());
            let records = prepdiff_dataset::read_sessions(&sessions_file)?;
            let options = FetchOptions {
                task: task.clone().unwrap_or_else(|| config.dataset.task.clone()),
                anat_session: anat_session
                    .clone()
                    .unwrap_or_else(|| config.dataset.anat_session.clone()),
            };
            if cli.format == OutputFormat::Text {
                println!("Processing {} subjects", records.len());
            }

            let spinner = if !dry_run && std::io::stderr().is_terminal() {
                let pb = indicatif::ProgressBar::new_spinner();
                pb.set_style(
                    indicatif::ProgressStyle::with_template("{spinner:.cyan} {msg} ({elapsed})")
                        .into_diagnostic()?,
                );
                pb.enable_steady_tick(std::time::Duration::from_millis(120));
                Some(pb)
            } else {
                None
            };
            let on_target = |record: &prepdiff_dataset::SessionRecord,
                             target: &prepdiff_dataset::fetch::FetchTarget| {
                if let Some(pb) = &spinner {
                    pb.set_message(format!(
                        "sub-{} ses-{}: {} files",
                        record.subject, record.session, target.kind
                    ));
                }
            };

            let summary = if dry_run {
                let mut retriever = DryRunRetriever::new(config.dataset.datalad.clone());
                let summary = prepdiff_dataset::fetch_sessions(
                    &root,
                    &records,
                    &options,
                    &mut retriever as &mut dyn Retriever,
                    on_target,
                );
                for command in &retriever.commands {
                    println!("{command}");
                }
                summary
            } else {
                let mut retriever = DataladRetriever::new(
                    config.dataset.datalad.clone(),
                    retries.unwrap_or(config.dataset.retries),
                );
                prepdiff_dataset::fetch_sessions(&root, &records, &options, &mut retriever, on_target)
            };

            if let Some(pb) = spinner {
                pb.finish_and_clear();
            }
            print_fetch_summary(&summary, cli.format)?;
            if !summary.failures.is_empty() {
                std::process::exit(1);
            }
        }
        Some(Command::Init) => {
            let path = Path::new(CONFIG_FILE_NAME);
            if path.exists() {
                miette::bail!("{CONFIG_FILE_NAME} already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created {CONFIG_FILE_NAME} with default configuration");
        }
        Some(Command::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "prepdiff", &mut std::io::stdout());
        }
    }

    Ok(())
}
