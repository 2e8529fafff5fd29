use server_updater::cli::{self, CliArgs, Command};
use server_updater::config;
use server_updater_lib::{HttpRetrievalClient, UpdateOrchestrator, UpdateReport};

fn main() {
    let args = match cli::parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("✗ {}", e);
            eprintln!("  Run 'server-updater --help' for usage.");
            std::process::exit(1);
        }
    };

    match args.command {
        Command::Help => {
            cli::print_help();
            return;
        }
        Command::Version => {
            println!("server-updater {}", env!("CARGO_PKG_VERSION"));
            return;
        }
        Command::Run | Command::Check => {}
    }

    // stdout은 --json 출력용
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("✗ Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    let code = rt.block_on(async move {
        match run_async(args).await {
            Ok(code) => code,
            Err(e) => {
                eprintln!("✗ Error: {:#}", e);
                1
            }
        }
    });
    std::process::exit(code);
}

async fn run_async(args: CliArgs) -> anyhow::Result<i32> {
    let cfg = config::load_updater_config(args.config.as_deref(), &args.overrides)?;
    let client = HttpRetrievalClient::new(&cfg);
    let mut orchestrator = UpdateOrchestrator::new(cfg, client);

    match args.command {
        Command::Check => {
            // 중단되면 future가 drop되면서 세션도 정리됨
            let report = tokio::select! {
                r = orchestrator.check() => match r {
                    Ok(report) => report,
                    Err(e) => {
                        eprintln!("✗ {}", e.user_message());
                        eprintln!("  {}", e);
                        return Ok(1);
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!("[Updater] Interrupted");
                    return Ok(1);
                }
            };
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Installed: {}",
                    report.current.as_ref().map(|c| c.name.as_str()).unwrap_or("(none)")
                );
                println!("Latest:    {}", report.candidate.name);
                if report.update_available {
                    println!("✓ Update available");
                } else {
                    println!("✓ Up to date");
                }
            }
            Ok(report.exit_code())
        }
        _ => {
            let report = tokio::select! {
                r = orchestrator.run() => r,
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!("[Updater] Interrupted, update aborted");
                    return Ok(1);
                }
            };
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_summary(&report);
            }
            Ok(report.exit_code())
        }
    }
}

fn print_summary(report: &UpdateReport) {
    use server_updater_lib::UpdateOutcome;

    match &report.outcome {
        UpdateOutcome::Updated | UpdateOutcome::FreshInstall | UpdateOutcome::UpdatedDegraded { .. } => {
            if let Some(dir) = &report.installed {
                println!("✓ Installed {}", dir.display());
            }
            if let Some(merge) = &report.merge {
                println!("  Carried over {} items ({} not present)", merge.copied(), merge.skipped());
                for (item, message) in merge.warnings() {
                    println!("  ⚠ {}: {}", item, message);
                }
            }
            if let Some(archive) = &report.archive_path {
                println!("  Old installation archived to {}", archive.display());
            }
            if let UpdateOutcome::UpdatedDegraded { archive_error } = &report.outcome {
                println!("  ⚠ Old installation was not archived: {}", archive_error);
            }
        }
        UpdateOutcome::UpToDate => println!("✓ Already up to date"),
        UpdateOutcome::NoBaseline => println!("⚠ No existing installation found, nothing updated"),
        UpdateOutcome::Failed(reason) => {
            eprintln!("✗ {}", reason.hint);
            eprintln!("  Failed during {:?}: {}", reason.step, reason.message);
            if reason.recoverable {
                eprintln!("  Running the updater again may succeed.");
            }
        }
    }
}
