use chessboard::adapters::process::TokioCommandRunner;
use chessboard::config::{cli::LocalStorage, ChessboardConfig, CliConfig, Command};
use chessboard::core::engine::{render_plan, Engine};
use chessboard::core::schema::{docs, generate_docs};
use chessboard::utils::error::{ChessboardError, ErrorSeverity, Result};
use chessboard::utils::{logger, validation::Validate};
use clap::Parser;

async fn run(cli: &CliConfig) -> Result<()> {
    let settings = cli.settings()?;
    let engine = Engine::new(LocalStorage::new("."), settings);

    match &cli.command {
        Command::Validate { checkmatefile } => {
            engine.validate(checkmatefile).await?;
            println!("✅ {} is valid", checkmatefile);
        }
        Command::Topology { checkmatefile } => {
            let topology = engine.topology(checkmatefile).await?;
            for (service, relations) in &topology.relations {
                for (remote, interface) in relations {
                    println!("{} -> {} ({})", service, remote, interface);
                }
            }
            println!("Deployment order: {}", topology.deployment_order()?.join(", "));
        }
        Command::Plan {
            checkmatefile,
            format,
            output,
            ..
        } => match output {
            Some(output) => {
                let path = engine.write_plan(checkmatefile, *format, output).await?;
                println!("📁 Plan saved to: {}", path);
            }
            None => {
                let deployment = engine.plan(checkmatefile).await?;
                print!("{}", render_plan(&deployment, *format)?);
            }
        },
        Command::Docs => {
            print!("{}", generate_docs(docs()));
        }
        Command::Docker {
            checkmatefile,
            bundle,
            launch,
            ..
        } => {
            let artifacts = engine
                .docker(checkmatefile, TokioCommandRunner, bundle.as_deref(), *launch)
                .await?;
            println!("📁 Docker files written to: {}", artifacts.workdir.display());
            if let Some(bundle) = &artifacts.bundle {
                println!("📦 Bundle: {}", bundle.display());
            }
            if artifacts.launched {
                println!("✅ Containers started");
            }
        }
    }
    Ok(())
}

fn exit_code(e: &ChessboardError) -> i32 {
    match e.severity() {
        ErrorSeverity::Low => 0,      // 警告，但成功
        ErrorSeverity::Medium => 2,   // 可重試
        ErrorSeverity::High => 1,     // 藍圖或輸入錯誤
        ErrorSeverity::Critical => 3, // 系統錯誤
    }
}

#[tokio::main]
async fn main() {
    let cli = CliConfig::parse();

    let file_logging = ChessboardConfig::load_or_default(&cli.config)
        .map(|config| config.logging)
        .unwrap_or_default();
    let log_format = cli.log_format.clone().unwrap_or(file_logging.format);
    logger::init_logger(&log_format, cli.verbose || file_logging.verbose);
    tracing::debug!("CLI config: {:?}", cli);

    if let Err(e) = cli.validate() {
        tracing::error!("❌ Argument validation failed: {}", e);
        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 {}", e.recovery_suggestion());
        std::process::exit(1);
    }

    if let Err(e) = run(&cli).await {
        tracing::error!(
            "❌ {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 {}", e.recovery_suggestion());

        let code = exit_code(&e);
        if code > 0 {
            std::process::exit(code);
        }
    }
}
