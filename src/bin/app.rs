use anyhow::Context;
use chessboard::app::shell::{parse_spec, BlueprintFile, DEFAULT_FILE, DEFAULT_NAME, VERSION};
use chessboard::utils::logger;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "app")]
#[command(about = "Code Deployment for Humans")]
struct Cli {
    /// Blueprint file to edit
    #[arg(long, global = true, default_value = DEFAULT_FILE)]
    file: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct PointArgs {
    /// <resource_type>:<interface>[<port>?]#<name>
    type_spec: String,

    /// Component to edit
    #[arg(long, default_value = DEFAULT_NAME)]
    name: String,
}

#[derive(Subcommand)]
enum Command {
    /// Expose a provided connection point outside the deployment
    Exposes {
        #[command(flatten)]
        point: PointArgs,

        /// Port used when the connection point names none
        #[arg(long)]
        default_port: Option<u16>,

        /// Fall back to any free port
        #[arg(long)]
        use_free_port: bool,
    },
    Provides {
        #[command(flatten)]
        point: PointArgs,
    },
    Requires {
        #[command(flatten)]
        point: PointArgs,
    },
    Supports {
        #[command(flatten)]
        point: PointArgs,
    },
    Version,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logger::init_cli_logger(cli.verbose);

    let (point, kind) = match &cli.command {
        Command::Version => {
            println!("{}", VERSION);
            return Ok(());
        }
        Command::Exposes { point, .. } => (point, "exposes"),
        Command::Provides { point } => (point, "provides"),
        Command::Requires { point } => (point, "requires"),
        Command::Supports { point } => (point, "supports"),
    };

    let mut spec = parse_spec(&point.type_spec)
        .with_context(|| format!("Could not parse '{}'", point.type_spec))?;
    if let Command::Exposes {
        default_port,
        use_free_port,
        ..
    } = &cli.command
    {
        if spec.port.is_none() {
            spec.port = default_port.map(|port| port.to_string());
        }
        spec.free |= *use_free_port;
    }

    let mut blueprint = BlueprintFile::load(&cli.file)
        .with_context(|| format!("Could not load {}", cli.file))?;
    let matches = match kind {
        "exposes" => blueprint.exposes(&point.name, &spec)?,
        "provides" => blueprint.provides(&point.name, &spec)?,
        "requires" => blueprint.requires(&point.name, &spec)?,
        _ => blueprint.supports(&point.name, &spec)?,
    };
    blueprint
        .save()
        .with_context(|| format!("Could not save {}", cli.file))?;
    tracing::info!("Updated component '{}' in {}", point.name, cli.file);

    print!("{}", serde_yaml::to_string(&Value::Array(matches))?);
    Ok(())
}
