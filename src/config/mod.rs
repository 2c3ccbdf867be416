pub mod cli;
pub mod toml_config;

pub use toml_config::ChessboardConfig;

#[cfg(feature = "cli")]
pub use args::{CliConfig, Command};

#[cfg(feature = "cli")]
mod args {
    use super::ChessboardConfig;
    use crate::adapters::http::is_remote;
    use crate::core::engine::PlanFormat;
    use crate::utils::error::Result;
    use crate::utils::validation::{self, Validate};
    use clap::{Parser, Subcommand};
    use std::path::PathBuf;

    #[derive(Debug, Clone, Parser)]
    #[command(name = "chessboard")]
    #[command(about = "Validate, plan and launch Checkmatefile deployments")]
    pub struct CliConfig {
        /// Settings file; missing files fall back to the defaults
        #[arg(long, global = true, default_value = "chessboard.toml")]
        pub config: PathBuf,

        #[arg(long, global = true, value_parser = ["compact", "json"])]
        pub log_format: Option<String>,

        #[arg(long, short, global = true, help = "Enable verbose output")]
        pub verbose: bool,

        #[command(subcommand)]
        pub command: Command,
    }

    #[derive(Debug, Clone, Subcommand)]
    pub enum Command {
        /// Load and validate a Checkmatefile (path or http(s) URL)
        Validate { checkmatefile: String },

        /// Print service relations and deployment order
        Topology { checkmatefile: String },

        /// Plan a deployment and print its resources
        Plan {
            checkmatefile: String,

            /// Use dummy keys and skip key generation
            #[arg(long)]
            parse_only: bool,

            #[arg(long, value_enum, default_value = "yaml")]
            format: PlanFormat,

            /// Write the plan to this file instead of stdout
            #[arg(long)]
            output: Option<String>,

            #[arg(long)]
            domain: Option<String>,
        },

        /// Print the Checkmatefile schema glossary
        Docs,

        /// Write Dockerfiles and docker-compose.yml, optionally launching them
        Docker {
            checkmatefile: String,

            #[arg(long)]
            workdir: Option<PathBuf>,

            /// Zip the generated files into this archive
            #[arg(long)]
            bundle: Option<PathBuf>,

            #[arg(long)]
            launch: bool,

            #[arg(long)]
            base_image: Option<String>,
        },
    }

    impl CliConfig {
        /// `chessboard.toml` with the command-line overrides applied.
        pub fn settings(&self) -> Result<ChessboardConfig> {
            let mut settings = ChessboardConfig::load_or_default(&self.config)?;
            if let Some(format) = &self.log_format {
                settings.logging.format = format.clone();
            }
            settings.logging.verbose |= self.verbose;
            match &self.command {
                Command::Plan {
                    parse_only, domain, ..
                } => {
                    settings.planner.parse_only |= *parse_only;
                    if let Some(domain) = domain {
                        settings.planner.domain = domain.clone();
                    }
                }
                Command::Docker {
                    workdir, base_image, ..
                } => {
                    if let Some(workdir) = workdir {
                        settings.docker.workdir = workdir.clone();
                    }
                    if let Some(base_image) = base_image {
                        settings.docker.base_image = base_image.clone();
                    }
                }
                _ => {}
            }
            settings.validate()?;
            Ok(settings)
        }

        pub fn checkmatefile(&self) -> Option<&str> {
            match &self.command {
                Command::Validate { checkmatefile }
                | Command::Topology { checkmatefile }
                | Command::Plan { checkmatefile, .. }
                | Command::Docker { checkmatefile, .. } => Some(checkmatefile),
                Command::Docs => None,
            }
        }
    }

    impl Validate for CliConfig {
        fn validate(&self) -> Result<()> {
            let Some(location) = self.checkmatefile() else {
                return Ok(());
            };
            if is_remote(location) {
                validation::validate_url("checkmatefile", location)
            } else {
                validation::validate_path("checkmatefile", location)
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_parse_plan() {
            let cli = CliConfig::parse_from([
                "chessboard",
                "plan",
                "Checkmatefile",
                "--parse-only",
                "--format",
                "json",
                "--domain",
                "example.test",
                "--config",
                "/definitely/not/here.toml",
            ]);
            assert_eq!(cli.checkmatefile(), Some("Checkmatefile"));
            assert!(cli.validate().is_ok());
            let settings = cli.settings().unwrap();
            assert!(settings.planner.parse_only);
            assert_eq!(settings.planner.domain, "example.test");
            match cli.command {
                Command::Plan { format, .. } => assert_eq!(format, PlanFormat::Json),
                other => panic!("unexpected command: {other:?}"),
            }
        }

        #[test]
        fn test_parse_docker() {
            let cli = CliConfig::parse_from([
                "chessboard",
                "--config",
                "/definitely/not/here.toml",
                "docker",
                "app/Checkmatefile",
                "--workdir",
                "/tmp/build",
                "--launch",
            ]);
            let settings = cli.settings().unwrap();
            assert_eq!(settings.docker.workdir, PathBuf::from("/tmp/build"));
            assert!(matches!(cli.command, Command::Docker { launch: true, .. }));
        }

        #[test]
        fn test_remote_checkmatefile_must_be_http() {
            let cli = CliConfig::parse_from(["chessboard", "validate", "ftp://example.com/Checkmatefile"]);
            // ftp:// is not remote, so it is validated as a path
            assert!(cli.validate().is_ok());

            let cli = CliConfig::parse_from(["chessboard", "validate", "https://"]);
            assert!(cli.validate().is_err());
        }

        #[test]
        fn test_docs_has_no_file() {
            let cli = CliConfig::parse_from(["chessboard", "docs", "-v"]);
            assert!(cli.checkmatefile().is_none());
            assert!(cli.verbose);
        }
    }
}
