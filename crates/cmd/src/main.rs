// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{path::PathBuf, process::ExitCode};

use artifact_relay_app::AppConfig;
use artifact_relay_common_telemetry::{logging::init_global_logging, panic_hook::set_panic_hook};
use artifact_relay_proxy::FilenameValidator;
use clap::{Args, Parser, Subcommand};
use snafu::{ResultExt, Whatever};

mod build_info;

const APP_NAME: &str = "artifact-relay";

#[derive(Debug, Parser)]
#[clap(
name = "artifact-relay",
about = "Streaming download proxy for Artifactory",
author = build_info::AUTHOR,
version = build_info::FULL_VERSION)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Server(ServerArgs),
    Validate(ValidateArgs),
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Starts the relay server.
Examples:

artifact-relay server
artifact-relay server --config relay.toml
ARTIFACTORY_URL=https://example.jfrog.io/artifactory/ PORT=3000 artifact-relay server

")]
struct ServerArgs {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

impl ServerArgs {
    fn run(&self) -> Result<ExitCode, Whatever> {
        let config = AppConfig::load(self.config.as_deref())
            .whatever_context("Failed to load configuration")?;
        let runtime = config
            .runtime
            .clone()
            .create()
            .whatever_context("Failed to build runtime")?;

        runtime.block_on(async move {
            let _guards = init_global_logging(APP_NAME, &config.logging, None);
            set_panic_hook();
            config.open().run().await
        })?;
        Ok(ExitCode::SUCCESS)
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Checks a filename against the download rules without contacting the
repository. Exits with status 1 when the name is rejected.
Examples:

artifact-relay validate demo/file.zip
artifact-relay validate ../../etc/passwd

")]
struct ValidateArgs {
    /// Path as it would appear in `/download?filename=`
    filename: String,
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config:   Option<PathBuf>,
}

impl ValidateArgs {
    fn run(&self) -> Result<ExitCode, Whatever> {
        let config = AppConfig::load(self.config.as_deref())
            .whatever_context("Failed to load configuration")?;
        let validator = FilenameValidator::from_config(&config.proxy);
        match validator.validate(&self.filename) {
            Ok(()) => {
                println!("accepted: {}", self.filename);
                Ok(ExitCode::SUCCESS)
            }
            Err(reason) => {
                println!("rejected: {reason}");
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

fn main() -> Result<ExitCode, Whatever> {
    let cli = Cli::parse();
    match cli.commands {
        Commands::Server(args) => args.run(),
        Commands::Validate(args) => args.run(),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() { Cli::command().debug_assert(); }

    #[test]
    fn test_parse_validate() {
        let cli = Cli::parse_from(["artifact-relay", "validate", "demo/file.zip", "-c", "relay.toml"]);
        match cli.commands {
            Commands::Validate(args) => {
                assert_eq!(args.filename, "demo/file.zip");
                assert_eq!(args.config, Some(PathBuf::from("relay.toml")));
            }
            Commands::Server(_) => panic!("expected validate"),
        }
    }

    #[test]
    fn test_parse_server_without_config() {
        let cli = Cli::parse_from(["artifact-relay", "server"]);
        assert!(matches!(cli.commands, Commands::Server(ServerArgs { config: None })));
    }
}
