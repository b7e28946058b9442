mod cmd;
mod logging;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use cmd::{BuildOverrides, GlobalArgs};
use ohook_lib::status::Status;
use output::{OutputFormat, print_status};

/// Reproducible builder for the ohook 0.5 sppc DLLs
#[derive(Parser)]
#[command(name = "ohook-build")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// JSON configuration file
  #[arg(short, long, global = true, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Main working directory (default: <system drive>/OHookBuilder)
  #[arg(long, global = true, value_name = "DIR")]
  root: Option<PathBuf>,

  /// Directory holding the fixed build links (default: <system drive>)
  #[arg(long, global = true, value_name = "DIR")]
  link_root: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Download, compile and verify the DLLs
  Build {
    /// Download attempts per resource
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Keep downloads and scratch files after a successful build
    #[arg(long)]
    keep_temp: bool,

    /// Run even without administrator privileges
    #[arg(long)]
    no_elevation_check: bool,
  },

  /// Check DLL checksums in a directory (default: the output directory)
  Verify {
    dir: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
  },

  /// Remove the build links and temporary files
  Clean,

  /// Resynchronize the system clock with its time source
  RestoreClock,

  /// Show the resolved build plan
  Show {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  let global = GlobalArgs {
    verbose: cli.verbose,
    config: cli.config,
    root: cli.root,
    link_root: cli.link_root,
  };

  let result = match cli.command {
    Commands::Build {
      max_attempts,
      keep_temp,
      no_elevation_check,
    } => cmd::cmd_build(
      &global,
      &BuildOverrides {
        max_attempts,
        keep_temp,
        no_elevation_check,
      },
    ),
    Commands::Verify { dir, output } => cmd::cmd_verify(&global, dir, output),
    Commands::Clean => cmd::cmd_clean(&global),
    Commands::RestoreClock => cmd::cmd_restore_clock(&global),
    Commands::Show { output } => cmd::cmd_show(&global, output),
  };

  match result {
    Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
    Err(e) => {
      print_status(Status::Error, &format!("{:#}", e));
      ExitCode::from(1)
    }
  }
}
