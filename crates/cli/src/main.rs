use anyhow::Result;
use clap::{Parser, Subcommand};
use tracecov::commands::{correlate_command, report_command, summary_command, SummaryFormat};
use tracecov::init_logging;

/// Binary coverage from execution traces.
///
/// This CLI is a thin wrapper around `tracecov-core` (exposed in code as
/// `tracecov_core`). All substantive logic lives in the library.
#[derive(Parser, Debug)]
#[command(
    name = "tracecov",
    version,
    about = "Binary coverage from execution traces, ELF symbols and annotated disassembly",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Correlate traces with the configured binaries and write the intermediate JSON document.
    ///
    /// This will:
    /// - Load every trace file matched by each binary's `traces` globs.
    /// - Read function symbols and code ranges from each ELF.
    /// - Disassemble each ELF with source attribution and attribute executed instructions.
    Correlate {
        /// Run configuration (JSON, or YAML for .yaml/.yml).
        #[arg(long)]
        config: String,

        /// Where the sources live now, if not at `parameters.workspace`.
        #[arg(long)]
        local_workspace: Option<String>,

        /// Override `parameters.output_file`.
        #[arg(long)]
        output: Option<String>,
    },

    /// Turn an intermediate document into an lcov tracefile, with branch coverage.
    Report {
        /// Folder with the source tree the document's paths refer to.
        #[arg(long)]
        workspace: String,

        /// Intermediate JSON document.
        #[arg(long)]
        json: String,

        /// Output tracefile.
        #[arg(long, default_value = "coverage.info")]
        info: String,

        /// Audit log of dropped branches and skipped files.
        #[arg(long, default_value = "error_log.txt")]
        diagnostics: String,
    },

    /// Print per-file function and line totals of an intermediate document.
    Summary {
        /// Intermediate JSON document.
        #[arg(long)]
        json: String,

        #[arg(long, value_enum, default_value_t = SummaryFormat::Text)]
        format: SummaryFormat,
    },
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Command::Correlate { config, local_workspace, output } => {
            correlate_command(&config, local_workspace.as_deref(), output.as_deref())?
        }
        Command::Report { workspace, json, info, diagnostics } => {
            report_command(&workspace, &json, &info, &diagnostics)?
        }
        Command::Summary { json, format } => summary_command(&json, format)?,
    }

    Ok(())
}
