use std::path::PathBuf;

use clap::{Parser, Subcommand, command};
use huntql_translate::Dialect;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[clap(long, global = true, help = "Log as JSON lines instead of plain text.")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve the translation engine over HTTP.
    Serve {
        #[clap(
            short,
            long,
            help = "Listen address (host:port).",
            default_value = "0.0.0.0:8080"
        )]
        listen: String,

        #[clap(short, long, help = "Path to the JSON config file.")]
        config: PathBuf,
    },

    /// Translate a single request and print the result as JSON.
    Build {
        #[clap(short, long, help = "Target dialect (xql, s1ql, cbc, kql).")]
        dialect: Dialect,

        #[clap(short, long, help = "Path to the dialect's schema snapshot.")]
        schema: PathBuf,

        #[clap(
            short,
            long,
            help = "Path to a JSON request body, '-' for stdin.",
            default_value = "-"
        )]
        request: String,
    },
}

#[must_use]
pub fn parse_args() -> Args {
    Args::parse()
}
