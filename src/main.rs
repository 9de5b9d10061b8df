use clap::Parser;
use tickreplay::cli::{run, Cli};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
