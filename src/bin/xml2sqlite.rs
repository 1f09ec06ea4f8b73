use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std_traffic::{logging, sqlite};
use tracing::info;

/// Convert a SUMO timestep log into a table of a SQLite database.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// XML timestep log to convert
    input: PathBuf,

    /// SQLite database to write into
    #[arg(short = 'f', long = "file", default_value = sqlite::DEFAULT_OUTPUT)]
    output: PathBuf,
}

fn main() -> Result<()> {
    logging::init("info,std_traffic=info");
    let args = Args::parse();

    let report = sqlite::convert_file(&args.input, &args.output)?;
    info!(
        table = %report.table,
        rows = report.insert.rows,
        created = report.created,
        "{} written in {:.3}s",
        args.output.display(),
        report.elapsed.as_secs_f64()
    );
    Ok(())
}
