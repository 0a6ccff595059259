use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[clap(author, about, version)]
pub struct CliOptions {
    /// Path to the YAML configuration file.
    #[clap(long, env = "STRATA_CONFIG")]
    pub config: PathBuf,
}
