mod arrange;
mod cli;
mod jobs;

use clap::Parser;
use comforter_core::{
    command::find_executable,
    config::{ConfigErrors, SiteConfig},
    context::RunContext,
    logging,
};
use jobs::{Layout, MergeError, Summary};
use std::process::ExitCode;
use tracing::{debug, error};

fn merge(args: cli::Args) -> Result<Summary, MergeError> {
    let site = SiteConfig::locate(args.site_config.as_deref())?;
    if site.preflight_checks() {
        return Err(ConfigErrors::Preflight.into());
    }

    if !args.dry && find_executable(&site.commands.hadd).is_none() {
        return Err(ConfigErrors::invalid(
            "hadd",
            format!("cannot find {} in PATH", site.commands.hadd),
        )
        .into());
    }

    if !site.is_on_hdfs(&args.output) {
        return Err(ConfigErrors::NotOnHdfs {
            flag: "output".to_string(),
            path: args.output,
            prefix: site.hdfs_prefix,
        }
        .into());
    }

    let inputs = args.input_files()?;
    debug!(inputs = ?inputs, "Input files");

    let plan = jobs::plan_merge(
        inputs,
        args.size,
        &args.output,
        args.hadd_args.as_deref(),
        &site,
        &mut rand::thread_rng(),
    )?;
    let layout = Layout::new(&site, &RunContext::capture());

    jobs::run(&plan, &site, &layout, args.dry)
}

fn main() -> ExitCode {
    let args = cli::Args::parse();
    logging::init(args.verbose);

    match merge(args) {
        Ok(summary) => {
            println!("{summary}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = ?e, "{e}");
            ExitCode::FAILURE
        }
    }
}
