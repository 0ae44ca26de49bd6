mod artifacts;
mod cli;
mod manifest;
mod options;
mod plan;
mod split;

use clap::Parser;
use comforter_core::{
    bundle::Sandbox, config::SiteConfig, context::RunContext, logging, metadata::DasClient,
};
use std::process::ExitCode;
use tracing::error;

fn main() -> ExitCode {
    let args = cli::Args::parse();
    logging::init(args.verbose);

    let site = match SiteConfig::locate(args.site_config.as_deref()) {
        Ok(site) => site,
        Err(e) => {
            error!(error = ?e, "Failed to load site configuration");
            return ExitCode::FAILURE;
        }
    };
    if site.preflight_checks() {
        return ExitCode::FAILURE;
    }

    let context = RunContext::capture();
    let options = match options::Options::from_args(args, &site, &context) {
        Ok(options) => options,
        Err(e) => {
            error!(error = ?e, "{e}");
            return ExitCode::FAILURE;
        }
    };

    let sandbox = match Sandbox::from_env(&site.sandbox) {
        Ok(sandbox) => sandbox,
        Err(e) => {
            error!(error = ?e, "{e}");
            return ExitCode::FAILURE;
        }
    };

    match plan::run(&options, &site, &context, &DasClient::load(&site), sandbox) {
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
