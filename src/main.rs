use std::io;
use std::sync::Arc;

use anyhow::Result;
use clap::CommandFactory;
use rsbootinst::cli::{self, Cli, Commands};
use rsbootinst::executor::RealCommandExecutor;

fn main() -> Result<()> {
    let args = cli::parse_args()?;

    if let Commands::Completions(opts) = &args.command {
        clap_complete::generate(
            opts.shell,
            &mut Cli::command(),
            env!("CARGO_PKG_NAME"),
            &mut io::stdout(),
        );
        return Ok(());
    }

    rsbootinst::init_logging(args.command.log_level())?;

    match &args.command {
        Commands::Apply(opts) => {
            let executor = Arc::new(RealCommandExecutor {
                dry_run: opts.dry_run,
            });
            rsbootinst::run_apply(opts, executor)?;
        }
        Commands::Validate(opts) => {
            rsbootinst::run_validate(opts)?;
        }
        Commands::Detect(opts) => {
            let detection = rsbootinst::run_detect(opts)?;
            println!("{}", detection);
        }
        Commands::Completions(_) => {}
    }

    Ok(())
}
