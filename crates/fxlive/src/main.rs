mod bootstrap;
mod check;
mod cli;
mod defaults;
mod paths;
mod run;

use anyhow::Result;
use cli::Command;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    match cli.command {
        None | Some(Command::Run) => run::run(&cli.global, cli.run),
        Some(Command::Check(args)) => {
            if !check::run_check(&cli.global, args)? {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Init) => run::init(&cli.global),
        Some(Command::Where) => run::print_where(&cli.global),
    }
}
