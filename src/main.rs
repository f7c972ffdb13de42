use clap::Parser;
use picframe::{
    app::{scheduler::CycleOutcome, App},
    cli::{Cli, RunMode},
    Result,
};

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if !err.use_stderr() => {
            // --help / --version
            let _ = err.print();
            return;
        }
        Err(err) => {
            let _ = err.print();
            std::process::exit(1);
        }
    };
    if let Err(err) = try_main(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main(cli: Cli) -> Result<()> {
    let mode = cli.mode();
    let app = App::from_options(cli.options)?;
    match mode {
        RunMode::Run => app.run(),
        RunMode::Once => {
            match app.run_once()? {
                CycleOutcome::Displayed(path) | CycleOutcome::Unchanged(path) => {
                    app.logger().debug(format!("once: {} on screen", path.display()))
                }
                other => app.logger().warn(format!("once: cycle ended with {other:?}")),
            }
            Ok(())
        }
        RunMode::NextWake => {
            let wait = app.next_wake();
            println!(
                "{}",
                humantime::format_duration(std::time::Duration::from_secs(wait.as_secs()))
            );
            Ok(())
        }
    }
}
