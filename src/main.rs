use std::process::ExitCode;

fn main() -> ExitCode {
    match strata::cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            strata::ui::output::error(format!("{:#}", err));
            ExitCode::FAILURE
        }
    }
}
