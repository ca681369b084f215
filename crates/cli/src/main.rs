use std::process::ExitCode;

fn main() -> ExitCode {
    signoff_cli::run()
}
