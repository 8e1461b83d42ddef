use std::process::ExitCode;

fn main() -> ExitCode {
    karigar_cli::run()
}
