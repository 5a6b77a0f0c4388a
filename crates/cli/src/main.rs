use std::process::ExitCode;

fn main() -> ExitCode {
    showroom_cli::run()
}
