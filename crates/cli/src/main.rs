use std::process::ExitCode;

fn main() -> ExitCode {
    cotizador_cli::run()
}
