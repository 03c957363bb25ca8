use std::process::ExitCode;

fn main() -> ExitCode {
    pretty_env_logger::init_custom_env("RUST_LOG");

    match tb_spacetime::app::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(err.exit_code())
        }
    }
}
