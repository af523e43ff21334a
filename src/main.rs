use std::process::ExitCode;

fn main() -> ExitCode {
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start the async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let outcome = rt.block_on(aeon_onboard::run());
    // A pending stdin read would otherwise keep the process alive.
    rt.shutdown_background();
    outcome.exit_code()
}
