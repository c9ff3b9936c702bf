use std::process::ExitCode;

use ft_bench_runner::prelude::*;

fn main() -> ExitCode {
    let cli = init();

    match run(cli) {
        Ok(result) => {
            if let Some(err) = result.error() {
                eprintln!("FT benchmark failed\n{}", err.report());
            }
            ExitCode::from(u8::try_from(result.exit_code()).unwrap_or(1))
        }
        Err(e) => {
            log::error!("{e:?}");
            ExitCode::FAILURE
        }
    }
}
