//! C ABI entry points of `libsonar`
//!
//! Both functions block until the server stops and return `0` on a clean
//! exit or `-1` on any failure, including a panic.

use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};

use tracing::{error, info};

use crate::config::SonarConfig;
use crate::error::SonarResult;
use crate::logging::{self, LogLevel};
use crate::server::Server;

const EXIT_OK: c_int = 0;
const EXIT_ERROR: c_int = -1;

/// Port argument of [`StartServer`], `None` outside `1..=65535`
pub fn port_from_c(port: c_int) -> Option<u16> {
    u16::try_from(port).ok().filter(|p| *p != 0)
}

fn run_blocking(config: SonarConfig) -> c_int {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> SonarResult<()> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        runtime.block_on(async move {
            let mut server = Server::new(config);
            server.run().await
        })
    }));

    match outcome {
        Ok(Ok(())) => EXIT_OK,
        Ok(Err(e)) => {
            error!("Server error: {}", e);
            EXIT_ERROR
        }
        Err(_) => {
            error!("Server panicked");
            EXIT_ERROR
        }
    }
}

/// Start a server configured from `PORT`, `LOG_LEVEL` and the rest of
/// the environment
#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn StartServerFromEnv() -> c_int {
    let config = SonarConfig::from_env();
    logging::set_level(config.log_level);
    info!(
        "🚀 Starting server from environment on port {} ({})",
        config.port, config.log_level
    );
    run_blocking(config)
}

/// Start a server on `port`. `log_level` is 0 for debug, 1 for info, 2 for
/// warn and 3 for error; other values mean info.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn StartServer(port: c_int, log_level: c_int) -> c_int {
    let level = LogLevel::from_code(log_level);
    logging::set_level(level);

    let Some(port) = port_from_c(port) else {
        error!("Invalid port {}", port);
        return EXIT_ERROR;
    };

    info!("🚀 Starting server on port {} ({})", port, level);
    let mut config = SonarConfig::from_env();
    config.port = port;
    config.log_level = level;
    run_blocking(config)
}
