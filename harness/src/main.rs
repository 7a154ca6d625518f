//! Smoke test for the C ABI of libsonar
//!
//! Loads the library, calls `StartServerFromEnv` and then
//! `StartServer(port, flag)`, printing each return code.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sonar_harness::SonarLibrary;

#[derive(Parser, Debug)]
#[command(name = "sonar-harness")]
#[command(version)]
#[command(about = "Call the C entry points of libsonar", long_about = None)]
struct Args {
    /// Path to the shared library
    #[arg(long, env = "SONAR_LIB_PATH", default_value = "target/release/libsonar.so")]
    library: PathBuf,

    /// Port passed to StartServer
    #[arg(long, default_value_t = 8080)]
    port: i32,

    /// Second argument of StartServer, passed through untouched
    #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
    flag: i32,
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_target(true)
        .init();

    let library = match SonarLibrary::open(&args.library) {
        Ok(library) => library,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("📦 Loaded {}", library.path().display());

    let result = library.start_server_from_env();
    println!("StartServerFromEnv returned: {}", result);

    let result = library.start_server(args.port, args.flag);
    println!("StartServer returned: {}", result);

    ExitCode::SUCCESS
}
