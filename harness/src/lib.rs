//! Runtime loader for `libsonar`
//!
//! Resolves the two C entry points of the server library and calls them.
//! Return codes are handed back as is; the caller decides what they mean.

use std::os::raw::c_int;
use std::path::{Path, PathBuf};

use libloading::Library;
use thiserror::Error;
use tracing::debug;

/// `int StartServerFromEnv(void)`
pub type StartServerFromEnvFn = unsafe extern "C" fn() -> c_int;

/// `int StartServer(int port, int flag)`
pub type StartServerFn = unsafe extern "C" fn(c_int, c_int) -> c_int;

pub const START_SERVER_FROM_ENV: &str = "StartServerFromEnv";
pub const START_SERVER: &str = "StartServer";

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("failed to load library {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("symbol {name} not found: {source}")]
    Symbol {
        name: &'static str,
        #[source]
        source: libloading::Error,
    },
}

pub type HarnessResult<T> = Result<T, HarnessError>;

/// A loaded server library with both entry points resolved
pub struct SonarLibrary {
    start_server_from_env: StartServerFromEnvFn,
    start_server: StartServerFn,
    path: PathBuf,
    // keeps the function pointers above valid
    _library: Library,
}

impl SonarLibrary {
    /// Load `path` and resolve `StartServerFromEnv` and `StartServer`
    pub fn open<P: AsRef<Path>>(path: P) -> HarnessResult<Self> {
        let path = path.as_ref().to_path_buf();
        debug!("Loading {}", path.display());

        // SAFETY: loading runs the library's initialisers; libsonar has none
        // beyond what the Rust runtime sets up
        let library = unsafe { Library::new(&path) }.map_err(|source| HarnessError::Load {
            path: path.clone(),
            source,
        })?;

        let start_server_from_env = resolve::<StartServerFromEnvFn>(&library, START_SERVER_FROM_ENV)?;
        let start_server = resolve::<StartServerFn>(&library, START_SERVER)?;

        Ok(Self {
            start_server_from_env,
            start_server,
            path,
            _library: library,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Call `StartServerFromEnv`; blocks until that server stops
    pub fn start_server_from_env(&self) -> i32 {
        // SAFETY: signature matches the exported symbol and the library is
        // still loaded
        unsafe { (self.start_server_from_env)() }
    }

    /// Call `StartServer(port, flag)`; blocks until that server stops
    pub fn start_server(&self, port: i32, flag: i32) -> i32 {
        // SAFETY: as above
        unsafe { (self.start_server)(port, flag) }
    }
}

fn resolve<T: Copy>(library: &Library, name: &'static str) -> HarnessResult<T> {
    // SAFETY: T is one of the fn pointer aliases above, matching the C
    // declaration of `name`
    let symbol = unsafe { library.get::<T>(name.as_bytes()) }
        .map_err(|source| HarnessError::Symbol { name, source })?;
    Ok(*symbol)
}
