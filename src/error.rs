use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unsupported {kind}: {value}")]
    Configuration { kind: &'static str, value: String },
    #[error("expected to find binary dependency '{name}' at {path:?}")]
    ToolMissing { name: String, path: PathBuf },
    #[error("`{command}` failed with {status}")]
    ToolFailed { command: String, status: ExitStatus },
    #[error("expected generated project directory to exist: {0:?}")]
    MissingProject(PathBuf),
    #[error("toolchain discovery failed: {0}")]
    ToolchainDiscovery(String),
    #[error("expected V8 project to have been initialized in {0:?}")]
    MissingCheckout(PathBuf),
    #[error("cannot read {field} from version header {path:?}")]
    VersionHeader { field: &'static str, path: PathBuf },
    #[error("invalid version string: {0}")]
    Version(String),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings file: {0}")]
    Settings(#[from] simd_json::Error),
    #[error("invalid library pattern: {0}")]
    Pattern(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub trait IoContext<T> {
    fn context<C: std::fmt::Display>(self, context: C) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn context<C: std::fmt::Display>(self, context: C) -> Result<T> {
        self.map_err(|source| Error::Io {
            context: context.to_string(),
            source,
        })
    }
}
