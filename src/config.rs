use clap::Parser;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Base URL of the inference backend
    #[arg(long, env = "BACKEND_URL")]
    pub backend_url: Option<String>,

    /// Directory holding persisted chat history
    #[arg(long, env = "DATA_DIR")]
    pub data_dir: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl AppConfig {
    /// Load configuration from defaults, an optional config file,
    /// `CODEFLOW_`-prefixed environment variables, and CLI flags.
    ///
    /// Priority: CLI flag > CLI env var > `CODEFLOW_` env var > file > defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when the CLI is malformed, a named config file is
    /// unreadable, or the merged settings fail to deserialize.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("backend.base_url", "http://localhost:7860")?
            .set_default("backend.timeout_secs", 60)?
            .set_default("storage.data_dir", "data")?;

        // Config file: an explicit path is required to exist, the cwd
        // fallback is not.
        if let Some(path) = &cli.config {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            builder = builder.add_source(File::new("codeflow", FileFormat::Toml).required(false));
        }

        // Environment variables, e.g. CODEFLOW_SERVER__PORT=8000.
        builder = builder.add_source(
            Environment::with_prefix("CODEFLOW")
                .separator("__")
                .try_parsing(true),
        );

        // CLI flags win (clap already folded their env fallbacks in).
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(url) = cli.backend_url {
            builder = builder.set_override("backend.base_url", url)?;
        }
        if let Some(dir) = cli.data_dir {
            builder = builder.set_override("storage.data_dir", dir)?;
        }

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }
}
