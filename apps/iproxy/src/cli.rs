use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "iproxy",
    version,
    about = "OpenAI-compatible image-generation gateway"
)]
pub(crate) struct Cli {
    /// Data directory holding the runtime document, logs, and artifacts.
    #[arg(long, default_value = "data")]
    pub(crate) data_dir: String,

    /// Bind host.
    #[arg(long, default_value = "0.0.0.0")]
    pub(crate) host: String,

    /// Bind port; overrides the runtime document and PORT for this run.
    #[arg(long)]
    pub(crate) port: Option<u16>,

    /// Minimum log level.
    #[arg(long, env = "LOG_LEVEL", default_value = "INFO")]
    pub(crate) log_level: String,
}
