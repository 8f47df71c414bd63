use clap::Parser;

#[derive(Parser)]
#[command(name = "llmux", about = "Multi-dialect LLM reverse proxy")]
pub(crate) struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "config.yaml")]
    pub(crate) config: String,
    /// Overrides the configured listen host.
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Overrides the configured listen port.
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Overrides the configured auth directory.
    #[arg(long)]
    pub(crate) auth_dir: Option<String>,
}
