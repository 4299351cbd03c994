use crate::config::Settings;
use crate::core::input::{RunInput, Secret};
use crate::error::{Error, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vidlens")]
#[command(about = "YouTube video analysis with Gemini")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub settings: Settings,

    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyze a single video
    Analyze(AnalyzeArgs),

    /// Run from an input document (file, or the platform's key-value store)
    Run {
        /// JSON input document
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// List stored records and reports
    List,
}

#[derive(Args)]
pub struct AnalyzeArgs {
    /// YouTube video URL
    pub url: String,

    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Use the configured default key instead of --api-key
    #[arg(long)]
    pub use_default_key: bool,

    /// Number of key moments to extract (0 disables the pass)
    #[arg(short, long, default_value_t = 5)]
    pub timestamps: i64,

    /// Extra question to ask about the video
    #[arg(short, long)]
    pub prompt: Option<String>,

    /// Netscape-format cookie file used for downloads
    #[arg(long)]
    pub cookies_file: Option<PathBuf>,

    /// Download the video and upload it instead of passing the URL
    #[arg(short, long)]
    pub download: bool,

    /// Let the external downloader fetch the video into object storage
    #[arg(long)]
    pub external: bool,

    #[arg(long, env = "S3_BUCKET")]
    pub s3_bucket: Option<String>,

    #[arg(long, env = "AWS_REGION")]
    pub s3_region: Option<String>,

    #[arg(long, env = "AWS_ACCESS_KEY_ID")]
    pub aws_access_key_id: Option<String>,

    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub aws_secret_access_key: Option<String>,
}

impl AnalyzeArgs {
    pub async fn into_input(self) -> Result<RunInput> {
        let cookies = match &self.cookies_file {
            Some(path) => Some(Secret::new(
                tokio::fs::read_to_string(path).await.map_err(|e| {
                    Error::input(format!("Cannot read cookie file {}: {e}", path.display()))
                })?,
            )),
            None => None,
        };

        Ok(RunInput {
            youtube_url: Some(self.url),
            gemini_api_key: self.api_key.map(Secret::new),
            use_default_key: self.use_default_key,
            num_timestamps: self.timestamps,
            custom_prompt: self.prompt,
            cookies,
            download_video: self.download,
            use_external_downloader: self.external,
            s3_bucket: self.s3_bucket,
            s3_region: self.s3_region,
            aws_access_key_id: self.aws_access_key_id,
            aws_secret_access_key: self.aws_secret_access_key.map(Secret::new),
        })
    }
}
