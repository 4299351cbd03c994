mod cli;
mod config;
mod core;
mod error;

use crate::cli::{Cli, Commands};
use crate::config::Settings;
use crate::core::{
    ApifyDataset, ApifyDelegate, DelegateDownloader, FileType, LiveServices, LocalDataset,
    PlatformEnv, RecordSink, RunInput, pipeline,
};
use crate::error::{Error, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "vidlens=debug"
    } else {
        "vidlens=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let result = match cli.command {
        Commands::Analyze(args) => match args.into_input().await {
            Ok(input) => run_analysis(input, &cli.settings).await,
            Err(e) => Err(e),
        },
        Commands::Run { input } => run_from_document(input, &cli.settings).await,
        Commands::List => run_cli_list(&cli.settings),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(if e.is_input_error() { 2 } else { 1 });
    }
}

async fn run_from_document(path: Option<PathBuf>, settings: &Settings) -> Result<()> {
    let input = match path {
        Some(path) => RunInput::from_file(&path).await?,
        None => {
            let platform = PlatformEnv::from_env();
            let (Some(client), Some(store_id)) =
                (platform.client()?, platform.key_value_store_id.as_deref())
            else {
                return Err(Error::input(
                    "No input document: pass --input or run on the platform",
                ));
            };
            let value = client
                .get_input(store_id)
                .await?
                .ok_or_else(|| Error::input("The platform key-value store has no INPUT record"))?;
            serde_json::from_value(value)
                .map_err(|e| Error::input(format!("Input document is not valid: {e}")))?
        }
    };

    run_analysis(input, settings).await
}

async fn run_analysis(input: RunInput, settings: &Settings) -> Result<()> {
    let platform = PlatformEnv::from_env();
    let apify = platform.client()?;

    let sink: Box<dyn RecordSink> = match (&apify, platform.dataset_id.as_deref()) {
        (Some(client), Some(dataset_id)) => Box::new(ApifyDataset::new(client.clone(), dataset_id)),
        _ => Box::new(LocalDataset::new(&settings.data_dir)),
    };
    let delegate = apify.clone().map(|client| {
        Arc::new(ApifyDelegate::new(client, settings.delegate_actor.clone()))
            as Arc<dyn DelegateDownloader>
    });
    let services = LiveServices::new(settings, delegate, sink);

    let outcome = pipeline::run(&input, &settings.run_options(), &services).await;

    let message = match &outcome {
        Ok(record) => {
            println!(
                "Analysis of {} complete ({}).",
                record.video_url,
                record.processing_method.as_str()
            );
            "Analysis complete! Results saved to dataset.".to_string()
        }
        Err(e) => {
            error!(error = %e, "Run failed");
            format!("Actor failed with error: {e}")
        }
    };

    if let (Some(client), Some(run_id)) = (&apify, platform.run_id.as_deref())
        && let Err(e) = client.set_status_message(run_id, &message, true).await
    {
        warn!(error = %e, "Could not update run status message");
    }

    outcome.map(|_| ())
}

fn run_cli_list(settings: &Settings) -> Result<()> {
    let files = LocalDataset::new(&settings.data_dir).list_files()?;

    if files.is_empty() {
        println!("No files found.");
        return Ok(());
    }

    println!("Found {} files:", files.len());
    println!();

    for file in files {
        let file_type = match file.file_type {
            FileType::Record => "Record",
            FileType::Report => "Report",
        };

        let size_kb = file.size / 1024;
        let size_str = if size_kb < 1024 {
            format!("{size_kb}KB")
        } else {
            format!("{:.1}MB", size_kb as f64 / 1024.0)
        };

        println!("{:<12} {:<48} {}", file_type, file.name, size_str);
    }

    Ok(())
}
