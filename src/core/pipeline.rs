use crate::config::Settings;
use crate::core::acquire::{MediaAcquirer, MediaSource, YtDlp};
use crate::core::analysis::{plan_passes, run_passes};
use crate::core::delegate::DelegateDownloader;
use crate::core::gemini::{GeminiClient, InferenceClient, MediaPart};
use crate::core::input::{RunInput, Secret};
use crate::core::poller::{self, PollPolicy};
use crate::core::record::{AnalysisRecord, RecordMetadata};
use crate::core::storage::RecordSink;
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub model: String,
    pub poll: PollPolicy,
    pub default_key: Option<Secret>,
}

/// External collaborators of a run.
pub trait Services: Send + Sync {
    fn inference(&self, api_key: &Secret) -> Result<Arc<dyn InferenceClient>>;

    fn acquirer(&self) -> &MediaAcquirer;

    fn sink(&self) -> &dyn RecordSink;
}

pub struct LiveServices {
    gemini_api_base: String,
    model: String,
    acquirer: MediaAcquirer,
    sink: Box<dyn RecordSink>,
}

impl LiveServices {
    pub fn new(
        settings: &Settings,
        delegate: Option<Arc<dyn DelegateDownloader>>,
        sink: Box<dyn RecordSink>,
    ) -> Self {
        let extractor = Arc::new(YtDlp::new(settings.ytdlp_bin.clone()));
        Self {
            gemini_api_base: settings.gemini_api_base.clone(),
            model: settings.model.clone(),
            acquirer: MediaAcquirer::new(extractor, delegate, settings.work_root()),
            sink,
        }
    }
}

impl Services for LiveServices {
    fn inference(&self, api_key: &Secret) -> Result<Arc<dyn InferenceClient>> {
        Ok(Arc::new(GeminiClient::new(
            api_key.clone(),
            &self.gemini_api_base,
            &self.model,
        )?))
    }

    fn acquirer(&self) -> &MediaAcquirer {
        &self.acquirer
    }

    fn sink(&self) -> &dyn RecordSink {
        self.sink.as_ref()
    }
}

/// Validate, acquire, upload and wait, analyze, publish.
///
/// Local media is owned by this function for the whole run and is removed on
/// every return path; nothing is published unless every pass succeeded.
pub async fn run(
    input: &RunInput,
    options: &RunOptions,
    services: &dyn Services,
) -> Result<AnalysisRecord> {
    let config = input.validate(options.default_key.as_ref())?;
    info!(url = %config.source_url, "Starting analysis of YouTube video");

    let inference = services.inference(&config.api_key)?;
    let source = services.acquirer().acquire(&config).await?;
    let processing_method = source.processing_method();

    let (mut local, media, asset_name) = match source {
        MediaSource::Reference { uri } => (
            None,
            MediaPart {
                uri,
                mime_type: None,
            },
            None,
        ),
        MediaSource::Local { media: local, .. } => {
            let uploaded = inference
                .upload(local.path(), local.mime_type(), &local.display_name())
                .await?;
            let ready = poller::wait_until_active(inference.as_ref(), uploaded, options.poll).await?;
            let part = ready.media_part();
            (Some(local), part, Some(ready.name))
        }
    };

    let passes = plan_passes(&config);
    let outputs = run_passes(inference.as_ref(), &media, &passes).await?;

    let record = AnalysisRecord::assemble(
        RecordMetadata {
            video_url: config.source_url.clone(),
            video_id: config.video_id.clone(),
            processing_method,
            gemini_file_name: asset_name,
            model: options.model.clone(),
        },
        outputs,
    )
    .ok_or_else(|| Error::custom("Analysis finished without all required sections"))?;

    let location = services.sink().publish(&record).await?;
    info!(location = %location, "Analysis complete! Results saved to dataset.");

    if let Some(local) = local.as_mut() {
        local.cleanup();
    }

    Ok(record)
}
