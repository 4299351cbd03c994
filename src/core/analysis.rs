use crate::core::gemini::{InferenceClient, MediaPart};
use crate::core::input::RunConfig;
use crate::error::{Error, Result};
use tracing::info;

const SUMMARY_PROMPT: &str = "Provide a comprehensive analysis of this video including:
1. Detailed summary of the main content and discussion
2. Key participants and their roles
3. Main topics, themes, and advice given
4. Specific recommendations or actionable insights mentioned
5. Any data points, numbers, or metrics discussed
6. Overall tone and style of the conversation";

const QUOTES_PROMPT: &str = "Extract the most important quotes and insights from this video:
1. List 5-7 key quotes or statements made
2. Identify the most valuable business advice given
3. What are the main problems discussed and proposed solutions?
4. Any specific strategies or frameworks mentioned?";

const STRUCTURE_PROMPT: &str = "Analyze the structure and format of this video:
1. What type of video is this? (interview, presentation, consultation, etc.)
2. How long is the video approximately?
3. What is the overall flow and organization of the content?
4. Are there distinct sections or topics covered?";

/// One analysis pass, which also names the record section it fills.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassKey {
    Summary,
    QuotesInsights,
    Structure,
    Timestamps(u32),
    Custom(String),
}

impl PassKey {
    pub fn field_name(&self) -> &'static str {
        match self {
            PassKey::Summary => "comprehensive_summary",
            PassKey::QuotesInsights => "key_quotes_insights",
            PassKey::Structure => "video_structure_analysis",
            PassKey::Timestamps(_) => "important_timestamps",
            PassKey::Custom(_) => "custom_analysis",
        }
    }

    pub fn prompt(&self) -> String {
        match self {
            PassKey::Summary => SUMMARY_PROMPT.to_string(),
            PassKey::QuotesInsights => QUOTES_PROMPT.to_string(),
            PassKey::Structure => STRUCTURE_PROMPT.to_string(),
            PassKey::Timestamps(count) => format!(
                "Identify the {count} most important moments in this video.
For each moment provide:
1. The timestamp in MM:SS format (HH:MM:SS for videos longer than an hour)
2. A short title for the moment
3. A one or two sentence description of what happens and why it matters
List exactly {count} moments in chronological order."
            ),
            PassKey::Custom(question) => format!(
                "Answer the following request about this video. Base the answer only on the video content.

{question}"
            ),
        }
    }
}

/// Which passes run for a configuration, in execution order.
pub fn plan_passes(config: &RunConfig) -> Vec<PassKey> {
    let mut passes = vec![PassKey::Summary, PassKey::QuotesInsights, PassKey::Structure];
    if config.num_timestamps > 0 {
        passes.push(PassKey::Timestamps(config.num_timestamps));
    }
    if let Some(prompt) = &config.custom_prompt {
        passes.push(PassKey::Custom(prompt.clone()));
    }
    passes
}

/// Collected pass results in the order they were produced.
#[derive(Debug, Default)]
pub struct PassOutputs {
    entries: Vec<(PassKey, String)>,
}

impl PassOutputs {
    pub fn insert(&mut self, key: PassKey, text: String) {
        self.entries.retain(|(k, _)| k.field_name() != key.field_name());
        self.entries.push((key, text));
    }

    pub fn take(&mut self, key: PassKey) -> Option<String> {
        let idx = self.entries.iter().position(|(k, _)| *k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn take_timestamps(&mut self) -> Option<(u32, String)> {
        let idx = self
            .entries
            .iter()
            .position(|(k, _)| matches!(k, PassKey::Timestamps(_)))?;
        match self.entries.remove(idx) {
            (PassKey::Timestamps(count), text) => Some((count, text)),
            _ => None,
        }
    }

    pub fn take_custom(&mut self) -> Option<(String, String)> {
        let idx = self
            .entries
            .iter()
            .position(|(k, _)| matches!(k, PassKey::Custom(_)))?;
        match self.entries.remove(idx) {
            (PassKey::Custom(prompt), text) => Some((prompt, text)),
            _ => None,
        }
    }
}

/// Run every pass sequentially. The first failure aborts the rest.
pub async fn run_passes(
    client: &dyn InferenceClient,
    media: &MediaPart,
    passes: &[PassKey],
) -> Result<PassOutputs> {
    let mut outputs = PassOutputs::default();

    for pass in passes {
        info!(pass = pass.field_name(), "Running analysis pass");
        let text = client
            .generate(media, &pass.prompt())
            .await
            .map_err(|e| match e {
                Error::Analysis { .. } => e,
                other => Error::analysis(pass.field_name(), other),
            })?;
        outputs.insert(pass.clone(), text);
    }

    info!(passes = passes.len(), "All analysis passes completed");
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gemini::RemoteAsset;
    use crate::core::input::{AcquisitionMode, Secret};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;

    struct RecordingClient {
        prompts: Mutex<Vec<String>>,
        fail_on_call: Option<usize>,
    }

    #[async_trait]
    impl InferenceClient for RecordingClient {
        async fn upload(&self, _path: &Path, _mime: &str, _name: &str) -> Result<RemoteAsset> {
            unreachable!("analysis never uploads")
        }

        async fn asset(&self, _name: &str) -> Result<RemoteAsset> {
            unreachable!("analysis never polls")
        }

        async fn generate(&self, _media: &MediaPart, prompt: &str) -> Result<String> {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(prompt.to_string());
            if self.fail_on_call == Some(prompts.len()) {
                return Err(Error::custom("quota exceeded"));
            }
            Ok(format!("answer {}", prompts.len()))
        }
    }

    fn config(num_timestamps: u32, custom_prompt: Option<&str>) -> RunConfig {
        RunConfig {
            source_url: "https://youtu.be/dQw4w9WgXcQ".to_string(),
            video_id: None,
            api_key: Secret::new("k"),
            num_timestamps,
            custom_prompt: custom_prompt.map(str::to_string),
            cookies: None,
            acquisition: AcquisitionMode::Direct,
        }
    }

    fn media() -> MediaPart {
        MediaPart {
            uri: "https://youtu.be/dQw4w9WgXcQ".to_string(),
            mime_type: None,
        }
    }

    #[test]
    fn optional_passes_follow_configuration() {
        assert_eq!(plan_passes(&config(0, None)).len(), 3);

        let passes = plan_passes(&config(5, Some("Who is the guest?")));
        assert_eq!(passes[3], PassKey::Timestamps(5));
        assert_eq!(passes[4], PassKey::Custom("Who is the guest?".to_string()));
    }

    #[test]
    fn timestamp_prompt_is_parameterized() {
        let prompt = PassKey::Timestamps(5).prompt();
        assert!(prompt.contains("the 5 most important moments"));
        assert!(prompt.contains("exactly 5 moments"));
    }

    #[tokio::test]
    async fn passes_run_in_order() {
        let client = RecordingClient {
            prompts: Mutex::new(Vec::new()),
            fail_on_call: None,
        };
        let passes = plan_passes(&config(7, Some("Summarize the pricing")));

        let mut outputs = run_passes(&client, &media(), &passes).await.unwrap();

        let prompts = client.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 5);
        assert_eq!(prompts[0], SUMMARY_PROMPT);
        assert!(prompts[3].contains("7 most important"));
        assert!(prompts[4].ends_with("Summarize the pricing"));
        assert_eq!(outputs.take_timestamps(), Some((7, "answer 4".to_string())));
    }

    #[tokio::test]
    async fn failure_aborts_remaining_passes() {
        let client = RecordingClient {
            prompts: Mutex::new(Vec::new()),
            fail_on_call: Some(2),
        };
        let passes = plan_passes(&config(5, None));

        let err = run_passes(&client, &media(), &passes).await.unwrap_err();

        assert_eq!(client.prompts.lock().unwrap().len(), 2);
        match err {
            Error::Analysis { pass, message } => {
                assert_eq!(pass, "key_quotes_insights");
                assert_eq!(message, "quota exceeded");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
