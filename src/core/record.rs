use crate::core::analysis::{PassKey, PassOutputs};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMethod {
    DirectYoutubeUrl,
    LocalDownload,
    ExternalDelegateDownload,
}

impl ProcessingMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingMethod::DirectYoutubeUrl => "direct_youtube_url",
            ProcessingMethod::LocalDownload => "local_download",
            ProcessingMethod::ExternalDelegateDownload => "external_delegate_download",
        }
    }
}

/// The published result of one run. Optional sections are omitted entirely
/// when their pass was disabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub video_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    pub comprehensive_summary: String,
    pub key_quotes_insights: String,
    pub video_structure_analysis: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub important_timestamps: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_timestamps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_analysis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_prompt: Option<String>,
    pub processing_method: ProcessingMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gemini_file_name: Option<String>,
    pub model: String,
    pub analyzed_at: DateTime<Utc>,
}

pub struct RecordMetadata {
    pub video_url: String,
    pub video_id: Option<String>,
    pub processing_method: ProcessingMethod,
    pub gemini_file_name: Option<String>,
    pub model: String,
}

impl AnalysisRecord {
    /// Returns `None` if one of the always-on sections is missing.
    pub fn assemble(meta: RecordMetadata, mut outputs: PassOutputs) -> Option<Self> {
        let comprehensive_summary = outputs.take(PassKey::Summary)?;
        let key_quotes_insights = outputs.take(PassKey::QuotesInsights)?;
        let video_structure_analysis = outputs.take(PassKey::Structure)?;

        let (important_timestamps, num_timestamps) = match outputs.take_timestamps() {
            Some((count, text)) => (Some(text), Some(count)),
            None => (None, None),
        };
        let (custom_analysis, custom_prompt) = match outputs.take_custom() {
            Some((prompt, text)) => (Some(text), Some(prompt)),
            None => (None, None),
        };

        Some(Self {
            video_url: meta.video_url,
            video_id: meta.video_id,
            comprehensive_summary,
            key_quotes_insights,
            video_structure_analysis,
            important_timestamps,
            num_timestamps,
            custom_analysis,
            custom_prompt,
            processing_method: meta.processing_method,
            gemini_file_name: meta.gemini_file_name,
            model: meta.model,
            analyzed_at: Utc::now(),
        })
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Video analysis\n");
        let _ = writeln!(out, "| Field | Value |");
        let _ = writeln!(out, "|-------|-------|");
        let _ = writeln!(out, "| URL | {} |", self.video_url);
        if let Some(id) = &self.video_id {
            let _ = writeln!(out, "| Video ID | {id} |");
        }
        let _ = writeln!(out, "| Method | {} |", self.processing_method.as_str());
        let _ = writeln!(out, "| Model | {} |", self.model);
        let _ = writeln!(out, "| Analyzed at | {} |", self.analyzed_at.to_rfc3339());

        section(&mut out, "Comprehensive summary", &self.comprehensive_summary);
        section(&mut out, "Key quotes and insights", &self.key_quotes_insights);
        section(&mut out, "Structure", &self.video_structure_analysis);
        if let Some(text) = &self.important_timestamps {
            section(&mut out, "Important timestamps", text);
        }
        if let (Some(prompt), Some(text)) = (&self.custom_prompt, &self.custom_analysis) {
            let _ = write!(
                out,
                "\n## Custom analysis\n\n{}\n\n{}\n",
                blockquote(prompt),
                text.trim()
            );
        }

        out
    }
}

fn section(out: &mut String, title: &str, body: &str) {
    let _ = write!(out, "\n## {title}\n\n{}\n", body.trim());
}

fn blockquote(text: &str) -> String {
    text.trim()
        .lines()
        .map(|line| {
            let line = line.trim_end();
            if line.is_empty() {
                ">".to_string()
            } else {
                format!("> {line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
