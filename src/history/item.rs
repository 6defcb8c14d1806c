//! History entries and their per-feature metadata.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::features::{
    ImageGenerateRequest, NarrateRequest, SchedulerType, Segment, TranscribeRequest, TranscribeTask,
    TranscriptionResult,
};

// ---------------------------------------------------------------------------
// MediaType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Image,
    Audio,
    Text,
}

impl MediaType {
    /// File extension of the stored artifact.
    pub fn extension(&self) -> &'static str {
        match self {
            MediaType::Image => "png",
            MediaType::Audio => "wav",
            MediaType::Text => "txt",
        }
    }
}

// ---------------------------------------------------------------------------
// HistoryDetails
// ---------------------------------------------------------------------------

/// Feature-specific metadata stored next to an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryDetails {
    Diffusion {
        prompt: String,
        negative_prompt: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
        steps: Option<u32>,
        guidance_scale: Option<f32>,
        seed: Option<u64>,
        scheduler: Option<SchedulerType>,
        strength: Option<f32>,
        control_net_strength: Option<f32>,
    },
    Narrate {
        text: String,
        voice: Option<String>,
        speed: f32,
        steps: u32,
    },
    Transcribe {
        language: String,
        task: TranscribeTask,
        /// Source audio length in seconds.
        audio_seconds: f64,
        segments: Vec<Segment>,
    },
}

impl HistoryDetails {
    /// File-name prefix for this kind of entry.
    pub fn prefix(&self) -> &'static str {
        match self {
            HistoryDetails::Diffusion { .. } => "Diffusion",
            HistoryDetails::Narrate { .. } => "Narrate",
            HistoryDetails::Transcribe { .. } => "Transcribe",
        }
    }

    pub fn media_type(&self) -> MediaType {
        match self {
            HistoryDetails::Diffusion { .. } => MediaType::Image,
            HistoryDetails::Narrate { .. } => MediaType::Audio,
            HistoryDetails::Transcribe { .. } => MediaType::Text,
        }
    }

    pub fn from_image_request(request: &ImageGenerateRequest) -> Self {
        HistoryDetails::Diffusion {
            prompt: request.prompt.clone(),
            negative_prompt: request.negative_prompt.clone(),
            width: request.width,
            height: request.height,
            steps: request.steps,
            guidance_scale: request.guidance_scale,
            seed: request.seed,
            scheduler: request.scheduler,
            strength: request.strength,
            control_net_strength: request.control_net_strength,
        }
    }

    pub fn from_narrate_request(request: &NarrateRequest) -> Self {
        HistoryDetails::Narrate {
            text: request.text.clone(),
            voice: request.voice.clone(),
            speed: request.speed,
            steps: request.steps,
        }
    }

    pub fn from_transcription(request: &TranscribeRequest, result: &TranscriptionResult) -> Self {
        HistoryDetails::Transcribe {
            language: request.language.clone(),
            task: request.task,
            audio_seconds: request.audio.duration().as_secs_f64(),
            segments: result.segments.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// HistoryItem
// ---------------------------------------------------------------------------

/// One generated artifact: a media file plus a JSON metadata file named
/// `<Prefix>_<key>.<ext>` and `<Prefix>_<key>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: Uuid,
    pub media_type: MediaType,
    /// Id of the model that produced the artifact.
    pub model: String,
    pub timestamp: DateTime<Utc>,
    pub details: HistoryDetails,

    #[serde(skip)]
    pub media_path: PathBuf,
    #[serde(skip)]
    pub metadata_path: PathBuf,
}

impl HistoryItem {
    pub fn new(model: impl Into<String>, details: HistoryDetails) -> Self {
        Self {
            id: Uuid::new_v4(),
            media_type: details.media_type(),
            model: model.into(),
            timestamp: Utc::now(),
            details,
            media_path: PathBuf::new(),
            metadata_path: PathBuf::new(),
        }
    }

    /// `<Prefix>_<key>` without extension.
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.details.prefix(), self.id.simple())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_stem_uses_prefix_and_simple_uuid() {
        let item = HistoryItem::new(
            "supertonic",
            HistoryDetails::from_narrate_request(&NarrateRequest::new("hi")),
        );
        let stem = item.file_stem();
        assert!(stem.starts_with("Narrate_"));
        assert_eq!(stem.len(), "Narrate_".len() + 32);
        assert_eq!(item.media_type, MediaType::Audio);
    }

    #[test]
    fn details_are_tagged_in_json() {
        let details = HistoryDetails::from_image_request(&ImageGenerateRequest::new("cat"));
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["kind"], "diffusion");
        assert_eq!(json["prompt"], "cat");
    }

    #[test]
    fn diffusion_details_keep_control_net_strength() {
        let request = ImageGenerateRequest {
            control_net_strength: Some(0.5),
            ..ImageGenerateRequest::new("edges")
        };
        let details = HistoryDetails::from_image_request(&request);
        let json = serde_json::to_string(&details).unwrap();
        let back: HistoryDetails = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            back,
            HistoryDetails::Diffusion { control_net_strength: Some(s), .. } if s == 0.5
        ));
    }

    #[test]
    fn media_extensions() {
        assert_eq!(MediaType::Image.extension(), "png");
        assert_eq!(MediaType::Audio.extension(), "wav");
        assert_eq!(MediaType::Text.extension(), "txt");
    }
}
