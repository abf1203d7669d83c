//! Intake normalizer: turns channel inputs (text, voice, image) into one
//! [`SymptomReport`] with an empty symptom list.
//!
//! Source confidence: text 1.0, voice the transcriber's own figure or 0.8,
//! image 0.8. The report takes the minimum over its segments.

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::AppError;
use crate::external::speech::Transcriber;
use crate::llm::LlmProvider;
use crate::prompts::{self, PromptKind};
use crate::types::{IntakeInput, IntakeSegment, Modality, SymptomReport};

pub const TEXT_CONFIDENCE: f32 = 1.0;
pub const VOICE_FALLBACK_CONFIDENCE: f32 = 0.8;
pub const IMAGE_CONFIDENCE: f32 = 0.8;

/// Collaborators the normalizer calls out to.
#[derive(Debug, Clone)]
pub struct IntakeDeps {
    pub llm: LlmProvider,
    pub transcriber: Transcriber,
}

pub async fn normalize(inputs: Vec<IntakeInput>, deps: &IntakeDeps) -> Result<SymptomReport, AppError> {
    if inputs.is_empty() {
        return Err(AppError::Intake("no input provided".into()));
    }
    let mut segments = Vec::with_capacity(inputs.len());
    for input in inputs {
        segments.push(normalize_one(input, deps).await?);
    }
    debug!(
        segments = segments.len(),
        chars = segments.iter().map(|s| s.content.len()).sum::<usize>(),
        "intake normalised"
    );
    Ok(SymptomReport::new(segments))
}

async fn normalize_one(input: IntakeInput, deps: &IntakeDeps) -> Result<IntakeSegment, AppError> {
    match input {
        IntakeInput::Text(text) => {
            let content = text.trim();
            if content.is_empty() {
                return Err(AppError::Intake("text input is empty".into()));
            }
            Ok(IntakeSegment {
                modality: Modality::Text,
                payload_ref: "text".into(),
                content: content.to_string(),
                confidence: TEXT_CONFIDENCE,
            })
        }
        IntakeInput::Voice { bytes, mime, reference } => {
            let transcription = deps.transcriber.transcribe(&bytes, &mime).await.map_err(|e| {
                warn!(bytes = bytes.len(), error = %e, "transcription failed");
                AppError::Intake(format!("transcription failed: {e}"))
            })?;
            let content = transcription.text.trim();
            if content.is_empty() {
                return Err(AppError::Intake("transcription is empty".into()));
            }
            Ok(IntakeSegment {
                modality: Modality::Voice,
                payload_ref: payload_ref(&reference, &bytes),
                content: content.to_string(),
                confidence: transcription
                    .confidence
                    .map(|c| c.clamp(0.0, 1.0))
                    .unwrap_or(VOICE_FALLBACK_CONFIDENCE),
            })
        }
        IntakeInput::Image { bytes, mime, reference } => {
            let instruction = prompts::render(PromptKind::DescribeImage, []);
            let description = deps
                .llm
                .describe_image(&bytes, &mime, &instruction)
                .await
                .map_err(|e| {
                    warn!(bytes = bytes.len(), error = %e, "image description failed");
                    AppError::Intake(format!("image description failed: {e}"))
                })?;
            let content = description.trim();
            if content.is_empty() {
                return Err(AppError::Intake("image description is empty".into()));
            }
            Ok(IntakeSegment {
                modality: Modality::Image,
                payload_ref: payload_ref(&reference, &bytes),
                content: content.to_string(),
                confidence: IMAGE_CONFIDENCE,
            })
        }
    }
}

/// The caller's reference when given, otherwise `upload:<first 12 hex of sha256>`.
pub fn payload_ref(reference: &str, bytes: &[u8]) -> String {
    let reference = reference.trim();
    if !reference.is_empty() {
        return reference.to_string();
    }
    let digest = hex::encode(Sha256::digest(bytes));
    format!("upload:{}", &digest[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::speech::Transcription;
    use crate::llm::providers::scripted::ScriptedProvider;

    fn deps(confidence: Option<f32>) -> IntakeDeps {
        IntakeDeps {
            llm: LlmProvider::Scripted(ScriptedProvider::new().image_description("red rash on forearm")),
            transcriber: Transcriber::Fixed(Transcription { text: " sore throat ".into(), confidence }),
        }
    }

    #[tokio::test]
    async fn text_is_trimmed_with_full_confidence() {
        let report = normalize(vec![IntakeInput::Text("  headache \n".into())], &deps(None))
            .await
            .unwrap();
        assert_eq!(report.segments()[0].content, "headache");
        assert!((report.confidence() - 1.0).abs() < f32::EPSILON);
        assert!(report.symptoms().is_empty());
    }

    #[tokio::test]
    async fn empty_inputs_rejected() {
        assert!(matches!(normalize(vec![], &deps(None)).await, Err(AppError::Intake(_))));
        let blank = normalize(vec![IntakeInput::Text("   ".into())], &deps(None)).await;
        assert!(matches!(blank, Err(AppError::Intake(_))));
    }

    #[tokio::test]
    async fn voice_uses_provider_confidence_or_fallback() {
        let voice = || IntakeInput::Voice { bytes: vec![1, 2, 3], mime: "audio/wav".into(), reference: String::new() };

        let report = normalize(vec![voice()], &deps(Some(0.65))).await.unwrap();
        assert!((report.confidence() - 0.65).abs() < 1e-6);
        assert_eq!(report.segments()[0].content, "sore throat");

        let report = normalize(vec![voice()], &deps(None)).await.unwrap();
        assert!((report.confidence() - VOICE_FALLBACK_CONFIDENCE).abs() < 1e-6);
    }

    #[tokio::test]
    async fn mixed_report_takes_minimum() {
        let inputs = vec![
            IntakeInput::Text("itchy skin".into()),
            IntakeInput::Image { bytes: vec![9; 8], mime: "image/png".into(), reference: "rash.png".into() },
        ];
        let report = normalize(inputs, &deps(None)).await.unwrap();
        assert_eq!(report.modalities(), vec![Modality::Text, Modality::Image]);
        assert_eq!(report.segments()[1].payload_ref, "rash.png");
        assert!((report.confidence() - IMAGE_CONFIDENCE).abs() < 1e-6);
    }

    #[tokio::test]
    async fn empty_audio_is_intake_error() {
        let input = IntakeInput::Voice { bytes: vec![], mime: "audio/wav".into(), reference: String::new() };
        assert!(matches!(normalize(vec![input], &deps(None)).await, Err(AppError::Intake(_))));
    }

    #[test]
    fn upload_reference_is_digest_prefix() {
        let r = payload_ref("", b"abc");
        assert_eq!(r, "upload:ba7816bf8f01");
        assert_eq!(payload_ref(" clip.wav ", b"abc"), "clip.wav");
    }
}
