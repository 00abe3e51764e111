use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use lektor_config::Config;
use lektor_model::{LectureId, Transcript};
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{CoreError, Result};

/// Speech-to-text backend producing WebVTT and plain-text artifacts.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn transcribe(&self, id: LectureId, audio: &Path) -> Result<Transcript>;
}

/// Shells out to the whisperx CLI.
///
/// One invocation with `--output_format all` yields both the VTT and the
/// TXT artifact; the detected language is taken from whisperx's stdout.
#[derive(Debug)]
pub struct WhisperxRecognizer {
    command: String,
    model: String,
    compute_type: String,
    artifact_dir: PathBuf,
}

impl WhisperxRecognizer {
    pub fn new(config: &Config) -> Self {
        Self {
            command: "whisperx".to_string(),
            model: config.asr_model.clone(),
            compute_type: config.compute_type.clone(),
            artifact_dir: config.artifact_dir.clone(),
        }
    }
}

#[async_trait]
impl SpeechRecognizer for WhisperxRecognizer {
    async fn transcribe(&self, id: LectureId, audio: &Path) -> Result<Transcript> {
        tokio::fs::create_dir_all(&self.artifact_dir).await?;

        info!(%id, model = %self.model, "transcribing");
        let mut cmd = Command::new(&self.command);
        cmd.arg(audio);
        cmd.arg("--model").arg(&self.model);
        cmd.arg("--compute_type").arg(&self.compute_type);
        cmd.arg("--output_dir").arg(&self.artifact_dir);
        cmd.arg("--output_format").arg("all");
        cmd.kill_on_drop(true);

        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(CoreError::Recognize(format!(
                "whisperx exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let language = detected_language(&stdout).ok_or_else(|| {
            CoreError::Recognize("no detected language in whisperx output".to_string())
        })?;
        debug!(%id, language, "language detected");

        let stem = audio
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| id.to_string());
        Ok(Transcript {
            id,
            language,
            vtt_path: self.artifact_dir.join(format!("{stem}.vtt")),
            txt_path: self.artifact_dir.join(format!("{stem}.txt")),
        })
    }
}

fn detected_language(stdout: &str) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"Detected language:\s*([a-z]{2,3})").expect("static regex")
        })
        .captures(stdout)
        .map(|caps| caps[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_detected_language_from_stdout() {
        let stdout = "Performing transcription...\n\
                      Detected language: de (0.99) in first 30s of audio...\n";
        assert_eq!(detected_language(stdout).as_deref(), Some("de"));
    }

    #[test]
    fn missing_language_line_yields_none() {
        assert_eq!(detected_language("Performing transcription...\n"), None);
    }
}
