use std::sync::Arc;

use async_trait::async_trait;
use lektor_model::LectureId;
use tracing::{debug, warn};

use crate::error::{CoreError, Result};
use crate::recognize::SpeechRecognizer;
use crate::repository::LectureStore;
use crate::resolver::LectureResolver;
use crate::transcode::AudioExtractor;

/// The full per-lecture processing chain the worker invokes.
///
/// Implementations must be idempotent on the id: re-running after a partial
/// failure re-derives everything from the portal and must not corrupt the
/// store.
#[async_trait]
pub trait TranscriptionPipeline: Send + Sync {
    async fn process(&self, id: LectureId) -> Result<()>;
}

/// Production pipeline: portal page → mp3 → ASR → Postgres blobs.
pub struct LecturePipeline {
    resolver: Arc<dyn LectureResolver>,
    store: Arc<dyn LectureStore>,
    extractor: Arc<dyn AudioExtractor>,
    recognizer: Arc<dyn SpeechRecognizer>,
}

impl std::fmt::Debug for LecturePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LecturePipeline").finish()
    }
}

impl LecturePipeline {
    pub fn new(
        resolver: Arc<dyn LectureResolver>,
        store: Arc<dyn LectureStore>,
        extractor: Arc<dyn AudioExtractor>,
        recognizer: Arc<dyn SpeechRecognizer>,
    ) -> Self {
        Self {
            resolver,
            store,
            extractor,
            recognizer,
        }
    }

    /// Remove the per-id scratch files once their content is in the store.
    async fn cleanup(&self, id: LectureId, artifacts: &[std::path::PathBuf]) {
        let mut paths = self.extractor.scratch_paths(id);
        paths.extend_from_slice(artifacts);
        for path in paths {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "removed scratch file"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "could not remove scratch file");
                }
            }
        }
    }
}

#[async_trait]
impl TranscriptionPipeline for LecturePipeline {
    async fn process(&self, id: LectureId) -> Result<()> {
        let resolved = match self.resolver.resolve(id).await {
            Ok(resolved) => resolved,
            Err(err @ CoreError::MediaUrlNotFound(_)) => {
                // A page without a media url never grows one; stop the
                // refreshers from offering this id again.
                if let Err(blacklist_err) =
                    self.store.blacklist_add(id, "no media url").await
                {
                    warn!(%id, error = %blacklist_err, "could not blacklist lecture");
                }
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        match self.store.language_of(id).await {
            Ok(Some(_)) => debug!(%id, "lecture metadata already stored"),
            Ok(None) => {
                self.store
                    .add_lecture(id, &resolved.metadata, &resolved.page_url)
                    .await?;
            }
            Err(err) => {
                warn!(%id, error = %err, "could not check lecture metadata, leaving it for a later run");
            }
        }

        let audio = self.extractor.extract(id, &resolved.media_url).await?;
        let transcript = self.recognizer.transcribe(id, &audio).await?;

        let vtt = tokio::fs::read(&transcript.vtt_path).await?;
        let txt = tokio::fs::read(&transcript.txt_path).await?;
        self.store
            .save_transcript(id, &transcript.language, true, &vtt, &txt)
            .await?;

        self.cleanup(id, &[transcript.vtt_path, transcript.txt_path])
            .await;
        Ok(())
    }
}
