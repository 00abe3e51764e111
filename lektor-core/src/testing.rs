//! In-memory stand-ins for the external collaborators, shared by this
//! crate's tests and (behind the `testing` feature) by downstream ones.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use async_trait::async_trait;
use lektor_model::{LectureId, LectureMetadata, ProbeStatus, Transcript};
use tokio::sync::Mutex;

use crate::error::{CoreError, Result};
use crate::pipeline::TranscriptionPipeline;
use crate::recognize::SpeechRecognizer;
use crate::repository::LectureStore;
use crate::resolver::{LectureResolver, ResolvedLecture};
use crate::transcode::AudioExtractor;

/// Resolver answering from a fixed table of probe statuses and resolved
/// pages.
#[derive(Debug)]
pub struct StaticResolver {
    default: ProbeStatus,
    statuses: Mutex<HashMap<LectureId, ProbeStatus>>,
    resolved: Mutex<HashMap<LectureId, ResolvedLecture>>,
    probed: Mutex<Vec<LectureId>>,
}

impl StaticResolver {
    /// Every id answers `default` unless overridden with [`set`].
    ///
    /// [`set`]: StaticResolver::set
    pub fn with_default(default: ProbeStatus) -> Self {
        Self {
            default,
            statuses: Mutex::new(HashMap::new()),
            resolved: Mutex::new(HashMap::new()),
            probed: Mutex::new(Vec::new()),
        }
    }

    pub async fn set(&self, id: LectureId, status: ProbeStatus) {
        self.statuses.lock().await.insert(id, status);
    }

    pub async fn set_resolved(
        &self,
        id: LectureId,
        media_url: &str,
        metadata: LectureMetadata,
    ) {
        self.resolved.lock().await.insert(
            id,
            ResolvedLecture {
                media_url: media_url.to_string(),
                metadata,
                page_url: format!("https://portal.test/lecture/video/{id}"),
            },
        );
    }

    /// Every id probed so far, in order.
    pub async fn probed(&self) -> Vec<LectureId> {
        self.probed.lock().await.clone()
    }
}

#[async_trait]
impl LectureResolver for StaticResolver {
    async fn probe(&self, id: LectureId) -> ProbeStatus {
        self.probed.lock().await.push(id);
        self.statuses
            .lock()
            .await
            .get(&id)
            .copied()
            .unwrap_or(self.default)
    }

    async fn resolve(&self, id: LectureId) -> Result<ResolvedLecture> {
        self.resolved
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(CoreError::MediaUrlNotFound(id))
    }
}

/// In-memory [`LectureStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    stored: Mutex<BTreeSet<LectureId>>,
    blacklist: Mutex<BTreeSet<LectureId>>,
    lectures: Mutex<HashMap<LectureId, String>>,
    transcripts: Mutex<Vec<(LectureId, String)>>,
    lectures_added: Mutex<usize>,
}

impl MemoryStore {
    pub async fn insert_stored(&self, id: LectureId) {
        self.stored.lock().await.insert(id);
    }

    pub async fn insert_blacklisted(&self, id: LectureId) {
        self.blacklist.lock().await.insert(id);
    }

    pub async fn insert_lecture_language(&self, id: LectureId, language: &str) {
        self.lectures.lock().await.insert(id, language.to_string());
    }

    pub async fn is_blacklisted(&self, id: LectureId) -> bool {
        self.blacklist.lock().await.contains(&id)
    }

    /// `(id, language)` of every saved transcript, in save order.
    pub async fn transcripts(&self) -> Vec<(LectureId, String)> {
        self.transcripts.lock().await.clone()
    }

    /// How many times `add_lecture` was called.
    pub async fn lectures_added(&self) -> usize {
        *self.lectures_added.lock().await
    }
}

#[async_trait]
impl LectureStore for MemoryStore {
    async fn initialize_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn highest_stored(&self) -> Result<Option<LectureId>> {
        Ok(self.stored.lock().await.iter().next_back().copied())
    }

    async fn smallest_stored(&self) -> Result<Option<LectureId>> {
        Ok(self.stored.lock().await.iter().next().copied())
    }

    async fn missing_inbetween_not_blacklisted(&self) -> Result<Vec<LectureId>> {
        let stored = self.stored.lock().await;
        let blacklist = self.blacklist.lock().await;
        let (Some(min), Some(max)) =
            (stored.iter().next(), stored.iter().next_back())
        else {
            return Ok(Vec::new());
        };
        Ok((min.get()..=max.get())
            .filter_map(LectureId::new)
            .filter(|id| !stored.contains(id) && !blacklist.contains(id))
            .collect())
    }

    async fn original_exists(&self, id: LectureId) -> Result<bool> {
        Ok(self.stored.lock().await.contains(&id))
    }

    async fn language_of(&self, id: LectureId) -> Result<Option<String>> {
        Ok(self.lectures.lock().await.get(&id).cloned())
    }

    async fn save_transcript(
        &self,
        id: LectureId,
        language: &str,
        _is_original: bool,
        _vtt: &[u8],
        _txt: &[u8],
    ) -> Result<()> {
        self.transcripts
            .lock()
            .await
            .push((id, language.to_string()));
        self.stored.lock().await.insert(id);
        Ok(())
    }

    async fn add_lecture(
        &self,
        id: LectureId,
        metadata: &LectureMetadata,
        _page_url: &str,
    ) -> Result<()> {
        *self.lectures_added.lock().await += 1;
        self.lectures.lock().await.insert(
            id,
            metadata.language.clone().unwrap_or_else(|| "de".to_string()),
        );
        Ok(())
    }

    async fn blacklist_add(&self, id: LectureId, _reason: &str) -> Result<()> {
        self.blacklist.lock().await.insert(id);
        Ok(())
    }
}

/// Pipeline that records the ids it was handed and fails on request.
#[derive(Debug, Default)]
pub struct RecordingPipeline {
    processed: Mutex<Vec<LectureId>>,
    failures: Mutex<BTreeSet<LectureId>>,
}

impl RecordingPipeline {
    pub async fn fail_on(&self, id: LectureId) {
        self.failures.lock().await.insert(id);
    }

    pub async fn processed(&self) -> Vec<LectureId> {
        self.processed.lock().await.clone()
    }
}

#[async_trait]
impl TranscriptionPipeline for RecordingPipeline {
    async fn process(&self, id: LectureId) -> Result<()> {
        self.processed.lock().await.push(id);
        if self.failures.lock().await.contains(&id) {
            return Err(CoreError::Recognize("injected failure".to_string()));
        }
        Ok(())
    }
}

/// Extractor that writes a placeholder mp3 instead of invoking ffmpeg.
#[derive(Debug)]
pub struct StubExtractor {
    recording_dir: PathBuf,
}

impl StubExtractor {
    pub fn new(recording_dir: PathBuf) -> Self {
        Self { recording_dir }
    }
}

#[async_trait]
impl AudioExtractor for StubExtractor {
    async fn extract(&self, id: LectureId, _media_url: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.recording_dir).await?;
        let mp3 = self.recording_dir.join(format!("{id}.mp3"));
        tokio::fs::write(&mp3, b"mp3").await?;
        Ok(mp3)
    }

    fn scratch_paths(&self, id: LectureId) -> Vec<PathBuf> {
        vec![
            self.recording_dir.join(format!("{id}.mp3")),
            self.recording_dir.join(format!("{id}.mp4")),
        ]
    }
}

/// Recognizer that writes canned artifacts instead of invoking whisperx.
#[derive(Debug)]
pub struct StubRecognizer {
    artifact_dir: PathBuf,
    language: String,
}

impl StubRecognizer {
    pub fn new(artifact_dir: PathBuf, language: &str) -> Self {
        Self {
            artifact_dir,
            language: language.to_string(),
        }
    }
}

#[async_trait]
impl SpeechRecognizer for StubRecognizer {
    async fn transcribe(&self, id: LectureId, audio: &std::path::Path) -> Result<Transcript> {
        tokio::fs::create_dir_all(&self.artifact_dir).await?;
        let stem = audio
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| id.to_string());
        let vtt_path = self.artifact_dir.join(format!("{stem}.vtt"));
        let txt_path = self.artifact_dir.join(format!("{stem}.txt"));
        tokio::fs::write(&vtt_path, b"WEBVTT\n\n00:00.000 --> 00:05.000\nhello\n").await?;
        tokio::fs::write(&txt_path, b"hello\n").await?;
        Ok(Transcript {
            id,
            language: self.language.clone(),
            vtt_path,
            txt_path,
        })
    }
}
