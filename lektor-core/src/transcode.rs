use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use lektor_model::LectureId;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{CoreError, Result};

/// Produces the per-lecture audio file the recognizer consumes.
#[async_trait]
pub trait AudioExtractor: Send + Sync {
    /// Produce `<id>.mp3` from the lecture's media url and return its path.
    async fn extract(&self, id: LectureId, media_url: &str) -> Result<PathBuf>;

    /// Scratch files `extract` may have left behind for `id`.
    fn scratch_paths(&self, id: LectureId) -> Vec<PathBuf>;
}

/// ffmpeg-based [`AudioExtractor`].
///
/// ffmpeg reads the remote mp4 directly when the CDN cooperates; when it
/// does not, the file is downloaded first and converted locally.
#[derive(Debug)]
pub struct FfmpegExtractor {
    client: reqwest::Client,
    ffmpeg_path: String,
    recording_dir: PathBuf,
}

impl FfmpegExtractor {
    pub fn new(recording_dir: PathBuf) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            ffmpeg_path: "ffmpeg".to_string(),
            recording_dir,
        })
    }

    fn mp3_path(&self, id: LectureId) -> PathBuf {
        self.recording_dir.join(format!("{id}.mp3"))
    }

    fn mp4_path(&self, id: LectureId) -> PathBuf {
        self.recording_dir.join(format!("{id}.mp4"))
    }

    /// Strip the video track and encode the audio as mp3. `source` is a url
    /// or a local path; ffmpeg handles both.
    async fn convert_to_mp3(
        &self,
        source: impl AsRef<std::ffi::OsStr>,
        out: &Path,
    ) -> Result<()> {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.arg("-hide_banner");
        cmd.arg("-loglevel").arg("error");
        cmd.arg("-y");
        cmd.arg("-i").arg(source);
        cmd.arg("-vn");
        cmd.arg("-acodec").arg("libmp3lame");
        cmd.arg("-q:a").arg("2");
        cmd.arg(out);
        cmd.kill_on_drop(true);

        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(CoreError::Transcode {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        debug!(out = %out.display(), "saved mp3");
        Ok(())
    }

    async fn download(&self, url: &str, target: &Path) -> Result<()> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let mut file = tokio::fs::File::create(target).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        info!(target = %target.display(), "download complete");
        Ok(())
    }
}

#[async_trait]
impl AudioExtractor for FfmpegExtractor {
    async fn extract(&self, id: LectureId, media_url: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.recording_dir).await?;
        let mp3 = self.mp3_path(id);

        match self.convert_to_mp3(media_url, &mp3).await {
            Ok(()) => return Ok(mp3),
            Err(err) => {
                warn!(%id, error = %err, "direct conversion failed, downloading mp4 first");
            }
        }

        let mp4 = self.mp4_path(id);
        self.download(media_url, &mp4).await?;
        self.convert_to_mp3(&mp4, &mp3).await?;
        Ok(mp3)
    }

    fn scratch_paths(&self, id: LectureId) -> Vec<PathBuf> {
        vec![self.mp3_path(id), self.mp4_path(id)]
    }
}
