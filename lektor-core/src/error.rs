use lektor_model::LectureId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("player configuration is not valid JSON: {0}")]
    PlayerConfig(#[from] serde_json::Error),

    #[error("no media url found for lecture {0}")]
    MediaUrlNotFound(LectureId),

    #[error("ffmpeg failed ({status}): {stderr}")]
    Transcode { status: String, stderr: String },

    #[error("speech recognition failed: {0}")]
    Recognize(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
