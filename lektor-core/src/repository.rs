use std::collections::HashSet;

use async_trait::async_trait;
use lektor_config::Config;
use lektor_model::{LectureId, LectureMetadata, semester_for};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::{debug, info};

use crate::error::Result;

/// Everything the scheduler and pipeline need from the relational store.
///
/// All operations are idempotent with respect to the lecture id: re-running
/// a step after a partial failure must not corrupt anything.
#[async_trait]
pub trait LectureStore: Send + Sync {
    /// Create the schema if it does not exist yet.
    async fn initialize_schema(&self) -> Result<()>;

    /// Highest lecture id with a stored transcript.
    async fn highest_stored(&self) -> Result<Option<LectureId>>;

    /// Smallest lecture id with a stored transcript.
    async fn smallest_stored(&self) -> Result<Option<LectureId>>;

    /// Ids between the smallest and highest stored ones that have no
    /// transcript and are not blacklisted, in ascending order.
    async fn missing_inbetween_not_blacklisted(&self) -> Result<Vec<LectureId>>;

    /// Whether an original-language transcript exists for `id`.
    async fn original_exists(&self, id: LectureId) -> Result<bool>;

    /// Stored page language for `id`, if lecture metadata was persisted.
    async fn language_of(&self, id: LectureId) -> Result<Option<String>>;

    /// Persist the VTT and TXT artifacts of one transcription run.
    async fn save_transcript(
        &self,
        id: LectureId,
        language: &str,
        is_original: bool,
        vtt: &[u8],
        txt: &[u8],
    ) -> Result<()>;

    /// Persist scraped lecture metadata along with its series and lecturer
    /// rows.
    async fn add_lecture(
        &self,
        id: LectureId,
        metadata: &LectureMetadata,
        page_url: &str,
    ) -> Result<()>;

    /// Mark `id` permanently unprocessable; repeated calls bump the retry
    /// counter.
    async fn blacklist_add(&self, id: LectureId, reason: &str) -> Result<()>;
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS vtt_files (
    id SERIAL PRIMARY KEY,
    teletask_id INTEGER NOT NULL,
    language VARCHAR(50) NOT NULL,
    is_original_lang BOOLEAN NOT NULL,
    vtt_data BYTEA NOT NULL,
    txt_data BYTEA NOT NULL,
    asr_model VARCHAR(255),
    compute_type VARCHAR(255),
    creation_date TIMESTAMPTZ DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_vtt_files_teletask_id ON vtt_files (teletask_id);
CREATE TABLE IF NOT EXISTS series_data (
    series_id INTEGER PRIMARY KEY,
    series_name VARCHAR(255),
    lecturer_id VARCHAR(255)
);
CREATE TABLE IF NOT EXISTS lecturer_data (
    lecturer_id INTEGER PRIMARY KEY,
    lecturer_name VARCHAR(255)
);
CREATE TABLE IF NOT EXISTS lecture_data (
    teletask_id INTEGER PRIMARY KEY,
    language VARCHAR(50),
    date DATE,
    lecturer_id INTEGER,
    series_id INTEGER,
    semester VARCHAR(50),
    duration INTERVAL,
    title VARCHAR(255),
    video_mp4 VARCHAR(255)
);
CREATE TABLE IF NOT EXISTS blacklist_ids (
    teletask_id INTEGER PRIMARY KEY,
    reason VARCHAR(255),
    times_tried INTEGER DEFAULT 1,
    creation_date TIMESTAMPTZ DEFAULT NOW()
);
"#;

/// Gap detection between the smallest and largest stored id.
const MISSING_INBETWEEN: &str = r#"
WITH bounds AS (
    SELECT MIN(teletask_id) AS min_id, MAX(teletask_id) AS max_id
    FROM vtt_files
),
all_ids AS (
    SELECT generate_series(
        (SELECT min_id FROM bounds),
        (SELECT max_id FROM bounds)
    ) AS teletask_id
)
SELECT all_ids.teletask_id
FROM all_ids
LEFT JOIN vtt_files vf ON all_ids.teletask_id = vf.teletask_id
WHERE vf.teletask_id IS NULL
ORDER BY all_ids.teletask_id;
"#;

/// PostgreSQL-backed [`LectureStore`].
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    asr_model: String,
    compute_type: String,
}

impl PostgresStore {
    /// Connect a small pool using the database settings in `config`.
    pub async fn connect(config: &Config) -> Result<Self> {
        let options = PgConnectOptions::new()
            .host(&config.database.host)
            .port(config.database.port)
            .username(&config.database.user)
            .password(&config.database.password)
            .database(&config.database.name);
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool,
            asr_model: config.asr_model.clone(),
            compute_type: config.compute_type.clone(),
        })
    }
}

#[async_trait]
impl LectureStore for PostgresStore {
    async fn initialize_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        info!("database schema initialized");
        Ok(())
    }

    async fn highest_stored(&self) -> Result<Option<LectureId>> {
        let max: Option<i32> =
            sqlx::query_scalar("SELECT MAX(teletask_id) FROM vtt_files")
                .fetch_one(&self.pool)
                .await?;
        Ok(max.and_then(|raw| LectureId::new(raw as u32)))
    }

    async fn smallest_stored(&self) -> Result<Option<LectureId>> {
        let min: Option<i32> =
            sqlx::query_scalar("SELECT MIN(teletask_id) FROM vtt_files")
                .fetch_one(&self.pool)
                .await?;
        Ok(min.and_then(|raw| LectureId::new(raw as u32)))
    }

    async fn missing_inbetween_not_blacklisted(&self) -> Result<Vec<LectureId>> {
        let missing: Vec<i32> = sqlx::query_scalar(MISSING_INBETWEEN)
            .fetch_all(&self.pool)
            .await?;
        let blacklisted: HashSet<i32> =
            sqlx::query_scalar("SELECT teletask_id FROM blacklist_ids")
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .collect();

        let mut ids: Vec<LectureId> = missing
            .into_iter()
            .filter(|raw| !blacklisted.contains(raw))
            .filter_map(|raw| LectureId::new(raw as u32))
            .collect();
        ids.sort_unstable();
        debug!(count = ids.len(), "missing ids between stored bounds");
        Ok(ids)
    }

    async fn original_exists(&self, id: LectureId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM vtt_files \
             WHERE teletask_id = $1 AND is_original_lang = TRUE)",
        )
        .bind(id.get() as i32)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn language_of(&self, id: LectureId) -> Result<Option<String>> {
        let language: Option<String> = sqlx::query_scalar(
            "SELECT language FROM lecture_data WHERE teletask_id = $1",
        )
        .bind(id.get() as i32)
        .fetch_optional(&self.pool)
        .await?;
        Ok(language)
    }

    async fn save_transcript(
        &self,
        id: LectureId,
        language: &str,
        is_original: bool,
        vtt: &[u8],
        txt: &[u8],
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO vtt_files \
             (teletask_id, language, is_original_lang, vtt_data, txt_data, asr_model, compute_type) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(id.get() as i32)
        .bind(language)
        .bind(is_original)
        .bind(vtt)
        .bind(txt)
        .bind(&self.asr_model)
        .bind(&self.compute_type)
        .execute(&self.pool)
        .await?;
        info!(%id, language, "transcript artifacts saved");
        Ok(())
    }

    async fn add_lecture(
        &self,
        id: LectureId,
        metadata: &LectureMetadata,
        page_url: &str,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (lecturer_id, lecturer_name) in metadata
            .lecturer_ids
            .iter()
            .zip(metadata.lecturer_names.iter())
        {
            sqlx::query(
                "INSERT INTO lecturer_data (lecturer_id, lecturer_name) \
                 VALUES ($1, $2) ON CONFLICT (lecturer_id) DO NOTHING",
            )
            .bind(*lecturer_id as i32)
            .bind(lecturer_name)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(series_id) = metadata.series_id {
            sqlx::query(
                "INSERT INTO series_data (series_id, series_name, lecturer_id) \
                 VALUES ($1, $2, $3) ON CONFLICT (series_id) DO NOTHING",
            )
            .bind(series_id as i32)
            .bind(&metadata.series_name)
            .bind(metadata.lecturer_ids.first().map(|id| id.to_string()))
            .execute(&mut *tx)
            .await?;
        }

        // The portal prints full language names; the store keeps ISO codes.
        let language = metadata
            .language
            .as_deref()
            .map(|language| if language == "English" { "en" } else { "de" });
        let semester = metadata.date.map(semester_for);

        sqlx::query(
            "INSERT INTO lecture_data \
             (teletask_id, language, date, lecturer_id, series_id, semester, duration, title, video_mp4) \
             VALUES ($1, $2, $3, $4, $5, $6, $7::interval, $8, $9) \
             ON CONFLICT (teletask_id) DO NOTHING",
        )
        .bind(id.get() as i32)
        .bind(language)
        .bind(metadata.date)
        .bind(metadata.lecturer_ids.first().map(|raw| *raw as i32))
        .bind(metadata.series_id.map(|raw| raw as i32))
        .bind(semester)
        .bind(&metadata.duration)
        .bind(&metadata.title)
        .bind(page_url)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(%id, "lecture metadata saved");
        Ok(())
    }

    async fn blacklist_add(&self, id: LectureId, reason: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO blacklist_ids (teletask_id, reason) VALUES ($1, $2) \
             ON CONFLICT (teletask_id) DO UPDATE \
             SET times_tried = blacklist_ids.times_tried + 1, \
                 reason = EXCLUDED.reason",
        )
        .bind(id.get() as i32)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        info!(%id, reason, "lecture blacklisted");
        Ok(())
    }
}
