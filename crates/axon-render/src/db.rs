use rusqlite::Connection;

use crate::error::Result;

/// Initialise the render-job schema in `conn` (idempotent).
///
/// The partial unique index enforces at the storage layer that one
/// `video_id` never holds two non-terminal jobs at once.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS render_jobs (
            job_id         TEXT    NOT NULL PRIMARY KEY,
            video_id       TEXT    NOT NULL,
            script_id      TEXT    NOT NULL,
            status         TEXT    NOT NULL DEFAULT 'QUEUED',
            step           TEXT,
            progress       INTEGER NOT NULL DEFAULT 0,
            message        TEXT,
            error_code     TEXT,
            error_message  TEXT,
            video_url      TEXT,
            subtitle_url   TEXT,
            thumbnail_url  TEXT,
            spec_snapshot  TEXT,               -- JSON-encoded RenderSpec
            created_by     TEXT,
            created_at     TEXT    NOT NULL,
            updated_at     TEXT    NOT NULL,
            started_at     TEXT,
            finished_at    TEXT
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_render_jobs_video ON render_jobs (video_id);
        CREATE INDEX IF NOT EXISTS idx_render_jobs_status ON render_jobs (status);

        CREATE UNIQUE INDEX IF NOT EXISTS idx_render_jobs_one_active
            ON render_jobs (video_id)
            WHERE status IN ('QUEUED', 'PROCESSING');
        ",
    )?;
    Ok(())
}
