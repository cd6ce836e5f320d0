//! SQLite-backed channel store

use std::{
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use rusqlite::{
    params,
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef},
    Connection, Row, ToSql,
};
use tracing::{debug, info};

use super::{ChannelStore, StoreError, StoreResult};
use crate::{
    clock::Clock,
    timer::{EndBehavior, TimeFormat, Timer, TimerMode, TimerStyle, TimerUpdate},
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS timers (
        channel TEXT PRIMARY KEY,
        mode TEXT NOT NULL CHECK(mode IN ('countdown', 'countup')),
        duration_ms INTEGER NOT NULL,
        remaining_ms INTEGER NOT NULL,
        is_running INTEGER NOT NULL DEFAULT 0,
        started_at INTEGER,
        end_behavior TEXT NOT NULL CHECK(end_behavior IN ('stop', 'negative', 'hide', 'confetti')),
        format TEXT NOT NULL CHECK(format IN ('auto', 'HH:MM:SS', 'MM:SS', 'SS')),
        font_family TEXT NOT NULL,
        font_size INTEGER NOT NULL,
        font_weight INTEGER NOT NULL,
        text_color TEXT NOT NULL,
        shadow_enabled INTEGER NOT NULL,
        shadow_color TEXT NOT NULL,
        shadow_blur INTEGER NOT NULL,
        shadow_offset_x INTEGER NOT NULL,
        shadow_offset_y INTEGER NOT NULL,
        stroke_enabled INTEGER NOT NULL,
        stroke_color TEXT NOT NULL,
        stroke_width INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_timers_is_running ON timers(is_running);
    CREATE INDEX IF NOT EXISTS idx_timers_updated_at ON timers(updated_at);
";

const COLUMNS: &str = "channel, mode, duration_ms, remaining_ms, is_running, started_at, \
    end_behavior, format, font_family, font_size, font_weight, text_color, shadow_enabled, \
    shadow_color, shadow_blur, shadow_offset_x, shadow_offset_y, stroke_enabled, stroke_color, \
    stroke_width, created_at, updated_at";

const PLACEHOLDERS: &str = "?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, \
    ?16, ?17, ?18, ?19, ?20, ?21, ?22";

macro_rules! text_column {
    ($($ty:ty),+) => {
        $(
            impl ToSql for $ty {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    Ok(ToSqlOutput::from(self.as_str()))
                }
            }

            impl FromSql for $ty {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    value
                        .as_str()?
                        .parse()
                        .map_err(|e| FromSqlError::Other(Box::new(e)))
                }
            }
        )+
    };
}

text_column!(TimerMode, EndBehavior, TimeFormat);

/// Single-connection SQLite store.
///
/// The connection sits behind a mutex, so each trait call runs alone and
/// read-modify-write updates happen inside one transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish()
    }
}

impl SqliteStore {
    /// Open (or create) the database file and make sure the schema exists
    pub fn open(path: &Path, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        info!("Opened timer database at {} (journal_mode={})", path.display(), mode);
        Self::init(conn, clock)
    }

    pub fn open_in_memory(clock: Arc<dyn Clock>) -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?, clock)
    }

    fn init(conn: Connection, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

fn write_row(conn: &Connection, verb: &str, timer: &Timer) -> rusqlite::Result<usize> {
    let style = &timer.style;
    conn.execute(
        &format!("{verb} INTO timers ({COLUMNS}) VALUES ({PLACEHOLDERS})"),
        params![
            timer.channel,
            timer.mode,
            timer.duration_ms,
            timer.remaining_ms,
            timer.is_running,
            timer.started_at,
            timer.end_behavior,
            timer.format,
            style.font_family,
            style.font_size,
            style.font_weight,
            style.text_color,
            style.shadow_enabled,
            style.shadow_color,
            style.shadow_blur,
            style.shadow_offset_x,
            style.shadow_offset_y,
            style.stroke_enabled,
            style.stroke_color,
            style.stroke_width,
            timer.created_at,
            timer.updated_at,
        ],
    )
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<Timer> {
    Ok(Timer {
        channel: row.get("channel")?,
        mode: row.get("mode")?,
        duration_ms: row.get("duration_ms")?,
        remaining_ms: row.get("remaining_ms")?,
        is_running: row.get("is_running")?,
        started_at: row.get("started_at")?,
        end_behavior: row.get("end_behavior")?,
        format: row.get("format")?,
        style: TimerStyle {
            font_family: row.get("font_family")?,
            font_size: row.get("font_size")?,
            font_weight: row.get("font_weight")?,
            text_color: row.get("text_color")?,
            shadow_enabled: row.get("shadow_enabled")?,
            shadow_color: row.get("shadow_color")?,
            shadow_blur: row.get("shadow_blur")?,
            shadow_offset_x: row.get("shadow_offset_x")?,
            shadow_offset_y: row.get("shadow_offset_y")?,
            stroke_enabled: row.get("stroke_enabled")?,
            stroke_color: row.get("stroke_color")?,
            stroke_width: row.get("stroke_width")?,
        },
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn load_or_insert(conn: &Connection, channel: &str, now_ms: i64) -> StoreResult<Timer> {
    if write_row(conn, "INSERT OR IGNORE", &Timer::new(channel, now_ms))? > 0 {
        debug!(channel, "Created timer record");
    }
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM timers WHERE channel = ?1"),
        [channel],
        read_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::FromSqlConversionFailure(_, _, reason) => StoreError::Corrupt {
            channel: channel.to_string(),
            reason: reason.to_string(),
        },
        other => other.into(),
    })
}

impl ChannelStore for SqliteStore {
    fn get_or_create(&self, channel: &str) -> StoreResult<Timer> {
        let conn = self.lock()?;
        load_or_insert(&conn, channel, self.clock.now_ms())
    }

    fn update(&self, channel: &str, update: &TimerUpdate) -> StoreResult<Timer> {
        let now = self.clock.now_ms();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let mut timer = load_or_insert(&tx, channel, now)?;
        if !update.is_empty() {
            update.apply_to(&mut timer);
            timer.updated_at = now;
            write_row(&tx, "INSERT OR REPLACE", &timer)?;
        }

        tx.commit()?;
        Ok(timer)
    }

    fn list_all(&self) -> StoreResult<Vec<Timer>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM timers ORDER BY channel"))?;
        let timers = stmt
            .query_map([], read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(timers)
    }

    fn delete_stale(&self, max_age: Duration) -> StoreResult<usize> {
        let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        let cutoff = self.clock.now_ms().saturating_sub(max_age_ms);
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM timers WHERE is_running = 0 AND updated_at < ?1",
            [cutoff],
        )?;
        Ok(deleted)
    }
}
