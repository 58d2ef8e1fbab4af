//! Curriculum structure queries: chapters and topics
//!
//! Chapters and topics carry the counters the display-order allocator draws
//! from. Topic creation is the concurrent-writer case the allocator exists
//! for: two simultaneous "create topics" requests both succeed with
//! disjoint display orders.

use crate::allocator::{self, CounterParent};
use chrono::{DateTime, Utc};
use lms_common::db::Topic;
use lms_common::time::{fmt_ts, parse_ts, parse_ts_opt};
use lms_common::Result;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

fn topic_from_row(row: &SqliteRow) -> Result<Topic> {
    Ok(Topic {
        topic_id: row.get("topic_id"),
        chapter_id: row.get("chapter_id"),
        name: row.get("name"),
        display_order: row.get("display_order"),
        current_lm_display_order: row.get("current_lm_display_order"),
        created_at: parse_ts(row.get::<&str, _>("created_at"))?,
        updated_at: parse_ts(row.get::<&str, _>("updated_at"))?,
        deleted_at: parse_ts_opt(row.get("deleted_at"))?,
    })
}

/// Insert a chapter with its topic counter at zero
pub async fn insert_chapter(
    conn: &mut SqliteConnection,
    chapter_id: &str,
    book_id: &str,
    name: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO chapters (
            chapter_id, book_id, name, current_topic_display_order,
            created_at, updated_at, deleted_at
        ) VALUES (?, ?, ?, 0, ?, ?, NULL)
        "#,
    )
    .bind(chapter_id)
    .bind(book_id)
    .bind(name)
    .bind(fmt_ts(now))
    .bind(fmt_ts(now))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Create topics under a chapter, allocating their display orders in one
/// contiguous block.
///
/// Legacy rows may occupy orders the chapter counter has never seen; the
/// allocator floor is raised over the highest live legacy order first so
/// new orders never collide with pre-assigned ones.
pub async fn create_topics(
    pool: &SqlitePool,
    chapter_id: &str,
    names: &[&str],
    now: DateTime<Utc>,
) -> Result<Vec<Topic>> {
    let mut tx = pool.begin().await?;

    let legacy_max: Option<i64> = sqlx::query_scalar(
        "SELECT MAX(display_order) FROM topics
         WHERE chapter_id = ? AND deleted_at IS NULL",
    )
    .bind(chapter_id)
    .fetch_one(&mut *tx)
    .await?;

    if let Some(max) = legacy_max {
        allocator::raise_floor(&mut *tx, CounterParent::Chapter(chapter_id), max).await?;
    }

    let base = allocator::allocate(
        &mut *tx,
        CounterParent::Chapter(chapter_id),
        names.len() as u32,
    )
    .await?;

    let mut topics = Vec::with_capacity(names.len());
    for (offset, name) in names.iter().enumerate() {
        let topic = Topic {
            topic_id: Uuid::new_v4().to_string(),
            chapter_id: chapter_id.to_string(),
            name: Some((*name).to_string()),
            display_order: base + offset as i64,
            current_lm_display_order: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        sqlx::query(
            r#"
            INSERT INTO topics (
                topic_id, chapter_id, name, display_order,
                current_lm_display_order, created_at, updated_at, deleted_at
            ) VALUES (?, ?, ?, ?, 0, ?, ?, NULL)
            "#,
        )
        .bind(&topic.topic_id)
        .bind(&topic.chapter_id)
        .bind(&topic.name)
        .bind(topic.display_order)
        .bind(fmt_ts(now))
        .bind(fmt_ts(now))
        .execute(&mut *tx)
        .await?;
        topics.push(topic);
    }

    tx.commit().await?;
    Ok(topics)
}

/// Live topics of a chapter, display order ascending
pub async fn live_topics(
    conn: &mut SqliteConnection,
    chapter_id: &str,
) -> Result<Vec<Topic>> {
    let rows = sqlx::query(
        "SELECT topic_id, chapter_id, name, display_order, current_lm_display_order,
                created_at, updated_at, deleted_at
         FROM topics
         WHERE chapter_id = ? AND deleted_at IS NULL
         ORDER BY display_order ASC, topic_id ASC",
    )
    .bind(chapter_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(topic_from_row).collect()
}
