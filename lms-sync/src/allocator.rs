//! Display-order allocation
//!
//! Sibling entities (topics within a chapter, learning materials within a
//! topic) are ordered by integer display orders allocated from a counter on
//! the parent row. The allocation is a single read-increment-return UPDATE;
//! the row lock it takes serializes concurrent allocators, so ranges never
//! overlap. Contiguity is only guaranteed per call, not globally.

use lms_common::{Error, Result};
use sqlx::SqliteConnection;

/// The row carrying the counter a child's display order is drawn from
#[derive(Debug, Clone, Copy)]
pub enum CounterParent<'a> {
    /// `chapters.current_topic_display_order`
    Chapter(&'a str),
    /// `topics.current_lm_display_order`
    Topic(&'a str),
}

impl CounterParent<'_> {
    fn table(&self) -> &'static str {
        match self {
            CounterParent::Chapter(_) => "chapters",
            CounterParent::Topic(_) => "topics",
        }
    }

    fn key_column(&self) -> &'static str {
        match self {
            CounterParent::Chapter(_) => "chapter_id",
            CounterParent::Topic(_) => "topic_id",
        }
    }

    fn counter_column(&self) -> &'static str {
        match self {
            CounterParent::Chapter(_) => "current_topic_display_order",
            CounterParent::Topic(_) => "current_lm_display_order",
        }
    }

    fn id(&self) -> &str {
        match self {
            CounterParent::Chapter(id) | CounterParent::Topic(id) => id,
        }
    }
}

/// Allocate `n` display orders under `parent`, returning the first.
///
/// The caller owns `[base, base + n)`. Runs against the caller's
/// transaction; a missing parent fails with `NotFound` and is never
/// silently retried.
pub async fn allocate(
    conn: &mut SqliteConnection,
    parent: CounterParent<'_>,
    n: u32,
) -> Result<i64> {
    let query = format!(
        "UPDATE {table} SET {counter} = {counter} + ?
         WHERE {key} = ? AND deleted_at IS NULL
         RETURNING {counter}",
        table = parent.table(),
        counter = parent.counter_column(),
        key = parent.key_column(),
    );

    let new_top: Option<i64> = sqlx::query_scalar(&query)
        .bind(n as i64)
        .bind(parent.id())
        .fetch_optional(&mut *conn)
        .await?;

    let new_top = new_top.ok_or_else(|| {
        Error::NotFound(format!("{} {}", parent.key_column(), parent.id()))
    })?;

    Ok(new_top - n as i64 + 1)
}

/// Raise the parent's counter to at least `floor`.
///
/// Legacy callers pre-assigned display orders without touching the counter;
/// raising the floor to the highest observed legacy order keeps new
/// allocations above them. Counters are monotonic: deleting legacy rows
/// never lowers the floor, so orders are never reused.
pub async fn raise_floor(
    conn: &mut SqliteConnection,
    parent: CounterParent<'_>,
    floor: i64,
) -> Result<()> {
    let query = format!(
        "UPDATE {table} SET {counter} = MAX({counter}, ?)
         WHERE {key} = ? AND deleted_at IS NULL",
        table = parent.table(),
        counter = parent.counter_column(),
        key = parent.key_column(),
    );

    let result = sqlx::query(&query)
        .bind(floor)
        .bind(parent.id())
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!(
            "{} {}",
            parent.key_column(),
            parent.id()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::curriculum;
    use lms_common::db::create_schema;
    use lms_common::time::now_utc;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    async fn setup(path: &std::path::Path) -> SqlitePool {
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&url)
            .await
            .expect("connect");
        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await.unwrap();
        sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await.unwrap();
        create_schema(&pool).await.expect("schema");
        pool
    }

    #[tokio::test]
    async fn allocates_contiguous_range() {
        let dir = tempfile::tempdir().unwrap();
        let pool = setup(&dir.path().join("alloc.db")).await;
        let mut conn = pool.acquire().await.unwrap();
        curriculum::insert_chapter(&mut *conn, "ch1", "b1", None, now_utc())
            .await
            .unwrap();

        let base = allocate(&mut *conn, CounterParent::Chapter("ch1"), 3).await.unwrap();
        assert_eq!(base, 1);
        let next = allocate(&mut *conn, CounterParent::Chapter("ch1"), 2).await.unwrap();
        assert_eq!(next, 4);
    }

    #[tokio::test]
    async fn missing_parent_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let pool = setup(&dir.path().join("alloc.db")).await;
        let mut conn = pool.acquire().await.unwrap();

        let err = allocate(&mut *conn, CounterParent::Topic("nope"), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn concurrent_allocations_are_disjoint() {
        let dir = tempfile::tempdir().unwrap();
        let pool = setup(&dir.path().join("alloc.db")).await;
        {
            let mut conn = pool.acquire().await.unwrap();
            curriculum::insert_chapter(&mut *conn, "ch1", "b1", None, now_utc())
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                let mut tx = pool.begin().await.unwrap();
                let base = allocate(&mut *tx, CounterParent::Chapter("ch1"), 1)
                    .await
                    .unwrap();
                tx.commit().await.unwrap();
                base
            }));
        }

        let mut bases = Vec::new();
        for h in handles {
            bases.push(h.await.unwrap());
        }
        bases.sort();
        // N concurrent single allocations: N distinct values, no gaps
        assert_eq!(bases, (1..=8).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn floor_keeps_new_orders_above_legacy_ones() {
        let dir = tempfile::tempdir().unwrap();
        let pool = setup(&dir.path().join("alloc.db")).await;
        let mut conn = pool.acquire().await.unwrap();
        curriculum::insert_chapter(&mut *conn, "ch1", "b1", None, now_utc())
            .await
            .unwrap();

        // Legacy rows occupied orders 1..=5 without touching the counter
        raise_floor(&mut *conn, CounterParent::Chapter("ch1"), 5).await.unwrap();
        let base = allocate(&mut *conn, CounterParent::Chapter("ch1"), 1).await.unwrap();
        assert_eq!(base, 6);

        // A lower floor never rewinds the counter
        raise_floor(&mut *conn, CounterParent::Chapter("ch1"), 2).await.unwrap();
        let base = allocate(&mut *conn, CounterParent::Chapter("ch1"), 1).await.unwrap();
        assert_eq!(base, 7);
    }
}
