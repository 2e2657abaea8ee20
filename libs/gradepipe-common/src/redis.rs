use crate::types::DurableTask;
use redis::{AsyncCommands, RedisResult};
use uuid::Uuid;

/// Redis key scheme for the durable task store - defines only
/// semantics, not runtime logic. The server and the worker loop share
/// these helpers so keys never drift.

pub const TASK_PREFIX: &str = "gradepipe:task";
pub const PENDING_QUEUE: &str = "gradepipe:pending";
pub const ACTIVE_PREFIX: &str = "gradepipe:active";

/// Key holding the full JSON record of a task. No TTL: completed and
/// failed history is retained.
pub fn task_key(task_id: &Uuid) -> String {
    format!("{}:{}", TASK_PREFIX, task_id)
}

/// Key holding the id of the active (pending/processing) task for an
/// (exam, teacher) pair, if any.
pub fn active_key(exam_id: &str, teacher_id: &str) -> String {
    format!("{}:{}:{}", ACTIVE_PREFIX, exam_id, teacher_id)
}

/// Match pattern covering every persisted task record key.
pub fn task_scan_pattern() -> String {
    format!("{}:*", TASK_PREFIX)
}

/// Recover the task id embedded in a task record key.
pub fn task_id_from_key(key: &str) -> Option<Uuid> {
    key.strip_prefix(TASK_PREFIX)
        .and_then(|rest| rest.strip_prefix(':'))
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

fn json_error(context: &'static str, err: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, context, err.to_string()))
}

/// Persist the full task record.
pub async fn put_task(
    conn: &mut redis::aio::ConnectionManager,
    task: &DurableTask,
) -> RedisResult<()> {
    let payload =
        serde_json::to_string(task).map_err(|e| json_error("serialization error", e))?;
    conn.set(task_key(&task.id), payload).await
}

/// Fetch a task record by id.
pub async fn get_task(
    conn: &mut redis::aio::ConnectionManager,
    task_id: &Uuid,
) -> RedisResult<Option<DurableTask>> {
    let payload: Option<String> = conn.get(task_key(task_id)).await?;
    match payload {
        Some(data) => {
            let task = serde_json::from_str(&data)
                .map_err(|e| json_error("deserialization error", e))?;
            Ok(Some(task))
        }
        None => Ok(None),
    }
}

/// Append a task id to the pending queue (FIFO via RPUSH/LPOP).
pub async fn push_pending(
    conn: &mut redis::aio::ConnectionManager,
    task_id: &Uuid,
) -> RedisResult<()> {
    conn.rpush(PENDING_QUEUE, task_id.to_string()).await
}

/// Pop the oldest pending task id, if any. Entries may be stale
/// (stopped or superseded before the worker reached them); callers
/// must re-check the record's status after fetching it.
pub async fn pop_pending(
    conn: &mut redis::aio::ConnectionManager,
) -> RedisResult<Option<Uuid>> {
    let id: Option<String> = conn.lpop(PENDING_QUEUE, None).await?;
    match id {
        Some(raw) => {
            let parsed = Uuid::parse_str(&raw).map_err(|e| {
                redis::RedisError::from((
                    redis::ErrorKind::TypeError,
                    "invalid task id in pending queue",
                    e.to_string(),
                ))
            })?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Record `task_id` as the active task for an (exam, teacher) pair.
pub async fn set_active(
    conn: &mut redis::aio::ConnectionManager,
    exam_id: &str,
    teacher_id: &str,
    task_id: &Uuid,
) -> RedisResult<()> {
    conn.set(active_key(exam_id, teacher_id), task_id.to_string())
        .await
}

/// Read the recorded active task id for an (exam, teacher) pair.
pub async fn get_active(
    conn: &mut redis::aio::ConnectionManager,
    exam_id: &str,
    teacher_id: &str,
) -> RedisResult<Option<Uuid>> {
    let id: Option<String> = conn.get(active_key(exam_id, teacher_id)).await?;
    Ok(id.and_then(|raw| Uuid::parse_str(&raw).ok()))
}

/// Ids of every persisted task record, via SCAN so a live instance is
/// not blocked.
pub async fn scan_task_ids(
    conn: &mut redis::aio::ConnectionManager,
) -> RedisResult<Vec<Uuid>> {
    let keys: Vec<String> = {
        let mut iter = conn.scan_match::<_, String>(task_scan_pattern()).await?;
        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        keys
    };
    Ok(keys.iter().filter_map(|key| task_id_from_key(key)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_key_deterministic() {
        let id = Uuid::new_v4();
        assert_eq!(task_key(&id), task_key(&id));
        assert!(task_key(&id).starts_with("gradepipe:task:"));
        assert!(task_key(&id).contains(&id.to_string()));
    }

    #[test]
    fn active_key_format() {
        let key = active_key("exam-1", "teacher-9");
        assert_eq!(key, "gradepipe:active:exam-1:teacher-9");
    }

    #[test]
    fn task_id_round_trips_through_its_key() {
        let id = Uuid::new_v4();
        assert_eq!(task_id_from_key(&task_key(&id)), Some(id));
    }

    #[test]
    fn foreign_keys_yield_no_task_id() {
        assert_eq!(task_id_from_key(PENDING_QUEUE), None);
        assert_eq!(task_id_from_key("gradepipe:task:not-a-uuid"), None);
        assert_eq!(task_id_from_key("gradepipe:active:exam-1:t-1"), None);
    }
}
