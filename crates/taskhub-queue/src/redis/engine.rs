//! Redis queue engine.
//!
//! Records are JSON strings; each lane/state pair is a sorted-set index.
//!
//! Every state change is a compare-and-swap: the node reads the record,
//! builds the next version, and a Lua script writes it (and moves the
//! index entry) only if the stored JSON is still the version that was
//! read. A removed record or a record another node already moved makes
//! the swap fail, so removals are never undone and terminal states stay
//! terminal.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use taskhub_core::config::queue::RedisQueueConfig;
use taskhub_core::error::{AppError, ErrorKind};
use taskhub_core::result::AppResult;
use taskhub_core::types::TaskId;
use taskhub_entity::{Lane, NewTask, TaskOutcome, TaskRecord, TaskState};

use super::keys;
use crate::traits::{ListRange, SortOrder, TaskQueue, TaskSubscription};

const ALL_STATES: [TaskState; 5] = [
    TaskState::Delayed,
    TaskState::Queued,
    TaskState::Active,
    TaskState::Complete,
    TaskState::Failed,
];

/// Claim attempts per poll before reporting an empty lane.
const CLAIM_ATTEMPTS: usize = 5;

/// Create a record unless its key exists.
///
/// KEYS[1] = record key, KEYS[2] = index of the initial state.
/// ARGV[1] = record JSON, ARGV[2] = index score, ARGV[3] = task id.
/// Returns 1 when created, 0 when the key already existed.
const LUA_CREATE: &str = r#"
if not redis.call('SET', KEYS[1], ARGV[1], 'NX') then
    return 0
end
redis.call('ZADD', KEYS[2], tonumber(ARGV[2]), ARGV[3])
return 1
"#;

/// Replace a record if it still holds the expected JSON.
///
/// KEYS[1] = record key, KEYS[2] = index of the old state,
/// KEYS[3] = index of the new state.
/// ARGV[1] = expected JSON, ARGV[2] = new JSON, ARGV[3] = task id,
/// ARGV[4] = score in the new index.
/// Returns 1 when swapped, 0 when the record changed or is gone.
const LUA_SWAP: &str = r#"
if redis.call('GET', KEYS[1]) ~= ARGV[1] then
    return 0
end
redis.call('SET', KEYS[1], ARGV[2])
redis.call('ZREM', KEYS[2], ARGV[3])
redis.call('ZADD', KEYS[3], tonumber(ARGV[4]), ARGV[3])
return 1
"#;

/// Redis-backed [`TaskQueue`] shared by every node using the same prefix.
#[derive(Clone)]
pub struct RedisTaskQueue {
    /// Redis connection manager (multiplexed, reconnecting).
    conn: ConnectionManager,
    /// Prefix of every record and index key.
    prefix: String,
    /// How often subscriptions re-read their record.
    poll_interval: Duration,
}

impl std::fmt::Debug for RedisTaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisTaskQueue")
            .field("prefix", &self.prefix)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl RedisTaskQueue {
    /// Connect to Redis.
    pub async fn connect(config: &RedisQueueConfig, poll_interval: Duration) -> AppResult<Self> {
        info!(prefix = %config.key_prefix, "Connecting Redis task queue");

        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            AppError::with_source(ErrorKind::Queue, "Failed to create Redis client", e)
        })?;
        let conn = ConnectionManager::new(client).await.map_err(|e| {
            AppError::with_source(ErrorKind::Queue, "Failed to connect to Redis", e)
        })?;

        Ok(Self {
            conn,
            prefix: config.key_prefix.clone(),
            poll_interval,
        })
    }

    fn map_err(e: redis::RedisError) -> AppError {
        AppError::with_source(ErrorKind::Queue, format!("Redis error: {e}"), e)
    }

    async fn load(&self, id: TaskId) -> AppResult<Option<TaskRecord>> {
        Ok(self.load_raw(id).await?.map(|(_, record)| record))
    }

    /// Read a record together with the exact JSON it was stored as.
    async fn load_raw(&self, id: TaskId) -> AppResult<Option<(String, TaskRecord)>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(keys::task(&self.prefix, id))
            .await
            .map_err(Self::map_err)?;
        match raw {
            Some(json) => {
                let record = serde_json::from_str(&json)?;
                Ok(Some((json, record)))
            }
            None => Ok(None),
        }
    }

    /// Store `record` in place of `expected`, moving its index entry out
    /// of `from`. Returns `false` when the stored record no longer matches.
    async fn swap(
        &self,
        expected: &str,
        record: &TaskRecord,
        from: TaskState,
    ) -> AppResult<bool> {
        let json = serde_json::to_string(record)?;
        let mut conn = self.conn.clone();

        let swapped: i64 = Script::new(LUA_SWAP)
            .key(keys::task(&self.prefix, record.id))
            .key(keys::lane_state(&self.prefix, record.lane, from))
            .key(keys::lane_state(&self.prefix, record.lane, record.state))
            .arg(expected)
            .arg(json)
            .arg(record.id.to_string())
            .arg(keys::score(record))
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(swapped == 1)
    }

    /// Apply `change` to a non-terminal record. Returns `false` when the
    /// record is missing or already terminal.
    ///
    /// A lost swap means another node moved the record forward, so the
    /// loop re-reads at most once per remaining state.
    async fn transition<F>(&self, id: TaskId, change: F) -> AppResult<bool>
    where
        F: Fn(&mut TaskRecord) + Send + Sync,
    {
        loop {
            let Some((raw, mut record)) = self.load_raw(id).await? else {
                return Ok(false);
            };
            if record.state.is_terminal() {
                return Ok(false);
            }

            let from = record.state;
            change(&mut record);
            record.updated_at = Utc::now();
            if self.swap(&raw, &record, from).await? {
                return Ok(true);
            }
            trace!(task_id = %id, "Task changed concurrently, retrying transition");
        }
    }

    /// Move delayed records of `lane` whose eligibility time passed into
    /// the queued index. Only the node whose swap succeeds promotes.
    async fn promote_due(&self, lane: Lane) -> AppResult<()> {
        let now = Utc::now();
        let mut conn = self.conn.clone();

        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(keys::lane_state(&self.prefix, lane, TaskState::Delayed))
            .arg("-inf")
            .arg(now.timestamp_millis())
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        for member in due {
            let Ok(id) = member.parse::<TaskId>() else {
                warn!(member = %member, "Skipping malformed delayed index entry");
                continue;
            };
            let Some((raw, mut record)) = self.load_raw(id).await? else {
                continue;
            };
            if !record.is_due(now) {
                continue;
            }
            record.state = TaskState::Queued;
            record.updated_at = now;
            if self.swap(&raw, &record, TaskState::Delayed).await? {
                trace!(task_id = %id, lane = %lane, "Promoted delayed task");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn create(&self, task: NewTask) -> AppResult<TaskRecord> {
        let record = TaskRecord::from_new(task, Utc::now())?;
        let json = serde_json::to_string(&record)?;
        let mut conn = self.conn.clone();

        let created: i64 = Script::new(LUA_CREATE)
            .key(keys::task(&self.prefix, record.id))
            .key(keys::lane_state(&self.prefix, record.lane, record.state))
            .arg(json)
            .arg(keys::score(&record))
            .arg(record.id.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        if created == 0 {
            return Err(AppError::validation(format!(
                "Task {} already exists",
                record.id
            )));
        }

        debug!(
            task_id = %record.id,
            event_id = %record.event_id,
            lane = %record.lane,
            state = %record.state,
            "Created task record"
        );
        Ok(record)
    }

    async fn subscribe(&self, id: TaskId) -> AppResult<TaskSubscription> {
        let Some(record) = self.load(id).await? else {
            return Err(AppError::not_found(format!("Task {id} not found")));
        };
        let (tx, rx) = watch::channel(record.state);
        if record.state.is_terminal() {
            return Ok(rx);
        }

        let queue = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(queue.poll_interval).await;
                if tx.is_closed() {
                    break;
                }
                match queue.load(id).await {
                    Ok(Some(record)) => {
                        tx.send_if_modified(|state| {
                            let changed = *state != record.state;
                            *state = record.state;
                            changed
                        });
                        if record.state.is_terminal() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => warn!(task_id = %id, "Subscription poll failed: {}", e),
                }
            }
        });

        Ok(rx)
    }

    async fn get(&self, id: TaskId) -> AppResult<Option<TaskRecord>> {
        self.load(id).await
    }

    async fn list_by_state(
        &self,
        lane: Lane,
        state: TaskState,
        range: ListRange,
    ) -> AppResult<Vec<TaskRecord>> {
        if range.limit == 0 {
            return Ok(Vec::new());
        }
        let command = match range.order {
            SortOrder::Asc => "ZRANGE",
            SortOrder::Desc => "ZREVRANGE",
        };
        let start = isize::try_from(range.offset).unwrap_or(isize::MAX);
        // -1 is the last member, for limits beyond the index size.
        let stop = isize::try_from(range.offset.saturating_add(range.limit - 1)).unwrap_or(-1);
        let mut conn = self.conn.clone();

        let members: Vec<String> = redis::cmd(command)
            .arg(keys::lane_state(&self.prefix, lane, state))
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        if members.is_empty() {
            return Ok(Vec::new());
        }

        let record_keys: Vec<String> = members
            .iter()
            .filter_map(|member| match member.parse::<TaskId>() {
                Ok(id) => Some(keys::task(&self.prefix, id)),
                Err(_) => {
                    warn!(member = %member, "Skipping malformed index entry");
                    None
                }
            })
            .collect();
        if record_keys.is_empty() {
            return Ok(Vec::new());
        }
        let raw: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&record_keys)
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        let mut records = Vec::with_capacity(raw.len());
        for json in raw.into_iter().flatten() {
            let record: TaskRecord = serde_json::from_str(&json)?;
            // A record may move on between the range read and the MGET.
            if record.state == state {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn remove(&self, id: TaskId) -> AppResult<bool> {
        let Some(record) = self.load(id).await? else {
            return Ok(false);
        };
        let member = id.to_string();
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.atomic().cmd("DEL").arg(keys::task(&self.prefix, id));
        for state in ALL_STATES {
            pipe.cmd("ZREM")
                .arg(keys::lane_state(&self.prefix, record.lane, state))
                .arg(&member)
                .ignore();
        }
        let (deleted,): (i64,) = pipe.query_async(&mut conn).await.map_err(Self::map_err)?;
        Ok(deleted > 0)
    }

    async fn fail(&self, id: TaskId) -> AppResult<bool> {
        self.transition(id, |record| record.state = TaskState::Failed)
            .await
    }

    async fn claim_next(&self, lane: Lane) -> AppResult<Option<TaskRecord>> {
        self.promote_due(lane).await?;

        let queued_key = keys::lane_state(&self.prefix, lane, TaskState::Queued);
        let mut conn = self.conn.clone();

        for _ in 0..CLAIM_ATTEMPTS {
            let head: Vec<String> = redis::cmd("ZRANGE")
                .arg(&queued_key)
                .arg(0)
                .arg(0)
                .query_async(&mut conn)
                .await
                .map_err(Self::map_err)?;
            let Some(member) = head.into_iter().next() else {
                return Ok(None);
            };

            let loaded = match member.parse::<TaskId>() {
                Ok(id) => self.load_raw(id).await?,
                Err(_) => None,
            };
            let Some((raw, mut record)) = loaded else {
                warn!(member = %member, lane = %lane, "Dropping orphaned queued index entry");
                let _: i64 = conn.zrem(&queued_key, &member).await.map_err(Self::map_err)?;
                continue;
            };
            if record.state != TaskState::Queued {
                continue;
            }

            record.state = TaskState::Active;
            record.updated_at = Utc::now();
            if self.swap(&raw, &record, TaskState::Queued).await? {
                return Ok(Some(record));
            }
        }

        trace!(lane = %lane, "Lost every claim race this poll");
        Ok(None)
    }

    async fn finish(&self, id: TaskId, outcome: TaskOutcome) -> AppResult<bool> {
        self.transition(id, |record| {
            record.state = if outcome.is_failure() {
                TaskState::Failed
            } else {
                TaskState::Complete
            };
            record.result = Some(outcome.clone());
        })
        .await
    }

    async fn health_check(&self) -> AppResult<bool> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(pong == "PONG")
    }
}

/// These tests need a running Redis (`REDIS_URL`, default
/// `redis://127.0.0.1:6379`). Each test uses its own key prefix.
///
/// ```bash
/// cargo test -p taskhub-queue -- --ignored redis
/// ```
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskhub_entity::TaskMeta;

    async fn test_queue() -> RedisTaskQueue {
        let config = RedisQueueConfig {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            key_prefix: format!("taskhub:test:{}:", TaskId::new()),
        };
        RedisTaskQueue::connect(&config, Duration::from_millis(10))
            .await
            .expect("Redis connection failed; is Redis running?")
    }

    async fn create(queue: &RedisTaskQueue, lane: Lane, delay_ms: Option<u64>) -> TaskId {
        queue
            .create(NewTask {
                id: TaskId::new(),
                event_id: "sendEmail".to_string(),
                context: json!({"to": "a@example.com"}),
                lane,
                meta: TaskMeta {
                    delay_ms,
                    ..TaskMeta::default()
                },
            })
            .await
            .unwrap()
            .id
    }

    async fn listed(queue: &RedisTaskQueue, lane: Lane, state: TaskState) -> Vec<TaskId> {
        queue
            .list_by_state(lane, state, ListRange::first(100))
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.id)
            .collect()
    }

    #[tokio::test]
    #[ignore = "requires a Redis server"]
    async fn redis_claim_and_finish() {
        let queue = test_queue().await;
        let id = create(&queue, Lane::Work, None).await;
        assert_eq!(listed(&queue, Lane::Work, TaskState::Queued).await, vec![id]);

        let claimed = queue.claim_next(Lane::Work).await.unwrap().unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.state, TaskState::Active);
        assert!(queue.claim_next(Lane::Work).await.unwrap().is_none());
        assert!(queue.claim_next(Lane::Push).await.unwrap().is_none());

        assert!(queue.finish(id, TaskOutcome::Success(json!({"sent": true}))).await.unwrap());
        let record = queue.get(id).await.unwrap().unwrap();
        assert_eq!(record.state, TaskState::Complete);
        assert_eq!(record.result, Some(TaskOutcome::Success(json!({"sent": true}))));
        assert!(listed(&queue, Lane::Work, TaskState::Active).await.is_empty());
        assert_eq!(listed(&queue, Lane::Work, TaskState::Complete).await, vec![id]);
    }

    #[tokio::test]
    #[ignore = "requires a Redis server"]
    async fn redis_terminal_state_is_kept() {
        let queue = test_queue().await;
        let id = create(&queue, Lane::Work, None).await;
        queue.claim_next(Lane::Work).await.unwrap().unwrap();

        assert!(queue.finish(id, TaskOutcome::Success(json!(1))).await.unwrap());
        assert!(!queue.fail(id).await.unwrap());

        let record = queue.get(id).await.unwrap().unwrap();
        assert_eq!(record.state, TaskState::Complete);
        assert_eq!(record.result, Some(TaskOutcome::Success(json!(1))));
        assert!(listed(&queue, Lane::Work, TaskState::Failed).await.is_empty());
    }

    #[tokio::test]
    #[ignore = "requires a Redis server"]
    async fn redis_stale_swap_is_rejected() {
        let queue = test_queue().await;
        let id = create(&queue, Lane::Work, None).await;
        queue.claim_next(Lane::Work).await.unwrap().unwrap();

        // Read the active record, then let the executor finish first.
        let (raw, mut stale) = queue.load_raw(id).await.unwrap().unwrap();
        assert!(queue.finish(id, TaskOutcome::Success(json!("done"))).await.unwrap());

        stale.state = TaskState::Failed;
        assert!(!queue.swap(&raw, &stale, TaskState::Active).await.unwrap());

        let record = queue.get(id).await.unwrap().unwrap();
        assert_eq!(record.state, TaskState::Complete);
        assert_eq!(record.result, Some(TaskOutcome::Success(json!("done"))));
        assert!(listed(&queue, Lane::Work, TaskState::Failed).await.is_empty());
    }

    #[tokio::test]
    #[ignore = "requires a Redis server"]
    async fn redis_removed_record_is_not_recreated() {
        let queue = test_queue().await;
        let id = create(&queue, Lane::Work, None).await;
        queue.claim_next(Lane::Work).await.unwrap().unwrap();

        let (raw, mut stale) = queue.load_raw(id).await.unwrap().unwrap();
        assert!(queue.remove(id).await.unwrap());
        assert!(!queue.remove(id).await.unwrap());

        stale.state = TaskState::Failed;
        assert!(!queue.swap(&raw, &stale, TaskState::Active).await.unwrap());
        assert!(!queue.fail(id).await.unwrap());
        assert!(queue.get(id).await.unwrap().is_none());
        assert!(listed(&queue, Lane::Work, TaskState::Failed).await.is_empty());
    }

    #[tokio::test]
    #[ignore = "requires a Redis server"]
    async fn redis_listing_skips_lagging_index_entries() {
        let queue = test_queue().await;
        let queued = create(&queue, Lane::Work, None).await;
        let mut conn = queue.conn.clone();

        // One entry whose record is in another state, one without a record.
        let complete_key = keys::lane_state(&queue.prefix, Lane::Work, TaskState::Complete);
        let _: i64 = conn.zadd(&complete_key, queued.to_string(), 1).await.unwrap();
        let _: i64 = conn.zadd(&complete_key, TaskId::new().to_string(), 2).await.unwrap();

        assert!(listed(&queue, Lane::Work, TaskState::Complete).await.is_empty());
        assert_eq!(listed(&queue, Lane::Work, TaskState::Queued).await, vec![queued]);
    }

    #[tokio::test]
    #[ignore = "requires a Redis server"]
    async fn redis_delayed_record_is_promoted_when_due() {
        let queue = test_queue().await;
        let id = create(&queue, Lane::Push, Some(50)).await;

        assert!(queue.claim_next(Lane::Push).await.unwrap().is_none());
        assert_eq!(listed(&queue, Lane::Push, TaskState::Delayed).await, vec![id]);

        tokio::time::sleep(Duration::from_millis(80)).await;
        let claimed = queue.claim_next(Lane::Push).await.unwrap().unwrap();
        assert_eq!(claimed.id, id);
        assert!(listed(&queue, Lane::Push, TaskState::Delayed).await.is_empty());
    }

    #[tokio::test]
    #[ignore = "requires a Redis server"]
    async fn redis_concurrent_claims_take_one_record_once() {
        let queue = test_queue().await;
        let other = queue.clone();
        let id = create(&queue, Lane::Work, None).await;

        let (a, b) = tokio::join!(queue.claim_next(Lane::Work), other.claim_next(Lane::Work));
        let claimed: Vec<TaskRecord> = [a.unwrap(), b.unwrap()].into_iter().flatten().collect();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, id);
    }

    #[tokio::test]
    #[ignore = "requires a Redis server"]
    async fn redis_subscription_sees_completion() {
        let queue = test_queue().await;
        let id = create(&queue, Lane::Work, None).await;
        let mut sub = queue.subscribe(id).await.unwrap();

        queue.claim_next(Lane::Work).await.unwrap().unwrap();
        queue.finish(id, TaskOutcome::Failure(json!("smtp down"))).await.unwrap();

        let state = *sub.wait_for(|state| state.is_terminal()).await.unwrap();
        assert_eq!(state, TaskState::Failed);
    }
}
