//! Generator model - SQL persistence layer.
//!
//! A generator holds a workflow template and an argument queue. Packing an
//! arg appends it to the queue; the generator engine fires the template
//! once the queue reaches the trigger threshold, or when the timeout has
//! elapsed with a non-empty queue. The queue table itself is the counter,
//! so pack/fire atomicity falls out of ordinary transactions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::common::{crypto, ServerError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Generator {
    #[serde(rename = "generatorid", default)]
    #[sqlx(rename = "generator_id")]
    pub id: String,
    #[serde(rename = "colonyname")]
    #[sqlx(rename = "colony_name")]
    pub colony_name: String,
    pub name: String,
    #[serde(rename = "workflowspec")]
    #[sqlx(rename = "workflow_spec")]
    pub workflow_spec: String,
    #[serde(rename = "trigger")]
    #[sqlx(rename = "trigger_level")]
    pub trigger: i32,
    /// Seconds before a non-empty queue fires regardless; <= 0 disables.
    #[serde(rename = "timeout", default = "default_timeout")]
    #[sqlx(rename = "timeout_secs")]
    pub timeout: i32,
    #[serde(rename = "lastrun")]
    #[sqlx(rename = "last_run")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(rename = "queuesize", default)]
    #[sqlx(rename = "queue_size")]
    pub queue_size: i64,
}

fn default_timeout() -> i32 {
    -1
}

const SELECT_WITH_QUEUE: &str = "SELECT g.*,
        (SELECT COUNT(*) FROM generatorargs a WHERE a.generator_id = g.generator_id) AS queue_size
     FROM generators g";

impl Generator {
    pub fn new(
        colony_name: String,
        name: String,
        workflow_spec: String,
        trigger: i32,
        timeout: i32,
    ) -> Self {
        Self {
            id: crypto::random_id(),
            colony_name,
            name,
            workflow_spec,
            trigger,
            timeout,
            last_run: None,
            queue_size: 0,
        }
    }

    /// Should this generator fire now?
    pub fn due(&self, now: DateTime<Utc>) -> bool {
        if self.queue_size <= 0 {
            return false;
        }
        if self.queue_size >= i64::from(self.trigger) {
            return true;
        }
        if self.timeout > 0 {
            if let Some(last_run) = self.last_run {
                return now - last_run >= Duration::seconds(i64::from(self.timeout));
            }
        }
        false
    }

    pub async fn insert(&self, pool: &PgPool) -> Result<Self, ServerError> {
        // last_run starts at the commission time so the timeout trigger
        // counts from a defined instant.
        sqlx::query(
            "INSERT INTO generators (
                generator_id, colony_name, name, workflow_spec,
                trigger_level, timeout_secs, last_run
             )
             VALUES ($1, $2, $3, $4, $5, $6, NOW())",
        )
        .bind(&self.id)
        .bind(&self.colony_name)
        .bind(&self.name)
        .bind(&self.workflow_spec)
        .bind(self.trigger)
        .bind(self.timeout)
        .execute(pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                ServerError::Conflict(format!("generator <{}> already exists", self.name))
            }
            other => ServerError::from(other),
        })?;

        Self::find_by_id(&self.id, pool)
            .await?
            .ok_or_else(|| ServerError::Internal("generator vanished after insert".to_string()))
    }

    pub async fn find_by_id(id: &str, pool: &PgPool) -> Result<Option<Self>, ServerError> {
        let sql = format!("{SELECT_WITH_QUEUE} WHERE g.generator_id = $1");
        sqlx::query_as::<_, Self>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_by_name(
        colony_name: &str,
        name: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>, ServerError> {
        let sql = format!("{SELECT_WITH_QUEUE} WHERE g.colony_name = $1 AND g.name = $2");
        sqlx::query_as::<_, Self>(&sql)
            .bind(colony_name)
            .bind(name)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_by_colony(
        colony_name: &str,
        count: i64,
        pool: &PgPool,
    ) -> Result<Vec<Self>, ServerError> {
        let sql = format!("{SELECT_WITH_QUEUE} WHERE g.colony_name = $1 ORDER BY g.name LIMIT $2");
        sqlx::query_as::<_, Self>(&sql)
            .bind(colony_name)
            .bind(count)
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_all(pool: &PgPool) -> Result<Vec<Self>, ServerError> {
        sqlx::query_as::<_, Self>(SELECT_WITH_QUEUE)
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }

    /// Append an argument to the queue.
    pub async fn pack(&self, arg: &str, pool: &PgPool) -> Result<(), ServerError> {
        sqlx::query(
            "INSERT INTO generatorargs (generatorarg_id, generator_id, colony_name, arg, added)
             VALUES ($1, $2, $3, $4, NOW())",
        )
        .bind(crypto::random_id())
        .bind(&self.id)
        .bind(&self.colony_name)
        .bind(arg)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Atomically drain the queued args (oldest first) and stamp
    /// `last_run`. The queue count resets to zero by construction.
    pub async fn drain(&self, pool: &PgPool) -> Result<Vec<String>, ServerError> {
        let mut tx = pool.begin().await?;

        let args: Vec<(String, String)> = sqlx::query_as(
            "SELECT generatorarg_id, arg FROM generatorargs
             WHERE generator_id = $1 ORDER BY added ASC
             FOR UPDATE",
        )
        .bind(&self.id)
        .fetch_all(&mut *tx)
        .await?;

        let ids: Vec<String> = args.iter().map(|(id, _)| id.clone()).collect();
        sqlx::query("DELETE FROM generatorargs WHERE generatorarg_id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE generators SET last_run = NOW() WHERE generator_id = $1")
            .bind(&self.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(args.into_iter().map(|(_, arg)| arg).collect())
    }

    pub async fn remove(id: &str, pool: &PgPool) -> Result<(), ServerError> {
        let result = sqlx::query("DELETE FROM generators WHERE generator_id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ServerError::NotFound(format!(
                "generator <{id}> does not exist"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator(trigger: i32, timeout: i32, queue_size: i64) -> Generator {
        let mut g = Generator::new(
            "dev".to_string(),
            "gen1".to_string(),
            "{}".to_string(),
            trigger,
            timeout,
        );
        g.queue_size = queue_size;
        g.last_run = Some(Utc::now());
        g
    }

    #[test]
    fn test_due_on_threshold() {
        assert!(!generator(3, 60, 0).due(Utc::now()));
        assert!(!generator(3, 60, 2).due(Utc::now()));
        assert!(generator(3, 60, 3).due(Utc::now()));
        assert!(generator(3, 60, 5).due(Utc::now()));
    }

    #[test]
    fn test_due_on_timeout_with_queued_args() {
        let mut g = generator(10, 60, 1);
        g.last_run = Some(Utc::now() - Duration::seconds(120));
        assert!(g.due(Utc::now()));

        // An empty queue never fires on timeout.
        g.queue_size = 0;
        assert!(!g.due(Utc::now()));

        // A recent run does not fire below the threshold.
        let g = generator(10, 60, 1);
        assert!(!g.due(Utc::now()));
    }

    #[test]
    fn test_timeout_disabled() {
        let mut g = generator(10, -1, 1);
        g.last_run = Some(Utc::now() - Duration::seconds(3600));
        assert!(!g.due(Utc::now()));
    }
}
