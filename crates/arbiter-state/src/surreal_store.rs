//! SurrealDB-backed [`StateStore`].
//!
//! One table per persisted collection plus a singleton `validator_meta` row.
//! A save rewrites every table inside a single transaction.

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::error::StateError;
use crate::schema::{
    BlacklistEntry, PendingCommit, ReputationRecord, SelectionCounters, ValidatorState, WorkerId,
};
use crate::storage_traits::{StateResult, StateStore};

mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serde::Serialize::serialize(&SurrealDatetime::from(*date), serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

const SCHEMA: &str = r#"
    DEFINE TABLE IF NOT EXISTS reputation SCHEMALESS;
    DEFINE INDEX IF NOT EXISTS idx_reputation_worker ON reputation FIELDS worker_id UNIQUE;

    DEFINE TABLE IF NOT EXISTS blacklist SCHEMALESS;
    DEFINE INDEX IF NOT EXISTS idx_blacklist_worker ON blacklist FIELDS worker_id UNIQUE;

    DEFINE TABLE IF NOT EXISTS violation SCHEMALESS;
    DEFINE INDEX IF NOT EXISTS idx_violation_worker ON violation FIELDS worker_id UNIQUE;

    DEFINE TABLE IF NOT EXISTS query_count SCHEMALESS;
    DEFINE INDEX IF NOT EXISTS idx_query_count_worker ON query_count FIELDS worker_id UNIQUE;

    DEFINE TABLE IF NOT EXISTS validator_meta SCHEMALESS;
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbReputation {
    worker_id: String,
    ema_quality: f64,
    #[serde(default)]
    history_window: Vec<f64>,
    last_updated_round: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbBlacklist {
    worker_id: String,
    reason: String,
    #[serde(with = "surreal_datetime")]
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbCounter {
    worker_id: String,
    count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DbMeta {
    #[serde(default)]
    total_rounds: u64,
    #[serde(default)]
    last_round: u64,
    #[serde(default)]
    last_committed_round: Option<u64>,
    #[serde(default)]
    pending_commit: Option<DbPendingCommit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbPendingCommit {
    round: u64,
    worker_ids: Vec<String>,
    weights: Vec<f64>,
}

/// Connection settings for a remote SurrealDB.
#[derive(Debug, Clone)]
pub struct SurrealConfig {
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    /// Root credentials; omitted for unauthenticated local servers.
    pub credentials: Option<(String, String)>,
}

/// SurrealDB implementation of [`StateStore`].
pub struct SurrealStateStore {
    db: Surreal<Any>,
}

impl SurrealStateStore {
    /// In-memory database, mostly for tests.
    pub async fn in_memory() -> crate::Result<Self> {
        Self::open("mem://", "arbiter", "main").await
    }

    /// Embedded on-disk database at `path` (surrealkv engine).
    pub async fn open_local(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let endpoint = format!("surrealkv://{}", path.as_ref().display());
        Self::open(&endpoint, "arbiter", "main").await
    }

    /// Remote server, optionally signing in as root.
    #[instrument(skip(config), fields(endpoint = %config.endpoint, namespace = %config.namespace))]
    pub async fn connect(config: SurrealConfig) -> crate::Result<Self> {
        let db = surrealdb::engine::any::connect(&config.endpoint)
            .await
            .map_err(|e| {
                StateError::Connection(format!("failed to connect to {}: {e}", config.endpoint))
            })?;

        if let Some((username, password)) = &config.credentials {
            db.signin(Root { username, password })
                .await
                .map_err(|e| StateError::Connection(format!("root authentication failed: {e}")))?;
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        let store = Self { db };
        store.init_schema().await?;
        info!("SurrealStateStore connected");
        Ok(store)
    }

    async fn open(endpoint: &str, ns: &str, database: &str) -> crate::Result<Self> {
        let db = surrealdb::engine::any::connect(endpoint)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;
        db.use_ns(ns)
            .use_db(database)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        let store = Self { db };
        store.init_schema().await?;
        info!(endpoint, "SurrealStateStore connected");
        Ok(store)
    }

    async fn init_schema(&self) -> crate::Result<()> {
        debug!("initializing arbiter state schema");
        self.db.query(SCHEMA).await?.check()?;
        Ok(())
    }
}

fn to_rows(state: &ValidatorState) -> (Vec<DbReputation>, Vec<DbBlacklist>, Vec<DbCounter>, Vec<DbCounter>, DbMeta) {
    let reputations = state
        .reputations
        .values()
        .map(|r| DbReputation {
            worker_id: r.worker_id.0.clone(),
            ema_quality: r.ema_quality,
            history_window: r.history_window.iter().copied().collect(),
            last_updated_round: r.last_updated_round,
        })
        .collect();
    let blacklist = state
        .blacklist
        .values()
        .map(|b| DbBlacklist {
            worker_id: b.worker_id.0.clone(),
            reason: b.reason.clone(),
            expires_at: b.expires_at,
        })
        .collect();
    let violations = state
        .violations
        .iter()
        .map(|(w, n)| DbCounter {
            worker_id: w.0.clone(),
            count: u64::from(*n),
        })
        .collect();
    let query_counts = state
        .selection
        .query_counts
        .iter()
        .map(|(w, n)| DbCounter {
            worker_id: w.0.clone(),
            count: *n,
        })
        .collect();
    let meta = DbMeta {
        total_rounds: state.selection.total_rounds,
        last_round: state.last_round,
        last_committed_round: state.last_committed_round,
        pending_commit: state.pending_commit.as_ref().map(|p| DbPendingCommit {
            round: p.round,
            worker_ids: p.worker_ids.iter().map(|w| w.0.clone()).collect(),
            weights: p.weights.clone(),
        }),
    };
    (reputations, blacklist, violations, query_counts, meta)
}

#[async_trait]
impl StateStore for SurrealStateStore {
    #[instrument(skip(self))]
    async fn load_state(&self) -> StateResult<ValidatorState> {
        let mut res = self
            .db
            .query("SELECT * OMIT id FROM reputation")
            .query("SELECT * OMIT id FROM blacklist")
            .query("SELECT * OMIT id FROM violation")
            .query("SELECT * OMIT id FROM query_count")
            .query("SELECT * OMIT id FROM validator_meta")
            .await?;

        let reputations: Vec<DbReputation> = res.take(0)?;
        let blacklist: Vec<DbBlacklist> = res.take(1)?;
        let violations: Vec<DbCounter> = res.take(2)?;
        let query_counts: Vec<DbCounter> = res.take(3)?;
        let meta: Vec<DbMeta> = res.take(4)?;
        let meta = meta.into_iter().next().unwrap_or_default();

        let mut state = ValidatorState {
            last_round: meta.last_round,
            last_committed_round: meta.last_committed_round,
            pending_commit: meta.pending_commit.map(|p| PendingCommit {
                round: p.round,
                worker_ids: p.worker_ids.into_iter().map(WorkerId).collect(),
                weights: p.weights,
            }),
            selection: SelectionCounters {
                total_rounds: meta.total_rounds,
                query_counts: BTreeMap::new(),
            },
            ..Default::default()
        };
        for r in reputations {
            let id = WorkerId(r.worker_id);
            state.reputations.insert(
                id.clone(),
                ReputationRecord {
                    worker_id: id,
                    ema_quality: r.ema_quality,
                    history_window: VecDeque::from(r.history_window),
                    last_updated_round: r.last_updated_round,
                },
            );
        }
        for b in blacklist {
            let id = WorkerId(b.worker_id);
            state.blacklist.insert(
                id.clone(),
                BlacklistEntry {
                    worker_id: id,
                    reason: b.reason,
                    expires_at: b.expires_at,
                },
            );
        }
        for v in violations {
            let count = u32::try_from(v.count)
                .map_err(|_| StateError::Corrupt(format!("violation count {} out of range", v.count)))?;
            state.violations.insert(WorkerId(v.worker_id), count);
        }
        for q in query_counts {
            state.selection.query_counts.insert(WorkerId(q.worker_id), q.count);
        }

        debug!(
            workers = state.reputations.len(),
            blacklisted = state.blacklist.len(),
            "state loaded"
        );
        Ok(state)
    }

    #[instrument(skip(self, state), fields(last_round = state.last_round))]
    async fn save_state(&self, state: &ValidatorState) -> StateResult<()> {
        let (reputations, blacklist, violations, query_counts, meta) = to_rows(state);

        let mut sql = String::from(
            "BEGIN TRANSACTION;
             DELETE reputation;
             DELETE blacklist;
             DELETE violation;
             DELETE query_count;
             DELETE validator_meta;\n",
        );
        // INSERT rejects an empty array, so skip empty collections.
        if !reputations.is_empty() {
            sql.push_str("INSERT INTO reputation $reputations;\n");
        }
        if !blacklist.is_empty() {
            sql.push_str("INSERT INTO blacklist $blacklist;\n");
        }
        if !violations.is_empty() {
            sql.push_str("INSERT INTO violation $violations;\n");
        }
        if !query_counts.is_empty() {
            sql.push_str("INSERT INTO query_count $query_counts;\n");
        }
        sql.push_str("CREATE validator_meta CONTENT $meta;\nCOMMIT TRANSACTION;");

        self.db
            .query(sql)
            .bind(("reputations", reputations))
            .bind(("blacklist", blacklist))
            .bind(("violations", violations))
            .bind(("query_counts", query_counts))
            .bind(("meta", meta))
            .await?
            .check()?;

        debug!("state saved");
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "surrealdb"
    }
}
