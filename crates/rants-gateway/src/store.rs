//! Durable, tenant-scoped persistence of sessions, transcripts, responses,
//! and audit events, backed by an embedded SQLite database.
//!
//! Mutations are single statements or transactions covering a step together
//! with its calls and results, so a step is either fully visible or absent.
//! Single-writer discipline is enforced by requiring a monotonically
//! increasing `step_index`; gaps and duplicates are rejected.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{ErrorKind, GatewayError};
use crate::transcript::{
    AuditEvent, CanonicalTranscript, RecursiveSession, SessionStatus, Step, ToolCallRecord,
    ToolResultRecord,
};

#[derive(Clone, Debug, PartialEq)]
pub struct StoredResponse {
    pub response_id: String,
    pub session_id: Uuid,
    pub tenant_id: String,
    pub previous_response_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub transcript: CanonicalTranscript,
    pub response_json: Value,
}

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                GatewayError::internal(format!(
                    "failed to create state directory {}: {error}",
                    parent.display()
                ))
            })?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, GatewayError> {
        let store = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), GatewayError> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                parent_id TEXT,
                tenant_id TEXT NOT NULL,
                depth INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                deadline_at TEXT NOT NULL,
                status TEXT NOT NULL,
                system TEXT,
                user_input TEXT NOT NULL,
                tool_schema_digest TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS steps (
                session_id TEXT NOT NULL,
                step_index INTEGER NOT NULL,
                generator_output TEXT NOT NULL,
                tool_intent TEXT,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                PRIMARY KEY (session_id, step_index)
            );
            CREATE TABLE IF NOT EXISTS tool_calls (
                call_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                step_index INTEGER NOT NULL,
                position INTEGER NOT NULL,
                tool TEXT NOT NULL,
                parameters_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS tool_results (
                call_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                step_index INTEGER NOT NULL,
                position INTEGER NOT NULL,
                ok INTEGER NOT NULL,
                output_json TEXT NOT NULL,
                error_kind TEXT,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                bytes_truncated INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                step_index INTEGER NOT NULL,
                call_id TEXT NOT NULL,
                tool TEXT NOT NULL,
                ok INTEGER NOT NULL,
                error_kind TEXT,
                timestamp TEXT NOT NULL,
                size_before INTEGER NOT NULL,
                size_after INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS responses (
                response_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                previous_response_id TEXT,
                created_at TEXT NOT NULL,
                transcript_json TEXT NOT NULL,
                response_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_steps_session ON steps(session_id);
            CREATE INDEX IF NOT EXISTS idx_audit_session ON audit(session_id, step_index);",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, GatewayError> {
        self.conn
            .lock()
            .map_err(|_| GatewayError::internal("store mutex poisoned"))
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T, GatewayError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, GatewayError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| GatewayError::internal("store mutex poisoned"))?;
            op(&mut guard)
        })
        .await
        .map_err(|error| GatewayError::internal(format!("store task failed: {error}")))?
    }

    pub async fn create_session(
        &self,
        session: &RecursiveSession,
        transcript: &CanonicalTranscript,
    ) -> Result<(), GatewayError> {
        let session = session.clone();
        let system = transcript.system.clone();
        let user = transcript.user.clone();
        let digest = transcript.tool_schema_digest.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sessions(session_id, parent_id, tenant_id, depth, created_at, deadline_at, status, system, user_input, tool_schema_digest)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    session.session_id.to_string(),
                    session.parent_id.map(|id| id.to_string()),
                    session.tenant_id,
                    session.depth,
                    session.created_at.to_rfc3339(),
                    session.deadline_at.to_rfc3339(),
                    session.status.as_str(),
                    system,
                    user,
                    digest,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn update_session_status(
        &self,
        session_id: Uuid,
        status: SessionStatus,
    ) -> Result<(), GatewayError> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE sessions SET status = ?1 WHERE session_id = ?2",
                params![status.as_str(), session_id.to_string()],
            )?;
            Ok(())
        })
        .await
    }

    /// Append a step with its tool calls in one transaction. The step index
    /// must be exactly one past the session's last; anything else means a
    /// second writer and is rejected.
    pub async fn append_step(
        &self,
        session_id: Uuid,
        step_index: u32,
        step: &Step,
    ) -> Result<(), GatewayError> {
        let step = step.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let last: i64 = tx.query_row(
                "SELECT COALESCE(MAX(step_index), -1) FROM steps WHERE session_id = ?1",
                params![session_id.to_string()],
                |row| row.get(0),
            )?;
            if i64::from(step_index) != last + 1 {
                return Err(GatewayError::new(
                    ErrorKind::ConcurrentModification,
                    format!(
                        "step index {step_index} does not follow last index {last} for session {session_id}"
                    ),
                ));
            }

            tx.execute(
                "INSERT INTO steps(session_id, step_index, generator_output, tool_intent, started_at, finished_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    session_id.to_string(),
                    step_index,
                    step.generator_output,
                    step.tool_intent,
                    step.started_at.to_rfc3339(),
                    step.finished_at.map(|at| at.to_rfc3339()),
                ],
            )?;
            for (position, call) in step.tool_calls.iter().enumerate() {
                tx.execute(
                    "INSERT INTO tool_calls(call_id, session_id, step_index, position, tool, parameters_json)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        call.id.to_string(),
                        session_id.to_string(),
                        step_index,
                        position as i64,
                        call.tool,
                        call.parameters.to_string(),
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Attach the results to an appended step and stamp its finish time, in
    /// one transaction.
    pub async fn finalize_step(
        &self,
        session_id: Uuid,
        step_index: u32,
        results: &[ToolResultRecord],
        finished_at: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        let results = results.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for (position, result) in results.iter().enumerate() {
                tx.execute(
                    "INSERT INTO tool_results(call_id, session_id, step_index, position, ok, output_json, error_kind, started_at, finished_at, bytes_truncated)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        result.call_id.to_string(),
                        session_id.to_string(),
                        step_index,
                        position as i64,
                        result.ok,
                        result.output.to_string(),
                        result.error_kind.map(|kind| kind.as_str()),
                        result.started_at.to_rfc3339(),
                        result.finished_at.to_rfc3339(),
                        result.bytes_truncated,
                    ],
                )?;
            }
            tx.execute(
                "UPDATE steps SET finished_at = ?1 WHERE session_id = ?2 AND step_index = ?3",
                params![
                    finished_at.to_rfc3339(),
                    session_id.to_string(),
                    step_index
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn load_session(
        &self,
        session_id: Uuid,
        tenant_id: &str,
    ) -> Result<Option<(RecursiveSession, CanonicalTranscript)>, GatewayError> {
        let tenant_id = tenant_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT parent_id, depth, created_at, deadline_at, status, system, user_input, tool_schema_digest
                     FROM sessions WHERE session_id = ?1 AND tenant_id = ?2",
                    params![session_id.to_string(), tenant_id],
                    |row| {
                        Ok((
                            row.get::<_, Option<String>>(0)?,
                            row.get::<_, u32>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, Option<String>>(5)?,
                            row.get::<_, String>(6)?,
                            row.get::<_, String>(7)?,
                        ))
                    },
                )
                .optional()?;
            let Some((parent_id, depth, created_at, deadline_at, status, system, user, digest)) =
                row
            else {
                return Ok(None);
            };

            let session = RecursiveSession {
                session_id,
                parent_id: parent_id.and_then(|id| Uuid::parse_str(&id).ok()),
                tenant_id,
                depth,
                created_at: parse_timestamp(&created_at)?,
                deadline_at: parse_timestamp(&deadline_at)?,
                status: SessionStatus::parse(&status)
                    .ok_or_else(|| GatewayError::internal(format!("bad status '{status}'")))?,
            };
            let steps = load_steps(conn, session_id)?;
            let transcript = CanonicalTranscript {
                system,
                user,
                tool_schema_digest: digest,
                steps,
            };
            Ok(Some((session, transcript)))
        })
        .await
    }

    pub async fn persist_response(&self, stored: &StoredResponse) -> Result<(), GatewayError> {
        let stored = stored.clone();
        self.with_conn(move |conn| {
            let transcript_json = serde_json::to_string(&stored.transcript)
                .map_err(|error| GatewayError::internal(format!("encode transcript: {error}")))?;
            conn.execute(
                "INSERT INTO responses(response_id, session_id, tenant_id, previous_response_id, created_at, transcript_json, response_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    stored.response_id,
                    stored.session_id.to_string(),
                    stored.tenant_id,
                    stored.previous_response_id,
                    stored.created_at.to_rfc3339(),
                    transcript_json,
                    stored.response_json.to_string(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Lookup is tenant-scoped: a response owned by another tenant is
    /// indistinguishable from a missing one.
    pub async fn lookup_response(
        &self,
        response_id: &str,
        tenant_id: &str,
    ) -> Result<Option<StoredResponse>, GatewayError> {
        let response_id = response_id.to_string();
        let tenant_id = tenant_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT session_id, previous_response_id, created_at, transcript_json, response_json
                     FROM responses WHERE response_id = ?1 AND tenant_id = ?2",
                    params![response_id, tenant_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    },
                )
                .optional()?;
            let Some((session_id, previous, created_at, transcript_json, response_json)) = row
            else {
                return Ok(None);
            };
            Ok(Some(StoredResponse {
                response_id,
                session_id: Uuid::parse_str(&session_id)
                    .map_err(|error| GatewayError::internal(format!("bad session id: {error}")))?,
                tenant_id,
                previous_response_id: previous,
                created_at: parse_timestamp(&created_at)?,
                transcript: serde_json::from_str(&transcript_json).map_err(|error| {
                    GatewayError::internal(format!("decode transcript: {error}"))
                })?,
                response_json: serde_json::from_str(&response_json)
                    .map_err(|error| GatewayError::internal(format!("decode response: {error}")))?,
            }))
        })
        .await
    }

    /// All sessions for a tenant, oldest first. Used by operators and tests
    /// to walk session trees via `parent_id`.
    pub async fn list_sessions(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<RecursiveSession>, GatewayError> {
        let tenant_id = tenant_id.to_string();
        self.with_conn(move |conn| {
            let mut statement = conn.prepare(
                "SELECT session_id, parent_id, depth, created_at, deadline_at, status
                 FROM sessions WHERE tenant_id = ?1 ORDER BY created_at ASC, session_id ASC",
            )?;
            let rows = statement
                .query_map(params![tenant_id.clone()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(id, parent, depth, created_at, deadline_at, status)| {
                    Ok(RecursiveSession {
                        session_id: Uuid::parse_str(&id).map_err(|error| {
                            GatewayError::internal(format!("bad session id: {error}"))
                        })?,
                        parent_id: parent.and_then(|id| Uuid::parse_str(&id).ok()),
                        tenant_id: tenant_id.clone(),
                        depth,
                        created_at: parse_timestamp(&created_at)?,
                        deadline_at: parse_timestamp(&deadline_at)?,
                        status: SessionStatus::parse(&status).ok_or_else(|| {
                            GatewayError::internal(format!("bad status '{status}'"))
                        })?,
                    })
                })
                .collect()
        })
        .await
    }

    pub async fn record_audit(&self, event: &AuditEvent) -> Result<(), GatewayError> {
        let event = event.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO audit(tenant_id, session_id, step_index, call_id, tool, ok, error_kind, timestamp, size_before, size_after)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    event.tenant_id,
                    event.session_id.to_string(),
                    event.step_index,
                    event.call_id.to_string(),
                    event.tool,
                    event.ok,
                    event.error_kind.map(|kind| kind.as_str()),
                    event.timestamp.to_rfc3339(),
                    event.size_before,
                    event.size_after,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn audit_events(&self, session_id: Uuid) -> Result<Vec<AuditEvent>, GatewayError> {
        self.with_conn(move |conn| {
            let mut statement = conn.prepare(
                "SELECT tenant_id, step_index, call_id, tool, ok, error_kind, timestamp, size_before, size_after
                 FROM audit WHERE session_id = ?1 ORDER BY id ASC",
            )?;
            let rows = statement
                .query_map(params![session_id.to_string()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, bool>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, u64>(7)?,
                        row.get::<_, u64>(8)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(
                    |(tenant, step_index, call_id, tool, ok, kind, timestamp, before, after)| {
                        Ok(AuditEvent {
                            tenant_id: tenant,
                            session_id,
                            step_index,
                            call_id: Uuid::parse_str(&call_id).map_err(|error| {
                                GatewayError::internal(format!("bad call id: {error}"))
                            })?,
                            tool,
                            ok,
                            error_kind: kind.as_deref().and_then(ErrorKind::parse),
                            timestamp: parse_timestamp(&timestamp)?,
                            size_before: before,
                            size_after: after,
                        })
                    },
                )
                .collect()
        })
        .await
    }
}

fn load_steps(conn: &Connection, session_id: Uuid) -> Result<Vec<Step>, GatewayError> {
    let mut statement = conn.prepare(
        "SELECT step_index, generator_output, tool_intent, started_at, finished_at
         FROM steps WHERE session_id = ?1 ORDER BY step_index ASC",
    )?;
    let rows = statement
        .query_map(params![session_id.to_string()], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut steps = Vec::with_capacity(rows.len());
    for (step_index, generator_output, tool_intent, started_at, finished_at) in rows {
        let tool_calls = load_calls(conn, session_id, step_index)?;
        let tool_results = load_results(conn, session_id, step_index)?;
        steps.push(Step {
            generator_output,
            tool_intent,
            tool_calls,
            tool_results,
            started_at: parse_timestamp(&started_at)?,
            finished_at: finished_at.as_deref().map(parse_timestamp).transpose()?,
        });
    }
    Ok(steps)
}

fn load_calls(
    conn: &Connection,
    session_id: Uuid,
    step_index: u32,
) -> Result<Vec<ToolCallRecord>, GatewayError> {
    let mut statement = conn.prepare(
        "SELECT call_id, tool, parameters_json FROM tool_calls
         WHERE session_id = ?1 AND step_index = ?2 ORDER BY position ASC",
    )?;
    let rows = statement
        .query_map(params![session_id.to_string(), step_index], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(call_id, tool, parameters)| {
            Ok(ToolCallRecord {
                id: Uuid::parse_str(&call_id)
                    .map_err(|error| GatewayError::internal(format!("bad call id: {error}")))?,
                tool,
                parameters: serde_json::from_str(&parameters)
                    .map_err(|error| GatewayError::internal(format!("bad parameters: {error}")))?,
            })
        })
        .collect()
}

fn load_results(
    conn: &Connection,
    session_id: Uuid,
    step_index: u32,
) -> Result<Vec<ToolResultRecord>, GatewayError> {
    let mut statement = conn.prepare(
        "SELECT call_id, ok, output_json, error_kind, started_at, finished_at, bytes_truncated
         FROM tool_results WHERE session_id = ?1 AND step_index = ?2 ORDER BY position ASC",
    )?;
    let rows = statement
        .query_map(params![session_id.to_string(), step_index], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, bool>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, u64>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(
            |(call_id, ok, output, kind, started_at, finished_at, bytes_truncated)| {
                Ok(ToolResultRecord {
                    call_id: Uuid::parse_str(&call_id)
                        .map_err(|error| GatewayError::internal(format!("bad call id: {error}")))?,
                    ok,
                    output: serde_json::from_str(&output)
                        .map_err(|error| GatewayError::internal(format!("bad output: {error}")))?,
                    error_kind: kind.as_deref().and_then(ErrorKind::parse),
                    started_at: parse_timestamp(&started_at)?,
                    finished_at: parse_timestamp(&finished_at)?,
                    bytes_truncated,
                })
            },
        )
        .collect()
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, GatewayError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|error| GatewayError::internal(format!("bad timestamp '{raw}': {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_step(tool: Option<&str>) -> Step {
        let mut step = Step::begin();
        step.generator_output = "hello".to_string();
        if let Some(tool) = tool {
            step.tool_intent = Some(format!("use {tool}"));
            step.tool_calls = vec![ToolCallRecord {
                id: Uuid::new_v4(),
                tool: tool.to_string(),
                parameters: json!({"command": "echo hi"}),
            }];
        }
        step
    }

    #[tokio::test(flavor = "current_thread")]
    async fn session_round_trips_modulo_timestamps() {
        let store = SqliteStore::open_in_memory().expect("in-memory store");
        let session = RecursiveSession::root("tenant-a", 120);
        let transcript = CanonicalTranscript::new(Some("sys".to_string()), "hi", &[]);
        store
            .create_session(&session, &transcript)
            .await
            .expect("create session");

        let step = sample_step(Some("bash"));
        store
            .append_step(session.session_id, 0, &step)
            .await
            .expect("append step");
        let result = ToolResultRecord {
            call_id: step.tool_calls[0].id,
            ok: true,
            output: json!({"exit_code": 0}),
            error_kind: None,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            bytes_truncated: 0,
        };
        store
            .finalize_step(session.session_id, 0, &[result], Utc::now())
            .await
            .expect("finalize step");

        let (loaded, loaded_transcript) = store
            .load_session(session.session_id, "tenant-a")
            .await
            .expect("load")
            .expect("session should exist");
        assert_eq!(loaded.session_id, session.session_id);
        assert_eq!(loaded.depth, 0);
        assert_eq!(loaded_transcript.system.as_deref(), Some("sys"));
        assert_eq!(loaded_transcript.user, "hi");
        assert_eq!(loaded_transcript.steps.len(), 1);
        let loaded_step = &loaded_transcript.steps[0];
        assert_eq!(loaded_step.generator_output, "hello");
        assert_eq!(loaded_step.tool_calls.len(), 1);
        assert_eq!(loaded_step.tool_results.len(), 1);
        assert_eq!(loaded_step.tool_calls[0].tool, "bash");
        assert!(loaded_step.finished_at.is_some());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn append_step_rejects_gaps_and_duplicates() {
        let store = SqliteStore::open_in_memory().expect("in-memory store");
        let session = RecursiveSession::root("tenant-a", 120);
        let transcript = CanonicalTranscript::new(None, "hi", &[]);
        store
            .create_session(&session, &transcript)
            .await
            .expect("create session");

        store
            .append_step(session.session_id, 0, &sample_step(None))
            .await
            .expect("first step");

        let duplicate = store
            .append_step(session.session_id, 0, &sample_step(None))
            .await
            .expect_err("duplicate index should fail");
        assert_eq!(duplicate.kind, ErrorKind::ConcurrentModification);

        let gap = store
            .append_step(session.session_id, 2, &sample_step(None))
            .await
            .expect_err("gap should fail");
        assert_eq!(gap.kind, ErrorKind::ConcurrentModification);

        store
            .append_step(session.session_id, 1, &sample_step(None))
            .await
            .expect("next index should succeed");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn response_lookup_is_tenant_scoped() {
        let store = SqliteStore::open_in_memory().expect("in-memory store");
        let session = RecursiveSession::root("tenant-a", 120);
        let stored = StoredResponse {
            response_id: "resp_1".to_string(),
            session_id: session.session_id,
            tenant_id: "tenant-a".to_string(),
            previous_response_id: None,
            created_at: Utc::now(),
            transcript: CanonicalTranscript::new(None, "hi", &[]),
            response_json: json!({"id": "resp_1"}),
        };
        store.persist_response(&stored).await.expect("persist");

        let hit = store
            .lookup_response("resp_1", "tenant-a")
            .await
            .expect("lookup");
        assert!(hit.is_some());
        assert_eq!(hit.expect("present").transcript.user, "hi");

        let miss = store
            .lookup_response("resp_1", "tenant-b")
            .await
            .expect("lookup");
        assert!(miss.is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn audit_rows_come_back_in_order() {
        let store = SqliteStore::open_in_memory().expect("in-memory store");
        let session_id = Uuid::new_v4();
        for step_index in 0..2u32 {
            store
                .record_audit(&AuditEvent {
                    tenant_id: "tenant-a".to_string(),
                    session_id,
                    step_index,
                    call_id: Uuid::new_v4(),
                    tool: "bash".to_string(),
                    ok: step_index == 0,
                    error_kind: (step_index == 1).then_some(ErrorKind::ToolExecError),
                    timestamp: Utc::now(),
                    size_before: 10,
                    size_after: 10,
                })
                .await
                .expect("record audit");
        }

        let events = store.audit_events(session_id).await.expect("list audit");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].step_index, 0);
        assert!(events[0].ok);
        assert_eq!(events[1].error_kind, Some(ErrorKind::ToolExecError));
    }
}
