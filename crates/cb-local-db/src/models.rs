//! Ledger models and persistence operations.

use crate::connection::Database;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::warn;

/// Opaque job identifier, assigned at creation and immutable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque project identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ProjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Job lifecycle state.
///
/// Transitions are `pending -> processing -> {completed | failed}`; the
/// terminal states never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(crate::Error::generic(format!(
                "Unknown job status: {}",
                other
            ))),
        }
    }

    /// True for states that never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Processing) => true,
            (Self::Processing, Self::Completed) | (Self::Processing, Self::Failed) => true,
            (Self::Pending, _)
            | (Self::Processing, _)
            | (Self::Completed, _)
            | (Self::Failed, _) => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted unit of work with a lifecycle from pending to a terminal
/// result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub project_id: Option<ProjectId>,
    pub command_type: String,
    pub params: Map<String, Value>,
    pub status: JobStatus,
    pub result: Option<Map<String, Value>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Raw row shape for the jobs table.
#[derive(Debug, Clone)]
struct JobRecord {
    id: String,
    project_id: Option<String>,
    command_type: String,
    params: String,
    status: String,
    result: Option<String>,
    error: Option<String>,
    created_at: String,
    completed_at: Option<String>,
}

impl JobRecord {
    const COLUMNS: &'static str =
        "id, project_id, command_type, params, status, result, error, created_at, completed_at";

    // Qualified flavor for queries that join against the queue table.
    const QUALIFIED_COLUMNS: &'static str = "jobs.id, jobs.project_id, jobs.command_type, \
        jobs.params, jobs.status, jobs.result, jobs.error, jobs.created_at, jobs.completed_at";

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            command_type: row.get(2)?,
            params: row.get(3)?,
            status: row.get(4)?,
            result: row.get(5)?,
            error: row.get(6)?,
            created_at: row.get(7)?,
            completed_at: row.get(8)?,
        })
    }

    fn into_job(self) -> crate::Result<Job> {
        let params: Map<String, Value> = serde_json::from_str(&self.params)?;
        let result: Option<Map<String, Value>> =
            self.result.as_deref().map(serde_json::from_str).transpose()?;

        Ok(Job {
            id: JobId(self.id),
            project_id: self.project_id.map(ProjectId),
            command_type: self.command_type,
            params,
            status: JobStatus::parse(&self.status)?,
            result,
            error: self.error,
            created_at: parse_timestamp(&self.created_at)?,
            completed_at: self.completed_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

fn parse_timestamp(s: &str) -> crate::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| crate::Error::generic(format!("Invalid timestamp {:?}: {}", s, e)))
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Durable ledger of jobs and their FIFO pending-queue index.
///
/// All job and queue mutation goes through this store; a queue row exists
/// for a job iff the job is pending.
#[derive(Debug, Clone)]
pub struct JobStore {
    db: Database,
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a pending job and enqueue it. The job row and its queue entry
    /// are written in one transaction.
    pub fn add_job(
        &self,
        command_type: &str,
        params: Map<String, Value>,
        project_id: Option<&ProjectId>,
    ) -> crate::Result<JobId> {
        let job_id = JobId::new();
        let params_json = serde_json::to_string(&params)?;
        let created_at = now_rfc3339();

        self.db.transaction(|conn| {
            conn.execute(
                r#"
                INSERT INTO jobs (id, project_id, command_type, params, status, result, error, created_at, completed_at)
                VALUES (?, ?, ?, ?, ?, NULL, NULL, ?, NULL)
                "#,
                params![
                    job_id.as_str(),
                    project_id.map(ProjectId::as_str),
                    command_type,
                    params_json,
                    JobStatus::Pending.as_str(),
                    created_at
                ],
            )?;
            conn.execute(
                "INSERT INTO queue (job_id) VALUES (?)",
                params![job_id.as_str()],
            )?;
            Ok(())
        })?;

        Ok(job_id)
    }

    /// Get a job by id.
    pub fn get_job(&self, job_id: &JobId) -> crate::Result<Option<Job>> {
        self.db.read(|conn| Self::read_job(conn, job_id))
    }

    fn read_job(conn: &Connection, job_id: &JobId) -> crate::Result<Option<Job>> {
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM jobs WHERE id = ?",
                    JobRecord::COLUMNS
                ),
                params![job_id.as_str()],
                JobRecord::from_row,
            )
            .optional()?;

        record.map(JobRecord::into_job).transpose()
    }

    /// Atomically pop the oldest queue entry, flip the referenced job to
    /// processing, and return its full record.
    ///
    /// Runs as a single write-locked transaction: under concurrent callers,
    /// each pending job is handed to exactly one of them.
    pub fn get_next_job(&self) -> crate::Result<Option<Job>> {
        self.db.immediate_transaction(|conn| {
            let job_id: Option<String> = conn
                .query_row(
                    "SELECT job_id FROM queue ORDER BY id LIMIT 1",
                    params![],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(job_id) = job_id else {
                return Ok(None);
            };

            Self::mark_processing(conn, &JobId(job_id.clone()))?;
            Self::read_job(conn, &JobId(job_id))
        })
    }

    /// Claim one specific pending job: remove its queue entry and flip it to
    /// processing, in the same transaction shape as [`Self::get_next_job`].
    ///
    /// Returns `None` if the job does not exist or is no longer pending
    /// (already claimed, or removed by cleanup).
    pub fn claim_job(&self, job_id: &JobId) -> crate::Result<Option<Job>> {
        self.db.immediate_transaction(|conn| {
            let status: Option<String> = conn
                .query_row(
                    "SELECT status FROM jobs WHERE id = ?",
                    params![job_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            match status.as_deref().map(JobStatus::parse).transpose()? {
                Some(JobStatus::Pending) => {}
                _ => return Ok(None),
            }

            Self::mark_processing(conn, job_id)?;
            Self::read_job(conn, job_id)
        })
    }

    fn mark_processing(conn: &Connection, job_id: &JobId) -> crate::Result<()> {
        conn.execute("DELETE FROM queue WHERE job_id = ?", params![job_id.as_str()])?;
        conn.execute(
            "UPDATE jobs SET status = ? WHERE id = ?",
            params![JobStatus::Processing.as_str(), job_id.as_str()],
        )?;
        Ok(())
    }

    /// Write a terminal state for a job.
    ///
    /// `result` is persisted only for `completed`, `error` only for
    /// `failed`; `completed_at` is stamped here, exactly once. Transitions
    /// the state machine does not permit (out of a terminal state, or
    /// skipping `processing`) are logged and ignored without touching the
    /// record. Moving a job to `processing` goes through [`Self::claim_job`]
    /// or [`Self::get_next_job`], never through this method.
    pub fn update_job(
        &self,
        job_id: &JobId,
        status: JobStatus,
        result: Option<Map<String, Value>>,
        error: Option<String>,
    ) -> crate::Result<()> {
        if !status.is_terminal() {
            return Err(crate::Error::generic(format!(
                "update_job only writes terminal states, got {}",
                status
            )));
        }

        let result_json = result
            .filter(|_| status == JobStatus::Completed)
            .map(|r| serde_json::to_string(&r))
            .transpose()?;
        let error = error.filter(|_| status == JobStatus::Failed);

        self.db.immediate_transaction(|conn| {
            let current: Option<String> = conn
                .query_row(
                    "SELECT status FROM jobs WHERE id = ?",
                    params![job_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(current) = current else {
                warn!(job_id = %job_id, "update_job: job not found, ignoring");
                return Ok(());
            };
            let current = JobStatus::parse(&current)?;

            if !current.can_transition_to(status) {
                warn!(
                    job_id = %job_id,
                    from = %current,
                    to = %status,
                    "update_job: illegal transition, ignoring"
                );
                return Ok(());
            }

            conn.execute(
                "UPDATE jobs SET status = ?, result = ?, error = ?, completed_at = ? WHERE id = ?",
                params![
                    status.as_str(),
                    result_json,
                    error,
                    now_rfc3339(),
                    job_id.as_str()
                ],
            )?;
            Ok(())
        })
    }

    /// List jobs currently in the pending queue, newest first.
    pub fn list_pending_jobs(&self) -> crate::Result<Vec<Job>> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                r#"
                SELECT {} FROM jobs
                JOIN queue ON jobs.id = queue.job_id
                ORDER BY jobs.created_at DESC
                "#,
                JobRecord::QUALIFIED_COLUMNS
            ))?;

            let records = stmt.query_map(params![], JobRecord::from_row)?;

            let mut jobs = Vec::new();
            for record in records {
                jobs.push(record?.into_job()?);
            }
            Ok(jobs)
        })
    }

    /// List jobs belonging to a project, newest first.
    pub fn list_project_jobs(
        &self,
        project_id: &ProjectId,
        limit: usize,
    ) -> crate::Result<Vec<Job>> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM jobs WHERE project_id = ? ORDER BY created_at DESC LIMIT ?",
                JobRecord::COLUMNS
            ))?;

            let records =
                stmt.query_map(params![project_id.as_str(), limit as i64], JobRecord::from_row)?;

            let mut jobs = Vec::new();
            for record in records {
                jobs.push(record?.into_job()?);
            }
            Ok(jobs)
        })
    }

    /// Delete terminal jobs whose `completed_at` is older than `max_age`.
    ///
    /// Pending and processing jobs are never touched, regardless of age.
    /// Returns the number of jobs removed.
    pub fn clean_old_jobs(&self, max_age: chrono::Duration) -> crate::Result<usize> {
        let cutoff = (Utc::now() - max_age).to_rfc3339();
        self.db.transaction(|conn| {
            let deleted = conn.execute(
                r#"
                DELETE FROM jobs
                WHERE status IN (?, ?) AND completed_at IS NOT NULL AND completed_at < ?
                "#,
                params![
                    JobStatus::Completed.as_str(),
                    JobStatus::Failed.as_str(),
                    cutoff
                ],
            )?;
            Ok(deleted)
        })
    }
}

/// Project lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            other => Err(crate::Error::generic(format!(
                "Unknown project status: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named grouping of jobs, typically one working file on the peer side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub description: String,
    pub file_path: String,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_opened_at: Option<DateTime<Utc>>,
    pub metadata: Map<String, Value>,
}

/// Partial update to a project; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub file_path: Option<String>,
    pub status: Option<ProjectStatus>,
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone)]
struct ProjectRecord {
    id: String,
    name: String,
    description: String,
    file_path: String,
    status: String,
    created_at: String,
    updated_at: String,
    last_opened_at: Option<String>,
    metadata: Option<String>,
}

impl ProjectRecord {
    const COLUMNS: &'static str =
        "id, name, description, file_path, status, created_at, updated_at, last_opened_at, metadata";

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            file_path: row.get(3)?,
            status: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            last_opened_at: row.get(7)?,
            metadata: row.get(8)?,
        })
    }

    fn into_project(self) -> crate::Result<Project> {
        let metadata = self
            .metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?
            .unwrap_or_default();

        Ok(Project {
            id: ProjectId(self.id),
            name: self.name,
            description: self.description,
            file_path: self.file_path,
            status: ProjectStatus::parse(&self.status)?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            last_opened_at: self
                .last_opened_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            metadata,
        })
    }
}

/// Registry of projects that jobs may attach to.
#[derive(Debug, Clone)]
pub struct ProjectStore {
    db: Database,
}

impl ProjectStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new active project and return its id.
    pub fn create_project(
        &self,
        name: &str,
        description: &str,
        file_path: &str,
        metadata: Map<String, Value>,
    ) -> crate::Result<ProjectId> {
        let project_id = ProjectId::new();
        let now = now_rfc3339();
        let metadata_json = serde_json::to_string(&metadata)?;

        self.db.transaction(|conn| {
            conn.execute(
                r#"
                INSERT INTO projects (id, name, description, file_path, status, created_at, updated_at, last_opened_at, metadata)
                VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?)
                "#,
                params![
                    project_id.as_str(),
                    name,
                    description,
                    file_path,
                    ProjectStatus::Active.as_str(),
                    now,
                    now,
                    metadata_json
                ],
            )?;
            Ok(())
        })?;

        Ok(project_id)
    }

    /// Get a project by id.
    pub fn get_project(&self, project_id: &ProjectId) -> crate::Result<Option<Project>> {
        self.db.read(|conn| {
            let record = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM projects WHERE id = ?",
                        ProjectRecord::COLUMNS
                    ),
                    params![project_id.as_str()],
                    ProjectRecord::from_row,
                )
                .optional()?;
            record.map(ProjectRecord::into_project).transpose()
        })
    }

    /// Get a project by name.
    pub fn get_project_by_name(&self, name: &str) -> crate::Result<Option<Project>> {
        self.db.read(|conn| {
            let record = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM projects WHERE name = ?",
                        ProjectRecord::COLUMNS
                    ),
                    params![name],
                    ProjectRecord::from_row,
                )
                .optional()?;
            record.map(ProjectRecord::into_project).transpose()
        })
    }

    /// List projects, optionally filtered by status, most recently updated
    /// first.
    pub fn list_projects(
        &self,
        status: Option<ProjectStatus>,
        limit: usize,
    ) -> crate::Result<Vec<Project>> {
        self.db.read(|conn| {
            let mut projects = Vec::new();

            match status {
                Some(status) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM projects WHERE status = ? ORDER BY updated_at DESC LIMIT ?",
                        ProjectRecord::COLUMNS
                    ))?;
                    let records =
                        stmt.query_map(params![status.as_str(), limit as i64], ProjectRecord::from_row)?;
                    for record in records {
                        projects.push(record?.into_project()?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM projects ORDER BY updated_at DESC LIMIT ?",
                        ProjectRecord::COLUMNS
                    ))?;
                    let records = stmt.query_map(params![limit as i64], ProjectRecord::from_row)?;
                    for record in records {
                        projects.push(record?.into_project()?);
                    }
                }
            }

            Ok(projects)
        })
    }

    /// Apply a partial update; bumps `updated_at` when anything changes.
    /// Returns false when the project does not exist or the update is empty.
    pub fn update_project(
        &self,
        project_id: &ProjectId,
        update: ProjectUpdate,
    ) -> crate::Result<bool> {
        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(name) = update.name {
            sets.push("name = ?");
            values.push(Box::new(name));
        }
        if let Some(description) = update.description {
            sets.push("description = ?");
            values.push(Box::new(description));
        }
        if let Some(file_path) = update.file_path {
            sets.push("file_path = ?");
            values.push(Box::new(file_path));
        }
        if let Some(status) = update.status {
            sets.push("status = ?");
            values.push(Box::new(status.as_str().to_string()));
        }
        if let Some(metadata) = update.metadata {
            sets.push("metadata = ?");
            values.push(Box::new(serde_json::to_string(&metadata)?));
        }

        if sets.is_empty() {
            return Ok(false);
        }

        sets.push("updated_at = ?");
        values.push(Box::new(now_rfc3339()));
        values.push(Box::new(project_id.as_str().to_string()));

        self.db.transaction(|conn| {
            let sql = format!("UPDATE projects SET {} WHERE id = ?", sets.join(", "));
            let changed = conn.execute(&sql, rusqlite::params_from_iter(values.iter()))?;
            Ok(changed > 0)
        })
    }

    /// Record that the project's working file was opened.
    pub fn touch_project(&self, project_id: &ProjectId) -> crate::Result<bool> {
        let now = now_rfc3339();
        self.db.transaction(|conn| {
            let changed = conn.execute(
                "UPDATE projects SET last_opened_at = ?, updated_at = ? WHERE id = ?",
                params![now, now, project_id.as_str()],
            )?;
            Ok(changed > 0)
        })
    }

    /// Delete a project together with its jobs and their queue rows.
    pub fn delete_project(&self, project_id: &ProjectId) -> crate::Result<bool> {
        self.db.immediate_transaction(|conn| {
            conn.execute(
                "DELETE FROM queue WHERE job_id IN (SELECT id FROM jobs WHERE project_id = ?)",
                params![project_id.as_str()],
            )?;
            conn.execute(
                "DELETE FROM jobs WHERE project_id = ?",
                params![project_id.as_str()],
            )?;
            let changed = conn.execute(
                "DELETE FROM projects WHERE id = ?",
                params![project_id.as_str()],
            )?;
            Ok(changed > 0)
        })
    }
}
