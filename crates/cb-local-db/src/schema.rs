//! Database schema definitions and constants.

// Current schema version
pub const SCHEMA_VERSION: u32 = 1;

// Table names
pub const TABLE_SCHEMA_MIGRATIONS: &str = "schema_migrations";
pub const TABLE_JOBS: &str = "jobs";
pub const TABLE_QUEUE: &str = "queue";
pub const TABLE_PROJECTS: &str = "projects";

// Column names for the jobs table
pub mod jobs {
    pub const ID: &str = "id";
    pub const PROJECT_ID: &str = "project_id";
    pub const COMMAND_TYPE: &str = "command_type";
    pub const PARAMS: &str = "params";
    pub const STATUS: &str = "status";
    pub const RESULT: &str = "result";
    pub const ERROR: &str = "error";
    pub const CREATED_AT: &str = "created_at";
    pub const COMPLETED_AT: &str = "completed_at";
}

// Column names for the queue table
pub mod queue {
    pub const ID: &str = "id";
    pub const JOB_ID: &str = "job_id";
}

// Column names for the projects table
pub mod projects {
    pub const ID: &str = "id";
    pub const NAME: &str = "name";
    pub const DESCRIPTION: &str = "description";
    pub const FILE_PATH: &str = "file_path";
    pub const STATUS: &str = "status";
    pub const CREATED_AT: &str = "created_at";
    pub const UPDATED_AT: &str = "updated_at";
    pub const LAST_OPENED_AT: &str = "last_opened_at";
    pub const METADATA: &str = "metadata";
}
