//! Pipeline → stage → task rows: the generic execution graph an executor
//! consumes.

use chrono::Utc;
use rusqlite::{params, Connection};

use crate::error::{map_insert_error, Result, StoreError};
use crate::filter::Filter;
use crate::types::{
    Pipeline, PipelineCreate, PipelineFind, Stage, StageCreate, StageFind, Task, TaskCreate,
    TaskFind, TaskPatch,
};

const PIPELINE_COLUMNS: &str = "id, creator_id, created_ts, updater_id, updated_ts, name";

const STAGE_COLUMNS: &str = "id, creator_id, created_ts, updater_id, updated_ts,
     pipeline_id, environment_id, name";

const TASK_COLUMNS: &str = "id, creator_id, created_ts, updater_id, updated_ts,
     pipeline_id, stage_id, instance_id, database_id, name, status, type, payload";

pub fn create_pipeline(conn: &Connection, create: &PipelineCreate) -> Result<Pipeline> {
    let now = Utc::now().timestamp();
    let sql = format!(
        "INSERT INTO pipeline (creator_id, created_ts, updater_id, updated_ts, name)
         VALUES (?1, ?2, ?1, ?2, ?3)
         RETURNING {PIPELINE_COLUMNS}"
    );
    conn.query_row(
        &sql,
        params![create.creator_id, now, create.name],
        row_to_pipeline,
    )
    .map_err(|e| map_insert_error(e, "pipeline", || create.name.clone()))
}

pub fn find_pipelines(conn: &Connection, find: &PipelineFind) -> Result<Vec<Pipeline>> {
    let mut filter = Filter::new();
    filter.eq("id = ?", find.id);
    filter.eq("name = ?", find.name.clone());

    let sql = format!(
        "SELECT {PIPELINE_COLUMNS} FROM pipeline WHERE {} ORDER BY id",
        filter.sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(filter.params(), row_to_pipeline)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn create_stage(conn: &Connection, create: &StageCreate) -> Result<Stage> {
    let now = Utc::now().timestamp();
    let sql = format!(
        "INSERT INTO stage
            (creator_id, created_ts, updater_id, updated_ts,
             pipeline_id, environment_id, name)
         VALUES (?1, ?2, ?1, ?2, ?3, ?4, ?5)
         RETURNING {STAGE_COLUMNS}"
    );
    conn.query_row(
        &sql,
        params![
            create.creator_id,
            now,
            create.pipeline_id,
            create.environment_id,
            create.name
        ],
        row_to_stage,
    )
    .map_err(|e| map_insert_error(e, "stage", || create.name.clone()))
}

pub fn find_stages(conn: &Connection, find: &StageFind) -> Result<Vec<Stage>> {
    let mut filter = Filter::new();
    filter.eq("id = ?", find.id);
    filter.eq("pipeline_id = ?", find.pipeline_id);

    let sql = format!(
        "SELECT {STAGE_COLUMNS} FROM stage WHERE {} ORDER BY id",
        filter.sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(filter.params(), row_to_stage)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn create_task(conn: &Connection, create: &TaskCreate) -> Result<Task> {
    let now = Utc::now().timestamp();
    let sql = format!(
        "INSERT INTO task
            (creator_id, created_ts, updater_id, updated_ts, pipeline_id, stage_id,
             instance_id, database_id, name, status, type, payload)
         VALUES (?1, ?2, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         RETURNING {TASK_COLUMNS}"
    );
    conn.query_row(
        &sql,
        params![
            create.creator_id,
            now,
            create.pipeline_id,
            create.stage_id,
            create.instance_id,
            create.database_id,
            create.name,
            create.status,
            create.task_type,
            create.payload,
        ],
        row_to_task,
    )
    .map_err(|e| map_insert_error(e, "task", || create.name.clone()))
}

pub fn find_tasks(conn: &Connection, find: &TaskFind) -> Result<Vec<Task>> {
    let mut filter = Filter::new();
    filter.eq("id = ?", find.id);
    filter.eq("pipeline_id = ?", find.pipeline_id);
    filter.eq("stage_id = ?", find.stage_id);
    filter.eq("database_id = ?", find.database_id);
    filter.eq("status = ?", find.status);
    filter.eq("type = ?", find.task_type);
    filter.eq(
        "CASE WHEN json_valid(payload) THEN json_extract(payload, '$.backupId') END = ?",
        find.backup_id,
    );

    let sql = format!(
        "SELECT {TASK_COLUMNS} FROM task WHERE {} ORDER BY id",
        filter.sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(filter.params(), row_to_task)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Move a task along its lifecycle. Transitions not allowed by
/// [`crate::TaskStatus::can_transition_to`] fail with `InvalidTransition`.
///
/// Runs inside the caller's transaction so the read-check-write is atomic.
pub fn patch_task(conn: &Connection, patch: &TaskPatch) -> Result<Task> {
    let current = find_tasks(
        conn,
        &TaskFind {
            id: Some(patch.id),
            ..Default::default()
        },
    )?
    .into_iter()
    .next()
    .ok_or_else(|| StoreError::not_found("task", format!("id {}", patch.id)))?;

    if let Some(next) = patch.status {
        if !current.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                from: current.status,
                to: next,
            });
        }
    }

    let now = Utc::now().timestamp();
    let sql = format!(
        "UPDATE task SET
            updater_id = ?1,
            updated_ts = ?2,
            status     = COALESCE(?3, status)
         WHERE id = ?4
         RETURNING {TASK_COLUMNS}"
    );
    Ok(conn.query_row(
        &sql,
        params![patch.updater_id, now, patch.status, patch.id],
        row_to_task,
    )?)
}

fn row_to_pipeline(row: &rusqlite::Row<'_>) -> rusqlite::Result<Pipeline> {
    Ok(Pipeline {
        id: row.get(0)?,
        creator_id: row.get(1)?,
        created_ts: row.get(2)?,
        updater_id: row.get(3)?,
        updated_ts: row.get(4)?,
        name: row.get(5)?,
    })
}

fn row_to_stage(row: &rusqlite::Row<'_>) -> rusqlite::Result<Stage> {
    Ok(Stage {
        id: row.get(0)?,
        creator_id: row.get(1)?,
        created_ts: row.get(2)?,
        updater_id: row.get(3)?,
        updated_ts: row.get(4)?,
        pipeline_id: row.get(5)?,
        environment_id: row.get(6)?,
        name: row.get(7)?,
    })
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        creator_id: row.get(1)?,
        created_ts: row.get(2)?,
        updater_id: row.get(3)?,
        updated_ts: row.get(4)?,
        pipeline_id: row.get(5)?,
        stage_id: row.get(6)?,
        instance_id: row.get(7)?,
        database_id: row.get(8)?,
        name: row.get(9)?,
        status: row.get(10)?,
        task_type: row.get(11)?,
        payload: row.get(12)?,
    })
}
