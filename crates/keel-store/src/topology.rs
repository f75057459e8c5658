//! Environment → instance → database rows.
//!
//! These are owned by configuration management; the runner only reads them
//! through [`compose_database`]. The create functions exist for seeding.

use chrono::Utc;
use rusqlite::{params, Connection};

use crate::error::{map_insert_error, Result, StoreError};
use crate::types::{
    Database, DatabaseCreate, Environment, EnvironmentCreate, Instance, InstanceCreate,
};

pub fn create_environment(conn: &Connection, create: &EnvironmentCreate) -> Result<Environment> {
    let now = Utc::now().timestamp();
    conn.query_row(
        "INSERT INTO environment (creator_id, created_ts, name)
         VALUES (?1, ?2, ?3)
         RETURNING id, name",
        params![create.creator_id, now, create.name],
        |row| {
            Ok(Environment {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        },
    )
    .map_err(|e| map_insert_error(e, "environment", || create.name.clone()))
}

pub fn create_instance(conn: &Connection, create: &InstanceCreate) -> Result<Instance> {
    let environment = find_environment(conn, create.environment_id)?;
    let now = Utc::now().timestamp();
    let id: i64 = conn
        .query_row(
            "INSERT INTO instance (creator_id, created_ts, environment_id, name, host)
             VALUES (?1, ?2, ?3, ?4, ?5)
             RETURNING id",
            params![
                create.creator_id,
                now,
                create.environment_id,
                create.name,
                create.host
            ],
            |row| row.get(0),
        )
        .map_err(|e| map_insert_error(e, "instance", || create.name.clone()))?;

    Ok(Instance {
        id,
        environment_id: create.environment_id,
        name: create.name.clone(),
        host: create.host.clone(),
        environment,
    })
}

pub fn create_database(conn: &Connection, create: &DatabaseCreate) -> Result<Database> {
    let now = Utc::now().timestamp();
    let id: i64 = conn
        .query_row(
            "INSERT INTO db (creator_id, created_ts, instance_id, name)
             VALUES (?1, ?2, ?3, ?4)
             RETURNING id",
            params![create.creator_id, now, create.instance_id, create.name],
            |row| row.get(0),
        )
        .map_err(|e| {
            map_insert_error(e, "database", || {
                format!("{} on instance {}", create.name, create.instance_id)
            })
        })?;
    compose_database(conn, id)
}

/// Load a database joined with its instance and environment.
///
/// Returns `NotFound` when the database (or any link in the chain) is gone.
pub fn compose_database(conn: &Connection, database_id: i64) -> Result<Database> {
    let composed = conn.query_row(
        "SELECT d.id, d.instance_id, d.name,
                i.environment_id, i.name, i.host,
                e.name
         FROM db d
         JOIN instance i ON i.id = d.instance_id
         JOIN environment e ON e.id = i.environment_id
         WHERE d.id = ?1",
        params![database_id],
        |row| {
            let environment_id: i64 = row.get(3)?;
            Ok(Database {
                id: row.get(0)?,
                instance_id: row.get(1)?,
                name: row.get(2)?,
                instance: Instance {
                    id: row.get(1)?,
                    environment_id,
                    name: row.get(4)?,
                    host: row.get(5)?,
                    environment: Environment {
                        id: environment_id,
                        name: row.get(6)?,
                    },
                },
            })
        },
    );

    match composed {
        Ok(db) => Ok(db),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(StoreError::not_found(
            "database",
            format!("id {database_id}"),
        )),
        Err(e) => Err(StoreError::Database(e)),
    }
}

fn find_environment(conn: &Connection, environment_id: i64) -> Result<Environment> {
    match conn.query_row(
        "SELECT id, name FROM environment WHERE id = ?1",
        params![environment_id],
        |row| {
            Ok(Environment {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        },
    ) {
        Ok(env) => Ok(env),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(StoreError::not_found(
            "environment",
            format!("id {environment_id}"),
        )),
        Err(e) => Err(StoreError::Database(e)),
    }
}
