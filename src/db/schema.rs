// src/db/schema.rs

//! Database schema definitions and migrations
//!
//! This module defines the SQLite schema for the build state tables and
//! provides a migration system to evolve the schema over time.

use crate::error::Result;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    info!("Schema migration complete. Now at version {}", SCHEMA_VERSION);
    Ok(())
}

fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        _ => panic!("Unknown migration version: {}", version),
    }
}

/// Initial schema - Version 1
///
/// - packages: one live row per (pkgname, arch, branch, splitrepo)
/// - package_dependencies: edges from a package to the packages it needs
/// - images: image builds, completed rows are kept as history
/// - repo_bootstraps: one-shot seeding builds for splitrepos
/// - log: append-only audit trail
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        CREATE TABLE packages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            arch TEXT NOT NULL,
            branch TEXT NOT NULL,
            pkgname TEXT NOT NULL,
            version TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'queued'
                CHECK(status IN ('queued', 'building', 'built', 'published', 'failed')),
            job_id INTEGER,
            retry_count INTEGER NOT NULL DEFAULT 0,
            splitrepo TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE UNIQUE INDEX idx_packages_identity
            ON packages(pkgname, arch, branch, IFNULL(splitrepo, ''));
        CREATE INDEX idx_packages_arch_branch ON packages(arch, branch);
        CREATE INDEX idx_packages_status ON packages(status);

        CREATE TABLE package_dependencies (
            package_id INTEGER NOT NULL,
            dependency_id INTEGER NOT NULL,
            PRIMARY KEY (package_id, dependency_id),
            FOREIGN KEY (package_id) REFERENCES packages(id) ON DELETE CASCADE,
            FOREIGN KEY (dependency_id) REFERENCES packages(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_package_dependencies_dependency
            ON package_dependencies(dependency_id);

        CREATE TABLE images (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device TEXT NOT NULL,
            branch TEXT NOT NULL,
            ui TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'queued'
                CHECK(status IN ('queued', 'building', 'published', 'failed')),
            job_id INTEGER,
            dir_name TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            date TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE INDEX idx_images_target ON images(device, branch, ui);
        CREATE INDEX idx_images_status ON images(status);

        CREATE TABLE repo_bootstraps (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            arch TEXT NOT NULL,
            branch TEXT NOT NULL,
            splitrepo TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'queued'
                CHECK(status IN ('queued', 'building', 'built', 'published', 'failed')),
            job_id INTEGER,
            retry_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(arch, branch, splitrepo)
        );

        CREATE TABLE log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            date TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            action TEXT NOT NULL,
            payload TEXT,
            arch TEXT,
            branch TEXT,
            pkgname TEXT,
            version TEXT,
            job_id INTEGER,
            retry_count INTEGER,
            device TEXT,
            ui TEXT,
            dir_name TEXT,
            splitrepo TEXT,
            depend_pkgname TEXT,
            count INTEGER
        );

        CREATE INDEX idx_log_action ON log(action);
        ",
    )?;

    Ok(())
}
