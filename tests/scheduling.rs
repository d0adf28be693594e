// tests/scheduling.rs

//! Build pass scenarios: ordering, publishing, retries and the gates that
//! keep a pass from starting work.

mod common;

use buildfarm::db::models::{LogEntry, PackageStatus, RepoBootstrap, RepoBootstrapStatus};
use buildfarm::repo::{RepoKind, artifact, index, staging};
use buildfarm::{Error, PassOptions};
use common::{TestFarm, add_package, write_artifact};
use rusqlite::params;
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn listing(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn test_hello_world_end_to_end() {
    let t = TestFarm::new();
    {
        let conn = t.conn();
        add_package(&conn, "x86_64", "master", "hello-world", "1-r4", &[]);
        add_package(
            &conn,
            "x86_64",
            "master",
            "hello-world-wrapper",
            "1-r2",
            &["hello-world"],
        );
    }

    // the wrapper waits for its dependency
    let summary = t.farm.build().unwrap();
    assert_eq!(summary.started, vec!["master/x86_64/hello-world"]);
    assert_eq!(
        t.package("x86_64", "master", "hello-world-wrapper").status,
        PackageStatus::Queued
    );

    t.finish_package("x86_64", "master", "hello-world").unwrap();
    assert_eq!(
        t.package("x86_64", "master", "hello-world").status,
        PackageStatus::Built
    );
    assert_eq!(
        t.package("x86_64", "master", "hello-world-wrapper").status,
        PackageStatus::Building
    );
    let wip = t.farm.layout().path(RepoKind::Wip, Some("x86_64"), "master", None);
    assert!(wip.join("hello-world-1-r4.apk").exists());
    assert!(wip.join(index::INDEX_NAME).exists());

    // the last package built publishes the repo
    t.finish_package("x86_64", "master", "hello-world-wrapper").unwrap();
    assert_eq!(t.jobs.named("sign_index").len(), 1);
    let symlink_dir = t
        .farm
        .layout()
        .path(RepoKind::Symlink, Some("x86_64"), "master", None);
    assert_eq!(
        listing(&symlink_dir),
        vec![
            index::INDEX_NAME.to_string(),
            "hello-world-1-r4.apk".to_string(),
            "hello-world-wrapper-1-r2.apk".to_string(),
        ]
    );

    t.finish_signing("x86_64", "master", None).unwrap();
    for pkgname in ["hello-world", "hello-world-wrapper"] {
        assert_eq!(
            t.package("x86_64", "master", pkgname).status,
            PackageStatus::Published
        );
    }

    let final_dir = t.farm.layout().path(RepoKind::Final, Some("x86_64"), "master", None);
    assert!(final_dir.join("hello-world-1-r4.apk").is_file());
    assert!(final_dir.join("hello-world-wrapper-1-r2.apk").is_file());
    let entries = index::read_index(&final_dir.join(index::INDEX_NAME)).unwrap();
    assert_eq!(entries.len(), 2);
    assert!(artifact::list(&wip).unwrap().is_empty());

    // nothing left to do
    assert_eq!(t.jobs.named("build_package").len(), 2);
    assert_eq!(t.jobs.named("sign_index").len(), 1);
    let summary = t.farm.build().unwrap();
    assert_eq!(summary.jobs_started(), 0);
    assert!(summary.published.is_empty());
}

#[test]
fn test_symlink_repo_is_reproducible() {
    let t = TestFarm::new();
    {
        let conn = t.conn();
        add_package(&conn, "x86_64", "master", "hello-world", "1-r4", &[]);
        add_package(&conn, "x86_64", "master", "hello-world-wrapper", "1-r2", &[]);
    }
    write_artifact(&t.farm, RepoKind::Wip, "x86_64", "master", "hello-world", "1-r4");
    write_artifact(&t.farm, RepoKind::Wip, "x86_64", "master", "hello-world-wrapper", "1-r2");

    let symlink_dir = t
        .farm
        .layout()
        .path(RepoKind::Symlink, Some("x86_64"), "master", None);

    // both packages are found in the WIP repo, so the first pass publishes
    let summary = t.farm.build().unwrap();
    assert!(summary.started.is_empty());
    assert_eq!(summary.published, vec!["master/x86_64"]);
    let first_listing = listing(&symlink_dir);
    let first_index = fs::read(symlink_dir.join(index::INDEX_NAME)).unwrap();

    let summary = t.farm.build().unwrap();
    assert_eq!(summary.published, vec!["master/x86_64"]);
    assert_eq!(listing(&symlink_dir), first_listing);
    assert_eq!(fs::read(symlink_dir.join(index::INDEX_NAME)).unwrap(), first_index);
}

#[test]
fn test_no_repo_update_keeps_wip() {
    let t = TestFarm::new();
    add_package(&t.conn(), "x86_64", "master", "hello-world", "1-r4", &[]);
    write_artifact(&t.farm, RepoKind::Wip, "x86_64", "master", "hello-world", "1-r4");

    let summary = t.farm.build_with(&PassOptions::no_repo_update()).unwrap();
    assert!(summary.published.is_empty());
    assert!(t.jobs.named("sign_index").is_empty());
    assert_eq!(
        t.package("x86_64", "master", "hello-world").status,
        PackageStatus::Built
    );
}

#[test]
fn test_force_repo_update_publishes_empty_wip() {
    let t = TestFarm::new();
    let options = PassOptions {
        force_repo_update_branch: Some("master".to_string()),
        ..PassOptions::default()
    };

    let summary = t.farm.build_with(&options).unwrap();
    assert_eq!(summary.published, vec!["master/x86_64"]);
    assert_eq!(t.jobs.named("sign_index").len(), 1);
}

#[test]
fn test_retry_ceiling() {
    let t = TestFarm::new();
    {
        let conn = t.conn();
        for (pkgname, retries) in [("exhausted", 5), ("retry-left", 4)] {
            let mut package = add_package(&conn, "x86_64", "master", pkgname, "1-r0", &[]);
            package
                .set_status_and_job(&conn, PackageStatus::Building, Some(100))
                .unwrap();
            package.set_status(&conn, PackageStatus::Failed).unwrap();
            conn.execute(
                "UPDATE packages SET retry_count = ?1 WHERE id = ?2",
                params![retries, package.id],
            )
            .unwrap();
        }
    }

    let summary = t.farm.build().unwrap();
    assert_eq!(summary.started, vec!["master/x86_64/retry-left"]);

    let retried = t.package("x86_64", "master", "retry-left");
    assert_eq!(retried.status, PackageStatus::Building);
    assert_eq!(retried.retry_count, 5);

    let exhausted = t.package("x86_64", "master", "exhausted");
    assert_eq!(exhausted.status, PackageStatus::Failed);
    assert_eq!(exhausted.retry_count, 5);

    // the retried build fails again: nothing can start any more
    let (job_id, _) = t.jobs.named("build_package").pop().unwrap();
    t.jobs.set_status(job_id, buildfarm::JobStatus::Failed);
    buildfarm::jobs::reconcile(&t.farm).unwrap();

    let summary = t.farm.build().unwrap();
    assert!(summary.started.is_empty());
    assert_eq!(summary.stuck, vec!["master/x86_64"]);
    assert_eq!(t.jobs.named("build_package").len(), 1);
}

#[test]
fn test_failed_bootstrap_blocks_packages() {
    let t = TestFarm::new();
    {
        let conn = t.conn();
        add_package(&conn, "x86_64", "master", "hello-world", "1-r4", &[]);

        let mut rb = RepoBootstrap::new("x86_64", "master", "systemd");
        rb.insert(&conn).unwrap();
        rb.set_status_and_job(&conn, RepoBootstrapStatus::Building, Some(7))
            .unwrap();
        rb.set_status(&conn, RepoBootstrapStatus::Failed).unwrap();
        conn.execute(
            "UPDATE repo_bootstraps SET retry_count = 5 WHERE id = ?1",
            [rb.id.unwrap()],
        )
        .unwrap();
    }

    let summary = t.farm.build().unwrap();
    assert_eq!(summary.jobs_started(), 0);
    assert!(t.jobs.submitted().is_empty());
    assert_eq!(
        t.package("x86_64", "master", "hello-world").status,
        PackageStatus::Queued
    );
}

#[test]
fn test_queued_bootstrap_starts_first() {
    let t = TestFarm::new();
    {
        let conn = t.conn();
        add_package(&conn, "x86_64", "master", "hello-world", "1-r4", &[]);
        RepoBootstrap::new("x86_64", "master", "systemd")
            .insert(&conn)
            .unwrap();
    }

    let summary = t.farm.build().unwrap();
    assert_eq!(summary.bootstraps_started, vec!["master/systemd/x86_64"]);
    assert!(summary.started.is_empty());
    assert_eq!(t.jobs.names(), vec!["repo_bootstrap"]);
}

#[test]
fn test_staging_waits_for_origin() {
    let t = TestFarm::new();
    let staging_branch = staging::join("master", "test");
    {
        let conn = t.conn();
        assert!(staging::init(&t.farm, &conn, &staging_branch).unwrap());
        add_package(&conn, "x86_64", "master", "hello-world", "1-r4", &[]);
        add_package(&conn, "x86_64", &staging_branch, "hello-world", "1-r4", &[]);
    }

    let summary = t.farm.build().unwrap();
    assert_eq!(summary.started, vec!["master/x86_64/hello-world"]);
    assert_eq!(
        t.package("x86_64", &staging_branch, "hello-world").status,
        PackageStatus::Queued
    );

    // once the origin is published, its artifact is taken over
    {
        let conn = t.conn();
        let mut origin = t.package("x86_64", "master", "hello-world");
        origin.set_status(&conn, PackageStatus::Built).unwrap();
        origin.set_status(&conn, PackageStatus::Published).unwrap();
    }
    write_artifact(&t.farm, RepoKind::Final, "x86_64", "master", "hello-world", "1-r4");

    let summary = t.farm.build().unwrap();
    assert!(summary.started.is_empty());
    assert_eq!(summary.published, vec![format!("{staging_branch}/x86_64")]);

    let synced = t.package("x86_64", &staging_branch, "hello-world");
    assert_eq!(synced.status, PackageStatus::Built);
    assert_eq!(synced.job_id, None);
    let staging_wip = t
        .farm
        .layout()
        .path(RepoKind::Wip, Some("x86_64"), &staging_branch, None);
    assert!(staging_wip.join("hello-world-1-r4.apk").exists());
}

#[test]
fn test_native_arch_first() {
    let t = TestFarm::with_config(|config| {
        config.branches[0].arches = vec!["x86_64".to_string(), "aarch64".to_string()];
    });
    {
        let conn = t.conn();
        add_package(&conn, "x86_64", "master", "gcc-aarch64", "13-r0", &[]);
        add_package(&conn, "aarch64", "master", "hello-world", "1-r4", &[]);
    }

    let summary = t.farm.build().unwrap();
    assert_eq!(summary.started, vec!["master/x86_64/gcc-aarch64"]);
}

#[test]
fn test_parallel_job_budget() {
    let t = TestFarm::with_config(|config| config.scheduler.max_parallel_build_jobs = 2);
    {
        let conn = t.conn();
        for pkgname in ["a", "b", "c"] {
            add_package(&conn, "x86_64", "master", pkgname, "1-r0", &[]);
        }
    }

    let summary = t.farm.build().unwrap();
    assert_eq!(summary.started, vec!["master/x86_64/a", "master/x86_64/b"]);

    // a full budget starts nothing
    let summary = t.farm.build().unwrap();
    assert_eq!(summary.jobs_started(), 0);
}

#[test]
fn test_full_budget_is_not_stuck() {
    let t = TestFarm::with_config(|config| config.scheduler.max_parallel_build_jobs = 1);
    {
        let conn = t.conn();
        add_package(&conn, "x86_64", "master", "a", "1-r0", &[]);
        add_package(&conn, "x86_64", "master", "b", "1-r0", &[]);
    }

    let first = t.farm.build().unwrap();
    assert_eq!(first.started, vec!["master/x86_64/a"]);
    assert!(first.stuck.is_empty());

    // b is buildable, only waiting for a slot
    let second = t.farm.build().unwrap();
    assert!(second.started.is_empty());
    assert!(second.stuck.is_empty());
    assert!(second.published.is_empty());
}

#[test]
fn test_artifact_in_wip_skips_the_job() {
    let t = TestFarm::with_config(|config| config.scheduler.max_parallel_build_jobs = 1);
    {
        let conn = t.conn();
        add_package(&conn, "x86_64", "master", "hello-world", "1-r4", &[]);
        add_package(&conn, "x86_64", "master", "other", "1-r0", &[]);
    }
    write_artifact(&t.farm, RepoKind::Wip, "x86_64", "master", "hello-world", "1-r4");

    let summary = t.farm.build_with(&PassOptions::no_repo_update()).unwrap();
    assert_eq!(
        t.package("x86_64", "master", "hello-world").status,
        PackageStatus::Built
    );
    assert_eq!(
        LogEntry::list_by_action(&t.conn(), "package_exists_in_wip_repo")
            .unwrap()
            .len(),
        1
    );

    // no slot was used, so the next package still got the only one
    assert_eq!(summary.started, vec!["master/x86_64/other"]);
    let build_jobs = t.jobs.named("build_package");
    assert_eq!(build_jobs.len(), 1);
    assert_eq!(t.package("x86_64", "master", "other").job_id, Some(build_jobs[0].0));
}

#[test]
fn test_artifact_in_wip_starts_nothing() {
    let t = TestFarm::new();
    add_package(&t.conn(), "x86_64", "master", "hello-world", "1-r4", &[]);
    write_artifact(&t.farm, RepoKind::Wip, "x86_64", "master", "hello-world", "1-r4");

    let summary = t.farm.build_with(&PassOptions::no_repo_update()).unwrap();
    assert!(summary.started.is_empty());
    assert!(t.jobs.named("build_package").is_empty());
    assert_eq!(
        t.package("x86_64", "master", "hello-world").status,
        PackageStatus::Built
    );
}

#[test]
fn test_built_bootstrap_published_without_repo_update() {
    let t = TestFarm::new();
    {
        let conn = t.conn();
        add_package(&conn, "x86_64", "master", "hello-world", "1-r4", &[]);

        let mut rb = RepoBootstrap::new("x86_64", "master", "systemd");
        rb.insert(&conn).unwrap();
        rb.set_status_and_job(&conn, RepoBootstrapStatus::Building, Some(7))
            .unwrap();
        rb.set_status(&conn, RepoBootstrapStatus::Built).unwrap();
    }

    let summary = t.farm.build_with(&PassOptions::no_repo_update()).unwrap();
    assert_eq!(summary.published, vec!["master:systemd/x86_64"]);
    assert_eq!(t.jobs.names(), vec!["sign_index"]);
    assert_eq!(
        t.package("x86_64", "master", "hello-world").status,
        PackageStatus::Queued
    );
}

#[test]
fn test_concurrent_passes_are_serialized() {
    let t = TestFarm::new();
    {
        let conn = t.conn();
        for pkgname in ["a", "b", "c", "d"] {
            add_package(&conn, "x86_64", "master", pkgname, "1-r0", &[]);
        }
    }
    t.jobs.set_delay(Duration::from_millis(20));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let farm = Arc::clone(&t.farm);
            thread::spawn(move || farm.build().unwrap())
        })
        .collect();
    let started: usize = handles
        .into_iter()
        .map(|h| h.join().unwrap().started.len())
        .sum();

    assert_eq!(started, 4);
    assert_eq!(t.jobs.named("build_package").len(), 4);
    assert_eq!(t.jobs.max_in_flight(), 1);
    assert_eq!(t.farm.passes(), 4);
    for pkgname in ["a", "b", "c", "d"] {
        assert_eq!(
            t.package("x86_64", "master", pkgname).status,
            PackageStatus::Building
        );
    }
}

#[test]
fn test_rate_limit_stops_the_pass() {
    let t = TestFarm::new();
    {
        let conn = t.conn();
        add_package(&conn, "x86_64", "master", "hello-world", "1-r4", &[]);
        for _ in 0..10 {
            LogEntry {
                arch: Some("x86_64".to_string()),
                branch: Some("master".to_string()),
                pkgname: Some("hello-world".to_string()),
                version: Some("1-r4".to_string()),
                ..LogEntry::new("job_build_package")
            }
            .record(&conn)
            .unwrap();
        }
    }

    let err = t.farm.build().unwrap_err();
    assert!(matches!(err, Error::RateLimitTripped(_)));
    assert!(err.is_fatal());
    assert!(t.jobs.submitted().is_empty());
    assert_eq!(
        LogEntry::list_by_action(&t.conn(), "bug_found_shutting_down")
            .unwrap()
            .len(),
        1
    );
    assert_eq!(
        t.package("x86_64", "master", "hello-world").status,
        PackageStatus::Queued
    );
}

#[test]
fn test_staging_branch_lifecycle() {
    let t = TestFarm::new();
    let branch = staging::join("master", "test");
    let conn = t.conn();

    assert!(staging::init(&t.farm, &conn, &branch).unwrap());
    assert!(!staging::init(&t.farm, &conn, &branch).unwrap());
    add_package(&conn, "x86_64", &branch, "hello-world", "1-r4", &[]);
    write_artifact(&t.farm, RepoKind::Wip, "x86_64", &branch, "hello-world", "1-r4");
    assert!(staging::discover(&t.farm).unwrap().iter().any(|b| b.name == branch));

    assert!(staging::remove(&t.farm, &conn, &branch).unwrap());
    assert!(!staging::discover(&t.farm).unwrap().iter().any(|b| b.name == branch));
    assert!(
        buildfarm::db::models::Package::list_arch_branch(&conn, "x86_64", &branch)
            .unwrap()
            .is_empty()
    );
    let layout = t.farm.layout();
    assert!(!layout.staging_name_dir(RepoKind::Final, "test").exists());
    assert!(!layout.staging_name_dir(RepoKind::Wip, "test").exists());

    // configured branches are never removed
    assert!(!staging::remove(&t.farm, &conn, "master").unwrap());
}
