// src/scheduler/select.rs

//! Candidate selection
//!
//! Pure functions over loaded rows, so the scheduling rules can be tested
//! without a database.

use crate::db::models::{Image, ImageStatus, Package, PackageStatus};
use std::collections::HashMap;

/// A package may be built once all of its dependencies are built or published
pub fn depends_ready(dependency_statuses: &[PackageStatus]) -> bool {
    dependency_statuses.iter().all(|status| status.is_done())
}

/// A failed build is retried while it stays below the retry ceiling
pub fn retry_eligible(retry_count: i64, retry_max: i64) -> bool {
    retry_count < retry_max
}

/// Next package to build
///
/// Failed packages with retries left come first, then queued ones; both
/// only when every dependency is done. Within a group the input order
/// (oldest first) is kept.
pub fn pick_next_package<'a>(
    candidates: &'a [Package],
    dependency_statuses: &HashMap<i64, Vec<PackageStatus>>,
    retry_max: i64,
) -> Option<&'a Package> {
    let ready = |package: &&Package| {
        package
            .id
            .and_then(|id| dependency_statuses.get(&id))
            .is_none_or(|statuses| depends_ready(statuses))
    };

    candidates
        .iter()
        .filter(|p| p.status == PackageStatus::Failed && retry_eligible(p.retry_count, retry_max))
        .find(ready)
        .or_else(|| {
            candidates
                .iter()
                .filter(|p| p.status == PackageStatus::Queued)
                .find(ready)
        })
}

/// Next image to build: failed with retries left first, then queued
pub fn pick_next_image(candidates: &[Image], retry_max: i64) -> Option<&Image> {
    candidates
        .iter()
        .find(|i| i.status == ImageStatus::Failed && retry_eligible(i.retry_count, retry_max))
        .or_else(|| candidates.iter().find(|i| i.status == ImageStatus::Queued))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn package(id: i64, pkgname: &str, status: PackageStatus, retry_count: i64) -> Package {
        let mut package = Package::new("x86_64", "master", pkgname, "1-r0");
        package.id = Some(id);
        package.status = status;
        package.retry_count = retry_count;
        package
    }

    #[test]
    fn test_depends_ready() {
        assert!(depends_ready(&[]));
        assert!(depends_ready(&[PackageStatus::Built, PackageStatus::Published]));
        assert!(!depends_ready(&[PackageStatus::Built, PackageStatus::Queued]));
        assert!(!depends_ready(&[PackageStatus::Failed]));
        assert!(!depends_ready(&[PackageStatus::Building]));
    }

    #[test]
    fn test_failed_before_queued() {
        let candidates = vec![
            package(1, "queued", PackageStatus::Queued, 0),
            package(2, "failed", PackageStatus::Failed, 1),
        ];
        let picked = pick_next_package(&candidates, &HashMap::new(), 5).unwrap();
        assert_eq!(picked.pkgname, "failed");
    }

    #[test]
    fn test_retry_ceiling_excludes() {
        let candidates = vec![package(1, "failed", PackageStatus::Failed, 5)];
        assert!(pick_next_package(&candidates, &HashMap::new(), 5).is_none());

        let candidates = vec![
            package(1, "failed", PackageStatus::Failed, 7),
            package(2, "queued", PackageStatus::Queued, 0),
        ];
        let picked = pick_next_package(&candidates, &HashMap::new(), 5).unwrap();
        assert_eq!(picked.pkgname, "queued");
    }

    #[test]
    fn test_waits_for_dependencies() {
        let candidates = vec![
            package(1, "hello-world-wrapper", PackageStatus::Queued, 0),
            package(2, "hello-world", PackageStatus::Queued, 0),
        ];
        let mut deps = HashMap::new();
        deps.insert(1, vec![PackageStatus::Queued]);

        let picked = pick_next_package(&candidates, &deps, 5).unwrap();
        assert_eq!(picked.pkgname, "hello-world");

        deps.insert(1, vec![PackageStatus::Built]);
        let picked = pick_next_package(&candidates, &deps, 5).unwrap();
        assert_eq!(picked.pkgname, "hello-world-wrapper");
    }

    #[test]
    fn test_pick_next_image() {
        let mut queued = Image::new("qemu-amd64", "master", "console");
        queued.status = ImageStatus::Queued;
        let mut failed = Image::new("qemu-amd64", "master", "phosh");
        failed.status = ImageStatus::Failed;
        failed.retry_count = 1;

        let candidates = vec![queued.clone(), failed.clone()];
        assert_eq!(pick_next_image(&candidates, 5).unwrap().ui, "phosh");
        assert_eq!(pick_next_image(&candidates, 1).unwrap().ui, "console");

        failed.retry_count = 5;
        assert!(pick_next_image(&[failed], 5).is_none());
    }
}
