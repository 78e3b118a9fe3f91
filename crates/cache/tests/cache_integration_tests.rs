//! Integration tests for the page cache
//!
//! Exercises recovery, TTL sweeps, size eviction and the reader protection
//! window through the public `PageCache` API against a real directory tree.

mod common;

use chrono::{Duration, Utc};
use common::{
    MemoryArchive, assert_descriptors_match_disk, bytes_on_disk, cache_all_pages, open_cache,
    pages_on_disk,
};
use folio_cache::{FileId, MetadataDescriptor, NoProgress, StaticProgress};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn age_cache(root: &Path, id: &FileId, age: Duration) {
    let at = Utc::now() - age;
    fs::write(root.join(id.as_str()).join(".last_access"), at.to_rfc3339()).unwrap();
}

#[test]
fn recovery_rebuilds_deleted_descriptor() {
    let tmp = TempDir::new().unwrap();
    let archive = Arc::new(MemoryArchive::default());
    let id = {
        let cache = open_cache(tmp.path(), u64::MAX, 25, archive.clone(), Arc::new(NoProgress));
        cache_all_pages(&cache, &archive, "rebuild", &[100, 200, 300])
    };

    let dir = tmp.path().join(id.as_str());
    fs::remove_file(dir.join(".metadata.json")).unwrap();
    fs::remove_file(dir.join("0001.jpg")).unwrap();

    let cache = open_cache(tmp.path(), u64::MAX, 25, archive, Arc::new(NoProgress));
    assert_eq!(cache.init_report().rebuilt, 1);
    let entry = cache.entry(&id).unwrap();
    assert_eq!(entry.cached_size_bytes, 400);
    assert_eq!(entry.cached_size_bytes, bytes_on_disk(tmp.path(), &id));
    assert_eq!(cache.total_bytes(), 400);

    let desc = MetadataDescriptor::load(&dir).unwrap();
    assert!(desc.is_rebuilt());
    assert_eq!(desc.cached_size_bytes, desc.potential_size_bytes);
}

#[test]
fn corrupt_descriptor_is_rebuilt_not_fatal() {
    let tmp = TempDir::new().unwrap();
    let archive = Arc::new(MemoryArchive::default());
    let (good, bad) = {
        let cache = open_cache(tmp.path(), u64::MAX, 25, archive.clone(), Arc::new(NoProgress));
        (
            cache_all_pages(&cache, &archive, "good", &[10, 10]),
            cache_all_pages(&cache, &archive, "bad", &[5, 5, 5]),
        )
    };
    fs::write(
        tmp.path().join(bad.as_str()).join(".metadata.json"),
        b"{\"version\": 1, \"pages\": 7",
    )
    .unwrap();
    fs::create_dir_all(tmp.path().join("not a file id")).unwrap();

    let cache = open_cache(tmp.path(), u64::MAX, 25, archive, Arc::new(NoProgress));
    let report = cache.init_report();
    assert_eq!(report.loaded, 1);
    assert_eq!(report.rebuilt, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(cache.entry(&good).unwrap().cached_size_bytes, 20);
    assert_eq!(cache.entry(&bad).unwrap().cached_size_bytes, 15);
    assert_eq!(cache.total_bytes(), 35);
}

#[test]
fn rebuilt_cache_extracts_missing_pages_from_listing() {
    let tmp = TempDir::new().unwrap();
    let archive = Arc::new(MemoryArchive::default());
    let id = {
        let cache = open_cache(tmp.path(), u64::MAX, 25, archive.clone(), Arc::new(NoProgress));
        let id = cache_all_pages(&cache, &archive, "partial", &[10, 20, 30]);
        fs::remove_file(tmp.path().join("partial/0002.jpg")).unwrap();
        fs::remove_file(tmp.path().join("partial/.metadata.json")).unwrap();
        id
    };

    let cache = open_cache(tmp.path(), u64::MAX, 25, archive, Arc::new(NoProgress));
    assert_eq!(cache.total_bytes(), 30);

    cache
        .ensure_page_cached(Path::new("/library/partial.cbz"), &id, 2)
        .unwrap();
    let entry = cache.entry(&id).unwrap();
    assert!(!entry.descriptor.is_rebuilt());
    assert_eq!(entry.cached_size_bytes, 60);
    assert_eq!(entry.potential_size_bytes, 60);
    assert_descriptors_match_disk(tmp.path());
}

#[test]
fn ttl_sweep_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let archive = Arc::new(MemoryArchive::default());
    let (idle, active) = {
        let cache = open_cache(tmp.path(), u64::MAX, 25, archive.clone(), Arc::new(NoProgress));
        (
            cache_all_pages(&cache, &archive, "idle", &[100]),
            cache_all_pages(&cache, &archive, "active", &[100]),
        )
    };
    age_cache(tmp.path(), &idle, Duration::hours(2));

    let cache = open_cache(tmp.path(), u64::MAX, 25, archive, Arc::new(NoProgress));
    let first = cache.run_ttl_sweep(30);
    assert_eq!(first.caches_removed, 1);
    assert_eq!(first.errors, 0);
    assert!(cache.entry(&idle).is_none());
    assert!(cache.entry(&active).is_some());
    assert_eq!(cache.total_bytes(), 100);

    let second = cache.run_ttl_sweep(30);
    assert_eq!(second.caches_removed, 0);
    assert_eq!(second.bytes_freed, 0);
}

#[test]
fn touch_protects_from_ttl() {
    let tmp = TempDir::new().unwrap();
    let archive = Arc::new(MemoryArchive::default());
    let id = {
        let cache = open_cache(tmp.path(), u64::MAX, 25, archive.clone(), Arc::new(NoProgress));
        cache_all_pages(&cache, &archive, "reread", &[100])
    };
    age_cache(tmp.path(), &id, Duration::hours(2));

    let cache = open_cache(tmp.path(), u64::MAX, 25, archive, Arc::new(NoProgress));
    cache.touch_access(&id);
    assert_eq!(cache.run_ttl_sweep(30).caches_removed, 0);
    assert!(cache.entry(&id).is_some());
}

#[test]
fn clear_all_empties_ledger() {
    let tmp = TempDir::new().unwrap();
    let archive = Arc::new(MemoryArchive::default());
    let cache = open_cache(tmp.path(), u64::MAX, 25, archive.clone(), Arc::new(NoProgress));
    cache_all_pages(&cache, &archive, "a", &[10, 10]);
    cache_all_pages(&cache, &archive, "b", &[10]);

    let result = cache.clear_all();
    assert_eq!(result.caches_removed, 2);
    assert_eq!(cache.total_bytes(), 0);
    assert_eq!(cache.stats().total_caches, 0);
}

#[test]
fn scenario_protection_radius_covers_all_pages() {
    let tmp = TempDir::new().unwrap();
    let archive = Arc::new(MemoryArchive::default());
    let progress = Arc::new(StaticProgress::new());
    let cache = open_cache(tmp.path(), 500, 25, archive.clone(), progress.clone());
    let id = cache_all_pages(&cache, &archive, "three", &[100, 200, 300]);
    progress.set(id.clone(), 1);

    // the file alone exceeds the quota, but every page is next to the reader
    let result = cache.run_size_eviction();
    assert!(!result.skipped);
    assert_eq!(result.total_before, 600);
    assert_eq!(result.total_after, 600);
    assert_eq!(result.bytes_freed, 0);
    assert_eq!(result.pages_removed, 0);
    assert_eq!(result.caches_removed, 0);
    assert_eq!(result.errors, 0);
    assert_eq!(pages_on_disk(tmp.path(), &id), vec![0, 1, 2]);

    let trim = cache.trim_file_cache(&id, 250).unwrap();
    assert_eq!(trim.pages_removed, 0);
    assert_eq!(pages_on_disk(tmp.path(), &id), vec![0, 1, 2]);
    assert_descriptors_match_disk(tmp.path());
}

#[test]
fn scenario_radius_zero_eviction_covers_shortfall() {
    let tmp = TempDir::new().unwrap();
    let archive = Arc::new(MemoryArchive::default());
    let progress = Arc::new(StaticProgress::new());
    let cache = open_cache(tmp.path(), 350, 0, archive.clone(), progress.clone());
    let id = cache_all_pages(&cache, &archive, "three", &[100, 200, 300]);
    progress.set(id.clone(), 1);

    // 250 bytes over: page 0 is not enough on its own, page 2 follows
    let result = cache.run_size_eviction();
    assert_eq!(result.pages_removed, 2);
    assert_eq!(result.bytes_freed, 400);
    assert_eq!(result.caches_removed, 0);
    assert_eq!(pages_on_disk(tmp.path(), &id), vec![1]);
    assert_eq!(cache.total_bytes(), 200);
}

#[test]
fn unrecoverable_cache_is_skipped_and_siblings_load() {
    let tmp = TempDir::new().unwrap();
    let archive = Arc::new(MemoryArchive::default());
    let (good, broken) = {
        let cache = open_cache(tmp.path(), u64::MAX, 25, archive.clone(), Arc::new(NoProgress));
        (
            cache_all_pages(&cache, &archive, "good", &[10, 20]),
            cache_all_pages(&cache, &archive, "broken", &[5, 5]),
        )
    };
    // a directory where the sidecar belongs can be neither read nor replaced
    let sidecar = tmp.path().join(broken.as_str()).join(".metadata.json");
    fs::remove_file(&sidecar).unwrap();
    fs::create_dir(&sidecar).unwrap();

    let cache = open_cache(tmp.path(), u64::MAX, 25, archive, Arc::new(NoProgress));
    let report = cache.init_report();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.loaded, 1);
    assert_eq!(report.rebuilt, 0);
    assert!(cache.entry(&broken).is_none());
    assert_eq!(cache.entry(&good).unwrap().cached_size_bytes, 30);
    assert_eq!(cache.total_bytes(), 30);
    assert!(sidecar.is_dir());
}

#[test]
fn scenario_radius_zero_evicts_page_zero_then_two() {
    let tmp = TempDir::new().unwrap();
    let archive = Arc::new(MemoryArchive::default());
    let progress = Arc::new(StaticProgress::new());
    let cache = open_cache(tmp.path(), 500, 0, archive.clone(), progress.clone());
    let id = cache_all_pages(&cache, &archive, "three", &[100, 200, 300]);
    progress.set(id.clone(), 1);

    let after_first = cache.trim_file_cache(&id, 100).unwrap();
    assert_eq!(after_first.pages_removed, 1);
    assert_eq!(pages_on_disk(tmp.path(), &id), vec![1, 2]);

    let after_second = cache.trim_file_cache(&id, 150).unwrap();
    assert_eq!(after_second.bytes_freed, 300);
    assert_eq!(pages_on_disk(tmp.path(), &id), vec![1]);
    assert_eq!(cache.total_bytes(), 200);
    assert_descriptors_match_disk(tmp.path());
}

#[test]
fn eviction_spares_reader_window_and_prefers_lru() {
    let tmp = TempDir::new().unwrap();
    let archive = Arc::new(MemoryArchive::default());
    let progress = Arc::new(StaticProgress::new());
    let cache = open_cache(tmp.path(), 6_500, 25, archive.clone(), progress.clone());

    let old = cache_all_pages(&cache, &archive, "old", &[100; 60]);
    let recent = cache_all_pages(&cache, &archive, "recent", &[100; 10]);
    progress.set(old.clone(), 30);
    assert_eq!(cache.total_bytes(), 7_000);

    // "old" was last touched first, so it pays for the overage
    let result = cache.run_size_eviction();
    assert!(!result.skipped);
    assert!(result.total_after <= 6_500);
    assert_eq!(result.pages_removed, 5);
    assert_eq!(pages_on_disk(tmp.path(), &recent).len(), 10);

    let remaining = pages_on_disk(tmp.path(), &old);
    for page in 5..=55 {
        assert!(remaining.contains(&page), "protected page {page} was evicted");
    }
    // furthest pages went first
    assert!(!remaining.contains(&0));
    assert!(!remaining.contains(&59));
    assert_descriptors_match_disk(tmp.path());
}

#[test]
fn eviction_moves_on_when_a_file_is_fully_protected() {
    let tmp = TempDir::new().unwrap();
    let archive = Arc::new(MemoryArchive::default());
    let cache = open_cache(tmp.path(), 1_000, 25, archive.clone(), Arc::new(NoProgress));

    // all 5 pages of "small" sit inside the window around page 0
    let small = cache_all_pages(&cache, &archive, "small", &[100; 5]);
    let large = cache_all_pages(&cache, &archive, "large", &[10; 60]);
    assert_eq!(cache.total_bytes(), 1_100);

    let result = cache.run_size_eviction();
    assert!(result.total_after <= 1_000);
    assert_eq!(pages_on_disk(tmp.path(), &small).len(), 5);
    assert!(pages_on_disk(tmp.path(), &large).len() < 60);
}

#[test]
fn ledger_matches_independent_rescan() {
    let tmp = TempDir::new().unwrap();
    let archive = Arc::new(MemoryArchive::default());
    let cache = open_cache(tmp.path(), 2_500, 3, archive.clone(), Arc::new(NoProgress));

    let ids: Vec<FileId> = (0..5)
        .map(|i| cache_all_pages(&cache, &archive, &format!("f{i}"), &[50; 12]))
        .collect();
    cache.run_size_eviction();
    cache.invalidate(&ids[4]).unwrap();
    cache.touch_access(&ids[0]);

    assert_eq!(cache.total_bytes(), cache.index().recomputed_total());
    let on_disk: u64 = ids.iter().map(|id| bytes_on_disk(tmp.path(), id)).sum();
    assert_eq!(cache.total_bytes(), on_disk);

    let reopened = open_cache(tmp.path(), 2_500, 3, archive, Arc::new(NoProgress));
    assert_eq!(reopened.total_bytes(), cache.total_bytes());
    assert_descriptors_match_disk(tmp.path());
}

#[test]
fn concurrent_reads_and_evictions_keep_ledger_consistent() {
    let tmp = TempDir::new().unwrap();
    let archive = Arc::new(MemoryArchive::default());
    let cache = Arc::new(open_cache(
        tmp.path(),
        3_000,
        2,
        archive.clone(),
        Arc::new(NoProgress),
    ));
    for i in 0..4 {
        archive.add(format!("/library/c{i}.cbz"), &[100; 20]);
    }

    let readers: Vec<_> = (0..4)
        .map(|i| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                let id = FileId::new(format!("c{i}")).unwrap();
                let path = format!("/library/c{i}.cbz");
                for page in 0..20 {
                    cache
                        .ensure_page_cached(Path::new(&path), &id, page)
                        .unwrap();
                    cache.touch_access(&id);
                }
            })
        })
        .collect();
    let evictor = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
            for _ in 0..20 {
                cache.run_size_eviction();
            }
        })
    };
    for handle in readers {
        handle.join().unwrap();
    }
    evictor.join().unwrap();

    assert_eq!(cache.total_bytes(), cache.index().recomputed_total());
    drop(cache);

    // descriptor writes are last-writer-wins; a reopen settles on what is on disk
    let reopened = open_cache(tmp.path(), 3_000, 2, archive, Arc::new(NoProgress));
    assert_descriptors_match_disk(tmp.path());
    let on_disk: u64 = (0..4)
        .map(|i| bytes_on_disk(tmp.path(), &FileId::new(format!("c{i}")).unwrap()))
        .sum();
    assert_eq!(reopened.total_bytes(), on_disk);

    let result = reopened.run_size_eviction();
    assert!(result.total_after <= 3_000);
    assert_descriptors_match_disk(tmp.path());
}
