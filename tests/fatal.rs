//! Fatal paths terminate the process. Each test re-runs itself in a child
//! process with `HETSCHED_FATAL_CHILD` set; the child performs the fatal
//! call and the parent checks the exit status.

use std::process::Command;

use hetsched::fatal::POOL_CORRUPTED_EXIT;
use hetsched::pool::MetadataPool;

const CHILD_ENV: &str = "HETSCHED_FATAL_CHILD";

/// Run `test` in a child process and return its exit code.
fn run_child(test: &str) -> Option<i32> {
    let exe = std::env::current_exe().unwrap();
    let output = Command::new(exe)
        .args([test, "--exact", "--nocapture", "--test-threads=1"])
        .env(CHILD_ENV, test)
        .output()
        .unwrap();
    output.status.code()
}

fn in_child(test: &str) -> bool {
    std::env::var(CHILD_ENV).is_ok_and(|v| v == test)
}

#[test]
fn test_release_with_full_free_list_exits() {
    const NAME: &str = "test_release_with_full_free_list_exits";
    if in_child(NAME) {
        let pool = MetadataPool::new(4);
        pool.release_id(0);
        return;
    }
    assert_eq!(run_child(NAME), Some(POOL_CORRUPTED_EXIT));
}

#[test]
fn test_double_release_exits() {
    const NAME: &str = "test_double_release_exits";
    if in_child(NAME) {
        let pool = MetadataPool::new(4);
        let id = {
            let block = pool.allocate().unwrap();
            block.id()
        };
        pool.release_id(id);
        return;
    }
    assert_eq!(run_child(NAME), Some(POOL_CORRUPTED_EXIT));
}

#[test]
fn test_release_outside_pool_exits() {
    const NAME: &str = "test_release_outside_pool_exits";
    if in_child(NAME) {
        let pool = MetadataPool::new(2);
        let _held = pool.allocate().unwrap();
        pool.release_id(7);
        return;
    }
    assert_eq!(run_child(NAME), Some(POOL_CORRUPTED_EXIT));
}

#[test]
fn test_legal_release_does_not_exit() {
    const NAME: &str = "test_legal_release_does_not_exit";
    if in_child(NAME) {
        let pool = MetadataPool::new(2);
        drop(pool.allocate().unwrap());
        assert_eq!(pool.free_count(), 2);
        return;
    }
    assert_eq!(run_child(NAME), Some(0));
}
