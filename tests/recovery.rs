use std::fs::OpenOptions;
use std::io::Write;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rookery::{Error, MessageId, QueueEngine};
use tempfile::tempdir;

fn hour_from_now() -> SystemTime {
    SystemTime::now() + Duration::from_secs(3600)
}

#[test]
fn reopen_preserves_messages_and_order() {
    let dir = tempdir().expect("tempdir");
    let (a, b) = {
        let engine = QueueEngine::open(dir.path()).expect("open");
        let a = engine.enqueue("q", hour_from_now(), b"one").expect("enqueue");
        let b = engine.enqueue("q", hour_from_now(), b"two").expect("enqueue");
        (a, b)
    };

    let engine = QueueEngine::open(dir.path()).expect("reopen");
    let first = engine.dequeue(MessageId::MIN).expect("dequeue").expect("message");
    assert_eq!(first.id, a);
    assert_eq!(first.data, b"one");
    let second = engine.dequeue(first.id).expect("dequeue").expect("message");
    assert_eq!(second.id, b);
    assert_eq!(second.data, b"two");
}

#[test]
fn ids_keep_increasing_across_restarts() {
    let dir = tempdir().expect("tempdir");
    let before = {
        let engine = QueueEngine::open(dir.path()).expect("open");
        engine.enqueue("q", hour_from_now(), b"old").expect("enqueue")
    };

    let engine = QueueEngine::open(dir.path()).expect("reopen");
    let after = engine.enqueue("q", hour_from_now(), b"new").expect("enqueue");
    assert!(after > before);
}

#[test]
fn torn_tail_is_truncated_without_losing_prior_records() {
    let dir = tempdir().expect("tempdir");
    {
        let engine = QueueEngine::open(dir.path()).expect("open");
        engine.enqueue("q", hour_from_now(), b"good").expect("enqueue");
    }

    // Simulate a crash mid-append: garbage where the next header would be.
    let log_path = dir.path().join("messages.log");
    let mut file = OpenOptions::new()
        .append(true)
        .open(&log_path)
        .expect("open log");
    file.write_all(&[0xFF; 64]).expect("append garbage");
    drop(file);

    let engine = QueueEngine::open(dir.path()).expect("reopen");
    let msg = engine.dequeue(MessageId::MIN).expect("dequeue").expect("message");
    assert_eq!(msg.data, b"good");
    assert!(engine.dequeue(msg.id).expect("dequeue").is_none());

    // The torn bytes are gone: a fresh enqueue lands cleanly after reopen.
    engine.enqueue("q", hour_from_now(), b"after").expect("enqueue");
    let engine = QueueEngine::open(dir.path()).expect("reopen again");
    assert_eq!(engine.table().len().expect("len"), 2);
}

#[test]
fn short_partial_record_is_dropped() {
    let dir = tempdir().expect("tempdir");
    {
        let engine = QueueEngine::open(dir.path()).expect("open");
        engine.enqueue("q", hour_from_now(), b"keep").expect("enqueue");
    }

    let log_path = dir.path().join("messages.log");
    let mut file = OpenOptions::new()
        .append(true)
        .open(&log_path)
        .expect("open log");
    // Fewer bytes than a record header.
    file.write_all(&[0xAB; 10]).expect("append partial");
    drop(file);

    let engine = QueueEngine::open(dir.path()).expect("reopen");
    assert_eq!(engine.table().len().expect("len"), 1);
}

#[test]
fn purged_messages_stay_gone_after_reopen() {
    let dir = tempdir().expect("tempdir");
    {
        let engine = QueueEngine::open(dir.path()).expect("open");
        let stale = UNIX_EPOCH + Duration::from_secs(1);
        engine.enqueue("q", stale, b"stale").expect("enqueue");
        engine.enqueue("q", hour_from_now(), b"fresh").expect("enqueue");
        assert_eq!(engine.purge_expired().expect("purge"), 1);
    }

    let engine = QueueEngine::open(dir.path()).expect("reopen");
    assert_eq!(engine.table().len().expect("len"), 1);
    let msg = engine.dequeue(MessageId::MIN).expect("dequeue").expect("message");
    assert_eq!(msg.data, b"fresh");
}

#[test]
fn cursors_survive_restart() {
    let dir = tempdir().expect("tempdir");
    let first_id = {
        let engine = QueueEngine::open(dir.path()).expect("open");
        engine.enqueue("q", hour_from_now(), b"one").expect("enqueue");
        engine.enqueue("q", hour_from_now(), b"two").expect("enqueue");

        let mut cursor = engine.cursor("worker-1").expect("cursor");
        assert!(cursor.last_seen().is_min());
        let msg = engine
            .dequeue(cursor.last_seen())
            .expect("dequeue")
            .expect("message");
        cursor.advance(msg.id);
        cursor.commit().expect("commit");
        msg.id
    };

    let engine = QueueEngine::open(dir.path()).expect("reopen");
    let cursor = engine.cursor("worker-1").expect("cursor");
    assert_eq!(cursor.last_seen(), first_id);
    let msg = engine
        .dequeue(cursor.last_seen())
        .expect("dequeue")
        .expect("message");
    assert_eq!(msg.data, b"two");
}

#[test]
fn cursor_never_rewinds() {
    let dir = tempdir().expect("tempdir");
    let engine = QueueEngine::open(dir.path()).expect("open");
    let a = engine.enqueue("q", hour_from_now(), b"a").expect("enqueue");
    let b = engine.enqueue("q", hour_from_now(), b"b").expect("enqueue");

    let mut cursor = engine.cursor("worker").expect("cursor");
    cursor.advance(b);
    cursor.advance(a);
    assert_eq!(cursor.last_seen(), b);
}

#[test]
fn corrupt_cursor_metadata_is_an_error() {
    let dir = tempdir().expect("tempdir");
    let engine = QueueEngine::open(dir.path()).expect("open");
    engine.cursor("worker").expect("cursor").commit().expect("commit");

    let meta = dir.path().join("cursors").join("worker.meta");
    std::fs::write(&meta, [0u8; 3]).expect("truncate metadata");

    let err = engine.cursor("worker").expect_err("must fail");
    assert!(matches!(err, Error::Corrupt(_)));
}

#[test]
fn empty_cursor_name_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let engine = QueueEngine::open(dir.path()).expect("open");
    let err = engine.cursor("").expect_err("must fail");
    assert!(matches!(err, Error::InvalidArgument(_)));
}
