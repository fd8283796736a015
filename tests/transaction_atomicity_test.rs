mod common;

use serde_json::json;
use timelinedb::{CorrectEvent, Error, RescindEvent};

#[test]
fn failed_replay_leaves_no_rows() {
    let (_dir, path) = common::create_temp_db_file("atomic_replay.db");
    let ledger = common::open_ledger(&path);
    let ctx = common::ctx("acme");

    let err = ledger
        .submit(
            &ctx,
            common::update_assignment("evt-1", "acme", "asg-1", "2026-01-01", json!({"status": "active"})),
        )
        .unwrap_err();
    assert!(matches!(err, Error::InvalidEventSequence { .. }));

    let conn = common::open_read_only(&path);
    for table in ["events", "corrections", "rescinds", "entity_heads", "versions"] {
        assert_eq!(common::count_rows(&conn, table), 0, "{table} should be empty");
    }
}

#[test]
fn rule_violation_keeps_prior_versions() {
    let (_dir, path) = common::create_temp_db_file("atomic_rules.db");
    let ledger = common::open_ledger(&path);
    let ctx = common::ctx("acme");

    ledger
        .submit(
            &ctx,
            common::create_assignment(
                "evt-1",
                "acme",
                "asg-1",
                "2026-01-01",
                json!({"position_id": "p-1", "fte": 1.0}),
            ),
        )
        .unwrap();
    ledger
        .submit(
            &ctx,
            common::update_assignment("evt-2", "acme", "asg-1", "2026-03-01", json!({"fte": 0.5})),
        )
        .unwrap();
    let before = ledger
        .read_timeline(&ctx, &"acme".into(), &"asg-1".into())
        .unwrap();

    let err = ledger
        .submit(
            &ctx,
            common::update_assignment("evt-3", "acme", "asg-1", "2026-02-01", json!({"fte": 0})),
        )
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    // A correction whose replay fails is rolled back the same way.
    let err = ledger
        .correct(
            &ctx,
            CorrectEvent::new(
                "cor-1",
                "acme",
                "asg-1",
                common::date("2026-03-01"),
                common::payload(json!({"status": "retired"})),
            ),
        )
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let after = ledger
        .read_timeline(&ctx, &"acme".into(), &"asg-1".into())
        .unwrap();
    assert_eq!(before, after);

    let conn = common::open_read_only(&path);
    assert_eq!(common::count_rows(&conn, "events"), 2);
    assert_eq!(common::count_rows(&conn, "corrections"), 0);

    // The failed event id was never stored, so it can be used again.
    ledger
        .submit(
            &ctx,
            common::update_assignment("evt-3", "acme", "asg-1", "2026-02-01", json!({"fte": 0.8})),
        )
        .unwrap();
    ledger
        .rescind(
            &ctx,
            RescindEvent::new("res-1", "acme", "asg-1", common::date("2026-03-01"), common::payload(json!({}))),
        )
        .unwrap();
    assert_eq!(
        ledger
            .read_timeline(&ctx, &"acme".into(), &"asg-1".into())
            .unwrap()
            .len(),
        2
    );
}

#[test]
fn logs_reject_update_and_delete() {
    let (_dir, path) = common::create_temp_db_file("atomic_triggers.db");
    let ledger = common::open_ledger(&path);
    let ctx = common::ctx("acme");

    ledger
        .submit(
            &ctx,
            common::create_assignment("evt-1", "acme", "asg-1", "2026-01-01", json!({"position_id": "p-1"})),
        )
        .unwrap();
    ledger
        .submit(
            &ctx,
            common::update_assignment("evt-2", "acme", "asg-1", "2026-02-01", json!({"status": "leave"})),
        )
        .unwrap();
    ledger
        .correct(
            &ctx,
            CorrectEvent::new(
                "cor-1",
                "acme",
                "asg-1",
                common::date("2026-02-01"),
                common::payload(json!({"status": "inactive"})),
            ),
        )
        .unwrap();
    ledger
        .rescind(
            &ctx,
            RescindEvent::new("res-1", "acme", "asg-1", common::date("2026-02-01"), common::payload(json!({}))),
        )
        .unwrap();

    let conn = common::open_read_write(&path);
    let statements = [
        "UPDATE events SET payload = '{}' WHERE event_id = 'evt-1'",
        "DELETE FROM events WHERE event_id = 'evt-2'",
        "UPDATE corrections SET replacement_payload = '{}'",
        "DELETE FROM corrections",
        "UPDATE rescinds SET payload = '{\"x\":1}'",
        "DELETE FROM rescinds",
    ];
    for sql in statements {
        let err = conn.execute(sql, []).unwrap_err();
        assert!(err.to_string().contains("append-only"), "{sql}: {err}");
    }

    assert_eq!(common::count_rows(&conn, "events"), 2);
    assert_eq!(common::count_rows(&conn, "corrections"), 1);
    assert_eq!(common::count_rows(&conn, "rescinds"), 1);
}

#[test]
fn tampered_versions_are_detected_and_rebuilt() {
    let (_dir, path) = common::create_temp_db_file("atomic_tamper.db");
    let ledger = common::open_ledger(&path);
    let ctx = common::ctx("acme");

    ledger
        .submit(
            &ctx,
            common::create_assignment("evt-1", "acme", "asg-1", "2026-01-01", json!({"position_id": "p-1"})),
        )
        .unwrap();
    ledger
        .submit(
            &ctx,
            common::update_assignment("evt-2", "acme", "asg-1", "2026-02-01", json!({"status": "leave"})),
        )
        .unwrap();

    {
        let conn = common::open_read_write(&path);
        conn.execute("DELETE FROM versions WHERE seq_no = 2", []).unwrap();
    }
    assert!(!ledger.verify_versions(&ctx, &"acme".into(), &"asg-1".into()).unwrap());

    let rebuilt = ledger
        .rebuild_versions(&ctx, &"acme".into(), &"asg-1".into())
        .unwrap();
    assert_eq!(rebuilt.len(), 2);
    assert!(ledger.verify_versions(&ctx, &"acme".into(), &"asg-1".into()).unwrap());
}
