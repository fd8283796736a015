mod common;

use serde_json::json;
use timelinedb::{CorrectEvent, EntityKind, EntityRef, Error, RescindEvent, SubmitEvent};

#[test]
fn identical_resubmission_returns_stored_record() {
    let (_dir, path) = common::create_temp_db_file("idem_same.db");
    let ledger = common::open_ledger(&path);
    let ctx = common::ctx("acme");

    let cmd = common::create_assignment(
        "evt-1",
        "acme",
        "asg-1",
        "2026-01-01",
        json!({"position_id": "p-1", "status": "active"}),
    );
    let first = ledger.submit(&ctx, cmd.clone()).unwrap();
    let second = ledger.submit(&ctx, cmd).unwrap();

    assert_eq!(first, second);
    let conn = common::open_read_only(&path);
    assert_eq!(common::count_rows(&conn, "events"), 1);
    assert_eq!(common::count_rows(&conn, "versions"), 1);
}

#[test]
fn key_order_does_not_break_idempotency() {
    let ledger = common::memory_ledger();
    let ctx = common::ctx("acme");

    let a = common::create_assignment(
        "evt-1",
        "acme",
        "asg-1",
        "2026-01-01",
        json!({"position_id": "p-1", "status": "active"}),
    );
    let mut b = a.clone();
    b.payload = timelinedb::Payload::parse(r#"{ "status": "active", "position_id": "p-1" }"#).unwrap();

    let first = ledger.submit(&ctx, a).unwrap();
    let second = ledger.submit(&ctx, b).unwrap();
    assert_eq!(first.global_pos, second.global_pos);
}

#[test]
fn reused_event_id_with_changed_field_is_rejected() {
    let (_dir, path) = common::create_temp_db_file("idem_changed.db");
    let ledger = common::open_ledger(&path);
    let ctx = common::ctx("acme");

    let original = common::create_assignment(
        "evt-1",
        "acme",
        "asg-1",
        "2026-01-01",
        json!({"position_id": "p-1"}),
    );
    let stored = ledger.submit(&ctx, original.clone()).unwrap();

    let mut changed_payload = original.clone();
    changed_payload.payload = common::payload(json!({"position_id": "p-2"}));
    let mut changed_date = original.clone();
    changed_date.effective_date = common::date("2026-01-02");
    let changed_initiator = original.clone().with_ids("evt-1", "someone-else");

    for cmd in [changed_payload, changed_date, changed_initiator] {
        let err = ledger.submit(&ctx, cmd).unwrap_err();
        assert!(
            matches!(err, Error::ReusedIdempotencyKey { ref key } if key == "evt-1"),
            "unexpected error: {err}"
        );
    }

    let history = ledger
        .audit_history(&ctx, &"acme".into(), &"asg-1".into(), None)
        .unwrap();
    assert_eq!(history.len(), 1);
    assert!(matches!(&history[0], timelinedb::AuditEntry::Event(e) if *e == stored));
}

#[test]
fn reused_submission_token_is_rejected() {
    let ledger = common::memory_ledger();
    let ctx = common::ctx("acme");

    ledger
        .submit(
            &ctx,
            common::create_assignment("evt-1", "acme", "asg-1", "2026-01-01", json!({"position_id": "p-1"}))
                .with_ids("req-42", "hr-admin"),
        )
        .unwrap();

    let err = ledger
        .submit(
            &ctx,
            common::create_assignment("evt-2", "acme", "asg-2", "2026-01-01", json!({"position_id": "p-2"}))
                .with_ids("req-42", "hr-admin"),
        )
        .unwrap_err();
    assert!(matches!(err, Error::ReusedIdempotencyKey { ref key } if key == "req-42"));
}

#[test]
fn same_date_same_content_is_deduplicated() {
    let ledger = common::memory_ledger();
    let ctx = common::ctx("acme");

    let first = ledger
        .submit(
            &ctx,
            common::create_assignment("evt-1", "acme", "asg-1", "2026-01-01", json!({"position_id": "p-1"})),
        )
        .unwrap();
    let duplicate = ledger
        .submit(
            &ctx,
            common::create_assignment("evt-1b", "acme", "asg-1", "2026-01-01", json!({"position_id": "p-1"})),
        )
        .unwrap();
    assert_eq!(duplicate.event_id, first.event_id);
}

#[test]
fn same_date_different_content_conflicts() {
    let ledger = common::memory_ledger();
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

    let err = ledger
        .submit(
            &ctx,
            common::update_assignment("evt-3", "acme", "asg-1", "2026-02-01", json!({"status": "inactive"})),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        Error::EventDateConflict { ref entity_id, effective_date }
            if entity_id == "asg-1" && effective_date == common::date("2026-02-01")
    ));
}

#[test]
fn overlay_resubmission_is_idempotent() {
    let ledger = common::memory_ledger();
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

    let correction = CorrectEvent::new(
        "cor-1",
        "acme",
        "asg-1",
        common::date("2026-01-01"),
        common::payload(json!({"position_id": "p-9"})),
    );
    let first = ledger.correct(&ctx, correction.clone()).unwrap();
    assert_eq!(ledger.correct(&ctx, correction.clone()).unwrap(), first);

    let mut reused = correction;
    reused.replacement_payload = common::payload(json!({"position_id": "p-10"}));
    assert!(matches!(
        ledger.correct(&ctx, reused),
        Err(Error::ReusedIdempotencyKey { .. })
    ));

    let rescind = RescindEvent::new(
        "res-1",
        "acme",
        "asg-1",
        common::date("2026-02-01"),
        common::payload(json!({"reason": "entered twice"})),
    );
    let first = ledger.rescind(&ctx, rescind.clone()).unwrap();
    assert_eq!(ledger.rescind(&ctx, rescind).unwrap(), first);
}

#[test]
fn same_date_duplicate_must_match_identity() {
    let ledger = common::memory_ledger();
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
            common::update_assignment("evt-2", "acme", "asg-1", "2026-02-01", json!({"fte": 0.5})),
        )
        .unwrap();

    let wrong_kind = ledger.submit(
        &ctx,
        SubmitEvent::update(
            "evt-10",
            "acme",
            EntityRef::new("asg-1", EntityKind::OrgUnit),
            common::date("2026-02-01"),
            common::payload(json!({"fte": 0.5})),
        ),
    );
    assert!(matches!(wrong_kind, Err(Error::InvalidArgument(_))));

    let wrong_key = ledger.submit(
        &ctx,
        SubmitEvent::update(
            "evt-11",
            "acme",
            common::assignment("asg-1").with_owning_key("person-7/primary"),
            common::date("2026-02-01"),
            common::payload(json!({"fte": 0.5})),
        ),
    );
    assert!(matches!(wrong_key, Err(Error::InvalidArgument(_))));

    // With the right identity the duplicate still resolves to the stored event.
    let duplicate = ledger
        .submit(
            &ctx,
            common::update_assignment("evt-12", "acme", "asg-1", "2026-02-01", json!({"fte": 0.5})),
        )
        .unwrap();
    assert_eq!(duplicate.event_id.as_str(), "evt-2");
}
