use std::fs;

use chrono::{NaiveDate, Utc};
use closing::approval::{
    transition_approval, update_assignees, Actor, Approval, ApprovalAction, ApprovalError,
    ApprovalStatus, Assignee, AssigneeChange, Role,
};
use closing::money::VatMode;
use closing::package::narrative::NoNarrative;
use closing::package::{
    create_package, OutputTarget, PackageOptions, PackageRequest, PackageServices, TaskInput,
    TaskMeta,
};
use closing::render::OutputFormat;
use closing::store::{
    Contract, ContractMeta, ContractStatus, Database, Id, IpTransferMode, PartyType, Performer,
    PerformerType, RateType, Store, TaxNotes, User,
};
use closing::templates::MemoryTemplates;
use closing::ClosingError;
use rust_decimal_macros::dec;
use tempfile::TempDir;

fn actor(id: &str, role: Role) -> Actor {
    Actor {
        id: id.to_string(),
        role,
    }
}

fn assignee(id: &str) -> Option<Assignee> {
    Some(Assignee {
        id: id.to_string(),
        name: id.to_uppercase(),
        email: None,
    })
}

fn assigned() -> Approval {
    Approval {
        performer_assignee: assignee("perf"),
        manager_assignee: assignee("boss"),
        ..Approval::default()
    }
}

#[test]
fn test_happy_path_reaches_final() {
    let mut approval = assigned();
    let now = Utc::now();
    let accountant = actor("acc", Role::Accountant);

    let steps = [
        (ApprovalAction::Submit, actor("acc", Role::Accountant), ApprovalStatus::PendingPerformer),
        (ApprovalAction::PerformerApprove, actor("perf", Role::Performer), ApprovalStatus::PendingManager),
        (ApprovalAction::ManagerApprove, actor("boss", Role::Manager), ApprovalStatus::ManagerApproved),
        (ApprovalAction::Finalize, accountant, ApprovalStatus::Final),
    ];
    for (action, who, expected) in steps {
        assert_eq!(approval.apply(action, &who, None, now).unwrap(), expected);
    }

    assert_eq!(approval.status, ApprovalStatus::Final);
    assert_eq!(approval.timeline.len(), 4);
    assert_eq!(approval.performer_approved_by.as_deref(), Some("perf"));
    assert_eq!(approval.manager_approved_by.as_deref(), Some("boss"));
    assert_eq!(approval.finalized_by.as_deref(), Some("acc"));
    assert!(approval.submitted_at.is_some());
}

#[test]
fn test_transition_from_wrong_status_is_rejected() {
    let mut approval = assigned();
    let err = approval
        .apply(ApprovalAction::Finalize, &actor("acc", Role::Accountant), None, Utc::now())
        .unwrap_err();

    assert_eq!(
        err,
        ApprovalError::InvalidTransition {
            action: ApprovalAction::Finalize,
            from: ApprovalStatus::Draft,
        }
    );
    assert_eq!(approval, assigned());
}

#[test]
fn test_out_of_order_actions_leave_state() {
    let now = Utc::now();
    let mut approval = assigned();
    let acc = actor("acc", Role::Accountant);
    approval.apply(ApprovalAction::Submit, &acc, None, now).unwrap();
    let snapshot = approval.clone();

    let err = approval
        .apply(ApprovalAction::ManagerApprove, &actor("boss", Role::Manager), None, now)
        .unwrap_err();
    assert!(matches!(err, ApprovalError::InvalidTransition { .. }));
    assert_eq!(approval, snapshot);

    approval
        .apply(ApprovalAction::PerformerApprove, &actor("perf", Role::Performer), None, now)
        .unwrap();
    approval
        .apply(ApprovalAction::ManagerApprove, &actor("boss", Role::Manager), None, now)
        .unwrap();
    approval.apply(ApprovalAction::Finalize, &acc, None, now).unwrap();
    let err = approval.apply(ApprovalAction::Submit, &acc, None, now).unwrap_err();
    assert_eq!(
        err,
        ApprovalError::InvalidTransition {
            action: ApprovalAction::Submit,
            from: ApprovalStatus::Final,
        }
    );
}

#[test]
fn test_reject_requires_a_note() {
    let now = Utc::now();
    let mut approval = assigned();
    approval
        .apply(ApprovalAction::Submit, &actor("acc", Role::Accountant), None, now)
        .unwrap();

    let performer = actor("perf", Role::Performer);
    let err = approval
        .apply(ApprovalAction::PerformerReject, &performer, Some("   "), now)
        .unwrap_err();
    assert!(matches!(err, ApprovalError::CommentRequired { .. }));
    assert_eq!(approval.status, ApprovalStatus::PendingPerformer);
    assert_eq!(approval.timeline.len(), 1);

    let status = approval
        .apply(ApprovalAction::PerformerReject, &performer, Some("Неверные часы"), now)
        .unwrap();
    assert_eq!(status, ApprovalStatus::RejectedPerformer);
    assert_eq!(approval.timeline[1].message.as_deref(), Some("Неверные часы"));
}

#[test]
fn test_only_the_assignee_or_an_override_role_may_act() {
    let now = Utc::now();
    let mut approval = assigned();
    approval
        .apply(ApprovalAction::Submit, &actor("acc", Role::Accountant), None, now)
        .unwrap();

    let err = approval
        .apply(ApprovalAction::PerformerApprove, &actor("other", Role::Performer), None, now)
        .unwrap_err();
    assert_eq!(err, ApprovalError::NotAssignee { stage: "performer" });

    let status = approval
        .apply(ApprovalAction::PerformerApprove, &actor("root", Role::Admin), None, now)
        .unwrap();
    assert_eq!(status, ApprovalStatus::PendingManager);
    assert_eq!(approval.performer_approved_by.as_deref(), Some("root"));
}

#[test]
fn test_manager_stage_needs_a_manager_even_for_admins() {
    let now = Utc::now();
    let mut approval = Approval {
        performer_assignee: assignee("perf"),
        ..Approval::default()
    };
    let admin = actor("root", Role::Admin);
    approval.apply(ApprovalAction::Submit, &admin, None, now).unwrap();
    approval
        .apply(ApprovalAction::PerformerApprove, &admin, None, now)
        .unwrap();

    let err = approval
        .apply(ApprovalAction::ManagerApprove, &admin, None, now)
        .unwrap_err();
    assert_eq!(err, ApprovalError::MissingAssignee { stage: "manager" });
}

#[test]
fn test_submit_needs_a_driving_role_and_a_performer() {
    let now = Utc::now();
    let mut approval = assigned();
    let err = approval
        .apply(ApprovalAction::Submit, &actor("v", Role::Viewer), None, now)
        .unwrap_err();
    assert!(matches!(err, ApprovalError::RoleNotAllowed { role: Role::Viewer, .. }));

    let mut unassigned = Approval::default();
    let err = unassigned
        .apply(ApprovalAction::Submit, &actor("acc", Role::Accountant), None, now)
        .unwrap_err();
    assert_eq!(err, ApprovalError::MissingAssignee { stage: "performer" });
}

#[test]
fn test_resubmit_after_manager_rejection_skips_performer() {
    let now = Utc::now();
    let mut approval = assigned();
    let acc = actor("acc", Role::Accountant);
    approval.apply(ApprovalAction::Submit, &acc, None, now).unwrap();
    approval
        .apply(ApprovalAction::PerformerApprove, &actor("perf", Role::Performer), None, now)
        .unwrap();
    approval
        .apply(ApprovalAction::ManagerReject, &actor("boss", Role::Manager), Some("Нет подписи"), now)
        .unwrap();
    assert_eq!(approval.status, ApprovalStatus::RejectedManager);

    let status = approval.apply(ApprovalAction::Submit, &acc, None, now).unwrap();
    assert_eq!(status, ApprovalStatus::PendingManager);
    assert_eq!(approval.performer_approved_by.as_deref(), Some("perf"));
    assert_eq!(approval.manager_approved_by, None);
}

#[test]
fn test_reassignment_rules() {
    let now = Utc::now();
    let acc = actor("acc", Role::Accountant);

    let mut approval = assigned();
    approval.apply(ApprovalAction::Submit, &acc, None, now).unwrap();
    approval.reassign_performer(assignee("perf2"), &acc, now).unwrap();
    assert_eq!(approval.status, ApprovalStatus::Draft);
    assert_eq!(approval.submitted_at, None);

    approval.apply(ApprovalAction::Submit, &acc, None, now).unwrap();
    approval
        .apply(ApprovalAction::PerformerApprove, &actor("perf2", Role::Performer), None, now)
        .unwrap();
    let err = approval.reassign_performer(assignee("perf3"), &acc, now).unwrap_err();
    assert!(matches!(err, ApprovalError::ReassignForbidden { stage: "performer", .. }));

    approval.reassign_manager(assignee("boss2"), &acc, now).unwrap();
    assert_eq!(approval.status, ApprovalStatus::PendingPerformer);
    assert_eq!(approval.performer_approved_by, None);

    // same id again changes nothing
    let before = approval.timeline.len();
    approval.reassign_manager(assignee("boss2"), &acc, now).unwrap();
    assert_eq!(approval.timeline.len(), before);
    assert_eq!(approval.status, ApprovalStatus::PendingPerformer);
}

#[test]
fn test_lenient_status_parsing() {
    assert_eq!(ApprovalStatus::parse_lenient("performer_approved"), ApprovalStatus::PendingManager);
    assert_eq!(ApprovalStatus::parse_lenient("Pending-Performer"), ApprovalStatus::PendingPerformer);
    assert_eq!(ApprovalStatus::parse_lenient("finalized"), ApprovalStatus::Final);
    assert_eq!(ApprovalStatus::parse_lenient("whatever"), ApprovalStatus::Draft);

    let approval: Approval = serde_json::from_str(r#"{"status": "performer-approved"}"#).unwrap();
    assert_eq!(approval.status, ApprovalStatus::PendingManager);
}

#[test]
fn test_actions_and_roles_parse() {
    assert_eq!("manager-approve".parse::<ApprovalAction>().unwrap(), ApprovalAction::ManagerApprove);
    assert_eq!("Finalize".parse::<ApprovalAction>().unwrap(), ApprovalAction::Finalize);
    assert!("approve".parse::<ApprovalAction>().is_err());
    assert_eq!("Accountant".parse::<Role>().unwrap(), Role::Accountant);
    assert!("owner".parse::<Role>().is_err());
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// A store holding one generated act and three users.
fn store_with_document(out: &TempDir) -> (Store, Id) {
    let mut db = Database::default();
    let performer_id = db.insert_performer(Performer {
        id: 0,
        full_name: "Петров Пётр Петрович".to_string(),
        performer_type: PerformerType::Gph,
        inn: None,
        tax_notes: TaxNotes::default(),
        source: None,
    });
    db.insert_contract(Contract {
        id: 0,
        number: "Д-1".to_string(),
        contract_date: None,
        party_type: PartyType::Individual,
        company_id: None,
        performer_id: Some(performer_id),
        valid_from: date(2025, 1, 1),
        valid_to: date(2025, 12, 31),
        vat_mode: VatMode::NoVat,
        rate_type: RateType::Hour,
        rate_value: dec!(1000),
        currency: "RUB".to_string(),
        act_by_projects: false,
        ip_transfer_mode: IpTransferMode::Embedded,
        status: ContractStatus::Active,
        meta: ContractMeta::default(),
    });
    for (id, role) in [("acc", Role::Accountant), ("perf", Role::Performer), ("boss", Role::Manager)] {
        db.upsert_user(User {
            id: id.to_string(),
            name: id.to_uppercase(),
            email: None,
            role,
        });
    }

    let mut store = Store::in_memory(db);
    let request = PackageRequest {
        ta_id: None,
        period_start: date(2025, 3, 1),
        period_end: date(2025, 3, 31),
        has_ip: false,
        tasks: vec![TaskInput {
            id: "PRJ-1".to_string(),
            assignee_id: Some(performer_id),
            hours: dec!(8),
            project_id: None,
            status: None,
            contract_id: None,
            company_inn: None,
            performer_type: None,
            meta: TaskMeta::default(),
        }],
        options: PackageOptions::default(),
    };
    let templates = MemoryTemplates::new();
    let services = PackageServices {
        templates: &templates,
        narrator: &NoNarrative,
        output: OutputTarget {
            dir: out.path().to_path_buf(),
            format: OutputFormat::Json,
        },
    };
    let response = create_package(&mut store, &request, &services, None).unwrap();
    (store, response.documents[0].id)
}

#[test]
fn test_workflow_persists_transitions_and_audits() {
    let out = TempDir::new().unwrap();
    let (mut store, doc) = store_with_document(&out);

    let updated = update_assignees(
        &mut store,
        doc,
        AssigneeChange::Set("perf".to_string()),
        AssigneeChange::Set("boss".to_string()),
        "acc",
        "accountant",
    )
    .unwrap();
    assert_eq!(updated.meta.approval.manager_assignee.as_ref().unwrap().name, "BOSS");

    transition_approval(&mut store, doc, ApprovalAction::Submit, "accountant", "acc", None).unwrap();
    transition_approval(&mut store, doc, ApprovalAction::PerformerApprove, "performer", "perf", None)
        .unwrap();
    let document =
        transition_approval(&mut store, doc, ApprovalAction::ManagerApprove, "manager", "boss", None)
            .unwrap();

    assert_eq!(document.meta.approval.status, ApprovalStatus::ManagerApproved);
    let stored = store.db().document(doc).unwrap();
    assert_eq!(stored.meta.approval.status, ApprovalStatus::ManagerApproved);
    assert_eq!(stored.meta.approval.timeline.len(), 3);
    assert!(store
        .db()
        .audit_log
        .iter()
        .any(|e| e.action == "approval.manager_approve" && e.error_code.is_none()));
}

#[test]
fn test_failed_transition_is_audited_and_leaves_document() {
    let out = TempDir::new().unwrap();
    let (mut store, doc) = store_with_document(&out);

    let err = transition_approval(&mut store, doc, ApprovalAction::Submit, "accountant", "acc", None)
        .unwrap_err();

    assert!(matches!(
        err,
        ClosingError::Approval(ApprovalError::MissingAssignee { stage: "performer" })
    ));
    assert_eq!(err.code(), "validation_failed");
    assert_eq!(
        store.db().document(doc).unwrap().meta.approval.status,
        ApprovalStatus::Draft
    );
    let last = store.db().audit_log.last().unwrap();
    assert_eq!(last.action, "approval.submit");
    assert_eq!(last.error_code.as_deref(), Some("validation_failed"));
}

#[test]
fn test_workflow_rejects_unknown_role_user_and_document() {
    let out = TempDir::new().unwrap();
    let (mut store, doc) = store_with_document(&out);

    let err = transition_approval(&mut store, doc, ApprovalAction::Submit, "owner", "acc", None)
        .unwrap_err();
    assert_eq!(err.code(), "validation_failed");

    let err = transition_approval(&mut store, 999, ApprovalAction::Submit, "admin", "acc", None)
        .unwrap_err();
    assert_eq!(err.code(), "not_found");

    let err = update_assignees(
        &mut store,
        doc,
        AssigneeChange::Set("ghost".to_string()),
        AssigneeChange::Keep,
        "acc",
        "admin",
    )
    .unwrap_err();
    assert_eq!(err.code(), "not_found");
    assert!(store.db().document(doc).unwrap().meta.approval.performer_assignee.is_none());
}

#[test]
fn test_concurrent_stores_serialize_transitions() {
    let out = TempDir::new().unwrap();
    let (mut seeded, doc) = store_with_document(&out);
    update_assignees(
        &mut seeded,
        doc,
        AssigneeChange::Set("perf".to_string()),
        AssigneeChange::Set("boss".to_string()),
        "acc",
        "accountant",
    )
    .unwrap();
    transition_approval(&mut seeded, doc, ApprovalAction::Submit, "accountant", "acc", None).unwrap();
    let state = out.path().join("state.json");
    fs::write(&state, serde_json::to_string(seeded.db()).unwrap()).unwrap();

    // Both stores load the document at pending_performer.
    let mut first = Store::open(state.clone()).unwrap();
    let mut second = Store::open(state.clone()).unwrap();

    transition_approval(&mut first, doc, ApprovalAction::PerformerApprove, "performer", "perf", None)
        .unwrap();
    let err = transition_approval(
        &mut second,
        doc,
        ApprovalAction::PerformerReject,
        "performer",
        "perf",
        Some("не согласен"),
    )
    .unwrap_err();
    assert_eq!(err.code(), "validation_failed");

    let reloaded = Store::open(state).unwrap();
    let approval = &reloaded.db().document(doc).unwrap().meta.approval;
    assert_eq!(approval.status, ApprovalStatus::PendingManager);
    assert_eq!(approval.timeline.len(), 2);
    let last = reloaded.db().audit_log.last().unwrap();
    assert_eq!(last.action, "approval.performer_reject");
    assert_eq!(last.error_code.as_deref(), Some("validation_failed"));
}

#[test]
fn test_unwritable_failure_audit_keeps_the_transition_error() {
    let out = TempDir::new().unwrap();
    let state = out.path().join("state.json");
    let mut store = Store::open(state.clone()).unwrap();
    fs::create_dir(out.path().join("state.json.tmp")).unwrap();

    let err = transition_approval(&mut store, 7, ApprovalAction::Submit, "accountant", "acc", None)
        .unwrap_err();

    assert_eq!(err.code(), "not_found");
    assert!(!state.exists());
}
