use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::error::{ClosingError, Result};
use crate::store::{AuditRecord, AuditSink, Database, DocumentRecord, Id, Store};

use super::{Actor, ApprovalAction, Assignee, Role};

/// Requested change to one assignee slot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AssigneeChange {
    #[default]
    Keep,
    Clear,
    Set(String),
}

/// Apply an approval action to a document and persist it. Failures leave
/// the document untouched and are written to the audit log.
pub fn transition_approval(
    store: &mut Store,
    document_id: Id,
    action: ApprovalAction,
    role: &str,
    actor_id: &str,
    note: Option<&str>,
) -> Result<DocumentRecord> {
    let result = store.transaction(|db| {
        let role: Role = role.parse()?;
        let actor = Actor {
            id: actor_id.to_string(),
            role,
        };
        let document = find_document(db, document_id)?;
        let from = document.meta.approval.status;
        let to = document
            .meta
            .approval
            .apply(action, &actor, note, Utc::now())?;
        let snapshot = document.clone();

        db.record_audit(AuditRecord {
            actor_id: Some(actor.id.clone()),
            action: format!("approval.{action}"),
            entity: "document".to_string(),
            entity_id: document_id.to_string(),
            payload: json!({ "from": from.as_str(), "to": to.as_str(), "note": note }),
            error_code: None,
        });
        info!(document = document_id, %action, %from, %to, "approval transition");
        Ok(snapshot)
    });

    if let Err(err) = &result {
        if let Err(audit_err) = store.record_failure(
            Some(actor_id),
            &format!("approval.{action}"),
            "document",
            &document_id.to_string(),
            err,
        ) {
            warn!(document = document_id, error = %audit_err, "could not record failed transition");
        }
    }
    result
}

/// Change the performer and/or manager assignee of a document.
pub fn update_assignees(
    store: &mut Store,
    document_id: Id,
    performer: AssigneeChange,
    manager: AssigneeChange,
    actor_id: &str,
    role: &str,
) -> Result<DocumentRecord> {
    let result = store.transaction(|db| {
        let actor = Actor {
            id: actor_id.to_string(),
            role: role.parse()?,
        };
        let performer = resolve_change(db, &performer)?;
        let manager = resolve_change(db, &manager)?;

        let now = Utc::now();
        let document = find_document(db, document_id)?;
        let approval = &mut document.meta.approval;
        if let Some(assignee) = performer {
            approval.reassign_performer(assignee, &actor, now)?;
        }
        if let Some(assignee) = manager {
            approval.reassign_manager(assignee, &actor, now)?;
        }
        let snapshot = document.clone();

        let approval = &snapshot.meta.approval;
        db.record_audit(AuditRecord {
            actor_id: Some(actor.id.clone()),
            action: "approval.assign".to_string(),
            entity: "document".to_string(),
            entity_id: document_id.to_string(),
            payload: json!({
                "performer": approval.performer_assignee.as_ref().map(|a| &a.id),
                "manager": approval.manager_assignee.as_ref().map(|a| &a.id),
                "status": approval.status.as_str(),
            }),
            error_code: None,
        });
        info!(document = document_id, status = %approval.status, "assignees updated");
        Ok(snapshot)
    });

    if let Err(err) = &result {
        if let Err(audit_err) = store.record_failure(
            Some(actor_id),
            "approval.assign",
            "document",
            &document_id.to_string(),
            err,
        ) {
            warn!(document = document_id, error = %audit_err, "could not record failed transition");
        }
    }
    result
}

fn find_document(db: &mut Database, id: Id) -> Result<&mut DocumentRecord> {
    db.document_mut(id)
        .ok_or_else(|| ClosingError::not_found("Document not found", json!({ "document_id": id })))
}

/// `None` keeps the slot, `Some(None)` clears it.
fn resolve_change(db: &Database, change: &AssigneeChange) -> Result<Option<Option<Assignee>>> {
    match change {
        AssigneeChange::Keep => Ok(None),
        AssigneeChange::Clear => Ok(Some(None)),
        AssigneeChange::Set(id) => {
            let user = db.user(id).ok_or_else(|| {
                ClosingError::not_found("User not found", json!({ "user_id": id }))
            })?;
            Ok(Some(Some(Assignee {
                id: user.id.clone(),
                name: user.name.clone(),
                email: user.email.clone(),
            })))
        }
    }
}
