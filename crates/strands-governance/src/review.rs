//! Human-review state machine: exactly one review record per decision,
//! gated approval and the feedback path back into the playbook store.

use serde_json::{json, Value};
use std::sync::Arc;
use strands_adapters::graph::{GraphStore, NodeProps};
use strands_core::audit::{AuditEvent, AuditLogger};
use strands_core::error::{Error, Result};
use strands_core::model::decision::DecisionCandidate;
use strands_core::model::playbook::{PlaybookSource, PlaybookStatus, ReviewRecord, ReviewState};
use strands_core::types::{Clock, IdGen};
use tracing::{info, warn};
use uuid::Uuid;

use crate::playbook::PlaybookStore;

const NODE_REVIEW: &str = "ReviewRecord";
const REL_REVIEWED_BY: &str = "REVIEWED_BY";

/// What the controller should do after a review transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewOutcome {
    /// The decision was approved; trigger execution of the linked playbook.
    ExecuteRequest {
        decision_id: Uuid,
        playbook_id: Option<Uuid>,
    },
    /// The decision was rejected; nothing executes.
    Rejected { decision_id: Uuid },
    /// The call was an idempotent repeat of an earlier verdict.
    NoOp,
}

/// Gates decisions behind a human verdict.
#[derive(Debug)]
pub struct ReviewGate {
    graph: Arc<dyn GraphStore>,
    playbooks: Arc<PlaybookStore>,
    audit: Arc<AuditLogger>,
    /// Identity the pipeline itself uses; never a valid reviewer.
    system_identity: String,
}

impl ReviewGate {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        playbooks: Arc<PlaybookStore>,
        audit: Arc<AuditLogger>,
        system_identity: impl Into<String>,
    ) -> Self {
        Self {
            graph,
            playbooks,
            audit,
            system_identity: system_identity.into(),
        }
    }

    /// Open the pending review for a freshly persisted decision.
    pub async fn open(
        &self,
        decision: &DecisionCandidate,
        linked_playbook: Option<Uuid>,
        ids: &IdGen,
        clock: Clock,
    ) -> Result<ReviewRecord> {
        if self.load_by_decision(decision.decision_id).await?.is_some() {
            return Err(Error::validation(format!(
                "decision {} already has a review",
                decision.decision_id
            )));
        }
        let record = ReviewRecord {
            review_id: ids.next_id(),
            decision_id: decision.decision_id,
            state: ReviewState::Pending,
            reviewer: None,
            updated_at: clock.now(),
            notes: None,
        };
        self.persist(&record, linked_playbook).await?;
        self.graph
            .upsert_relation(
                &decision.decision_id.to_string(),
                REL_REVIEWED_BY,
                &record.review_id.to_string(),
                NodeProps::new(),
            )
            .await?;
        self.audit.append(
            AuditEvent::new(record.review_id, "REVIEW_OPENED", json!({}))
                .with_decision(decision.decision_id),
        )?;
        Ok(record)
    }

    /// Approve a decision. Emits `EXECUTE_REQUEST` and, when the linked
    /// playbook is awaiting review, promotes it to `ACTIVE`.
    pub async fn approve(
        &self,
        decision_id: Uuid,
        reviewer: &str,
        notes: Option<String>,
    ) -> Result<ReviewOutcome> {
        self.transition(decision_id, ReviewState::Approved, reviewer, notes)
            .await
    }

    /// Reject a decision. A newly generated linked playbook is demoted to
    /// `ARCHIVED` with the rejection note retained.
    pub async fn reject(
        &self,
        decision_id: Uuid,
        reviewer: &str,
        notes: Option<String>,
    ) -> Result<ReviewOutcome> {
        self.transition(decision_id, ReviewState::Rejected, reviewer, notes)
            .await
    }

    /// Current review record for a decision.
    pub async fn get(&self, decision_id: Uuid) -> Result<Option<ReviewRecord>> {
        Ok(self.load_by_decision(decision_id).await?.map(|(r, _)| r))
    }

    async fn transition(
        &self,
        decision_id: Uuid,
        verdict: ReviewState,
        reviewer: &str,
        notes: Option<String>,
    ) -> Result<ReviewOutcome> {
        if reviewer == self.system_identity {
            return Err(Error::InvalidReviewer {
                reason: format!("'{reviewer}' is the deciding system identity"),
            });
        }
        let (mut record, linked_playbook) = self
            .load_by_decision(decision_id)
            .await?
            .ok_or_else(|| Error::validation(format!("no review for decision {decision_id}")))?;

        if record.state.is_terminal() {
            // Identical repeat: no-op. Anything else: closed.
            if record.state == verdict && record.reviewer.as_deref() == Some(reviewer) {
                return Ok(ReviewOutcome::NoOp);
            }
            return Err(Error::ReviewAlreadyClosed { decision_id });
        }

        record.state = verdict;
        record.reviewer = Some(reviewer.to_string());
        record.notes = notes.clone();
        record.updated_at = chrono::Utc::now();
        self.persist(&record, linked_playbook).await?;

        let event_type = match verdict {
            ReviewState::Approved => "REVIEW_APPROVED",
            ReviewState::Rejected => "REVIEW_REJECTED",
            ReviewState::Pending => unreachable!("pending is never a verdict"),
        };
        self.audit.append(
            AuditEvent::new(
                record.review_id,
                event_type,
                json!({ "reviewer": reviewer, "notes": notes }),
            )
            .with_decision(decision_id),
        )?;
        info!(decision_id = %decision_id, reviewer, state = ?verdict, "review closed");

        match verdict {
            ReviewState::Approved => {
                if let Some(playbook_id) = linked_playbook {
                    if let Some(playbook) = self.playbooks.get(playbook_id).await? {
                        if playbook.status == PlaybookStatus::PendingReview {
                            self.playbooks
                                .transition(playbook_id, PlaybookStatus::Active, reviewer, None)
                                .await?;
                        }
                    }
                }
                Ok(ReviewOutcome::ExecuteRequest {
                    decision_id,
                    playbook_id: linked_playbook,
                })
            }
            ReviewState::Rejected => {
                if let Some(playbook_id) = linked_playbook {
                    if let Some(playbook) = self.playbooks.get(playbook_id).await? {
                        let newly_generated = playbook.source == PlaybookSource::LlmGenerated
                            && playbook.status == PlaybookStatus::PendingReview;
                        if newly_generated {
                            self.playbooks
                                .transition(
                                    playbook_id,
                                    PlaybookStatus::Archived,
                                    reviewer,
                                    record.notes.clone(),
                                )
                                .await?;
                        }
                    }
                }
                Ok(ReviewOutcome::Rejected { decision_id })
            }
            ReviewState::Pending => unreachable!("pending is never a verdict"),
        }
    }

    async fn persist(&self, record: &ReviewRecord, linked_playbook: Option<Uuid>) -> Result<()> {
        let Value::Object(mut props) = serde_json::to_value(record)? else {
            return Err(Error::validation("review did not serialize to an object"));
        };
        // The playbook link is carried on the node, outside the model.
        if let Some(playbook_id) = linked_playbook {
            props.insert("linked_playbook_id".into(), json!(playbook_id.to_string()));
        }
        self.graph
            .upsert_node(NODE_REVIEW, &record.review_id.to_string(), props)
            .await
    }

    async fn load_by_decision(
        &self,
        decision_id: Uuid,
    ) -> Result<Option<(ReviewRecord, Option<Uuid>)>> {
        let rows = self
            .graph
            .find_nodes(
                NODE_REVIEW,
                &[("decision_id", json!(decision_id.to_string()))],
            )
            .await?;
        let Some(mut props) = rows.into_iter().next() else {
            return Ok(None);
        };
        let linked = props
            .remove("linked_playbook_id")
            .and_then(|v| v.as_str().and_then(|s| Uuid::parse_str(s).ok()));
        match serde_json::from_value::<ReviewRecord>(Value::Object(props)) {
            Ok(record) => Ok(Some((record, linked))),
            Err(e) => {
                warn!(decision_id = %decision_id, error = %e, "malformed review node");
                Err(Error::from(e))
            }
        }
    }
}
