//! Playbook store: persistence over the graph store, lifecycle state
//! machine, semantic versioning and atomic execution statistics.
//!
//! This module is the only place allowed to mutate playbook statistics. The
//! update is a compare-and-set keyed on the current execution count, retried
//! a bounded number of times; a conflict that survives the retries surfaces
//! as an unavailable upstream. An in-memory read-mostly cache of active
//! playbooks is invalidated on every status transition via a broadcast
//! channel.

use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use strands_adapters::graph::{GraphStore, NodeProps};
use strands_core::audit::{AuditEvent, AuditLogger};
use strands_core::error::{Error, Result};
use strands_core::model::correlation::CorrelationType;
use strands_core::model::playbook::{
    Playbook, PlaybookExecution, PlaybookStats, PlaybookStatus, SemVer, VersionBump,
};
use strands_core::types::IdGen;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

const NODE_PLAYBOOK: &str = "Playbook";
const NODE_EXECUTION: &str = "PlaybookExecution";
const REL_EXECUTED_BY: &str = "EXECUTED_BY";
const REL_PREVIOUS_VERSION_OF: &str = "PREVIOUS_VERSION_OF";
const REL_TARGETS: &str = "TARGETS";

/// CAS attempts before the conflict surfaces.
const CAS_MAX_ATTEMPTS: u32 = 5;
const CAS_BACKOFF: Duration = Duration::from_millis(10);

/// Guard property duplicated at the node top level for compare-and-set.
const STATS_VERSION_PROP: &str = "stats_version";
/// Link to the predecessor version, set by `new_version`.
const PREVIOUS_VERSION_PROP: &str = "previous_version_id";

type CacheKey = (CorrelationType, String);

/// Versioned, lifecycle-managed playbook persistence.
#[derive(Debug)]
pub struct PlaybookStore {
    graph: Arc<dyn GraphStore>,
    audit: Arc<AuditLogger>,
    cache: RwLock<HashMap<CacheKey, Vec<Playbook>>>,
    invalidations: broadcast::Sender<Uuid>,
}

impl PlaybookStore {
    pub fn new(graph: Arc<dyn GraphStore>, audit: Arc<AuditLogger>) -> Self {
        let (invalidations, _) = broadcast::channel(64);
        Self {
            graph,
            audit,
            cache: RwLock::new(HashMap::new()),
            invalidations,
        }
    }

    /// Subscribe to cache-invalidation broadcasts.
    pub fn subscribe_invalidations(&self) -> broadcast::Receiver<Uuid> {
        self.invalidations.subscribe()
    }

    fn to_props(playbook: &Playbook) -> Result<NodeProps> {
        let Value::Object(mut props) = serde_json::to_value(playbook)? else {
            return Err(Error::validation("playbook did not serialize to an object"));
        };
        props.insert(
            STATS_VERSION_PROP.to_string(),
            json!(playbook.stats.total_executions),
        );
        Ok(props)
    }

    fn from_props(mut props: NodeProps) -> Result<Playbook> {
        props.remove(STATS_VERSION_PROP);
        props.remove(PREVIOUS_VERSION_PROP);
        serde_json::from_value(Value::Object(props)).map_err(Error::from)
    }

    /// Persist a playbook node (create or replace) plus its `TARGETS` edge.
    ///
    /// The `previous_version_id` link written by [`Self::new_version`] lives
    /// outside the model and must survive rewrites.
    pub async fn save(&self, playbook: &Playbook) -> Result<()> {
        let mut props = Self::to_props(playbook)?;
        let id = playbook.playbook_id.to_string();
        if let Some(existing) = self.graph.get_node(NODE_PLAYBOOK, &id).await? {
            if let Some(previous) = existing.get(PREVIOUS_VERSION_PROP) {
                props.insert(PREVIOUS_VERSION_PROP.to_string(), previous.clone());
            }
        }
        self.graph.upsert_node(NODE_PLAYBOOK, &id, props).await?;
        self.graph
            .upsert_relation(&id, REL_TARGETS, &playbook.service_pattern, NodeProps::new())
            .await?;
        self.invalidate(playbook.playbook_id).await;
        debug!(playbook_id = %id, status = %playbook.status, "playbook saved");
        Ok(())
    }

    /// Fetch a playbook by id.
    pub async fn get(&self, playbook_id: Uuid) -> Result<Option<Playbook>> {
        match self
            .graph
            .get_node(NODE_PLAYBOOK, &playbook_id.to_string())
            .await?
        {
            Some(props) => Ok(Some(Self::from_props(props)?)),
            None => Ok(None),
        }
    }

    /// Active playbooks for a `(pattern_type, service_pattern)` key, served
    /// from the read-mostly cache.
    pub async fn find_active(
        &self,
        pattern_type: CorrelationType,
        service_pattern: &str,
    ) -> Result<Vec<Playbook>> {
        let key = (pattern_type, service_pattern.to_string());
        if let Some(cached) = self.cache.read().await.get(&key) {
            return Ok(cached.clone());
        }
        let rows = self
            .graph
            .find_nodes(
                NODE_PLAYBOOK,
                &[
                    ("pattern_type", serde_json::to_value(pattern_type)?),
                    ("service_pattern", json!(service_pattern)),
                    ("status", json!("ACTIVE")),
                ],
            )
            .await?;
        let playbooks: Vec<Playbook> = rows
            .into_iter()
            .map(Self::from_props)
            .collect::<Result<_>>()?;
        self.cache.write().await.insert(key, playbooks.clone());
        Ok(playbooks)
    }

    /// Playbooks awaiting human review, newest first.
    pub async fn pending_review(&self, limit: usize) -> Result<Vec<Playbook>> {
        let rows = self
            .graph
            .find_nodes(NODE_PLAYBOOK, &[("status", json!("PENDING_REVIEW"))])
            .await?;
        let mut playbooks: Vec<Playbook> = rows
            .into_iter()
            .map(Self::from_props)
            .collect::<Result<_>>()?;
        playbooks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        playbooks.truncate(limit);
        Ok(playbooks)
    }

    /// All playbooks, for the operator listing.
    pub async fn list(&self) -> Result<Vec<Playbook>> {
        let rows = self.graph.find_nodes(NODE_PLAYBOOK, &[]).await?;
        let mut playbooks: Vec<Playbook> = rows
            .into_iter()
            .map(Self::from_props)
            .collect::<Result<_>>()?;
        playbooks.sort_by(|a, b| a.playbook_id.cmp(&b.playbook_id));
        Ok(playbooks)
    }

    /// Drive the lifecycle state machine.
    ///
    /// Illegal transitions raise `ILLEGAL_STATE_TRANSITION`. Repeating a
    /// transition into the state the playbook already holds is a no-op, so
    /// approvals are idempotent. Approving a version spawned by
    /// [`Self::new_version`] deprecates its still-active predecessor.
    pub async fn transition(
        &self,
        playbook_id: Uuid,
        to: PlaybookStatus,
        actor: &str,
        note: Option<String>,
    ) -> Result<Playbook> {
        let mut playbook = self
            .get(playbook_id)
            .await?
            .ok_or_else(|| Error::validation(format!("unknown playbook {playbook_id}")))?;

        if playbook.status == to {
            debug!(playbook_id = %playbook_id, status = %to, "transition is a no-op");
            return Ok(playbook);
        }
        if !playbook.status.allows(to) {
            return Err(Error::illegal_transition(
                format!("Playbook {playbook_id}"),
                playbook.status,
                to,
            ));
        }

        let from = playbook.status;
        playbook.status = to;
        playbook.updated_at = Utc::now();
        playbook.updated_by = Some(actor.to_string());
        match to {
            PlaybookStatus::Active => {
                playbook.approved_at = Some(Utc::now());
                playbook.approved_by = Some(actor.to_string());
            }
            PlaybookStatus::Archived => {
                if let Some(note) = &note {
                    playbook.rejection_note = Some(note.clone());
                }
            }
            _ => {}
        }
        self.save(&playbook).await?;

        self.audit.append(
            AuditEvent::new(
                playbook_id,
                "PLAYBOOK_TRANSITION",
                json!({ "from": from.to_string(), "to": to.to_string(), "actor": actor, "note": note }),
            )
            .with_playbook(playbook_id),
        )?;
        info!(playbook_id = %playbook_id, %from, %to, actor, "playbook transitioned");

        // A newly approved version retires its predecessor.
        if to == PlaybookStatus::Active {
            if let Some(mut predecessor) = self.predecessor_of(playbook_id).await? {
                if predecessor.status == PlaybookStatus::Active {
                    predecessor.status = PlaybookStatus::Deprecated;
                    predecessor.updated_at = Utc::now();
                    predecessor.updated_by = Some(actor.to_string());
                    self.save(&predecessor).await?;
                    self.audit.append(
                        AuditEvent::new(
                            predecessor.playbook_id,
                            "PLAYBOOK_TRANSITION",
                            json!({
                                "from": PlaybookStatus::Active.to_string(),
                                "to": PlaybookStatus::Deprecated.to_string(),
                                "actor": actor,
                                "note": format!("superseded by {playbook_id}"),
                            }),
                        )
                        .with_playbook(predecessor.playbook_id),
                    )?;
                    info!(
                        playbook_id = %predecessor.playbook_id,
                        successor = %playbook_id,
                        "predecessor version deprecated"
                    );
                }
            }
        }

        Ok(playbook)
    }

    async fn predecessor_of(&self, playbook_id: Uuid) -> Result<Option<Playbook>> {
        let Some(props) = self
            .graph
            .get_node(NODE_PLAYBOOK, &playbook_id.to_string())
            .await?
        else {
            return Ok(None);
        };
        let Some(previous_id) = props
            .get(PREVIOUS_VERSION_PROP)
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
        else {
            return Ok(None);
        };
        self.get(previous_id).await
    }

    /// Spawn a new version of an existing playbook as a fresh `DRAFT`.
    ///
    /// The new node is linked `PREVIOUS_VERSION_OF` its predecessor; the
    /// predecessor is deprecated only once the new version is approved.
    pub async fn new_version(
        &self,
        playbook_id: Uuid,
        bump: VersionBump,
        author: &str,
        ids: &IdGen,
    ) -> Result<Playbook> {
        let current = self
            .get(playbook_id)
            .await?
            .ok_or_else(|| Error::validation(format!("unknown playbook {playbook_id}")))?;
        if current.status != PlaybookStatus::Active {
            return Err(Error::illegal_transition(
                format!("Playbook {playbook_id}"),
                current.status,
                "new version draft",
            ));
        }

        let mut draft = current.clone();
        draft.playbook_id = ids.next_id();
        draft.version = current.version.bump(bump);
        draft.status = PlaybookStatus::Draft;
        draft.created_at = Utc::now();
        draft.created_by = author.to_string();
        draft.updated_at = draft.created_at;
        draft.updated_by = None;
        draft.approved_at = None;
        draft.approved_by = None;
        draft.stats = PlaybookStats::default();
        draft.rejection_note = None;

        let mut props = Self::to_props(&draft)?;
        props.insert(PREVIOUS_VERSION_PROP.to_string(), json!(playbook_id.to_string()));
        self.graph
            .upsert_node(NODE_PLAYBOOK, &draft.playbook_id.to_string(), props)
            .await?;
        self.graph
            .upsert_relation(
                &draft.playbook_id.to_string(),
                REL_PREVIOUS_VERSION_OF,
                &playbook_id.to_string(),
                NodeProps::new(),
            )
            .await?;
        info!(
            new_id = %draft.playbook_id,
            predecessor = %playbook_id,
            version = %draft.version,
            "new playbook version drafted"
        );
        Ok(draft)
    }

    /// Record one execution and fold it into the playbook statistics
    /// atomically.
    ///
    /// Idempotent by `execution_id`: a repeated record mutates the
    /// statistics only once. The statistics write is a compare-and-set on
    /// the current execution count; after `CAS_MAX_ATTEMPTS` failed rounds
    /// the conflict surfaces as `UPSTREAM_UNAVAILABLE`.
    pub async fn record_execution(&self, execution: &PlaybookExecution) -> Result<PlaybookStats> {
        let execution_key = execution.execution_id.to_string();
        if self
            .graph
            .get_node(NODE_EXECUTION, &execution_key)
            .await?
            .is_some()
        {
            debug!(execution_id = %execution_key, "execution already recorded");
            let playbook = self
                .get(execution.playbook_id)
                .await?
                .ok_or_else(|| Error::validation(format!("unknown playbook {}", execution.playbook_id)))?;
            return Ok(playbook.stats);
        }

        let playbook_key = execution.playbook_id.to_string();
        let mut attempt = 0;
        let stats = loop {
            attempt += 1;
            let raw = self
                .graph
                .get_node(NODE_PLAYBOOK, &playbook_key)
                .await?
                .ok_or_else(|| Error::validation(format!("unknown playbook {}", execution.playbook_id)))?;
            let preserved_link = raw.get(PREVIOUS_VERSION_PROP).cloned();
            let mut playbook = Self::from_props(raw)?;
            let observed = playbook.stats.total_executions;

            playbook
                .stats
                .record(execution.outcome, execution.duration_s, execution.completed_at);
            playbook.updated_at = Utc::now();

            let mut props = Self::to_props(&playbook)?;
            if let Some(link) = preserved_link {
                props.insert(PREVIOUS_VERSION_PROP.to_string(), link);
            }
            let swapped = self
                .graph
                .compare_and_set(
                    NODE_PLAYBOOK,
                    &execution.playbook_id.to_string(),
                    STATS_VERSION_PROP,
                    &json!(observed),
                    props,
                )
                .await?;
            if swapped {
                break playbook.stats;
            }
            if attempt >= CAS_MAX_ATTEMPTS {
                warn!(
                    playbook_id = %execution.playbook_id,
                    attempts = attempt,
                    "statistics compare-and-set kept losing"
                );
                return Err(Error::upstream(
                    "graph",
                    Error::OptimisticConflict {
                        entity: format!("Playbook {}", execution.playbook_id),
                    }
                    .to_string(),
                ));
            }
            tokio::time::sleep(CAS_BACKOFF * attempt).await;
        };

        // The execution node and its edge are written after the statistics
        // swap so a lost race never leaves a counted-but-unrecorded row.
        let Value::Object(exec_props) = serde_json::to_value(execution)? else {
            return Err(Error::validation("execution did not serialize to an object"));
        };
        self.graph
            .upsert_node(NODE_EXECUTION, &execution_key, exec_props)
            .await?;
        self.graph
            .upsert_relation(
                &execution_key,
                REL_EXECUTED_BY,
                &execution.playbook_id.to_string(),
                NodeProps::new(),
            )
            .await?;
        self.invalidate(execution.playbook_id).await;

        self.audit.append(
            AuditEvent::new(
                execution.execution_id,
                "EXECUTION_RECORDED",
                json!({
                    "outcome": execution.outcome,
                    "duration_s": execution.duration_s,
                    "steps_completed": execution.steps_completed,
                    "steps_attempted": execution.steps_attempted,
                }),
            )
            .with_decision(execution.decision_id)
            .with_playbook(execution.playbook_id),
        )?;
        metrics::counter!("strands_playbook_executions_total").increment(1);
        Ok(stats)
    }

    /// Version chain of a playbook, newest first, by walking
    /// `previous_version_id` links.
    pub async fn version_history(&self, playbook_id: Uuid) -> Result<Vec<Playbook>> {
        let mut history = Vec::new();
        let mut cursor = Some(playbook_id);
        while let Some(id) = cursor {
            let Some(props) = self.graph.get_node(NODE_PLAYBOOK, &id.to_string()).await? else {
                break;
            };
            cursor = props
                .get(PREVIOUS_VERSION_PROP)
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok());
            history.push(Self::from_props(props)?);
        }
        Ok(history)
    }

    async fn invalidate(&self, playbook_id: Uuid) {
        self.cache.write().await.clear();
        let _ = self.invalidations.send(playbook_id);
    }
}
