//! Hand-off to the document ingestion collaborator.
//!
//! A knowledge base starts out `processing`. Whatever extracts its content
//! reports back through [`on_ingest_complete`]; a finished record can be sent
//! round again with [`restart_ingestion`].

use tracing::{info, warn};
use uuid::Uuid;

use botdesk_db::Database;
use botdesk_db::queries::StatusTransition;
use botdesk_types::models::{IngestOutcome, KnowledgeBase, KnowledgeBaseStatus};

/// Receives knowledge bases that need (re)processing.
pub trait Ingestor: Send + Sync {
    fn submit(&self, knowledge_base: &KnowledgeBase);
}

/// Default collaborator: records the hand-off and leaves the record in
/// `processing`.
pub struct LogIngestor;

impl Ingestor for LogIngestor {
    fn submit(&self, knowledge_base: &KnowledgeBase) {
        info!(
            "Knowledge base {} ({}, {}) queued for ingestion",
            knowledge_base.id, knowledge_base.name, knowledge_base.kind
        );
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("knowledge base {0} not found")]
    NotFound(Uuid),

    #[error("knowledge base {id} is {status}, expected {expected}")]
    WrongStatus {
        id: Uuid,
        status: KnowledgeBaseStatus,
        expected: &'static str,
    },

    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

/// Apply the ingestion result for a `processing` knowledge base.
pub fn on_ingest_complete(
    db: &Database,
    id: Uuid,
    outcome: IngestOutcome,
) -> Result<KnowledgeBase, IngestError> {
    let transition = db.transition_knowledge_base(
        id,
        &[KnowledgeBaseStatus::Processing],
        outcome.status(),
        outcome.error_message(),
    )?;
    let knowledge_base = applied(id, transition, "processing")?;

    if let IngestOutcome::Error(reason) = &outcome {
        warn!("Ingestion of knowledge base {} failed: {}", id, reason);
    }
    Ok(knowledge_base)
}

/// Move a `ready` or `error` knowledge base back to `processing` and hand it
/// to `ingestor` again.
pub fn restart_ingestion(
    db: &Database,
    ingestor: &dyn Ingestor,
    id: Uuid,
) -> Result<KnowledgeBase, IngestError> {
    let transition = db.transition_knowledge_base(
        id,
        &[KnowledgeBaseStatus::Ready, KnowledgeBaseStatus::Error],
        KnowledgeBaseStatus::Processing,
        None,
    )?;
    let knowledge_base = applied(id, transition, "ready or error")?;

    ingestor.submit(&knowledge_base);
    Ok(knowledge_base)
}

/// Whether an owner's edit from `previous` to `next` sends the record back
/// through ingestion.
pub fn reenters_processing(previous: KnowledgeBaseStatus, next: Option<KnowledgeBaseStatus>) -> bool {
    previous != KnowledgeBaseStatus::Processing && next == Some(KnowledgeBaseStatus::Processing)
}

fn applied(
    id: Uuid,
    transition: StatusTransition,
    expected: &'static str,
) -> Result<KnowledgeBase, IngestError> {
    match transition {
        StatusTransition::Applied(knowledge_base) => Ok(knowledge_base),
        StatusTransition::Refused(status) => Err(IngestError::WrongStatus {
            id,
            status,
            expected,
        }),
        StatusTransition::Missing => Err(IngestError::NotFound(id)),
    }
}
