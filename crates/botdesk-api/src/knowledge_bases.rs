use axum::{
    Extension, Json,
    extract::{
        Multipart, Path, Query, State,
        multipart::{Field, MultipartError},
    },
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{info, warn};
use uuid::Uuid;

use botdesk_db::queries::KnowledgeBaseInsert;
use botdesk_types::api::{
    Confirmation, KnowledgeBaseForm, ListQuery, Notice, PER_PAGE, Page, UpdateKnowledgeBaseRequest,
    UploadedFile,
};
use botdesk_types::authz::Actor;
use botdesk_types::models::{JsonMap, KnowledgeBase, KnowledgeBaseStatus};
use botdesk_types::validation::{MAX_UPLOAD_BYTES, UPLOAD_TOO_LARGE, ValidationErrors};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::extract::JsonBody;
use crate::ingest::{IngestError, reenters_processing, restart_ingestion};
use crate::{access, blocking, parse_filter};

pub async fn index(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(chatbot_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<KnowledgeBase>>, ApiError> {
    access::chatbot(&state, &actor, chatbot_id).await?;

    let status: Option<KnowledgeBaseStatus> = parse_filter(
        "status",
        query.status.as_deref(),
        "Status must be processing, ready, or error.",
    )?;
    let page = query.page();
    let offset = Page::<KnowledgeBase>::offset(page, PER_PAGE);

    let (data, total) = blocking(&state, move |db| {
        db.list_knowledge_bases(chatbot_id, status, PER_PAGE, offset)
    })
    .await?;

    Ok(Json(Page::new(data, page, PER_PAGE, total)))
}

/// Multipart create. The chatbot comes from the path; the form carries
/// `name`, `type`, `content` and an optional `file`.
pub async fn store(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(chatbot_id): Path<Uuid>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    // Ownership is settled before the body is read.
    access::chatbot(&state, &actor, chatbot_id).await?;

    let new = read_form(multipart).await?.into_new()?;

    let stored = match &new.upload {
        Some(upload) => Some(state.storage.store(upload).await.map_err(ApiError::Storage)?),
        None => None,
    };
    let metadata = match (&stored, &new.upload) {
        (Some(stored), Some(upload)) => stored.metadata(&upload.extension),
        _ => JsonMap::new(),
    };
    let file_path = stored.as_ref().map(|s| s.file_path.clone());

    let inserted = {
        let file_path = file_path.clone();
        blocking(&state, move |db| {
            db.insert_knowledge_base(
                chatbot_id,
                &KnowledgeBaseInsert {
                    name: &new.name,
                    kind: new.kind,
                    content: new.content.as_deref(),
                    file_path: file_path.as_deref(),
                    original_filename: new.upload.as_ref().map(|u| u.original_filename.as_str()),
                    metadata: &metadata,
                },
            )
        })
        .await
    };

    let knowledge_base = match inserted {
        Ok(knowledge_base) => knowledge_base,
        Err(e) => {
            // Don't leave an unreferenced upload behind.
            if let Some(file_path) = &file_path {
                if let Err(cleanup) = state.storage.delete(file_path).await {
                    warn!("Could not remove orphaned upload {}: {:#}", file_path, cleanup);
                }
            }
            return Err(e);
        }
    };

    info!(
        "User {} added knowledge base {} to chatbot {}",
        actor.user_id, knowledge_base.id, chatbot_id
    );
    state.ingestor.submit(&knowledge_base);

    Ok((
        StatusCode::CREATED,
        Json(Confirmation::new(
            "Knowledge base created successfully! Processing will begin shortly.",
            knowledge_base,
        )),
    ))
}

pub async fn show(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<KnowledgeBase>, ApiError> {
    Ok(Json(access::knowledge_base(&state, &actor, id).await?))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    JsonBody(req): JsonBody<UpdateKnowledgeBaseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let previous = access::knowledge_base(&state, &actor, id).await?;
    let changes = req.into_changes()?;
    let resubmit = reenters_processing(previous.status, changes.status);

    let knowledge_base = blocking(&state, move |db| db.update_knowledge_base(id, &changes))
        .await?
        .ok_or(ApiError::NotFound)?;

    if resubmit {
        state.ingestor.submit(&knowledge_base);
    }

    Ok(Json(Confirmation::new(
        "Knowledge base updated successfully!",
        knowledge_base,
    )))
}

/// Send a `ready` or `error` knowledge base through ingestion again.
pub async fn reingest(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    access::knowledge_base(&state, &actor, id).await?;

    let ingestor = state.ingestor.clone();
    let restarted = blocking(&state, move |db| Ok(restart_ingestion(db, &*ingestor, id))).await?;
    let knowledge_base = restarted.map_err(|e| match e {
        IngestError::NotFound(_) => ApiError::NotFound,
        IngestError::WrongStatus { .. } => {
            ApiError::Conflict("Knowledge base is already being processed.")
        }
        IngestError::Database(e) => ApiError::Internal(e),
    })?;
    info!("User {} restarted ingestion of knowledge base {}", actor.user_id, id);

    Ok(Json(Confirmation::new(
        "Knowledge base queued for processing.",
        knowledge_base,
    )))
}

/// The stored file goes first. A file that is already missing is fine; any
/// other storage failure aborts before the row is touched.
pub async fn destroy(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let knowledge_base = access::knowledge_base(&state, &actor, id).await?;

    if let Some(file_path) = &knowledge_base.file_path {
        state
            .storage
            .delete(file_path)
            .await
            .map_err(ApiError::Storage)?;
    }

    blocking(&state, move |db| db.delete_knowledge_base(id)).await?;
    info!("User {} deleted knowledge base {}", actor.user_id, id);

    Ok(Json(Notice {
        message: "Knowledge base deleted successfully!".into(),
    }))
}

async fn read_form(mut multipart: Multipart) -> Result<KnowledgeBaseForm, ApiError> {
    let mut form = KnowledgeBaseForm::default();

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = read_upload(&mut field).await?;
                // Browsers send an empty part when no file was chosen.
                if filename.is_empty() && bytes.is_empty() {
                    continue;
                }
                form.file = Some(UploadedFile { filename, bytes });
            }
            "name" | "type" | "content" => {
                let value = field.text().await.map_err(multipart_error)?;
                match name.as_str() {
                    "name" => form.name = Some(value),
                    "type" => form.kind = Some(value),
                    _ => form.content = Some(value),
                }
            }
            other => {
                return Err(ApiError::BadRequest(format!("Unexpected field '{}'", other)));
            }
        }
    }

    Ok(form)
}

/// Keeps at most one byte past the upload limit, which is enough for
/// validation to reject it; the rest of the part is drained.
async fn read_upload(field: &mut Field<'_>) -> Result<Vec<u8>, ApiError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        let room = (MAX_UPLOAD_BYTES + 1).saturating_sub(bytes.len());
        bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
    Ok(bytes)
}

/// A body cut off by the request size limit can only be an oversized file.
fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        let mut errors = ValidationErrors::default();
        errors.add("file", UPLOAD_TOO_LARGE);
        ApiError::Validation(errors)
    } else {
        ApiError::BadRequest(format!("Malformed multipart body: {}", e.body_text()))
    }
}
