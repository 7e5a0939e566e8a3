//! Handler for the registration form submission.
//!
//! The form posts `multipart/form-data`: text parts carry the camelCase form
//! fields and file parts carry the optional badge, profile photo and supporting
//! document.

use adapters::Record;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::errors::PortalError;
use crate::services::registration::{Attachment, Attachments, RegistrationForm, RegistrationService};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct RegistrationResponse {
    pub message: String,
    pub user_id: String,
    pub school_id: Value,
    pub uploaded: Vec<String>,
}

pub async fn submit(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<RegistrationResponse>), PortalError> {
    let (form, attachments) = read_form(multipart).await?;
    if form.school_email.trim().is_empty() || form.admin_password.is_empty() {
        return Err(PortalError::BadRequest(
            "School email and administrator password are required".to_owned(),
        ));
    }

    let backend = state.backend()?;
    let outcome = RegistrationService::new(backend.as_ref(), &state.handoff)
        .submit(form, attachments)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegistrationResponse {
            message: "Registration submitted successfully! Your application is pending approval."
                .to_owned(),
            user_id: outcome.user_id,
            school_id: outcome.school_id,
            uploaded: outcome.uploaded,
        }),
    ))
}

async fn read_form(mut multipart: Multipart) -> Result<(RegistrationForm, Attachments), PortalError> {
    let mut fields = Record::new();
    let mut attachments = Attachments::default();

    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };

        match field.file_name().map(str::to_owned) {
            Some(file_name) => {
                let content_type = field.content_type().map(str::to_owned);
                let bytes = field.bytes().await?;
                let attachment = Attachment {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                };
                if !attachments.set(&name, attachment) {
                    debug!(field = %name, "ignoring unexpected file field");
                }
            }
            None => {
                let text = field.text().await?;
                fields.insert(name, Value::String(text));
            }
        }
    }

    let form = serde_json::from_value(Value::Object(fields))
        .map_err(|err| PortalError::BadRequest(format!("invalid registration form: {err}")))?;
    Ok((form, attachments))
}
