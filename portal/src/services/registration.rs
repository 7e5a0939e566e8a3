//! School registration submission.
//!
//! Creates the administrator account, records the school, attaches optional
//! uploads and stashes the result for the profile viewer. Only account creation
//! and the initial school insert are fatal; every later step is best-effort.

use std::time::{SystemTime, UNIX_EPOCH};

use adapters::{AdapterError, BackendAdapter, BlobUpload, Credentials, Filter, Record, SignUpRequest};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use time::{Date, OffsetDateTime};
use tracing::{info, warn};

use crate::auth::errors::AuthError;
use crate::auth::mirror::RegistrationHandoff;

const SCHOOLS_TABLE: &str = "schools";
const MASKED_PASSWORD: &str = "********";

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Authentication failed: {0}")]
    SignUp(#[source] AuthError),

    #[error("Authentication failed - no user returned")]
    NoUser,

    #[error("Database error: {0}")]
    Insert(#[source] AdapterError),
}

impl RegistrationError {
    pub fn status(&self) -> StatusCode {
        match self {
            RegistrationError::SignUp(AuthError::Rejected { .. }) => StatusCode::CONFLICT,
            RegistrationError::SignUp(AuthError::Offline) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Fields of the multi-step registration form, named as the form posts them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistrationForm {
    pub school_name: String,
    pub school_email: String,
    pub admin_full_name: String,
    pub admin_password: String,
    pub center_number: String,
    pub school_phone1: String,
    pub school_phone2: Option<String>,
    pub address: String,
    pub region: String,
    pub district: String,
    pub nin: String,
    pub role: String,
    pub sex: String,
    pub qualification: String,
    pub contact1: String,
    pub contact2: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl Attachment {
    fn extension(&self) -> &str {
        self.file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty())
            .unwrap_or("bin")
    }
}

#[derive(Debug, Clone, Default)]
pub struct Attachments {
    pub school_badge: Option<Attachment>,
    pub profile_photo: Option<Attachment>,
    pub supporting_docs: Option<Attachment>,
}

impl Attachments {
    /// Assigns an uploaded file by its form field name. Unknown fields are ignored.
    pub fn set(&mut self, field: &str, attachment: Attachment) -> bool {
        let slot = match field {
            "schoolBadge" => &mut self.school_badge,
            "profilePhoto" => &mut self.profile_photo,
            "supportingDocs" => &mut self.supporting_docs,
            _ => return false,
        };
        *slot = Some(attachment);
        true
    }
}

/// Where each upload goes and which school column receives its public URL.
struct UploadTarget {
    bucket: &'static str,
    prefix: &'static str,
    column: &'static str,
}

const BADGE: UploadTarget = UploadTarget {
    bucket: "school_badges",
    prefix: "badge",
    column: "school_badge_url",
};
const PROFILE_PHOTO: UploadTarget = UploadTarget {
    bucket: "profile_photos",
    prefix: "profile",
    column: "profile_photo_url",
};
const SUPPORTING_DOCS: UploadTarget = UploadTarget {
    bucket: "supporting_documents",
    prefix: "tmis",
    column: "supporting_docs_url",
};

#[derive(Debug, Clone)]
pub struct RegistrationOutcome {
    pub user_id: String,
    pub school_id: Value,
    /// What the profile viewer receives; the password is masked.
    pub summary: Record,
    pub uploaded: Vec<String>,
}

pub struct RegistrationService<'a> {
    backend: &'a dyn BackendAdapter,
    handoff: &'a RegistrationHandoff,
}

impl<'a> RegistrationService<'a> {
    pub fn new(backend: &'a dyn BackendAdapter, handoff: &'a RegistrationHandoff) -> Self {
        Self { backend, handoff }
    }

    pub async fn submit(
        &self,
        form: RegistrationForm,
        attachments: Attachments,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        info!(school = %form.school_name, "starting registration submission");

        let request = SignUpRequest {
            credentials: Credentials::new(&form.school_email, form.admin_password.clone()),
            metadata: object(json!({
                "full_name": form.admin_full_name,
                "role": "school_admin",
                "school_name": form.school_name,
            })),
        };
        let user = self
            .backend
            .sign_up(&request)
            .await
            .map_err(|err| RegistrationError::SignUp(AuthError::from_adapter(err)))?
            .identity
            .ok_or(RegistrationError::NoUser)?;
        info!(user = %user.id, "administrator account created");

        let school = object(json!({
            "school_name": or_default(&form.school_name, "Unknown School"),
            "school_email": request.credentials.email,
            "admin_full_name": or_default(&form.admin_full_name, "Unknown Admin"),
            "status": "pending",
            "registration_date": today().to_string(),
            "user_id": user.id,
        }));
        let stored = self
            .backend
            .insert(SCHOOLS_TABLE, school.clone())
            .await
            .map_err(RegistrationError::Insert)?;
        let school_id = stored.get("id").cloned().unwrap_or(Value::Null);
        info!(school_id = %school_id, "school record created");

        let details = object(json!({
            "center_number": form.center_number,
            "school_phone1": form.school_phone1,
            "school_phone2": non_empty(form.school_phone2),
            "address": form.address,
            "region": form.region,
            "district": form.district,
            "nin": form.nin,
            "role": form.role,
            "sex": form.sex,
            "qualification": form.qualification,
            "contact1": form.contact1,
            "contact2": non_empty(form.contact2),
        }));
        let by_id = Filter::eq("id", school_id.clone());
        if let Err(err) = self
            .backend
            .update(SCHOOLS_TABLE, details.clone(), &by_id)
            .await
        {
            warn!(error = %err, "could not store additional school details");
        }

        let (badge, photo, docs) = tokio::join!(
            self.attach(attachments.school_badge, &BADGE, &user.id, &by_id),
            self.attach(attachments.profile_photo, &PROFILE_PHOTO, &user.id, &by_id),
            self.attach(attachments.supporting_docs, &SUPPORTING_DOCS, &user.id, &by_id),
        );
        let uploaded: Vec<String> = [badge, photo, docs].into_iter().flatten().collect();

        let mut summary = school;
        summary.extend(details);
        summary.insert("school_id".to_owned(), school_id.clone());
        summary.insert("admin_password".to_owned(), json!(MASKED_PASSWORD));
        if let Err(err) = self.handoff.stash(&summary) {
            warn!(error = %err, "could not hand registration data to the profile page");
        }

        info!(user = %user.id, uploads = uploaded.len(), "registration completed");
        Ok(RegistrationOutcome {
            user_id: user.id,
            school_id,
            summary,
            uploaded,
        })
    }

    /// Uploads one file and records its public URL; returns the URL on success.
    async fn attach(
        &self,
        attachment: Option<Attachment>,
        target: &UploadTarget,
        user_id: &str,
        school: &Filter,
    ) -> Option<String> {
        let attachment = attachment.filter(|a| !a.bytes.is_empty())?;
        let path = format!(
            "{user_id}/{}_{}.{}",
            target.prefix,
            unix_millis(),
            attachment.extension()
        );

        let mut upload = BlobUpload::new(target.bucket, path.clone(), attachment.bytes);
        upload.content_type = attachment.content_type;
        if let Err(err) = self.backend.upload_blob(upload).await {
            warn!(bucket = target.bucket, error = %err, "file upload failed");
            return None;
        }

        let url = self.backend.public_url(target.bucket, &path);
        let mut change = Record::new();
        change.insert(target.column.to_owned(), Value::String(url.clone()));
        if let Err(err) = self.backend.update(SCHOOLS_TABLE, change, school).await {
            warn!(column = target.column, error = %err, "could not record upload URL");
        }
        info!(bucket = target.bucket, path = %path, "file uploaded");
        Some(url)
    }
}

fn object(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

fn or_default(value: &str, fallback: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        fallback.to_owned()
    } else {
        value.to_owned()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn today() -> Date {
    OffsetDateTime::now_utc().date()
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
}
