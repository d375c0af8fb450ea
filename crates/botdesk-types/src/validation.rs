//! Typed commands built from raw request bodies.
//!
//! Every mutation goes through one of these: a request is turned into a
//! command or into a field-keyed [`ValidationErrors`] map, and nothing is
//! written until the command exists. Strings are trimmed and empty strings
//! count as absent.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::api::{ChatbotRequest, KnowledgeBaseForm, UpdateKnowledgeBaseRequest};
use crate::models::{ChatbotStatus, KnowledgeBaseStatus, KnowledgeBaseType};

/// Largest accepted knowledge base upload: 10240 KiB.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Field error for an upload over [`MAX_UPLOAD_BYTES`].
pub const UPLOAD_TOO_LARGE: &str = "File size cannot exceed 10MB.";

/// Extensions accepted for knowledge base uploads.
pub const UPLOAD_EXTENSIONS: &[&str] = &["pdf", "xlsx", "xls", "csv", "txt"];

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("The given data was invalid.")]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn messages(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or_default()
    }

    fn finish<T>(self, value: impl FnOnce() -> T) -> Result<T, Self> {
        if self.is_empty() { Ok(value()) } else { Err(self) }
    }
}

// -- Chatbots --

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChatbot {
    pub name: String,
    pub description: Option<String>,
    pub whatsapp_phone_number: Option<String>,
    pub whatsapp_access_token: Option<String>,
    pub whatsapp_webhook_verify_token: Option<String>,
    pub status: ChatbotStatus,
}

/// Changes to apply to a chatbot. `None` leaves a field as it is,
/// `Some(None)` clears it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatbotChanges {
    pub name: String,
    pub description: Option<Option<String>>,
    pub whatsapp_phone_number: Option<Option<String>>,
    pub whatsapp_access_token: Option<Option<String>>,
    pub whatsapp_webhook_verify_token: Option<Option<String>>,
    pub status: Option<ChatbotStatus>,
}

impl ChatbotRequest {
    pub fn into_new(self) -> Result<NewChatbot, ValidationErrors> {
        let changes = self.into_changes()?;
        Ok(NewChatbot {
            name: changes.name,
            description: changes.description.flatten(),
            whatsapp_phone_number: changes.whatsapp_phone_number.flatten(),
            whatsapp_access_token: changes.whatsapp_access_token.flatten(),
            whatsapp_webhook_verify_token: changes.whatsapp_webhook_verify_token.flatten(),
            status: changes.status.unwrap_or_default(),
        })
    }

    pub fn into_changes(self) -> Result<ChatbotChanges, ValidationErrors> {
        let mut errors = ValidationErrors::default();

        let name = required(&mut errors, "name", self.name, "Chatbot name is required.");
        if let Some(name) = &name {
            max_chars(&mut errors, "name", name, 255, "Chatbot name cannot exceed 255 characters.");
        }

        let description = nullable(self.description);
        let phone = nullable(self.whatsapp_phone_number);
        let token = nullable(self.whatsapp_access_token);
        let verify = nullable(self.whatsapp_webhook_verify_token);

        if let Some(Some(v)) = &description {
            max_chars(&mut errors, "description", v, 1000, "Description cannot exceed 1000 characters.");
        }
        if let Some(Some(v)) = &phone {
            max_chars(
                &mut errors,
                "whatsapp_phone_number",
                v,
                20,
                "WhatsApp phone number cannot exceed 20 characters.",
            );
        }
        if let Some(Some(v)) = &token {
            max_chars(
                &mut errors,
                "whatsapp_access_token",
                v,
                500,
                "WhatsApp access token cannot exceed 500 characters.",
            );
        }
        if let Some(Some(v)) = &verify {
            max_chars(
                &mut errors,
                "whatsapp_webhook_verify_token",
                v,
                255,
                "Webhook verify token cannot exceed 255 characters.",
            );
        }

        let status = one_of::<ChatbotStatus>(
            &mut errors,
            "status",
            self.status,
            "Status must be either active or inactive.",
        );

        errors.finish(|| ChatbotChanges {
            name: name.unwrap_or_default(),
            description,
            whatsapp_phone_number: phone,
            whatsapp_access_token: token,
            whatsapp_webhook_verify_token: verify,
            status,
        })
    }
}

// -- Knowledge bases --

/// A validated upload waiting to be written to storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub original_filename: String,
    pub extension: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewKnowledgeBase {
    pub name: String,
    pub kind: KnowledgeBaseType,
    pub content: Option<String>,
    pub upload: Option<Upload>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeBaseChanges {
    pub name: String,
    pub content: Option<Option<String>>,
    pub status: Option<KnowledgeBaseStatus>,
}

impl KnowledgeBaseForm {
    /// Without a file the submitted `type` is kept (text when none was
    /// sent); with a file the extension decides.
    pub fn into_new(self) -> Result<NewKnowledgeBase, ValidationErrors> {
        let mut errors = ValidationErrors::default();

        let name = required(&mut errors, "name", self.name, "Knowledge base name is required.");
        if let Some(name) = &name {
            max_chars(
                &mut errors,
                "name",
                name,
                255,
                "Knowledge base name cannot exceed 255 characters.",
            );
        }

        let kind = one_of::<KnowledgeBaseType>(
            &mut errors,
            "type",
            self.kind,
            "Type must be pdf, excel, or text.",
        );

        let upload = self.file.and_then(|file| validate_upload(&mut errors, file));
        let content = blank_to_none(self.content);

        errors.finish(|| {
            let kind = match &upload {
                Some(upload) => KnowledgeBaseType::from_extension(&upload.extension),
                None => kind.unwrap_or(KnowledgeBaseType::Text),
            };
            NewKnowledgeBase {
                name: name.unwrap_or_default(),
                kind,
                content,
                upload,
            }
        })
    }
}

impl UpdateKnowledgeBaseRequest {
    pub fn into_changes(self) -> Result<KnowledgeBaseChanges, ValidationErrors> {
        let mut errors = ValidationErrors::default();

        let name = required(&mut errors, "name", self.name, "Knowledge base name is required.");
        if let Some(name) = &name {
            max_chars(
                &mut errors,
                "name",
                name,
                255,
                "Knowledge base name cannot exceed 255 characters.",
            );
        }

        let status = one_of::<KnowledgeBaseStatus>(
            &mut errors,
            "status",
            self.status,
            "Status must be processing, ready, or error.",
        );

        errors.finish(|| KnowledgeBaseChanges {
            name: name.unwrap_or_default(),
            content: nullable(self.content),
            status,
        })
    }
}

fn validate_upload(
    errors: &mut ValidationErrors,
    file: crate::api::UploadedFile,
) -> Option<Upload> {
    // Browsers may send a full client path; only the last component is kept.
    let original_filename = file
        .filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();
    let extension = Path::new(&original_filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let mut ok = true;
    if !UPLOAD_EXTENSIONS.contains(&extension.as_str()) {
        errors.add("file", "File must be a PDF, Excel, CSV, or text file.");
        ok = false;
    }
    if file.bytes.len() > MAX_UPLOAD_BYTES {
        errors.add("file", UPLOAD_TOO_LARGE);
        ok = false;
    }

    ok.then_some(Upload {
        original_filename,
        extension,
        bytes: file.bytes,
    })
}

// -- Rules --

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn nullable(value: Option<Option<String>>) -> Option<Option<String>> {
    value.map(blank_to_none)
}

fn required(
    errors: &mut ValidationErrors,
    field: &str,
    value: Option<String>,
    message: &str,
) -> Option<String> {
    let value = blank_to_none(value);
    if value.is_none() {
        errors.add(field, message);
    }
    value
}

fn max_chars(errors: &mut ValidationErrors, field: &str, value: &str, max: usize, message: &str) {
    if value.chars().count() > max {
        errors.add(field, message);
    }
}

fn one_of<T: std::str::FromStr>(
    errors: &mut ValidationErrors,
    field: &str,
    value: Option<String>,
    message: &str,
) -> Option<T> {
    let value = value?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            errors.add(field, message);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::UploadedFile;

    fn form(name: &str, file: Option<(&str, usize)>) -> KnowledgeBaseForm {
        KnowledgeBaseForm {
            name: Some(name.to_string()),
            file: file.map(|(filename, size)| UploadedFile {
                filename: filename.to_string(),
                bytes: vec![b'x'; size],
            }),
            ..Default::default()
        }
    }

    #[test]
    fn chatbot_name_is_required() {
        let errors = ChatbotRequest::default().into_new().unwrap_err();
        assert!(errors.has("name"));
        assert_eq!(errors.messages("name"), ["Chatbot name is required."]);

        let blank = ChatbotRequest {
            name: Some("   ".into()),
            ..Default::default()
        };
        assert!(blank.into_new().unwrap_err().has("name"));
    }

    #[test]
    fn chatbot_status_defaults_to_active() {
        let req = ChatbotRequest {
            name: Some("Support".into()),
            ..Default::default()
        };
        let new = req.into_new().unwrap();
        assert_eq!(new.status, ChatbotStatus::Active);
        assert_eq!(new.name, "Support");
    }

    #[test]
    fn chatbot_field_limits() {
        let req = ChatbotRequest {
            name: Some("n".repeat(256)),
            description: Some(Some("d".repeat(1001))),
            whatsapp_phone_number: Some(Some("1".repeat(21))),
            whatsapp_access_token: Some(Some("t".repeat(501))),
            whatsapp_webhook_verify_token: Some(Some("v".repeat(256))),
            status: Some("paused".into()),
        };
        let errors = req.into_changes().unwrap_err();
        for field in [
            "name",
            "description",
            "whatsapp_phone_number",
            "whatsapp_access_token",
            "whatsapp_webhook_verify_token",
            "status",
        ] {
            assert!(errors.has(field), "missing error for {field}");
        }
    }

    #[test]
    fn limits_count_characters_not_bytes() {
        let req = ChatbotRequest {
            name: Some("é".repeat(255)),
            ..Default::default()
        };
        assert!(req.into_changes().is_ok());
    }

    #[test]
    fn update_keeps_absent_fields_and_clears_nulls() {
        let req = ChatbotRequest {
            name: Some("Renamed".into()),
            description: Some(None),
            whatsapp_phone_number: Some(Some("".into())),
            ..Default::default()
        };
        let changes = req.into_changes().unwrap();
        assert_eq!(changes.description, Some(None));
        assert_eq!(changes.whatsapp_phone_number, Some(None));
        assert_eq!(changes.whatsapp_access_token, None);
        assert_eq!(changes.status, None);
    }

    #[test]
    fn uploaded_pdf_overrides_submitted_type() {
        let mut f = form("Manual", Some(("report.pdf", 1000)));
        f.kind = Some("text".into());
        let new = f.into_new().unwrap();
        assert_eq!(new.kind, KnowledgeBaseType::Pdf);
        assert_eq!(new.upload.unwrap().original_filename, "report.pdf");
    }

    #[test]
    fn csv_upload_is_excel() {
        let new = form("Prices", Some(("data.csv", 10))).into_new().unwrap();
        assert_eq!(new.kind, KnowledgeBaseType::Excel);
    }

    #[test]
    fn client_path_is_stripped_from_filename() {
        let new = form("Prices", Some(("C:\\Users\\me\\Sheet.XLSX", 10)))
            .into_new()
            .unwrap();
        let upload = new.upload.unwrap();
        assert_eq!(upload.original_filename, "Sheet.XLSX");
        assert_eq!(upload.extension, "xlsx");
        assert_eq!(new.kind, KnowledgeBaseType::Excel);
    }

    #[test]
    fn oversized_upload_is_rejected() {
        let errors = form("Large", Some(("large.pdf", MAX_UPLOAD_BYTES + 1)))
            .into_new()
            .unwrap_err();
        assert_eq!(errors.messages("file"), ["File size cannot exceed 10MB."]);

        assert!(form("Edge", Some(("edge.pdf", MAX_UPLOAD_BYTES))).into_new().is_ok());
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let errors = form("Bad", Some(("test.exe", 10))).into_new().unwrap_err();
        assert!(errors.has("file"));
        let errors = form("Bad", Some(("README", 10))).into_new().unwrap_err();
        assert!(errors.has("file"));
    }

    #[test]
    fn text_only_knowledge_base_keeps_submitted_type() {
        let mut f = form("FAQ", None);
        f.content = Some("Hello".into());
        let new = f.into_new().unwrap();
        assert_eq!(new.kind, KnowledgeBaseType::Text);
        assert_eq!(new.content.as_deref(), Some("Hello"));
        assert!(new.upload.is_none());

        let mut f = form("Sheet", None);
        f.kind = Some("excel".into());
        assert_eq!(f.into_new().unwrap().kind, KnowledgeBaseType::Excel);
    }

    #[test]
    fn bad_type_is_rejected() {
        let mut f = form("FAQ", None);
        f.kind = Some("docx".into());
        assert!(f.into_new().unwrap_err().has("type"));
    }

    #[test]
    fn knowledge_base_update_rules() {
        let errors = UpdateKnowledgeBaseRequest {
            name: None,
            content: None,
            status: Some("done".into()),
        }
        .into_changes()
        .unwrap_err();
        assert!(errors.has("name"));
        assert_eq!(errors.messages("status"), ["Status must be processing, ready, or error."]);

        let changes = UpdateKnowledgeBaseRequest {
            name: Some("FAQ".into()),
            content: Some(None),
            status: Some("ready".into()),
        }
        .into_changes()
        .unwrap();
        assert_eq!(changes.status, Some(KnowledgeBaseStatus::Ready));
        assert_eq!(changes.content, Some(None));
    }
}
