use serde::Deserialize;
use std::path::PathBuf;

/// Inbound chat message as seen by the relay handler
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    /// Platform message id
    pub message_id: u64,
    /// Author identity
    pub author_id: u64,
    /// Author display name (logging only)
    pub author_name: String,
    /// Channel the message was posted in; replies go here
    pub channel_id: u64,
    /// Attachments in the order the platform listed them
    #[serde(default)]
    pub attachments: Vec<AttachmentDescriptor>,
}

impl InboundMessage {
    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }
}

/// A file attached to a chat message
#[derive(Debug, Clone, Deserialize)]
pub struct AttachmentDescriptor {
    /// Remote URL the bytes are fetched from
    pub url: String,
    /// Filename declared by the uploader
    pub filename: String,
    /// Content type declared by the platform, if any
    #[serde(default)]
    pub content_type: Option<String>,
    /// Declared size in bytes, if known
    #[serde(default)]
    pub size: Option<u64>,
}

/// Everything the storage client needs to create one file
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    /// Staged local copy of the attachment
    pub path: PathBuf,
    /// Name the file is created under
    pub file_name: String,
    /// Resolved MIME type
    pub mime_type: String,
    /// Parent folder id
    pub folder_id: String,
}

/// File created by the storage client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Storage-side file id
    pub id: String,
    /// Shareable link to the file
    pub link: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_inbound_message() {
        let json = r#"{
            "message_id": 1,
            "author_id": 42,
            "author_name": "alice",
            "channel_id": 7,
            "attachments": [{
                "url": "https://cdn.example.com/report.pdf",
                "filename": "report.pdf",
                "content_type": "application/pdf"
            }]
        }"#;

        let message: InboundMessage = serde_json::from_str(json).unwrap();
        assert!(message.has_attachments());
        assert_eq!(message.attachments[0].filename, "report.pdf");
        assert_eq!(message.attachments[0].size, None);
    }

    #[test]
    fn test_message_without_attachments() {
        let json = r#"{"message_id":1,"author_id":2,"author_name":"bob","channel_id":3}"#;
        let message: InboundMessage = serde_json::from_str(json).unwrap();
        assert!(!message.has_attachments());
    }
}
