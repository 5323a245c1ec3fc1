use crate::attachment::{AttachmentDescriptor, InboundMessage, UploadRequest, UploadedFile};
use crate::drive_uploader::{DriveError, StorageClient};
use crate::fetcher::{AttachmentFetcher, FetchError, FetchOutcome};
use crate::mime_type::resolve_mime_type;
use crate::reply::ChatReplier;
use crate::staging::StagingArea;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// Reply sent for every attachment while no storage client is available
pub const STORAGE_UNAVAILABLE_REPLY: &str =
    "Google Drive API is unavailable. Please check the credentials.";

/// Failures inside a single attachment transfer
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("download failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("upload failed: {0}")]
    Upload(#[from] DriveError),
}

/// What happened to one attachment
#[derive(Debug, Clone, PartialEq)]
pub enum AttachmentOutcome {
    /// Stored in Drive
    Uploaded { file_name: String, file: UploadedFile },
    /// The attachment URL answered with a non-success status
    DownloadFailed { file_name: String, status: u16 },
    /// Downloaded, but there is no authenticated storage client
    StorageUnavailable { file_name: String },
    /// Any other error while relaying the attachment
    Failed { file_name: String, reason: String },
}

impl AttachmentOutcome {
    pub fn file_name(&self) -> &str {
        match self {
            Self::Uploaded { file_name, .. }
            | Self::DownloadFailed { file_name, .. }
            | Self::StorageUnavailable { file_name }
            | Self::Failed { file_name, .. } => file_name,
        }
    }

    /// Text posted back to the originating channel
    pub fn reply_text(&self) -> String {
        match self {
            Self::Uploaded { file_name, file } => {
                format!("**{file_name}** uploaded to Google Drive!\nLink: {}", file.link)
            }
            Self::DownloadFailed { file_name, .. } => {
                format!("Failed to download file '{file_name}'.")
            }
            Self::StorageUnavailable { .. } => STORAGE_UNAVAILABLE_REPLY.to_string(),
            Self::Failed { file_name, .. } => {
                format!("An error occurred while uploading file '{file_name}'.")
            }
        }
    }

    fn metric_name(&self) -> &'static str {
        match self {
            Self::Uploaded { .. } => "relay.attachments.uploaded",
            Self::DownloadFailed { .. } => "relay.attachments.download_failed",
            Self::StorageUnavailable { .. } => "relay.attachments.storage_unavailable",
            Self::Failed { .. } => "relay.attachments.failed",
        }
    }
}

/// Relays message attachments into the storage folder
///
/// Each attachment is downloaded into the staging area, uploaded, and its
/// staging file removed before the next one starts. Failures are contained to
/// the attachment they happened on and reported to the channel.
pub struct RelayHandler {
    fetcher: Arc<dyn AttachmentFetcher>,
    /// `None` when authentication failed at startup
    storage: Option<Arc<dyn StorageClient>>,
    staging: StagingArea,
    folder_id: String,
    bot_user_id: OnceLock<u64>,
    /// Serializes messages so replies and staging never interleave
    turn: Mutex<()>,
}

impl RelayHandler {
    pub fn new(
        fetcher: Arc<dyn AttachmentFetcher>,
        storage: Option<Arc<dyn StorageClient>>,
        staging: StagingArea,
        folder_id: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            storage,
            staging,
            folder_id: folder_id.into(),
            bot_user_id: OnceLock::new(),
            turn: Mutex::new(()),
        }
    }

    /// Record the bot's own identity; later calls are ignored
    pub fn set_bot_user_id(&self, user_id: u64) {
        if self.bot_user_id.set(user_id).is_err() {
            debug!(user_id = user_id, "Bot identity already recorded");
        }
    }

    pub fn storage_available(&self) -> bool {
        self.storage.is_some()
    }

    pub fn is_own_message(&self, message: &InboundMessage) -> bool {
        self.bot_user_id.get() == Some(&message.author_id)
    }

    /// Handle one inbound message, replying once per attachment in order
    #[instrument(skip(self, message, replier), fields(message_id = message.message_id, channel_id = message.channel_id))]
    pub async fn handle(
        &self,
        message: &InboundMessage,
        replier: &dyn ChatReplier,
    ) -> Vec<AttachmentOutcome> {
        if self.is_own_message(message) || !message.has_attachments() {
            return Vec::new();
        }

        let _turn = self.turn.lock().await;

        info!(
            author = %message.author_name,
            attachment_count = message.attachments.len(),
            "Received message with attachments"
        );

        let mut outcomes = Vec::with_capacity(message.attachments.len());

        for attachment in &message.attachments {
            let outcome = self.relay_attachment(attachment).await;
            metrics::counter!(outcome.metric_name()).increment(1);

            if let Err(e) = replier
                .send_reply(message.channel_id, &outcome.reply_text())
                .await
            {
                metrics::counter!("relay.replies.failed").increment(1);
                warn!(error = %e, file_name = %outcome.file_name(), "Failed to send reply");
            }

            outcomes.push(outcome);
        }

        outcomes
    }

    /// Relay a single attachment; the staging file is removed on every path
    #[instrument(skip(self, attachment), fields(file_name = %attachment.filename))]
    async fn relay_attachment(&self, attachment: &AttachmentDescriptor) -> AttachmentOutcome {
        let staged = self.staging.stage(&attachment.filename);

        let outcome = match self.transfer(attachment, staged.path()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Failed to relay attachment");
                AttachmentOutcome::Failed {
                    file_name: attachment.filename.clone(),
                    reason: e.to_string(),
                }
            }
        };

        let path = staged.path().to_path_buf();
        match staged.release().await {
            Ok(true) => debug!(path = %path.display(), "Staging file removed"),
            Ok(false) => {}
            Err(e) => {
                metrics::counter!("relay.staging.cleanup_failed").increment(1);
                error!(path = %path.display(), error = %e, "Failed to remove staging file");
            }
        }

        outcome
    }

    async fn transfer(
        &self,
        attachment: &AttachmentDescriptor,
        staged_path: &Path,
    ) -> Result<AttachmentOutcome, RelayError> {
        let file_name = attachment.filename.clone();

        match self.fetcher.fetch(&attachment.url, staged_path).await? {
            FetchOutcome::Rejected { status } => {
                warn!(status = status, "Attachment download failed");
                return Ok(AttachmentOutcome::DownloadFailed { file_name, status });
            }
            FetchOutcome::Stored { bytes } => {
                debug!(size_bytes = bytes, declared_size = ?attachment.size, "Attachment staged");
            }
        }

        let mime_type = resolve_mime_type(&attachment.filename, attachment.content_type.as_deref());

        let Some(storage) = self.storage.as_ref() else {
            warn!("Storage client unavailable, skipping upload");
            return Ok(AttachmentOutcome::StorageUnavailable { file_name });
        };

        let request = UploadRequest {
            path: staged_path.to_path_buf(),
            file_name: file_name.clone(),
            mime_type,
            folder_id: self.folder_id.clone(),
        };

        let started = Instant::now();
        let file = storage.create_file(&request).await?;
        metrics::histogram!("relay.upload.duration_seconds").record(started.elapsed().as_secs_f64());

        info!(
            file_id = %file.id,
            mime_type = %request.mime_type,
            "Attachment uploaded"
        );

        Ok(AttachmentOutcome::Uploaded { file_name, file })
    }
}
