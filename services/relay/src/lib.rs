//! Attachment Relay
//!
//! Chat bot that copies every file attached to a Discord message into a Google
//! Drive folder and replies in the channel with a link to the stored copy.
//!
//! ## Features
//!
//! - **Per-attachment isolation**: a failed download or upload is reported for
//!   that file only; later attachments in the same message still go through
//! - **Resumable uploads**: files are sent to Drive in ranged chunks over a
//!   resumable session, resuming from the offset the server confirmed
//! - **Bounded local footprint**: each attachment is staged on disk only while
//!   its upload is in flight
//! - **Liveness endpoint**: `GET /` answers while the bot is running
//!
//! ## Architecture
//!
//! ```text
//! Discord gateway            Staging dir              Google Drive
//! ┌──────────────┐          ┌──────────────┐         ┌──────────────┐
//! │ Discord      │          │ {filename}   │         │ folder       │
//! │ Listener     │          └──────────────┘         │   {file}     │
//! └──────────────┘             ▲        │            └──────────────┘
//!        │                     │        │                   ▲
//!        ▼                     │        ▼                   │
//! ┌──────────────┐      ┌──────────────┐  ┌──────────────┐  │
//! │ Relay        │─────▶│ Attachment   │  │ Drive        │──┘
//! │ Handler      │      │ Fetcher      │  │ Uploader     │
//! └──────────────┘      └──────────────┘  └──────────────┘
//!        │
//!        ▼
//!   channel reply
//! ```

pub mod attachment;
pub mod config;
pub mod discord_listener;
pub mod drive_auth;
pub mod drive_uploader;
pub mod fetcher;
pub mod liveness;
pub mod mime_type;
pub mod relay_handler;
pub mod reply;
pub mod staging;

pub use crate::attachment::{AttachmentDescriptor, InboundMessage, UploadRequest, UploadedFile};
pub use crate::config::Config;
pub use crate::discord_listener::{DiscordListener, DiscordReplier, ListenerError};
pub use crate::drive_auth::{ServiceAccountKey, ServiceAccountTokens, TokenSource};
pub use crate::drive_uploader::{DriveError, DriveUploader, StorageClient};
pub use crate::fetcher::{AttachmentFetcher, FetchOutcome, HttpFetcher};
pub use crate::relay_handler::{AttachmentOutcome, RelayError, RelayHandler};
pub use crate::reply::{ChatReplier, ReplyError};
pub use crate::staging::StagingArea;
