//! MIME type resolution for relayed attachments.
//!
//! The filename extension is consulted first; the content type declared by the
//! chat platform is only used when the extension is unknown.

use std::path::Path;

/// Used when neither the extension nor the declared hint yields a type
pub const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Resolve the MIME type for an attachment
pub fn resolve_mime_type(file_name: &str, declared: Option<&str>) -> String {
    if let Some(inferred) = mime_from_file_name(file_name) {
        return inferred.to_string();
    }

    declared
        .map(str::trim)
        .filter(|hint| !hint.is_empty())
        .unwrap_or(FALLBACK_MIME_TYPE)
        .to_string()
}

/// Infer a MIME type from the filename extension
pub fn mime_from_file_name(file_name: &str) -> Option<&'static str> {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())?
        .to_lowercase();

    let mime = match ext.as_str() {
        // Images
        "jpg" | "jpeg" | "jpe" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "avif" => "image/avif",
        "bmp" => "image/bmp",
        "ico" => "image/vnd.microsoft.icon",
        "tif" | "tiff" => "image/tiff",
        "heic" => "image/heic",

        // Audio
        "mp3" => "audio/mpeg",
        "ogg" | "oga" => "audio/ogg",
        "wav" => "audio/x-wav",
        "flac" => "audio/flac",
        "m4a" => "audio/mp4",
        "opus" => "audio/opus",
        "aac" => "audio/aac",

        // Video
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "ogv" => "video/ogg",

        // Documents
        "pdf" => "application/pdf",
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "json" => "application/json",
        "xml" => "application/xml",
        "js" => "text/javascript",
        "rtf" => "application/rtf",

        // Office
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "odt" => "application/vnd.oasis.opendocument.text",
        "ods" => "application/vnd.oasis.opendocument.spreadsheet",

        // Archives
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "7z" => "application/x-7z-compressed",
        "rar" => "application/vnd.rar",

        _ => return None,
    };

    Some(mime)
}
