use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A file attached to a user entry, such as a camera snapshot.
///
/// The file itself is owned by the host; it is only read when a request is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub path: PathBuf,
    pub mime_type: String,
}

impl Attachment {
    pub fn new<P: Into<PathBuf>, M: Into<String>>(path: P, mime_type: M) -> Self {
        Self {
            path: path.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Create an attachment guessing the mime type from the file extension
    pub fn from_path<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let mime_type = guess_mime_type(&path).to_string();
        Self { path, mime_type }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Guess a mime type from the file extension, falling back to octet-stream
pub fn guess_mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => OCTET_STREAM,
    }
}
