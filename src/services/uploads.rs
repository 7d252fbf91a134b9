use actix_multipart::Multipart;
use futures::TryStreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::config::StorageConfig;

const MAX_TEXT_FIELD: usize = 16 * 1024;

/// A multipart file spooled to local disk. The file is removed when this is
/// dropped, whether or not it was ever forwarded to the media provider.
#[derive(Debug)]
pub struct TempUpload {
    pub file_name: String,
    pub path: PathBuf,
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Removed local: {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::error!(
                "Error while removing local file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Text fields and spooled files of one multipart request.
#[derive(Debug, Default)]
pub struct MultipartForm {
    fields: HashMap<String, String>,
    files: HashMap<String, TempUpload>,
}

impl MultipartForm {
    pub async fn read(mut payload: Multipart, storage: &StorageConfig) -> Result<Self, ApiError> {
        let temp_dir = Path::new(&storage.temp_dir);
        fs::create_dir_all(temp_dir).await.map_err(|e| {
            log::error!("Failed to create temp directory: {}", e);
            ApiError::Internal(e.into())
        })?;

        let mut form = MultipartForm::default();

        while let Some(mut field) = payload.try_next().await.map_err(multipart_error)? {
            let content_disposition = field
                .content_disposition()
                .ok_or_else(|| ApiError::bad_request("No content disposition"))?;
            let name = content_disposition
                .get_name()
                .ok_or_else(|| ApiError::bad_request("No field name"))?
                .to_owned();
            let file_name = content_disposition.get_filename().map(sanitize_file_name);

            match file_name {
                Some(file_name) => {
                    let path = temp_dir.join(format!("{}-{}", Uuid::new_v4(), file_name));
                    // Registered before writing so a failed write still cleans up.
                    let upload = TempUpload {
                        file_name,
                        path: path.clone(),
                    };
                    let mut f = fs::File::create(&path).await.map_err(|e| {
                        log::error!("Failed to open file: {}", e);
                        ApiError::Internal(e.into())
                    })?;

                    let mut written = 0usize;
                    while let Some(chunk) = field.try_next().await.map_err(multipart_error)? {
                        written += chunk.len();
                        if written > storage.max_file_size {
                            return Err(ApiError::bad_request(format!(
                                "{} exceeds the maximum upload size",
                                name
                            )));
                        }
                        f.write_all(&chunk).await.map_err(|e| {
                            log::error!("Error writing chunk: {}", e);
                            ApiError::Internal(e.into())
                        })?;
                    }
                    f.flush().await.map_err(|e| ApiError::Internal(e.into()))?;

                    form.files.insert(name, upload);
                }
                None => {
                    let mut value = Vec::new();
                    while let Some(chunk) = field.try_next().await.map_err(multipart_error)? {
                        if value.len() + chunk.len() > MAX_TEXT_FIELD {
                            return Err(ApiError::bad_request(format!("{} is too long", name)));
                        }
                        value.extend_from_slice(&chunk);
                    }
                    let value = String::from_utf8(value)
                        .map_err(|_| ApiError::bad_request(format!("{} must be UTF-8", name)))?;
                    form.fields.insert(name, value);
                }
            }
        }

        Ok(form)
    }

    /// Trimmed, non-empty text field.
    pub fn text(&self, name: &str) -> Option<String> {
        crate::api::shared::non_blank(self.fields.get(name).map(String::as_str))
    }

    pub fn take_file(&mut self, name: &str) -> Option<TempUpload> {
        self.files.remove(name)
    }
}

fn multipart_error(error: actix_multipart::MultipartError) -> ApiError {
    ApiError::bad_request(format!("Invalid multipart payload: {}", error))
}

/// Keeps only a safe basename for the spooled copy.
fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_reduced_to_a_safe_basename() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\videos\\my clip.mp4"), "my_clip.mp4");
        assert_eq!(sanitize_file_name(".."), "upload");
        assert_eq!(sanitize_file_name(""), "upload");
    }

    #[test]
    fn dropping_a_temp_upload_removes_the_file() {
        let path = std::env::temp_dir().join(format!("videotube-test-{}", Uuid::new_v4()));
        std::fs::write(&path, b"bytes").unwrap();
        let upload = TempUpload {
            file_name: "clip.mp4".into(),
            path: path.clone(),
        };
        drop(upload);
        assert!(!path.exists());
    }

    #[test]
    fn text_fields_are_trimmed() {
        let mut form = MultipartForm::default();
        form.fields.insert("title".into(), "  Hello  ".into());
        form.fields.insert("description".into(), "   ".into());
        assert_eq!(form.text("title").as_deref(), Some("Hello"));
        assert_eq!(form.text("description"), None);
        assert_eq!(form.text("missing"), None);
    }
}
