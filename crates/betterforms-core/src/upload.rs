//! Uploaded files.
//!
//! Multipart parsing belongs to the HTTP layer; forms only see the parsed
//! result as a [`FileDict`] keyed by prefixed field name, shared by every
//! sub-form the same way submitted field data is.

use crate::utils::MultiValueDict;

/// An uploaded file from a multipart form submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// The original filename as provided by the client.
    pub name: String,
    /// The MIME content type of the file.
    pub content_type: String,
    /// The raw file content.
    pub content: Vec<u8>,
}

impl UploadedFile {
    /// Creates a new uploaded file.
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            content: content.into(),
        }
    }

    /// The size of the file content in bytes.
    pub fn size(&self) -> usize {
        self.content.len()
    }

    /// The lowercased extension of the filename, if any.
    pub fn extension(&self) -> Option<String> {
        self.name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .filter(|ext| !ext.is_empty())
    }
}

/// Uploaded files keyed by field name.
pub type FileDict = MultiValueDict<String, UploadedFile>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uploaded_file_size_and_extension() {
        let file = UploadedFile::new("Avatar.PNG", "image/png", vec![1_u8, 2, 3]);
        assert_eq!(file.size(), 3);
        assert_eq!(file.extension().as_deref(), Some("png"));
    }

    #[test]
    fn test_uploaded_file_without_extension() {
        let file = UploadedFile::new("README", "text/plain", b"hi".to_vec());
        assert_eq!(file.extension(), None);
        let dotted = UploadedFile::new("trailing.", "text/plain", Vec::new());
        assert_eq!(dotted.extension(), None);
    }

    #[test]
    fn test_file_dict_collects_by_field() {
        let files: FileDict = [
            ("docs-attachment".to_string(), UploadedFile::new("a.pdf", "application/pdf", Vec::new())),
            ("docs-attachment".to_string(), UploadedFile::new("b.pdf", "application/pdf", Vec::new())),
        ]
        .into_iter()
        .collect();
        assert_eq!(files.get_list("docs-attachment").map(Vec::len), Some(2));
    }
}
