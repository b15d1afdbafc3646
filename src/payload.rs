use serde::{Deserialize, Serialize};

/// A file submitted for execution. Keys match the upload service's wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadDescriptor {
    /// Content identifier; names the uploaded file on the host
    #[serde(rename = "fileid")]
    pub file_id: String,
    /// Name the file gets inside the sandbox
    #[serde(rename = "filename")]
    pub file_name: String,
    /// Free-form content type, e.g. "text/x-python"
    #[serde(rename = "filetype")]
    pub file_type: String,
}

/// How a payload is executed inside the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentCategory {
    Python,
    Bash,
    Other,
}

impl PayloadDescriptor {
    pub fn new(
        file_id: impl Into<String>,
        file_name: impl Into<String>,
        file_type: impl Into<String>,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            file_name: file_name.into(),
            file_type: file_type.into(),
        }
    }

    /// Python wins over bash when the type mentions both.
    pub fn category(&self) -> ContentCategory {
        if self.file_type.contains("python") {
            ContentCategory::Python
        } else if self.file_type.contains("bash") {
            ContentCategory::Bash
        } else {
            ContentCategory::Other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_from_file_type() {
        assert_eq!(
            PayloadDescriptor::new("1", "a.py", "text/x-python").category(),
            ContentCategory::Python
        );
        assert_eq!(
            PayloadDescriptor::new("2", "a.sh", "application/x-bash").category(),
            ContentCategory::Bash
        );
        assert_eq!(
            PayloadDescriptor::new("3", "a.out", "application/octet-stream").category(),
            ContentCategory::Other
        );
        assert_eq!(
            PayloadDescriptor::new("4", "x", "python-bash").category(),
            ContentCategory::Python
        );
    }

    #[test]
    fn test_wire_keys() {
        let json = r#"{"fileid":"abc","filename":"run.sh","filetype":"bash"}"#;
        let payload: PayloadDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(payload.file_id, "abc");
        assert_eq!(payload.file_name, "run.sh");
        assert_eq!(payload.category(), ContentCategory::Bash);
    }
}
