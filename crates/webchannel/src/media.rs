//! Resumable media uploads.
//!
//! An upload is two requests: a `start` POST that returns a session URL in
//! `x-goog-upload-url`, then one PUT carrying the bytes with
//! `upload, finalize`. The final reply is a base64-encoded binary protobuf
//! `UploadMetadata`, which is handed back undecoded.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{Error, Result};

pub(crate) const UPLOAD_URL_HEADER: &str = "x-goog-upload-url";

/// Query parameters of the `start` request. Empty fields are left out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadMediaQuery {
    pub group_id: Option<String>,
    pub topic_id: Option<String>,
    pub message_id: Option<String>,
    pub otr: Option<bool>,
    pub transcoded_video: Option<bool>,
    pub upload_type: Option<String>,
}

impl UploadMediaQuery {
    /// An attachment for a new message in `group_id`.
    pub fn attachment(group_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        let message_id = message_id.into();
        Self {
            group_id: Some(group_id.into()),
            topic_id: Some(message_id.clone()),
            message_id: Some(message_id),
            otr: Some(false),
            transcoded_video: Some(false),
            upload_type: Some("ATTACHMENT".to_string()),
        }
    }

    pub(crate) fn pairs(&self) -> Vec<(&'static str, String)> {
        let flag = |value: Option<bool>| value.map(|value| value.to_string());
        [
            ("group_id", self.group_id.clone()),
            ("topic_id", self.topic_id.clone()),
            ("message_id", self.message_id.clone()),
            ("otr", flag(self.otr)),
            ("transcoded_video", flag(self.transcoded_video)),
            ("upload_type", self.upload_type.clone()),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.filter(|value| !value.is_empty()).map(|value| (name, value)))
        .collect()
    }
}

/// Serialized `UploadMetadata` protobuf, ready to be attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMetadata {
    pub raw: Vec<u8>,
}

impl UploadMetadata {
    pub(crate) fn from_body(body: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(body)
            .map_err(|_| Error::Upload("finalize reply is not text".to_string()))?;
        let raw = STANDARD
            .decode(text.trim())
            .map_err(|err| Error::Upload(format!("finalize reply is not base64: {err}")))?;
        if raw.is_empty() {
            return Err(Error::Upload("finalize reply is empty".to_string()));
        }
        Ok(Self { raw })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn attachment_query_skips_nothing_it_sets() {
        let query = UploadMediaQuery::attachment("space-1", "msg-1");
        assert_eq!(
            query.pairs(),
            vec![
                ("group_id", "space-1".to_string()),
                ("topic_id", "msg-1".to_string()),
                ("message_id", "msg-1".to_string()),
                ("otr", "false".to_string()),
                ("transcoded_video", "false".to_string()),
                ("upload_type", "ATTACHMENT".to_string()),
            ]
        );
        let sparse = UploadMediaQuery {
            group_id: Some("g".into()),
            upload_type: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(sparse.pairs(), vec![("group_id", "g".to_string())]);
    }

    #[test_timeout::timeout]
    fn finalize_reply_is_base64_protobuf() {
        let metadata = UploadMetadata::from_body(b"CgN4eXo=\n").unwrap();
        assert_eq!(metadata.raw, vec![0x0a, 0x03, b'x', b'y', b'z']);
        assert!(matches!(UploadMetadata::from_body(b"%%%"), Err(Error::Upload(_))));
        assert!(matches!(UploadMetadata::from_body(b"  "), Err(Error::Upload(_))));
    }
}
