use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

/// Data URI payload for the vision service: `data:image/<ext>;base64,<bytes>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    mime_type: String,
    data_url: String,
}

impl EncodedImage {
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn data_url(&self) -> &str {
        &self.data_url
    }

    /// Length of the base64 body, without the `data:` prefix.
    pub fn payload_len(&self) -> usize {
        self.data_url.len() - self.data_url.find(',').map(|idx| idx + 1).unwrap_or(0)
    }
}

/// The extension is trusted as declared; a `.jpg` holding PNG bytes yields a
/// mislabeled but well-formed data URI.
pub fn encode(bytes: &[u8], extension: &str) -> EncodedImage {
    let ext = extension.trim().trim_start_matches('.');
    let mime_type = format!("image/{ext}");
    let data_url = format!("data:{mime_type};base64,{}", BASE64.encode(bytes));
    EncodedImage {
        mime_type,
        data_url,
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;

    use super::{encode, BASE64};
    use crate::test_support::png_bytes;

    #[test]
    fn formats_data_uri_with_declared_extension() {
        let encoded = encode(b"abc", ".png");
        assert_eq!(encoded.data_url(), "data:image/png;base64,YWJj");
        assert_eq!(encoded.mime_type(), "image/png");
        assert_eq!(encoded.payload_len(), 4);

        let encoded = encode(b"abc", "jpeg");
        assert_eq!(encoded.data_url(), "data:image/jpeg;base64,YWJj");
    }

    #[test]
    fn extension_is_not_normalized() {
        assert_eq!(encode(b"", "JPG").data_url(), "data:image/JPG;base64,");
    }

    #[test]
    fn encoding_is_deterministic_and_reversible() -> anyhow::Result<()> {
        let bytes = png_bytes(3, 2)?;
        let first = encode(&bytes, "png");
        let second = encode(&bytes, "png");
        assert_eq!(first, second);

        let body = first
            .data_url()
            .strip_prefix("data:image/png;base64,")
            .unwrap_or_default();
        assert_eq!(BASE64.decode(body)?, bytes);
        Ok(())
    }
}
