// Inbound client control frames
//
// The closed set of frames a client may send over the session channel.
// Unknown `type` values fail deserialization and are answered with a
// per-channel error by the control handler.

use serde::{Deserialize, Serialize};

/// An image attached to a user suggestion, carried base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageAttachment {
    /// Original file name, if the client knows it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// MIME type (e.g. "image/png")
    pub mime_type: String,
    /// Base64-encoded image bytes
    pub data: String,
}

impl ImageAttachment {
    /// Decoded size in bytes, without allocating the decoded buffer.
    ///
    /// Base64 maps 4 input characters to 3 output bytes; padding
    /// characters reduce the final quantum.
    pub fn byte_len(&self) -> usize {
        let data = self.data.trim_end();
        let padding = data.bytes().rev().take_while(|b| *b == b'=').count();
        ((data.len() / 4) * 3).saturating_sub(padding)
    }
}

/// Control frames sent from the client to a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Start (or restart) full generation for the session
    GenerateAll,
    /// Redeploy the current file map to the sandbox preview
    Preview,
    /// Deploy to Cloudflare
    Deploy,
    /// Capture a screenshot of the preview (app sessions only)
    CaptureScreenshot,
    /// Abort the in-flight generation
    StopGeneration,
    /// Resume generation from the first incomplete phase (app sessions only)
    ResumeGeneration,
    /// Queue a user suggestion for the next safe merge point (app sessions only)
    UserSuggestion {
        text: String,
        #[serde(default)]
        images: Vec<ImageAttachment>,
    },
    /// Empty the compact conversation log (the full log is untouched)
    ClearConversation,
    /// Request a `conversation_state` reply
    GetConversationState,
    /// Request a `model_configs_info` reply (app sessions only)
    GetModelConfigs,
    /// Deprecated; answered with an error
    GithubExport,
}

impl ClientFrame {
    /// Frame name as it appears on the wire, for logging and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::GenerateAll => "generate_all",
            ClientFrame::Preview => "preview",
            ClientFrame::Deploy => "deploy",
            ClientFrame::CaptureScreenshot => "capture_screenshot",
            ClientFrame::StopGeneration => "stop_generation",
            ClientFrame::ResumeGeneration => "resume_generation",
            ClientFrame::UserSuggestion { .. } => "user_suggestion",
            ClientFrame::ClearConversation => "clear_conversation",
            ClientFrame::GetConversationState => "get_conversation_state",
            ClientFrame::GetModelConfigs => "get_model_configs",
            ClientFrame::GithubExport => "github_export",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"generate_all"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::GenerateAll));
        assert_eq!(frame.kind(), "generate_all");
    }

    #[test]
    fn test_user_suggestion_defaults_images() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"user_suggestion","text":"make it blue"}"#).unwrap();
        match frame {
            ClientFrame::UserSuggestion { text, images } => {
                assert_eq!(text, "make it blue");
                assert!(images.is_empty());
            }
            _ => panic!("Expected user_suggestion"),
        }
    }

    #[test]
    fn test_unknown_frame_type_is_rejected() {
        let result = serde_json::from_str::<ClientFrame>(r#"{"type":"reboot_universe"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_image_byte_len() {
        // "hello" -> aGVsbG8= (5 bytes, one padding char)
        let image = ImageAttachment {
            filename: None,
            mime_type: "image/png".to_string(),
            data: "aGVsbG8=".to_string(),
        };
        assert_eq!(image.byte_len(), 5);
    }
}
