//! Structured error taxonomy for the weft core.
//!
//! Every failure carries a stable numeric code so callers can match on the
//! condition without inspecting message strings. Codes below 2000 are owned
//! by the core; collaborator crates allocate from 2000 upward.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Broad failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The caller misused the API.
    User,
    /// An underlying service failed or produced unusable output.
    Runtime,
    /// A core invariant was violated; indicates a bug in weft itself.
    Internal,
}

/// Stable numeric error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u16)]
pub enum ErrorCode {
    UserInput = 1000,
    ChatCompletionMissingChildren = 1001,
    ChatCompletionUnexpectedChild = 1002,
    ChatModelDoesNotSupportFunctions = 1003,
    ModelOutputCouldNotBeParsed = 1100,
    ModelHallucinatedTool = 1101,
    ProviderApi = 1102,
    ComponentFailed = 1103,
    RenderCancelled = 1104,
    Internal = 1900,
}

impl ErrorCode {
    /// Numeric value of the code.
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Rendering error.
///
/// `Clone` is required so memoized subtrees can replay a cached failure to
/// late-joining consumers.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("invalid input: {message}")]
    UserInput { message: String, data: Value },

    #[error("chat completion element requires children")]
    ChatCompletionMissingChildren { data: Value },

    #[error("unexpected child in chat completion element: {message}")]
    ChatCompletionUnexpectedChild { message: String, data: Value },

    #[error("chat model does not support function calling: {message}")]
    ChatModelDoesNotSupportFunctions { message: String, data: Value },

    #[error("model output could not be parsed: {message}")]
    ModelOutputCouldNotBeParsed { message: String, data: Value },

    #[error("model hallucinated tool '{tool}'")]
    ModelHallucinatedTool { tool: String, data: Value },

    #[error("provider API error: {message}")]
    ProviderApi { message: String, data: Value },

    #[error("component '{component}' failed: {source}")]
    Component {
        component: String,
        #[source]
        source: Box<RenderError>,
    },

    #[error("render cancelled")]
    Cancelled,

    #[error("internal invariant violated: {message}")]
    Internal { message: String },
}

/// Result alias used throughout the crate.
pub type RenderResult<T> = Result<T, RenderError>;

impl RenderError {
    /// Caller misuse with a plain message.
    pub fn user_input(message: impl Into<String>) -> Self {
        Self::UserInput {
            message: message.into(),
            data: Value::Null,
        }
    }

    /// Caller misuse with structured data attached.
    pub fn user_input_with(message: impl Into<String>, data: Value) -> Self {
        Self::UserInput {
            message: message.into(),
            data,
        }
    }

    pub fn missing_children() -> Self {
        Self::ChatCompletionMissingChildren { data: Value::Null }
    }

    pub fn unexpected_child(message: impl Into<String>) -> Self {
        Self::ChatCompletionUnexpectedChild {
            message: message.into(),
            data: Value::Null,
        }
    }

    pub fn functions_not_supported(message: impl Into<String>) -> Self {
        Self::ChatModelDoesNotSupportFunctions {
            message: message.into(),
            data: Value::Null,
        }
    }

    pub fn unparsable_output(message: impl Into<String>, data: Value) -> Self {
        Self::ModelOutputCouldNotBeParsed {
            message: message.into(),
            data,
        }
    }

    pub fn hallucinated_tool(tool: impl Into<String>) -> Self {
        Self::ModelHallucinatedTool {
            tool: tool.into(),
            data: Value::Null,
        }
    }

    pub fn provider_api(message: impl Into<String>) -> Self {
        Self::ProviderApi {
            message: message.into(),
            data: Value::Null,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Attach the failing component name to an error surfacing out of a
    /// component body. Cancellation passes through untouched, and an error
    /// already naming a component is not wrapped again.
    pub fn in_component(self, component: impl Into<String>) -> Self {
        match self {
            Self::Cancelled | Self::Component { .. } => self,
            other => Self::Component {
                component: component.into(),
                source: Box::new(other),
            },
        }
    }

    /// Stable numeric code for this condition.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UserInput { .. } => ErrorCode::UserInput,
            Self::ChatCompletionMissingChildren { .. } => ErrorCode::ChatCompletionMissingChildren,
            Self::ChatCompletionUnexpectedChild { .. } => ErrorCode::ChatCompletionUnexpectedChild,
            Self::ChatModelDoesNotSupportFunctions { .. } => {
                ErrorCode::ChatModelDoesNotSupportFunctions
            }
            Self::ModelOutputCouldNotBeParsed { .. } => ErrorCode::ModelOutputCouldNotBeParsed,
            Self::ModelHallucinatedTool { .. } => ErrorCode::ModelHallucinatedTool,
            Self::ProviderApi { .. } => ErrorCode::ProviderApi,
            Self::Component { .. } => ErrorCode::ComponentFailed,
            Self::Cancelled => ErrorCode::RenderCancelled,
            Self::Internal { .. } => ErrorCode::Internal,
        }
    }

    /// Failure classification.
    pub fn kind(&self) -> ErrorKind {
        match self.code() {
            ErrorCode::UserInput
            | ErrorCode::ChatCompletionMissingChildren
            | ErrorCode::ChatCompletionUnexpectedChild
            | ErrorCode::ChatModelDoesNotSupportFunctions => ErrorKind::User,
            ErrorCode::ModelOutputCouldNotBeParsed
            | ErrorCode::ModelHallucinatedTool
            | ErrorCode::ProviderApi
            | ErrorCode::ComponentFailed
            | ErrorCode::RenderCancelled => ErrorKind::Runtime,
            ErrorCode::Internal => ErrorKind::Internal,
        }
    }

    /// Structured data attached to the condition, if any.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::UserInput { data, .. }
            | Self::ChatCompletionMissingChildren { data }
            | Self::ChatCompletionUnexpectedChild { data, .. }
            | Self::ChatModelDoesNotSupportFunctions { data, .. }
            | Self::ModelOutputCouldNotBeParsed { data, .. }
            | Self::ModelHallucinatedTool { data, .. }
            | Self::ProviderApi { data, .. } => (!data.is_null()).then_some(data),
            Self::Component { .. } | Self::Cancelled | Self::Internal { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(RenderError::user_input("x").code().as_u16(), 1000);
        assert_eq!(RenderError::missing_children().code().as_u16(), 1001);
        assert_eq!(RenderError::unexpected_child("x").code().as_u16(), 1002);
        assert_eq!(RenderError::functions_not_supported("m").code().as_u16(), 1003);
        assert_eq!(
            RenderError::unparsable_output("bad json", Value::Null)
                .code()
                .as_u16(),
            1100
        );
        assert_eq!(RenderError::hallucinated_tool("f").code().as_u16(), 1101);
        assert_eq!(RenderError::provider_api("503").code().as_u16(), 1102);
        assert_eq!(RenderError::Cancelled.code().as_u16(), 1104);
        assert_eq!(RenderError::internal("bug").code().as_u16(), 1900);
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(RenderError::user_input("x").kind(), ErrorKind::User);
        assert_eq!(RenderError::provider_api("x").kind(), ErrorKind::Runtime);
        assert_eq!(RenderError::internal("x").kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_component_wrapping_preserves_inner_and_skips_cancel() {
        let wrapped = RenderError::hallucinated_tool("search").in_component("UseTools");
        assert_eq!(wrapped.code(), ErrorCode::ComponentFailed);
        match &wrapped {
            RenderError::Component { component, source } => {
                assert_eq!(component, "UseTools");
                assert_eq!(source.code(), ErrorCode::ModelHallucinatedTool);
            }
            other => panic!("expected component error, got {:?}", other),
        }
        // double wrap is a no-op
        match wrapped.clone().in_component("Outer") {
            RenderError::Component { component, .. } => assert_eq!(component, "UseTools"),
            other => panic!("expected component error, got {:?}", other),
        }
        assert!(matches!(
            RenderError::Cancelled.in_component("X"),
            RenderError::Cancelled
        ));
    }

    #[test]
    fn test_data_attachment() {
        let err = RenderError::user_input_with("bad prop", json!({"prop": "model"}));
        assert_eq!(err.data(), Some(&json!({"prop": "model"})));
        assert_eq!(RenderError::user_input("bad prop").data(), None);
    }
}
