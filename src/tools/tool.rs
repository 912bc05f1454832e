//! Tool definitions served to the peer.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::BoxError;

/// A content item of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text {
        text: String,
    },
    Image {
        /// Base64 encoded image data.
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: Value,
    },
}

/// Result returned to the peer for a tool call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// A result the model sees as a failed call.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }
}

/// Why a handler call produced no result.
#[derive(Debug)]
pub(crate) enum ToolCallError {
    /// Arguments did not fit the declared input type.
    InvalidArguments(String),
    /// The handler returned an error.
    Failed(BoxError),
}

type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<ToolResult, ToolCallError>> + Send + Sync>;

/// A named, described tool with a typed handler.
///
/// ```
/// use claude_query::tools::{Tool, ToolResult};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct AddArgs {
///     a: f64,
///     b: f64,
/// }
///
/// let add = Tool::new(
///     "add",
///     "Add two numbers",
///     serde_json::json!({
///         "type": "object",
///         "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
///         "required": ["a", "b"]
///     }),
///     |args: AddArgs| async move {
///         Ok::<_, claude_query::BoxError>(ToolResult::text((args.a + args.b).to_string()))
///     },
/// );
/// assert_eq!(add.name(), "add");
/// ```
#[derive(Clone)]
pub struct Tool {
    name: String,
    description: String,
    input_schema: Value,
    handler: Handler,
}

impl Tool {
    /// Create a tool whose arguments decode into `I`.
    ///
    /// `input_schema` is advertised to the peer; `I` is what arguments are
    /// validated against before the handler runs.
    pub fn new<I, F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResult, BoxError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            handler: Arc::new(move |args: Value| match serde_json::from_value::<I>(args) {
                Ok(input) => handler(input)
                    .map(|result| result.map_err(ToolCallError::Failed))
                    .boxed(),
                Err(e) => futures::future::ready(Err(ToolCallError::InvalidArguments(e.to_string()))).boxed(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    pub(crate) async fn invoke(&self, args: Value) -> Result<ToolResult, ToolCallError> {
        (self.handler)(args).await
    }

    /// Entry in a `tools/list` response.
    pub(crate) fn to_tool_info(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema,
        })
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}
