pub mod request;
pub mod response;
pub mod types;

pub use request::CreateChatCompletionRequestBody;
pub use response::{
    ChatChoice, ChatCompletionResponse, ChatDelta, ChatStreamChoice, ChatStreamChunk,
    ResponseMessage,
};
pub use types::{ChatMessage, ContentPart, ImageUrl, MessageContent};
