pub mod client;
pub mod decoder;
pub mod events;
pub mod log;
pub mod messages;
pub mod transport;

pub use client::LiveClient;
pub use events::{CloseCategory, CloseInfo, ConnectionState, ServerEvent};
pub use log::{LogFilter, LogLevel, LogSink, MemoryLogSink, StreamingLog, TracingLogSink};
pub use messages::{
    ClientMessage, Content, FunctionCall, FunctionResponse, Part, SetupMessage, ToolCall,
    ToolResponse,
};
pub use transport::{Channel, Connector, InboundFrame, WebSocketConnector, DEFAULT_ENDPOINT};
