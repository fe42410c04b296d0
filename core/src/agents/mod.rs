pub mod config;
pub mod contract;
pub mod providers;
pub mod registry;
pub mod vendors;

pub use config::{AiConfig, ProviderCapabilities, ProviderId, ProviderSettings};
pub use contract::{
    AiResponse, ChunkSink, MediaKind, MediaReference, MediaSource, Message, MultimodalInput,
    ProviderContract, Role, Usage,
};
pub use registry::ProviderRegistry;
pub use vendors::HttpProvider;
