//! Service layer

pub mod channel_list;
pub mod encoder_miner;
pub mod filename_parser;
pub mod history;
pub mod post_renderer;
pub mod rate_limiter;
pub mod registry;
pub mod scanner;
pub mod telegram;

pub use channel_list::parse_channel_list;
pub use history::{HistoryStreamer, StreamerConfig};
pub use registry::ScanRegistry;
pub use scanner::{MineSummary, ScanService, ScanSummary};
pub use telegram::{
    ChannelMessage, FetchError, HistoryClient, MediaDescriptor, PostPublisher, TelegramGateway,
};
