pub mod btc;
pub mod forwarder;
pub mod host;
pub mod runtime;

pub use btc::client::BitcoinRpc;
pub use btc::options::RpcClientOptions;
pub use btc::types::{Header, RAW_HEADER_LEN};
pub use btc::{BtcChain, RpcError};
pub use forwarder::queue::{header_queue, HeaderReceiver, HeaderSender, QueuePoll};
pub use forwarder::{
    Forwarder, ForwarderOptions, DIFFICULTY_EPOCH_DURATION, HEADERS_BATCH_SIZE, HEADERS_QUEUE_SIZE,
};
pub use host::client::HostRpc;
pub use host::{HostChain, HostError};
pub use runtime::config::{RelayConfig, RelayConfigBuilder};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
