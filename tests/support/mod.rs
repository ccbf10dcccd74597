pub mod mock_chain;
pub mod mock_rpc;
