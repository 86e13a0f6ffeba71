pub mod chain;
pub mod codec;
pub mod document;
pub mod error;
pub mod expr;
pub mod kernel;
pub mod memory;
pub mod registry;
pub mod rule;
pub mod status;
pub mod table;
pub mod transaction;
pub mod transport;

pub use chain::*;
pub use document::*;
pub use error::{DecodeError, EncodeError, Error, Result, TransportError};
pub use expr::*;
pub use memory::*;
pub use registry::*;
pub use rule::*;
pub use status::*;
pub use table::*;
pub use transaction::*;
pub use transport::*;

// Typed nftables model with a batching transaction layer
