pub mod cli;
pub mod diff;
pub mod json;

pub use cli::*;
pub use diff::*;
pub use json::*;

// nft JSON transport, listing parser and chain diffs
