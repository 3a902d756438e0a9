//! Built-in job types.

mod block_ip;
mod hash;

pub use block_ip::{BLOCK_IP, BlockIpHandler};
pub use hash::{HASH, HashHandler};
