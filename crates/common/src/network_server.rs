mod client;
mod pool;
mod traits;

pub use client::*;
pub use pool::*;
pub use traits::*;
