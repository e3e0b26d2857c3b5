mod application;
mod device;
mod fuota;
mod multicast_group;
mod remote;
mod result;

pub use application::*;
pub use device::*;
pub use fuota::*;
pub use multicast_group::*;
pub use remote::*;
pub use result::*;
