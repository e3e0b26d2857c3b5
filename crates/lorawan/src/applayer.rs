pub mod fragmentation;
pub mod multicastsetup;
