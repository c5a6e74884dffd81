pub mod index;
pub mod resync;
pub mod servers;
