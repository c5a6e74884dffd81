pub mod memory;
pub mod servers;
