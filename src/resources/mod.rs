//! Concrete Scaleway components.

pub mod availability_zones;
pub mod block_volume;
pub mod config;
pub mod key_manager;

pub use availability_zones::AvailabilityZones;
pub use block_volume::{BlockVolume, BlockVolumeDataSource};
pub use config::{ConfigDataSource, ConfigEphemeral};
pub use key_manager::RotateKey;
