//! Upstream payload model, field normalization, reference resolution and the
//! external vehicle source.

pub mod ev_catalog;
pub mod mapper;
pub mod normalize;
pub mod raw;
pub mod reference;
pub mod source;

pub use mapper::{map_vehicle, to_external_payload, MapError};
pub use normalize::ExtrasKind;
pub use raw::{RawField, RawVehicle, VehiclePage};
pub use reference::ReferenceSnapshot;
pub use source::{
    FixtureVehicleSource, HttpVehicleSource, MemoryVehicleSource, SourceError, VehicleSource,
};

pub const CRATE_NAME: &str = "vehisync-adapters";
