//! Concrete pipeline consumers: the visibility consumer (C9) that the
//! geo-visibility consumer's precondition names, the geo-visibility
//! consumer itself (C6), and the geolocation provider it depends on.

pub mod geo_provider;
pub mod geo_visibility;
pub mod visibility;

pub use geo_provider::{CountryCode, CountryInfo, GeoProvider, GeoRecord, StaticGeoProvider};
pub use geo_visibility::GeoVisibilityConsumer;
pub use visibility::VisibilityConsumer;
