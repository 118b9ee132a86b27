// @generated
// Generated from: proto/telemetry.proto
// Manual check-in for offline builds.

/// Raw telemetry record as produced by the ingestion service.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Telemetry {
    #[prost(string, tag = "1")]
    pub device_id: ::prost::alloc::string::String,
    #[prost(int64, tag = "2")]
    pub ts: i64,
    #[prost(map = "string, double", tag = "3")]
    pub metrics: ::std::collections::HashMap<::prost::alloc::string::String, f64>,
    #[prost(bytes = "vec", tag = "4")]
    pub raw: ::prost::alloc::vec::Vec<u8>,
}
