/// Collector module
///
/// This module groups all logic responsible for:
/// - Keeping one filtered-stream connection alive per harvester
/// - Backing off and reconnecting after transient failures
/// - Replacing workers that exhaust their error budget
/// - Routing geotagged events to the publisher
///
/// Design notes:
/// - Stream-API specifics MUST NOT live here (see `twitter`)
/// - Broker specifics MUST NOT live here (see `publisher`)
pub mod backoff;
pub mod supervisor;
pub mod worker;
