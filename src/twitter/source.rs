use futures_util::stream::BoxStream;

use crate::config::HarvesterConfig;
use crate::credentials::AccessToken;
use crate::event::Event;

/// Live stream of decoded events.
///
/// An `Err` item is a transient failure (decode error, disconnect notice,
/// transport error). The end of the stream means the server closed it.
pub type EventStream = BoxStream<'static, anyhow::Result<Event>>;

/// Opens filtered streams.
///
/// This is the abstraction layer between:
/// - The generic worker runtime (connect, backoff, forward)
/// - The concrete streaming API
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - One connector instance is shared by every worker
///
#[async_trait::async_trait]
pub trait StreamConnector: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Opens one stream filtered to `config.bounding_box`, authenticated
    /// as `config.account`.
    ///
    /// A rejected request (non-2xx, network failure) is an `Err`; the
    /// caller decides whether and when to retry.
    async fn connect(
        &self,
        config: &HarvesterConfig,
        token: &AccessToken,
    ) -> anyhow::Result<EventStream>;
}
