//! Driver configuration.

use std::sync::Arc;
use std::time::Duration;

use stratus_common::Credentials;

use crate::trace::DriverTrace;

/// Default interval between background discovery rounds.
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(60);

/// Endpoint selection algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BalancingMethod {
    RoundRobin,
    #[default]
    P2c,
}

/// Configuration of the p2c balancing method.
#[derive(Debug, Clone, Copy, Default)]
pub struct P2cConfig {
    /// Penalize non-local endpoints in the score.
    pub prefer_local: bool,
    /// Penalize endpoints whose average operation time reaches this value.
    pub op_time_threshold: Option<Duration>,
}

/// How a context deadline maps to server-side operation hints when neither
/// `operation_timeout` nor `operation_cancel_after` is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextDeadlineMapping {
    /// Never derive hints from the deadline.
    None,
    /// Remaining time becomes the operation timeout.
    #[default]
    OperationTimeout,
    /// Remaining time becomes the cancel-after hint.
    OperationCancelAfter,
}

/// Background discovery cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscoveryInterval {
    /// [`DEFAULT_DISCOVERY_INTERVAL`].
    #[default]
    Default,
    /// A custom interval. Zero falls back to the default.
    Every(Duration),
    /// No background refresh; the driver stays on its seed endpoint.
    Disabled,
}

impl DiscoveryInterval {
    /// The effective interval, `None` when discovery is disabled.
    pub fn resolve(self) -> Option<Duration> {
        match self {
            DiscoveryInterval::Default => Some(DEFAULT_DISCOVERY_INTERVAL),
            DiscoveryInterval::Every(d) if d.is_zero() => Some(DEFAULT_DISCOVERY_INTERVAL),
            DiscoveryInterval::Every(d) => Some(d),
            DiscoveryInterval::Disabled => None,
        }
    }
}

/// Driver configuration options.
///
/// `database` is the only required field; everything else has a sensible
/// default. Builder-style `with_*` methods allow chaining:
///
/// ```
/// use std::time::Duration;
/// use stratus_driver::DriverConfig;
///
/// let config = DriverConfig::new("/prod/orders")
///     .with_request_timeout(Duration::from_secs(5))
///     .with_prefer_local_endpoints(true);
/// ```
#[derive(Clone)]
pub struct DriverConfig {
    /// Database this driver serves; attached to the metadata of every call.
    pub database: String,

    /// Optional credentials provider contributing the auth header.
    pub credentials: Option<Arc<dyn Credentials>>,

    /// Optional trace sink.
    pub trace: Option<Arc<dyn DriverTrace>>,

    /// Wall-clock cap per `call`. `None` disables the cap.
    pub request_timeout: Option<Duration>,

    /// Wall-clock cap per stream lifetime. `None` disables the cap.
    pub stream_timeout: Option<Duration>,

    /// Server-side soft deadline hint attached to every operation.
    pub operation_timeout: Option<Duration>,

    /// Server-side hard cancellation hint attached to every operation.
    pub operation_cancel_after: Option<Duration>,

    /// Deadline-to-hint mapping used when the two explicit hints are unset.
    pub context_deadline_mapping: ContextDeadlineMapping,

    /// Background discovery cadence.
    pub discovery_interval: DiscoveryInterval,

    /// Endpoint selection algorithm.
    pub balancing_method: BalancingMethod,

    /// Extra configuration of the selected balancing method.
    pub balancing_config: Option<P2cConfig>,

    /// Always prefer local endpoints: as long as at least one local
    /// endpoint is alive it is used regardless of its performance
    /// indicators. Distinct from `P2cConfig::prefer_local`, which only
    /// biases the score.
    pub prefer_local_endpoints: bool,
}

impl DriverConfig {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            credentials: None,
            trace: None,
            request_timeout: None,
            stream_timeout: None,
            operation_timeout: None,
            operation_cancel_after: None,
            context_deadline_mapping: ContextDeadlineMapping::default(),
            discovery_interval: DiscoveryInterval::default(),
            balancing_method: BalancingMethod::default(),
            balancing_config: None,
            prefer_local_endpoints: false,
        }
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn Credentials>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_trace(mut self, trace: Arc<dyn DriverTrace>) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = Some(timeout);
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    pub fn with_operation_cancel_after(mut self, timeout: Duration) -> Self {
        self.operation_cancel_after = Some(timeout);
        self
    }

    pub fn with_context_deadline_mapping(mut self, mapping: ContextDeadlineMapping) -> Self {
        self.context_deadline_mapping = mapping;
        self
    }

    pub fn with_discovery_interval(mut self, interval: DiscoveryInterval) -> Self {
        self.discovery_interval = interval;
        self
    }

    pub fn with_balancing_method(mut self, method: BalancingMethod) -> Self {
        self.balancing_method = method;
        self
    }

    pub fn with_balancing_config(mut self, config: P2cConfig) -> Self {
        self.balancing_config = Some(config);
        self
    }

    pub fn with_prefer_local_endpoints(mut self, prefer: bool) -> Self {
        self.prefer_local_endpoints = prefer;
        self
    }
}
