//! Manager configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeouts and retry budget for the transaction manager.
///
/// The defaults mirror the serial API timing of the reference controller
/// stack: 2 s for the controller to accept a request, 5 s for the device
/// acknowledgment, 12 s of grace after an abort before the exchange is
/// finally cancelled, and 5 s for a device's substantive reply unless the
/// transaction overrides it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Timeout for transport-level acceptance (`WaitResponse` phase).
    pub response_timeout: Duration,
    /// Timeout for device-level acknowledgment (`WaitRequest` phase).
    pub request_timeout: Duration,
    /// Grace period after an abort is requested before the transaction is
    /// cancelled; the device may still answer the abort within it.
    pub abort_timeout: Duration,
    /// Default timeout for the device's reply (`WaitData` phase); each
    /// transaction may carry its own.
    pub default_data_timeout: Duration,
    /// Default send-attempt budget for transactions that don't set one.
    /// 1 means no retry on timeout.
    pub default_attempts: u8,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            response_timeout: Duration::from_millis(2000),
            request_timeout: Duration::from_millis(5000),
            abort_timeout: Duration::from_millis(12000),
            default_data_timeout: Duration::from_millis(5000),
            default_attempts: 1,
        }
    }
}
