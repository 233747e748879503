//! Configuration types.
use crate::types::decimal::Decimal;

/// Node-local transaction admission policy.
///
/// This is not part of consensus: different nodes may run with different values and it only
/// affects which transactions a node accepts into its mempool.
#[derive(Clone, Debug, Default)]
pub struct LocalConfig {
    /// Minimum gas price accepted by this node when the base fee is disabled.
    pub min_gas_prices: Decimal,
    /// Cap on the gas wanted recorded for a checked transaction. Zero means no cap.
    pub max_tx_gas_wanted: u64,
}

impl LocalConfig {
    /// Construct a configuration that accepts everything.
    pub fn permissive() -> Self {
        Self::default()
    }
}
