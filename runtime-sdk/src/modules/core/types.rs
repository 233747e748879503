use super::Error;

/// Per-transaction gas meter.
///
/// A meter without a limit is infinite and only tracks consumption.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GasMeter {
    limit: Option<u64>,
    consumed: u64,
}

impl GasMeter {
    /// Create a meter with the given limit.
    pub fn new(limit: u64) -> Self {
        Self {
            limit: Some(limit),
            consumed: 0,
        }
    }

    /// Create a meter without a limit.
    pub fn infinite() -> Self {
        Self::default()
    }

    /// Gas limit, `None` for infinite meters.
    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Gas consumed so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Gas that can still be consumed.
    pub fn remaining(&self) -> u64 {
        match self.limit {
            Some(limit) => limit.saturating_sub(self.consumed),
            None => u64::MAX - self.consumed,
        }
    }

    /// Consume gas. On failure the consumed amount is left unchanged.
    pub fn consume(&mut self, amount: u64) -> Result<(), Error> {
        let consumed = self
            .consumed
            .checked_add(amount)
            .ok_or(Error::GasOverflow)?;
        if let Some(limit) = self.limit {
            if consumed > limit {
                return Err(Error::OutOfGas {
                    limit,
                    wanted: consumed,
                });
            }
        }
        self.consumed = consumed;
        Ok(())
    }

    /// Return previously consumed gas.
    ///
    /// # Panics
    ///
    /// Panics if more gas is refunded than was consumed.
    pub fn refund(&mut self, amount: u64) {
        if amount > self.consumed {
            panic!(
                "gas refund {} greater than consumed gas {}",
                amount, self.consumed
            );
        }
        self.consumed -= amount;
    }
}
