//! Hub fee policy.
//!
//! `fee = base + floor(amount * bps / 10000) + gasSurcharge`

use alloy_primitives::U256;

use crate::proto::{FeeBreakdown, FeePolicyInfo, TokenAmount};

/// Basis-point denominator.
const BPS_DENOMINATOR: u64 = 10_000;

/// Fee parameters of a hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeePolicy {
    /// Flat fee per payment.
    pub base: TokenAmount,
    /// Variable rate in basis points.
    pub bps: u32,
    /// Flat gas surcharge per payment.
    pub gas_surcharge: TokenAmount,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            base: TokenAmount::from(10u64),
            bps: 30,
            gas_surcharge: TokenAmount::ZERO,
        }
    }
}

/// Result of [`FeePolicy::compute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputedFee {
    /// Total fee.
    pub fee: TokenAmount,
    /// `amount + fee`.
    pub total_debit: TokenAmount,
    /// Component split.
    pub breakdown: FeeBreakdown,
}

impl FeePolicy {
    /// Computes the fee and total debit for `amount`.
    ///
    /// Returns `None` if the total overflows `uint256`.
    #[must_use]
    pub fn compute(&self, amount: TokenAmount) -> Option<ComputedFee> {
        let variable = amount
            .inner()
            .checked_mul(U256::from(self.bps))?
            / U256::from(BPS_DENOMINATOR);
        let variable = TokenAmount::new(variable);
        let fee = self
            .base
            .checked_add(variable)?
            .checked_add(self.gas_surcharge)?;
        let total_debit = amount.checked_add(fee)?;
        Some(ComputedFee {
            fee,
            total_debit,
            breakdown: FeeBreakdown {
                base: self.base,
                bps: self.bps,
                variable,
                gas_surcharge: self.gas_surcharge,
            },
        })
    }

    /// Published form of the policy.
    #[must_use]
    pub const fn info(&self) -> FeePolicyInfo {
        FeePolicyInfo {
            base: self.base,
            bps: self.bps,
            gas_surcharge: self.gas_surcharge,
        }
    }
}

impl From<&FeePolicyInfo> for FeePolicy {
    fn from(info: &FeePolicyInfo) -> Self {
        Self {
            base: info.base,
            bps: info.bps,
            gas_surcharge: info.gas_surcharge,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_fee_for_one_million() {
        let computed = FeePolicy::default()
            .compute(TokenAmount::from(1_000_000u64))
            .unwrap();
        assert_eq!(computed.fee, TokenAmount::from(3_010u64));
        assert_eq!(computed.total_debit, TokenAmount::from(1_003_010u64));
        assert_eq!(computed.breakdown.variable, TokenAmount::from(3_000u64));
    }

    #[test]
    fn test_variable_part_is_floored() {
        let policy = FeePolicy {
            base: TokenAmount::ZERO,
            bps: 30,
            gas_surcharge: TokenAmount::from(7u64),
        };
        // 333 * 30 / 10000 = 0.999 -> 0
        let computed = policy.compute(TokenAmount::from(333u64)).unwrap();
        assert_eq!(computed.fee, TokenAmount::from(7u64));
        assert_eq!(computed.total_debit, TokenAmount::from(340u64));
    }

    #[test]
    fn test_overflow_is_none() {
        let policy = FeePolicy::default();
        assert!(policy.compute(TokenAmount::new(U256::MAX)).is_none());
    }
}
