use rust_decimal::{Decimal, RoundingStrategy};

/// Splits a gross amount into platform fee and creator earnings.
///
/// Rounding is half-up to two decimal places and applied once per call; the
/// net side is always derived from the unrounded gross minus the rounded fee,
/// never re-derived from an already-rounded net.
#[derive(Debug, Clone)]
pub struct FeeCalculator {
    fee_percent: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSplit {
    pub platform_fee: Decimal,
    pub creator_amount: Decimal,
}

pub fn round2(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

impl FeeCalculator {
    pub fn new(fee_percent: Decimal) -> Self {
        Self { fee_percent }
    }

    pub fn fee_percent(&self) -> Decimal {
        self.fee_percent
    }

    pub fn platform_fee(&self, amount: Decimal) -> Decimal {
        round2(amount * self.fee_percent / Decimal::ONE_HUNDRED)
    }

    pub fn creator_earnings(&self, amount: Decimal) -> Decimal {
        round2(amount - self.platform_fee(amount))
    }

    pub fn split(&self, amount: Decimal) -> FeeSplit {
        FeeSplit {
            platform_fee: self.platform_fee(amount),
            creator_amount: self.creator_earnings(amount),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn calculator() -> FeeCalculator {
        FeeCalculator::new(dec("30"))
    }

    #[test]
    fn fee_plus_earnings_equals_gross() {
        let calc = calculator();
        for raw in ["0", "0.01", "0.05", "1.00", "9.99", "20.00", "33.33", "1234.56"] {
            let amount = dec(raw);
            assert_eq!(
                calc.platform_fee(amount) + calc.creator_earnings(amount),
                round2(amount),
                "split must reassemble to the gross amount for {}",
                raw
            );
        }
    }

    #[test]
    fn thirty_percent_scenario() {
        // $20 + $10 + $5 at 30%: fee $10.50, earnings $24.50
        let calc = calculator();
        let payments = [dec("20.00"), dec("10.00"), dec("5.00")];

        let fee: Decimal = payments.iter().map(|a| calc.platform_fee(*a)).sum();
        let earnings: Decimal = payments.iter().map(|a| calc.creator_earnings(*a)).sum();

        assert_eq!(fee, dec("10.50"));
        assert_eq!(earnings, dec("24.50"));
    }

    #[test]
    fn rounds_half_up() {
        let calc = calculator();
        // 30% of 0.05 is 0.015, which rounds up to 0.02
        assert_eq!(calc.platform_fee(dec("0.05")), dec("0.02"));
        assert_eq!(calc.creator_earnings(dec("0.05")), dec("0.03"));
    }

    #[test]
    fn zero_amount_splits_to_zero() {
        let calc = calculator();
        let split = calc.split(Decimal::ZERO);
        assert_eq!(split.platform_fee, Decimal::ZERO);
        assert_eq!(split.creator_amount, Decimal::ZERO);
    }
}
