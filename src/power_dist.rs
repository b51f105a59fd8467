//! Describing distributions of mining power

/// Numeric type used to represent mining power.
pub type PowerValue = f64;

/// Determines how mining power is distributed between peers during a
/// simulation. Peers are indexed by [`PeerId`](crate::peer::PeerId), and
/// selfish peers always come first.
#[derive(Debug, Default, Clone, PartialEq)]
pub enum PowerDistribution {
    /// Weight each peer equally.
    #[default]
    Equal,
    /// Give the first peers the listed fractions of mining power, and split
    /// the remaining power equally between all other peers.
    FixedLeading(Vec<PowerValue>),
    /// Set all mining power values to those in the given vector.
    SetValues(Vec<PowerValue>),
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PowerDistributionError {
    #[error("distribution values sum to {0}, not 1.0")]
    BadDistributionSum(PowerValue),
    #[error("power value {0} is not in the range 0.0..=1.0")]
    BadPowerValue(PowerValue),
    #[error("fixed power values sum to {0}, leaving nothing for other peers")]
    FixedPowerTooHigh(PowerValue),
    #[error("{0} fixed power values leave no other peers among {1}")]
    NoRemainingPeers(usize, usize),
    #[error("power distribution size {0} does not match peer count {1}")]
    WrongNumPeers(usize, usize),
    #[error("cannot create a distribution for zero peers")]
    ZeroPeersGiven,
}

impl PowerDistribution {
    /// Allowable difference between a distribution sum and 1.0.
    const EPSILON_POWER: PowerValue = 1e-6;

    /// Returns true if the discrete distribution described by this
    /// [`PowerDistribution`] is valid over `num_peers`.
    #[inline]
    pub fn is_valid(&self, num_peers: usize) -> bool {
        self.validate(num_peers).is_ok()
    }

    /// Checks if the discrete distribution described by this
    /// [`PowerDistribution`] is valid over `num_peers`.
    pub fn validate(
        &self,
        num_peers: usize,
    ) -> Result<(), PowerDistributionError> {
        use PowerDistributionError::*;

        if num_peers == 0 {
            return Err(ZeroPeersGiven);
        }

        let bad_value = |dist: &[PowerValue]| {
            dist.iter()
                .find(|&x| x.is_nan() || !(0.0..=1.0).contains(x))
                .copied()
        };

        match &self {
            Self::Equal => Ok(()),
            Self::SetValues(dist) => {
                if dist.len() != num_peers {
                    return Err(WrongNumPeers(dist.len(), num_peers));
                }
                if let Some(val) = bad_value(dist) {
                    return Err(BadPowerValue(val));
                }

                let sum = dist.iter().sum();
                if PowerValue::abs(sum - 1.0) > Self::EPSILON_POWER {
                    return Err(BadDistributionSum(sum));
                }

                Ok(())
            }
            Self::FixedLeading(fixed) => {
                if fixed.len() >= num_peers {
                    return Err(NoRemainingPeers(fixed.len(), num_peers));
                }
                if let Some(val) = bad_value(fixed) {
                    return Err(BadPowerValue(val));
                }

                let sum: PowerValue = fixed.iter().sum();
                if sum >= 1.0 {
                    return Err(FixedPowerTooHigh(sum));
                }

                Ok(())
            }
        }
    }

    /// Returns the power values described by this power distribution as a
    /// vector. Returns a [`PowerDistributionError`] if the underlying
    /// distribution is invalid over `num_peers`.
    pub fn values(
        &self,
        num_peers: usize,
    ) -> Result<Vec<PowerValue>, PowerDistributionError> {
        self.validate(num_peers)?;

        Ok(match &self {
            Self::Equal => vec![1.0 / num_peers as PowerValue; num_peers],
            Self::SetValues(dist) => dist.clone(),
            Self::FixedLeading(fixed) => {
                let rest: PowerValue = 1.0 - fixed.iter().sum::<PowerValue>();
                let share = rest / (num_peers - fixed.len()) as PowerValue;

                let mut dist = fixed.clone();
                dist.resize(num_peers, share);
                dist
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{PowerDistribution, PowerDistributionError};

    #[test]
    fn power_dist_equal_power() {
        assert_eq!(
            PowerDistribution::Equal.values(4).unwrap(),
            vec![0.25, 0.25, 0.25, 0.25]
        )
    }

    #[test]
    fn fixed_leading_splits_remainder() {
        let dist = PowerDistribution::FixedLeading(vec![0.5]);
        assert_eq!(dist.values(3).unwrap(), vec![0.5, 0.25, 0.25]);
    }

    #[test]
    fn fixed_leading_rejects_full_power() {
        let dist = PowerDistribution::FixedLeading(vec![0.6, 0.4]);
        assert_eq!(
            dist.validate(5),
            Err(PowerDistributionError::FixedPowerTooHigh(1.0))
        );

        let dist = PowerDistribution::FixedLeading(vec![0.1, 0.1]);
        assert_eq!(
            dist.validate(2),
            Err(PowerDistributionError::NoRemainingPeers(2, 2))
        );
    }

    #[test]
    fn set_values_must_sum_to_one() {
        let dist = PowerDistribution::SetValues(vec![0.5, 0.2]);
        assert!(!dist.is_valid(2));
        assert!(PowerDistribution::SetValues(vec![0.5, 0.5]).is_valid(2));
    }
}
