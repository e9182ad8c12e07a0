use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of days a stopped recording is kept before automatic deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct RetentionPolicy {
    days: u32,
}

impl RetentionPolicy {
    pub const ALLOWED_DAYS: [u32; 3] = [7, 15, 30];

    pub fn new(days: u32) -> Result<Self> {
        if !Self::ALLOWED_DAYS.contains(&days) {
            return Err(Error::Validation(format!(
                "Retention days must be one of {:?}, got {}",
                Self::ALLOWED_DAYS,
                days
            )));
        }
        Ok(Self { days })
    }

    pub fn days(&self) -> u32 {
        self.days
    }
}

impl TryFrom<u32> for RetentionPolicy {
    type Error = Error;

    fn try_from(days: u32) -> Result<Self> {
        Self::new(days)
    }
}

impl From<RetentionPolicy> for u32 {
    fn from(policy: RetentionPolicy) -> Self {
        policy.days
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} days", self.days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_allowed_values() {
        for days in [7, 15, 30] {
            assert_eq!(RetentionPolicy::new(days).unwrap().days(), days);
        }
    }

    #[test]
    fn rejects_everything_else() {
        for days in (0..=100).filter(|d| ![7, 15, 30].contains(d)) {
            assert!(matches!(
                RetentionPolicy::new(days),
                Err(Error::Validation(_))
            ));
        }
        assert!(RetentionPolicy::new(u32::MAX).is_err());
    }

    #[test]
    fn equality_by_days() {
        assert_eq!(RetentionPolicy::new(15).unwrap(), RetentionPolicy::new(15).unwrap());
        assert_ne!(RetentionPolicy::new(7).unwrap(), RetentionPolicy::new(30).unwrap());
    }

    #[test]
    fn deserialization_validates() {
        let ok: RetentionPolicy = serde_json::from_str("30").unwrap();
        assert_eq!(ok.days(), 30);
        assert!(serde_json::from_str::<RetentionPolicy>("10").is_err());
    }
}
