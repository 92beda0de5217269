//! Missing-id policy: decides whether a stage with unmatched work items fails

use std::fmt;
use std::str::FromStr;

use crate::correlation::CorrelationId;
use crate::error::PipelineError;

/// Maximum number of missing ids carried in the error for reporting.
const SAMPLE_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum MissingPolicy {
    /// Any missing id fails the stage.
    #[default]
    Strict,
    /// Up to this many missing ids are tolerated.
    MaxCount(usize),
    /// Up to this fraction (0.0..=1.0) of the requested items may be missing.
    MaxFraction(f64),
}

impl MissingPolicy {
    /// Check a stage's result against the policy.
    pub fn check(
        &self,
        requested: usize,
        missing_ids: &[CorrelationId],
    ) -> Result<(), PipelineError> {
        let missing = missing_ids.len();
        let tolerated = match *self {
            MissingPolicy::Strict => missing == 0,
            MissingPolicy::MaxCount(max) => missing <= max,
            MissingPolicy::MaxFraction(fraction) => {
                requested == 0 || (missing as f64) <= fraction * requested as f64
            }
        };

        if tolerated {
            Ok(())
        } else {
            Err(PipelineError::MissingCorrelation {
                missing,
                requested,
                sample: missing_ids.iter().take(SAMPLE_SIZE).cloned().collect(),
            })
        }
    }
}

impl FromStr for MissingPolicy {
    type Err = PipelineError;

    /// Accepts `strict`, a count (`25`), or a percentage (`2.5%`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("strict") {
            return Ok(MissingPolicy::Strict);
        }
        if let Some(percent) = s.strip_suffix('%') {
            let value: f64 = percent.trim().parse().map_err(|_| invalid(s))?;
            if !(0.0..=100.0).contains(&value) {
                return Err(invalid(s));
            }
            return Ok(MissingPolicy::MaxFraction(value / 100.0));
        }
        s.parse::<usize>()
            .map(MissingPolicy::MaxCount)
            .map_err(|_| invalid(s))
    }
}

impl fmt::Display for MissingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingPolicy::Strict => f.write_str("strict"),
            MissingPolicy::MaxCount(n) => write!(f, "{n}"),
            MissingPolicy::MaxFraction(p) => write!(f, "{}%", p * 100.0),
        }
    }
}

fn invalid(s: &str) -> PipelineError {
    PipelineError::Config(format!(
        "invalid missing-id policy '{s}' (expected 'strict', a count, or a percentage like '5%')"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<CorrelationId> {
        (0..n).map(|i| CorrelationId::new(format!("row{i:04}"))).collect()
    }

    #[test]
    fn strict_rejects_any_missing() {
        assert!(MissingPolicy::Strict.check(10, &[]).is_ok());
        let err = MissingPolicy::Strict.check(10, &ids(1)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingCorrelation {
                missing: 1,
                requested: 10,
                ..
            }
        ));
    }

    #[test]
    fn count_and_fraction_tolerances() {
        assert!(MissingPolicy::MaxCount(3).check(10, &ids(3)).is_ok());
        assert!(MissingPolicy::MaxCount(3).check(10, &ids(4)).is_err());
        assert!(MissingPolicy::MaxFraction(0.35).check(10, &ids(3)).is_ok());
        assert!(MissingPolicy::MaxFraction(0.2).check(10, &ids(3)).is_err());
    }

    #[test]
    fn error_sample_is_capped() {
        match MissingPolicy::Strict.check(100, &ids(50)).unwrap_err() {
            PipelineError::MissingCorrelation { sample, .. } => assert_eq!(sample.len(), 20),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn parses_from_str() {
        assert_eq!("strict".parse::<MissingPolicy>().unwrap(), MissingPolicy::Strict);
        assert_eq!("12".parse::<MissingPolicy>().unwrap(), MissingPolicy::MaxCount(12));
        assert_eq!(
            "5%".parse::<MissingPolicy>().unwrap(),
            MissingPolicy::MaxFraction(0.05)
        );
        assert!("lots".parse::<MissingPolicy>().is_err());
        assert!("150%".parse::<MissingPolicy>().is_err());
    }
}
