use serde::Serialize;

/// How much of the expected schedule set a quarter holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Completeness {
    pub expected_count: usize,
    pub present_count: usize,
    /// Expected codes with no matching file, in expected order.
    pub missing_schedules: Vec<String>,
    pub percentage: f64,
}

impl Completeness {
    /// An expected code is satisfied by an exact match or by any present
    /// code that starts with it (`RCRI1` satisfies `RCRI`).
    pub fn evaluate<E, P>(expected: &[E], present: &[P]) -> Self
    where
        E: AsRef<str>,
        P: AsRef<str>,
    {
        let missing_schedules: Vec<String> = expected
            .iter()
            .map(AsRef::as_ref)
            .filter(|code| !present.iter().any(|p| p.as_ref().starts_with(code)))
            .map(str::to_string)
            .collect();

        let expected_count = expected.len();
        let satisfied = expected_count - missing_schedules.len();
        let percentage = if expected_count == 0 {
            100.0
        } else {
            satisfied as f64 / expected_count as f64 * 100.0
        };

        Self {
            expected_count,
            present_count: satisfied,
            missing_schedules,
            percentage,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.missing_schedules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_in_expected_order() {
        let c = Completeness::evaluate(&["RC", "RCN", "RI", "RCRI"], &["RI", "RC"]);
        assert_eq!(c.missing_schedules, vec!["RCN", "RCRI"]);
        assert_eq!(c.present_count, 2);
        assert!((c.percentage - 50.0).abs() < f64::EPSILON);
        assert!(!c.is_complete());
    }

    #[test]
    fn test_multi_part_satisfies_prefix() {
        let c = Completeness::evaluate(&["RCRI", "RCRII"], &["RCRI1", "RCRI2", "RCRII1"]);
        assert!(c.is_complete());
        assert!((c.percentage - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_expected_is_complete() {
        let c = Completeness::evaluate::<&str, &str>(&[], &["RC"]);
        assert!(c.is_complete());
        assert_eq!(c.expected_count, 0);
    }
}
