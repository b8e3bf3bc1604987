use crate::config::{CleaningPolicy, ValuePolicy};
use crate::models::CellValue;

/// Result of cleaning one cell. Sentinel and invalid cells carry the value
/// their policy resolved them to (`None` = missing).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CleanedCell {
    Parsed(f64),
    Sentinel(Option<f64>),
    Invalid(Option<f64>),
}

impl CleanedCell {
    pub fn value(self) -> Option<f64> {
        match self {
            CleanedCell::Parsed(value) => Some(value),
            CleanedCell::Sentinel(value) | CleanedCell::Invalid(value) => value,
        }
    }
}

/// Turns raw numeric-looking cells into numbers according to a dataset's policy.
#[derive(Debug, Clone)]
pub struct CellCleaner {
    separator: Option<char>,
    sentinels: Vec<String>,
    sentinel_value: Option<f64>,
    invalid_value: Option<f64>,
}

impl CellCleaner {
    pub fn new(policy: &CleaningPolicy) -> Self {
        let resolve = |policy: ValuePolicy| match policy {
            ValuePolicy::Zero => Some(0.0),
            ValuePolicy::Missing => None,
        };

        Self {
            separator: policy.thousands_separator,
            sentinels: policy
                .sentinels
                .iter()
                .map(|s| s.trim().to_lowercase())
                .collect(),
            sentinel_value: resolve(policy.sentinel_policy),
            invalid_value: resolve(policy.invalid_policy),
        }
    }

    pub fn clean(&self, cell: &CellValue) -> CleanedCell {
        match cell {
            CellValue::Number(value) if value.is_finite() => CleanedCell::Parsed(*value),
            CellValue::Number(_) => CleanedCell::Invalid(self.invalid_value),
            CellValue::Text(text) => self.clean_text(text),
            CellValue::Empty => self.clean_text(""),
        }
    }

    fn clean_text(&self, text: &str) -> CleanedCell {
        let text = text.trim();
        if self.is_sentinel(text) {
            return CleanedCell::Sentinel(self.sentinel_value);
        }

        let digits: String = match self.separator {
            Some(separator) => text.chars().filter(|c| *c != separator).collect(),
            None => text.to_string(),
        };

        match digits.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => CleanedCell::Parsed(value),
            _ => CleanedCell::Invalid(self.invalid_value),
        }
    }

    fn is_sentinel(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.sentinels.iter().any(|s| *s == lowered)
    }
}
