//! Deterministic merchant → category rules for the local fallback.
//!
//! Matching is a case-insensitive substring test against the merchant name,
//! evaluated in table order; the first hit wins.

use crate::categories::{CategoryKind, FALLBACK_EXPENSE};
use crate::error::ExtractError;
use serde::{Deserialize, Serialize};

/// One `pattern → category` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerchantRule {
    /// Lower-case substring looked for in the merchant name.
    pub pattern: String,
    /// Expense tag assigned on a match.
    pub category: String,
}

impl MerchantRule {
    fn new(pattern: &str, category: &str) -> Self {
        Self {
            pattern: pattern.to_lowercase(),
            category: category.to_string(),
        }
    }
}

/// Ordered rule table.
#[derive(Debug, Clone)]
pub struct MerchantRules {
    rules: Vec<MerchantRule>,
}

impl Default for MerchantRules {
    fn default() -> Self {
        Self::builtin()
    }
}

impl MerchantRules {
    /// The built-in table.
    pub fn builtin() -> Self {
        Self {
            rules: vec![
                MerchantRule::new("walmart", "groceries"),
                MerchantRule::new("whole foods", "groceries"),
                MerchantRule::new("aldi", "groceries"),
                MerchantRule::new("costco", "groceries"),
                MerchantRule::new("apple", "shopping"),
                MerchantRule::new("uber", "transportation"),
                MerchantRule::new("lyft", "transportation"),
            ],
        }
    }

    /// A custom table. Every category must be an expense tag and every
    /// pattern non-empty.
    pub fn new(rules: Vec<MerchantRule>) -> Result<Self, ExtractError> {
        let mut normalised = Vec::with_capacity(rules.len());
        for rule in rules {
            if rule.pattern.trim().is_empty() {
                return Err(ExtractError::InvalidConfig(
                    "merchant rule pattern must not be empty".into(),
                ));
            }
            if !CategoryKind::Expense.validate(&rule.category) {
                return Err(ExtractError::InvalidConfig(format!(
                    "merchant rule '{}' maps to unknown category '{}'",
                    rule.pattern, rule.category
                )));
            }
            normalised.push(MerchantRule::new(rule.pattern.trim(), &rule.category));
        }
        Ok(Self { rules: normalised })
    }

    pub fn rules(&self) -> &[MerchantRule] {
        &self.rules
    }

    /// First matching rule for `merchant`, if any.
    pub fn find(&self, merchant: &str) -> Option<&MerchantRule> {
        let merchant = merchant.to_lowercase();
        self.rules.iter().find(|r| merchant.contains(&r.pattern))
    }

    /// Category for `merchant`, defaulting to `other_expenses`.
    pub fn categorize(&self, merchant: Option<&str>) -> &str {
        merchant
            .and_then(|m| self.find(m))
            .map(|r| r.category.as_str())
            .unwrap_or(FALLBACK_EXPENSE)
    }
}
