//! The fixed category vocabularies.
//!
//! Both lists are ordered: prompts enumerate them in this order and the
//! `categories` CLI command prints them the same way. Every categorised
//! record leaving a pipeline carries a tag from the applicable list.

use serde::Serialize;

/// Income tags (sources of income).
pub const INCOME_CATEGORIES: [&str; 15] = [
    "salary",
    "freelance",
    "investment_returns",
    "rental_income",
    "business_income",
    "dividends",
    "interest",
    "bonus",
    "commission",
    "pension",
    "grants",
    "gifts_received",
    "insurance_claims",
    "tax_refunds",
    "other_income",
];

/// Expense tags (expenditure categories).
pub const EXPENSE_CATEGORIES: [&str; 26] = [
    "food_dining",
    "groceries",
    "rent",
    "mortgage",
    "utilities",
    "transportation",
    "fuel",
    "entertainment",
    "shopping",
    "healthcare",
    "insurance",
    "education",
    "travel",
    "gym_fitness",
    "subscriptions",
    "phone_internet",
    "clothing",
    "personal_care",
    "home_maintenance",
    "investments",
    "loans",
    "taxes",
    "charity_donations",
    "gifts_given",
    "business_expenses",
    "other_expenses",
];

/// Default for anything that fails expense validation.
pub const FALLBACK_EXPENSE: &str = "other_expenses";

/// Default for credits that fail validation.
pub const FALLBACK_INCOME: &str = "other_income";

/// Which vocabulary a tag is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryKind {
    Income,
    Expense,
}

impl CategoryKind {
    /// The ordered vocabulary for this kind.
    pub fn categories(self) -> &'static [&'static str] {
        match self {
            CategoryKind::Income => &INCOME_CATEGORIES,
            CategoryKind::Expense => &EXPENSE_CATEGORIES,
        }
    }

    /// The designated default for this kind.
    pub fn fallback(self) -> &'static str {
        match self {
            CategoryKind::Income => FALLBACK_INCOME,
            CategoryKind::Expense => FALLBACK_EXPENSE,
        }
    }

    /// Whether `tag` belongs to this kind's vocabulary.
    pub fn validate(self, tag: &str) -> bool {
        self.categories().contains(&tag)
    }
}

/// Receipt validation: a tag is valid iff it is present in the expense list.
pub fn is_expense_category(tag: Option<&str>) -> bool {
    tag.is_some_and(|t| CategoryKind::Expense.validate(t))
}

/// Statement validation: membership in the combined income + expense list.
pub fn is_known_category(tag: Option<&str>) -> bool {
    tag.is_some_and(|t| CategoryKind::Income.validate(t) || CategoryKind::Expense.validate(t))
}

/// Human-readable label: `food_dining` → `Food Dining`.
pub fn format_label(tag: &str) -> String {
    tag.split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// One vocabulary entry with its display label.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryEntry {
    pub tag: &'static str,
    pub label: String,
    pub kind: CategoryKind,
}

/// Both vocabularies in order, income first.
pub fn catalogue() -> Vec<CategoryEntry> {
    [CategoryKind::Income, CategoryKind::Expense]
        .into_iter()
        .flat_map(|kind| {
            kind.categories().iter().map(move |&tag| CategoryEntry {
                tag,
                label: format_label(tag),
                kind,
            })
        })
        .collect()
}
