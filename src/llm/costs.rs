//! Per-model unit prices for billing.

use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Price per token for models whose name matches nothing in the table.
pub const DEFAULT_UNIT_PRICE: Decimal = dec!(0.000002);

/// Ordered (fragment, price-per-token) pairs. The first fragment contained
/// in the model name (case-insensitive) wins.
#[derive(Debug, Clone)]
pub struct CostTable {
    entries: Vec<(String, Decimal)>,
    default_price: Decimal,
}

impl Default for CostTable {
    fn default() -> Self {
        Self {
            entries: vec![("gpt-4".to_string(), dec!(0.00006))],
            default_price: DEFAULT_UNIT_PRICE,
        }
    }
}

impl CostTable {
    pub fn new(entries: Vec<(String, Decimal)>, default_price: Decimal) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(fragment, price)| (fragment.to_lowercase(), price))
                .collect(),
            default_price,
        }
    }

    /// Parse `fragment=price,fragment=price`. A `default=price` entry sets
    /// the fallback price.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut entries = Vec::new();
        let mut default_price = DEFAULT_UNIT_PRICE;

        for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (fragment, price) = item
                .split_once('=')
                .ok_or_else(|| format!("expected fragment=price, got {item:?}"))?;
            let price = Decimal::from_str(price.trim())
                .map_err(|e| format!("invalid price {price:?}: {e}"))?;
            if price.is_sign_negative() {
                return Err(format!("negative price for {fragment:?}"));
            }
            match fragment.trim() {
                "" => return Err(format!("empty model fragment in {item:?}")),
                "default" => default_price = price,
                fragment => entries.push((fragment.to_string(), price)),
            }
        }

        Ok(Self::new(entries, default_price))
    }

    pub fn unit_price(&self, model: &str) -> Decimal {
        let model = model.to_lowercase();
        self.entries
            .iter()
            .find(|(fragment, _)| model.contains(fragment.as_str()))
            .map(|(_, price)| *price)
            .unwrap_or(self.default_price)
    }

    /// Cost of `total_tokens` on `model`.
    pub fn cost(&self, model: &str, total_tokens: u32) -> Decimal {
        self.unit_price(model) * Decimal::from(total_tokens)
    }
}
