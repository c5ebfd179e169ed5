//! Per-token pricing for the models the classifier is normally pointed at.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// (input, output) cost per token in USD. Unknown models cost zero.
pub fn model_cost(model: &str) -> (Decimal, Decimal) {
    let per_million = match model {
        m if m.starts_with("gpt-4.1-mini") => (dec!(0.40), dec!(1.60)),
        m if m.starts_with("gpt-4.1-nano") => (dec!(0.10), dec!(0.40)),
        m if m.starts_with("gpt-4.1") => (dec!(2.00), dec!(8.00)),
        m if m.starts_with("gpt-4o-mini") => (dec!(0.15), dec!(0.60)),
        m if m.starts_with("gpt-4o") => (dec!(2.50), dec!(10.00)),
        m if m.contains("haiku") => (dec!(0.80), dec!(4.00)),
        m if m.contains("sonnet") => (dec!(3.00), dec!(15.00)),
        _ => (Decimal::ZERO, Decimal::ZERO),
    };
    let million = dec!(1_000_000);
    (per_million.0 / million, per_million.1 / million)
}

/// Total cost of one call.
pub fn call_cost(model: &str, input_tokens: u32, output_tokens: u32) -> Decimal {
    let (input, output) = model_cost(model);
    input * Decimal::from(input_tokens) + output * Decimal::from(output_tokens)
}
