//! Utility functions and helpers

/// Format amount with proper decimals
pub fn format_amount(amount: f64, decimals: u8) -> String {
    format!("{:.*}", decimals.min(8) as usize, amount)
}

/// Generate unique ID
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Total order for f64 scores where NaN sorts last
pub fn cmp_f64(a: f64, b: f64) -> std::cmp::Ordering {
    a.partial_cmp(&b).unwrap_or_else(|| {
        if a.is_nan() && !b.is_nan() {
            std::cmp::Ordering::Less
        } else if !a.is_nan() && b.is_nan() {
            std::cmp::Ordering::Greater
        } else {
            std::cmp::Ordering::Equal
        }
    })
}
