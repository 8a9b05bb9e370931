use serde::{Deserialize, Deserializer};

/// Accept any JSON number (or null) as an unsigned counter.
///
/// NGINX Plus reports integers, but older builds and proxies in between
/// have been seen emitting floats. Values truncate toward zero and
/// negatives clamp to zero.
pub fn lenient<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let number = Option::<serde_json::Number>::deserialize(deserializer)?;
    Ok(match number {
        None => 0,
        Some(n) => {
            if let Some(v) = n.as_u64() {
                v
            } else if let Some(f) = n.as_f64() {
                // `as` saturates: NaN and negatives become 0
                f as u64
            } else {
                0
            }
        }
    })
}
