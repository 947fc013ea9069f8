//! Arithmetic primitives and identifier checks.
//!
//! Percentages are whole numbers in [0, 100]. No float anywhere in the
//! projection path, so two replays always agree bit for bit.

/// Upper bound of a completion percentage.
pub const PERCENT_MAX: u8 = 100;

/// `round(100 * numerator / denominator)` with half-up rounding, clamped
/// to [0, 100].
///
/// A zero denominator means a single-stage sequence, where the only stage is
/// also the terminal one, so it reports 100.
pub fn rounded_percent(numerator: usize, denominator: usize) -> u8 {
    if denominator == 0 {
        return PERCENT_MAX;
    }
    let num = (numerator as u128) * 200 + denominator as u128;
    let den = (denominator as u128) * 2;
    let pct = num / den;
    pct.min(PERCENT_MAX as u128) as u8
}

/// True if `token` matches `[a-zA-Z0-9_-]+`.
///
/// Order ids and stage ids share this alphabet, which keeps the `|`
/// separator of content-addressed event ids unambiguous.
pub fn is_valid_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
}
