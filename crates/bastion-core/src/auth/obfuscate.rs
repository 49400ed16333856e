use thiserror::Error;

/// Shortest API key the obfuscation can index into (digit 9 + offset 2).
const MIN_API_KEY_LEN: usize = 12;

/// Number of trailing timestamp digits the obfuscation uses.
const TIMESTAMP_DIGITS: usize = 6;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObfuscateError {
    #[error("API key must be at least {MIN_API_KEY_LEN} characters, got {0}")]
    ApiKeyTooShort(usize),

    #[error("Timestamp must be at least {TIMESTAMP_DIGITS} characters, got {0}")]
    TimestampTooShort(usize),

    #[error("Timestamp must end in decimal digits: {0}")]
    TimestampNotNumeric(String),
}

/// Derive the time-salted key sent at login in place of the raw API key.
///
/// The result is always 12 characters and depends only on the inputs.
pub fn obfuscate_api_key(api_key: &str, timestamp: &str) -> Result<String, ObfuscateError> {
    let key: Vec<char> = api_key.chars().collect();
    if key.len() < MIN_API_KEY_LEN {
        return Err(ObfuscateError::ApiKeyTooShort(key.len()));
    }

    let ts: Vec<char> = timestamp.chars().collect();
    if ts.len() < TIMESTAMP_DIGITS {
        return Err(ObfuscateError::TimestampTooShort(ts.len()));
    }

    let high: String = ts[ts.len() - TIMESTAMP_DIGITS..].iter().collect();
    let high_value: u32 = high
        .parse()
        .ok()
        .filter(|_| high.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| ObfuscateError::TimestampNotNumeric(high.clone()))?;
    let low = format!("{:06}", high_value >> 1);

    let mut obfuscated = String::with_capacity(2 * TIMESTAMP_DIGITS);
    for d in high.bytes() {
        obfuscated.push(key[usize::from(d - b'0')]);
    }
    for d in low.bytes() {
        obfuscated.push(key[usize::from(d - b'0') + 2]);
    }
    Ok(obfuscated)
}
