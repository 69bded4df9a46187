use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Wrapper for guest contact data (name, e-mail, phone) that keeps the value out of
/// `Debug`/`Display` output. Serialization still writes the real value, since API
/// responses and the ledger need it; the masking only protects log lines such as
/// `tracing::info!(?guest, ...)`.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Masked<T>(pub T);

impl<T> Masked<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn as_inner(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: AsRef<str>> Masked<T> {
    /// Last three characters with everything before them starred, e.g. `*******789`.
    pub fn hint(&self) -> String {
        let chars: Vec<char> = self.0.as_ref().chars().collect();
        let visible = chars.len().min(3);
        let hidden = chars.len() - visible;
        let mut out = "*".repeat(hidden);
        out.extend(&chars[hidden..]);
        out
    }
}

impl<T: AsRef<str>> fmt::Debug for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Masked({})", self.hint())
    }
}

impl<T: AsRef<str>> fmt::Display for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hint())
    }
}

impl<T: Serialize> Serialize for Masked<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_phone() {
        let phone = Masked::new("0901234789".to_string());
        assert_eq!(format!("{:?}", phone), "Masked(*******789)");
        assert_eq!(phone.to_string(), "*******789");
    }

    #[test]
    fn test_short_values_are_not_padded() {
        let short = Masked::new("ab");
        assert_eq!(short.hint(), "ab");
    }

    #[test]
    fn test_serializes_real_value() {
        let email = Masked::new("guest@example.com".to_string());
        let json = serde_json::to_string(&email).unwrap();
        assert_eq!(json, "\"guest@example.com\"");
    }
}
