use chrono::{SecondsFormat, Utc};
use uuid::Uuid;

/// Diagnostic identity: construction time plus a random suffix, e.g.
/// `2021-07-01T12:00:00.123Z-9f1c2e4b7a10`.
///
/// Two envelopes carrying the same id were served by the same incarnation.
pub fn diagnostic_id() -> String {
    let created = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let random = Uuid::new_v4().simple().to_string();
    format!("{}-{}", created, &random[random.len() - 12..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_timestamped() {
        let a = diagnostic_id();
        let b = diagnostic_id();
        assert_ne!(a, b);
        let (timestamp, suffix) = a.rsplit_once('-').unwrap();
        assert_eq!(suffix.len(), 12);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    }
}
