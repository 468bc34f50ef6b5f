use serde::{Deserialize, Serialize};

/// Time-bounded exception letting one package past the app blocklist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporaryUnlock {
    #[serde(rename = "pkg", default)]
    pub package_id: String,
    #[serde(rename = "exp", default)]
    pub expires_at_ms: i64,
}

impl TemporaryUnlock {
    pub fn new(package_id: impl Into<String>, expires_at_ms: i64) -> Self {
        Self {
            package_id: package_id.into(),
            expires_at_ms,
        }
    }

    /// An entry expiring exactly at `now_ms` is already gone.
    pub fn is_active(&self, now_ms: i64) -> bool {
        self.expires_at_ms > now_ms
    }
}

/// Drops every expired entry.
pub fn prune_expired(unlocks: &[TemporaryUnlock], now_ms: i64) -> Vec<TemporaryUnlock> {
    unlocks
        .iter()
        .filter(|u| u.is_active(now_ms))
        .cloned()
        .collect()
}

pub fn has_active_unlock(unlocks: &[TemporaryUnlock], package_id: &str, now_ms: i64) -> bool {
    unlocks
        .iter()
        .any(|u| u.package_id == package_id && u.is_active(now_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_boundary() {
        let unlocks = vec![TemporaryUnlock::new("com.example.social", 1_000)];
        assert!(has_active_unlock(&unlocks, "com.example.social", 999));
        assert!(!has_active_unlock(&unlocks, "com.example.social", 1_000));
        assert!(!has_active_unlock(&unlocks, "com.example.other", 0));
    }

    #[test]
    fn test_prune_keeps_only_live_entries() {
        let unlocks = vec![
            TemporaryUnlock::new("a", 100),
            TemporaryUnlock::new("b", 200),
            TemporaryUnlock::new("c", 300),
        ];
        let kept = prune_expired(&unlocks, 200);
        assert_eq!(kept, vec![TemporaryUnlock::new("c", 300)]);
    }

    #[test]
    fn test_wire_format() {
        let parsed: Vec<TemporaryUnlock> =
            serde_json::from_str(r#"[{"pkg":"com.a","exp":42},{"pkg":"com.b"}]"#).unwrap();
        assert_eq!(parsed[0], TemporaryUnlock::new("com.a", 42));
        assert_eq!(parsed[1], TemporaryUnlock::new("com.b", 0));

        let json = serde_json::to_string(&parsed[0]).unwrap();
        assert_eq!(json, r#"{"pkg":"com.a","exp":42}"#);
    }
}
