//! Primary expiry and first-access window calculation.

use crate::artifact::{ArtifactKind, ArtifactRecord};
use crate::config::{AccessWindowRule, ExpirationConfig, ExpirationMode};
use crate::duration::parse_duration;
use time::{Duration, OffsetDateTime};

/// Used when the configured default expiry cannot be parsed.
const FALLBACK_EXPIRY: Duration = Duration::hours(24);

/// Used when neither a rule nor the default access window can be parsed.
const FALLBACK_ACCESS_WINDOW: Duration = Duration::minutes(10);

/// Computes expiry deadlines from server policy.
#[derive(Clone, Debug)]
pub struct ExpirationPolicy {
    config: ExpirationConfig,
}

impl ExpirationPolicy {
    pub fn new(config: ExpirationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExpirationConfig {
        &self.config
    }

    /// Whether reads stamp and enforce an access window.
    pub fn tracks_access_window(&self) -> bool {
        self.config.enabled && self.config.access_window.enabled
    }

    /// Primary expiry for an artifact created at `now`.
    ///
    /// `requested` is honored only in free mode, and only when it parses as a
    /// positive duration.
    pub fn primary_expiry(&self, now: OffsetDateTime, requested: Option<&str>) -> OffsetDateTime {
        if !self.config.enabled {
            return far_future(now);
        }

        let duration = match self.config.mode {
            ExpirationMode::Forced => self.default_expiry(),
            ExpirationMode::Free => match requested.map(str::trim).filter(|s| !s.is_empty()) {
                None => {
                    tracing::debug!(
                        default = %self.config.default_duration,
                        "No duration requested, using default"
                    );
                    self.default_expiry()
                }
                Some(raw) => match parse_duration(raw) {
                    Ok(d) if d.is_positive() => d,
                    Ok(_) => {
                        tracing::warn!(
                            requested = %raw,
                            default = %self.config.default_duration,
                            "Non-positive duration requested, using default"
                        );
                        self.default_expiry()
                    }
                    Err(e) => {
                        tracing::warn!(
                            requested = %raw,
                            default = %self.config.default_duration,
                            error = %e,
                            "Invalid duration requested, using default"
                        );
                        self.default_expiry()
                    }
                },
            },
        };

        now.saturating_add(duration)
    }

    fn default_expiry(&self) -> Duration {
        parse_duration(&self.config.default_duration).unwrap_or_else(|e| {
            tracing::error!(
                configured = %self.config.default_duration,
                error = %e,
                "Configured expiration duration is invalid, using 24h"
            );
            FALLBACK_EXPIRY
        })
    }

    /// Index of the first rule matching `record`, if any.
    pub fn matching_rule(&self, record: &ArtifactRecord) -> Option<usize> {
        let is_text = record.kind() == ArtifactKind::Text;
        let extension = record.extension();
        let size_mb = record.size_mb();

        self.config
            .access_window
            .rules
            .iter()
            .position(|rule| rule_matches(rule, is_text, extension.as_deref(), size_mb))
    }

    /// Access-window length for `record`: the first matching rule's duration,
    /// else the configured default.
    pub fn access_window_duration(&self, record: &ArtifactRecord) -> Duration {
        let window = &self.config.access_window;
        let configured = match self.matching_rule(record) {
            Some(index) => {
                let rule = &window.rules[index];
                tracing::debug!(
                    rule = index,
                    types = ?rule.types,
                    size_mb = record.size_mb(),
                    duration = %rule.duration,
                    "Matched access window rule"
                );
                &rule.duration
            }
            None => &window.default_duration,
        };

        parse_duration(configured)
            .or_else(|e| {
                tracing::error!(
                    configured = %configured,
                    error = %e,
                    "Access window duration is invalid, using default"
                );
                parse_duration(&window.default_duration)
            })
            .unwrap_or_else(|e| {
                tracing::error!(
                    configured = %window.default_duration,
                    error = %e,
                    "Default access window duration is invalid, using 10m"
                );
                FALLBACK_ACCESS_WINDOW
            })
    }

    /// `min(now + window, expiresAt)`.
    pub fn access_window_end(&self, now: OffsetDateTime, record: &ArtifactRecord) -> OffsetDateTime {
        let end = now.saturating_add(self.access_window_duration(record));
        match record.expires_at {
            Some(expires_at) if expires_at < end => expires_at,
            _ => end,
        }
    }

    /// Stamp `firstAccessedTime` and `accessWindowEndsAt` on a record's first read.
    ///
    /// Returns true when the record changed and must be persisted. Records that
    /// were already stamped, or policies without access windows, are untouched.
    pub fn stamp_first_access(&self, record: &mut ArtifactRecord, now: OffsetDateTime) -> bool {
        if !self.tracks_access_window() || record.first_accessed_time.is_some() {
            return false;
        }
        let ends_at = self.access_window_end(now, record);
        record.first_accessed_time = Some(now);
        record.access_window_ends_at = Some(ends_at);
        true
    }
}

fn rule_matches(rule: &AccessWindowRule, is_text: bool, extension: Option<&str>, size_mb: f64) -> bool {
    let type_match = rule.types.iter().any(|t| {
        t == "*" || (is_text && t == "text") || (!is_text && extension.is_some_and(|ext| t == ext))
    });
    if !type_match {
        return false;
    }

    if is_text {
        // Size bounds only describe files.
        return rule.min_size_mb == 0 && rule.max_size_mb == 0;
    }
    if rule.min_size_mb > 0 && size_mb < rule.min_size_mb as f64 {
        return false;
    }
    if rule.max_size_mb > 0 && size_mb >= rule.max_size_mb as f64 {
        return false;
    }
    true
}

/// Deadline used when expiration is switched off: 100 calendar years out.
fn far_future(now: OffsetDateTime) -> OffsetDateTime {
    now.replace_year(now.year() + 100)
        .unwrap_or_else(|_| now.saturating_add(Duration::days(36_525)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccessWindowConfig;
    use time::macros::datetime;

    const MIB: u64 = 1024 * 1024;

    fn rule(types: &[&str], min: u64, max: u64, duration: &str) -> AccessWindowRule {
        AccessWindowRule {
            types: types.iter().map(|t| t.to_string()).collect(),
            min_size_mb: min,
            max_size_mb: max,
            duration: duration.to_string(),
        }
    }

    fn policy_with_rules(rules: Vec<AccessWindowRule>) -> ExpirationPolicy {
        ExpirationPolicy::new(ExpirationConfig {
            enabled: true,
            mode: ExpirationMode::Forced,
            default_duration: "24h".to_string(),
            access_window: AccessWindowConfig {
                enabled: true,
                default_duration: "10m".to_string(),
                rules,
            },
        })
    }

    fn file(name: &str, size: u64, expires_at: OffsetDateTime) -> ArtifactRecord {
        ArtifactRecord::file(
            name.to_string(),
            size,
            "iv".to_string(),
            "salt".to_string(),
            "application/octet-stream".to_string(),
            None,
            expires_at,
        )
    }

    fn text(expires_at: OffsetDateTime) -> ArtifactRecord {
        ArtifactRecord::text(
            "c".to_string(),
            "iv".to_string(),
            "salt".to_string(),
            None,
            None,
            expires_at,
        )
    }

    #[test]
    fn forced_mode_ignores_request() {
        let now = datetime!(2030-01-01 00:00 UTC);
        let policy = policy_with_rules(Vec::new());
        assert_eq!(
            policy.primary_expiry(now, Some("5m")),
            now + Duration::hours(24)
        );
    }

    #[test]
    fn free_mode_honors_valid_request() {
        let now = datetime!(2030-01-01 00:00 UTC);
        let mut config = policy_with_rules(Vec::new()).config().clone();
        config.mode = ExpirationMode::Free;
        let policy = ExpirationPolicy::new(config);

        assert_eq!(policy.primary_expiry(now, Some("5m")), now + Duration::minutes(5));
        assert_eq!(policy.primary_expiry(now, Some("garbage")), now + Duration::hours(24));
        assert_eq!(policy.primary_expiry(now, Some("-5m")), now + Duration::hours(24));
        assert_eq!(policy.primary_expiry(now, Some("0")), now + Duration::hours(24));
        assert_eq!(policy.primary_expiry(now, Some("")), now + Duration::hours(24));
        assert_eq!(policy.primary_expiry(now, None), now + Duration::hours(24));
    }

    #[test]
    fn disabled_expiration_is_far_future() {
        let now = datetime!(2030-06-15 12:00 UTC);
        let mut config = policy_with_rules(Vec::new()).config().clone();
        config.enabled = false;
        let policy = ExpirationPolicy::new(config);

        assert_eq!(policy.primary_expiry(now, Some("5m")), datetime!(2130-06-15 12:00 UTC));
        let leap = datetime!(2000-02-29 00:00 UTC);
        assert_eq!(
            policy.primary_expiry(leap, None),
            leap + Duration::days(36_525)
        );
        assert!(!policy.tracks_access_window());
    }

    #[test]
    fn unparseable_default_falls_back_to_a_day() {
        let now = datetime!(2030-01-01 00:00 UTC);
        let mut config = policy_with_rules(Vec::new()).config().clone();
        config.default_duration = "whenever".to_string();
        let policy = ExpirationPolicy::new(config);
        assert_eq!(policy.primary_expiry(now, None), now + Duration::hours(24));
    }

    #[test]
    fn rule_matching_by_type_and_size() {
        let expires = datetime!(2031-01-01 00:00 UTC);
        let policy = policy_with_rules(vec![
            rule(&["pdf"], 0, 10, "5m"),
            rule(&["*"], 0, 0, "1h"),
        ]);

        let small_pdf = file("doc.pdf", 5 * MIB, expires);
        let big_pdf = file("doc.pdf", 20 * MIB, expires);
        let txt = file("notes.txt", MIB, expires);

        assert_eq!(policy.access_window_duration(&small_pdf), Duration::minutes(5));
        assert_eq!(policy.access_window_duration(&big_pdf), Duration::hours(1));
        assert_eq!(policy.access_window_duration(&txt), Duration::hours(1));
    }

    #[test]
    fn size_bounds_are_inclusive_min_exclusive_max() {
        let expires = datetime!(2031-01-01 00:00 UTC);
        let policy = policy_with_rules(vec![rule(&["zip"], 1, 10, "2m")]);

        assert_eq!(policy.matching_rule(&file("a.zip", MIB, expires)), Some(0));
        assert_eq!(policy.matching_rule(&file("a.zip", MIB - 1, expires)), None);
        assert_eq!(policy.matching_rule(&file("a.zip", 10 * MIB - 1, expires)), Some(0));
        assert_eq!(policy.matching_rule(&file("a.zip", 10 * MIB, expires)), None);
        assert_eq!(
            policy.access_window_duration(&file("a.zip", 10 * MIB, expires)),
            Duration::minutes(10)
        );
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        let expires = datetime!(2031-01-01 00:00 UTC);
        let policy = policy_with_rules(vec![rule(&["jpg", "png"], 0, 0, "3m")]);
        assert_eq!(policy.matching_rule(&file("IMG_1.JPG", MIB, expires)), Some(0));
        assert_eq!(policy.matching_rule(&file("README", MIB, expires)), None);
    }

    #[test]
    fn text_rules_ignore_sized_entries() {
        let expires = datetime!(2031-01-01 00:00 UTC);
        let policy = policy_with_rules(vec![
            rule(&["text"], 0, 5, "1m"),
            rule(&["text"], 0, 0, "2m"),
        ]);
        assert_eq!(policy.matching_rule(&text(expires)), Some(1));
        assert_eq!(policy.access_window_duration(&text(expires)), Duration::minutes(2));

        let files_only = policy_with_rules(vec![rule(&["txt"], 0, 0, "1m")]);
        assert_eq!(files_only.matching_rule(&text(expires)), None);
    }

    #[test]
    fn bad_rule_duration_falls_back() {
        let expires = datetime!(2031-01-01 00:00 UTC);
        let policy = policy_with_rules(vec![rule(&["*"], 0, 0, "nope")]);
        assert_eq!(policy.access_window_duration(&text(expires)), Duration::minutes(10));

        let mut config = policy.config().clone();
        config.access_window.default_duration = "also-nope".to_string();
        let policy = ExpirationPolicy::new(config);
        assert_eq!(policy.access_window_duration(&text(expires)), Duration::minutes(10));
    }

    #[test]
    fn window_is_capped_at_primary_expiry() {
        let now = datetime!(2030-01-01 00:00 UTC);
        let policy = policy_with_rules(vec![rule(&["*"], 0, 0, "1h")]);
        let mut record = text(now + Duration::minutes(1));

        assert!(policy.stamp_first_access(&mut record, now));
        assert_eq!(record.first_accessed_time, Some(now));
        assert_eq!(record.access_window_ends_at, record.expires_at);
    }

    #[test]
    fn stamping_is_write_once() {
        let now = datetime!(2030-01-01 00:00 UTC);
        let policy = policy_with_rules(Vec::new());
        let mut record = text(now + Duration::days(1));

        assert!(policy.stamp_first_access(&mut record, now));
        let first = record.clone();
        assert!(!policy.stamp_first_access(&mut record, now + Duration::minutes(1)));
        assert_eq!(record, first);
        assert_eq!(record.access_window_ends_at, Some(now + Duration::minutes(10)));
    }

    #[test]
    fn stamping_disabled_without_window_tracking() {
        let now = datetime!(2030-01-01 00:00 UTC);
        let mut config = policy_with_rules(Vec::new()).config().clone();
        config.access_window.enabled = false;
        let policy = ExpirationPolicy::new(config);
        let mut record = text(now + Duration::days(1));

        assert!(!policy.stamp_first_access(&mut record, now));
        assert_eq!(record.first_accessed_time, None);
    }
}
