use std::collections::BTreeSet;
use std::time::Duration;

/// Cap applied to upstream `Retry-After` hints surfaced to callers and used
/// between attempts.
pub const SHORT_COOLDOWN: Duration = Duration::from_secs(5);

/// Per-provider retry policy. The backoff schedule is finite; the last value
/// repeats for attempts beyond its length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPlan {
    pub max_retries: u32,
    pub backoff: Vec<Duration>,
    pub retryable_statuses: BTreeSet<u16>,
}

impl Default for RetryPlan {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ],
            retryable_statuses: [429, 502, 503, 504].into_iter().collect(),
        }
    }
}

impl RetryPlan {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Vec::new(),
            retryable_statuses: [429, 502, 503, 504].into_iter().collect(),
        }
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Sleep before retry number `attempt` (0-based). The last schedule
    /// entry repeats.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        match self.backoff.as_slice() {
            [] => Duration::ZERO,
            schedule => *schedule
                .get(attempt as usize)
                .unwrap_or_else(|| schedule.last().expect("nonempty schedule")),
        }
    }

    /// Total upstream calls this plan may make.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// Parses a `Retry-After` header in either RFC 7231 form: delta-seconds or
/// an HTTP-date. A date already in the past yields no hint.
pub fn parse_retry_after(headers: &[(String, String)]) -> Option<Duration> {
    let value = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
        .map(|(_, value)| value.trim())?;
    if value.is_empty() {
        return None;
    }
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = httpdate::parse_http_date(value).ok()?;
    when.duration_since(std::time::SystemTime::now()).ok()
}

/// Caps an upstream retry hint to the short cooldown.
pub fn capped_retry_after(hint: Option<Duration>) -> Duration {
    hint.map(|value| value.min(SHORT_COOLDOWN))
        .unwrap_or(SHORT_COOLDOWN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_backoff_value_repeats() {
        let plan = RetryPlan {
            max_retries: 5,
            backoff: vec![Duration::from_millis(1), Duration::from_millis(2)],
            ..RetryPlan::default()
        };
        assert_eq!(plan.backoff_for(0), Duration::from_millis(1));
        assert_eq!(plan.backoff_for(1), Duration::from_millis(2));
        assert_eq!(plan.backoff_for(9), Duration::from_millis(2));
    }

    #[test]
    fn empty_schedule_means_no_sleep() {
        assert_eq!(RetryPlan::none().backoff_for(0), Duration::ZERO);
    }

    #[test]
    fn default_retryable_statuses() {
        let plan = RetryPlan::default();
        for status in [429, 502, 503, 504] {
            assert!(plan.is_retryable_status(status));
        }
        assert!(!plan.is_retryable_status(500));
        assert!(!plan.is_retryable_status(404));
    }

    #[test]
    fn retry_after_is_parsed_and_capped() {
        let headers = vec![("Retry-After".to_string(), "60".to_string())];
        let hint = parse_retry_after(&headers);
        assert_eq!(hint, Some(Duration::from_secs(60)));
        assert_eq!(capped_retry_after(hint), SHORT_COOLDOWN);
        assert_eq!(
            capped_retry_after(Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
        assert_eq!(capped_retry_after(None), SHORT_COOLDOWN);
    }

    #[test]
    fn retry_after_http_date_form_is_parsed() {
        let future = std::time::SystemTime::now() + Duration::from_secs(120);
        let headers = vec![("Retry-After".to_string(), httpdate::fmt_http_date(future))];
        let hint = parse_retry_after(&headers).expect("date form must parse");
        // Formatting truncates sub-second precision; allow a little slack.
        assert!(hint > Duration::from_secs(100));
        assert!(hint <= Duration::from_secs(120));
        assert_eq!(capped_retry_after(Some(hint)), SHORT_COOLDOWN);
    }

    #[test]
    fn retry_after_past_date_yields_no_hint() {
        let past = std::time::SystemTime::now() - Duration::from_secs(300);
        let headers = vec![("Retry-After".to_string(), httpdate::fmt_http_date(past))];
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn retry_after_garbage_yields_no_hint() {
        let headers = vec![("Retry-After".to_string(), "soonish".to_string())];
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn total_sleep_is_bounded_by_the_schedule() {
        let plan = RetryPlan {
            max_retries: 3,
            backoff: vec![Duration::from_millis(1); 4],
            ..RetryPlan::default()
        };
        let total: Duration = (0..plan.max_retries).map(|i| plan.backoff_for(i)).sum();
        assert!(total <= Duration::from_millis(4));
        assert_eq!(plan.max_attempts(), 4);
    }
}
