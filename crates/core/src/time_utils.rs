//! 时间相关的小工具：爬取间隔解析、分钟截断、分段计数

use chrono::{DateTime, Duration, DurationRound, Utc};

use crate::errors::{SchedulerError, SchedulerResult};

/// 爬取间隔上限
pub const MAX_CRAWL_INTERVAL_DAYS: i64 = 366;

/// 解析爬取间隔字符串
///
/// 支持 `s`/`m`/`h`/`d`/`w` 单位及其组合，例如 `"90s"`、`"1h"`、`"1h30m"`、`"1d"`。
/// 超过 [`MAX_CRAWL_INTERVAL_DAYS`] 天的间隔视为无效。
pub fn parse_interval(input: &str) -> SchedulerResult<Duration> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(SchedulerError::InvalidInterval("间隔不能为空".to_string()));
    }

    let mut total = Duration::zero();
    let mut digits = String::new();
    for ch in trimmed.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        if digits.is_empty() {
            return Err(SchedulerError::InvalidInterval(format!(
                "'{input}' 中单位 '{ch}' 前缺少数值"
            )));
        }
        let value: i64 = digits
            .parse()
            .map_err(|_| SchedulerError::InvalidInterval(format!("'{input}' 数值溢出")))?;
        digits.clear();
        let part = match ch.to_ascii_lowercase() {
            's' => Duration::try_seconds(value),
            'm' => Duration::try_minutes(value),
            'h' => Duration::try_hours(value),
            'd' => Duration::try_days(value),
            'w' => Duration::try_weeks(value),
            other => {
                return Err(SchedulerError::InvalidInterval(format!(
                    "'{input}' 包含未知单位 '{other}'"
                )))
            }
        };
        total = part
            .and_then(|part| total.checked_add(&part))
            .ok_or_else(|| SchedulerError::InvalidInterval(format!("'{input}' 数值溢出")))?;
    }

    if !digits.is_empty() {
        return Err(SchedulerError::InvalidInterval(format!(
            "'{input}' 末尾缺少单位"
        )));
    }
    if total <= Duration::zero() {
        return Err(SchedulerError::InvalidInterval(format!(
            "'{input}' 必须大于0"
        )));
    }
    if total > Duration::days(MAX_CRAWL_INTERVAL_DAYS) {
        return Err(SchedulerError::InvalidInterval(format!(
            "'{input}' 超过上限 {MAX_CRAWL_INTERVAL_DAYS} 天"
        )));
    }
    Ok(total)
}

/// `at + interval`，超出时间可表示范围时返回 `InvalidInterval`
pub fn checked_after(at: DateTime<Utc>, interval: Duration) -> SchedulerResult<DateTime<Utc>> {
    at.checked_add_signed(interval).ok_or_else(|| {
        SchedulerError::InvalidInterval(format!("{at} 之后 {interval} 超出时间范围"))
    })
}

/// 截断到分钟精度
pub fn truncate_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(Duration::minutes(1)).unwrap_or(at)
}

/// `span` 需要多少个 `segment` 长度的分段才能覆盖，向上取整
pub fn segments_covering(span: Duration, segment: Duration) -> i32 {
    let span_secs = span.num_seconds();
    let segment_secs = segment.num_seconds();
    if span_secs <= 0 || segment_secs <= 0 {
        return 0;
    }
    let count = (span_secs + segment_secs - 1) / segment_secs;
    i32::try_from(count).unwrap_or(i32::MAX)
}

pub fn to_std(duration: Duration) -> std::time::Duration {
    duration.to_std().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_interval_units() {
        assert_eq!(parse_interval("90s").unwrap(), Duration::seconds(90));
        assert_eq!(parse_interval("30m").unwrap(), Duration::minutes(30));
        assert_eq!(parse_interval("1h").unwrap(), Duration::hours(1));
        assert_eq!(parse_interval("1d").unwrap(), Duration::days(1));
        assert_eq!(parse_interval("2w").unwrap(), Duration::weeks(2));
        assert_eq!(
            parse_interval("1h30m").unwrap(),
            Duration::minutes(90)
        );
        assert_eq!(parse_interval(" 2H ").unwrap(), Duration::hours(2));
    }

    #[test]
    fn test_parse_interval_rejects_garbage() {
        assert!(parse_interval("").is_err());
        assert!(parse_interval("h").is_err());
        assert!(parse_interval("10").is_err());
        assert!(parse_interval("5x").is_err());
        assert!(parse_interval("0m").is_err());
        assert!(parse_interval("99999999999999999w").is_err());
    }

    #[test]
    fn test_parse_interval_upper_bound() {
        assert_eq!(parse_interval("366d").unwrap(), Duration::days(366));
        assert!(parse_interval("367d").is_err());
        assert!(parse_interval("99999999w").is_err());
    }

    #[test]
    fn test_checked_after_reports_overflow() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(
            checked_after(at, Duration::hours(1)).unwrap(),
            Utc.with_ymd_and_hms(2024, 6, 1, 1, 0, 0).unwrap()
        );
        assert!(matches!(
            checked_after(DateTime::<Utc>::MAX_UTC, Duration::seconds(1)),
            Err(SchedulerError::InvalidInterval(_))
        ));
    }

    #[test]
    fn test_truncate_to_minute() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 34, 56).unwrap()
            + Duration::milliseconds(789);
        let truncated = truncate_to_minute(at);
        assert_eq!(truncated, Utc.with_ymd_and_hms(2024, 6, 1, 12, 34, 0).unwrap());
    }

    #[test]
    fn test_segments_covering_rounds_up() {
        assert_eq!(segments_covering(Duration::days(14), Duration::days(7)), 2);
        assert_eq!(segments_covering(Duration::days(15), Duration::days(7)), 3);
        assert_eq!(segments_covering(Duration::days(1), Duration::days(7)), 1);
        assert_eq!(segments_covering(Duration::zero(), Duration::days(7)), 0);
    }
}
