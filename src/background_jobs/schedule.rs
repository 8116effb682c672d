use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, TimeZone, Timelike, Utc};
use std::time::Duration;

/// Cron-style cadence, restricted to the forms this deployment uses.
///
/// Supported expressions are `"M H * * *"` (daily at H:M UTC) and
/// `"M * * * *"` (hourly at minute M). Day-of-month, month and
/// day-of-week fields must be `*`; anything else is rejected at config
/// resolution rather than silently misfiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobCadence {
    minute: u32,
    /// `None` means every hour.
    hour: Option<u32>,
}

impl JobCadence {
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            bail!(
                "Cron expression '{}' must have 5 fields, found {}",
                expr,
                fields.len()
            );
        }

        let minute: u32 = fields[0]
            .parse()
            .with_context(|| format!("Invalid minute field '{}' in '{}'", fields[0], expr))?;
        if minute > 59 {
            bail!("Minute {} out of range in '{}'", minute, expr);
        }

        let hour = match fields[1] {
            "*" => None,
            h => {
                let hour: u32 = h
                    .parse()
                    .with_context(|| format!("Invalid hour field '{}' in '{}'", h, expr))?;
                if hour > 23 {
                    bail!("Hour {} out of range in '{}'", hour, expr);
                }
                Some(hour)
            }
        };

        for (field, name) in fields[2..].iter().zip(["day-of-month", "month", "day-of-week"]) {
            if *field != "*" {
                bail!(
                    "Unsupported {} field '{}' in '{}': only '*' is supported",
                    name,
                    field,
                    expr
                );
            }
        }

        Ok(Self { minute, hour })
    }

    /// The first fire strictly after `after`.
    pub fn next_fire(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let candidate = match self.hour {
            Some(hour) => {
                let time =
                    NaiveTime::from_hms_opt(hour, self.minute, 0).unwrap_or(NaiveTime::MIN);
                Utc.from_utc_datetime(&after.date_naive().and_time(time))
            }
            None => {
                let time = NaiveTime::from_hms_opt(after.hour(), self.minute, 0)
                    .unwrap_or(NaiveTime::MIN);
                Utc.from_utc_datetime(&after.date_naive().and_time(time))
            }
        };

        if candidate > after {
            candidate
        } else if self.hour.is_some() {
            candidate + ChronoDuration::days(1)
        } else {
            candidate + ChronoDuration::hours(1)
        }
    }

    /// Sleep duration from `now` to the next fire.
    pub fn until_next_fire(&self, now: DateTime<Utc>) -> Duration {
        (self.next_fire(now) - now)
            .to_std()
            .unwrap_or(Duration::from_secs(1))
    }

    /// Minimum spacing between two consecutive fires. The lock acquisition
    /// timeout must stay strictly below this, so a stalled acquisition can
    /// never overlap the next tick.
    pub fn min_spacing(&self) -> Duration {
        match self.hour {
            Some(_) => Duration::from_secs(24 * 60 * 60),
            None => Duration::from_secs(60 * 60),
        }
    }
}

impl std::fmt::Display for JobCadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.hour {
            Some(hour) => write!(f, "{} {} * * *", self.minute, hour),
            None => write!(f, "{} * * * *", self.minute),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn parses_daily_expression() {
        let cadence = JobCadence::parse("0 3 * * *").unwrap();
        assert_eq!(cadence.to_string(), "0 3 * * *");
        assert_eq!(cadence.min_spacing(), Duration::from_secs(86_400));
    }

    #[test]
    fn parses_hourly_expression() {
        let cadence = JobCadence::parse("30 * * * *").unwrap();
        assert_eq!(cadence.to_string(), "30 * * * *");
        assert_eq!(cadence.min_spacing(), Duration::from_secs(3_600));
    }

    #[test]
    fn rejects_malformed_expressions() {
        for expr in [
            "",
            "0 3 * *",
            "0 3 * * * *",
            "61 3 * * *",
            "0 24 * * *",
            "x 3 * * *",
            "0 3 1 * *",
            "0 3 * 2 *",
            "0 3 * * 5",
            "*/5 * * * *",
        ] {
            assert!(JobCadence::parse(expr).is_err(), "'{}' should be rejected", expr);
        }
    }

    #[test]
    fn daily_fire_later_today() {
        let cadence = JobCadence::parse("0 3 * * *").unwrap();
        let next = cadence.next_fire(utc("2026-08-23T01:00:00Z"));
        assert_eq!(next, utc("2026-08-23T03:00:00Z"));
    }

    #[test]
    fn daily_fire_rolls_to_tomorrow() {
        let cadence = JobCadence::parse("0 3 * * *").unwrap();
        let next = cadence.next_fire(utc("2026-08-23T03:00:00Z"));
        assert_eq!(next, utc("2026-08-24T03:00:00Z"));

        let next = cadence.next_fire(utc("2026-08-23T12:30:00Z"));
        assert_eq!(next, utc("2026-08-24T03:00:00Z"));
    }

    #[test]
    fn hourly_fire_within_and_across_hours() {
        let cadence = JobCadence::parse("30 * * * *").unwrap();
        assert_eq!(
            cadence.next_fire(utc("2026-08-23T10:10:00Z")),
            utc("2026-08-23T10:30:00Z")
        );
        assert_eq!(
            cadence.next_fire(utc("2026-08-23T10:30:00Z")),
            utc("2026-08-23T11:30:00Z")
        );
        assert_eq!(
            cadence.next_fire(utc("2026-08-23T23:45:00Z")),
            utc("2026-08-24T00:30:00Z")
        );
    }

    #[test]
    fn until_next_fire_is_positive() {
        let cadence = JobCadence::parse("0 3 * * *").unwrap();
        let wait = cadence.until_next_fire(Utc::now());
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_secs(86_400));
    }
}
