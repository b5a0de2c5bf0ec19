use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sentinel for "no limit" on the number of kept versions.
pub const UNLIMITED_VERSIONS: u32 = u32::MAX;

/// A unit of wall-clock time used by the convenience constructors below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl TimeUnit {
    fn as_secs(self) -> u64 {
        match self {
            TimeUnit::Seconds => 1,
            TimeUnit::Minutes => 60,
            TimeUnit::Hours => 3600,
            TimeUnit::Days => 24 * 3600,
            TimeUnit::Weeks => 7 * 24 * 3600,
        }
    }

    fn label(self, n: u64) -> &'static str {
        let plural = n != 1;
        match (self, plural) {
            (TimeUnit::Seconds, false) => "second",
            (TimeUnit::Seconds, true) => "seconds",
            (TimeUnit::Minutes, false) => "minute",
            (TimeUnit::Minutes, true) => "minutes",
            (TimeUnit::Hours, false) => "hour",
            (TimeUnit::Hours, true) => "hours",
            (TimeUnit::Days, false) => "day",
            (TimeUnit::Days, true) => "days",
            (TimeUnit::Weeks, false) => "week",
            (TimeUnit::Weeks, true) => "weeks",
        }
    }

    fn to_duration(self, n: u64) -> Duration {
        Duration::from_secs(self.as_secs().saturating_mul(n))
    }
}

/// A retention rule: "for the first `time_frame` after a new version of a
/// file is created, keep at most `max_versions` versions of that file for
/// each `min_interval`-long window."
///
/// `description` is purely cosmetic — it exists for display in a
/// collaborator UI and is not part of any invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupPolicy {
    #[serde(with = "duration_millis")]
    pub min_interval: Duration,
    #[serde(with = "duration_millis")]
    pub time_frame: Duration,
    pub max_versions: u32,
    pub description: String,
}

impl PartialEq for CleanupPolicy {
    fn eq(&self, other: &Self) -> bool {
        self.min_interval == other.min_interval
            && self.time_frame == other.time_frame
            && self.max_versions == other.max_versions
    }
}

/// The largest `Duration` that round-trips through the millisecond-integer
/// on-disk representation without overflowing an `i64`.
const MAX_REPRESENTABLE: Duration = Duration::from_millis(i64::MAX as u64);

impl CleanupPolicy {
    pub fn new(
        min_interval: Duration,
        time_frame: Duration,
        max_versions: u32,
        description: impl Into<String>,
    ) -> Self {
        Self {
            min_interval,
            time_frame,
            max_versions,
            description: description.into(),
        }
        .truncated()
    }

    /// Keep the last `n` versions of each path, regardless of age.
    pub fn of_versions(n: u32) -> Self {
        Self::new(
            MAX_REPRESENTABLE,
            MAX_REPRESENTABLE,
            n,
            format!("Keep the last {n} versions."),
        )
    }

    /// Keep every version created within the last `n` `unit`s.
    pub fn of_duration(n: u64, unit: TimeUnit) -> Self {
        let span = unit.to_duration(n);
        Self::new(
            span,
            span,
            UNLIMITED_VERSIONS,
            format!("Keep every version from the last {n} {}.", unit.label(n)),
        )
    }

    /// Keep only the single newest version from each `unit`-long window, over
    /// the last `n` `unit`s.
    pub fn of_staggered(n: u64, unit: TimeUnit) -> Self {
        let window = unit.to_duration(1);
        let span = unit.to_duration(n);
        Self::new(
            window,
            span,
            1,
            format!(
                "For the last {n} {}, keep only the last version from each {}.",
                unit.label(n),
                unit.label(1),
            ),
        )
    }

    /// Keep every version forever.
    pub fn forever() -> Self {
        Self::new(
            MAX_REPRESENTABLE,
            MAX_REPRESENTABLE,
            UNLIMITED_VERSIONS,
            "Keep every version forever.",
        )
    }

    /// Clamp `min_interval`/`time_frame` to the range representable as
    /// milliseconds in an `i64`. Idempotent: `p.truncated().truncated() ==
    /// p.truncated()`.
    pub fn truncated(&self) -> Self {
        Self {
            min_interval: self.min_interval.min(MAX_REPRESENTABLE),
            time_frame: self.time_frame.min(MAX_REPRESENTABLE),
            max_versions: self.max_versions,
            description: self.description.clone(),
        }
    }

    /// Number of `min_interval`-sized windows covering `time_frame`.
    pub fn window_count(&self) -> u64 {
        if self.min_interval.is_zero() {
            return 0;
        }
        (self.time_frame.as_millis() / self.min_interval.as_millis().max(1)) as u64
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    const MAX_MILLIS: i64 = i64::MAX;

    pub fn serialize<S: Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
        let millis = duration.as_millis();
        let clamped = if millis > MAX_MILLIS as u128 {
            MAX_MILLIS
        } else {
            millis as i64
        };
        clamped.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = i64::deserialize(d)?;
        Ok(Duration::from_millis(millis.max(0) as u64))
    }
}

#[test]
fn truncated_is_idempotent() {
    let policy = CleanupPolicy::forever();
    assert_eq!(policy.truncated(), policy.truncated().truncated());
}

#[test]
fn staggered_description_matches_expected_wording() {
    let policy = CleanupPolicy::of_staggered(24, TimeUnit::Hours);
    assert_eq!(policy.min_interval, Duration::from_secs(3600));
    assert_eq!(policy.time_frame, Duration::from_secs(24 * 3600));
    assert_eq!(policy.max_versions, 1);
    assert_eq!(
        policy.description,
        "For the last 24 hours, keep only the last version from each hour."
    );
}

#[test]
fn serialization_roundtrips_as_millis() {
    let policy = CleanupPolicy::of_duration(7, TimeUnit::Days);
    let json = serde_json::to_value(&policy).unwrap();
    assert_eq!(json["min_interval"], Duration::from_secs(7 * 24 * 3600).as_millis() as i64);
    let back: CleanupPolicy = serde_json::from_value(json).unwrap();
    assert_eq!(policy, back);
}
