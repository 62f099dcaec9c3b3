//! # Sighting Aggregator
//!
//! Turns noisy per-frame detections into one stable sighting per landmark:
//! cache with TTL, statistical outlier rejection, time-bucket merge across
//! landmarks, and smoothing over the most recent buckets.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use util::maths;

use super::Sighting;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Aggregation tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorParams {
    /// Ring buffer capacity per landmark.
    pub cache_capacity: usize,

    /// Sightings older than this are evicted on every read, seconds.
    pub cache_ttl_s: f64,

    /// Minimum cached sightings before outlier rejection activates.
    pub min_samples: usize,

    /// A sighting is an outlier when any tracked statistic deviates from the
    /// mean by more than this many standard deviations.
    pub allowed_dev: f64,

    /// Decimal places timestamps are rounded to when forming time buckets.
    /// 1 gives 100 ms buckets.
    pub seconds_rounding_decimal: u32,

    /// Maximum seconds a sighting may be borrowed across buckets during the
    /// merge.
    pub max_pair_distance_s: f64,

    /// Buckets with fewer distinct landmarks than this are dropped.
    pub match_threshold: usize,

    /// Number of most-recent buckets averaged by smoothing.
    pub max_ticks_to_use: usize,
}

/// Per-landmark ring buffer of recent sightings.
#[derive(Debug, Clone, Default)]
pub struct SightingCache {
    buffers: HashMap<String, VecDeque<Sighting>>,
}

/// One merged time bucket: at most one sighting per landmark.
#[derive(Debug, Clone)]
pub struct TimeBucket {
    pub key: i64,
    pub timestamp: DateTime<Utc>,
    pub sightings: HashMap<String, Sighting>,
}

/// The full pipeline over one camera's sightings.
#[derive(Debug, Clone)]
pub struct Aggregator {
    params: AggregatorParams,
    cache: SightingCache,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for AggregatorParams {
    fn default() -> Self {
        Self {
            cache_capacity: 10,
            cache_ttl_s: 10.0,
            min_samples: 3,
            allowed_dev: 1.75,
            seconds_rounding_decimal: 1,
            max_pair_distance_s: 0.5,
            match_threshold: 1,
            max_ticks_to_use: 3,
        }
    }
}

impl SightingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sighting, evicting the oldest when the buffer is full.
    pub fn push(&mut self, sighting: Sighting, capacity: usize) {
        let buffer = self
            .buffers
            .entry(sighting.landmark_id.clone())
            .or_insert_with(VecDeque::new);

        if buffer.len() >= capacity {
            buffer.pop_front();
        }
        buffer.push_back(sighting);
    }

    /// Drop everything older than the TTL.
    pub fn evict_expired(&mut self, now: DateTime<Utc>, ttl_s: f64) {
        let cutoff = now - Duration::milliseconds((ttl_s * 1000.0) as i64);
        for buffer in self.buffers.values_mut() {
            buffer.retain(|s| s.timestamp >= cutoff);
        }
        self.buffers.retain(|_, buffer| !buffer.is_empty());
    }

    /// All cached sightings, grouped per landmark.
    pub fn per_landmark(&self) -> &HashMap<String, VecDeque<Sighting>> {
        &self.buffers
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}

impl Aggregator {
    pub fn new(params: AggregatorParams) -> Self {
        Self {
            params,
            cache: SightingCache::new(),
        }
    }

    /// Feed one frame's detections through the pipeline and return the
    /// smoothed sighting per landmark, or an empty vec when nothing stable
    /// is available yet.
    pub fn aggregate(&mut self, raw: Vec<Sighting>, now: DateTime<Utc>) -> Vec<Sighting> {
        for sighting in raw {
            self.cache
                .push(sighting.normalized(), self.params.cache_capacity);
        }
        self.cache.evict_expired(now, self.params.cache_ttl_s);

        let filtered = filter_outliers(
            self.cache.per_landmark(),
            self.params.min_samples,
            self.params.allowed_dev,
        );

        let buckets = merge_time_groups(&filtered, &self.params);

        smooth(&buckets, self.params.max_ticks_to_use)
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Reject sightings deviating from their landmark's cached mean by more than
/// `allowed_dev` standard deviations in centre x, centre y, height, or
/// width. Landmarks with fewer than `min_samples` sightings pass unfiltered.
pub fn filter_outliers(
    per_landmark: &HashMap<String, VecDeque<Sighting>>,
    min_samples: usize,
    allowed_dev: f64,
) -> Vec<Sighting> {
    let mut out = Vec::new();

    for buffer in per_landmark.values() {
        if buffer.len() < min_samples {
            out.extend(buffer.iter().cloned());
            continue;
        }

        let stats = [
            stat_bounds(buffer.iter().map(|s| s.center_x()), allowed_dev),
            stat_bounds(buffer.iter().map(|s| s.center_y()), allowed_dev),
            stat_bounds(buffer.iter().map(|s| s.height_px()), allowed_dev),
            stat_bounds(buffer.iter().map(|s| s.width_px()), allowed_dev),
        ];

        for sighting in buffer {
            let values = [
                sighting.center_x(),
                sighting.center_y(),
                sighting.height_px(),
                sighting.width_px(),
            ];

            let ok = values
                .iter()
                .zip(stats.iter())
                .all(|(v, (lo, hi))| v >= lo && v <= hi);

            if ok {
                out.push(sighting.clone());
            }
        }
    }

    out
}

/// Group sightings into rounded-timestamp buckets, borrowing each landmark's
/// temporally nearest sighting into buckets it is missing from (when close
/// enough), and dropping buckets below the landmark-count threshold.
/// Buckets are returned newest first.
pub fn merge_time_groups(sightings: &[Sighting], params: &AggregatorParams) -> Vec<TimeBucket> {
    let dp = params.seconds_rounding_decimal;

    let mut buckets: HashMap<i64, TimeBucket> = HashMap::new();
    for sighting in sightings {
        let key = bucket_key(sighting.timestamp, dp);
        let bucket = buckets.entry(key).or_insert_with(|| TimeBucket {
            key,
            timestamp: sighting.timestamp,
            sightings: HashMap::new(),
        });

        // Within a bucket the newest sighting of a landmark wins
        let entry = bucket
            .sightings
            .entry(sighting.landmark_id.clone())
            .or_insert_with(|| sighting.clone());
        if sighting.timestamp > entry.timestamp {
            *entry = sighting.clone();
        }
        if sighting.timestamp > bucket.timestamp {
            bucket.timestamp = sighting.timestamp;
        }
    }

    let all_landmarks: Vec<String> = {
        let mut ids: Vec<String> = sightings
            .iter()
            .map(|s| s.landmark_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    };

    // Borrow missing landmarks from their nearest-in-time sighting
    for bucket in buckets.values_mut() {
        for id in &all_landmarks {
            if bucket.sightings.contains_key(id) {
                continue;
            }

            let nearest = sightings
                .iter()
                .filter(|s| &s.landmark_id == id)
                .min_by_key(|s| (s.timestamp - bucket.timestamp).num_milliseconds().abs());

            if let Some(nearest) = nearest {
                let gap_s = (nearest.timestamp - bucket.timestamp)
                    .num_milliseconds()
                    .abs() as f64
                    / 1000.0;
                if gap_s <= params.max_pair_distance_s {
                    bucket.sightings.insert(id.clone(), nearest.clone());
                }
            }
        }
    }

    let mut out: Vec<TimeBucket> = buckets
        .into_iter()
        .map(|(_, b)| b)
        .filter(|b| b.sightings.len() >= params.match_threshold)
        .collect();

    out.sort_by(|a, b| b.key.cmp(&a.key));
    out
}

/// Average each landmark's box, confidence, and corrected height across the
/// most recent `max_ticks` buckets, stamped with the newest bucket's time.
pub fn smooth(buckets: &[TimeBucket], max_ticks: usize) -> Vec<Sighting> {
    let recent = &buckets[..buckets.len().min(max_ticks)];
    if recent.is_empty() {
        return Vec::new();
    }

    let latest = recent[0].timestamp;

    let mut ids: Vec<&String> = recent
        .iter()
        .flat_map(|b| b.sightings.keys())
        .collect();
    ids.sort();
    ids.dedup();

    let mut out = Vec::new();
    for id in ids {
        let samples: Vec<&Sighting> = recent
            .iter()
            .filter_map(|b| b.sightings.get(id))
            .collect();

        let n = samples.len() as f64;
        let avg = |f: &dyn Fn(&Sighting) -> f64| samples.iter().map(|s| f(s)).sum::<f64>() / n;

        let corrected: Vec<f64> = samples
            .iter()
            .filter_map(|s| s.corrected_height)
            .collect();

        out.push(Sighting {
            landmark_id: id.clone(),
            x1: avg(&|s| s.x1),
            y1: avg(&|s| s.y1),
            x2: avg(&|s| s.x2),
            y2: avg(&|s| s.y2),
            confidence: avg(&|s| s.confidence),
            timestamp: latest,
            camera_heading: samples[0].camera_heading,
            corrected_height: if corrected.is_empty() {
                None
            } else {
                Some(corrected.iter().sum::<f64>() / corrected.len() as f64)
            },
        });
    }

    out
}

/// Bucket key for a timestamp rounded to `dp` decimal places of seconds.
pub fn bucket_key(ts: DateTime<Utc>, dp: u32) -> i64 {
    let scale = 10f64.powi(dp as i32);
    (ts.timestamp_millis() as f64 / 1000.0 * scale).round() as i64
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Acceptance band `mean +/- allowed_dev * stdev` for an iterator of values.
/// An empty iterator yields an unbounded band.
fn stat_bounds(values: impl Iterator<Item = f64>, allowed_dev: f64) -> (f64, f64) {
    let values: Vec<f64> = values.collect();
    match (maths::mean(&values), maths::stdev(&values)) {
        (Some(mean), Some(stdev)) => {
            let dev = stdev * allowed_dev;
            (mean - dev, mean + dev)
        }
        _ => (f64::NEG_INFINITY, f64::INFINITY),
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    fn ts(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis(1_700_000_000_000 + ms)
    }

    fn sighting(id: &str, cx: f64, cy: f64, size: f64, at_ms: i64) -> Sighting {
        Sighting {
            landmark_id: id.into(),
            x1: cx - size / 2.0,
            y1: cy - size / 2.0,
            x2: cx + size / 2.0,
            y2: cy + size / 2.0,
            confidence: 0.8,
            timestamp: ts(at_ms),
            camera_heading: 0.0,
            corrected_height: None,
        }
    }

    #[test]
    fn test_cache_capacity_and_ttl() {
        let mut cache = SightingCache::new();
        for i in 0..15 {
            cache.push(sighting("n1", 100.0, 100.0, 20.0, i * 100), 10);
        }
        assert_eq!(
            cache.per_landmark().get("n1").map(|b| b.len()),
            Some(10)
        );

        // Ages run ~3.6-5 s here, inside a 10 s TTL
        cache.evict_expired(ts(5_000), 10.0);
        assert_eq!(
            cache.per_landmark().get("n1").map(|b| b.len()),
            Some(10)
        );

        // Everything is older than 1 s relative to a much later now
        cache.evict_expired(ts(20_000), 1.0);
        assert!(cache.per_landmark().is_empty());
    }

    #[test]
    fn test_stat_bounds() {
        let (lo, hi) = stat_bounds([2.0f64, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0].iter().copied(), 1.0);
        assert!((lo - 3.0).abs() < 1e-12);
        assert!((hi - 7.0).abs() < 1e-12);

        // No samples: the band rejects nothing
        let (lo, hi) = stat_bounds(std::iter::empty(), 2.0);
        assert_eq!(lo, f64::NEG_INFINITY);
        assert_eq!(hi, f64::INFINITY);
    }

    #[test]
    fn test_outlier_rejected() {
        let mut per = HashMap::new();
        let mut buffer = VecDeque::new();
        for i in 0..6 {
            buffer.push_back(sighting("n1", 100.0 + i as f64, 100.0, 20.0, i * 100));
        }
        // Way off in centre x
        buffer.push_back(sighting("n1", 400.0, 100.0, 20.0, 700));
        per.insert("n1".to_string(), buffer);

        let kept = filter_outliers(&per, 3, 1.75);
        assert_eq!(kept.len(), 6);
        assert!(kept.iter().all(|s| s.center_x() < 200.0));
    }

    #[test]
    fn test_no_filtering_below_min_samples() {
        let mut per = HashMap::new();
        let mut buffer = VecDeque::new();
        buffer.push_back(sighting("n1", 100.0, 100.0, 20.0, 0));
        buffer.push_back(sighting("n1", 900.0, 100.0, 20.0, 100));
        per.insert("n1".to_string(), buffer);

        assert_eq!(filter_outliers(&per, 3, 1.75).len(), 2);
    }

    #[test]
    fn test_uniform_samples_all_kept() {
        let mut per = HashMap::new();
        let mut buffer = VecDeque::new();
        for i in 0..5 {
            buffer.push_back(sighting("n1", 100.0, 100.0, 20.0, i * 100));
        }
        per.insert("n1".to_string(), buffer);

        // Zero deviation must not reject anything
        assert_eq!(filter_outliers(&per, 3, 1.75).len(), 5);
    }

    #[test]
    fn test_merge_buckets_and_borrowing() {
        let params = AggregatorParams::default();

        // n1 at 0 and 100 ms, n2 only at 0 ms
        let sightings = vec![
            sighting("n1", 100.0, 100.0, 20.0, 0),
            sighting("n1", 101.0, 100.0, 20.0, 100),
            sighting("n2", 500.0, 100.0, 20.0, 0),
        ];

        let buckets = merge_time_groups(&sightings, &params);
        assert_eq!(buckets.len(), 2);

        // Newest first
        assert!(buckets[0].key > buckets[1].key);

        // n2 borrowed into the 100 ms bucket (gap 0.1 s <= 0.5 s)
        assert!(buckets[0].sightings.contains_key("n2"));

        // At most one sighting per landmark per bucket
        for bucket in &buckets {
            assert!(bucket.sightings.len() <= 2);
        }
    }

    #[test]
    fn test_merge_does_not_borrow_far_sightings() {
        let params = AggregatorParams::default();
        let sightings = vec![
            sighting("n1", 100.0, 100.0, 20.0, 0),
            sighting("n2", 500.0, 100.0, 20.0, 5_000),
        ];

        let buckets = merge_time_groups(&sightings, &params);
        for bucket in &buckets {
            assert_eq!(bucket.sightings.len(), 1);
        }
    }

    #[test]
    fn test_match_threshold_drops_buckets() {
        let params = AggregatorParams {
            match_threshold: 2,
            ..Default::default()
        };
        let sightings = vec![
            sighting("n1", 100.0, 100.0, 20.0, 0),
            sighting("n2", 500.0, 100.0, 20.0, 0),
            sighting("n1", 100.0, 100.0, 20.0, 5_000),
        ];

        let buckets = merge_time_groups(&sightings, &params);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].sightings.len(), 2);
    }

    #[test]
    fn test_smoothing_averages() {
        let params = AggregatorParams::default();
        let sightings = vec![
            sighting("n1", 100.0, 100.0, 20.0, 0),
            sighting("n1", 104.0, 100.0, 20.0, 100),
            sighting("n1", 108.0, 100.0, 20.0, 200),
        ];

        let buckets = merge_time_groups(&sightings, &params);
        let smoothed = smooth(&buckets, 3);

        assert_eq!(smoothed.len(), 1);
        assert!((smoothed[0].center_x() - 104.0).abs() < 1e-9);
        assert_eq!(smoothed[0].timestamp, ts(200));
    }

    #[test]
    fn test_smoothing_idempotent() {
        let params = AggregatorParams::default();
        let sightings = vec![
            sighting("n1", 100.0, 100.0, 20.0, 0),
            sighting("n1", 104.0, 98.0, 22.0, 100),
            sighting("n2", 500.0, 300.0, 30.0, 100),
        ];

        let once = smooth(&merge_time_groups(&sightings, &params), 3);
        let twice = smooth(&merge_time_groups(&once, &params), 3);

        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(twice.iter()) {
            assert_eq!(a.landmark_id, b.landmark_id);
            assert!((a.center_x() - b.center_x()).abs() < 1e-9);
            assert!((a.center_y() - b.center_y()).abs() < 1e-9);
            assert!((a.height_px() - b.height_px()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_aggregator_end_to_end() {
        let mut agg = Aggregator::new(AggregatorParams::default());

        let mut out = Vec::new();
        for i in 0..5 {
            out = agg.aggregate(
                vec![sighting("n1", 100.0 + i as f64, 100.0, 20.0, i * 100)],
                ts(i * 100),
            );
        }

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].landmark_id, "n1");
        // Smoothed over the last 3 buckets: centres 102, 103, 104
        assert!((out[0].center_x() - 103.0).abs() < 1e-9);
    }
}
