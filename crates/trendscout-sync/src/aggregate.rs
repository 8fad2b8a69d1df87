use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use trendscout_core::{EngagementSummary, Estimation, PostMetrics};

const FALLBACK_LIKES_PER_SIGHTING: f64 = 1000.0;
const FALLBACK_COMMENTS_PER_SIGHTING: f64 = 50.0;
const FALLBACK_VIEWS_PER_SIGHTING: f64 = 20000.0;
const VIEWS_MULTIPLIER_MIN: f64 = 15.0;
const VIEWS_MULTIPLIER_MAX: f64 = 25.0;

/// Source of synthetic figures when real ones are missing.
pub trait EstimationPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Views-per-engagement multiplier used when no sampled video showed a
    /// view counter. `None` leaves views at zero.
    fn views_multiplier(&self) -> Option<f64>;

    /// Whether a hashtag with no usable samples gets frequency-scaled figures.
    fn frequency_fallback(&self) -> bool {
        true
    }
}

/// Uniform multiplier in [15, 25].
#[derive(Debug)]
pub struct RandomEstimation {
    rng: Mutex<StdRng>,
}

impl RandomEstimation {
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl EstimationPolicy for RandomEstimation {
    fn name(&self) -> &'static str {
        "random"
    }

    fn views_multiplier(&self) -> Option<f64> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        Some(rng.random_range(VIEWS_MULTIPLIER_MIN..=VIEWS_MULTIPLIER_MAX))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedMultiplier(pub f64);

impl EstimationPolicy for FixedMultiplier {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn views_multiplier(&self) -> Option<f64> {
        Some(self.0)
    }
}

/// Never invents numbers: missing figures stay zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEstimation;

impl EstimationPolicy for NoEstimation {
    fn name(&self) -> &'static str {
        "none"
    }

    fn views_multiplier(&self) -> Option<f64> {
        None
    }

    fn frequency_fallback(&self) -> bool {
        false
    }
}

pub struct EngagementAggregator {
    policy: Box<dyn EstimationPolicy>,
}

impl EngagementAggregator {
    pub fn new(policy: Box<dyn EstimationPolicy>) -> Self {
        Self { policy }
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Summarize the sampled posts of one hashtag seen `frequency` times.
    pub fn aggregate(&self, frequency: u32, samples: &[PostMetrics]) -> EngagementSummary {
        if samples.is_empty() {
            if !self.policy.frequency_fallback() {
                return EngagementSummary::default();
            }
            let f = f64::from(frequency);
            return EngagementSummary {
                avg_likes: f * FALLBACK_LIKES_PER_SIGHTING,
                avg_comments: f * FALLBACK_COMMENTS_PER_SIGHTING,
                avg_engagement: f * (FALLBACK_LIKES_PER_SIGHTING + FALLBACK_COMMENTS_PER_SIGHTING),
                avg_views: f * FALLBACK_VIEWS_PER_SIGHTING,
                total_engagement: f * (FALLBACK_LIKES_PER_SIGHTING + FALLBACK_COMMENTS_PER_SIGHTING),
                total_views: f * FALLBACK_VIEWS_PER_SIGHTING,
                video_count: 0,
                estimation: Some(Estimation::FrequencyScaled { frequency }),
            };
        }

        let n = samples.len() as f64;
        let total_likes: f64 = samples.iter().map(|s| s.likes as f64).sum();
        let total_comments: f64 = samples.iter().map(|s| s.comments as f64).sum();
        let total_engagement: f64 = samples.iter().map(|s| s.engagement() as f64).sum();
        let avg_engagement = total_engagement / n;

        let video_count = samples.iter().filter(|s| s.is_video).count() as u32;
        let measured: Vec<u64> = samples
            .iter()
            .filter(|s| s.is_video)
            .filter_map(|s| s.views)
            .collect();

        let (avg_views, total_views, estimation) = if measured.is_empty() {
            match self.policy.views_multiplier() {
                Some(multiplier) => {
                    let avg_views = avg_engagement * multiplier;
                    (
                        avg_views,
                        avg_views * n,
                        Some(Estimation::ViewsFromEngagement { multiplier }),
                    )
                }
                None => (0.0, 0.0, None),
            }
        } else {
            let total: f64 = measured.iter().map(|v| *v as f64).sum();
            (total / measured.len() as f64, total, None)
        };

        EngagementSummary {
            avg_likes: total_likes / n,
            avg_comments: total_comments / n,
            avg_engagement,
            avg_views,
            total_engagement,
            total_views,
            video_count,
            estimation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(likes: u64, comments: u64, views: Option<u64>, is_video: bool) -> PostMetrics {
        PostMetrics {
            likes,
            comments,
            views,
            is_video,
        }
    }

    #[test]
    fn empty_samples_scale_with_frequency() {
        let agg = EngagementAggregator::new(Box::new(FixedMultiplier(20.0)));
        let summary = agg.aggregate(3, &[]);

        assert_eq!(summary.avg_likes, 3000.0);
        assert_eq!(summary.avg_comments, 150.0);
        assert_eq!(summary.avg_engagement, 3150.0);
        assert_eq!(summary.avg_views, 60000.0);
        assert_eq!(summary.total_engagement, 3150.0);
        assert_eq!(summary.total_views, 60000.0);
        assert_eq!(summary.video_count, 0);
        assert_eq!(summary.estimation, Some(Estimation::FrequencyScaled { frequency: 3 }));
    }

    #[test]
    fn fallback_is_linear_in_frequency() {
        let agg = EngagementAggregator::new(Box::new(RandomEstimation::seeded(1)));
        let summary = agg.aggregate(4, &[]);
        assert_eq!(summary.avg_likes, 4000.0);
        assert_eq!(summary.avg_comments, 200.0);
        assert_eq!(summary.avg_engagement, 4200.0);
        assert_eq!(summary.avg_views, 80000.0);
    }

    #[test]
    fn any_video_sample_means_measured_views() {
        let agg = EngagementAggregator::new(Box::new(RandomEstimation::seeded(42)));
        for _ in 0..20 {
            let summary = agg.aggregate(1, &[post(500, 20, None, false), post(80, 4, Some(7000), true)]);
            assert_eq!(summary.avg_views, 7000.0);
            assert_eq!(summary.total_views, 7000.0);
            assert_eq!(summary.estimation, None);
        }
    }

    #[test]
    fn views_average_only_over_videos() {
        let agg = EngagementAggregator::new(Box::new(NoEstimation));
        let summary = agg.aggregate(
            5,
            &[post(100, 10, None, false), post(300, 30, Some(9000), true), post(200, 20, Some(3000), true)],
        );

        assert_eq!(summary.avg_likes, 200.0);
        assert_eq!(summary.avg_comments, 20.0);
        assert_eq!(summary.avg_engagement, 220.0);
        assert_eq!(summary.total_engagement, 660.0);
        assert_eq!(summary.avg_views, 6000.0);
        assert_eq!(summary.total_views, 12000.0);
        assert_eq!(summary.video_count, 2);
        assert_eq!(summary.estimation, None);
    }

    #[test]
    fn video_without_view_counter_is_estimated_not_zero() {
        let agg = EngagementAggregator::new(Box::new(FixedMultiplier(20.0)));
        let summary = agg.aggregate(1, &[post(2000, 1, None, true)]);

        assert_eq!(summary.video_count, 1);
        assert_eq!(summary.avg_views, 40020.0);
        assert_eq!(summary.total_views, 40020.0);
        assert_eq!(
            summary.estimation,
            Some(Estimation::ViewsFromEngagement { multiplier: 20.0 })
        );

        let agg = EngagementAggregator::new(Box::new(RandomEstimation::seeded(3)));
        let summary = agg.aggregate(1, &[post(2000, 1, None, true)]);
        assert!(summary.avg_views >= 2001.0 * 15.0 && summary.avg_views <= 2001.0 * 25.0);
        assert!(matches!(summary.estimation, Some(Estimation::ViewsFromEngagement { .. })));
    }

    #[test]
    fn unread_video_counters_do_not_dilute_measured_views() {
        let agg = EngagementAggregator::new(Box::new(FixedMultiplier(20.0)));
        let summary = agg.aggregate(
            2,
            &[post(100, 0, Some(9000), true), post(300, 0, None, true)],
        );

        assert_eq!(summary.video_count, 2);
        assert_eq!(summary.avg_views, 9000.0);
        assert_eq!(summary.total_views, 9000.0);
        assert_eq!(summary.estimation, None);
    }

    #[test]
    fn views_are_estimated_from_engagement_without_videos() {
        let agg = EngagementAggregator::new(Box::new(FixedMultiplier(20.0)));
        let summary = agg.aggregate(2, &[post(90, 10, None, false), post(190, 10, None, false)]);

        assert_eq!(summary.avg_engagement, 150.0);
        assert_eq!(summary.avg_views, 3000.0);
        assert_eq!(summary.total_views, 6000.0);
        assert_eq!(
            summary.estimation,
            Some(Estimation::ViewsFromEngagement { multiplier: 20.0 })
        );
    }

    #[test]
    fn random_multiplier_stays_in_range_and_is_seedable() {
        let a = RandomEstimation::seeded(7);
        let b = RandomEstimation::seeded(7);
        for _ in 0..200 {
            let m = a.views_multiplier().unwrap();
            assert!((15.0..=25.0).contains(&m), "multiplier {m} out of range");
            assert_eq!(Some(m), b.views_multiplier());
        }
    }

    #[test]
    fn no_estimation_yields_zeros() {
        let agg = EngagementAggregator::new(Box::new(NoEstimation));
        assert_eq!(agg.aggregate(4, &[]), EngagementSummary::default());

        let summary = agg.aggregate(4, &[post(10, 5, None, false)]);
        assert_eq!(summary.avg_views, 0.0);
        assert_eq!(summary.total_views, 0.0);
        assert_eq!(summary.avg_engagement, 15.0);
    }
}
