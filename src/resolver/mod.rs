//! Folds one hashtag's samples into a single verdict.
//!
//! The listing is unordered, so the newest date is the maximum over the
//! whole capped sample, never whatever came first.

use crate::models::{LookupRequest, PostSample, RecencyVerdict, VerdictStatus};
use crate::sampler::{LookupError, PostSampler};
use chrono::{DateTime, Utc};
use tracing::info;

#[derive(Debug)]
pub struct RecencyResolver {
    request: LookupRequest,
    posts_seen: usize,
    dates_found: usize,
    load_failures: usize,
    login_walls: usize,
    best: Option<(DateTime<Utc>, Option<String>)>,
}

impl RecencyResolver {
    pub fn new(request: LookupRequest) -> Self {
        Self {
            request,
            posts_seen: 0,
            dates_found: 0,
            load_failures: 0,
            login_walls: 0,
            best: None,
        }
    }

    pub fn observe(&mut self, sample: PostSample) {
        self.posts_seen += 1;
        if sample.load_failed {
            self.load_failures += 1;
        }
        if sample.login_wall {
            self.login_walls += 1;
        }
        let Some(instant) = sample.parsed_instant else {
            return;
        };
        self.dates_found += 1;
        // Equal instants are interchangeable; the first one seen stays.
        if self.best.as_ref().is_none_or(|(best, _)| instant > *best) {
            self.best = Some((instant, sample.raw_timestamp_text));
        }
    }

    /// Observes every sample the sampler still has.
    pub async fn drain(&mut self, mut sampler: PostSampler<'_>) {
        let total = sampler.len();
        while let Some(sample) = sampler.next_sample().await {
            info!(
                "  [{}/{}] {}",
                self.posts_seen + 1,
                total,
                sample
                    .raw_timestamp_text
                    .as_deref()
                    .or(sample.parse_error.as_deref())
                    .unwrap_or("-")
            );
            self.observe(sample);
        }
    }

    /// A post page bounced to the login page during this lookup.
    pub fn hit_login_wall(&self) -> bool {
        self.login_walls > 0
    }

    pub fn finish(self) -> RecencyVerdict {
        let (status, error_detail) = if self.posts_seen == 0 {
            (VerdictStatus::NoPosts, None)
        } else if self.dates_found > 0 {
            (VerdictStatus::Success, None)
        } else if self.login_walls > 0 {
            (
                VerdictStatus::Error,
                Some("post pages redirected to the login wall; session is not authenticated".to_string()),
            )
        } else if self.load_failures == self.posts_seen {
            (
                VerdictStatus::Error,
                Some(format!("all {} post detail views failed to load", self.posts_seen)),
            )
        } else {
            (
                VerdictStatus::Partial,
                Some(format!("{} posts visited, no readable dates", self.posts_seen)),
            )
        };

        let (most_recent_instant, most_recent_display) = match self.best {
            Some((instant, shown)) => (Some(instant), shown),
            None => (None, None),
        };

        RecencyVerdict {
            username: self.request.username,
            hashtag: self.request.hashtag,
            posts_seen: self.posts_seen,
            dates_found: self.dates_found,
            most_recent_instant,
            most_recent_display,
            status,
            error_detail,
        }
    }

    /// Verdict for a lookup that never reached a post.
    pub fn failed(request: LookupRequest, error: &LookupError) -> RecencyVerdict {
        RecencyVerdict {
            username: request.username,
            hashtag: request.hashtag,
            posts_seen: 0,
            dates_found: 0,
            most_recent_instant: None,
            most_recent_display: None,
            status: VerdictStatus::Error,
            error_detail: Some(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverError;
    use chrono::{Duration, TimeZone};

    fn req() -> LookupRequest {
        LookupRequest::new("rebelscapes", "alice")
    }

    fn t(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(i)
    }

    fn parsed(i: i64) -> PostSample {
        PostSample::parsed(format!("p{}", i), format!("day {}", i), t(i))
    }

    fn fold(samples: Vec<PostSample>) -> RecencyVerdict {
        let mut r = RecencyResolver::new(req());
        for s in samples {
            r.observe(s);
        }
        r.finish()
    }

    fn check_invariants(v: &RecencyVerdict) {
        assert!(v.dates_found <= v.posts_seen);
        assert_eq!(v.most_recent_instant.is_some(), v.status == VerdictStatus::Success);
    }

    #[test]
    fn test_no_samples_is_no_posts() {
        let v = fold(vec![]);
        assert_eq!(v.status, VerdictStatus::NoPosts);
        assert_eq!((v.posts_seen, v.dates_found), (0, 0));
        assert!(v.most_recent_instant.is_none());
        check_invariants(&v);
    }

    #[test]
    fn test_max_over_shuffled_sample_with_unparsable_posts() {
        // 12 posts in listing order: 9 dated out of order, 3 unreadable.
        let order = [4, 9, 1, 7, 2, 8, 3, 6, 5];
        let mut samples: Vec<PostSample> = order.iter().map(|&i| parsed(i)).collect();
        samples.insert(2, PostSample::unparsed("x1".into(), Some("??".into()), "unrecognised"));
        samples.insert(6, PostSample::unparsed("x2".into(), None, "no time element"));
        samples.push(PostSample::unparsed("x3".into(), Some("Liked by".into()), "unrecognised"));

        let v = fold(samples);
        assert_eq!(v.posts_seen, 12);
        assert_eq!(v.dates_found, 9);
        assert_eq!(v.most_recent_instant, Some(t(9)));
        assert_eq!(v.most_recent_display.as_deref(), Some("day 9"));
        assert_eq!(v.status, VerdictStatus::Success);
        check_invariants(&v);
    }

    #[test]
    fn test_ties_keep_the_first_seen() {
        let a = PostSample::parsed("a".into(), "first".into(), t(3));
        let b = PostSample::parsed("b".into(), "second".into(), t(3));
        let v = fold(vec![a, b]);
        assert_eq!(v.most_recent_instant, Some(t(3)));
        assert_eq!(v.most_recent_display.as_deref(), Some("first"));
    }

    #[test]
    fn test_visited_but_unreadable_is_partial() {
        let v = fold(vec![
            PostSample::unparsed("a".into(), None, "no time element"),
            PostSample::load_failure("b".into(), "timeout"),
        ]);
        assert_eq!(v.status, VerdictStatus::Partial);
        check_invariants(&v);
    }

    #[test]
    fn test_every_detail_view_failing_is_error() {
        let v = fold(vec![
            PostSample::load_failure("a".into(), "timeout"),
            PostSample::load_failure("b".into(), "timeout"),
        ]);
        assert_eq!(v.status, VerdictStatus::Error);
        assert_eq!(v.posts_seen, 2);
        assert!(v.error_detail.unwrap().contains("all 2"));
    }

    #[test]
    fn test_login_wall_without_dates_is_error() {
        let mut r = RecencyResolver::new(req());
        r.observe(PostSample::unparsed("a".into(), None, "no time element"));
        r.observe(PostSample::login_redirect("b".into(), "https://www.instagram.com/accounts/login/"));
        assert!(r.hit_login_wall());

        let v = r.finish();
        assert_eq!(v.status, VerdictStatus::Error);
        assert!(v.error_detail.as_ref().unwrap().contains("login wall"));
        check_invariants(&v);
    }

    #[test]
    fn test_dates_found_before_a_login_wall_still_count() {
        let mut r = RecencyResolver::new(req());
        r.observe(parsed(4));
        r.observe(PostSample::login_redirect("b".into(), "https://www.instagram.com/accounts/login/"));
        assert!(r.hit_login_wall());
        assert_eq!(r.finish().status, VerdictStatus::Success);
    }

    #[test]
    fn test_failed_lookup_verdict() {
        let err = LookupError::Navigation(DriverError::Timeout("listing".into()));
        let v = RecencyResolver::failed(req(), &err);
        assert_eq!(v.status, VerdictStatus::Error);
        assert_eq!(v.posts_seen, 0);
        assert_eq!(v.hashtag, "rebelscapes_alice");
        check_invariants(&v);
    }

    #[test]
    fn test_more_samples_never_move_the_answer_earlier() {
        let listing = [5, 2, 8, 1, 9, 3];
        let mut previous: Option<DateTime<Utc>> = None;
        for n in 1..=listing.len() {
            let v = fold(listing[..n].iter().map(|&i| parsed(i)).collect());
            assert_eq!(v.posts_seen, n);
            if let Some(prev) = previous {
                assert!(v.most_recent_instant.unwrap() >= prev);
            }
            previous = v.most_recent_instant;
        }
    }
}
