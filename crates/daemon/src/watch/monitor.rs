//! Per-session state machine
//!
//! `idle -> watching -> grace_period -> idle`, with `unknown` while the
//! session provider cannot be reached. The monitor is pure bookkeeping: it
//! takes observations and the current time and returns the actions the
//! runner has to carry out.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use time::OffsetDateTime;

use common::provider::PlaybackSession;

use super::session::{SessionKey, SessionTable, WatchSession, WatchState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    pub grace_period: Duration,
    /// Users idle longer than this lose every attribution on an expiring path
    pub inactivity_threshold: Duration,
    /// Consecutive failed polls before sessions become `unknown`
    pub failure_threshold: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchAction {
    /// Playback started on a path nobody was tracked as watching
    StartWatching {
        user_id: String,
        canonical_path: PathBuf,
    },
    /// A grace period ran out
    Expire {
        user_id: String,
        canonical_path: PathBuf,
        /// Drop every attribution the user holds on the path
        drop_all: bool,
    },
}

#[derive(Debug)]
pub struct WatchMonitor {
    sessions: SessionTable,
    config: MonitorConfig,
    last_activity: HashMap<String, OffsetDateTime>,
    consecutive_failures: u32,
}

fn offset(d: Duration) -> time::Duration {
    time::Duration::try_from(d).unwrap_or(time::Duration::MAX)
}

impl WatchMonitor {
    pub fn new(sessions: SessionTable, config: MonitorConfig) -> Self {
        Self {
            sessions,
            config,
            last_activity: HashMap::new(),
            consecutive_failures: 0,
        }
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_activity(&self, user: &str) -> Option<OffsetDateTime> {
        self.last_activity.get(user).copied()
    }

    /// Apply a successful poll. Paused sessions still reported by the server
    /// count as watching.
    pub fn observe(&mut self, reported: &[PlaybackSession], now: OffsetDateTime) -> Vec<WatchAction> {
        self.consecutive_failures = 0;
        let mut actions = Vec::new();
        let mut seen: HashSet<SessionKey> = HashSet::new();

        for playback in reported {
            let key = (playback.user_id.clone(), playback.canonical_path.clone());
            if !seen.insert(key) {
                continue;
            }
            self.last_activity.insert(playback.user_id.clone(), now);

            match self.sessions.get(&playback.user_id, &playback.canonical_path) {
                None => {
                    tracing::info!(
                        user = %playback.user_id,
                        path = %playback.canonical_path.display(),
                        "playback started"
                    );
                    self.sessions.insert(WatchSession {
                        user_id: playback.user_id.clone(),
                        canonical_path: playback.canonical_path.clone(),
                        state: WatchState::Watching,
                        started_at: now,
                        last_seen_at: now,
                        scheduled_removal_at: None,
                    });
                    actions.push(WatchAction::StartWatching {
                        user_id: playback.user_id.clone(),
                        canonical_path: playback.canonical_path.clone(),
                    });
                }
                Some(mut session) => {
                    if session.state == WatchState::GracePeriod {
                        tracing::debug!(
                            user = %session.user_id,
                            path = %session.canonical_path.display(),
                            "playback resumed within grace period"
                        );
                    }
                    session.state = WatchState::Watching;
                    session.last_seen_at = now;
                    session.scheduled_removal_at = None;
                    self.sessions.insert(session);
                }
            }
        }

        let grace = offset(self.config.grace_period);
        self.sessions.update_all(|session| {
            let key = (session.user_id.clone(), session.canonical_path.clone());
            if seen.contains(&key) || session.state == WatchState::GracePeriod {
                return;
            }
            tracing::debug!(
                user = %session.user_id,
                path = %session.canonical_path.display(),
                "playback stopped, grace period started"
            );
            session.state = WatchState::GracePeriod;
            session.scheduled_removal_at = Some(now.saturating_add(grace));
        });

        actions
    }

    /// Count a failed poll. Returns true when this failure moved sessions to
    /// `unknown`. Grace timers keep running; no demotion is caused by the
    /// failure itself.
    pub fn poll_failed(&mut self) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures != self.config.failure_threshold {
            return false;
        }
        let mut changed = 0usize;
        self.sessions.update_all(|session| {
            if session.state == WatchState::Watching {
                session.state = WatchState::Unknown;
                changed += 1;
            }
        });
        tracing::warn!(
            failures = self.consecutive_failures,
            sessions = changed,
            "session provider unreachable, watch state unknown"
        );
        true
    }

    /// Remove sessions whose grace period ended and return their expiries.
    pub fn due(&mut self, now: OffsetDateTime) -> Vec<WatchAction> {
        let expired: Vec<WatchSession> = self
            .sessions
            .list()
            .into_iter()
            .filter(|s| {
                s.state == WatchState::GracePeriod
                    && s.scheduled_removal_at.is_some_and(|at| at <= now)
            })
            .collect();

        let threshold = offset(self.config.inactivity_threshold);
        expired
            .into_iter()
            .filter_map(|session| {
                self.sessions
                    .remove(&session.user_id, &session.canonical_path)?;
                let last_active = self
                    .last_activity
                    .get(&session.user_id)
                    .copied()
                    .unwrap_or(session.last_seen_at);
                let drop_all = now - last_active > threshold;
                tracing::info!(
                    user = %session.user_id,
                    path = %session.canonical_path.display(),
                    drop_all,
                    "grace period expired"
                );
                Some(WatchAction::Expire {
                    user_id: session.user_id,
                    canonical_path: session.canonical_path,
                    drop_all,
                })
            })
            .collect()
    }

    /// Earliest scheduled removal.
    pub fn next_deadline(&self) -> Option<OffsetDateTime> {
        self.sessions
            .list()
            .into_iter()
            .filter(|s| s.state == WatchState::GracePeriod)
            .filter_map(|s| s.scheduled_removal_at)
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn monitor() -> WatchMonitor {
        WatchMonitor::new(
            SessionTable::new(),
            MonitorConfig {
                grace_period: Duration::from_secs(600),
                inactivity_threshold: Duration::from_secs(14 * 24 * 3600),
                failure_threshold: 3,
            },
        )
    }

    fn playing(user: &str, path: &str, is_playing: bool) -> PlaybackSession {
        PlaybackSession {
            user_id: user.to_string(),
            canonical_path: PathBuf::from(path),
            is_playing,
        }
    }

    fn t0() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    #[test]
    fn test_first_observation_starts_watching_once() {
        let mut monitor = monitor();
        let now = t0();
        let report = [playing("alice", "/media/a.mkv", true)];

        let actions = monitor.observe(&report, now);
        assert_eq!(
            actions,
            vec![WatchAction::StartWatching {
                user_id: "alice".into(),
                canonical_path: "/media/a.mkv".into(),
            }]
        );
        assert!(monitor
            .observe(&report, now + time::Duration::seconds(15))
            .is_empty());
        assert!(monitor.sessions().is_actively_playing(Path::new("/media/a.mkv")));
    }

    #[test]
    fn test_pause_keeps_session_alive() {
        let mut monitor = monitor();
        monitor.observe(&[playing("alice", "/media/a.mkv", true)], t0());
        monitor.observe(&[playing("alice", "/media/a.mkv", false)], t0() + time::Duration::minutes(1));

        let session = monitor.sessions().get("alice", Path::new("/media/a.mkv")).unwrap();
        assert_eq!(session.state, WatchState::Watching);
        assert_eq!(monitor.next_deadline(), None);
    }

    #[test]
    fn test_stop_schedules_expiry_after_grace() {
        let mut monitor = monitor();
        monitor.observe(&[playing("alice", "/media/a.mkv", true)], t0());
        let stopped = t0() + time::Duration::minutes(5);
        monitor.observe(&[], stopped);

        let deadline = stopped + time::Duration::minutes(10);
        assert_eq!(monitor.next_deadline(), Some(deadline));
        assert!(monitor.due(deadline - time::Duration::seconds(1)).is_empty());

        let actions = monitor.due(deadline);
        assert_eq!(
            actions,
            vec![WatchAction::Expire {
                user_id: "alice".into(),
                canonical_path: "/media/a.mkv".into(),
                drop_all: false,
            }]
        );
        assert!(monitor.sessions().is_empty());
    }

    #[test]
    fn test_resume_in_grace_cancels_timer_without_actions() {
        let mut monitor = monitor();
        monitor.observe(&[playing("alice", "/media/a.mkv", true)], t0());
        monitor.observe(&[], t0() + time::Duration::minutes(1));

        let actions = monitor.observe(
            &[playing("alice", "/media/a.mkv", true)],
            t0() + time::Duration::minutes(2),
        );
        assert!(actions.is_empty());
        assert_eq!(monitor.next_deadline(), None);
        assert!(monitor.due(t0() + time::Duration::hours(1)).is_empty());
    }

    #[test]
    fn test_poll_failures_mark_unknown_without_expiry() {
        let mut monitor = monitor();
        monitor.observe(&[playing("alice", "/media/a.mkv", true)], t0());

        assert!(!monitor.poll_failed());
        assert!(!monitor.poll_failed());
        assert!(monitor.poll_failed());

        let session = monitor.sessions().get("alice", Path::new("/media/a.mkv")).unwrap();
        assert_eq!(session.state, WatchState::Unknown);
        assert!(monitor.due(t0() + time::Duration::days(30)).is_empty());
        assert_eq!(monitor.sessions().references(Path::new("/media/a.mkv")), 1);

        // Recovery resumes normal transitions
        let actions = monitor.observe(
            &[playing("alice", "/media/a.mkv", true)],
            t0() + time::Duration::minutes(5),
        );
        assert!(actions.is_empty());
        assert_eq!(monitor.consecutive_failures(), 0);
        let session = monitor.sessions().get("alice", Path::new("/media/a.mkv")).unwrap();
        assert_eq!(session.state, WatchState::Watching);
    }

    #[test]
    fn test_inactive_user_drops_all_on_expiry() {
        let mut monitor = WatchMonitor::new(
            SessionTable::new(),
            MonitorConfig {
                grace_period: Duration::from_secs(60),
                inactivity_threshold: Duration::from_secs(120),
                failure_threshold: 3,
            },
        );
        monitor.observe(&[playing("bob", "/media/b.mkv", true)], t0());
        // Provider goes dark long enough for bob to count as inactive
        for _ in 0..3 {
            monitor.poll_failed();
        }
        let later = t0() + time::Duration::minutes(10);
        monitor.observe(&[], later);

        let actions = monitor.due(later + time::Duration::minutes(1));
        assert_eq!(
            actions,
            vec![WatchAction::Expire {
                user_id: "bob".into(),
                canonical_path: "/media/b.mkv".into(),
                drop_all: true,
            }]
        );
    }

    #[test]
    fn test_sessions_are_per_user() {
        let mut monitor = monitor();
        let actions = monitor.observe(
            &[
                playing("alice", "/media/a.mkv", true),
                playing("bob", "/media/a.mkv", true),
            ],
            t0(),
        );
        assert_eq!(actions.len(), 2);
        assert_eq!(monitor.sessions().references(Path::new("/media/a.mkv")), 2);

        monitor.observe(&[playing("bob", "/media/a.mkv", true)], t0() + time::Duration::minutes(1));
        let expired = monitor.due(t0() + time::Duration::hours(1));
        assert_eq!(expired.len(), 1);
        assert_eq!(monitor.sessions().references(Path::new("/media/a.mkv")), 1);
    }
}
