//! Attendance scanner.
//!
//! One scanner per sidecar. `start` acquires a camera from the
//! [`CaptureSource`] and spawns a loop that repeatedly takes a frame,
//! downsamples it, asks the matcher gateway for an identity and marks the
//! student present. Iterations never overlap. `stop` cancels the loop and
//! awaits it, so the camera stream is dropped before `stop` returns and any
//! recognition reply still in flight is discarded.

pub mod capture;

use crate::matcher::frame::downsample;
use crate::matcher::{MatchResult, MatcherGateway};
use crate::model::{Attendance, AttendanceStatus, Student, MARKED_BY_RECOGNITION};
use crate::session::TenantSession;
use crate::store::{MarkOutcome, RecordStore};
use capture::{CaptureError, CaptureSource, CaptureStream, Facing};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Calendar day used for attendance records (UTC).
pub fn today() -> String {
    chrono::Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub max_dimension: u32,
    pub jpeg_quality: u8,
    pub match_dwell_ms: u64,
    pub no_match_delay_ms: u64,
    pub recent_limit: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        ScannerConfig {
            max_dimension: 400,
            jpeg_quality: 40,
            match_dwell_ms: 800,
            no_match_delay_ms: 300,
            recent_limit: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanPhase {
    Stopped,
    Starting,
    Scanning,
    Matched,
    NoMatch,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identified {
    pub student_id: String,
    pub full_name: String,
    pub class_id: String,
    pub section: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentMark {
    pub student_id: String,
    pub full_name: String,
    pub date: String,
    pub marked_by: String,
    pub already_marked: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerView {
    pub phase: ScanPhase,
    pub facing: Facing,
    pub message: String,
    pub identified: Option<Identified>,
    pub recent: Vec<RecentMark>,
    pub last_error: Option<String>,
    pub frames: u64,
}

impl Default for ScannerView {
    fn default() -> Self {
        ScannerView {
            phase: ScanPhase::Stopped,
            facing: Facing::Front,
            message: "Scanner stopped".to_string(),
            identified: None,
            recent: Vec::new(),
            last_error: None,
            frames: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scanner is already running")]
    Busy,

    #[error(transparent)]
    Capture(#[from] CaptureError),
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct LoopDeps {
    store: Arc<RecordStore>,
    gateway: Arc<MatcherGateway>,
    config: ScannerConfig,
    view: Arc<Mutex<ScannerView>>,
}

pub struct Scanner {
    store: Arc<RecordStore>,
    gateway: Arc<MatcherGateway>,
    source: Arc<dyn CaptureSource>,
    config: ScannerConfig,
    view: Arc<Mutex<ScannerView>>,
    running: Option<Running>,
}

fn with_view<R>(view: &Mutex<ScannerView>, f: impl FnOnce(&mut ScannerView) -> R) -> R {
    let mut guard = view.lock().unwrap_or_else(|p| p.into_inner());
    f(&mut guard)
}

impl Scanner {
    pub fn new(
        store: Arc<RecordStore>,
        gateway: Arc<MatcherGateway>,
        source: Arc<dyn CaptureSource>,
        config: ScannerConfig,
    ) -> Self {
        Scanner {
            store,
            gateway,
            source,
            config,
            view: Arc::new(Mutex::new(ScannerView::default())),
            running: None,
        }
    }

    pub fn status(&self) -> ScannerView {
        with_view(&self.view, |v| v.clone())
    }

    /// True while a loop task is alive. A loop that ended on its own (camera
    /// withdrawn) does not count.
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .map(|r| !r.task.is_finished())
            .unwrap_or(false)
    }

    pub async fn start(&mut self, session: &TenantSession, facing: Facing) -> Result<(), ScanError> {
        if self.is_running() {
            return Err(ScanError::Busy);
        }
        // Reap a loop that exited by itself.
        if let Some(done) = self.running.take() {
            let _ = done.task.await;
        }

        with_view(&self.view, |v| {
            v.phase = ScanPhase::Starting;
            v.facing = facing;
            v.message = "Starting camera...".to_string();
            v.identified = None;
            v.last_error = None;
            v.frames = 0;
        });

        let stream = match self.source.acquire(facing).await {
            Ok(s) => s,
            Err(e) => {
                warn!(facing = facing.as_str(), error = %e, "camera acquisition failed");
                with_view(&self.view, |v| {
                    v.phase = ScanPhase::Stopped;
                    v.message = "Camera unavailable".to_string();
                    v.last_error = Some(e.to_string());
                });
                return Err(e.into());
            }
        };

        let recent = self.seed_recent(session).await;
        with_view(&self.view, |v| {
            v.recent = recent;
            v.phase = ScanPhase::Scanning;
            v.message = "Position face in center".to_string();
        });

        let cancel = CancellationToken::new();
        let deps = LoopDeps {
            store: self.store.clone(),
            gateway: self.gateway.clone(),
            config: self.config.clone(),
            view: self.view.clone(),
        };
        let task = tokio::spawn(scan_loop(deps, session.clone(), stream, cancel.clone()));
        info!(tenant = %session.tenant_id, facing = facing.as_str(), "scanner started");
        self.running = Some(Running { cancel, task });
        Ok(())
    }

    /// Cancels the loop and waits for it, releasing the camera.
    pub async fn stop(&mut self) {
        let Some(run) = self.running.take() else {
            return;
        };
        run.cancel.cancel();
        if let Err(e) = run.task.await {
            warn!(error = %e, "scanner task ended abnormally");
        }
        with_view(&self.view, |v| {
            v.phase = ScanPhase::Stopped;
            v.message = "Scanner stopped".to_string();
            v.identified = None;
        });
        info!("scanner stopped");
    }

    /// Restarts on the other camera when running; otherwise just records the
    /// facing for the next start.
    pub async fn switch_facing(&mut self, session: &TenantSession, facing: Facing) -> Result<(), ScanError> {
        if !self.is_running() {
            with_view(&self.view, |v| v.facing = facing);
            return Ok(());
        }
        info!(facing = facing.as_str(), "switching camera");
        self.stop().await;
        self.start(session, facing).await
    }

    async fn seed_recent(&self, session: &TenantSession) -> Vec<RecentMark> {
        let snap = match self.store.load(session).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "could not load today's attendance for the scanner history");
                return Vec::new();
            }
        };
        let date = today();
        let marked: Vec<&Attendance> = snap.attendance_on(&date).collect();
        marked
            .into_iter()
            .rev()
            .take(self.config.recent_limit)
            .map(|a| RecentMark {
                student_id: a.student_id.clone(),
                full_name: snap
                    .student(&a.student_id)
                    .map(|s| s.full_name.clone())
                    .unwrap_or_else(|| a.student_id.clone()),
                date: a.date.clone(),
                marked_by: a.marked_by.clone(),
                already_marked: true,
            })
            .collect()
    }
}

/// Sleeps unless cancelled first; returns true on cancellation.
async fn pause(cancel: &CancellationToken, ms: u64) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(Duration::from_millis(ms)) => false,
    }
}

fn push_recent(recent: &mut Vec<RecentMark>, mark: RecentMark, limit: usize) {
    if recent.first().map(|r| r.student_id == mark.student_id).unwrap_or(false) {
        recent[0] = mark;
    } else {
        recent.insert(0, mark);
    }
    recent.truncate(limit);
}

async fn scan_loop(
    deps: LoopDeps,
    session: TenantSession,
    mut stream: Box<dyn CaptureStream>,
    cancel: CancellationToken,
) {
    let cfg = &deps.config;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            f = stream.next_frame() => f,
        };
        let raw = match next {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "camera stream ended");
                with_view(&deps.view, |v| {
                    v.phase = ScanPhase::Stopped;
                    v.message = "Camera disconnected".to_string();
                    v.last_error = Some(e.to_string());
                });
                break;
            }
        };

        let capture = match downsample(&raw, cfg.max_dimension, cfg.jpeg_quality) {
            Ok(c) => c,
            Err(e) => {
                debug!(error = %e, "skipping unreadable frame");
                continue;
            }
        };
        with_view(&deps.view, |v| {
            v.frames += 1;
            v.phase = ScanPhase::Scanning;
            v.message = "Analyzing features...".to_string();
        });

        let students: Vec<Student> = match deps.store.load(&session).await {
            Ok(snap) => snap.students,
            Err(e) => {
                warn!(error = %e, "could not load students for matching");
                with_view(&deps.view, |v| v.last_error = Some(e.to_string()));
                if pause(&cancel, cfg.no_match_delay_ms).await {
                    break;
                }
                continue;
            }
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            r = deps.gateway.match_students(&capture, &students) => r,
        };
        // A reply that raced with cancellation belongs to a stopped scanner.
        if cancel.is_cancelled() {
            break;
        }

        match result {
            MatchResult::Matched(id) => {
                let Some(student) = students.iter().find(|s| s.id == id) else {
                    continue;
                };
                let att = Attendance {
                    id: crate::model::new_record_id(),
                    student_id: student.id.clone(),
                    date: today(),
                    status: AttendanceStatus::Present,
                    marked_by: MARKED_BY_RECOGNITION.to_string(),
                };
                match deps.store.mark_attendance(&session, att).await {
                    Ok(outcome) => {
                        let already = matches!(outcome, MarkOutcome::AlreadyMarked(_));
                        let record = outcome.record();
                        info!(student = %student.id, already_marked = already, "student identified");
                        let mark = RecentMark {
                            student_id: student.id.clone(),
                            full_name: student.full_name.clone(),
                            date: record.date.clone(),
                            marked_by: record.marked_by.clone(),
                            already_marked: already,
                        };
                        with_view(&deps.view, |v| {
                            v.phase = ScanPhase::Matched;
                            v.message = format!("Welcome, {}", student.full_name);
                            v.identified = Some(Identified {
                                student_id: student.id.clone(),
                                full_name: student.full_name.clone(),
                                class_id: student.class_id.clone(),
                                section: student.section.clone(),
                            });
                            push_recent(&mut v.recent, mark, cfg.recent_limit);
                        });
                    }
                    Err(e) => {
                        warn!(student = %student.id, error = %e, "attendance mark failed");
                        with_view(&deps.view, |v| v.last_error = Some(e.to_string()));
                    }
                }
                if pause(&cancel, cfg.match_dwell_ms).await {
                    break;
                }
            }
            MatchResult::NoMatch => {
                debug!("no match for frame");
                with_view(&deps.view, |v| {
                    v.phase = ScanPhase::NoMatch;
                    v.message = "Searching...".to_string();
                    v.identified = None;
                });
                if pause(&cancel, cfg.no_match_delay_ms).await {
                    break;
                }
            }
        }
    }
    drop(stream);
    debug!("scanner loop exited");
}

#[cfg(test)]
mod tests {
    use super::capture::PushFeed;
    use super::*;
    use crate::matcher::frame::tests::png_frame;
    use crate::matcher::MatcherConfig;
    use crate::provider::testing::{GatedProvider, ScriptedProvider};
    use crate::provider::RecognitionProvider;
    use crate::store::ops::fixtures::student;
    use crate::store::testing::{memory_store, session};

    fn fast_config() -> ScannerConfig {
        ScannerConfig {
            match_dwell_ms: 10,
            no_match_delay_ms: 10,
            ..ScannerConfig::default()
        }
    }

    fn scanner(store: Arc<RecordStore>, provider: Arc<dyn RecognitionProvider>, feed: &PushFeed) -> Scanner {
        let gateway = Arc::new(MatcherGateway::new(provider, MatcherConfig::default()));
        Scanner::new(store, gateway, Arc::new(feed.clone()), fast_config())
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn acquisition_failure_returns_to_stopped() {
        let store = memory_store();
        let feed = PushFeed::new();
        let mut sc = scanner(store, ScriptedProvider::always("{}"), &feed);
        let err = sc.start(&session("t1"), Facing::Rear).await.expect_err("no camera");
        assert!(matches!(err, ScanError::Capture(CaptureError::NoDevice(Facing::Rear))));
        assert_eq!(sc.status().phase, ScanPhase::Stopped);
        assert!(!sc.is_running());
    }

    #[tokio::test]
    async fn second_start_is_busy_and_stop_releases_camera() {
        let store = memory_store();
        let feed = PushFeed::new();
        feed.announce(&[Facing::Front], false);
        let mut sc = scanner(store, ScriptedProvider::always(r#"{"matchId":"NEW"}"#), &feed);
        let s = session("t1");
        sc.start(&s, Facing::Front).await.expect("start");
        assert_eq!(feed.live_streams(), 1);
        assert!(matches!(sc.start(&s, Facing::Front).await, Err(ScanError::Busy)));
        sc.stop().await;
        assert_eq!(feed.live_streams(), 0);
        assert_eq!(sc.status().phase, ScanPhase::Stopped);
    }

    #[tokio::test]
    async fn repeated_matches_mark_once() {
        let store = memory_store();
        let s = session("t1");
        store
            .add_student(&s, student("STU-AAA111", "Asha", "1", "A"), None)
            .await
            .expect("add");
        let feed = PushFeed::new();
        feed.announce(&[Facing::Front], false);
        let provider = ScriptedProvider::always(r#"{"matchId":"STU-AAA111"}"#);
        let mut sc = scanner(store.clone(), provider.clone(), &feed);
        sc.start(&s, Facing::Front).await.expect("start");

        feed.publish(Facing::Front, png_frame(64, 48)).expect("frame");
        wait_for(|| provider.call_count() >= 1).await;
        feed.publish(Facing::Front, png_frame(64, 48)).expect("frame");
        wait_for(|| provider.call_count() >= 2).await;
        sc.stop().await;

        let snap = store.load(&s).await.expect("load");
        assert_eq!(snap.attendance.len(), 1);
        assert_eq!(snap.attendance[0].marked_by, MARKED_BY_RECOGNITION);
        assert_eq!(snap.attendance[0].date, today());
        let view = sc.status();
        assert_eq!(view.recent.len(), 1);
        assert_eq!(view.recent[0].student_id, "STU-AAA111");
    }

    #[tokio::test]
    async fn stop_mid_flight_discards_late_reply() {
        let store = memory_store();
        let s = session("t1");
        store
            .add_student(&s, student("STU-AAA111", "Asha", "1", "A"), None)
            .await
            .expect("add");
        let feed = PushFeed::new();
        feed.announce(&[Facing::Front], false);
        let provider = GatedProvider::new(r#"{"matchId":"STU-AAA111"}"#);
        let mut sc = scanner(store.clone(), provider.clone(), &feed);
        sc.start(&s, Facing::Front).await.expect("start");

        feed.publish(Facing::Front, png_frame(32, 32)).expect("frame");
        tokio::time::timeout(Duration::from_secs(2), provider.entered.notified())
            .await
            .expect("provider called");
        sc.stop().await;
        assert_eq!(feed.live_streams(), 0);

        provider.release.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let snap = store.load(&s).await.expect("load");
        assert!(snap.attendance.is_empty());
    }

    #[tokio::test]
    async fn unreadable_frames_are_skipped() {
        let store = memory_store();
        let s = session("t1");
        store
            .add_student(&s, student("STU-AAA111", "Asha", "1", "A"), None)
            .await
            .expect("add");
        let feed = PushFeed::new();
        feed.announce(&[Facing::Front], false);
        let provider = ScriptedProvider::always(r#"{"matchId":"NEW"}"#);
        let mut sc = scanner(store, provider.clone(), &feed);
        sc.start(&s, Facing::Front).await.expect("start");

        feed.publish(Facing::Front, b"not an image".to_vec()).expect("frame");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(sc.is_running());
        assert_eq!(provider.call_count(), 0);

        feed.publish(Facing::Front, png_frame(16, 16)).expect("frame");
        wait_for(|| provider.call_count() == 1).await;
        sc.stop().await;
    }

    #[tokio::test]
    async fn switching_camera_restarts_on_new_facing() {
        let store = memory_store();
        let feed = PushFeed::new();
        feed.announce(&[Facing::Front, Facing::Rear], false);
        let mut sc = scanner(store, ScriptedProvider::always("{}"), &feed);
        let s = session("t1");
        sc.start(&s, Facing::Front).await.expect("start");
        sc.switch_facing(&s, Facing::Rear).await.expect("switch");
        assert!(sc.is_running());
        assert_eq!(sc.status().facing, Facing::Rear);
        assert_eq!(feed.live_streams(), 1);
        sc.stop().await;
        assert_eq!(feed.live_streams(), 0);
    }

    #[tokio::test]
    async fn recent_list_is_seeded_from_today() {
        let store = memory_store();
        let s = session("t1");
        store
            .add_student(&s, student("STU-AAA111", "Asha", "1", "A"), None)
            .await
            .expect("add");
        store
            .mark_attendance(&s, crate::store::ops::fixtures::present("STU-AAA111", &today()))
            .await
            .expect("mark");
        let feed = PushFeed::new();
        feed.announce(&[Facing::Front], false);
        let mut sc = scanner(store, ScriptedProvider::always("{}"), &feed);
        sc.start(&s, Facing::Front).await.expect("start");
        let view = sc.status();
        assert_eq!(view.recent.len(), 1);
        assert_eq!(view.recent[0].full_name, "Asha");
        sc.stop().await;
    }

    #[test]
    fn recent_list_is_capped_and_newest_first() {
        let mark = |id: &str| RecentMark {
            student_id: id.into(),
            full_name: id.into(),
            date: "2024-07-01".into(),
            marked_by: MARKED_BY_RECOGNITION.into(),
            already_marked: false,
        };
        let mut recent = Vec::new();
        for id in ["a", "b", "c"] {
            push_recent(&mut recent, mark(id), 2);
        }
        push_recent(&mut recent, mark("c"), 2);
        let ids: Vec<_> = recent.iter().map(|r| r.student_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }
}
