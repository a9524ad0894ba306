//! Capture-and-loop recorder.
//!
//! The recorder captures timestamped messages for one [`PatternKey`] at a
//! time and replays sealed recordings through a [`Scheduler`]. Waiting is
//! never done by blocking: every captured event becomes a scheduled task,
//! and a looping playback owns one recurring "re-arm" task that schedules
//! the next pass.
//!
//! Per key the states are `Idle`, `Recording` and `Playing`; recording and
//! playing are mutually exclusive for the same key but independent across
//! keys. Only one recording may run process-wide.

use std::collections::HashMap;

use crate::error::RecorderError;
use crate::message::{Message, PatternKey};
use crate::scheduler::{FiredTask, Scheduler, TaskHandle};

/// A message captured at an offset from the recording's start.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapturedEvent {
    pub offset_ms: u64,
    pub message: Message,
}

/// A captured sequence for one control.
#[derive(Clone, Debug)]
pub struct Recording {
    key: PatternKey,
    epoch_ms: u64,
    events: Vec<CapturedEvent>,
    is_active: bool,
}

impl Recording {
    fn new(key: PatternKey, epoch_ms: u64) -> Self {
        Self {
            key,
            epoch_ms,
            events: Vec::new(),
            is_active: true,
        }
    }

    /// Append an event. Offsets are clamped so they never go negative or
    /// backwards, even if the host clock does.
    fn capture(&mut self, now_ms: u64, message: Message) {
        let last = self.events.last().map(|e| e.offset_ms).unwrap_or(0);
        let offset_ms = now_ms.saturating_sub(self.epoch_ms).max(last);
        self.events.push(CapturedEvent { offset_ms, message });
    }

    pub fn key(&self) -> PatternKey {
        self.key
    }

    pub fn events(&self) -> &[CapturedEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// True while the recording is still capturing.
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Offset of the last captured event.
    pub fn duration_ms(&self) -> u64 {
        self.events.last().map(|e| e.offset_ms).unwrap_or(0)
    }
}

/// Scheduler payload for playback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlaybackTask {
    /// Reproduce event `index` of the recording for `key`.
    Event { key: PatternKey, index: usize },
    /// Start the next pass of a looping playback.
    Rearm { key: PatternKey },
}

impl PlaybackTask {
    pub fn key(&self) -> PatternKey {
        match self {
            PlaybackTask::Event { key, .. } | PlaybackTask::Rearm { key } => *key,
        }
    }
}

/// Per-key lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyState {
    Idle,
    Recording,
    Playing,
}

/// A running playback of one key.
#[derive(Debug)]
pub struct PlaybackSession {
    pub key: PatternKey,
    pub looping: bool,
    pub loop_delay_ms: u64,
    /// Index of the next event to fire in the current pass.
    pub cursor: usize,
    /// Completed passes (looping only).
    pub passes: u64,
    /// Event tasks that have not fired yet.
    pending: Vec<TaskHandle>,
    /// Recurring re-arm task, present only while looping.
    rearm: Option<TaskHandle>,
}

impl PlaybackSession {
    /// Handles of every task this session still owns.
    pub fn scheduled_tasks(&self) -> impl Iterator<Item = TaskHandle> + '_ {
        self.pending.iter().copied().chain(self.rearm)
    }
}

/// Shortest loop period, so a pass whose events all share the strike
/// millisecond does not re-arm every tick.
pub const DEFAULT_MIN_LOOP_PERIOD_MS: u64 = 50;

/// Captures and replays pad sequences.
#[derive(Debug)]
pub struct Recorder {
    active: Option<Recording>,
    recordings: HashMap<PatternKey, Recording>,
    sessions: HashMap<PatternKey, PlaybackSession>,
    min_loop_period_ms: u64,
}

impl Default for Recorder {
    fn default() -> Self {
        Self {
            active: None,
            recordings: HashMap::new(),
            sessions: HashMap::new(),
            min_loop_period_ms: DEFAULT_MIN_LOOP_PERIOD_MS,
        }
    }
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `ms` (at least 1) as the shortest loop period.
    pub fn with_min_loop_period_ms(mut self, ms: u64) -> Self {
        self.min_loop_period_ms = ms.max(1);
        self
    }

    pub fn min_loop_period_ms(&self) -> u64 {
        self.min_loop_period_ms
    }

    // ------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------

    /// Start capturing for `key`, with `now_ms` as the recording's epoch.
    ///
    /// Fails if any recording is already running. A playback of the same key
    /// is stopped first.
    pub fn start_recording<T>(
        &mut self,
        key: PatternKey,
        now_ms: u64,
        scheduler: &mut Scheduler<T>,
    ) -> Result<(), RecorderError> {
        if let Some(active) = &self.active {
            return Err(RecorderError::AlreadyRecording { key: active.key });
        }
        self.stop(key, scheduler);
        self.active = Some(Recording::new(key, now_ms));
        log::info!("[RECORDER] Recording {} from {}ms", key, now_ms);
        Ok(())
    }

    /// Capture a message into the running recording.
    ///
    /// Returns whether the message was captured. Filtering (such as leaving
    /// out the pad that armed the recording) is up to the caller.
    pub fn on_data_event(&mut self, now_ms: u64, message: &Message) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        active.capture(now_ms, message.clone());
        log::debug!(
            "[RECORDER] Captured {} at +{}ms",
            message,
            active.duration_ms()
        );
        true
    }

    /// Seal the running recording and return its key. No-op when idle.
    ///
    /// The sealed recording replaces any earlier recording for the key.
    pub fn stop_recording(&mut self) -> Option<PatternKey> {
        let mut recording = self.active.take()?;
        recording.is_active = false;
        let key = recording.key;
        log::info!(
            "[RECORDER] Sealed {} with {} events over {}ms",
            key,
            recording.len(),
            recording.duration_ms()
        );
        self.recordings.insert(key, recording);
        Some(key)
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Key of the running recording.
    pub fn recording_key(&self) -> Option<PatternKey> {
        self.active.as_ref().map(|r| r.key)
    }

    /// The running recording, if any.
    pub fn active_recording(&self) -> Option<&Recording> {
        self.active.as_ref()
    }

    /// The sealed recording for `key`.
    pub fn recording(&self, key: PatternKey) -> Option<&Recording> {
        self.recordings.get(&key)
    }

    pub fn has_recording(&self, key: PatternKey) -> bool {
        self.recordings.contains_key(&key)
    }

    /// Delete the sealed recording for `key`, stopping its playback.
    pub fn delete<T>(&mut self, key: PatternKey, scheduler: &mut Scheduler<T>) -> bool {
        self.stop(key, scheduler);
        self.recordings.remove(&key).is_some()
    }

    /// Delete every sealed recording and stop all playback. A running
    /// recording is left alone.
    pub fn clear<T>(&mut self, scheduler: &mut Scheduler<T>) {
        self.stop_all(scheduler);
        self.recordings.clear();
    }

    // ------------------------------------------------------------------
    // Playback
    // ------------------------------------------------------------------

    /// Replay the sealed recording for `key`, starting at the scheduler's
    /// current time.
    ///
    /// Each event is scheduled at its original offset. With `looping`, a
    /// recurring task re-arms the whole sequence every
    /// `duration + loop_delay_ms`, but never more often than the minimum
    /// loop period. Playing a key that is already playing restarts it.
    pub fn play<T>(
        &mut self,
        key: PatternKey,
        looping: bool,
        loop_delay_ms: u64,
        scheduler: &mut Scheduler<T>,
    ) -> Result<(), RecorderError>
    where
        T: From<PlaybackTask>,
    {
        if self.recording_key() == Some(key) {
            return Err(RecorderError::KeyIsRecording { key });
        }
        let recording = self
            .recordings
            .get(&key)
            .ok_or(RecorderError::NoRecording { key })?;
        if recording.is_empty() {
            return Err(RecorderError::EmptyRecording { key });
        }

        let period_ms = (recording.duration_ms() + loop_delay_ms).max(self.min_loop_period_ms);
        let start_ms = scheduler.now_ms();
        let pending = schedule_pass(recording, start_ms, scheduler);

        // Restart
        if let Some(old) = self.sessions.remove(&key) {
            cancel_session(&old, scheduler);
        }

        let rearm = looping.then(|| {
            scheduler.schedule_recurring(period_ms, period_ms, PlaybackTask::Rearm { key }.into())
        });

        log::info!(
            "[RECORDER] Playing {} at {}ms (loop={}, period={}ms)",
            key,
            start_ms,
            looping,
            period_ms
        );

        self.sessions.insert(
            key,
            PlaybackSession {
                key,
                looping,
                loop_delay_ms,
                cursor: 0,
                passes: 0,
                pending,
                rearm,
            },
        );
        Ok(())
    }

    /// Resolve a fired playback task.
    ///
    /// Returns the message to reproduce, stamped with the time it was due.
    /// Re-arm tasks schedule the next pass and return `None`. Tasks for a
    /// session that no longer exists are ignored.
    pub fn on_task_fired<T>(
        &mut self,
        task: &FiredTask<PlaybackTask>,
        scheduler: &mut Scheduler<T>,
    ) -> Option<Message>
    where
        T: From<PlaybackTask>,
    {
        match task.payload {
            PlaybackTask::Event { key, index } => {
                let session = self.sessions.get_mut(&key)?;
                session.pending.retain(|h| *h != task.handle);
                session.cursor = index + 1;
                let finished = !session.looping && session.pending.is_empty();

                let mut message = self.recordings.get(&key)?.events.get(index)?.message.clone();
                message.timestamp_ms = task.due_ms;
                message.handled = false;

                if finished {
                    self.sessions.remove(&key);
                    log::info!("[RECORDER] Playback of {} finished", key);
                }
                Some(message)
            }
            PlaybackTask::Rearm { key } => {
                let recording = self.recordings.get(&key)?;
                let session = self.sessions.get_mut(&key)?;
                // The previous pass may still own an event due right now
                let next_pass = schedule_pass(recording, task.due_ms, scheduler);
                session.pending.extend(next_pass);
                session.cursor = 0;
                session.passes += 1;
                log::debug!("[RECORDER] Loop pass {} of {} at {}ms", session.passes, key, task.due_ms);
                None
            }
        }
    }

    /// Stop the playback of `key`. Returns whether one was running.
    pub fn stop<T>(&mut self, key: PatternKey, scheduler: &mut Scheduler<T>) -> bool {
        match self.sessions.remove(&key) {
            Some(session) => {
                cancel_session(&session, scheduler);
                log::info!("[RECORDER] Stopped {}", key);
                true
            }
            None => false,
        }
    }

    /// Stop every playback. Returns how many were running.
    pub fn stop_all<T>(&mut self, scheduler: &mut Scheduler<T>) -> usize {
        let count = self.sessions.len();
        for (_, session) in self.sessions.drain() {
            cancel_session(&session, scheduler);
        }
        if count > 0 {
            log::info!("[RECORDER] Stopped {} playbacks", count);
        }
        count
    }

    pub fn is_playing(&self, key: PatternKey) -> bool {
        self.sessions.contains_key(&key)
    }

    pub fn session(&self, key: PatternKey) -> Option<&PlaybackSession> {
        self.sessions.get(&key)
    }

    /// Keys with a running playback, sorted.
    pub fn playing_keys(&self) -> Vec<PatternKey> {
        let mut keys: Vec<PatternKey> = self.sessions.keys().copied().collect();
        keys.sort();
        keys
    }

    pub fn key_state(&self, key: PatternKey) -> KeyState {
        if self.recording_key() == Some(key) {
            KeyState::Recording
        } else if self.is_playing(key) {
            KeyState::Playing
        } else {
            KeyState::Idle
        }
    }
}

fn schedule_pass<T>(recording: &Recording, start_ms: u64, scheduler: &mut Scheduler<T>) -> Vec<TaskHandle>
where
    T: From<PlaybackTask>,
{
    recording
        .events
        .iter()
        .enumerate()
        .map(|(index, event)| {
            let task = PlaybackTask::Event {
                key: recording.key,
                index,
            };
            scheduler.schedule_at(start_ms + event.offset_ms, task.into())
        })
        .collect()
}

fn cancel_session<T>(session: &PlaybackSession, scheduler: &mut Scheduler<T>) {
    for handle in session.scheduled_tasks() {
        scheduler.cancel(handle);
    }
}
