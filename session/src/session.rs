//! Threaded execution harness.
//!
//! An [`EmuSession`] owns one machine and one dedicated thread that steps
//! it frame by frame at NTSC cadence. Callers on other threads talk to
//! the session only through this handle: pause/stop/reset, input, frame
//! and audio readback, save states.
//!
//! Synchronization discipline: the execution thread is the only mutator
//! of the machine during playback; every cross-thread operation goes
//! through either the machine mutex (taken by the thread for exactly one
//! frame at a time, so callers always observe inter-frame state) or the
//! separate frame-snapshot mutex (so `render_frame` never sees a torn
//! frame). Stop/pause/reset are flags observed at frame granularity —
//! cancellation is cooperative, never mid-instruction.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use emu::joypad::{Button, Player};
use emu::{EmuError, Nes, FRAME_BYTES};

use crate::input::{InputRegistry, VirtualButton};

/// NTSC frame cadence: 60.0988 frames per second.
const FRAME_DURATION: Duration = Duration::from_nanos(16_639_263);

/// Sleep slice while paused; bounds pause/resume latency.
const PAUSE_POLL: Duration = Duration::from_millis(5);

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Running,
    Paused,
    Stopped,
}

const STATE_INITIALIZING: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_PAUSED: u8 = 2;
const STATE_STOPPED: u8 = 3;

impl SessionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            STATE_RUNNING => Self::Running,
            STATE_PAUSED => Self::Paused,
            STATE_STOPPED => Self::Stopped,
            _ => Self::Initializing,
        }
    }
}

struct Shared {
    machine: Mutex<Nes>,
    /// Most recently completed frame, copied out under its own lock.
    frame: Mutex<Box<[u8]>>,
    frames_completed: AtomicU64,
    state: AtomicU8,
    stop: AtomicBool,
    reset_requested: AtomicBool,
}

/// Handle to a running emulation session.
pub struct EmuSession {
    shared: Arc<Shared>,
    input: Arc<InputRegistry>,
    thread: Option<JoinHandle<()>>,
}

impl EmuSession {
    /// Load the ROM at `rom_path`, spawn the execution thread, and start
    /// running. The session samples `input` once per frame.
    pub fn start(
        rom_path: impl AsRef<Path>,
        input: Arc<InputRegistry>,
    ) -> Result<Self, EmuError> {
        let data = std::fs::read(rom_path)?;
        let mut machine = Nes::new();
        machine.load_rom(&data)?;

        let shared = Arc::new(Shared {
            machine: Mutex::new(machine),
            frame: Mutex::new(vec![0; FRAME_BYTES].into_boxed_slice()),
            frames_completed: AtomicU64::new(0),
            state: AtomicU8::new(STATE_INITIALIZING),
            stop: AtomicBool::new(false),
            reset_requested: AtomicBool::new(false),
        });

        let thread = thread::Builder::new()
            .name("emu-session".into())
            .spawn({
                let shared = Arc::clone(&shared);
                let input = Arc::clone(&input);
                move || run_loop(&shared, &input)
            })?;

        Ok(Self {
            shared,
            input,
            thread: Some(thread),
        })
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Halt or resume stepping without tearing the thread down. Has no
    /// effect once the session is stopped.
    pub fn set_paused(&self, paused: bool) {
        let target = if paused { STATE_PAUSED } else { STATE_RUNNING };
        let _ = self
            .shared
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                (state != STATE_STOPPED).then_some(target)
            });
    }

    /// Signal the execution thread to leave its loop at the next frame
    /// boundary. The machine is kept; use [`Self::cleanup`] to release it.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
    }

    /// Reset the machine at the next frame boundary. Valid while Running
    /// or Paused.
    pub fn reset(&self) {
        self.shared.reset_requested.store(true, Ordering::Release);
    }

    /// Frames completed by the execution thread since start.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.shared.frames_completed.load(Ordering::Acquire)
    }

    /// Copy the most recently completed frame into `out`. Callable from
    /// any thread; always a consistent snapshot, never a torn frame.
    pub fn render_frame(&self, out: &mut [u8]) -> Result<(), EmuError> {
        if out.len() < FRAME_BYTES {
            return Err(EmuError::BufferTooSmall {
                required: FRAME_BYTES,
                provided: out.len(),
            });
        }
        let frame = lock_unpoisoned(&self.shared.frame);
        out[..FRAME_BYTES].copy_from_slice(&frame);
        Ok(())
    }

    /// Drain pending audio from the machine.
    pub fn drain_audio(&self, out: &mut [f32]) -> usize {
        lock_unpoisoned(&self.shared.machine).read_audio(out)
    }

    /// Set a controller button directly on this session's machine (as
    /// opposed to the shared virtual registry).
    pub fn set_button(&self, player: Player, button: Button, pressed: bool) {
        lock_unpoisoned(&self.shared.machine).set_button(player, button, pressed);
    }

    /// Touch input for the dual-screen variant; ignored by the NES core.
    pub fn set_touch(&self, x: u16, y: u16, pressed: bool) {
        lock_unpoisoned(&self.shared.machine).set_touch(x, y, pressed);
    }

    /// Capability query for the dual-screen/touch console variant.
    #[must_use]
    pub fn is_dual_screen(&self) -> bool {
        lock_unpoisoned(&self.shared.machine).is_dual_screen()
    }

    /// The input registry this session samples.
    #[must_use]
    pub fn input(&self) -> &Arc<InputRegistry> {
        &self.input
    }

    // ---- save states (captured between frames via the machine lock) ----

    pub fn save_state_to_bytes(&self) -> Result<Vec<u8>, EmuError> {
        lock_unpoisoned(&self.shared.machine).save_state_to_bytes()
    }

    pub fn load_state_from_bytes(&self, data: &[u8]) -> Result<(), EmuError> {
        lock_unpoisoned(&self.shared.machine).load_state_from_bytes(data)
    }

    pub fn save_state_to_file(&self, path: impl AsRef<Path>) -> Result<(), EmuError> {
        lock_unpoisoned(&self.shared.machine).save_state_to_file(path)
    }

    pub fn load_state_from_file(&self, path: impl AsRef<Path>) -> Result<(), EmuError> {
        lock_unpoisoned(&self.shared.machine).load_state_from_file(path)
    }

    /// Terminal teardown: signals stop, joins the execution thread, and
    /// releases the machine. The join is bounded because the loop observes
    /// the stop flag at every frame boundary.
    pub fn cleanup(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::warn!("execution thread panicked during shutdown");
            }
        }
    }
}

impl Drop for EmuSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Start a session on the process-wide shared input registry.
///
/// This is the whole of the legacy one-call start-up surface: everything
/// it does is built from the primitives above.
pub fn start_simple(rom_path: impl AsRef<Path>) -> Result<EmuSession, EmuError> {
    EmuSession::start(rom_path, crate::input::shared_registry())
}

fn run_loop(shared: &Shared, input: &InputRegistry) {
    // Become Running unless the caller already paused or stopped us.
    let _ = shared.state.compare_exchange(
        STATE_INITIALIZING,
        STATE_RUNNING,
        Ordering::AcqRel,
        Ordering::Acquire,
    );
    let mut next_deadline = Instant::now() + FRAME_DURATION;

    loop {
        if shared.stop.load(Ordering::Acquire) || input.poweroff_requested() {
            break;
        }
        if shared.state.load(Ordering::Acquire) == STATE_PAUSED {
            thread::sleep(PAUSE_POLL);
            next_deadline = Instant::now() + FRAME_DURATION;
            continue;
        }

        {
            let mut machine = lock_unpoisoned(&shared.machine);

            if shared.reset_requested.swap(false, Ordering::AcqRel)
                || input.take_reset_request()
            {
                machine.reset();
            }

            apply_input(&mut machine, input);

            if let Err(err) = machine.step_frame() {
                tracing::error!(error = %err, "execution stopped by emulation error");
                break;
            }

            let mut frame = lock_unpoisoned(&shared.frame);
            // The machine lock is still held, so this copy is of a fully
            // completed frame.
            if machine.read_pixels(&mut frame).is_ok() {
                shared.frames_completed.fetch_add(1, Ordering::AcqRel);
            }
        }

        let now = Instant::now();
        if now < next_deadline {
            thread::sleep(next_deadline - now);
            next_deadline += FRAME_DURATION;
        } else {
            // Fell behind; restart the cadence rather than sprinting.
            next_deadline = now + FRAME_DURATION;
        }
    }

    shared.state.store(STATE_STOPPED, Ordering::Release);
}

/// Feed the shared virtual input snapshot into the machine. The first
/// eight virtual buttons are the player-one pad; the extended set belongs
/// to the dual-screen variant and is dropped by the NES core.
fn apply_input(machine: &mut Nes, input: &InputRegistry) {
    const PAD_BUTTONS: [(VirtualButton, Button); 8] = [
        (VirtualButton::A, Button::A),
        (VirtualButton::B, Button::B),
        (VirtualButton::Select, Button::Select),
        (VirtualButton::Start, Button::Start),
        (VirtualButton::Up, Button::Up),
        (VirtualButton::Down, Button::Down),
        (VirtualButton::Left, Button::Left),
        (VirtualButton::Right, Button::Right),
    ];

    let snapshot = input.snapshot();
    for (virtual_button, pad_button) in PAD_BUTTONS {
        machine.set_button(Player::One, pad_button, snapshot[virtual_button.index()]);
    }

    if let Some(touch) = input.touch() {
        machine.set_touch(touch.x, touch.y, touch.pressed);
    }
}

/// Mutex lock that shrugs off poisoning: the guarded state is plain data
/// and a panicked peer must not wedge every other thread.
fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn test_rom_path(tag: &str) -> std::path::PathBuf {
        let mut prg = vec![0xEA_u8; 16 * 1024];
        prg[0x3FFC] = 0x00;
        prg[0x3FFD] = 0x80;
        let mut data = vec![0_u8; 16];
        data[0..4].copy_from_slice(b"NES\x1A");
        data[4] = 1;
        data[5] = 1;
        data.extend_from_slice(&prg);
        data.extend_from_slice(&[0; 8 * 1024]);

        let path = std::env::temp_dir().join(format!("emu-session-test-{tag}.nes"));
        std::fs::write(&path, data).unwrap();
        path
    }

    fn wait_for_frames(session: &EmuSession, frames: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while session.frame_count() < frames {
            assert!(Instant::now() < deadline, "session never produced frames");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn session_runs_and_produces_frames() {
        let path = test_rom_path("runs");
        let session = EmuSession::start(&path, Arc::new(InputRegistry::new())).unwrap();

        wait_for_frames(&session, 3);
        assert_eq!(session.state(), SessionState::Running);

        let mut frame = vec![0_u8; FRAME_BYTES];
        session.render_frame(&mut frame).unwrap();
        session.cleanup();
    }

    #[test]
    fn paused_session_freezes_frames() {
        let path = test_rom_path("pause");
        let session = EmuSession::start(&path, Arc::new(InputRegistry::new())).unwrap();
        wait_for_frames(&session, 2);

        session.set_paused(true);
        // Allow an in-flight frame to complete.
        thread::sleep(Duration::from_millis(40));
        let count_a = session.frame_count();
        let mut frame_a = vec![0_u8; FRAME_BYTES];
        session.render_frame(&mut frame_a).unwrap();

        thread::sleep(Duration::from_millis(50));
        let count_b = session.frame_count();
        let mut frame_b = vec![0_u8; FRAME_BYTES];
        session.render_frame(&mut frame_b).unwrap();

        assert_eq!(count_a, count_b);
        assert_eq!(frame_a, frame_b);
        assert_eq!(session.state(), SessionState::Paused);

        session.set_paused(false);
        wait_for_frames(&session, count_a + 1);
        session.cleanup();
    }

    #[test]
    fn stop_then_cleanup_joins_promptly() {
        let path = test_rom_path("stop");
        let session = EmuSession::start(&path, Arc::new(InputRegistry::new())).unwrap();
        wait_for_frames(&session, 1);

        session.stop();
        let deadline = Instant::now() + Duration::from_secs(2);
        while session.state() != SessionState::Stopped {
            assert!(Instant::now() < deadline, "stop was not observed");
            thread::sleep(Duration::from_millis(5));
        }
        session.cleanup();
    }

    #[test]
    fn render_frame_validates_buffer_length() {
        let path = test_rom_path("buffer");
        let session = EmuSession::start(&path, Arc::new(InputRegistry::new())).unwrap();

        let mut short = vec![0_u8; FRAME_BYTES - 1];
        assert!(matches!(
            session.render_frame(&mut short),
            Err(EmuError::BufferTooSmall { .. })
        ));
        session.cleanup();
    }

    #[test]
    fn save_state_round_trips_through_the_session() {
        let path = test_rom_path("state");
        let session = EmuSession::start(&path, Arc::new(InputRegistry::new())).unwrap();
        wait_for_frames(&session, 2);

        let bytes = session.save_state_to_bytes().unwrap();
        session.load_state_from_bytes(&bytes).unwrap();
        session.cleanup();
    }

    #[test]
    fn start_fails_cleanly_on_missing_rom() {
        let result = EmuSession::start(
            std::env::temp_dir().join("emu-session-test-does-not-exist.nes"),
            Arc::new(InputRegistry::new()),
        );
        assert!(matches!(result, Err(EmuError::Io(_))));
    }

    #[test]
    fn virtual_reset_is_consumed_by_the_session() {
        let path = test_rom_path("vreset");
        let registry = Arc::new(InputRegistry::new());
        let session = EmuSession::start(&path, Arc::clone(&registry)).unwrap();
        wait_for_frames(&session, 2);

        registry.request_reset();
        let before = session.frame_count();
        wait_for_frames(&session, before + 2);
        // The request was consumed exactly once.
        assert!(!registry.take_reset_request());
        session.cleanup();
    }
}
