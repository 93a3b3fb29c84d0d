//! The 500ms outer-loop scheduler: the one thread responsible for deciding
//! when periodic work happens. It never touches the model directly -- it
//! only ever builds a [`ts_queue::Command`] and enqueues it, so every tick's
//! side effects go through the same serial controller thread as
//! operator-issued commands.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use ts_queue::{Command, CommandQueue, NoopAckSink};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(500);

type CommandFactory<M> = Box<dyn Fn() -> Box<dyn Command<M>> + Send>;

struct GlycolTaskState<M> {
    factory: CommandFactory<M>,
    interval: Duration,
    last_run: Instant,
}

/// Schedules recurring commands onto a [`CommandQueue`]. Every tick runs the
/// fixed `tick_commands` (heartbeat toggle, device polls, the mixing-valve
/// and FCU steps); the glycol-control task runs on its own, slower cadence
/// (`setpoint.timestep_s`, typically >= 60s) layered on top of the same
/// 500ms scheduler thread rather than a second timer, and its lifecycle is
/// started/stopped by operator commands rather than always running.
pub struct OuterLoopScheduler<M: Send + 'static> {
    queue: CommandQueue<M>,
    interval: Duration,
    tick_commands: Vec<CommandFactory<M>>,
    glycol_task: Arc<std::sync::Mutex<Option<GlycolTaskState<M>>>>,
    running: Arc<AtomicBool>,
}

impl<M: Send + 'static> OuterLoopScheduler<M> {
    pub fn new(queue: CommandQueue<M>, interval: Duration) -> Self {
        Self {
            queue,
            interval,
            tick_commands: Vec::new(),
            glycol_task: Arc::new(std::sync::Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register a command factory that runs on every tick for as long as
    /// the scheduler is running.
    pub fn add_tick_command(&mut self, factory: CommandFactory<M>) {
        self.tick_commands.push(factory);
    }

    /// A handle that can schedule/cancel the glycol-control task from
    /// another thread (the controller thread, in response to
    /// `applySetpoint`/`disableGlycolControl`-style commands) without racing
    /// the scheduler thread.
    pub fn glycol_task_handle(&self) -> GlycolTaskHandle<M> {
        GlycolTaskHandle {
            slot: self.glycol_task.clone(),
        }
    }

    /// Start the scheduler thread. Returns a handle that stops it on request
    /// and a `JoinHandle` to wait for it to actually exit.
    pub fn spawn(self) -> (Arc<AtomicBool>, JoinHandle<()>) {
        self.running.store(true, Ordering::Release);
        let running = self.running.clone();
        let running_loop = self.running.clone();
        let OuterLoopScheduler {
            queue,
            interval,
            tick_commands,
            glycol_task,
            ..
        } = self;

        let handle = thread::Builder::new()
            .name("outer-loop".to_string())
            .spawn(move || {
                while running_loop.load(Ordering::Acquire) {
                    thread::sleep(interval);
                    if !running_loop.load(Ordering::Acquire) {
                        break;
                    }
                    for factory in &tick_commands {
                        queue.enqueue(factory(), Box::new(NoopAckSink));
                    }
                    if let Some(state) = glycol_task.lock().unwrap().as_mut() {
                        if state.last_run.elapsed() >= state.interval {
                            queue.enqueue((state.factory)(), Box::new(NoopAckSink));
                            state.last_run = Instant::now();
                        }
                    }
                }
            })
            .expect("failed to spawn outer-loop thread");

        (running, handle)
    }
}

/// A cheap, cloneable handle for starting/stopping the glycol-control task
/// without touching the scheduler thread itself.
pub struct GlycolTaskHandle<M: Send + 'static> {
    slot: Arc<std::sync::Mutex<Option<GlycolTaskState<M>>>>,
}

impl<M: Send + 'static> Clone for GlycolTaskHandle<M> {
    fn clone(&self) -> Self {
        Self { slot: self.slot.clone() }
    }
}

impl<M: Send + 'static> GlycolTaskHandle<M> {
    /// Start running `factory` every `interval` (the setpoint's
    /// `timestep_s`), until `cancel`. The first run happens one `interval`
    /// after this call, not immediately.
    pub fn schedule(&self, factory: CommandFactory<M>, interval: Duration) {
        *self.slot.lock().unwrap() = Some(GlycolTaskState {
            factory,
            interval,
            last_run: Instant::now(),
        });
    }

    pub fn cancel(&self) {
        *self.slot.lock().unwrap() = None;
    }

    pub fn is_scheduled(&self) -> bool {
        self.slot.lock().unwrap().is_some()
    }
}
