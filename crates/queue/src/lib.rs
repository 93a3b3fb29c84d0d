//! A single-consumer command queue and the worker-thread scaffolding that
//! drains it. One thread owns the model exclusively; every mutation goes
//! through a [`Command`] so there is never a lock around the model itself.

use crossbeam_channel::{Receiver, Sender};
use log::error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long the controller thread sleeps between polls when the queue is
/// empty (§4.E: "if empty, sleep 1 ms and retry").
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Why a command was rejected outright, reported as part of
/// `Ack::NotPermitted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectKind {
    InvalidState,
    InvalidParameter,
    AlreadyInProgress,
    ExecutionBlocked,
    AlreadyInState,
}

impl fmt::Display for RejectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectKind::InvalidState => "invalid state",
            RejectKind::InvalidParameter => "invalid parameter",
            RejectKind::AlreadyInProgress => "already in progress",
            RejectKind::ExecutionBlocked => "execution blocked",
            RejectKind::AlreadyInState => "already in state",
        };
        f.write_str(s)
    }
}

/// The lifecycle of a single command, as reported to whoever is waiting on
/// it. A command may emit `InProgress` any number of times before a single
/// terminal ack (`Complete`, `NotPermitted`, `Aborted`, or `Failed`).
#[derive(Debug, Clone)]
pub enum Ack {
    InProgress,
    Complete,
    NotPermitted(RejectKind),
    Aborted,
    Failed(String),
}

impl Ack {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Ack::InProgress)
    }
}

/// Receives acks for one command. A `crossbeam_channel::Sender<Ack>`
/// implements this directly; `rpc`'s external-command adapter wraps its own
/// sink around it to translate into wire ack codes.
pub trait AckSink: Send {
    fn ack(&self, ack: Ack);
}

impl AckSink for Sender<Ack> {
    fn ack(&self, ack: Ack) {
        // The receiver may have already given up waiting; that's not this
        // thread's problem.
        let _ = self.send(ack);
    }
}

/// An ack sink for internally-generated commands (scheduler ticks, periodic
/// polls) that nobody is waiting on.
pub struct NoopAckSink;

impl AckSink for NoopAckSink {
    fn ack(&self, _ack: Ack) {}
}

/// A unit of work queued against a model of type `M`. Implementors run
/// entirely on the controller thread and have exclusive `&mut M` access for
/// the duration of `run`.
pub trait Command<M>: Send {
    fn run(self: Box<Self>, model: &mut M, acks: &dyn AckSink);
}

/// A queued command paired with the sink its acks should go to.
pub struct Envelope<M> {
    command: Box<dyn Command<M>>,
    acks: Box<dyn AckSink>,
}

impl<M> Envelope<M> {
    pub fn new(command: Box<dyn Command<M>>, acks: Box<dyn AckSink>) -> Self {
        Self { command, acks }
    }
}

/// The producer side of the queue. Cheap to clone; both the outer-loop
/// scheduler and the external-command adapter hold one.
pub struct CommandQueue<M> {
    tx: Sender<Envelope<M>>,
    shutdown: Arc<AtomicBool>,
}

impl<M> Clone for CommandQueue<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<M: Send + 'static> CommandQueue<M> {
    /// Create a queue and spawn the controller thread that drains it,
    /// serially applying each command to `model`.
    pub fn spawn(model: M, name: &'static str) -> (Self, JoinHandle<M>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let loop_shutdown = shutdown.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || controller_loop(model, rx, loop_shutdown))
            .expect("failed to spawn controller thread");
        (Self { tx, shutdown }, handle)
    }

    pub fn enqueue(&self, command: Box<dyn Command<M>>, acks: Box<dyn AckSink>) {
        if self.tx.send(Envelope::new(command, acks)).is_err() {
            error!("command queue: controller thread is gone, dropping command");
        }
    }

    /// §4.E: signal the controller thread to stop accepting new work and
    /// drain whatever is still queued, ack'ing each as `Failed(execution
    /// aborted)` rather than running it.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

/// §4.E's controller loop: lock, dequeue one; if empty, sleep 1ms and retry.
/// On `shutdown` (or the last `CommandQueue` dropping, closing the channel),
/// every command still queued is ack'd `Failed("execution aborted")` instead
/// of run.
fn controller_loop<M>(mut model: M, rx: Receiver<Envelope<M>>, shutdown: Arc<AtomicBool>) -> M {
    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        match rx.try_recv() {
            Ok(envelope) => envelope.command.run(&mut model, envelope.acks.as_ref()),
            Err(crossbeam_channel::TryRecvError::Empty) => thread::sleep(POLL_INTERVAL),
            Err(crossbeam_channel::TryRecvError::Disconnected) => break,
        }
    }
    for envelope in rx.try_iter() {
        envelope.acks.ack(Ack::Failed("execution aborted".into()));
    }
    model
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Increment(i64);
    impl Command<i64> for Increment {
        fn run(self: Box<Self>, model: &mut i64, acks: &dyn AckSink) {
            *model += self.0;
            acks.ack(Ack::Complete);
        }
    }

    struct AlwaysRejects;
    impl Command<i64> for AlwaysRejects {
        fn run(self: Box<Self>, _model: &mut i64, acks: &dyn AckSink) {
            acks.ack(Ack::NotPermitted(RejectKind::InvalidState));
        }
    }

    #[test]
    fn commands_run_serially_in_order() {
        let (queue, handle) = CommandQueue::spawn(0i64, "test-controller");
        let (ack_tx, ack_rx) = crossbeam_channel::unbounded();
        for delta in [1, 2, 3] {
            queue.enqueue(Box::new(Increment(delta)), Box::new(ack_tx.clone()));
        }
        for _ in 0..3 {
            assert!(matches!(ack_rx.recv().unwrap(), Ack::Complete));
        }
        drop(queue);
        let result = handle.join().unwrap();
        assert_eq!(result, 6);
    }

    #[test]
    fn shutdown_drains_residual_commands_as_failed() {
        // Block the controller thread on a long-running command so the
        // next one queued behind it is still sitting in the channel when
        // `shutdown` is observed.
        struct Block(std::sync::mpsc::Receiver<()>);
        impl Command<i64> for Block {
            fn run(self: Box<Self>, _model: &mut i64, acks: &dyn AckSink) {
                let _ = self.0.recv();
                acks.ack(Ack::Complete);
            }
        }

        let (queue, handle) = CommandQueue::spawn(0i64, "test-controller-shutdown");
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        queue.enqueue(Box::new(Block(release_rx)), Box::new(NoopAckSink));

        let (ack_tx, ack_rx) = crossbeam_channel::unbounded();
        queue.enqueue(Box::new(Increment(1)), Box::new(ack_tx));
        queue.shutdown();
        release_tx.send(()).unwrap();

        match ack_rx.recv().unwrap() {
            Ack::Failed(reason) => assert_eq!(reason, "execution aborted"),
            other => panic!("unexpected ack: {other:?}"),
        }
        handle.join().unwrap();
    }

    #[test]
    fn rejected_command_reports_reject_kind() {
        let (queue, _handle) = CommandQueue::spawn(0i64, "test-controller-reject");
        let (ack_tx, ack_rx) = crossbeam_channel::unbounded();
        queue.enqueue(Box::new(AlwaysRejects), Box::new(ack_tx));
        match ack_rx.recv().unwrap() {
            Ack::NotPermitted(RejectKind::InvalidState) => {}
            other => panic!("unexpected ack: {other:?}"),
        }
    }

    #[test]
    fn shared_counter_sink_observes_every_ack() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        struct Recorder(Arc<Mutex<Vec<String>>>);
        impl AckSink for Recorder {
            fn ack(&self, ack: Ack) {
                self.0.lock().unwrap().push(format!("{ack:?}"));
            }
        }
        let (queue, _handle) = CommandQueue::spawn(0i64, "test-controller-recorder");
        queue.enqueue(Box::new(Increment(5)), Box::new(Recorder(seen.clone())));
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
