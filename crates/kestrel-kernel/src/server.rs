//! The kernel server: a single long-lived execution context that serializes
//! every cross-context service request and decides which task runs next.
//!
//! All mutation of shared kernel state (the task table, the ready set, the
//! event and semaphore tables, and the "currently active task" reference)
//! happens on this one context. Producers interact only by submitting
//! [`Command`]s through the channel, which is the sole structure designed
//! for concurrent multi-writer access.
//!
//! # Control flow
//!
//! ```text
//! Blocked-Waiting --command arrives--> Draining --channel empty--> Selecting
//!       ^                                                              |
//!       '--------------------------------------------------------------'
//! ```
//!
//! While draining, the server handles one command, fans out to monitors,
//! then passes through an explicit cooperative-yield point
//! ([`Port::yield_to_ingress`]) so higher-priority ingress contexts are
//! never starved behind a deep backlog. Once the backlog is empty it
//! consults the ready-queue scheduler and, if the selection differs from
//! the active task, performs a context switch through the port.
//!
//! The server context is **essential**: it has no terminal state of its
//! own, and a panic escaping the loop is a top-level fault surfaced to the
//! embedder as [`KernelError::ServerFault`], never a recoverable error.

use std::thread;

use crossbeam::channel::bounded;

use crate::command::{self, Command, CommandReceiver, CommandSender};
use crate::error::{KernelError, Result};
use crate::monitor::MonitorRegistry;
use crate::sched::ReadySet;
use crate::sync::{Acquire, Event, EventId, SemId, Semaphore};
use crate::task::{TaskControl, TaskId, TaskInfo, TaskState, TaskTable};

/// Priority levels configured when the builder is not told otherwise. The
/// idle task occupies the last level (15).
pub const DEFAULT_PRIORITY_LEVELS: usize = 16;

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

/// Collaborator contract for the two primitives the dispatch core does not
/// implement itself: making a task the active execution context, and
/// cooperatively yielding to ingress contexts.
pub trait Port: Send {
    /// Make `task` the context that runs when the server next suspends.
    /// The `context` field of the snapshot carries the embedder's opaque
    /// execution-context handle.
    fn switch_to(&mut self, task: &TaskInfo);

    /// The explicit suspension point between commands. Implementations
    /// should suspend the server here only when an equal-or-higher-priority
    /// ingress context is runnable, resuming it afterwards at the same
    /// point.
    fn yield_to_ingress(&mut self) {
        thread::yield_now();
    }
}

/// Default port for hosted embeddings: context switches are a no-op and the
/// yield point defers to the OS scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostPort;

impl Port for HostPort {
    fn switch_to(&mut self, task: &TaskInfo) {
        tracing::trace!(task = %task.name, "host port switch (no-op)");
    }
}

// ---------------------------------------------------------------------------
// KernelCore
// ---------------------------------------------------------------------------

/// All kernel state, owned and exclusively mutated by the server's own
/// execution context. Packet handlers receive `&mut KernelCore` and may use
/// these operations to move tasks between the ready and blocked states or
/// to drive event/semaphore transitions; the bitmap and queue pair is
/// updated within a single call, so no observer ever sees them
/// inconsistent.
#[derive(Debug)]
pub struct KernelCore {
    tasks: TaskTable,
    ready: ReadySet,
    events: Vec<Event>,
    semaphores: Vec<Semaphore>,
    current: TaskId,
    stop: bool,
}

impl KernelCore {
    /// Handle of the currently active task.
    #[must_use]
    pub fn current(&self) -> TaskId {
        self.current
    }

    /// Snapshot of the currently active task.
    #[must_use]
    pub fn current_info(&self) -> TaskInfo {
        self.tasks.record(self.current).info()
    }

    /// Handle of the idle task.
    #[must_use]
    pub fn idle_task(&self) -> TaskId {
        self.tasks.idle()
    }

    /// Whether `task` is the idle task.
    #[must_use]
    pub fn is_idle(&self, task: TaskId) -> bool {
        self.tasks.is_idle(task)
    }

    /// The task that should run now. Pure query; see
    /// [`ReadySet::select_next`].
    #[must_use]
    pub fn select_next(&self) -> TaskId {
        self.ready.select_next()
    }

    /// Snapshot of one task.
    pub fn task_info(&self, task: TaskId) -> Result<TaskInfo> {
        self.tasks.get(task).map(TaskControl::info)
    }

    /// Snapshot of the whole task table, in handle order.
    #[must_use]
    pub fn tasks(&self) -> Vec<TaskInfo> {
        self.tasks.iter().map(TaskControl::info).collect()
    }

    /// Move a task into the ready state, appending it to the tail of its
    /// priority level's queue. A no-op if the task is already ready.
    ///
    /// Tasks blocked on an event or semaphore should instead be released
    /// through that object's signal/give path, which keeps the object's
    /// wait list consistent.
    pub fn make_ready(&mut self, task: TaskId) -> Result<()> {
        let record = self.tasks.get_mut(task)?;
        if record.state == TaskState::Ready {
            return Ok(());
        }
        record.state = TaskState::Ready;
        self.ready.enqueue(task, record.priority);
        tracing::debug!(task = %record.name, priority = record.priority, "task ready");
        Ok(())
    }

    /// Move a task into the blocked state, removing it from its priority
    /// level's queue. A no-op if the task is already blocked.
    ///
    /// The idle task may never block; attempting to is a typed error.
    pub fn make_blocked(&mut self, task: TaskId) -> Result<()> {
        if self.tasks.is_idle(task) {
            return Err(KernelError::IdleTaskMayNotBlock);
        }
        let record = self.tasks.get_mut(task)?;
        if record.state == TaskState::Blocked {
            return Ok(());
        }
        record.state = TaskState::Blocked;
        self.ready.remove(task, record.priority);
        tracing::debug!(task = %record.name, priority = record.priority, "task blocked");
        Ok(())
    }

    /// Signal an event. If a task is waiting, it absorbs the signal and
    /// becomes ready; otherwise the event latches.
    pub fn signal_event(&mut self, event: EventId) -> Result<()> {
        let record = self.event_mut(event)?;
        let released = record.signal();
        if released.is_none() {
            tracing::trace!(event = %record.name, "event latched; no waiter");
        }
        if let Some(waiter) = released {
            self.make_ready(waiter)?;
        }
        Ok(())
    }

    /// Wait on an event on behalf of `task`. Returns `Ok(true)` if the
    /// latch was already set (consumed, task stays ready) or `Ok(false)` if
    /// the task was blocked as the event's waiter.
    pub fn wait_event(&mut self, event: EventId, task: TaskId) -> Result<bool> {
        self.tasks.get(task)?;
        if self.tasks.is_idle(task) {
            return Err(KernelError::IdleTaskMayNotBlock);
        }
        let record = self.event_mut(event)?;
        match record.wait(task) {
            None => Err(KernelError::EventBusy { event }),
            Some(Acquire::Granted) => Ok(true),
            Some(Acquire::MustBlock) => {
                tracing::trace!(event = %event, task = %task, "task waiting on event");
                self.make_blocked(task)?;
                Ok(false)
            }
        }
    }

    /// Give one semaphore unit. If a task is waiting, it consumes the unit
    /// and becomes ready; otherwise the count is incremented.
    pub fn give_semaphore(&mut self, semaphore: SemId) -> Result<()> {
        let record = self.sem_mut(semaphore)?;
        let released = record.give();
        if released.is_none() {
            tracing::trace!(
                semaphore = %record.name,
                count = record.count(),
                "semaphore incremented; no waiter"
            );
        }
        if let Some(waiter) = released {
            self.make_ready(waiter)?;
        }
        Ok(())
    }

    /// Take one semaphore unit on behalf of `task`. Returns `Ok(true)` if a
    /// unit was available (task stays ready) or `Ok(false)` if the task was
    /// queued on the semaphore and blocked.
    pub fn take_semaphore(&mut self, semaphore: SemId, task: TaskId) -> Result<bool> {
        self.tasks.get(task)?;
        if self.tasks.is_idle(task) {
            return Err(KernelError::IdleTaskMayNotBlock);
        }
        let record = self.sem_mut(semaphore)?;
        match record.take(task) {
            Acquire::Granted => Ok(true),
            Acquire::MustBlock => {
                tracing::trace!(semaphore = %semaphore, task = %task, "task queued on semaphore");
                self.make_blocked(task)?;
                Ok(false)
            }
        }
    }

    /// Current count of a semaphore.
    pub fn semaphore_count(&self, semaphore: SemId) -> Result<u32> {
        self.semaphores
            .get(semaphore.index())
            .map(Semaphore::count)
            .ok_or(KernelError::UnknownSemaphore { semaphore })
    }

    /// Whether an event's latch is currently set.
    pub fn event_signalled(&self, event: EventId) -> Result<bool> {
        self.events
            .get(event.index())
            .map(Event::signalled)
            .ok_or(KernelError::UnknownEvent { event })
    }

    /// Ask the server to stop once the current backlog is drained. A hosted
    /// affordance used by [`KernelHandle::shutdown`]; the embedded loop has
    /// no terminal state of its own.
    pub fn stop(&mut self) {
        self.stop = true;
    }

    fn stopped(&self) -> bool {
        self.stop
    }

    fn event_mut(&mut self, event: EventId) -> Result<&mut Event> {
        self.events
            .get_mut(event.index())
            .ok_or(KernelError::UnknownEvent { event })
    }

    fn sem_mut(&mut self, semaphore: SemId) -> Result<&mut Semaphore> {
        self.semaphores
            .get_mut(semaphore.index())
            .ok_or(KernelError::UnknownSemaphore { semaphore })
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct TaskSpec {
    name: String,
    priority: usize,
    context: u64,
}

/// Builds a kernel: tasks, events, and semaphores are all registered here,
/// before the server starts; the core never creates objects afterwards.
///
/// Handles are dense and assigned in registration order. The builder
/// appends the mandatory idle task at the lowest priority level, so the
/// ready set of a built kernel is never empty.
#[derive(Debug)]
pub struct KernelBuilder {
    levels: usize,
    tasks: Vec<TaskSpec>,
    events: Vec<String>,
    semaphores: Vec<(String, u32)>,
}

impl KernelBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            levels: DEFAULT_PRIORITY_LEVELS,
            tasks: Vec::new(),
            events: Vec::new(),
            semaphores: Vec::new(),
        }
    }

    /// Set the number of priority levels. Lower levels are scheduled first;
    /// the idle task occupies the last one.
    #[must_use]
    pub fn priorities(mut self, levels: usize) -> Self {
        self.levels = levels;
        self
    }

    /// Register a task. `context` is the embedder's opaque
    /// execution-context handle, passed through to the port on switches.
    /// All tasks start ready.
    pub fn task(&mut self, name: impl Into<String>, priority: usize, context: u64) -> TaskId {
        let id = TaskId::new(self.tasks.len());
        self.tasks.push(TaskSpec {
            name: name.into(),
            priority,
            context,
        });
        id
    }

    /// Register an event.
    pub fn event(&mut self, name: impl Into<String>) -> EventId {
        let id = EventId::new(self.events.len());
        self.events.push(name.into());
        id
    }

    /// Register a semaphore with an initial count.
    pub fn semaphore(&mut self, name: impl Into<String>, initial: u32) -> SemId {
        let id = SemId::new(self.semaphores.len());
        self.semaphores.push((name.into(), initial));
        id
    }

    /// Validate the configuration and build the (not yet started) kernel.
    pub fn build(self) -> Result<Kernel> {
        if self.levels == 0 {
            return Err(KernelError::NoPriorityLevels);
        }
        for spec in &self.tasks {
            if spec.priority >= self.levels {
                return Err(KernelError::InvalidPriority {
                    task: spec.name.clone(),
                    priority: spec.priority,
                    levels: self.levels,
                });
            }
        }

        let mut records: Vec<TaskControl> = self
            .tasks
            .into_iter()
            .enumerate()
            .map(|(index, spec)| {
                TaskControl::new(TaskId::new(index), spec.name, spec.priority, spec.context)
            })
            .collect();

        let idle = TaskId::new(records.len());
        records.push(TaskControl::new(idle, "idle".into(), self.levels - 1, 0));

        let mut ready = ReadySet::new(self.levels);
        for record in &records {
            ready.enqueue(record.id, record.priority);
        }

        let events: Vec<Event> = self.events.into_iter().map(Event::new).collect();
        let semaphores: Vec<Semaphore> = self
            .semaphores
            .into_iter()
            .map(|(name, initial)| Semaphore::new(name, initial))
            .collect();

        tracing::info!(
            tasks = records.len(),
            events = events.len(),
            semaphores = semaphores.len(),
            levels = self.levels,
            "kernel built"
        );

        let (sender, receiver) = command::channel();
        Ok(Kernel {
            core: KernelCore {
                tasks: TaskTable::new(records, idle),
                ready,
                events,
                semaphores,
                current: idle,
                stop: false,
            },
            sender,
            receiver,
            monitors: MonitorRegistry::new(),
        })
    }
}

impl Default for KernelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Kernel
// ---------------------------------------------------------------------------

/// A built, not yet started kernel. Commands may already be submitted
/// through [`Kernel::sender`]; they accumulate as backlog and are serviced
/// oldest-first once the server starts.
pub struct Kernel {
    core: KernelCore,
    sender: CommandSender,
    receiver: CommandReceiver,
    monitors: MonitorRegistry,
}

impl Kernel {
    #[must_use]
    pub fn builder() -> KernelBuilder {
        KernelBuilder::new()
    }

    /// A producer handle for the command channel.
    #[must_use]
    pub fn sender(&self) -> CommandSender {
        self.sender.clone()
    }

    /// The monitor registry; monitors may be registered before or after the
    /// server starts.
    #[must_use]
    pub fn monitors(&self) -> &MonitorRegistry {
        &self.monitors
    }

    /// Spawn the server on its own thread (named `kserver`) and return the
    /// embedder's handle to it.
    pub fn start<P: Port + 'static>(self, port: P) -> Result<KernelHandle> {
        let Kernel {
            core,
            sender,
            receiver,
            monitors,
        } = self;
        let loop_monitors = monitors.clone();
        let join = thread::Builder::new()
            .name("kserver".into())
            .spawn(move || serve(core, &receiver, &loop_monitors, port))?;
        Ok(KernelHandle {
            sender,
            monitors,
            join,
        })
    }
}

// ---------------------------------------------------------------------------
// The server loop
// ---------------------------------------------------------------------------

fn serve<P: Port>(
    mut core: KernelCore,
    receiver: &CommandReceiver,
    monitors: &MonitorRegistry,
    mut port: P,
) {
    // First action on entry: this context is essential. A failure here is
    // fatal to the whole system; the embedder observes it as ServerFault.
    tracing::info!("kernel server started");

    loop {
        // Blocked-Waiting: park until a command arrives.
        let Some(mut command) = receiver.pop_blocking() else {
            tracing::warn!("all command producers disconnected; kernel server exiting");
            return;
        };

        // Draining: service the backlog oldest-first.
        loop {
            let kind = command.kind();
            match command {
                Command::Packet(descriptor) => {
                    tracing::trace!(op = descriptor.op(), "dispatching packet");
                    descriptor.invoke(&mut core);
                }
                Command::EventSignal(event) => {
                    if let Err(error) = core.signal_event(event) {
                        // Unreachable when handles come from this kernel's
                        // builder; anything else is a broken invariant.
                        tracing::error!(%error, "event signal named an unknown event");
                        panic!("event signal named an unknown event: {error}");
                    }
                }
                Command::SemaphoreGive(semaphore) => {
                    if let Err(error) = core.give_semaphore(semaphore) {
                        tracing::error!(%error, "semaphore give named an unknown semaphore");
                        panic!("semaphore give named an unknown semaphore: {error}");
                    }
                }
            }
            monitors.each(|monitor| monitor.on_command(kind));

            // The explicit cooperative-yield point: an equal-or-higher
            // priority ingress context gets to run between commands, which
            // bounds its latency even under a deep backlog.
            port.yield_to_ingress();

            match receiver.pop_now() {
                Some(next) => command = next,
                None => break,
            }
        }

        if core.stopped() {
            tracing::info!("kernel server stopped");
            return;
        }

        // Selecting: switch only if the choice differs from the active task.
        let next = core.select_next();
        if next != core.current() {
            let outgoing = core.current_info();
            let incoming = core.tasks.record(next).info();

            if core.is_idle(next) {
                monitors.each(|monitor| monitor.on_idle_enter());
            } else if core.is_idle(core.current()) {
                monitors.each(|monitor| monitor.on_idle_exit());
            }

            core.current = next;
            port.switch_to(&incoming);
            monitors.each(|monitor| monitor.on_context_switch(&outgoing, &incoming));
            tracing::debug!(from = %outgoing.name, to = %incoming.name, "context switch");
        }
    }
}

// ---------------------------------------------------------------------------
// KernelHandle
// ---------------------------------------------------------------------------

/// The embedder's handle to a running kernel server.
///
/// Producer handles obtained through [`KernelHandle::sender`] may be cloned
/// freely across threads; the handle itself owns the server thread and is
/// consumed by [`KernelHandle::shutdown`].
pub struct KernelHandle {
    sender: CommandSender,
    monitors: MonitorRegistry,
    join: thread::JoinHandle<()>,
}

impl KernelHandle {
    /// Submit a command to the server.
    pub fn submit(&self, command: Command) -> Result<()> {
        self.sender.submit(command)
    }

    /// A cloneable producer handle.
    #[must_use]
    pub fn sender(&self) -> CommandSender {
        self.sender.clone()
    }

    /// The monitor registry.
    #[must_use]
    pub fn monitors(&self) -> &MonitorRegistry {
        &self.monitors
    }

    /// Snapshot of the whole task table, captured on the server context.
    ///
    /// Serializes behind every previously submitted command. Must not be
    /// called from inside a packet handler: the handler would be waiting on
    /// the very context that has to service the request.
    pub fn tasks(&self) -> Result<Vec<TaskInfo>> {
        let (reply, response) = bounded(1);
        self.sender.submit(Command::packet("task-table-snapshot", move |core| {
            let _ = reply.send(core.tasks());
        }))?;
        response.recv().map_err(|_| KernelError::ServerGone)
    }

    /// Snapshot of the currently active task, captured on the server
    /// context. Same caveats as [`KernelHandle::tasks`].
    pub fn current_task(&self) -> Result<TaskInfo> {
        let (reply, response) = bounded(1);
        self.sender.submit(Command::packet("current-task-snapshot", move |core| {
            let _ = reply.send(core.current_info());
        }))?;
        response.recv().map_err(|_| KernelError::ServerGone)
    }

    /// Stop the server once it has drained the backlog ahead of this call,
    /// then join its thread. Commands submitted by other producers after
    /// the stop is serviced are discarded.
    ///
    /// Returns [`KernelError::ServerFault`] if the server thread panicked.
    pub fn shutdown(self) -> Result<()> {
        tracing::info!("kernel shutdown requested");
        let submitted = self
            .sender
            .submit(Command::packet("server-stop", KernelCore::stop));
        match self.join.join() {
            Ok(()) => submitted,
            Err(_) => Err(KernelError::ServerFault),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
