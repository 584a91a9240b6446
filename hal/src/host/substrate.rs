//! Uniprocessor substrate on top of OS threads.
//!
//! Every logical thread is backed by an OS thread, but only the thread named
//! by `running` may execute; the others wait on a condition variable. The
//! clock advances one tick per yield and jumps to the next timer deadline
//! whenever no thread is ready. A substrate boots once.

use crate::substrate::{InterruptState, Substrate, ThreadEntry, TickHandler};
use crate::{HalError, HalResult, ThreadId};
use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

/// Host substrate configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostConfig {
    /// Ticks between timer callbacks
    pub timer_interval: u64,
    /// Ticks the machine may sit idle before the run is declared deadlocked
    pub max_idle_ticks: u64,
}

impl HostConfig {
    /// Default timer interval
    pub const DEFAULT_TIMER_INTERVAL: u64 = 500;
    /// Default idle limit
    pub const DEFAULT_MAX_IDLE_TICKS: u64 = 1_000_000;

    /// Create the default configuration
    pub const fn new() -> Self {
        Self {
            timer_interval: Self::DEFAULT_TIMER_INTERVAL,
            max_idle_ticks: Self::DEFAULT_MAX_IDLE_TICKS,
        }
    }

    /// Builder: set the timer interval
    pub const fn with_timer_interval(mut self, ticks: u64) -> Self {
        self.timer_interval = ticks;
        self
    }

    /// Builder: set the idle limit
    pub const fn with_max_idle_ticks(mut self, ticks: u64) -> Self {
        self.max_idle_ticks = ticks;
        self
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// How a host run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOutcome {
    /// Every thread finished
    Completed,
    /// A thread called [`Substrate::terminate`]
    Terminated,
    /// Every live thread is blocked and no timer callback can help
    Deadlocked,
    /// A thread panicked
    Panicked(String),
}

/// Unwind payload used to stop threads once the run is over
struct Halted;

fn halt() -> ! {
    panic::resume_unwind(Box::new(Halted))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        String::from(*message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("non-string panic payload")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Ready,
    Running,
    Blocked,
    Finished,
}

struct Slot {
    status: Status,
    /// Interrupt state to restore when the thread next runs
    interrupts: bool,
    joiners: Vec<ThreadId>,
}

struct State {
    threads: BTreeMap<ThreadId, Slot>,
    ready: VecDeque<ThreadId>,
    running: Option<ThreadId>,
    next_id: u64,
    live: usize,
    ticks: u64,
    next_timer: u64,
    interrupts: bool,
    in_handler: bool,
    handler: Option<TickHandler>,
    outcome: Option<HostOutcome>,
    handles: Vec<JoinHandle<()>>,
}

struct Shared {
    state: Mutex<State>,
    turn: Condvar,
    config: HostConfig,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        self.turn.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    fn stop(&self, st: &mut State, outcome: HostOutcome) {
        if st.outcome.is_none() {
            log::info!("Host substrate stopped: {:?}", outcome);
            st.outcome = Some(outcome);
        }
        self.turn.notify_all();
    }

    /// Hand the processor to the next ready thread, idling until one exists
    fn dispatch<'a>(&'a self, mut guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        let mut idle = 0u64;
        loop {
            if guard.outcome.is_some() {
                return guard;
            }

            let st = &mut *guard;
            if let Some(next) = st.ready.pop_front() {
                let Some(slot) = st.threads.get_mut(&next) else {
                    continue;
                };
                slot.status = Status::Running;
                st.interrupts = slot.interrupts;
                st.running = Some(next);
                self.turn.notify_all();
                return guard;
            }

            if st.live == 0 {
                self.stop(st, HostOutcome::Completed);
                return guard;
            }

            let handler = match st.handler.clone() {
                Some(handler) if idle < self.config.max_idle_ticks => handler,
                _ => {
                    self.stop(st, HostOutcome::Deadlocked);
                    return guard;
                }
            };

            let skip = st.next_timer.saturating_sub(st.ticks).max(1);
            st.ticks += skip;
            idle += skip;
            guard = self.fire(guard, &handler);
        }
    }

    /// Run the tick handler with the state lock released
    fn fire<'a>(&'a self, mut guard: MutexGuard<'a, State>, handler: &TickHandler) -> MutexGuard<'a, State> {
        guard.next_timer = guard.ticks + self.config.timer_interval;
        guard.in_handler = true;
        let interrupts = core::mem::replace(&mut guard.interrupts, false);
        drop(guard);

        handler();

        let mut guard = self.lock();
        guard.in_handler = false;
        guard.interrupts = interrupts;
        guard
    }

    /// Wait until `me` is chosen to run. `Err` once the run is over.
    fn await_turn<'a>(
        &'a self,
        mut guard: MutexGuard<'a, State>,
        me: ThreadId,
    ) -> Result<MutexGuard<'a, State>, MutexGuard<'a, State>> {
        loop {
            if guard.outcome.is_some() {
                return Err(guard);
            }
            if guard.running == Some(me) {
                return Ok(guard);
            }
            guard = self.wait(guard);
        }
    }

    /// Take `me` off the processor, returning once it runs again
    fn switch_out<'a>(
        &'a self,
        mut guard: MutexGuard<'a, State>,
        me: ThreadId,
        status: Status,
    ) -> MutexGuard<'a, State> {
        let st = &mut *guard;
        if let Some(slot) = st.threads.get_mut(&me) {
            slot.status = status;
            slot.interrupts = st.interrupts;
        }
        if status == Status::Ready {
            st.ready.push_back(me);
        }

        let guard = self.dispatch(guard);
        match self.await_turn(guard, me) {
            Ok(guard) => guard,
            Err(guard) if std::thread::panicking() => guard,
            Err(guard) => {
                drop(guard);
                halt()
            }
        }
    }

    fn thread_main(self: Arc<Self>, id: ThreadId, entry: ThreadEntry) {
        let started = self.await_turn(self.lock(), id).is_ok();
        if started {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(entry)) {
                if !payload.is::<Halted>() {
                    let message = panic_message(&*payload);
                    let mut guard = self.lock();
                    self.stop(&mut guard, HostOutcome::Panicked(message));
                }
            }
        }
        self.exit_thread(id);
    }

    fn exit_thread(&self, id: ThreadId) {
        let mut guard = self.lock();
        let st = &mut *guard;
        let joiners = match st.threads.get_mut(&id) {
            Some(slot) => {
                slot.status = Status::Finished;
                core::mem::take(&mut slot.joiners)
            }
            None => Vec::new(),
        };
        st.live -= 1;
        for joiner in joiners {
            if let Some(slot) = st.threads.get_mut(&joiner) {
                if slot.status == Status::Blocked {
                    slot.status = Status::Ready;
                    st.ready.push_back(joiner);
                }
            }
        }

        if guard.running == Some(id) && guard.outcome.is_none() {
            drop(self.dispatch(guard));
        }
        self.turn.notify_all();
    }
}

/// Uniprocessor execution substrate for the host
pub struct HostSubstrate {
    shared: Arc<Shared>,
}

impl HostSubstrate {
    /// Create a substrate with the given configuration
    pub fn new(config: HostConfig) -> Self {
        let state = State {
            threads: BTreeMap::new(),
            ready: VecDeque::new(),
            running: None,
            next_id: 1,
            live: 0,
            ticks: 0,
            next_timer: config.timer_interval,
            interrupts: true,
            in_handler: false,
            handler: None,
            outcome: None,
            handles: Vec::new(),
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                turn: Condvar::new(),
                config,
            }),
        }
    }

    /// Configuration in use
    pub fn config(&self) -> HostConfig {
        self.shared.config
    }

    /// Run `main` as the first thread and wait for the machine to stop
    pub fn boot<F>(&self, main: F) -> HostOutcome
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(error) = self.spawn("main", Box::new(main)) {
            return HostOutcome::Panicked(format!("failed to start main thread: {:?}", error));
        }

        let mut guard = self.shared.lock();
        if guard.running.is_none() {
            guard = self.shared.dispatch(guard);
        }
        while guard.outcome.is_none() {
            guard = self.shared.wait(guard);
        }
        let outcome = guard.outcome.clone().unwrap_or(HostOutcome::Completed);
        let handles = core::mem::take(&mut guard.handles);
        drop(guard);

        for handle in handles {
            let _ = handle.join();
        }
        outcome
    }
}

impl Default for HostSubstrate {
    fn default() -> Self {
        Self::new(HostConfig::new())
    }
}

impl core::fmt::Debug for HostSubstrate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let guard = self.shared.lock();
        f.debug_struct("HostSubstrate")
            .field("ticks", &guard.ticks)
            .field("running", &guard.running)
            .field("live", &guard.live)
            .field("outcome", &guard.outcome)
            .finish()
    }
}

impl Substrate for HostSubstrate {
    fn now(&self) -> u64 {
        self.shared.lock().ticks
    }

    fn current_thread(&self) -> ThreadId {
        self.shared.lock().running.unwrap_or(ThreadId::idle())
    }

    fn disable_interrupts(&self) -> InterruptState {
        let mut guard = self.shared.lock();
        InterruptState::from_enabled(core::mem::replace(&mut guard.interrupts, false))
    }

    fn restore_interrupts(&self, state: InterruptState) {
        self.shared.lock().interrupts = state.was_enabled();
    }

    fn interrupts_enabled(&self) -> bool {
        self.shared.lock().interrupts
    }

    fn block_current(&self) {
        let guard = self.shared.lock();
        assert!(!guard.interrupts, "block_current with interrupts enabled");
        let Some(me) = guard.running else {
            return;
        };
        drop(self.shared.switch_out(guard, me, Status::Blocked));
    }

    fn make_ready(&self, thread: ThreadId) {
        let mut guard = self.shared.lock();
        let st = &mut *guard;
        match st.threads.get_mut(&thread) {
            Some(slot) if slot.status == Status::Blocked => {
                slot.status = Status::Ready;
                st.ready.push_back(thread);
            }
            _ => log::warn!("make_ready: {} is not blocked", thread),
        }
    }

    fn yield_now(&self) {
        let mut guard = self.shared.lock();
        if guard.in_handler || guard.outcome.is_some() {
            return;
        }
        let Some(me) = guard.running else {
            return;
        };

        guard.ticks += 1;
        if guard.interrupts && guard.ticks >= guard.next_timer {
            if let Some(handler) = guard.handler.clone() {
                guard = self.shared.fire(guard, &handler);
            }
        }

        if guard.ready.is_empty() {
            return;
        }
        drop(self.shared.switch_out(guard, me, Status::Ready));
    }

    fn set_tick_handler(&self, handler: TickHandler) {
        let mut guard = self.shared.lock();
        guard.next_timer = guard.ticks + self.shared.config.timer_interval;
        guard.handler = Some(handler);
    }

    fn spawn(&self, name: &str, entry: ThreadEntry) -> HalResult<ThreadId> {
        let id = {
            let mut guard = self.shared.lock();
            let st = &mut *guard;
            let id = ThreadId::new(st.next_id);
            st.next_id += 1;
            st.threads.insert(
                id,
                Slot {
                    status: Status::Ready,
                    interrupts: true,
                    joiners: Vec::new(),
                },
            );
            st.ready.push_back(id);
            st.live += 1;
            id
        };

        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name(String::from(name))
            .spawn(move || shared.thread_main(id, entry));

        let mut guard = self.shared.lock();
        let st = &mut *guard;
        match spawned {
            Ok(handle) => {
                st.handles.push(handle);
                log::trace!("Spawned {} ({})", id, name);
                Ok(id)
            }
            Err(_) => {
                st.ready.retain(|thread| *thread != id);
                if let Some(slot) = st.threads.get_mut(&id) {
                    slot.status = Status::Finished;
                }
                st.live -= 1;
                Err(HalError::OutOfMemory)
            }
        }
    }

    fn join(&self, thread: ThreadId) {
        let mut guard = self.shared.lock();
        let Some(me) = guard.running else {
            return;
        };
        if me == thread {
            log::warn!("{} tried to join itself", me);
            return;
        }
        match guard.threads.get_mut(&thread) {
            Some(slot) if slot.status != Status::Finished => slot.joiners.push(me),
            _ => return,
        }
        drop(self.shared.switch_out(guard, me, Status::Blocked));
    }

    fn terminate(&self) -> ! {
        {
            let mut guard = self.shared.lock();
            self.shared.stop(&mut guard, HostOutcome::Terminated);
        }
        halt()
    }
}
