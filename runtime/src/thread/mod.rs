use crate::error::{JavaExceptionKind, VmError};
use crate::heap::HeapRef;
use crate::jdwp::events::ParkedEvent;
use crate::keys::ThreadId;
use crate::thread::stack::Frame;
use bitflags::bitflags;
use std::collections::VecDeque;
use std::time::Instant;

pub mod monitor;
pub mod scheduler;
pub mod stack;

bitflags! {
    /// Thread state bits. `RUNNABLE` is exclusive of the parked bits;
    /// `DBG_SUSPENDED` stacks on top of any live state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ThreadStatus: u8 {
        const RUNNABLE = 0x01;
        const BLOCKED = 0x02;
        const WAITING = 0x04;
        const SLEEPING = 0x08;
        const DBG_SUSPENDED = 0x10;
        const DEAD = 0x20;
    }
}

/// An exception decided for a thread but not yet delivered; delivery happens
/// at the thread's next dispatch step so that natives and the scheduler can
/// arm it without touching frames.
#[derive(Debug)]
pub enum PendingException {
    Kind(JavaExceptionKind, Option<String>),
    Object(HeapRef),
}

pub const NORM_PRIORITY: i32 = 5;

/// A green thread: its entire execution state lives here, never on the host
/// stack, so context switch is plain bookkeeping.
pub struct VmThread {
    pub id: ThreadId,
    pub name: String,
    pub status: ThreadStatus,
    pub priority: i32,
    /// The java/lang/Thread instance this thread executes for.
    pub thread_obj: HeapRef,
    pub frames: Vec<Frame>,
    pub pending_exception: Option<PendingException>,
    /// Object whose monitor this thread is blocked on or waiting for.
    pub waiting_on: Option<HeapRef>,
    /// Monitor recursion depth to restore after a wait completes.
    pub saved_entry_count: u32,
    pub sleep_deadline: Option<Instant>,
    pub interrupted: bool,
    pub dbg_suspend_count: u32,
    pub parked_events: VecDeque<ParkedEvent>,
    /// Set when a breakpoint event suspended this thread at a location; on
    /// resume the saved original opcode executes instead of re-reporting.
    pub bp_cont: Option<(crate::keys::MethodId, usize)>,
    /// Throwable that killed the thread, if it died unwound.
    pub uncaught: Option<HeapRef>,
}

impl VmThread {
    pub fn new(id: ThreadId, name: String, thread_obj: HeapRef) -> Self {
        Self {
            id,
            name,
            status: ThreadStatus::RUNNABLE,
            priority: NORM_PRIORITY,
            thread_obj,
            frames: Vec::new(),
            pending_exception: None,
            waiting_on: None,
            saved_entry_count: 0,
            sleep_deadline: None,
            interrupted: false,
            dbg_suspend_count: 0,
            parked_events: VecDeque::new(),
            bp_cont: None,
            uncaught: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        !self.status.contains(ThreadStatus::DEAD)
    }

    /// Eligible for a quantum right now.
    pub fn is_scheduleable(&self) -> bool {
        self.status.contains(ThreadStatus::RUNNABLE)
            && !self
                .status
                .intersects(ThreadStatus::DBG_SUSPENDED | ThreadStatus::DEAD)
    }

    pub fn make_runnable(&mut self) {
        let dbg = self.status & ThreadStatus::DBG_SUSPENDED;
        self.status = ThreadStatus::RUNNABLE | dbg;
        self.waiting_on = None;
        self.sleep_deadline = None;
    }

    pub fn park(&mut self, state: ThreadStatus) {
        let dbg = self.status & ThreadStatus::DBG_SUSPENDED;
        self.status = state | dbg;
    }

    pub fn mark_dead(&mut self) {
        self.status = ThreadStatus::DEAD;
        self.frames.clear();
        self.waiting_on = None;
        self.sleep_deadline = None;
    }

    pub fn dbg_suspend(&mut self) {
        self.dbg_suspend_count += 1;
        self.status |= ThreadStatus::DBG_SUSPENDED;
    }

    /// Count-based: the thread resumes only when every suspension is undone.
    pub fn dbg_resume(&mut self) {
        if self.dbg_suspend_count > 0 {
            self.dbg_suspend_count -= 1;
        }
        if self.dbg_suspend_count == 0 {
            self.status.remove(ThreadStatus::DBG_SUSPENDED);
        }
    }

    pub fn cur_frame(&self) -> Result<&Frame, VmError> {
        self.frames.last().ok_or(VmError::FrameStackIsEmpty)
    }

    pub fn cur_frame_mut(&mut self) -> Result<&mut Frame, VmError> {
        self.frames.last_mut().ok_or(VmError::FrameStackIsEmpty)
    }

    pub fn arm_exception(&mut self, kind: JavaExceptionKind, message: Option<String>) {
        if self.pending_exception.is_none() {
            self.pending_exception = Some(PendingException::Kind(kind, message));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dbg_suspension_is_count_based_and_stacks_on_state() {
        let mut t = VmThread::new(ThreadId::from_usize(1), "main".to_string(), 0);
        t.park(ThreadStatus::SLEEPING);
        t.dbg_suspend();
        t.dbg_suspend();
        assert!(!t.is_scheduleable());
        t.dbg_resume();
        assert!(t.status.contains(ThreadStatus::DBG_SUSPENDED));
        t.dbg_resume();
        assert!(!t.status.contains(ThreadStatus::DBG_SUSPENDED));
        assert!(t.status.contains(ThreadStatus::SLEEPING));
    }

    #[test]
    fn make_runnable_preserves_debugger_suspension() {
        let mut t = VmThread::new(ThreadId::from_usize(1), "t".to_string(), 0);
        t.park(ThreadStatus::BLOCKED);
        t.dbg_suspend();
        t.make_runnable();
        assert!(t.status.contains(ThreadStatus::RUNNABLE));
        assert!(t.status.contains(ThreadStatus::DBG_SUSPENDED));
        assert!(!t.is_scheduleable());
    }
}
