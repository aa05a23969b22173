use crate::error::{JavaExceptionKind, VmError};
use crate::heap::HeapRef;
use crate::keys::ThreadId;
use crate::thread::{ThreadStatus, VmThread};
use crate::throw_exception;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Mutual exclusion plus wait/notify for one object. Queues are FIFO, so
/// contended entry and notify order are deterministic.
#[derive(Debug, Default)]
pub struct Monitor {
    pub owner: Option<ThreadId>,
    pub entry_count: u32,
    pub lock_queue: VecDeque<ThreadId>,
    pub wait_queue: VecDeque<ThreadId>,
}

impl Monitor {
    fn is_idle(&self) -> bool {
        self.owner.is_none() && self.lock_queue.is_empty() && self.wait_queue.is_empty()
    }
}

/// Monitors pooled by the address of the owned object. Entries exist only
/// while a monitor is in use; an idle monitor is returned to the pool.
#[derive(Default)]
pub struct MonitorPool {
    table: HashMap<HeapRef, Monitor>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum EnterOutcome {
    Entered,
    /// Caller thread was queued and parked; ownership is transferred to it
    /// by the releasing thread, so the acquire needs no retry.
    Blocked,
}

impl MonitorPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, object: HeapRef) -> Option<&Monitor> {
        self.table.get(&object)
    }

    pub fn owner_of(&self, object: HeapRef) -> Option<ThreadId> {
        self.table.get(&object).and_then(|m| m.owner)
    }

    /// Objects with active monitors, for the GC root scan (a parked thread
    /// must not have the object it waits on collected from under it).
    pub fn monitored_objects(&self) -> impl Iterator<Item = HeapRef> + '_ {
        self.table.keys().copied()
    }

    pub fn enter(
        &mut self,
        threads: &mut [VmThread],
        tid: ThreadId,
        object: HeapRef,
    ) -> EnterOutcome {
        let monitor = self.table.entry(object).or_default();
        match monitor.owner {
            None => {
                monitor.owner = Some(tid);
                monitor.entry_count = 1;
                EnterOutcome::Entered
            }
            Some(owner) if owner == tid => {
                monitor.entry_count += 1;
                EnterOutcome::Entered
            }
            Some(_) => {
                monitor.lock_queue.push_back(tid);
                let thread = &mut threads[tid.to_index()];
                thread.park(ThreadStatus::BLOCKED);
                thread.waiting_on = Some(object);
                thread.saved_entry_count = 1;
                EnterOutcome::Blocked
            }
        }
    }

    pub fn exit(
        &mut self,
        threads: &mut [VmThread],
        tid: ThreadId,
        object: HeapRef,
    ) -> Result<(), VmError> {
        let monitor = match self.table.get_mut(&object) {
            Some(m) if m.owner == Some(tid) => m,
            _ => return throw_exception!(IllegalMonitorStateException),
        };
        monitor.entry_count -= 1;
        if monitor.entry_count == 0 {
            Self::hand_over(monitor, threads);
            if self.table[&object].is_idle() {
                self.table.remove(&object);
            }
        }
        Ok(())
    }

    /// Passes ownership to the head of the lock queue, waking it.
    fn hand_over(monitor: &mut Monitor, threads: &mut [VmThread]) {
        match monitor.lock_queue.pop_front() {
            Some(next) => {
                let thread = &mut threads[next.to_index()];
                monitor.owner = Some(next);
                monitor.entry_count = thread.saved_entry_count.max(1);
                thread.saved_entry_count = 0;
                thread.make_runnable();
            }
            None => {
                monitor.owner = None;
                monitor.entry_count = 0;
            }
        }
    }

    /// Object.wait: fully releases the monitor (handing it over), parks the
    /// caller on the wait queue, optionally with a deadline.
    pub fn wait(
        &mut self,
        threads: &mut [VmThread],
        tid: ThreadId,
        object: HeapRef,
        timeout: Option<Duration>,
    ) -> Result<(), VmError> {
        let monitor = match self.table.get_mut(&object) {
            Some(m) if m.owner == Some(tid) => m,
            _ => return throw_exception!(IllegalMonitorStateException),
        };
        let entry_count = monitor.entry_count;
        monitor.wait_queue.push_back(tid);
        Self::hand_over(monitor, threads);

        let thread = &mut threads[tid.to_index()];
        thread.saved_entry_count = entry_count;
        thread.waiting_on = Some(object);
        match timeout {
            Some(t) => {
                thread.park(ThreadStatus::WAITING | ThreadStatus::SLEEPING);
                thread.sleep_deadline = Some(Instant::now() + t);
            }
            None => thread.park(ThreadStatus::WAITING),
        }
        Ok(())
    }

    /// Moves one waiter (insertion order) to the lock queue; it re-acquires
    /// the monitor before it runs again.
    pub fn notify(
        &mut self,
        threads: &mut [VmThread],
        tid: ThreadId,
        object: HeapRef,
    ) -> Result<(), VmError> {
        let monitor = match self.table.get_mut(&object) {
            Some(m) if m.owner == Some(tid) => m,
            _ => return throw_exception!(IllegalMonitorStateException),
        };
        if let Some(waiter) = monitor.wait_queue.pop_front() {
            monitor.lock_queue.push_back(waiter);
            let thread = &mut threads[waiter.to_index()];
            thread.park(ThreadStatus::BLOCKED);
            thread.sleep_deadline = None;
        }
        Ok(())
    }

    pub fn notify_all(
        &mut self,
        threads: &mut [VmThread],
        tid: ThreadId,
        object: HeapRef,
    ) -> Result<(), VmError> {
        let monitor = match self.table.get_mut(&object) {
            Some(m) if m.owner == Some(tid) => m,
            _ => return throw_exception!(IllegalMonitorStateException),
        };
        while let Some(waiter) = monitor.wait_queue.pop_front() {
            monitor.lock_queue.push_back(waiter);
            let thread = &mut threads[waiter.to_index()];
            thread.park(ThreadStatus::BLOCKED);
            thread.sleep_deadline = None;
        }
        Ok(())
    }

    /// A timed wait ran out, or a waiter was interrupted: leave the wait
    /// queue and line up to re-acquire the monitor.
    pub fn cancel_wait(&mut self, threads: &mut [VmThread], tid: ThreadId, object: HeapRef) {
        if let Some(monitor) = self.table.get_mut(&object) {
            if let Some(pos) = monitor.wait_queue.iter().position(|t| *t == tid) {
                monitor.wait_queue.remove(pos);
                monitor.lock_queue.push_back(tid);
                let thread = &mut threads[tid.to_index()];
                thread.park(ThreadStatus::BLOCKED);
                thread.sleep_deadline = None;
                // If the monitor is idle the queued thread can take it now.
                if monitor.owner.is_none() {
                    Self::hand_over(monitor, threads);
                }
            }
        }
    }

    /// Wakes every waiter on `object` regardless of ownership; used when a
    /// thread dies to release its joiners (join waits on the Thread object).
    pub fn wake_all(&mut self, threads: &mut [VmThread], object: HeapRef) {
        loop {
            let waiter = match self.table.get(&object) {
                Some(monitor) => monitor.wait_queue.front().copied(),
                None => None,
            };
            match waiter {
                Some(tid) => self.cancel_wait(threads, tid, object),
                None => break,
            }
        }
    }

    /// Thread death cleanup: forcibly releases every monitor the thread owns
    /// and removes it from any queue it sits in.
    pub fn purge_thread(&mut self, threads: &mut [VmThread], tid: ThreadId) {
        let objects: Vec<HeapRef> = self.table.keys().copied().collect();
        for object in objects {
            let monitor = self.table.get_mut(&object).unwrap();
            monitor.lock_queue.retain(|t| *t != tid);
            monitor.wait_queue.retain(|t| *t != tid);
            if monitor.owner == Some(tid) {
                Self::hand_over(monitor, threads);
            }
            if self.table[&object].is_idle() {
                self.table.remove(&object);
            }
        }
    }

    /// Armed interrupt delivery for a waiting thread.
    pub fn interrupt_waiter(&mut self, threads: &mut [VmThread], tid: ThreadId) {
        let waiting_on = threads[tid.to_index()].waiting_on;
        if let Some(object) = waiting_on {
            self.cancel_wait(threads, tid, object);
            threads[tid.to_index()].arm_exception(JavaExceptionKind::InterruptedException, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::ThreadId;

    fn threads(n: usize) -> Vec<VmThread> {
        (1..=n)
            .map(|i| VmThread::new(ThreadId::from_usize(i), format!("t{i}"), 0))
            .collect()
    }

    fn tid(i: usize) -> ThreadId {
        ThreadId::from_usize(i)
    }

    #[test]
    fn reentrant_enter_counts_up_and_down() {
        let mut pool = MonitorPool::new();
        let mut ts = threads(1);
        assert_eq!(pool.enter(&mut ts, tid(1), 64), EnterOutcome::Entered);
        assert_eq!(pool.enter(&mut ts, tid(1), 64), EnterOutcome::Entered);
        pool.exit(&mut ts, tid(1), 64).unwrap();
        assert_eq!(pool.owner_of(64), Some(tid(1)));
        pool.exit(&mut ts, tid(1), 64).unwrap();
        assert_eq!(pool.owner_of(64), None);
        assert!(pool.get(64).is_none());
    }

    #[test]
    fn contended_entry_is_fifo_with_ownership_transfer() {
        let mut pool = MonitorPool::new();
        let mut ts = threads(3);
        pool.enter(&mut ts, tid(1), 64);
        assert_eq!(pool.enter(&mut ts, tid(2), 64), EnterOutcome::Blocked);
        assert_eq!(pool.enter(&mut ts, tid(3), 64), EnterOutcome::Blocked);
        assert!(ts[1].status.contains(ThreadStatus::BLOCKED));

        pool.exit(&mut ts, tid(1), 64).unwrap();
        assert_eq!(pool.owner_of(64), Some(tid(2)));
        assert!(ts[1].is_scheduleable());
        assert!(ts[2].status.contains(ThreadStatus::BLOCKED));

        pool.exit(&mut ts, tid(2), 64).unwrap();
        assert_eq!(pool.owner_of(64), Some(tid(3)));
    }

    #[test]
    fn exit_without_ownership_is_illegal_monitor_state() {
        let mut pool = MonitorPool::new();
        let mut ts = threads(2);
        pool.enter(&mut ts, tid(1), 64);
        assert!(pool.exit(&mut ts, tid(2), 64).is_err());
        assert!(pool.exit(&mut ts, tid(2), 128).is_err());
    }

    #[test]
    fn wait_releases_fully_and_notify_requeues_in_order() {
        let mut pool = MonitorPool::new();
        let mut ts = threads(3);
        pool.enter(&mut ts, tid(1), 64);
        pool.enter(&mut ts, tid(1), 64); // recursion depth 2
        pool.wait(&mut ts, tid(1), 64, None).unwrap();
        assert_eq!(pool.owner_of(64), None);
        assert!(ts[0].status.contains(ThreadStatus::WAITING));
        assert_eq!(ts[0].saved_entry_count, 2);

        // Another thread takes the monitor and notifies.
        pool.enter(&mut ts, tid(2), 64);
        pool.notify(&mut ts, tid(2), 64).unwrap();
        assert!(ts[0].status.contains(ThreadStatus::BLOCKED));
        pool.exit(&mut ts, tid(2), 64).unwrap();

        // Waiter got the monitor back with its recursion depth restored.
        assert_eq!(pool.owner_of(64), Some(tid(1)));
        assert_eq!(pool.get(64).unwrap().entry_count, 2);
        assert!(ts[0].is_scheduleable());
    }

    #[test]
    fn wait_without_ownership_is_illegal() {
        let mut pool = MonitorPool::new();
        let mut ts = threads(2);
        pool.enter(&mut ts, tid(1), 64);
        assert!(pool.wait(&mut ts, tid(2), 64, None).is_err());
    }

    #[test]
    fn purge_thread_hands_over_owned_monitors() {
        let mut pool = MonitorPool::new();
        let mut ts = threads(2);
        pool.enter(&mut ts, tid(1), 64);
        pool.enter(&mut ts, tid(2), 64);
        pool.purge_thread(&mut ts, tid(1));
        assert_eq!(pool.owner_of(64), Some(tid(2)));
        assert!(ts[1].is_scheduleable());
    }
}
