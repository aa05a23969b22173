use crate::keys::ThreadId;
use crate::thread::monitor::MonitorPool;
use crate::thread::{ThreadStatus, VmThread};
use std::time::Instant;

/// Round-robin pick: first scheduleable thread strictly after `current` in
/// table order, wrapping; priorities are advisory and every runnable thread
/// makes progress.
pub fn pick_next(threads: &[VmThread], current: Option<ThreadId>) -> Option<ThreadId> {
    if threads.is_empty() {
        return None;
    }
    let start = current.map(|t| t.to_index() + 1).unwrap_or(0);
    let n = threads.len();
    (0..n)
        .map(|i| (start + i) % n)
        .find(|&idx| threads[idx].is_scheduleable())
        .map(|idx| ThreadId::from_usize(idx + 1))
}

/// Delivers expired deadlines: plain sleepers become runnable, timed waiters
/// leave the wait queue and line up to re-acquire their monitor.
pub fn wake_sleepers(threads: &mut [VmThread], monitors: &mut MonitorPool, now: Instant) {
    let expired: Vec<ThreadId> = threads
        .iter()
        .filter(|t| {
            t.is_alive()
                && t.sleep_deadline.is_some_and(|deadline| deadline <= now)
                && t.status.contains(ThreadStatus::SLEEPING)
        })
        .map(|t| t.id)
        .collect();

    for tid in expired {
        let waiting = threads[tid.to_index()].status.contains(ThreadStatus::WAITING);
        if waiting {
            let object = threads[tid.to_index()].waiting_on;
            if let Some(object) = object {
                monitors.cancel_wait(threads, tid, object);
            }
        } else {
            threads[tid.to_index()].make_runnable();
        }
    }
}

/// Earliest pending deadline, for idle-loop host sleeping.
pub fn nearest_deadline(threads: &[VmThread]) -> Option<Instant> {
    threads
        .iter()
        .filter(|t| t.is_alive() && !t.status.contains(ThreadStatus::DBG_SUSPENDED))
        .filter_map(|t| t.sleep_deadline)
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn mk_threads(n: usize) -> Vec<VmThread> {
        (1..=n)
            .map(|i| VmThread::new(ThreadId::from_usize(i), format!("t{i}"), 0))
            .collect()
    }

    #[test]
    fn round_robin_wraps_and_skips_parked() {
        let mut threads = mk_threads(3);
        threads[1].park(ThreadStatus::BLOCKED);
        let picked = pick_next(&threads, Some(ThreadId::from_usize(3)));
        assert_eq!(picked, Some(ThreadId::from_usize(1)));
        let picked = pick_next(&threads, Some(ThreadId::from_usize(1)));
        assert_eq!(picked, Some(ThreadId::from_usize(3)));
    }

    #[test]
    fn no_scheduleable_threads_yields_none() {
        let mut threads = mk_threads(2);
        threads[0].park(ThreadStatus::WAITING);
        threads[1].mark_dead();
        assert_eq!(pick_next(&threads, None), None);
    }

    #[test]
    fn expired_sleepers_wake_runnable() {
        let mut threads = mk_threads(1);
        let mut monitors = MonitorPool::new();
        threads[0].park(ThreadStatus::SLEEPING);
        threads[0].sleep_deadline = Some(Instant::now() - Duration::from_millis(1));
        wake_sleepers(&mut threads, &mut monitors, Instant::now());
        assert!(threads[0].is_scheduleable());
        assert!(threads[0].sleep_deadline.is_none());
    }

    #[test]
    fn expired_timed_wait_requeues_for_the_monitor() {
        let mut threads = mk_threads(2);
        let mut monitors = MonitorPool::new();
        let t1 = ThreadId::from_usize(1);
        let t2 = ThreadId::from_usize(2);
        monitors.enter(&mut threads, t1, 64);
        monitors
            .wait(&mut threads, t1, 64, Some(Duration::from_millis(1)))
            .unwrap();
        monitors.enter(&mut threads, t2, 64);

        std::thread::sleep(Duration::from_millis(2));
        wake_sleepers(&mut threads, &mut monitors, Instant::now());
        // Back on the lock queue, blocked until t2 releases.
        assert!(threads[0].status.contains(ThreadStatus::BLOCKED));
        monitors.exit(&mut threads, t2, 64).unwrap();
        assert!(threads[0].is_scheduleable());
        assert_eq!(monitors.owner_of(64), Some(t1));
    }
}
