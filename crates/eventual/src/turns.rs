use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

/// Jobs drained by one pump before it hands the thread back to tokio.
pub(crate) const TURN_BUDGET: usize = 1024;

pub(crate) type Job = Box<dyn FnOnce()>;

/// FIFO queue of deferred continuations for one vat.
///
/// A job pushed while some code is running never executes inside that
/// code's turn: the queue is drained by a pump task spawned with
/// `tokio::task::spawn_local`, so callers must be running inside a
/// `LocalSet`.
pub(crate) struct TurnQueue {
    vat: Rc<str>,
    jobs: RefCell<VecDeque<Job>>,
    pump_scheduled: Cell<bool>,
}

impl TurnQueue {
    pub(crate) fn new(vat: Rc<str>) -> Rc<Self> {
        Rc::new(Self {
            vat,
            jobs: RefCell::new(VecDeque::new()),
            pump_scheduled: Cell::new(false),
        })
    }

    pub(crate) fn enqueue(self: &Rc<Self>, job: Job) {
        self.jobs.borrow_mut().push_back(job);
        if !self.pump_scheduled.replace(true) {
            self.spawn_pump();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.borrow().len()
    }

    fn spawn_pump(self: &Rc<Self>) {
        let queue = Rc::clone(self);
        tokio::task::spawn_local(async move {
            queue.drain();
        });
    }

    fn drain(self: &Rc<Self>) {
        let mut ran = 0usize;
        loop {
            // The borrow must end before the job runs: jobs enqueue more jobs.
            let next = self.jobs.borrow_mut().pop_front();
            let Some(job) = next else {
                break;
            };
            job();
            ran += 1;
            if ran >= TURN_BUDGET && self.len() > 0 {
                tracing::trace!(vat = %self.vat, pending = self.len(), "turn budget spent, yielding");
                self.spawn_pump();
                return;
            }
        }
        self.pump_scheduled.set(false);
    }
}
