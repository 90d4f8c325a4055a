//! Two-core fork/join for task descriptors.
//!
//! The primary core is the caller. The secondary core receives one descriptor
//! by value together with the kernel entry point, the primary runs the other
//! descriptor, then blocks on the secondary's completion signal. There is no
//! timeout: a secondary that never finishes hangs the forward call.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::thread;

use lazy_static::lazy_static;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::error::{QError, QResult};
use super::args::TaskArgs;

/// Kernel entry point run on either core.
pub type KernelFn = fn(&TaskArgs);

/// Access to the secondary execution context.
pub trait SecondaryCore: Send + Sync {
    /// Start `kernel(&task)` on the secondary core without waiting for it.
    fn run_on_secondary(&self, kernel: KernelFn, task: TaskArgs) -> QResult<()>;

    /// Block until the last task started with `run_on_secondary` finished.
    fn wait_for_secondary(&self) -> QResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    Idle,
    Pending,
    Done,
    Panicked,
}

/// Join point between the two cores.
#[derive(Debug)]
struct CompletionSignal {
    state: Mutex<Completion>,
    cond: Condvar,
}

impl CompletionSignal {
    fn new() -> Self {
        Self {
            state: Mutex::new(Completion::Idle),
            cond: Condvar::new(),
        }
    }

    fn arm(&self) -> QResult<()> {
        let mut state = self.state.lock();
        if *state == Completion::Pending {
            return Err(QError::InvalidState("secondary core is already running a task".to_string()));
        }
        *state = Completion::Pending;
        Ok(())
    }

    fn finish(&self, outcome: Completion) {
        *self.state.lock() = outcome;
        self.cond.notify_all();
    }

    fn wait(&self) -> QResult<()> {
        let mut state = self.state.lock();
        while *state == Completion::Pending {
            self.cond.wait(&mut state);
        }
        let outcome = std::mem::replace(&mut *state, Completion::Idle);
        match outcome {
            Completion::Panicked => Err(QError::operation_error("secondary core", "kernel panicked")),
            _ => Ok(()),
        }
    }
}

struct Job {
    kernel: KernelFn,
    task: TaskArgs,
}

/// Secondary core backed by a dedicated worker thread.
pub struct ThreadCore {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    signal: Arc<CompletionSignal>,
    worker: Option<thread::JoinHandle<()>>,
}

impl ThreadCore {
    pub fn spawn(name: &str) -> QResult<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let signal = Arc::new(CompletionSignal::new());
        let worker_signal = Arc::clone(&signal);

        let worker = thread::Builder::new().name(name.to_string()).spawn(move || {
            while let Ok(job) = receiver.recv() {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| (job.kernel)(&job.task)));
                if outcome.is_err() {
                    error!("kernel panicked on the secondary core");
                    worker_signal.finish(Completion::Panicked);
                } else {
                    worker_signal.finish(Completion::Done);
                }
            }
        })?;

        debug!(name, "secondary core started");
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            signal,
            worker: Some(worker),
        })
    }
}

impl SecondaryCore for ThreadCore {
    fn run_on_secondary(&self, kernel: KernelFn, task: TaskArgs) -> QResult<()> {
        self.signal.arm()?;
        let sent = match self.sender.lock().as_ref() {
            Some(sender) => sender.send(Job { kernel, task }).is_ok(),
            None => false,
        };
        if !sent {
            self.signal.finish(Completion::Idle);
            return Err(QError::InvalidState("secondary core has stopped".to_string()));
        }
        Ok(())
    }

    fn wait_for_secondary(&self) -> QResult<()> {
        self.signal.wait()
    }
}

impl Drop for ThreadCore {
    fn drop(&mut self) {
        self.sender.lock().take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

lazy_static! {
    static ref SECONDARY_CORE: QResult<ThreadCore> = ThreadCore::spawn("qmodule-core1");
    static ref DISPATCH_LOCK: Mutex<()> = Mutex::new(());
}

/// The process-wide secondary core, started on first use.
pub fn secondary_core() -> QResult<&'static ThreadCore> {
    SECONDARY_CORE.as_ref().map_err(Clone::clone)
}

/// Run `primary` here and `secondary` on the other core; return once both
/// are done. One split runs at a time.
///
/// A panic in the primary kernel is re-raised only after the secondary has
/// finished, so no task outlives the buffers it points into.
pub fn module_forward_dual_core(
    core: &dyn SecondaryCore,
    kernel: KernelFn,
    primary: &TaskArgs,
    secondary: &TaskArgs,
) -> QResult<()> {
    let _dispatch = DISPATCH_LOCK.lock();
    core.run_on_secondary(kernel, secondary.clone())?;
    let primary_result = panic::catch_unwind(AssertUnwindSafe(|| kernel(primary)));
    let waited = core.wait_for_secondary();
    if let Err(payload) = primary_result {
        panic::resume_unwind(payload);
    }
    waited
}

/// Execute one task locally or two tasks split across the cores.
pub fn dispatch_tasks_on(core: &dyn SecondaryCore, op_type: &str, kernel: KernelFn, tasks: &[TaskArgs]) -> QResult<()> {
    match tasks {
        [single] => {
            kernel(single);
            Ok(())
        }
        [primary, secondary] => module_forward_dual_core(core, kernel, primary, secondary),
        _ => {
            error!(
                "{}: only support task size is 1 or 2, currently task size is {}",
                op_type,
                tasks.len()
            );
            Err(QError::configuration(format!(
                "{} built {} tasks, expected 1 or 2",
                op_type,
                tasks.len()
            )))
        }
    }
}

/// [`dispatch_tasks_on`] with the process-wide secondary core. The core is
/// only started when a split is actually dispatched.
pub fn dispatch_tasks(op_type: &str, kernel: KernelFn, tasks: &[TaskArgs]) -> QResult<()> {
    match tasks {
        [single] => {
            kernel(single);
            Ok(())
        }
        [_, _] => dispatch_tasks_on(secondary_core()?, op_type, kernel, tasks),
        _ => dispatch_tasks_on(&NoSecondary, op_type, kernel, tasks),
    }
}

/// Stand-in used where no split can reach the secondary core.
struct NoSecondary;

impl SecondaryCore for NoSecondary {
    fn run_on_secondary(&self, _kernel: KernelFn, _task: TaskArgs) -> QResult<()> {
        Err(QError::configuration("no secondary core available"))
    }

    fn wait_for_secondary(&self) -> QResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use crate::ops::args::{tests::table, ElemwiseArgs};

    fn tasks(n: usize) -> Vec<TaskArgs> {
        let mut tensors = table(&[&[12], &[12]]);
        let args = ElemwiseArgs::<i8>::bind(&mut tensors, &[0], 1).unwrap();
        (0..n).map(|_| TaskArgs::from(args.clone())).collect()
    }

    static RUNS_THREE: AtomicUsize = AtomicUsize::new(0);

    fn count_three(_: &TaskArgs) {
        RUNS_THREE.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_three_tasks_is_a_configuration_error() {
        let err = dispatch_tasks("Add", count_three, &tasks(3)).unwrap_err();
        assert!(matches!(err, QError::Configuration(_)));
        assert!(dispatch_tasks("Add", count_three, &[]).is_err());
        assert_eq!(RUNS_THREE.load(Ordering::SeqCst), 0);
    }

    static RUNS_SPLIT: AtomicUsize = AtomicUsize::new(0);

    fn count_split(_: &TaskArgs) {
        RUNS_SPLIT.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_two_tasks_both_complete_before_return() {
        let core = ThreadCore::spawn("test-core").unwrap();
        dispatch_tasks_on(&core, "Add", count_split, &tasks(2)).unwrap();
        assert_eq!(RUNS_SPLIT.load(Ordering::SeqCst), 2);
        dispatch_tasks_on(&core, "Add", count_split, &tasks(1)).unwrap();
        assert_eq!(RUNS_SPLIT.load(Ordering::SeqCst), 3);
    }

    fn explode(task: &TaskArgs) {
        if task.range().start > 0 {
            panic!("boom");
        }
    }

    #[test]
    fn test_secondary_panic_is_reported() {
        let core = ThreadCore::spawn("test-core-panic").unwrap();
        let mut ts = tasks(2);
        if let TaskArgs::Int8(args) = &ts[0] {
            let (a, b) = args.split_at(6).unwrap();
            ts = vec![a.into(), b.into()];
        }
        let err = dispatch_tasks_on(&core, "Add", explode, &ts).unwrap_err();
        assert!(matches!(err, QError::OperationError { .. }));
        // the worker survives and the signal is reusable
        dispatch_tasks_on(&core, "Add", explode, &ts[..1]).unwrap();
    }

    static SECONDARY_DONE: AtomicUsize = AtomicUsize::new(0);

    fn primary_explodes(task: &TaskArgs) {
        if task.range().start == 0 {
            panic!("primary boom");
        }
        thread::sleep(std::time::Duration::from_millis(50));
        SECONDARY_DONE.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_primary_panic_waits_for_secondary() {
        let core = ThreadCore::spawn("test-core-primary-panic").unwrap();
        let mut ts = tasks(2);
        if let TaskArgs::Int8(args) = &ts[0] {
            let (a, b) = args.split_at(6).unwrap();
            ts = vec![a.into(), b.into()];
        }
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            dispatch_tasks_on(&core, "Add", primary_explodes, &ts)
        }));
        assert!(result.is_err());
        assert_eq!(SECONDARY_DONE.load(Ordering::SeqCst), 1);
        // the dispatch lock was released by the unwind
        dispatch_tasks_on(&core, "Add", |_| {}, &ts).unwrap();
    }

    #[test]
    fn test_wait_without_dispatch_returns() {
        let core = ThreadCore::spawn("test-core-idle").unwrap();
        assert!(core.wait_for_secondary().is_ok());
    }
}
