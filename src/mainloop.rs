//! Host-loop primitives for the native event-driven layer, built on tokio.
//!
//! The native layer expects three things from its host: fd readiness
//! watches, timers and deferred callbacks. All three are implemented here as
//! tasks on the current-thread runtime, plus the one genuinely thread-safe
//! primitive: [`MainloopHandle::post`], which marshals a closure from any
//! thread onto the dispatcher task. Every callback that originates off the
//! scheduler thread must enter through `post`; callbacks fired by the watch,
//! timer and defer tasks already run on the scheduler thread because the
//! runtime is single-threaded.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, warn};
use pulse_protocol::{
    DeferCallback, DeferGuard, IoCallback, IoEvent, IoInterest, MainloopApi, TimerCallback,
    TimerGuard, TimerSchedule, WatchGuard,
};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::error::{PulseError, Result};

type PostedJob = Box<dyn FnOnce() + Send>;

/// Owner of the dispatcher task; dropping it stops callback delivery.
pub struct Mainloop {
    handle: MainloopHandle,
    dispatcher: JoinHandle<()>,
}

impl Mainloop {
    /// Spawn the dispatcher on the current runtime.
    ///
    /// Requires a current-thread runtime: the single-threaded scheduler is
    /// what makes callback execution non-concurrent.
    pub fn spawn() -> Result<Self> {
        let rt = Handle::try_current().map_err(|_| {
            PulseError::Usage("a tokio runtime is required to run the mainloop".into())
        })?;
        if !matches!(rt.runtime_flavor(), RuntimeFlavor::CurrentThread) {
            return Err(PulseError::Usage(
                "the mainloop requires a current-thread tokio runtime".into(),
            ));
        }
        let (tx, mut rx) = mpsc::unbounded_channel::<PostedJob>();
        let dispatcher = rt.spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
            debug!("loop dispatcher finished");
        });
        Ok(Self {
            handle: MainloopHandle { tx, rt },
            dispatcher,
        })
    }

    pub fn handle(&self) -> MainloopHandle {
        self.handle.clone()
    }

    /// Trait-object handle for the native layer.
    pub fn api(&self) -> Arc<dyn MainloopApi> {
        Arc::new(self.handle.clone())
    }
}

impl Drop for Mainloop {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

/// Cloneable, thread-safe handle to the dispatcher.
#[derive(Clone)]
pub struct MainloopHandle {
    tx: UnboundedSender<PostedJob>,
    rt: Handle,
}

impl MainloopHandle {
    /// Run a closure on the scheduler thread. Safe to call from any thread;
    /// closures run in posting order.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) {
        if self.tx.send(Box::new(job)).is_err() {
            warn!("loop dispatcher is gone, dropping posted callback");
        }
    }
}

impl MainloopApi for MainloopHandle {
    fn post(&self, f: Box<dyn FnOnce() + Send>) {
        if self.tx.send(f).is_err() {
            warn!("loop dispatcher is gone, dropping posted callback");
        }
    }

    fn io_watch(&self, fd: RawFd, interest: IoInterest, cb: IoCallback) -> Box<dyn WatchGuard> {
        let task = self.rt.spawn(io_watch_task(fd, interest, cb));
        Box::new(TaskGuard { task })
    }

    fn timer(&self, schedule: TimerSchedule, cb: TimerCallback) -> Box<dyn TimerGuard> {
        let (ctrl, ctrl_rx) = mpsc::unbounded_channel();
        let task = self.rt.spawn(timer_task(schedule, ctrl_rx, cb));
        Box::new(TimerTask {
            guard: TaskGuard { task },
            ctrl,
        })
    }

    fn defer(&self, cb: DeferCallback) -> Box<dyn DeferGuard> {
        let state = Arc::new(DeferState {
            enabled: AtomicBool::new(true),
            notify: Notify::new(),
        });
        let task = self.rt.spawn(defer_task(Arc::clone(&state), cb));
        Box::new(DeferTask {
            guard: TaskGuard { task },
            state,
        })
    }
}

struct TaskGuard {
    task: JoinHandle<()>,
}

impl TaskGuard {
    fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl WatchGuard for TaskGuard {
    fn cancel(&self) {
        self.abort();
    }
}

struct TimerTask {
    guard: TaskGuard,
    ctrl: UnboundedSender<TimerSchedule>,
}

impl TimerGuard for TimerTask {
    fn restart(&self, schedule: TimerSchedule) {
        if self.ctrl.send(schedule).is_err() {
            warn!("restarting a cancelled timer has no effect");
        }
    }

    fn cancel(&self) {
        self.guard.abort();
    }
}

struct DeferState {
    enabled: AtomicBool,
    notify: Notify,
}

struct DeferTask {
    guard: TaskGuard,
    state: Arc<DeferState>,
}

impl DeferGuard for DeferTask {
    fn set_enabled(&self, enabled: bool) {
        self.state.enabled.store(enabled, Ordering::SeqCst);
        if enabled {
            self.state.notify.notify_one();
        }
    }

    fn cancel(&self) {
        self.guard.abort();
    }
}

async fn io_watch_task(fd: RawFd, interest: IoInterest, mut cb: IoCallback) {
    let tokio_interest = match interest {
        IoInterest::Read => Interest::READABLE,
        IoInterest::Write => Interest::WRITABLE,
        IoInterest::ReadWrite => Interest::READABLE | Interest::WRITABLE,
    };
    let afd = match AsyncFd::with_interest(fd, tokio_interest) {
        Ok(afd) => afd,
        Err(e) => {
            error!("fd watch registration failed for fd {fd}: {e}");
            cb(IoEvent::Failed(e));
            return;
        }
    };
    loop {
        match afd.ready(tokio_interest).await {
            Ok(mut guard) => {
                let ready = guard.ready();
                if ready.is_readable() {
                    cb(IoEvent::Readable);
                }
                if ready.is_writable() {
                    cb(IoEvent::Writable);
                }
                // The callback is expected to drain the fd before the next
                // poll; readiness is re-armed here.
                guard.clear_ready();
            }
            Err(e) => {
                error!("fd watch polling failed for fd {fd}: {e}");
                cb(IoEvent::Failed(e));
                return;
            }
        }
    }
}

async fn timer_task(
    initial: TimerSchedule,
    mut ctrl: UnboundedReceiver<TimerSchedule>,
    mut cb: TimerCallback,
) {
    let mut schedule = initial;
    loop {
        let delay = match schedule {
            TimerSchedule::Once(d) | TimerSchedule::Every(d) => d,
        };
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                cb();
                if matches!(schedule, TimerSchedule::Once(_)) {
                    // One-shot timers park until a restart arrives.
                    match ctrl.recv().await {
                        Some(next) => schedule = next,
                        None => return,
                    }
                }
            }
            next = ctrl.recv() => match next {
                Some(next) => schedule = next,
                None => return,
            }
        }
    }
}

async fn defer_task(state: Arc<DeferState>, mut cb: DeferCallback) {
    loop {
        if state.enabled.load(Ordering::SeqCst) {
            cb();
            tokio::task::yield_now().await;
        } else {
            state.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_post_from_foreign_thread_runs_in_order() {
        let ml = Mainloop::spawn().unwrap();
        let handle = ml.handle();
        let (tx, mut rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            for i in 0..10 {
                let tx = tx.clone();
                handle.post(move || {
                    let _ = tx.send(i);
                });
            }
        });
        for expected in 0..10 {
            let got = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
            assert_eq!(got, expected);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_multi_thread_runtime_is_rejected() {
        match Mainloop::spawn() {
            Err(PulseError::Usage(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("expected a usage error on a multi-thread runtime"),
        }
    }

    #[tokio::test]
    async fn test_oneshot_timer_fires_once_and_restarts() {
        let ml = Mainloop::spawn().unwrap();
        let api = ml.api();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = api.timer(
            TimerSchedule::Once(Duration::from_millis(5)),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert!(
            timeout(Duration::from_millis(50), rx.recv()).await.is_err(),
            "one-shot timer fired twice"
        );
        timer.restart(TimerSchedule::Once(Duration::from_millis(5)));
        timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_periodic_timer_repeats_until_cancelled() {
        let ml = Mainloop::spawn().unwrap();
        let api = ml.api();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = api.timer(
            TimerSchedule::Every(Duration::from_millis(2)),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        for _ in 0..3 {
            timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        }
        timer.cancel();
        while rx.try_recv().is_ok() {}
        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_defer_toggles_without_destruction() {
        let ml = Mainloop::spawn().unwrap();
        let api = ml.api();
        let count = Arc::new(AtomicUsize::new(0));
        let cb_count = Arc::clone(&count);
        let defer = api.defer(Box::new(move || {
            cb_count.fetch_add(1, Ordering::SeqCst);
        }));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(count.load(Ordering::SeqCst) > 0);

        defer.set_enabled(false);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let settled = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), settled);

        defer.set_enabled(true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(count.load(Ordering::SeqCst) > settled);
    }

    #[tokio::test]
    async fn test_io_watch_reports_readable() {
        let ml = Mainloop::spawn().unwrap();
        let api = ml.api();
        let (mut writer, reader) = UnixStream::pair().unwrap();
        reader.set_nonblocking(true).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _watch = api.io_watch(
            reader.as_raw_fd(),
            IoInterest::Read,
            Box::new(move |ev| {
                let _ = tx.send(matches!(ev, IoEvent::Readable));
            }),
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
        writer.write_all(b"x").unwrap();
        assert!(timeout(WAIT, rx.recv()).await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn test_io_watch_surfaces_invalid_fd() {
        let ml = Mainloop::spawn().unwrap();
        let api = ml.api();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _watch = api.io_watch(
            -1,
            IoInterest::Read,
            Box::new(move |ev| {
                let _ = tx.send(matches!(ev, IoEvent::Failed(_)));
            }),
        );
        assert!(timeout(WAIT, rx.recv()).await.unwrap().unwrap());
    }
}
