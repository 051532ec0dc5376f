use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// 后台循环监督器
///
/// 每个职责一个独立循环：每次迭代开始时检查运行标志，迭代之间休眠，
/// 休眠可被关闭信号打断。循环 panic 后会被重启，超过重启上限则放弃。
pub struct TaskSupervisor {
    running: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Vec<(String, JoinHandle<()>)>,
    max_restarts: u32,
    restarts: Arc<AtomicU32>,
}

impl TaskSupervisor {
    pub fn new(max_restarts: u32) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            running: Arc::new(AtomicBool::new(true)),
            shutdown_tx,
            shutdown_rx,
            tasks: Vec::new(),
            max_restarts,
            restarts: Arc::new(AtomicU32::new(0)),
        }
    }

    /// 启动一个命名循环，首次迭代立即执行
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, interval: Duration, work: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let work = Arc::new(work);
        let running = self.running.clone();
        let shutdown_rx = self.shutdown_rx.clone();
        let restarts = self.restarts.clone();
        let max_restarts = self.max_restarts;
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let mut attempts = 0u32;
            loop {
                let inner = tokio::spawn(run_loop(
                    task_name.clone(),
                    interval,
                    work.clone(),
                    running.clone(),
                    shutdown_rx.clone(),
                ));

                match inner.await {
                    Ok(()) => break,
                    Err(e) if e.is_panic() => {
                        attempts += 1;
                        if !running.load(Ordering::SeqCst) {
                            break;
                        }
                        if attempts > max_restarts {
                            error!(
                                task = %task_name,
                                restarts = attempts - 1,
                                "Background loop panicked too often, giving up"
                            );
                            break;
                        }
                        restarts.fetch_add(1, Ordering::SeqCst);
                        warn!(task = %task_name, attempt = attempts, "Background loop panicked, restarting");
                    }
                    Err(e) => {
                        warn!(task = %task_name, error = %e, "Background loop cancelled");
                        break;
                    }
                }
            }
        });

        self.tasks.push((name, handle));
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn task_names(&self) -> Vec<String> {
        self.tasks.iter().map(|(name, _)| name.clone()).collect()
    }

    /// 累计重启次数
    pub fn restart_count(&self) -> u32 {
        self.restarts.load(Ordering::SeqCst)
    }

    /// 停止所有循环并等待当前迭代完成
    pub async fn shutdown(self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);

        for (name, handle) in self.tasks {
            if let Err(e) = handle.await {
                warn!(task = %name, error = %e, "Background loop did not stop cleanly");
            }
        }
        info!("All background loops stopped");
    }
}

async fn run_loop<F, Fut>(
    name: String,
    interval: Duration,
    work: Arc<F>,
    running: Arc<AtomicBool>,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    info!(task = %name, interval_ms = interval.as_millis() as u64, "Background loop started");

    while running.load(Ordering::SeqCst) {
        (*work)().await;

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    info!(task = %name, "Background loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_loop_runs_until_shutdown() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut supervisor = TaskSupervisor::new(3);

        let c = counter.clone();
        supervisor.spawn("tick", Duration::from_millis(10), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert_eq!(supervisor.task_names(), vec!["tick".to_string()]);

        tokio::time::sleep(Duration::from_millis(60)).await;
        supervisor.shutdown().await;

        let ticks = counter.load(Ordering::SeqCst);
        assert!(ticks >= 2);

        // 停止后不再执行
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(counter.load(Ordering::SeqCst), ticks);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_sleep() {
        let mut supervisor = TaskSupervisor::new(0);
        supervisor.spawn("slow", Duration::from_secs(3600), || async {});

        tokio::time::sleep(Duration::from_millis(10)).await;
        let stopped = tokio::time::timeout(Duration::from_secs(1), supervisor.shutdown()).await;
        assert!(stopped.is_ok());
    }

    #[tokio::test]
    async fn test_panicking_loop_restarted() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut supervisor = TaskSupervisor::new(5);

        let c = counter.clone();
        supervisor.spawn("flaky", Duration::from_millis(5), move || {
            let c = c.clone();
            async move {
                // 前两次迭代 panic
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    panic!("flaky iteration");
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(supervisor.restart_count(), 2);
        assert!(counter.load(Ordering::SeqCst) > 2);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_restart_limit() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut supervisor = TaskSupervisor::new(2);

        let c = counter.clone();
        supervisor.spawn("broken", Duration::from_millis(5), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                panic!("always fails");
            }
        });

        tokio::time::sleep(Duration::from_millis(80)).await;
        // 首次运行加两次重启
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(supervisor.restart_count(), 2);
        supervisor.shutdown().await;
    }
}
