//! 连接生命周期管理
//!
//! `Stopped → start → Running → stop | 信号 → Draining → Stopped`
//!
//! 每个服务实例持有一个数据库句柄与一个可选的缓存客户端。两种退出路径都是幂等的：
//! 句柄只会被取出并关闭一次，信号监听任务随 stop 一起移除。

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tessera_common::{RetryPolicy, with_retry};
use tessera_errors::AppResult;
use tessera_ports::{IndexSync, ManagedConnection, SeedRoutine};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{ConnectionMonitor, DEFAULT_MONITOR_INTERVAL, wait_for_os_signal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Running,
    Draining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT
    Interrupt,
    /// SIGTERM
    Terminate,
    /// 调用方主动停止
    Requested,
}

impl ShutdownReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Requested => "requested",
        }
    }
}

/// 信号处理结束后的进程退出动作
pub type ExitHook = Arc<dyn Fn(i32) + Send + Sync>;

pub type SignalFuture = Pin<Box<dyn Future<Output = ShutdownReason> + Send>>;

/// 每次 start 调用一次，得到等待下一个退出信号的 future
pub type SignalSource = Arc<dyn Fn() -> SignalFuture + Send + Sync>;

pub fn os_signal_source() -> SignalSource {
    Arc::new(|| -> SignalFuture { Box::pin(wait_for_os_signal()) })
}

fn exit_process(code: i32) {
    std::process::exit(code)
}

pub fn process_exit() -> ExitHook {
    Arc::new(exit_process)
}

/// 打开实例所需的外部连接
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Datastore: ManagedConnection;
    type Cache: ManagedConnection;

    async fn open_datastore(&self) -> AppResult<Self::Datastore>;

    /// 未配置缓存时返回 None
    async fn open_cache(&self) -> AppResult<Option<Self::Cache>>;
}

pub struct ConnectionHandles<D, C> {
    pub datastore: Arc<D>,
    pub cache: Option<Arc<C>>,
}

impl<D, C> Clone for ConnectionHandles<D, C> {
    fn clone(&self) -> Self {
        Self {
            datastore: self.datastore.clone(),
            cache: self.cache.clone(),
        }
    }
}

struct Slot<D, C> {
    handles: Option<ConnectionHandles<D, C>>,
    signal_task: Option<JoinHandle<()>>,
    monitors: Vec<JoinHandle<()>>,
}

pub struct ConnectionLifecycleManager<F: ConnectionFactory> {
    factory: F,
    retry: RetryPolicy,
    seed: Option<Arc<dyn SeedRoutine<F::Datastore>>>,
    index_sync: Option<Arc<dyn IndexSync<F::Datastore>>>,
    sync_indexes: bool,
    monitor_interval: Option<Duration>,
    signals: SignalSource,
    exit: ExitHook,
    state: watch::Sender<LifecycleState>,
    slot: Mutex<Slot<F::Datastore, F::Cache>>,
}

impl<F: ConnectionFactory> ConnectionLifecycleManager<F> {
    pub fn new(factory: F) -> Self {
        let (state, _) = watch::channel(LifecycleState::Stopped);
        Self {
            factory,
            retry: RetryPolicy::default(),
            seed: None,
            index_sync: None,
            sync_indexes: false,
            monitor_interval: Some(DEFAULT_MONITOR_INTERVAL),
            signals: os_signal_source(),
            exit: process_exit(),
            state,
            slot: Mutex::new(Slot {
                handles: None,
                signal_task: None,
                monitors: Vec::new(),
            }),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// 集合为空时执行一次的初始化
    pub fn with_seed(mut self, seed: Arc<dyn SeedRoutine<F::Datastore>>) -> Self {
        self.seed = Some(seed);
        self
    }

    /// `enabled` 对应运维开关，关闭时不执行同步
    pub fn with_index_sync(mut self, index_sync: Arc<dyn IndexSync<F::Datastore>>, enabled: bool) -> Self {
        self.index_sync = Some(index_sync);
        self.sync_indexes = enabled;
        self
    }

    /// None 表示不启动连接观察
    pub fn with_monitor_interval(mut self, interval: Option<Duration>) -> Self {
        self.monitor_interval = interval;
        self
    }

    pub fn with_signal_source(mut self, signals: SignalSource) -> Self {
        self.signals = signals;
        self
    }

    pub fn with_exit_hook(mut self, exit: ExitHook) -> Self {
        self.exit = exit;
        self
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Running 时返回当前句柄
    pub async fn handles(&self) -> Option<ConnectionHandles<F::Datastore, F::Cache>> {
        self.slot.lock().await.handles.clone()
    }

    pub async fn has_signal_task(&self) -> bool {
        self.slot
            .lock()
            .await
            .signal_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// 等待进入 Stopped
    pub async fn wait_stopped(&self) {
        let mut receiver = self.state.subscribe();
        let _ = receiver
            .wait_for(|state| *state == LifecycleState::Stopped)
            .await;
    }

    /// 打开连接、执行初始化并注册信号监听；已运行时直接返回
    pub async fn start(self: &Arc<Self>) -> AppResult<()> {
        let mut slot = self.slot.lock().await;
        if slot.handles.is_some() {
            debug!("Connection lifecycle already running");
            return Ok(());
        }

        let datastore = with_retry(&self.retry, "datastore connection", || {
            self.factory.open_datastore()
        })
        .await?;
        let datastore = Arc::new(datastore);

        let cache = match with_retry(&self.retry, "cache connection", || self.factory.open_cache()).await {
            Ok(cache) => cache.map(Arc::new),
            Err(e) => {
                if let Err(close_err) = datastore.close().await {
                    warn!(error = %close_err, "Failed to close datastore after startup error");
                }
                return Err(e);
            }
        };
        let handles = ConnectionHandles { datastore, cache };

        if let Err(e) = self.prepare(handles.datastore.as_ref()).await {
            let _ = close_handles(&handles).await;
            return Err(e);
        }

        slot.monitors = self.spawn_monitors(&handles);
        slot.signal_task = Some(self.spawn_signal_task());
        slot.handles = Some(handles);
        self.state.send_replace(LifecycleState::Running);

        info!(
            seed = self.seed.is_some(),
            sync_indexes = self.sync_indexes,
            "Connection lifecycle started"
        );
        Ok(())
    }

    /// 关闭连接并移除信号监听；已停止时直接返回
    ///
    /// 只中止本实例的监听任务。tokio 安装的进程级 SIGINT / SIGTERM 处理器无法卸载，
    /// 因此从 stop 到下一次 start（或进程退出）之间收到的 Ctrl-C 会被吞掉而不终止进程。
    pub async fn stop(&self) -> AppResult<()> {
        self.teardown(ShutdownReason::Requested, false)
            .await
            .map(|_| ())
    }

    /// 信号处理流程：关闭连接（忽略错误）后退出进程
    pub async fn shutdown(&self, reason: ShutdownReason) {
        self.shutdown_inner(reason, false).await;
    }

    async fn shutdown_inner(&self, reason: ShutdownReason, from_signal: bool) {
        match self.teardown(reason, from_signal).await {
            Ok(false) => return,
            Ok(true) => {}
            Err(e) => warn!(error = %e, "Ignoring error during shutdown"),
        }
        info!(reason = reason.as_str(), "Exiting process");
        (self.exit)(0);
    }

    async fn prepare(&self, datastore: &F::Datastore) -> AppResult<()> {
        if let Some(seed) = &self.seed {
            if seed.is_empty(datastore).await? {
                let inserted = seed.seed(datastore).await?;
                info!(seed = seed.name(), inserted, "Seed routine completed");
            } else {
                debug!(seed = seed.name(), "Collection not empty, seed skipped");
            }
        }

        if let Some(index_sync) = &self.index_sync {
            if self.sync_indexes {
                let count = index_sync.sync_indexes(datastore).await?;
                info!(count, "Index definitions synchronized");
            }
        }

        Ok(())
    }

    fn spawn_monitors(&self, handles: &ConnectionHandles<F::Datastore, F::Cache>) -> Vec<JoinHandle<()>> {
        let Some(interval) = self.monitor_interval else {
            return Vec::new();
        };

        let mut monitors = vec![ConnectionMonitor::new(handles.datastore.clone(), interval).spawn()];
        if let Some(cache) = &handles.cache {
            monitors.push(ConnectionMonitor::new(cache.clone(), interval).spawn());
        }
        monitors
    }

    fn spawn_signal_task(self: &Arc<Self>) -> JoinHandle<()> {
        let manager: Weak<Self> = Arc::downgrade(self);
        let signal = (self.signals)();

        tokio::spawn(async move {
            let reason = signal.await;
            if let Some(manager) = manager.upgrade() {
                manager.shutdown_inner(reason, true).await;
            }
        })
    }

    /// 返回 Ok(false) 表示本来就已停止
    async fn teardown(&self, reason: ShutdownReason, from_signal: bool) -> AppResult<bool> {
        let mut slot = self.slot.lock().await;
        let Some(handles) = slot.handles.take() else {
            debug!(reason = reason.as_str(), "Connections already closed");
            return Ok(false);
        };

        self.state.send_replace(LifecycleState::Draining);
        info!(reason = reason.as_str(), "Closing connections");

        // 信号路径运行在监听任务内部，只能分离不能中止
        if let Some(task) = slot.signal_task.take() {
            if !from_signal {
                task.abort();
            }
        }
        for monitor in slot.monitors.drain(..) {
            monitor.abort();
        }

        let result = close_handles(&handles).await;
        self.state.send_replace(LifecycleState::Stopped);
        info!(reason = reason.as_str(), "Connections closed");

        result.map(|_| true)
    }
}

impl<F: ConnectionFactory> Drop for ConnectionLifecycleManager<F> {
    fn drop(&mut self) {
        let slot = self.slot.get_mut();
        if let Some(task) = slot.signal_task.take() {
            task.abort();
        }
        for monitor in slot.monitors.drain(..) {
            monitor.abort();
        }
    }
}

/// 依次关闭数据库与缓存，返回第一个错误
async fn close_handles<D, C>(handles: &ConnectionHandles<D, C>) -> AppResult<()>
where
    D: ManagedConnection,
    C: ManagedConnection,
{
    let mut first_err = None;

    if let Err(e) = handles.datastore.close().await {
        warn!(connection = handles.datastore.name(), error = %e, "Failed to close connection");
        first_err = Some(e);
    }
    if let Some(cache) = &handles.cache {
        if let Err(e) = cache.close().await {
            warn!(connection = cache.name(), error = %e, "Failed to close connection");
            first_err.get_or_insert(e);
        }
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
