use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use crate::router::Router;

#[derive(Debug, Default)]
struct NotifyOnce {
    notified: AtomicBool,
    notify: Notify,
}

impl NotifyOnce {
    fn notify_waiters(&self) {
        self.notified.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn is_notified(&self) -> bool {
        self.notified.load(Ordering::SeqCst)
    }

    async fn notified(&self) {
        let future = self.notify.notified();

        if !self.notified.load(Ordering::SeqCst) {
            future.await;
        }
    }
}

#[derive(Default)]
struct HandleInner {
    conn_count: AtomicUsize,
    shutdown: NotifyOnce,
    kill: NotifyOnce,
    deadline: Mutex<Option<Duration>>,
}

/// Cloneable remote control for a running [`Server`].
#[derive(Clone, Default)]
pub struct Handle(Arc<HandleInner>);

/// Tracks one live connection; dropping the last watcher after a shutdown
/// request releases the server.
struct Watcher(Handle);

impl Watcher {
    fn inner(&self) -> &HandleInner {
        &self.0 .0
    }

    fn kill_notified(&self) -> impl Future<Output = ()> + '_ {
        self.inner().kill.notified()
    }

    fn shutdown_notified(&self) -> impl Future<Output = ()> + '_ {
        self.inner().shutdown.notified()
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        let count = self.inner().conn_count.fetch_sub(1, Ordering::SeqCst);

        // last connection out after a shutdown request stops the server
        if count == 1 && self.inner().shutdown.is_notified() {
            self.inner().kill.notify_waiters();
        }
    }
}

impl Handle {
    /// Bound the graceful drain; `None` (the default) waits for all
    /// connections to close.
    pub fn set_shutdown_timeout(&self, timeout: impl Into<Option<Duration>>) {
        *self.0.deadline.lock().unwrap() = timeout.into();
    }

    /// Stop accepting and drain in-flight connections.
    pub fn shutdown(&self) {
        self.0.shutdown.notify_waiters();
    }

    /// Drop everything immediately.
    pub fn kill(&self) {
        self.0.kill.notify_waiters();
    }

    pub fn shutdown_on<F>(self, signal: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            signal.await;
            self.shutdown();
        });
    }

    fn shutdown_notified(&self) -> impl Future<Output = ()> + '_ {
        self.0.shutdown.notified()
    }

    fn watcher(&self) -> Watcher {
        self.0.conn_count.fetch_add(1, Ordering::SeqCst);
        Watcher(self.clone())
    }

    async fn wait_drained(&self) {
        if self.0.conn_count.load(Ordering::SeqCst) == 0 {
            return;
        }

        let deadline = *self.0.deadline.lock().unwrap();

        match deadline {
            None => self.0.kill.notified().await,
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.0.kill.notified() => {}
                    _ = tokio::time::sleep(deadline) => self.kill(),
                }
            }
        }
    }
}

/// HTTP/1 + HTTP/2 server over a plain TCP listener. Each connection runs on
/// its own task; requests are dispatched through the shared [`Router`].
#[must_use]
pub struct Server {
    addr: SocketAddr,
    handle: Handle,
}

impl Server {
    pub fn bind(addr: SocketAddr) -> Server {
        Server { addr, handle: Handle::default() }
    }

    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    pub async fn serve(self, router: Router) -> io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_on(listener, router).await
    }

    pub async fn serve_on(self, listener: TcpListener, router: Router) -> io::Result<()> {
        let router = Arc::new(router);
        let builder = Arc::new(Builder::new(TokioExecutor::new()));
        let handle = self.handle;

        loop {
            let (stream, peer) = tokio::select! {
                biased;
                _ = handle.shutdown_notified() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        // transient accept failures (EMFILE and friends) back off briefly
                        log::debug!("accept failed: {e}");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        continue;
                    }
                },
            };

            let watcher = handle.watcher();
            let router = router.clone();
            let builder = builder.clone();

            tokio::spawn(async move {
                let service = hyper::service::service_fn(
                    move |req: http::Request<hyper::body::Incoming>| {
                        let router = router.clone();
                        async move {
                            Ok::<_, std::convert::Infallible>(router.dispatch(req).await)
                        }
                    },
                );

                let mut conn =
                    pin!(builder.serve_connection_with_upgrades(TokioIo::new(stream), service));
                let mut draining = false;

                loop {
                    tokio::select! {
                        biased;

                        _ = watcher.kill_notified() => break,

                        result = conn.as_mut() => {
                            if let Err(err) = result {
                                // hyper-level noise (resets, parse errors) is not worth a log line
                                if err.downcast_ref::<hyper::Error>().is_none() {
                                    log::error!("connection error from {peer}: {err:?}");
                                }
                            }
                            break;
                        }

                        _ = watcher.shutdown_notified(), if !draining => {
                            conn.as_mut().graceful_shutdown();
                            draining = true;
                        }
                    }
                }
            });
        }

        handle.wait_drained().await;

        Ok(())
    }
}
