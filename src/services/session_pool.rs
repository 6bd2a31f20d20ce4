use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use rand::Rng;
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use crate::{configuration::BrowserSettings, error::ScrapeError, services::droid::BrowserDriver};

const LAUNCH_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy)]
struct Pacing {
    min_interval: Duration,
    jitter: Duration,
}

/// A browser session checked out of the pool. Holds one pool slot until it is
/// released or discarded.
pub struct Session<H> {
    id: usize,
    handle: H,
    pacing: Pacing,
    last_request: Option<Instant>,
    _permit: OwnedSemaphorePermit,
}

impl<H> Session<H> {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    /// Waits out the minimum spacing (plus jitter) since this session's last request.
    pub async fn pace(&mut self) {
        if let Some(last) = self.last_request {
            let jitter_ms = self.pacing.jitter.as_millis() as u64;
            let jitter = match jitter_ms {
                0 => Duration::ZERO,
                _ => Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms)),
            };
            tokio::time::sleep_until(last + self.pacing.min_interval + jitter).await;
        }
        self.last_request = Some(Instant::now());
    }
}

struct IdleSession<H> {
    id: usize,
    handle: H,
    last_request: Option<Instant>,
}

pub struct SessionPool<D: BrowserDriver> {
    driver: Arc<D>,
    slots: Arc<Semaphore>,
    idle: Mutex<Vec<IdleSession<D::Handle>>>,
    max_sessions: usize,
    launch_attempts: u32,
    launch_backoff: Duration,
    pacing: Pacing,
    open: AtomicUsize,
    peak: AtomicUsize,
    next_id: AtomicUsize,
}

impl<D: BrowserDriver> SessionPool<D> {
    pub fn new(driver: Arc<D>, settings: &BrowserSettings) -> Self {
        let max_sessions = settings.max_sessions.max(1);
        SessionPool {
            driver,
            slots: Arc::new(Semaphore::new(max_sessions)),
            idle: Mutex::new(vec![]),
            max_sessions,
            launch_attempts: settings.launch_attempts.max(1),
            launch_backoff: LAUNCH_BACKOFF,
            pacing: Pacing {
                min_interval: settings.min_request_interval(),
                jitter: settings.pacing_jitter(),
            },
            open: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn with_launch_backoff(mut self, backoff: Duration) -> Self {
        self.launch_backoff = backoff;
        self
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    pub fn open_sessions(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Highest number of sessions that were open at the same time.
    pub fn peak_sessions(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Waits for a free slot, then hands out an idle session or launches a new one.
    pub async fn acquire(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Session<D::Handle>, ScrapeError> {
        let permit = tokio::select! {
            _ = cancel.cancelled() => return Err(ScrapeError::Cancelled),
            permit = self.slots.clone().acquire_owned() => {
                permit.map_err(|_| ScrapeError::Cancelled)?
            }
        };

        if let Some(idle) = self.pop_idle() {
            log::debug!("Reusing browser session #{}", idle.id);
            return Ok(Session {
                id: idle.id,
                handle: idle.handle,
                pacing: self.pacing,
                last_request: idle.last_request,
                _permit: permit,
            });
        }

        let handle = self.launch(cancel).await?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(open, Ordering::SeqCst);
        log::info!("Launched browser session #{} ({} open)", id, open);

        Ok(Session {
            id,
            handle,
            pacing: self.pacing,
            last_request: None,
            _permit: permit,
        })
    }

    /// Returns a healthy session for reuse and frees its slot.
    pub fn release(&self, session: Session<D::Handle>) {
        let Session {
            id,
            handle,
            last_request,
            _permit,
            ..
        } = session;

        if let Ok(mut idle) = self.idle.lock() {
            idle.push(IdleSession {
                id,
                handle,
                last_request,
            });
        }
        drop(_permit);
    }

    /// Closes a crashed or abandoned session. The next `acquire` launches a replacement.
    pub async fn discard(&self, session: Session<D::Handle>) {
        let Session {
            id,
            handle,
            _permit,
            ..
        } = session;

        log::warn!("Discarding browser session #{}", id);
        self.driver.close_session(handle).await;
        self.open.fetch_sub(1, Ordering::SeqCst);
        drop(_permit);
    }

    /// Closes every idle session.
    pub async fn shutdown(&self) {
        let idle: Vec<IdleSession<D::Handle>> = match self.idle.lock() {
            Ok(mut idle) => idle.drain(..).collect(),
            Err(_) => vec![],
        };

        for session in idle {
            self.driver.close_session(session.handle).await;
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
        log::info!("Browser pool shut down ({} still checked out)", self.open_sessions());
    }

    fn pop_idle(&self) -> Option<IdleSession<D::Handle>> {
        self.idle.lock().ok().and_then(|mut idle| idle.pop())
    }

    async fn launch(&self, cancel: &CancellationToken) -> Result<D::Handle, ScrapeError> {
        let mut message = String::new();

        for attempt in 1..=self.launch_attempts {
            match self.driver.open_session().await {
                Ok(handle) => return Ok(handle),
                Err(e) => {
                    log::warn!(
                        "Browser launch attempt {}/{} failed: {}",
                        attempt,
                        self.launch_attempts,
                        e
                    );
                    message = e.to_string();
                }
            }

            if attempt < self.launch_attempts {
                let backoff = self.launch_backoff * 2u32.pow(attempt - 1);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ScrapeError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }

        Err(ScrapeError::PoolExhausted {
            attempts: self.launch_attempts,
            message,
        })
    }
}

/// Runs a browser operation under the run's cancellation token. Once cancelled
/// the operation gets `grace` to finish before it is abandoned.
pub async fn with_grace<T, F>(
    cancel: &CancellationToken,
    grace: Duration,
    operation: F,
) -> Result<T, ScrapeError>
where
    F: Future<Output = Result<T, ScrapeError>>,
{
    tokio::pin!(operation);

    tokio::select! {
        result = &mut operation => result,
        _ = cancel.cancelled() => match tokio::time::timeout(grace, operation).await {
            Ok(result) => result,
            Err(_) => Err(ScrapeError::Cancelled),
        },
    }
}
