use errors::Result;
use metrics::gauge;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Dual concurrency gate: direct requests share a small budget, proxied
/// requests a larger one. Proxy resolution happens before acquisition, so a
/// task that could not obtain a proxy is charged against the scarcer gate.
pub struct ConcurrencyGate {
    no_proxy: Arc<Semaphore>,
    proxy: Arc<Semaphore>,
    no_proxy_capacity: usize,
    proxy_capacity: usize,
}

impl ConcurrencyGate {
    pub fn new(no_proxy_permits: usize, proxy_permits: usize) -> Self {
        Self {
            no_proxy: Arc::new(Semaphore::new(no_proxy_permits)),
            proxy: Arc::new(Semaphore::new(proxy_permits)),
            no_proxy_capacity: no_proxy_permits,
            proxy_capacity: proxy_permits,
        }
    }

    /// Waits for a permit on exactly one of the two gates. The permit is
    /// released when the returned guard drops, on every exit path.
    pub async fn acquire(&self, proxied: bool) -> Result<GatePermit> {
        let (sem, label) = if proxied {
            (self.proxy.clone(), "proxy")
        } else {
            (self.no_proxy.clone(), "no_proxy")
        };
        let permit = sem
            .acquire_owned()
            .await
            .map_err(|_| errors::Error::cancelled())?;
        gauge!("gate_permits_in_use", "gate" => label).increment(1.0);
        Ok(GatePermit {
            _permit: permit,
            label,
        })
    }

    /// Permits currently held on (no-proxy, proxy) gates.
    pub fn outstanding(&self) -> (usize, usize) {
        (
            self.no_proxy_capacity - self.no_proxy.available_permits(),
            self.proxy_capacity - self.proxy.available_permits(),
        )
    }
}

pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    label: &'static str,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        gauge!("gate_permits_in_use", "gate" => self.label).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_acquire_charges_exactly_one_gate() {
        let gate = ConcurrencyGate::new(5, 20);

        let direct = gate.acquire(false).await.unwrap();
        assert_eq!(gate.outstanding(), (1, 0));

        let proxied = gate.acquire(true).await.unwrap();
        assert_eq!(gate.outstanding(), (1, 1));

        drop(direct);
        assert_eq!(gate.outstanding(), (0, 1));
        drop(proxied);
        assert_eq!(gate.outstanding(), (0, 0));
    }

    #[tokio::test]
    async fn test_no_proxy_gate_caps_at_capacity() {
        let gate = Arc::new(ConcurrencyGate::new(2, 20));

        let _one = gate.acquire(false).await.unwrap();
        let _two = gate.acquire(false).await.unwrap();
        assert_eq!(gate.outstanding(), (2, 0));

        // A third direct acquisition must block while the gate is full.
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire(false).await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        // The proxied gate is unaffected.
        let _proxied = gate.acquire(true).await.unwrap();
        assert_eq!(gate.outstanding(), (2, 1));

        drop(_one);
        let _three = waiter.await.unwrap();
        assert_eq!(gate.outstanding(), (2, 1));
    }

    #[tokio::test]
    async fn test_permit_released_when_task_panics() {
        let gate = Arc::new(ConcurrencyGate::new(1, 1));
        let handle = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let _permit = gate.acquire(false).await.unwrap();
                panic!("task blew up");
            })
        };
        assert!(handle.await.is_err());
        assert_eq!(gate.outstanding(), (0, 0));
    }
}
