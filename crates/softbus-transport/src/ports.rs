//! Reserved-port pool for listening sessions.

use std::{
    collections::BTreeSet,
    net::{IpAddr, SocketAddr, TcpListener},
};

/// Ports reserved by this transport plus the rolling scan cursor.
#[derive(Debug)]
pub(crate) struct PortPool {
    base: u16,
    window: u16,
    next: u16,
    reserved: BTreeSet<u16>,
}

impl PortPool {
    pub(crate) fn new(base: u16, window: u16) -> Self {
        Self { base, window, next: base, reserved: BTreeSet::new() }
    }

    /// Scan up to `window` ports from the cursor and bind the first one that
    /// is neither reserved here nor taken by anyone else.
    ///
    /// Returns `None` when the whole window is exhausted.
    pub(crate) fn reserve(&mut self, ip: IpAddr) -> Option<(u16, TcpListener)> {
        for _ in 0..self.window {
            let candidate = self.advance();
            if self.reserved.contains(&candidate) {
                continue;
            }
            // std sets SO_REUSEADDR on Unix listeners, so a port in TIME_WAIT
            // from an earlier run is still usable.
            match TcpListener::bind(SocketAddr::new(ip, candidate)) {
                Ok(listener) => {
                    self.reserved.insert(candidate);
                    return Some((candidate, listener));
                },
                Err(e) => {
                    tracing::trace!(port = candidate, error = %e, "Port unavailable");
                },
            }
        }
        None
    }

    pub(crate) fn release(&mut self, port: u16) {
        self.reserved.remove(&port);
    }

    pub(crate) fn clear(&mut self) {
        self.reserved.clear();
        self.next = self.base;
    }

    #[cfg(test)]
    pub(crate) fn reserved(&self) -> usize {
        self.reserved.len()
    }

    fn advance(&mut self) -> u16 {
        let current = self.next;
        // Port 0 would mean "any port", so wrap back to the base instead.
        self.next = match self.next.checked_add(1) {
            Some(next) => next,
            None => self.base,
        };
        current
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[test]
    fn reserved_ports_are_skipped_until_released() {
        let mut pool = PortPool::new(51_200, 8);
        let (first, _a) = pool.reserve(LOCALHOST).unwrap();
        let (second, _b) = pool.reserve(LOCALHOST).unwrap();
        assert_ne!(first, second);
        assert_eq!(pool.reserved(), 2);

        pool.release(first);
        assert_eq!(pool.reserved(), 1);
        pool.clear();
        assert_eq!(pool.reserved(), 0);
    }

    #[test]
    fn ports_held_elsewhere_are_skipped() {
        let blocker = TcpListener::bind((LOCALHOST, 51_300)).unwrap();
        let mut pool = PortPool::new(51_300, 4);
        let (port, _listener) = pool.reserve(LOCALHOST).unwrap();
        assert_ne!(port, 51_300);
        drop(blocker);
    }

    #[test]
    fn exhausted_window_fails() {
        let _a = TcpListener::bind((LOCALHOST, 51_400)).unwrap();
        let _b = TcpListener::bind((LOCALHOST, 51_401)).unwrap();
        let mut pool = PortPool::new(51_400, 2);
        assert!(pool.reserve(LOCALHOST).is_none());

        // The cursor moved on, so the next scan starts past the blocked ports.
        assert!(pool.reserve(LOCALHOST).is_some());
    }

    #[test]
    fn cursor_wraps_to_base() {
        let mut pool = PortPool::new(65_534, 3);
        assert_eq!(pool.advance(), 65_534);
        assert_eq!(pool.advance(), 65_535);
        assert_eq!(pool.advance(), 65_534);
    }
}
