//! Handler capability trait and the per-event dispatch context.

use crate::connection::ConnectionError;
use crate::protocol::Message;
use mio::event::{Event, Source};
use mio::{Interest, Registry, Token};
use std::io;
use std::net::SocketAddr;

/// Readiness reported for one registered socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

impl Readiness {
    pub const READABLE: Readiness = Readiness {
        readable: true,
        writable: false,
    };

    pub const WRITABLE: Readiness = Readiness {
        readable: false,
        writable: true,
    };
}

impl From<&Event> for Readiness {
    fn from(event: &Event) -> Self {
        // Errors and hangups surface through the next read or write
        Self {
            readable: event.is_readable() || event.is_read_closed() || event.is_error(),
            writable: event.is_writable() || event.is_write_closed(),
        }
    }
}

/// Context handed to a handler for the duration of one dispatch.
///
/// Gives access to the registry and keeps the multiplexer's record of the
/// handler's interest in sync when the handler changes it.
pub struct Dispatch<'a> {
    registry: &'a Registry,
    token: Token,
    interest: &'a mut Interest,
}

impl<'a> Dispatch<'a> {
    pub fn new(registry: &'a Registry, token: Token, interest: &'a mut Interest) -> Self {
        Self {
            registry,
            token,
            interest,
        }
    }

    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    pub fn token(&self) -> Token {
        self.token
    }

    /// Interest currently registered for this handler's socket.
    pub fn interest(&self) -> Interest {
        *self.interest
    }

    /// Changes the registered interest for `source`.
    pub fn reregister<S>(&mut self, source: &mut S, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        if *self.interest == interest {
            return Ok(());
        }
        self.registry.reregister(source, self.token, interest)?;
        *self.interest = interest;
        Ok(())
    }
}

/// The capability set the multiplexer needs from a registered handler.
pub trait EventHandler: Send {
    /// Address of the remote end, for diagnostics.
    fn peer_addr(&self) -> SocketAddr;

    /// Registers the handler's socket under `token`.
    fn register(&mut self, registry: &Registry, token: Token, interest: Interest)
        -> io::Result<()>;

    fn on_readable(&mut self, ctx: &mut Dispatch<'_>) -> Result<(), ConnectionError>;

    fn on_writable(&mut self, ctx: &mut Dispatch<'_>) -> Result<(), ConnectionError>;

    /// Deregisters and releases the socket. Must be idempotent.
    fn close(&mut self, registry: &Registry);

    fn is_closed(&self) -> bool;

    /// Hands over the decoded response, if the exchange completed.
    fn take_response(&mut self) -> Option<Message> {
        None
    }

    /// Dispatches one readiness report.
    ///
    /// Reads run before writes so a response that arrived alongside write
    /// readiness is not missed. A handler closed by its read side is not
    /// offered the write.
    fn process_events(
        &mut self,
        readiness: Readiness,
        ctx: &mut Dispatch<'_>,
    ) -> Result<(), ConnectionError> {
        if readiness.readable {
            self.on_readable(ctx)?;
        }
        if readiness.writable && !self.is_closed() {
            self.on_writable(ctx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::Poll;

    /// Records the order in which callbacks fire.
    struct Recorder {
        calls: Vec<&'static str>,
        close_on_read: bool,
        closed: bool,
    }

    impl Recorder {
        fn new(close_on_read: bool) -> Self {
            Self {
                calls: Vec::new(),
                close_on_read,
                closed: false,
            }
        }
    }

    impl EventHandler for Recorder {
        fn peer_addr(&self) -> SocketAddr {
            "127.0.0.1:9".parse().unwrap()
        }

        fn register(&mut self, _: &Registry, _: Token, _: Interest) -> io::Result<()> {
            Ok(())
        }

        fn on_readable(&mut self, _: &mut Dispatch<'_>) -> Result<(), ConnectionError> {
            self.calls.push("read");
            if self.close_on_read {
                self.closed = true;
            }
            Ok(())
        }

        fn on_writable(&mut self, _: &mut Dispatch<'_>) -> Result<(), ConnectionError> {
            self.calls.push("write");
            Ok(())
        }

        fn close(&mut self, _: &Registry) {
            self.closed = true;
        }

        fn is_closed(&self) -> bool {
            self.closed
        }
    }

    fn both() -> Readiness {
        Readiness {
            readable: true,
            writable: true,
        }
    }

    #[test]
    fn test_read_runs_before_write() {
        let poll = Poll::new().unwrap();
        let mut interest = Interest::READABLE | Interest::WRITABLE;
        let mut ctx = Dispatch::new(poll.registry(), Token(1), &mut interest);

        let mut handler = Recorder::new(false);
        handler.process_events(both(), &mut ctx).unwrap();
        assert_eq!(handler.calls, vec!["read", "write"]);
    }

    #[test]
    fn test_write_skipped_after_close_on_read() {
        let poll = Poll::new().unwrap();
        let mut interest = Interest::READABLE | Interest::WRITABLE;
        let mut ctx = Dispatch::new(poll.registry(), Token(1), &mut interest);

        let mut handler = Recorder::new(true);
        handler.process_events(both(), &mut ctx).unwrap();
        assert_eq!(handler.calls, vec!["read"]);
    }

    #[test]
    fn test_single_bit_dispatch() {
        let poll = Poll::new().unwrap();
        let mut interest = Interest::READABLE;
        let mut ctx = Dispatch::new(poll.registry(), Token(1), &mut interest);

        let mut handler = Recorder::new(false);
        handler.process_events(Readiness::WRITABLE, &mut ctx).unwrap();
        handler.process_events(Readiness::READABLE, &mut ctx).unwrap();
        assert_eq!(handler.calls, vec!["write", "read"]);
        assert_eq!(ctx.interest(), Interest::READABLE);
    }
}
