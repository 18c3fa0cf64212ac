//! The router (or mediator): the one component in this crate that actually
//! touches an I/O stream. It multiplexes concurrently issued method calls,
//! delivers replies to the caller awaiting them, and fans signals and
//! unsolicited calls out to subscribed filters.
//!
//! The dispatch loop and the serial/pending-reply bookkeeping are I/O-runtime
//! agnostic in shape, but this crate ships exactly one backend: `tokio`'s
//! [`AsyncRead`]/[`AsyncWrite`] pair, with the reader split from the writer
//! so a single `Router` handle can be cloned and used from many tasks.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{oneshot, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::generator;
use crate::match_rule::MatchRule;
use crate::message::{self, Message, Parser};
use crate::names::{BusName, ErrorName};
use crate::protocol::{Endianness, Flags, MessageType};
use crate::sasl::{Mechanism, SaslParser};
use crate::value::Value;

/// The default number of buffered messages a [`Router::filter`] subscription
/// holds before it starts dropping the oldest one.
const DEFAULT_FILTER_CAPACITY: usize = 64;

/// The lifecycle state of a [`Router`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    /// The transport is open but the SASL handshake has not started.
    Opening,
    /// The SASL handshake is in progress.
    Authenticating,
    /// Authenticated, `Hello` has completed, and messages flow normally.
    Running,
    /// `close()` has been called or a fatal stream error occurred; pending
    /// work is being drained.
    Closing,
    /// Fully drained. Every operation now fails with [`ErrorKind::InvalidState`].
    Closed,
}

/// A live D-Bus connection: the authenticated transport plus the in-memory
/// bookkeeping needed to route replies and filtered messages.
///
/// Cloning a `Router` is cheap and shares the same underlying connection;
/// this is the handle callers pass around.
pub struct Router<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for Router<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S> fmt::Debug for Router<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("state", &self.state())
            .field("unique_name", &self.unique_name())
            .finish()
    }
}

struct Shared<S> {
    writer: AsyncMutex<WriteHalf<S>>,
    next_serial: AtomicU32,
    state: StdMutex<RouterState>,
    pending: StdMutex<HashMap<u32, oneshot::Sender<Result<Message>>>>,
    filters: StdMutex<Vec<Arc<FilterInner>>>,
    next_filter_id: AtomicU64,
    unique_name: StdMutex<Option<BusName>>,
    reader_task: StdMutex<Option<JoinHandle<()>>>,
}

/// Lets a [`FilterStream`] deregister itself from the router on drop without
/// threading the stream's concurrency backend through its type.
trait FilterRegistry: Send + Sync {
    fn remove_filter(&self, id: u64);
}

impl<S: Send + Sync + 'static> FilterRegistry for Shared<S> {
    fn remove_filter(&self, id: u64) {
        self.filters.lock().unwrap().retain(|f| f.id != id);
    }
}

impl<S> Router<S>
where
    S: AsyncRead + AsyncWrite + Send + Sync + 'static,
{
    /// Run the SASL handshake over `stream`, then issue `Hello` and start the
    /// dispatch loop. The returned router is in [`RouterState::Running`].
    pub async fn connect(stream: S, mechanism: Mechanism) -> Result<Self> {
        let (mut read_half, mut write_half) = split(stream);

        debug!(mechanism = %mechanism, "starting SASL handshake");
        write_half.write_all(&[crate::sasl::INITIAL_ZERO_BYTE]).await?;
        write_half.write_all(mechanism.auth_line().as_bytes()).await?;

        let mut sasl = SaslParser::new();
        let mut buf = [0u8; 512];

        while !sasl.is_terminal() {
            let n = read_half.read(&mut buf).await?;
            if n == 0 {
                return Err(Error::new(ErrorKind::ConnectionClosed));
            }
            sasl.feed(&buf[..n]);
        }

        if !sasl.is_authenticated() {
            let reason = sasl.error().unwrap_or("unknown").to_string();
            warn!(reason = %reason, "SASL authentication rejected");
            return Err(Error::new(ErrorKind::SaslRejected(reason)));
        }

        trace!(guid = ?sasl.guid(), "SASL authenticated");
        write_half.write_all(crate::sasl::BEGIN_LINE.as_bytes()).await?;

        let shared = Arc::new(Shared {
            writer: AsyncMutex::new(write_half),
            next_serial: AtomicU32::new(1),
            state: StdMutex::new(RouterState::Authenticating),
            pending: StdMutex::new(HashMap::new()),
            filters: StdMutex::new(Vec::new()),
            next_filter_id: AtomicU64::new(1),
            unique_name: StdMutex::new(None),
            reader_task: StdMutex::new(None),
        });

        let reader_shared = Arc::clone(&shared);
        let handle = tokio::spawn(async move {
            reader_loop(reader_shared, read_half).await;
        });
        *shared.reader_task.lock().unwrap() = Some(handle);
        *shared.state.lock().unwrap() = RouterState::Running;
        debug!("router running");

        let router = Router { shared };

        let hello = generator::hello(&generator::bus())?;
        let reply = router.send_and_get_reply(hello, None).await?;
        let name = match reply.body.first() {
            Some(Value::String(s)) => BusName::new(s.clone())?,
            _ => return Err(Error::new(ErrorKind::InvalidProtocol)),
        };
        debug!(unique_name = %name.as_str(), "Hello completed");
        *router.shared.unique_name.lock().unwrap() = Some(name);

        Ok(router)
    }

    /// The router's current lifecycle state.
    pub fn state(&self) -> RouterState {
        *self.shared.state.lock().unwrap()
    }

    /// The unique bus name assigned by `Hello`, once connected.
    pub fn unique_name(&self) -> Option<BusName> {
        self.shared.unique_name.lock().unwrap().clone()
    }

    /// Assign the next serial, write `message` to the stream, and return the
    /// serial it was sent with. Does not wait for a reply.
    pub async fn send(&self, mut message: Message) -> Result<u32> {
        self.check_open()?;
        let serial = self.shared.allocate_serial();
        self.write_with_serial(&mut message, serial).await?;
        Ok(serial)
    }

    /// Send `message` and wait for its `method_return` or `error` reply.
    ///
    /// The reply slot is registered before the bytes are written, so the
    /// reader can never observe a reply whose slot is missing. Dropping the
    /// returned future before it resolves removes the slot; if the reply
    /// still arrives afterwards it is delivered to matching filters instead.
    pub async fn send_and_get_reply(
        &self,
        mut message: Message,
        timeout: Option<Duration>,
    ) -> Result<Message> {
        self.check_open()?;

        let serial = self.shared.allocate_serial();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().unwrap().insert(serial, tx);
        let mut guard = PendingGuard {
            shared: &self.shared,
            serial,
            armed: true,
        };

        if let Err(e) = self.write_with_serial(&mut message, serial).await {
            guard.disarm_and_remove();
            return Err(e);
        }

        let result = match timeout {
            Some(duration) => match tokio::time::timeout(duration, rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(Error::new(ErrorKind::ConnectionClosed)),
                Err(_) => {
                    guard.disarm_and_remove();
                    Err(Error::new(ErrorKind::Timeout))
                }
            },
            None => match rx.await {
                Ok(result) => result,
                Err(_) => Err(Error::new(ErrorKind::ConnectionClosed)),
            },
        };

        guard.armed = false;
        result
    }

    /// Register a predicate-based subscription. Messages that don't correlate
    /// with a pending reply are offered to every filter, in registration
    /// order; a filter at capacity drops its oldest buffered message rather
    /// than stall the reader.
    pub fn filter(&self, rule: MatchRule) -> FilterStream {
        self.filter_with_capacity(rule, DEFAULT_FILTER_CAPACITY)
    }

    /// As [`Router::filter`], but with an explicit per-subscription bound.
    pub fn filter_with_capacity(&self, rule: MatchRule, capacity: usize) -> FilterStream {
        let id = self.shared.next_filter_id.fetch_add(1, Ordering::Relaxed);

        let inner = Arc::new(FilterInner {
            id,
            rule,
            capacity,
            queue: StdMutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        });

        self.shared.filters.lock().unwrap().push(Arc::clone(&inner));

        FilterStream {
            inner,
            registry: Arc::downgrade(&self.shared) as Weak<dyn FilterRegistry>,
        }
    }

    /// Shut the connection down: drain the pending-reply table by failing
    /// every entry, mark every filter closed, and stop the reader task.
    pub fn close(&self) {
        let previous = {
            let mut state = self.shared.state.lock().unwrap();
            let previous = *state;
            *state = RouterState::Closing;
            previous
        };

        if previous == RouterState::Closed || previous == RouterState::Closing {
            return;
        }

        debug!("closing router");
        self.shared.fail_all(|| Error::new(ErrorKind::ConnectionClosed));
        self.shared.close_all_filters();

        if let Some(handle) = self.shared.reader_task.lock().unwrap().take() {
            handle.abort();
        }

        *self.shared.state.lock().unwrap() = RouterState::Closed;
    }

    fn check_open(&self) -> Result<()> {
        let state = self.state();
        if state == RouterState::Running {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::InvalidState(state)))
        }
    }

    async fn write_with_serial(&self, message: &mut Message, serial: u32) -> Result<()> {
        message.header.serial = serial;
        let bytes = message.encode(Endianness::NATIVE)?;
        trace!(serial, message_type = ?message.header.message_type, "writing message");
        let mut writer = self.shared.writer.lock().await;
        writer.write_all(&bytes).await?;
        Ok(())
    }
}

/// Removes a pending-reply slot on early drop (timeout, write failure, or the
/// caller abandoning the future before it resolves).
struct PendingGuard<'a, S> {
    shared: &'a Shared<S>,
    serial: u32,
    armed: bool,
}

impl<S> PendingGuard<'_, S> {
    fn disarm_and_remove(&mut self) {
        self.armed = false;
        self.shared.pending.lock().unwrap().remove(&self.serial);
    }
}

impl<S> Drop for PendingGuard<'_, S> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.pending.lock().unwrap().remove(&self.serial);
        }
    }
}

impl<S> Shared<S> {
    /// Allocate the next outbound serial: monotonic, starts at 1, skips 0 on
    /// wrap.
    fn allocate_serial(&self) -> u32 {
        loop {
            let current = self.next_serial.load(Ordering::SeqCst);
            let next = match current.wrapping_add(1) {
                0 => 1,
                next => next,
            };

            if self
                .next_serial
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return current;
            }
        }
    }

    fn fail_all(&self, mut make_error: impl FnMut() -> Error) {
        let pending = std::mem::take(&mut *self.pending.lock().unwrap());
        for (_, tx) in pending {
            let _ = tx.send(Err(make_error()));
        }
    }

    fn close_all_filters(&self) {
        let filters = std::mem::take(&mut *self.filters.lock().unwrap());
        for filter in filters {
            filter.closed.store(true, Ordering::SeqCst);
            filter.notify.notify_waiters();
        }
    }

    /// Classify and route one incoming message: complete a matching pending
    /// reply, or fan it out to matching filters.
    async fn dispatch(&self, message: Message) {
        let reply_serial = message.header.fields.reply_serial;
        let is_reply = matches!(
            message.header.message_type,
            MessageType::METHOD_RETURN | MessageType::ERROR
        );

        if is_reply {
            if let Some(serial) = reply_serial {
                let slot = self.pending.lock().unwrap().remove(&serial);
                if let Some(tx) = slot {
                    trace!(serial, "completing pending reply");
                    let _ = tx.send(Ok(message));
                    return;
                }
            }
        }

        let matched = self.deliver_to_filters(&message);

        if !matched
            && message.header.message_type == MessageType::METHOD_CALL
            && !(message.header.flags & Flags::NO_REPLY_EXPECTED)
        {
            self.reply_unknown_method(&message).await;
        }
    }

    fn deliver_to_filters(&self, message: &Message) -> bool {
        let filters = self.filters.lock().unwrap().clone();
        let mut matched = false;

        for filter in &filters {
            if !filter.rule.matches(message) {
                continue;
            }

            matched = true;
            let mut queue = filter.queue.lock().unwrap();

            if queue.len() >= filter.capacity {
                queue.pop_front();
                warn!(filter_id = filter.id, "filter at capacity, dropping oldest message");
            }

            queue.push_back(message.clone());
            drop(queue);
            filter.notify.notify_waiters();
        }

        matched
    }

    async fn reply_unknown_method(&self, call: &Message) {
        let member = call
            .header
            .fields
            .member
            .as_deref()
            .unwrap_or("<unknown>");

        let Ok(error_name) = ErrorName::new("org.freedesktop.DBus.Error.UnknownMethod") else {
            return;
        };

        let reply = message::error(
            call,
            error_name,
            Some("s".to_string()),
            vec![Value::String(format!("No such method: {member}"))],
        );

        let Ok(mut reply) = reply else {
            return;
        };

        let serial = self.allocate_serial();
        reply.header.serial = serial;

        let Ok(bytes) = reply.encode(Endianness::NATIVE) else {
            return;
        };

        trace!(member, "auto-replying UnknownMethod");
        let mut writer = self.writer.lock().await;
        let _ = writer.write_all(&bytes).await;
    }
}

async fn reader_loop<S>(shared: Arc<Shared<S>>, mut read_half: ReadHalf<S>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let mut parser = Parser::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = match read_half.read(&mut buf).await {
            Ok(0) => {
                debug!("peer closed the connection");
                shared.fail_all(|| Error::new(ErrorKind::ConnectionClosed));
                shared.close_all_filters();
                *shared.state.lock().unwrap() = RouterState::Closed;
                return;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "connection read failed");
                shared.fail_all(|| Error::new(ErrorKind::ConnectionClosed));
                shared.close_all_filters();
                *shared.state.lock().unwrap() = RouterState::Closed;
                return;
            }
        };

        parser.feed(&buf[..n]);

        loop {
            match parser.next_message() {
                Ok(Some(message)) => shared.dispatch(message).await,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "malformed frame, closing connection");
                    shared.fail_all(|| Error::new(ErrorKind::ConnectionClosed));
                    shared.close_all_filters();
                    *shared.state.lock().unwrap() = RouterState::Closed;
                    return;
                }
            }
        }
    }
}

struct FilterInner {
    id: u64,
    rule: MatchRule,
    capacity: usize,
    queue: StdMutex<VecDeque<Message>>,
    notify: Notify,
    closed: AtomicBool,
}

/// A handle to a [`Router::filter`] subscription.
///
/// Dropping it deregisters the subscription from the router. Polling it with
/// [`FilterStream::recv`] yields messages in the order the reader observed
/// them.
pub struct FilterStream {
    inner: Arc<FilterInner>,
    registry: Weak<dyn FilterRegistry>,
}

impl fmt::Debug for FilterStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterStream")
            .field("id", &self.inner.id)
            .finish()
    }
}

impl FilterStream {
    /// Wait for the next message matching this filter's rule. Returns `None`
    /// once the router has closed and every already-buffered message has
    /// been drained.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            {
                let mut queue = self.inner.queue.lock().unwrap();
                if let Some(message) = queue.pop_front() {
                    return Some(message);
                }
                if self.inner.closed.load(Ordering::SeqCst) {
                    return None;
                }
            }

            self.inner.notify.notified().await;
        }
    }
}

impl Drop for FilterStream {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_filter(self.inner.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message;
    use crate::names::{InterfaceName, MemberName};
    use crate::object_path::ObjectPath;

    async fn connected_pair() -> (Router<tokio::io::DuplexStream>, tokio::io::DuplexStream) {
        let (client_stream, mut server_stream) = tokio::io::duplex(8192);

        let client = tokio::spawn(Router::connect(client_stream, Mechanism::anonymous()));

        let mut buf = [0u8; 256];
        let mut total = Vec::new();
        loop {
            let n = server_stream.read(&mut buf).await.unwrap();
            total.extend_from_slice(&buf[..n]);
            if total.ends_with(b"\r\n") && total.windows(4).any(|w| w == b"AUTH") {
                break;
            }
        }
        server_stream.write_all(b"OK 0000deadbeef0000\r\n").await.unwrap();

        let mut begin = [0u8; 7];
        server_stream.read_exact(&mut begin).await.unwrap();
        assert_eq!(&begin, b"BEGIN\r\n");

        let mut parser = Parser::new();
        let hello = loop {
            let n = server_stream.read(&mut buf).await.unwrap();
            parser.feed(&buf[..n]);
            if let Some(message) = parser.next_message().unwrap() {
                break message;
            }
        };
        assert_eq!(hello.header.fields.member.as_deref(), Some("Hello"));

        let reply = message::method_return(
            &hello,
            Some("s".to_string()),
            vec![Value::String(":1.42".to_string())],
        )
        .unwrap();
        let mut reply = reply;
        reply.header.serial = 9001;
        server_stream
            .write_all(&reply.encode(Endianness::NATIVE).unwrap())
            .await
            .unwrap();

        let router = client.await.unwrap().unwrap();
        (router, server_stream)
    }

    #[tokio::test]
    async fn connect_assigns_unique_name_from_hello() {
        let (router, _server) = connected_pair().await;
        assert_eq!(router.unique_name().as_deref(), Some(":1.42"));
        assert_eq!(router.state(), RouterState::Running);
    }

    #[tokio::test]
    async fn send_and_get_reply_correlates_by_serial() {
        let (router, mut server) = connected_pair().await;

        let ping = message::method_call(
            &message::DBusAddress::for_peer(ObjectPath::new("/org/example/Obj").unwrap(), None),
            MemberName::new("Ping").unwrap(),
            None,
            Vec::new(),
            Flags::EMPTY,
        )
        .unwrap();

        let router2 = router.clone();
        let call_task = tokio::spawn(async move { router2.send_and_get_reply(ping, None).await });

        let mut buf = [0u8; 256];
        let mut parser = Parser::new();
        let received = loop {
            let n = server.read(&mut buf).await.unwrap();
            parser.feed(&buf[..n]);
            if let Some(message) = parser.next_message().unwrap() {
                break message;
            }
        };

        let reply = message::method_return(&received, None, Vec::new()).unwrap();
        let mut reply = reply;
        reply.header.serial = 777;
        server
            .write_all(&reply.encode(Endianness::NATIVE).unwrap())
            .await
            .unwrap();

        let result = call_task.await.unwrap().unwrap();
        assert_eq!(result.header.fields.reply_serial, Some(received.header.serial));
    }

    #[tokio::test]
    async fn filter_receives_unsolicited_signal() {
        let (router, mut server) = connected_pair().await;

        let mut stream = router.filter(
            MatchRule::new()
                .interface("org.example.Iface")
                .member("Ticked"),
        );

        let signal = message::signal(
            ObjectPath::new("/org/example/Obj").unwrap(),
            InterfaceName::new("org.example.Iface").unwrap(),
            MemberName::new("Ticked").unwrap(),
            None,
            Vec::new(),
        )
        .unwrap();
        let mut signal = signal;
        signal.header.serial = 55;

        server
            .write_all(&signal.encode(Endianness::NATIVE).unwrap())
            .await
            .unwrap();

        let received = stream.recv().await.expect("signal delivered");
        assert_eq!(received.header.fields.member.as_deref(), Some("Ticked"));
    }

    #[tokio::test]
    async fn close_fails_pending_replies() {
        let (router, _server) = connected_pair().await;

        let ping = message::method_call(
            &message::DBusAddress::for_peer(ObjectPath::new("/org/example/Obj").unwrap(), None),
            MemberName::new("Ping").unwrap(),
            None,
            Vec::new(),
            Flags::EMPTY,
        )
        .unwrap();

        let router2 = router.clone();
        let call_task = tokio::spawn(async move { router2.send_and_get_reply(ping, None).await });

        // Give the send a moment to register its slot before closing.
        tokio::task::yield_now().await;
        router.close();

        let result = call_task.await.unwrap();
        assert!(result.is_err());
        assert_eq!(router.state(), RouterState::Closed);
    }

    #[tokio::test]
    async fn send_on_closed_router_is_rejected() {
        let (router, _server) = connected_pair().await;
        router.close();

        let ping = message::method_call(
            &message::DBusAddress::for_peer(ObjectPath::new("/org/example/Obj").unwrap(), None),
            MemberName::new("Ping").unwrap(),
            None,
            Vec::new(),
            Flags::EMPTY,
        )
        .unwrap();

        assert!(router.send(ping).await.is_err());
    }
}
