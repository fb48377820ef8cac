use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::connection::accumulator::FrameAccumulator;
use crate::connection::fragmenter::{MessageFragmenter, TextFragmenter};
use crate::connection::{ConnectionState, Role};
use crate::error::{Error, Result};
use crate::extensions::{ExtensionPipeline, ExtensionRegistry};
use crate::message::{CloseCode, CloseFrame, Message};
use crate::protocol::frame::{MAX_CONTROL_FRAME_PAYLOAD, encode_frame};
use crate::protocol::{Frame, Handshake, HandshakeOutcome, MaskGenerator, MessageAssembler, OpCode};
use crate::transport::Transport;

/// What a connection hands to its processor, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A complete application message.
    Message(Message),
    /// A pong payload, after extensions restored it.
    Pong(Vec<u8>),
    /// The connection reached `Closed`. Carries the peer's close frame if
    /// one arrived; `None` means the closure was abnormal. Always last.
    Closed(Option<CloseFrame>),
}

struct Reader {
    handshake: Option<Handshake>,
    accumulator: FrameAccumulator,
    assembler: MessageAssembler,
}

impl Reader {
    fn release(&mut self) {
        self.handshake = None;
        self.accumulator.reset();
        self.assembler.reset();
    }
}

struct Writer {
    masks: MaskGenerator,
    queue: VecDeque<Bytes>,
}

struct Status {
    state: ConnectionState,
    local_closed: bool,
    remote_closed: bool,
    close_code: Option<u16>,
    close_reason: Vec<u8>,
    protocol: Option<String>,
    events: Option<mpsc::UnboundedSender<Event>>,
    close_timer: Option<CancellationToken>,
}

struct PongWaiter {
    payload: Vec<u8>,
    reply: oneshot::Sender<Vec<u8>>,
}

struct Inner {
    role: Role,
    config: Config,
    transport: Arc<dyn Transport>,
    // Lock order: reader, writer, pipeline, status. `pong_waiter` and
    // `receiver` are leaves.
    reader: Mutex<Reader>,
    writer: Mutex<Writer>,
    pipeline: Mutex<ExtensionPipeline>,
    status: Mutex<Status>,
    pong_waiter: Mutex<Option<PongWaiter>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
    outbound_ready: Notify,
    ping_serial: tokio::sync::Mutex<()>,
    ping_in_flight: AtomicBool,
    ping_generation: AtomicU64,
}

/// One WebSocket connection, client or server side.
///
/// The connection is a protocol engine over an abstract transport: a driver
/// feeds received bytes to [`add`](Self::add) and writes whatever
/// [`get`](Self::get) returns, waiting on
/// [`outbound_ready`](Self::outbound_ready) in between. Decoded messages,
/// pongs and the final close are queued as [`Event`]s for a
/// [`Processor`](crate::Processor).
///
/// `Connection` is a cheap handle; clones share the same state. Sending,
/// pinging and closing are serialized so fragments of different messages
/// never interleave.
///
/// ## Example
///
/// ```rust,ignore
/// let conn = Connection::client("example.com", "/chat", Config::new(), registry, transport)?;
/// // driver: write conn.get() to the socket, feed socket reads to conn.add()
/// conn.send_text("hello")?;
/// let rtt = conn.ping(b"rtt".to_vec()).await?;
/// conn.close(CloseCode::Normal, "bye")?;
/// ```
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    fn new(role: Role, config: Config, handshake: Handshake, transport: Arc<dyn Transport>) -> Self {
        let (events, receiver) = mpsc::unbounded_channel();
        let accumulator = FrameAccumulator::new(config.limits.clone());
        let assembler = MessageAssembler::with_limits(config.limits.clone());
        Self {
            inner: Arc::new(Inner {
                role,
                transport,
                reader: Mutex::new(Reader {
                    handshake: Some(handshake),
                    accumulator,
                    assembler,
                }),
                writer: Mutex::new(Writer {
                    masks: MaskGenerator::new(),
                    queue: VecDeque::new(),
                }),
                pipeline: Mutex::new(ExtensionPipeline::new()),
                status: Mutex::new(Status {
                    state: ConnectionState::Handshaking,
                    local_closed: false,
                    remote_closed: false,
                    close_code: None,
                    close_reason: Vec::new(),
                    protocol: None,
                    events: Some(events),
                    close_timer: None,
                }),
                pong_waiter: Mutex::new(None),
                receiver: Mutex::new(Some(receiver)),
                outbound_ready: Notify::new(),
                ping_serial: tokio::sync::Mutex::new(()),
                ping_in_flight: AtomicBool::new(false),
                ping_generation: AtomicU64::new(0),
                config,
            }),
        }
    }

    /// Create the server side of a connection. It waits for the client's
    /// upgrade request.
    pub fn server(
        config: Config,
        registry: Arc<ExtensionRegistry>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let handshake = Handshake::server(&config, registry);
        Self::new(Role::Server, config, handshake, transport)
    }

    /// Create the client side of a connection. The upgrade request is
    /// queued for [`get`](Self::get) immediately.
    ///
    /// # Errors
    ///
    /// - `Error::Io` if no handshake key can be generated
    /// - `Error::InvalidHeaderValue` if a configured header contains CR/LF
    pub fn client(
        host: &str,
        path: &str,
        config: Config,
        registry: Arc<ExtensionRegistry>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let (handshake, request) = Handshake::client(host, path, &config, registry)?;
        let connection = Self::new(Role::Client, config, handshake, transport);
        connection
            .inner
            .writer
            .lock()
            .queue
            .push_back(Bytes::from(request));
        connection.inner.outbound_ready.notify_one();
        Ok(connection)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.status.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// The negotiated sub-protocol.
    pub fn protocol(&self) -> Option<String> {
        self.inner.status.lock().protocol.clone()
    }

    /// Names of the negotiated extensions, in pipeline order.
    pub fn extensions(&self) -> Vec<String> {
        self.inner.pipeline.lock().names()
    }

    /// Status code of the Close frame received from the peer.
    ///
    /// `None` after closure means the peer never sent one.
    pub fn close_code(&self) -> Option<u16> {
        self.inner.status.lock().close_code
    }

    /// Reason bytes of the Close frame received from the peer.
    pub fn close_reason(&self) -> Vec<u8> {
        self.inner.status.lock().close_reason.clone()
    }

    pub fn is_local_closed(&self) -> bool {
        self.inner.status.lock().local_closed
    }

    pub fn is_remote_closed(&self) -> bool {
        self.inner.status.lock().remote_closed
    }

    /// Take the event queue. Only the first call returns it.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<Event>> {
        self.inner.receiver.lock().take()
    }

    /// Notified whenever bytes are queued for [`get`](Self::get).
    pub fn outbound_ready(&self) -> &Notify {
        &self.inner.outbound_ready
    }

    // ------------------------------------------------------------------
    // Transport boundary
    // ------------------------------------------------------------------

    /// Feed bytes received from the peer.
    ///
    /// While handshaking the bytes go to the handshake; anything after the
    /// header terminator is treated as frame data. Every frame that
    /// completes is dispatched before the next byte is read. Input after
    /// the peer's Close is ignored.
    ///
    /// Returns the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Any handshake or decode error. Input and output are closed before it
    /// is returned.
    pub fn add(&self, data: &[u8]) -> Result<usize> {
        let mut reader = self.inner.reader.lock();

        if self.state() == ConnectionState::Closed {
            tracing::trace!(role = %self.inner.role, len = data.len(), "ignoring input on closed connection");
            return Ok(data.len());
        }

        let mut consumed = 0;
        if let Some(handshake) = reader.handshake.as_mut() {
            match handshake.add(data) {
                Ok(None) => return Ok(data.len()),
                Ok(Some(outcome)) => {
                    consumed = outcome.consumed;
                    reader.handshake = None;
                    self.open(outcome);
                }
                Err(e) => {
                    self.fail(&mut reader, &e);
                    return Err(e);
                }
            }
        }

        while consumed < data.len() {
            if !self.state().can_receive() {
                tracing::trace!(
                    role = %self.inner.role,
                    len = data.len() - consumed,
                    "ignoring input after remote close"
                );
                consumed = data.len();
                break;
            }

            let (n, frame) = match reader.accumulator.push(&data[consumed..]) {
                Ok(step) => step,
                Err(e) => {
                    self.fail(&mut reader, &e);
                    return Err(e);
                }
            };
            consumed += n;

            if let Some(frame) = frame {
                if let Err(e) = self.dispatch(&mut reader, frame) {
                    self.fail(&mut reader, &e);
                    return Err(e);
                }
            }
        }

        if self.state() == ConnectionState::Closed {
            reader.release();
        }
        Ok(consumed)
    }

    /// Drain the bytes ready for transmission, in order.
    pub fn get(&self) -> Vec<Bytes> {
        self.inner.writer.lock().queue.drain(..).collect()
    }

    /// Whether [`get`](Self::get) would return anything.
    pub fn has_pending_output(&self) -> bool {
        !self.inner.writer.lock().queue.is_empty()
    }

    /// Tell the connection its transport stopped delivering input.
    ///
    /// Unless the connection is already closed, this arms the close
    /// deadline so it cannot linger half-open.
    pub fn input_ended(&self) {
        let mut status = self.inner.status.lock();
        if status.state == ConnectionState::Closed || status.close_timer.is_some() {
            return;
        }
        tracing::debug!(role = %self.inner.role, state = %status.state, "transport input ended");
        status.close_timer = self.arm_close_timer();
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Send a text message.
    ///
    /// The text is split on character boundaries into fragments of
    /// `max_frame_size / 3` UTF-16 units, so no fragment can exceed
    /// `max_frame_size` bytes.
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionClosed` if the connection is not open
    /// - `Error::FrameTooLarge` if an extension grows a fragment past the limit
    /// - `Error::Extension` if an extension fails
    pub fn send_text(&self, text: &str) -> Result<()> {
        let units = self.inner.config.limits.max_frame_size / 3;
        self.send_frames(TextFragmenter::new(text, units))
    }

    /// Send a binary message in fragments of at most `max_frame_size` bytes.
    ///
    /// # Errors
    ///
    /// Same as [`send_text`](Self::send_text).
    pub fn send_binary(&self, data: &[u8]) -> Result<()> {
        let size = self.inner.config.limits.max_frame_size;
        self.send_frames(MessageFragmenter::new(data, OpCode::Binary, size))
    }

    /// Send a message of either kind.
    ///
    /// # Errors
    ///
    /// Same as [`send_text`](Self::send_text).
    pub fn send(&self, message: &Message) -> Result<()> {
        match message {
            Message::Text(text) => self.send_text(text),
            Message::Binary(data) => self.send_binary(data),
        }
    }

    fn send_frames(&self, frames: impl Iterator<Item = Frame>) -> Result<()> {
        let mut writer = self.inner.writer.lock();
        self.ensure_open()?;

        // Encode everything first so a failure leaves no partial message queued.
        let encoded = frames
            .map(|frame| self.encode(&mut writer, frame))
            .collect::<Result<Vec<_>>>()?;
        tracing::trace!(role = %self.inner.role, frames = encoded.len(), "message queued");
        writer.queue.extend(encoded);
        drop(writer);

        self.inner.outbound_ready.notify_one();
        Ok(())
    }

    /// Send an unsolicited pong.
    ///
    /// # Errors
    ///
    /// - `Error::ControlFrameTooLarge` if `data` exceeds 125 bytes
    /// - `Error::ConnectionClosed` if the connection is not open
    pub fn pong(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send_control(OpCode::Pong, data.into())
    }

    /// Send a ping and wait for the pong carrying the same payload.
    ///
    /// Concurrent calls on one connection run one after another. Returns
    /// `None` if no matching pong arrives within the control timeout or the
    /// connection closes first.
    ///
    /// # Errors
    ///
    /// - `Error::ControlFrameTooLarge` if `data` exceeds 125 bytes
    /// - `Error::ConnectionClosed` if the connection is not open
    pub async fn ping(&self, data: impl Into<Vec<u8>>) -> Result<Option<Vec<u8>>> {
        let data = data.into();
        let _serial = self.inner.ping_serial.lock().await;

        let (reply, pong) = oneshot::channel();
        *self.inner.pong_waiter.lock() = Some(PongWaiter {
            payload: data.clone(),
            reply,
        });

        if let Err(e) = self.send_control(OpCode::Ping, data) {
            self.inner.pong_waiter.lock().take();
            return Err(e);
        }

        match tokio::time::timeout(self.inner.config.timeouts.control, pong).await {
            Ok(Ok(payload)) => Ok(Some(payload)),
            Ok(Err(_)) => Ok(None),
            Err(_) => {
                self.inner.pong_waiter.lock().take();
                tracing::debug!(role = %self.inner.role, "ping timed out");
                Ok(None)
            }
        }
    }

    /// Send a ping without waiting.
    ///
    /// Only one asynchronous ping may be outstanding; it is cleared by any
    /// pong or after the control timeout. Returns `false` if the ping was
    /// suppressed because another is in flight.
    ///
    /// # Errors
    ///
    /// - `Error::ControlFrameTooLarge` if `data` exceeds 125 bytes
    /// - `Error::ConnectionClosed` if the connection is not open
    pub fn ping_async(&self, data: impl Into<Vec<u8>>) -> Result<bool> {
        if self
            .inner
            .ping_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::trace!(role = %self.inner.role, "ping suppressed, one is in flight");
            return Ok(false);
        }
        let generation = self.inner.ping_generation.fetch_add(1, Ordering::AcqRel) + 1;

        if let Err(e) = self.send_control(OpCode::Ping, data.into()) {
            self.inner.ping_in_flight.store(false, Ordering::Release);
            return Err(e);
        }

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let inner = Arc::downgrade(&self.inner);
            let timeout = self.inner.config.timeouts.control;
            handle.spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(inner) = inner.upgrade() {
                    if inner.ping_generation.load(Ordering::Acquire) == generation {
                        inner.ping_in_flight.store(false, Ordering::Release);
                    }
                }
            });
        }
        Ok(true)
    }

    /// Start the close handshake.
    ///
    /// The reason is truncated to 123 bytes. Calling this again after the
    /// local Close went out does nothing. If the peer already closed, the
    /// transport is closed right away; otherwise a deadline forces it
    /// closed if the peer never answers.
    ///
    /// # Errors
    ///
    /// - `Error::ProtocolViolation` if `code` is reserved or outside the
    ///   ranges RFC 6455 allows on the wire
    /// - `Error::Extension` if an extension fails to prepare the Close payload
    pub fn close(&self, code: CloseCode, reason: impl AsRef<[u8]>) -> Result<()> {
        if !code.is_sendable() {
            return Err(Error::ProtocolViolation(format!(
                "close code {} cannot be sent",
                code.as_u16()
            )));
        }

        let mut writer = self.inner.writer.lock();
        {
            let mut status = self.inner.status.lock();
            if status.local_closed || status.state == ConnectionState::Closed {
                return Ok(());
            }
            if status.state == ConnectionState::Handshaking {
                // A queued upgrade request must not go out after the close.
                writer.queue.clear();
                let closed = self.enter_closed(&mut status);
                drop(status);
                drop(writer);
                if closed {
                    self.inner.transport.close_connection();
                }
                self.release_if_closed();
                return Ok(());
            }
        }

        let payload = CloseFrame::new(code, reason.as_ref()).to_payload();
        self.write_frame(&mut writer, Frame::close(payload))?;
        {
            let mut status = self.inner.status.lock();
            status.local_closed = true;
            if !status.remote_closed {
                status.state = ConnectionState::LocalClosePending;
            }
        }
        drop(writer);
        self.inner.outbound_ready.notify_one();
        tracing::debug!(role = %self.inner.role, code = code.as_u16(), "close frame queued");

        self.settle_close();
        self.release_if_closed();
        Ok(())
    }

    fn send_control(&self, opcode: OpCode, data: Vec<u8>) -> Result<()> {
        if data.len() > MAX_CONTROL_FRAME_PAYLOAD {
            return Err(Error::ControlFrameTooLarge(data.len()));
        }
        let mut writer = self.inner.writer.lock();
        self.ensure_open()?;
        self.write_frame(&mut writer, Frame::new(true, opcode, data))?;
        drop(writer);
        self.inner.outbound_ready.notify_one();
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        let status = self.inner.status.lock();
        if status.state == ConnectionState::Open {
            Ok(())
        } else {
            Err(Error::ConnectionClosed(status.close_code))
        }
    }

    fn write_frame(&self, writer: &mut Writer, frame: Frame) -> Result<()> {
        let bytes = self.encode(writer, frame)?;
        writer.queue.push_back(bytes);
        Ok(())
    }

    /// Run the pipeline over one outgoing frame and encode it.
    fn encode(&self, writer: &mut Writer, mut frame: Frame) -> Result<Bytes> {
        let data = frame.take_payload();
        let mut data = self.inner.pipeline.lock().prepare(&mut frame, data)?;

        if frame.opcode.is_control() {
            if data.len() > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(data.len()));
            }
        } else {
            self.inner.config.limits.check_frame_size(data.len() as u64)?;
        }

        let mask = self.inner.role.must_mask().then(|| writer.masks.next_mask());
        let mut out = BytesMut::with_capacity(data.len() + 14);
        encode_frame(&frame.head(mask.is_some()), mask, &mut data, false, &mut out);
        Ok(out.freeze())
    }

    // ------------------------------------------------------------------
    // Receiving
    // ------------------------------------------------------------------

    fn open(&self, outcome: HandshakeOutcome) {
        let HandshakeOutcome {
            protocol,
            pipeline,
            reply,
            ..
        } = outcome;

        if let Some(reply) = reply {
            self.inner
                .writer
                .lock()
                .queue
                .push_back(Bytes::from(reply));
            self.inner.outbound_ready.notify_one();
        }
        *self.inner.pipeline.lock() = pipeline;

        let mut status = self.inner.status.lock();
        status.state = ConnectionState::Open;
        status.protocol = protocol;
        tracing::debug!(role = %self.inner.role, protocol = ?status.protocol, "connection open");
    }

    fn dispatch(&self, reader: &mut Reader, mut frame: Frame) -> Result<()> {
        if !self.inner.config.accept_unmasked_frames {
            match (frame.mask.is_some(), self.inner.role.expects_masked()) {
                (false, true) => return Err(Error::MissingMask),
                (true, false) => return Err(Error::UnexpectedMask),
                _ => {}
            }
        }
        frame.validate()?;
        tracing::trace!(
            role = %self.inner.role,
            opcode = %frame.opcode,
            fin = frame.fin,
            len = frame.payload().len(),
            "frame received"
        );

        match frame.opcode {
            OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                let data = self.restore(&mut frame)?;
                frame.set_payload(data);
                if let Some(message) = reader.assembler.push(frame)? {
                    self.emit(Event::Message(message));
                }
                Ok(())
            }
            OpCode::Ping => {
                let data = self.restore(&mut frame)?;
                self.auto_pong(data)
            }
            OpCode::Pong => {
                let data = self.restore(&mut frame)?;
                self.deliver_pong(data);
                Ok(())
            }
            OpCode::Close => {
                let data = self.restore(&mut frame)?;
                self.remote_close(&data)
            }
            OpCode::Reserved(_) => {
                if self.inner.pipeline.lock().handle_extension_frame(&frame)? {
                    Ok(())
                } else {
                    Err(Error::ProtocolViolation(format!(
                        "no extension handles opcode {}",
                        frame.opcode
                    )))
                }
            }
        }
    }

    fn restore(&self, frame: &mut Frame) -> Result<Vec<u8>> {
        let data = frame.take_payload();
        self.inner.pipeline.lock().restore(frame, data)
    }

    fn emit(&self, event: Event) {
        if let Some(events) = &self.inner.status.lock().events {
            // A dropped receiver just means nobody is listening.
            let _ = events.send(event);
        }
    }

    fn auto_pong(&self, data: Vec<u8>) -> Result<()> {
        let mut writer = self.inner.writer.lock();
        if !self.state().can_send() {
            return Ok(());
        }
        self.write_frame(&mut writer, Frame::pong(data))?;
        drop(writer);
        self.inner.outbound_ready.notify_one();
        Ok(())
    }

    fn deliver_pong(&self, data: Vec<u8>) {
        {
            let mut waiter = self.inner.pong_waiter.lock();
            if waiter.as_ref().is_some_and(|w| w.payload == data) {
                if let Some(w) = waiter.take() {
                    let _ = w.reply.send(data.clone());
                }
            }
        }
        self.inner.ping_in_flight.store(false, Ordering::Release);
        self.emit(Event::Pong(data));
    }

    fn remote_close(&self, payload: &[u8]) -> Result<()> {
        let close = CloseFrame::from_payload(payload);
        let mut writer = self.inner.writer.lock();

        let echo = {
            let mut status = self.inner.status.lock();
            if status.remote_closed {
                return Ok(());
            }
            status.remote_closed = true;
            if let Some(ref close) = close {
                status.close_code = Some(close.code.as_u16());
                status.close_reason = close.reason.clone();
            }
            if !status.local_closed {
                status.state = ConnectionState::RemoteClosePending;
            }
            !status.local_closed
        };
        tracing::debug!(
            role = %self.inner.role,
            code = ?close.as_ref().map(|c| c.code.as_u16()),
            reason = ?close.as_ref().map(CloseFrame::reason_text),
            "close frame received"
        );

        if echo {
            // Codes that may not appear on the wire are answered without a status.
            let payload = close
                .as_ref()
                .filter(|c| c.code.is_sendable())
                .map(|c| CloseFrame::new(c.code, Vec::new()).to_payload())
                .unwrap_or_default();
            match self.write_frame(&mut writer, Frame::close(payload)) {
                Ok(()) => self.inner.status.lock().local_closed = true,
                Err(e) => {
                    tracing::warn!(role = %self.inner.role, error = %e, "failed to echo close frame");
                }
            }
        }
        drop(writer);
        self.inner.outbound_ready.notify_one();

        self.settle_close();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Closing
    // ------------------------------------------------------------------

    /// Close the transport once both sides closed, or arm the deadline if
    /// only one has.
    fn settle_close(&self) {
        let mut status = self.inner.status.lock();
        if status.local_closed && status.remote_closed {
            let closed = self.enter_closed(&mut status);
            drop(status);
            if closed {
                self.inner.transport.close_connection();
            }
        } else if status.state != ConnectionState::Closed && status.close_timer.is_none() {
            status.close_timer = self.arm_close_timer();
        }
    }

    fn arm_close_timer(&self) -> Option<CancellationToken> {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(role = %self.inner.role, "no tokio runtime, close deadline not armed");
            return None;
        };

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let inner = Arc::downgrade(&self.inner);
        let timeout = self.inner.config.timeouts.close;
        handle.spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if let Some(inner) = inner.upgrade() {
                        Connection { inner }.force_close();
                    }
                }
            }
        });
        Some(token)
    }

    fn force_close(&self) {
        let mut status = self.inner.status.lock();
        if status.state == ConnectionState::Closed {
            return;
        }
        tracing::warn!(
            role = %self.inner.role,
            state = %status.state,
            "close handshake timed out, closing transport"
        );
        status.close_timer = None;
        let closed = self.enter_closed(&mut status);
        drop(status);
        if closed {
            self.inner.transport.close_connection();
        }
        self.release_if_closed();
    }

    fn fail(&self, reader: &mut Reader, error: &Error) {
        tracing::warn!(role = %self.inner.role, error = %error, "protocol error, closing input and output");
        reader.release();
        self.inner.transport.close_input();
        self.inner.transport.close_output();
        let mut status = self.inner.status.lock();
        self.enter_closed(&mut status);
    }

    /// Move to `Closed`. Returns false if already there.
    fn enter_closed(&self, status: &mut Status) -> bool {
        if status.state == ConnectionState::Closed {
            return false;
        }
        let previous = status.state;
        status.state = ConnectionState::Closed;
        if let Some(timer) = status.close_timer.take() {
            timer.cancel();
        }
        if let Some(events) = status.events.take() {
            let close = status
                .close_code
                .map(|code| CloseFrame::new(CloseCode::from_u16(code), status.close_reason.clone()));
            let _ = events.send(Event::Closed(close));
        }
        // Wakes a pending sync ping with `None`.
        self.inner.pong_waiter.lock().take();

        tracing::debug!(
            role = %self.inner.role,
            from = %previous,
            code = ?status.close_code,
            "connection closed"
        );
        true
    }

    /// Free the reader's buffers unless an `add` call holds them; that call
    /// frees them itself before returning.
    fn release_if_closed(&self) {
        if self.state() != ConnectionState::Closed {
            return;
        }
        if let Some(mut reader) = self.inner.reader.try_lock() {
            reader.release();
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.inner.role)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
