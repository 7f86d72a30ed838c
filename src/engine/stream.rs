// src/engine/stream.rs

use crate::engine::SessionPort;
use crate::error::ZmqError;
use crate::message::Msg;
use crate::protocol::zmtp::greeting::{self, PeerGreeting, GREETING_SIZE, ZMTP_REVISION};
use crate::protocol::zmtp::{Decoder, Encoder, Framing, MsgSink, IN_BATCH_SIZE};
use crate::runtime::command::Oid;
use crate::runtime::poller::{Handle, Poller};
use crate::socket::options::SocketOptions;
use crate::socket::SocketType;

use bytes::BytesMut;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::unix::io::AsRawFd;

/// Drives one connected byte stream: the greeting exchange, then the frame
/// codecs between the descriptor and the session's pipe.
///
/// The engine lives inside its session. Every entry point takes the session's
/// side of the pipe as a [`SessionPort`]. Methods returning `false` report a
/// dead connection; the session then drops the engine and detaches.
pub(crate) struct StreamEngine {
  stream: TcpStream,
  handle: Option<Handle>,
  endpoint: String,
  socket_type: SocketType,
  identity_len: usize,
  maxmsgsize: i64,

  handshaking: bool,
  greeting: [u8; GREETING_SIZE],
  greeting_read: usize,
  revision_sent: bool,

  inbuf: Vec<u8>,
  inpos: usize,
  decoder: Option<Decoder>,
  // Decoder stalled on a full pipe when the connection died.
  input_error: bool,

  outbuf: BytesMut,
  outpos: usize,
  encoder: Option<Encoder>,

  // Set for PUB/XPUB facing a legacy peer, until the subscribe-all is injected.
  inject_subscription: bool,
}

impl StreamEngine {
  pub(crate) fn new(stream: TcpStream, options: &SocketOptions, endpoint: String) -> Result<Self, ZmqError> {
    stream.set_nonblocking(true)?;
    stream.set_nodelay(true)?;
    Ok(Self {
      stream,
      handle: None,
      endpoint,
      socket_type: options.socket_type,
      identity_len: options.identity.size(),
      maxmsgsize: options.maxmsgsize,
      handshaking: true,
      greeting: [0; GREETING_SIZE],
      greeting_read: 0,
      revision_sent: false,
      inbuf: Vec::new(),
      inpos: 0,
      decoder: None,
      input_error: false,
      outbuf: BytesMut::with_capacity(IN_BATCH_SIZE),
      outpos: 0,
      encoder: None,
      inject_subscription: false,
    })
  }

  pub(crate) fn fd(&self) -> i32 {
    self.stream.as_raw_fd()
  }

  pub(crate) fn endpoint(&self) -> &str {
    &self.endpoint
  }

  pub(crate) fn handle(&self) -> Option<Handle> {
    self.handle
  }

  /// Registers the descriptor under the session's `oid` and starts the
  /// greeting.
  pub(crate) fn plug<L: SessionPort>(&mut self, poller: &mut Poller, oid: Oid, link: &mut L) -> bool {
    let handle = match poller.add_fd(self.fd(), oid) {
      Ok(handle) => handle,
      Err(e) => {
        tracing::error!(endpoint = %self.endpoint, error = %e, "Failed to register engine descriptor");
        return false;
      }
    };
    self.handle = Some(handle);
    self.outbuf.extend_from_slice(&greeting::signature(self.identity_len));
    poller.set_pollin(handle);
    poller.set_pollout(handle);
    tracing::debug!(fd = self.fd(), endpoint = %self.endpoint, "Engine plugged");

    // Data may already be waiting.
    self.in_event(poller, link)
  }

  /// Deregisters the descriptor. The stream closes when the engine drops.
  pub(crate) fn unplug(&mut self, poller: &mut Poller) {
    if let Some(handle) = self.handle.take() {
      poller.rm_fd(handle);
    }
  }

  pub(crate) fn in_event<L: SessionPort>(&mut self, poller: &mut Poller, link: &mut L) -> bool {
    let Some(handle) = self.handle else {
      return true;
    };
    if self.handshaking {
      match self.handshake(poller, handle) {
        Ok(true) => {}
        Ok(false) => return true,
        Err(e) => {
          tracing::debug!(endpoint = %self.endpoint, error = %e, "Handshake failed");
          return false;
        }
      }
    }

    let mut disconnection = false;
    if self.inpos == self.inbuf.len() {
      self.inbuf.resize(IN_BATCH_SIZE, 0);
      self.inpos = 0;
      match (&self.stream).read(&mut self.inbuf) {
        Ok(0) => {
          self.inbuf.clear();
          disconnection = true;
        }
        Ok(n) => self.inbuf.truncate(n),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
          self.inbuf.clear();
          poller.clear_in_ready(handle);
        }
        Err(e) if e.kind() == io::ErrorKind::Interrupted => self.inbuf.clear(),
        Err(e) => {
          tracing::debug!(endpoint = %self.endpoint, error = %e, "Engine read failed");
          self.inbuf.clear();
          disconnection = true;
        }
      }
    }

    let Some(decoder) = self.decoder.as_mut() else {
      return false;
    };
    let input = &self.inbuf[self.inpos..];
    let result = if self.inject_subscription {
      let mut sink = InjectSubscription {
        link: &mut *link,
        pending: &mut self.inject_subscription,
      };
      decoder.process_buffer(input, &mut sink)
    } else {
      decoder.process_buffer(input, link)
    };
    match result {
      Ok(processed) => {
        // Stuck on a full pipe: wait for activate_in.
        if processed < input.len() {
          poller.reset_pollin(handle);
        }
        self.inpos += processed;
      }
      Err(e) => {
        tracing::debug!(endpoint = %self.endpoint, error = %e, "Engine decoding failed");
        disconnection = true;
      }
    }

    link.flush();

    if disconnection {
      // The last decoded message is still waiting for room; deliver it
      // before tearing down.
      if decoder.stalled() {
        poller.rm_fd(handle);
        self.handle = None;
        self.input_error = true;
        return true;
      }
      return false;
    }
    true
  }

  pub(crate) fn out_event<L: SessionPort>(&mut self, poller: &mut Poller, link: &mut L) {
    let Some(handle) = self.handle else {
      return;
    };
    if self.outpos == self.outbuf.len() {
      self.outbuf.clear();
      self.outpos = 0;
      if let Some(encoder) = self.encoder.as_mut() {
        encoder.encode(link, &mut self.outbuf);
      }
      if self.outbuf.is_empty() {
        poller.reset_pollout(handle);
        return;
      }
    }

    match (&self.stream).write(&self.outbuf[self.outpos..]) {
      Ok(n) => self.outpos += n,
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => poller.clear_out_ready(handle),
      Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
      Err(e) => {
        // Termination waits for the read side so inbound data is not lost.
        tracing::debug!(endpoint = %self.endpoint, error = %e, "Engine write failed");
        poller.reset_pollout(handle);
        return;
      }
    }

    if self.handshaking && self.outpos == self.outbuf.len() {
      poller.reset_pollout(handle);
    }
  }

  /// The pipe has messages to send again.
  pub(crate) fn activate_out<L: SessionPort>(&mut self, poller: &mut Poller, link: &mut L) {
    let Some(handle) = self.handle else {
      return;
    };
    poller.set_pollout(handle);
    // Speculative write; the socket is most likely writable.
    self.out_event(poller, link);
  }

  /// The pipe has room again.
  pub(crate) fn activate_in<L: SessionPort>(&mut self, poller: &mut Poller, link: &mut L) -> bool {
    if self.input_error {
      // Flush the message that was stuck, then report the dead connection.
      if let Some(decoder) = self.decoder.as_mut() {
        if decoder.process_buffer(&[], link).is_err() {
          return false;
        }
        link.flush();
        if decoder.stalled() {
          return true;
        }
      }
      return false;
    }
    let Some(handle) = self.handle else {
      return true;
    };
    poller.set_pollin(handle);
    self.in_event(poller, link)
  }

  /// Reads the peer's greeting. Ok(true) once message flow can start.
  fn handshake(&mut self, poller: &mut Poller, handle: Handle) -> Result<bool, ZmqError> {
    let mut outcome = greeting::classify(&self.greeting[..self.greeting_read]);
    while !matches!(outcome, PeerGreeting::Done(_)) {
      let n = match (&self.stream).read(&mut self.greeting[self.greeting_read..]) {
        Ok(0) => return Err(ZmqError::ConnectionClosed),
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
          poller.clear_in_ready(handle);
          return Ok(false);
        }
        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(e) => return Err(e.into()),
      };
      self.greeting_read += n;
      outcome = greeting::classify(&self.greeting[..self.greeting_read]);

      if outcome == PeerGreeting::Versioned && !self.revision_sent {
        // The rest of our greeting goes out only to versioned peers.
        if self.outpos == self.outbuf.len() {
          poller.set_pollout(handle);
        }
        self.outbuf.extend_from_slice(&[ZMTP_REVISION, self.socket_type as u8]);
        self.revision_sent = true;
      }
    }

    let received = &self.greeting[..self.greeting_read];
    if greeting::is_legacy_peer(received) {
      tracing::debug!(endpoint = %self.endpoint, "Peer speaks the legacy protocol");
      self.encoder = Some(Encoder::after_signature());
      self.decoder = Some(Decoder::new(Framing::Legacy, self.maxmsgsize));
      // What we read so far is the start of the peer's identity frame.
      self.inbuf = received.to_vec();
      self.inpos = 0;
      // Legacy subscribers never forward subscriptions.
      self.inject_subscription = matches!(self.socket_type, SocketType::Pub | SocketType::XPub);
    } else {
      let framing = match outcome {
        PeerGreeting::Done(framing) => framing,
        _ => Framing::V1,
      };
      tracing::debug!(endpoint = %self.endpoint, ?framing, "Handshake complete");
      self.encoder = Some(Encoder::new(framing));
      self.decoder = Some(Decoder::new(framing, self.maxmsgsize));
    }

    if self.outpos == self.outbuf.len() {
      poller.set_pollout(handle);
    }
    self.handshaking = false;
    Ok(true)
  }
}

impl fmt::Debug for StreamEngine {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StreamEngine")
      .field("fd", &self.fd())
      .field("endpoint", &self.endpoint)
      .field("handshaking", &self.handshaking)
      .field("input_error", &self.input_error)
      .finish_non_exhaustive()
  }
}

/// Passes decoded messages to the session and slips a subscribe-all message
/// in right after the peer's identity.
struct InjectSubscription<'a, L> {
  link: &'a mut L,
  pending: &'a mut bool,
}

impl<L: SessionPort> MsgSink for InjectSubscription<'_, L> {
  fn push_msg(&mut self, msg: Msg) -> Result<(), ZmqError> {
    self.link.push_msg(msg)?;
    if *self.pending {
      *self.pending = false;
      if let Err(e) = self.link.push_msg(Msg::from_static(&[1])) {
        tracing::debug!(error = %e, "Could not inject subscription for legacy peer");
      }
    }
    Ok(())
  }
}
