//! NFQUEUE over a raw nfnetlink socket
//!
//! Talks to the kernel's `nfnetlink_queue` subsystem directly, without
//! libnetfilter_queue.

use crate::error::{PlatformError, Result};
use crate::netlink::{self, ConfigCommand, Incoming};
use crate::traits::{AddressFamily, PacketQueue, QueueMessage, QueueParams, VerdictCode};
use parking_lot::{Mutex, RwLock};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::VecDeque;
use std::io;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

const NETLINK_NETFILTER: i32 = 12;

/// Socket receive buffer requested from the kernel
const SOCKET_BUFFER_SIZE: usize = 1024 * 1024;

/// How long configuration requests wait for their acknowledgement
const ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Room for netlink and attribute headers around the copied packet
const MESSAGE_OVERHEAD: usize = 4096;

/// Kernel packet queue on a netlink socket
pub struct NetlinkQueue {
    /// `None` once closed
    socket: RwLock<Option<Socket>>,
    seq: AtomicU32,
    queue: Mutex<Option<u16>>,
    recv_buf_len: AtomicUsize,
    /// Packets that arrived in the same datagram as an earlier one, or
    /// while waiting for an acknowledgement
    backlog: Mutex<VecDeque<QueueMessage>>,
}

impl NetlinkQueue {
    /// Open and bind a netfilter netlink socket
    pub fn open() -> Result<Self> {
        let socket = Socket::new(
            Domain::from(libc::AF_NETLINK),
            Type::RAW,
            Some(Protocol::from(NETLINK_NETFILTER)),
        )
        .map_err(|e| match e.raw_os_error() {
            Some(libc::EPERM | libc::EACCES) => {
                PlatformError::PermissionDenied("open netlink socket".to_string())
            }
            Some(libc::EPROTONOSUPPORT | libc::EAFNOSUPPORT) => PlatformError::Unsupported(
                "nfnetlink is not available in this kernel".to_string(),
            ),
            _ => PlatformError::Io(e),
        })?;

        // SAFETY: sockaddr_nl is plain data, all-zero is a valid value
        let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;

        // SAFETY: addr outlives the call and the length matches its type
        let rc = unsafe {
            libc::bind(
                socket.as_raw_fd(),
                std::ptr::addr_of!(addr).cast::<libc::sockaddr>(),
                std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(PlatformError::Io(io::Error::last_os_error()));
        }

        if let Err(e) = socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE) {
            warn!(error = %e, "Could not enlarge netlink receive buffer");
        }
        socket.set_read_timeout(Some(ACK_TIMEOUT))?;

        debug!(fd = socket.as_raw_fd(), "Netlink socket opened");

        Ok(Self {
            socket: RwLock::new(Some(socket)),
            seq: AtomicU32::new(0),
            queue: Mutex::new(None),
            recv_buf_len: AtomicUsize::new(65535 + MESSAGE_OVERHEAD),
            backlog: Mutex::new(VecDeque::new()),
        })
    }

    fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    fn queue_num(&self) -> Result<u16> {
        (*self.queue.lock())
            .ok_or_else(|| PlatformError::invalid_state("issue verdict", "no queue"))
    }

    fn closed() -> PlatformError {
        PlatformError::invalid_state("use queue", "closed")
    }

    fn send(socket: &Socket, data: &[u8]) -> io::Result<()> {
        // SAFETY: sockaddr_nl is plain data, all-zero addresses the kernel
        let mut dst: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        dst.nl_family = libc::AF_NETLINK as libc::sa_family_t;

        // SAFETY: data and dst outlive the call
        let sent = unsafe {
            libc::sendto(
                socket.as_raw_fd(),
                data.as_ptr().cast::<libc::c_void>(),
                data.len(),
                0,
                std::ptr::addr_of!(dst).cast::<libc::sockaddr>(),
                std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if sent < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn recv_datagram(socket: &Socket, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: buf is valid for writes of buf.len() bytes
        let n = unsafe {
            libc::recv(
                socket.as_raw_fd(),
                buf.as_mut_ptr().cast::<libc::c_void>(),
                buf.len(),
                0,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n.unsigned_abs())
    }

    /// Send a configuration request and wait for its acknowledgement
    fn request(
        &self,
        operation: &'static str,
        message: &[u8],
        seq: u32,
        family: u16,
    ) -> Result<()> {
        let guard = self.socket.read();
        let socket = guard.as_ref().ok_or_else(Self::closed)?;
        let queue = (*self.queue.lock()).unwrap_or(0);

        Self::send(socket, message).map_err(|e| PlatformError::Netlink {
            operation,
            source: e,
        })?;

        let mut buf = vec![0u8; self.recv_buf_len.load(Ordering::Relaxed)];
        loop {
            let n = Self::recv_datagram(socket, &mut buf).map_err(|e| match e.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => PlatformError::Netlink {
                    operation,
                    source: io::Error::new(io::ErrorKind::TimedOut, "no acknowledgement"),
                },
                _ => PlatformError::Netlink {
                    operation,
                    source: e,
                },
            })?;

            let mut status = None;
            for message in netlink::parse_datagram(&buf[..n]) {
                match message {
                    Incoming::Status { seq: s, errno } if s == seq => status = Some(errno),
                    Incoming::Packet(packet) => self.backlog.lock().push_back(packet),
                    Incoming::Malformed(e) => {
                        warn!(error = %e, "Skipping malformed netlink message");
                    }
                    other => trace!(?other, "Ignoring message while waiting for ack"),
                }
            }

            match status {
                Some(0) => return Ok(()),
                Some(errno) => {
                    return Err(PlatformError::from_errno(operation, errno, queue, family))
                }
                None => {}
            }
        }
    }

    fn command(&self, command: ConfigCommand, family: u16, queue: u16) -> Result<()> {
        let seq = self.next_seq();
        let message = netlink::config_command(seq, command, family, queue);
        self.request(command.name(), &message, seq, family)
    }

    fn send_verdict(&self, id: u32, verdict: VerdictCode, data: Option<&[u8]>) -> Result<()> {
        let guard = self.socket.read();
        let socket = guard.as_ref().ok_or_else(Self::closed)?;
        let queue = self.queue_num()?;

        let message = netlink::verdict(self.next_seq(), queue, id, verdict, data)
            .map_err(|e| PlatformError::PayloadTooLarge { id, len: e.0 })?;
        Self::send(socket, &message).map_err(|e| PlatformError::Verdict {
            id,
            message: e.to_string(),
        })
    }
}

impl PacketQueue for NetlinkQueue {
    fn unbind(&self, family: AddressFamily) -> Result<()> {
        self.command(ConfigCommand::PfUnbind, family.raw(), 0)
    }

    fn bind(&self, family: AddressFamily) -> Result<()> {
        self.command(ConfigCommand::PfBind, family.raw(), 0)?;
        debug!(%family, "Protocol family bound");
        Ok(())
    }

    fn create_queue(&self, num: u16, params: &QueueParams) -> Result<()> {
        *self.queue.lock() = Some(num);

        let result = self.command(ConfigCommand::Bind, 0, num).and_then(|()| {
            let seq = self.next_seq();
            let message = netlink::config_params(seq, num, params.copy_range);
            self.request("set copy mode", &message, seq, 0)
        });
        if let Err(e) = result {
            *self.queue.lock() = None;
            return Err(e);
        }

        let seq = self.next_seq();
        let message = netlink::config_max_len(seq, num, params.max_len);
        if let Err(e) = self.request("set queue length", &message, seq, 0) {
            // Older kernels lack the attribute; the default length applies
            warn!(error = %e, "Could not set queue length");
        }

        self.recv_buf_len.store(
            params.copy_range as usize + MESSAGE_OVERHEAD,
            Ordering::Relaxed,
        );
        if let Some(socket) = self.socket.read().as_ref() {
            socket.set_read_timeout(Some(params.poll_interval))?;
        }

        info!(
            queue = num,
            copy_range = params.copy_range,
            max_len = params.max_len,
            "NFQUEUE created"
        );
        Ok(())
    }

    fn recv(&self) -> Result<Option<QueueMessage>> {
        if let Some(message) = self.backlog.lock().pop_front() {
            return Ok(Some(message));
        }

        let guard = self.socket.read();
        let socket = guard.as_ref().ok_or_else(Self::closed)?;

        let mut buf = vec![0u8; self.recv_buf_len.load(Ordering::Relaxed)];
        let n = match Self::recv_datagram(socket, &mut buf) {
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                return Ok(None)
            }
            Err(e) if e.raw_os_error() == Some(libc::ENOBUFS) => {
                warn!("Netlink receive buffer overrun, kernel dropped queue messages");
                return Ok(None);
            }
            Err(e) => return Err(PlatformError::Receive(e.to_string())),
        };

        let messages = netlink::parse_datagram(&buf[..n]);
        let mut packets = messages.into_iter().filter_map(|message| match message {
            Incoming::Packet(packet) => Some(packet),
            Incoming::Status { seq, errno } if errno != 0 => {
                warn!(
                    seq,
                    error = %io::Error::from_raw_os_error(errno),
                    "Kernel rejected a verdict"
                );
                None
            }
            Incoming::Malformed(e) => {
                warn!(error = %e, len = n, "Skipping malformed netlink message");
                None
            }
            Incoming::Status { .. } | Incoming::Other(_) => None,
        });

        let first = packets.next();
        let rest: Vec<_> = packets.collect();
        if !rest.is_empty() {
            self.backlog.lock().extend(rest);
        }
        Ok(first)
    }

    fn set_verdict(&self, id: u32, verdict: VerdictCode) -> Result<()> {
        self.send_verdict(id, verdict, None)
    }

    fn set_verdict_modified(&self, id: u32, verdict: VerdictCode, data: &[u8]) -> Result<()> {
        self.send_verdict(id, verdict, Some(data))
    }

    fn destroy_queue(&self) -> Result<()> {
        let Some(num) = *self.queue.lock() else {
            return Ok(());
        };
        self.command(ConfigCommand::Unbind, 0, num)?;
        *self.queue.lock() = None;
        info!(queue = num, "NFQUEUE destroyed");
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.socket.write().take().is_some() {
            debug!("Netlink socket closed");
        }
        Ok(())
    }
}

impl Drop for NetlinkQueue {
    fn drop(&mut self) {
        if self.queue.lock().is_some() && self.socket.read().is_some() {
            if let Err(e) = self.destroy_queue() {
                debug!(error = %e, "Failed to unbind queue on drop");
            }
        }
    }
}

impl std::fmt::Debug for NetlinkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetlinkQueue")
            .field("open", &self.socket.read().is_some())
            .field("queue", &*self.queue.lock())
            .field("backlog", &self.backlog.lock().len())
            .finish()
    }
}
