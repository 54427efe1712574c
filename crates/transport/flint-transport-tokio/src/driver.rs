use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use socket2::SockRef;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, lookup_host};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};

const READ_CHUNK: usize = 4096;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// 连接句柄发往驱动任务的指令，按发送顺序执行。
#[derive(Debug)]
pub enum Command {
    Write(Bytes),
    Shutdown,
    NoDelay(bool),
    /// `abort` 为真时以 `SO_LINGER(0)` 关闭并发送 RST。
    Close { abort: bool },
}

/// 驱动任务回报给连接句柄的事件，由 `tick()`/`read()` 依序应用。
#[derive(Debug)]
pub enum DriverEvent {
    Connected { local: SocketAddr, peer: SocketAddr },
    Data(Bytes),
    /// 一次 `Write` 已完整交给内核。
    Sent(usize),
    Eof,
    Failed(io::Error),
}

pub(crate) enum Target {
    Addr(SocketAddr),
    Host(String, u16),
}

/// 建连后立即应用到流上的选项。
#[derive(Clone, Copy, Debug)]
pub(crate) struct StreamOptions {
    pub(crate) no_delay: bool,
    pub(crate) linger: Option<Duration>,
}

impl StreamOptions {
    pub(crate) fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.no_delay)?;
        if self.linger.is_some() {
            SockRef::from(stream).set_linger(self.linger)?;
        }
        Ok(())
    }
}

pub(crate) type AcceptQueue = Arc<Mutex<VecDeque<(TcpStream, SocketAddr)>>>;

enum Exit {
    Graceful,
    Abort,
}

/// 主动连接的驱动任务：解析、建连，随后进入与被动连接相同的读写循环。
///
/// 建连期间收到任何指令（或句柄被丢弃）都视为取消。
pub(crate) async fn connect(
    target: Target,
    options: StreamOptions,
    mut commands: UnboundedReceiver<Command>,
    events: UnboundedSender<DriverEvent>,
) {
    let stream = tokio::select! {
        opened = open(target) => match opened {
            Ok(stream) => stream,
            Err(error) => {
                debug!(%error, "connect failed");
                let _ = events.send(DriverEvent::Failed(error));
                return;
            }
        },
        _ = commands.recv() => {
            trace!("connect cancelled");
            return;
        }
    };

    if let Err(error) = options.apply(&stream) {
        debug!(%error, "cannot apply stream options");
    }
    match (stream.local_addr(), stream.peer_addr()) {
        (Ok(local), Ok(peer)) => {
            let _ = events.send(DriverEvent::Connected { local, peer });
        }
        (Err(error), _) | (_, Err(error)) => {
            let _ = events.send(DriverEvent::Failed(error));
            return;
        }
    }
    run(stream, commands, events).await;
}

async fn open(target: Target) -> io::Result<TcpStream> {
    match target {
        Target::Addr(addr) => TcpStream::connect(addr).await,
        Target::Host(host, port) => {
            let mut last = io::Error::new(
                io::ErrorKind::NotFound,
                format!("no IPv4 address found for {host}"),
            );
            for addr in lookup_host((host.as_str(), port)).await? {
                if !addr.is_ipv4() {
                    continue;
                }
                debug!(%host, %addr, "dns lookup successful");
                match TcpStream::connect(addr).await {
                    Ok(stream) => return Ok(stream),
                    Err(error) => last = error,
                }
            }
            Err(last)
        }
    }
}

/// 已建立连接的驱动：读取在独立任务中进行，写入与控制指令在当前任务中串行执行。
pub(crate) async fn run(
    stream: TcpStream,
    mut commands: UnboundedReceiver<Command>,
    events: UnboundedSender<DriverEvent>,
) {
    let (reader, mut writer) = stream.into_split();
    let reading = tokio::spawn(read_loop(reader, events.clone()));

    match write_loop(&mut writer, &mut commands, &events).await {
        Exit::Graceful => {
            if let Err(error) = writer.shutdown().await {
                debug!(%error, "write shutdown failed on close");
            }
        }
        Exit::Abort => {
            let stream: &TcpStream = writer.as_ref();
            if let Err(error) = SockRef::from(stream).set_linger(Some(Duration::ZERO)) {
                debug!(%error, "cannot arm reset on abort");
            }
            reading.abort();
        }
    }
}

async fn read_loop(mut reader: OwnedReadHalf, events: UnboundedSender<DriverEvent>) {
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    loop {
        buf.reserve(READ_CHUNK);
        match reader.read_buf(&mut buf).await {
            Ok(0) => {
                trace!("end of stream");
                let _ = events.send(DriverEvent::Eof);
                return;
            }
            Ok(len) => {
                trace!(len, "received");
                if events.send(DriverEvent::Data(buf.split().freeze())).is_err() {
                    return;
                }
            }
            Err(error) => {
                debug!(%error, "read failed");
                let _ = events.send(DriverEvent::Failed(error));
                return;
            }
        }
    }
}

async fn write_loop(
    writer: &mut OwnedWriteHalf,
    commands: &mut UnboundedReceiver<Command>,
    events: &UnboundedSender<DriverEvent>,
) -> Exit {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Write(data) => {
                if let Err(error) = writer.write_all(&data).await {
                    debug!(%error, len = data.len(), "write failed");
                    let _ = events.send(DriverEvent::Failed(error));
                    return Exit::Abort;
                }
                let _ = events.send(DriverEvent::Sent(data.len()));
            }
            Command::Shutdown => {
                if let Err(error) = writer.shutdown().await {
                    debug!(%error, "write shutdown failed");
                }
            }
            Command::NoDelay(no_delay) => {
                let stream: &TcpStream = writer.as_ref();
                if let Err(error) = stream.set_nodelay(no_delay) {
                    debug!(%error, "cannot toggle TCP_NODELAY");
                }
            }
            Command::Close { abort } => {
                return if abort { Exit::Abort } else { Exit::Graceful };
            }
        }
    }
    // 句柄被丢弃而未关闭：按中止处理。
    Exit::Abort
}

/// 监听驱动：持续接受入站连接并按到达顺序放入待接受队列。
pub(crate) async fn accept_loop(listener: TcpListener, queue: AcceptQueue) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "accepted");
                queue.lock().push_back((stream, peer));
            }
            Err(error) => {
                debug!(%error, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}
