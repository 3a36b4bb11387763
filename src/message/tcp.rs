//! A transport over TCP sockets.
//!
//! Each rank binds a listener and knows every peer's address. A writer
//! thread owns a connect-on-first-use cache of outgoing streams; a reader
//! thread accepts incoming connections and polls them on a short read
//! timeout. Frames are length-prefixed and carry the sender's rank, since
//! receives are matched by (peer, tag):
//! `[payload len u64][source rank u64][tag u64][payload]`, little endian.

use super::transport::{Handle, Mailbox, Packet, Tag, Transport};
use crate::error::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const READ_TIMEOUT: Duration = Duration::from_micros(100);

fn read_into(stream: &mut TcpStream, buffer: &mut [u8]) {
    let mut cursor = 0;
    while cursor < buffer.len() {
        cursor += stream.read(&mut buffer[cursor..]).unwrap_or(0);
    }
}

fn read_u64(stream: &mut TcpStream) -> u64 {
    let mut buffer = [0; 8];
    read_into(stream, &mut buffer);
    u64::from_le_bytes(buffer)
}

/// If any bytes are immediately available, read a whole `u64`; otherwise
/// return `None`.
fn read_u64_non_blocking(stream: &mut TcpStream) -> Option<u64> {
    let mut buffer = [0; 8];
    let cursor = stream.read(&mut buffer).unwrap_or(0);
    if cursor == 0 {
        return None;
    }
    read_into(stream, &mut buffer[cursor..]);
    Some(u64::from_le_bytes(buffer))
}

fn read_frame(stream: &mut TcpStream) -> Option<Packet> {
    read_u64_non_blocking(stream).map(|len| {
        let from = read_u64(stream) as usize;
        let tag = read_u64(stream);
        let mut payload = vec![0; len as usize];
        read_into(stream, &mut payload);
        Packet { from, tag, payload }
    })
}

pub struct TcpTransport {
    rank: usize,
    peers: Vec<SocketAddr>,
    alive: Arc<AtomicBool>,
    send_s: Option<Sender<(SocketAddr, Vec<u8>)>>,
    inbox: Receiver<Packet>,
    send_thread: Option<thread::JoinHandle<()>>,
    recv_thread: Option<thread::JoinHandle<()>>,
    mailbox: Mailbox,
}

impl TcpTransport {
    /// Bind this rank's listener and start the I/O threads.
    pub fn new(rank: usize, peers: Vec<SocketAddr>) -> Result<Self> {
        let listener = TcpListener::bind(peers[rank])?;
        Self::from_listener(rank, peers, listener)
    }

    /// Start the I/O threads over an already bound listener. The listener
    /// is switched to non-blocking accepts.
    pub fn from_listener(
        rank: usize,
        peers: Vec<SocketAddr>,
        listener: TcpListener,
    ) -> Result<Self> {
        let (send_s, send_r): (Sender<(SocketAddr, Vec<u8>)>, _) = unbounded();
        let (recv_s, inbox) = unbounded();
        let alive = Arc::new(AtomicBool::new(true));
        let keep_receiving = alive.clone();

        let send_thread = thread::spawn(move || {
            let mut streams = HashMap::new();
            for (address, frame) in send_r {
                let stream = streams
                    .entry(address)
                    .or_insert_with(|| TcpStream::connect(address).unwrap());
                stream.write_all(&frame).unwrap();
            }
        });

        listener.set_nonblocking(true)?;
        let recv_thread = thread::spawn(move || {
            let mut streams = Vec::new();
            while keep_receiving.load(Ordering::Relaxed) {
                for stream in &mut streams {
                    if let Some(packet) = read_frame(stream) {
                        recv_s.send(packet).unwrap();
                    }
                }
                if let Ok((stream, _)) = listener.accept() {
                    stream.set_read_timeout(Some(READ_TIMEOUT)).unwrap();
                    streams.push(stream);
                }
            }
        });

        Ok(Self {
            rank,
            peers,
            alive,
            send_s: Some(send_s),
            inbox,
            send_thread: Some(send_thread),
            recv_thread: Some(recv_thread),
            mailbox: Mailbox::default(),
        })
    }

    fn pump(&mut self) {
        while let Ok(packet) = self.inbox.try_recv() {
            self.mailbox.deliver(packet);
        }
    }
}

impl Transport for TcpTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn post_send(&mut self, peer: usize, tag: Tag, payload: Vec<u8>) -> Result<Handle> {
        let mut frame = Vec::with_capacity(24 + payload.len());
        frame.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        frame.extend_from_slice(&(self.rank as u64).to_le_bytes());
        frame.extend_from_slice(&tag.wire().to_le_bytes());
        frame.extend_from_slice(&payload);
        self.send_s
            .as_ref()
            .unwrap()
            .send((self.peers[peer], frame))
            .unwrap();
        Ok(self.mailbox.post_send())
    }

    fn post_recv(&mut self, peer: usize, tag: Tag) -> Result<Handle> {
        self.pump();
        Ok(self.mailbox.post_recv(peer, tag.wire()))
    }

    fn poll(&mut self, handle: Handle) -> Result<bool> {
        self.pump();
        self.mailbox.poll(handle)
    }

    fn retire(&mut self, handle: Handle) -> Result<Vec<u8>> {
        self.mailbox.retire(handle)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.alive.swap(false, Ordering::Relaxed);
        self.send_s.take().unwrap();
        self.send_thread.take().unwrap().join().unwrap();
        self.recv_thread.take().unwrap().join().unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_network(size: usize) -> Vec<TcpTransport> {
        let listeners: Vec<_> = (0..size)
            .map(|_| TcpListener::bind("127.0.0.1:0").unwrap())
            .collect();
        let peers: Vec<SocketAddr> = listeners
            .iter()
            .map(|listener| listener.local_addr().unwrap())
            .collect();
        listeners
            .into_iter()
            .enumerate()
            .map(|(rank, listener)| {
                TcpTransport::from_listener(rank, peers.clone(), listener).unwrap()
            })
            .collect()
    }

    #[test]
    fn frames_cross_the_loopback() {
        let mut network = loopback_network(2);
        let mut b = network.remove(1);
        let mut a = network.remove(0);
        let recv = b.post_recv(0, Tag::Question).unwrap();
        a.post_send(1, Tag::Question, vec![7, 7, 7]).unwrap();
        assert_eq!(b.wait(recv).unwrap(), vec![7, 7, 7]);
    }

    #[test]
    fn tags_from_one_peer_are_demultiplexed() {
        let mut network = loopback_network(2);
        let mut b = network.remove(1);
        let mut a = network.remove(0);
        a.post_send(1, Tag::Answer, vec![2]).unwrap();
        a.post_send(1, Tag::Question, vec![1]).unwrap();
        let question = b.post_recv(0, Tag::Question).unwrap();
        let answer = b.post_recv(0, Tag::Answer).unwrap();
        assert_eq!(b.wait(question).unwrap(), vec![1]);
        assert_eq!(b.wait(answer).unwrap(), vec![2]);
    }
}
