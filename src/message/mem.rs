//! An in-process transport over crossbeam channels.
//!
//! Every rank owns one unbounded inbox; every rank holds a sender to every
//! inbox. Sends complete at post time (the channel buffers), receives
//! complete once a matching packet has been pumped out of the inbox by a
//! `poll` call. Useful for the thread-per-rank deployment and for tests.

use super::transport::{Handle, Mailbox, Packet, Tag, Transport};
use crate::error::{Error, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};

pub struct ChannelTransport {
    rank: usize,
    outboxes: Vec<Sender<Packet>>,
    inbox: Receiver<Packet>,
    mailbox: Mailbox,
}

/// Build a fully connected network of `size` ranks.
pub fn channel_network(size: usize) -> Vec<ChannelTransport> {
    let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded()).unzip();
    receivers
        .into_iter()
        .enumerate()
        .map(|(rank, inbox)| ChannelTransport {
            rank,
            outboxes: senders.clone(),
            inbox,
            mailbox: Mailbox::default(),
        })
        .collect()
}

impl ChannelTransport {
    fn pump(&mut self) {
        while let Ok(packet) = self.inbox.try_recv() {
            self.mailbox.deliver(packet);
        }
    }
}

impl Transport for ChannelTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.outboxes.len()
    }

    fn post_send(&mut self, peer: usize, tag: Tag, payload: Vec<u8>) -> Result<Handle> {
        self.outboxes[peer]
            .send(Packet {
                from: self.rank,
                tag: tag.wire(),
                payload,
            })
            .map_err(|_| Error::Transport(format!("rank {} is gone", peer)))?;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_completes_at_post_time() {
        let mut network = channel_network(2);
        let mut a = network.remove(0);
        let send = a.post_send(1, Tag::Question, vec![1]).unwrap();
        assert!(a.poll(send).unwrap());
        assert!(a.retire(send).unwrap().is_empty());
    }

    #[test]
    fn receive_completes_after_matching_send() {
        let mut network = channel_network(2);
        let mut b = network.remove(1);
        let mut a = network.remove(0);
        let recv = b.post_recv(0, Tag::Question).unwrap();
        assert!(!b.poll(recv).unwrap());
        a.post_send(1, Tag::Question, vec![42]).unwrap();
        while !b.poll(recv).unwrap() {}
        assert_eq!(b.retire(recv).unwrap(), vec![42]);
    }

    #[test]
    fn same_tag_messages_arrive_in_send_order() {
        let mut network = channel_network(2);
        let mut b = network.remove(1);
        let mut a = network.remove(0);
        for value in [1u8, 2, 3] {
            a.post_send(1, Tag::Answer, vec![value]).unwrap();
        }
        for value in [1u8, 2, 3] {
            let recv = b.post_recv(0, Tag::Answer).unwrap();
            assert_eq!(b.wait(recv).unwrap(), vec![value]);
        }
    }

    #[test]
    fn peers_are_distinguished() {
        let mut network = channel_network(3);
        let mut c = network.remove(2);
        let mut b = network.remove(1);
        let mut a = network.remove(0);
        b.post_send(2, Tag::Question, vec![1]).unwrap();
        a.post_send(2, Tag::Question, vec![0]).unwrap();
        let from_a = c.post_recv(0, Tag::Question).unwrap();
        let from_b = c.post_recv(1, Tag::Question).unwrap();
        assert_eq!(c.wait(from_a).unwrap(), vec![0]);
        assert_eq!(c.wait(from_b).unwrap(), vec![1]);
    }
}
