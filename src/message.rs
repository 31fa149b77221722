use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::trace;

use crate::app::ParallelEngine;
use crate::error::{Result, WCCError};
use crate::fragment::{FragmentId, PartitionView, Vertex};

/// The messaging contract the propagation engine relies on.
///
/// Delivery is fire-and-forget. Receivers must tolerate duplicates and any
/// arrival order; the engine only ever applies monotone minimum updates, so
/// both are harmless.
pub trait MessageChannel: Sync {
    /// Prepares one send buffer per engine thread.
    fn init_channels(&mut self, thread_num: usize);

    /// Sends `value` to the fragment owning outer vertex `v`, addressed by
    /// the global id of `v`. `tid` selects the calling thread's buffer.
    fn sync_state_on_outer_vertex<F: PartitionView>(
        &self,
        frag: &F,
        v: Vertex,
        value: u64,
        tid: usize,
    );

    /// Drains this superstep's inbox, calling `f(tid, v, value)` in parallel
    /// for every message. `v` is the local inner vertex it was addressed to.
    fn parallel_process<G>(&mut self, engine: &ParallelEngine, f: G)
    where
        G: Fn(usize, Vertex, u64) + Sync + Send;

    /// Requests another superstep even if no message was sent.
    fn force_continue(&self);
}

/// A batch of `(gid, value)` pairs from one fragment to another, encoded with
/// bincode. `round` is the sender's superstep that produced it.
#[derive(Debug, Clone)]
pub struct MessageBatch {
    pub src: FragmentId,
    pub round: u64,
    pub payload: Vec<u8>,
}

/// What a fragment reports to the driver at the end of a superstep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub fid: FragmentId,
    pub messages_sent: usize,
    pub force_continue: bool,
}

impl RoundReport {
    /// Whether this fragment still has work for a following superstep.
    pub fn has_pending_work(&self) -> bool {
        self.messages_sent > 0 || self.force_continue
    }
}

/// In-process implementation of [`MessageChannel`] for one fragment.
///
/// Outgoing messages are buffered per engine thread and per destination, and
/// flushed as one encoded batch per destination when the superstep ends.
pub struct ParallelMessageManager {
    fid: FragmentId,
    peers: Vec<Sender<MessageBatch>>,
    inbox: Receiver<MessageBatch>,
    /// send_buffers[tid][dst] holds pending (gid, value) pairs.
    send_buffers: Vec<Mutex<Vec<Vec<(u64, u64)>>>>,
    incoming: Vec<(Vertex, u64)>,
    /// Batches a faster peer already produced for a later superstep.
    deferred: Vec<MessageBatch>,
    /// Supersteps flushed so far.
    round: u64,
    continue_flag: AtomicBool,
    redundant_delivery: bool,
}

/// Creates one connected message manager per fragment.
pub fn message_bus(fnum: u32) -> Vec<ParallelMessageManager> {
    let (senders, receivers): (Vec<_>, Vec<_>) = (0..fnum).map(|_| unbounded()).unzip();
    receivers
        .into_iter()
        .enumerate()
        .map(|(fid, inbox)| ParallelMessageManager {
            fid: fid as FragmentId,
            peers: senders.clone(),
            inbox,
            send_buffers: vec![],
            incoming: vec![],
            deferred: vec![],
            round: 0,
            continue_flag: AtomicBool::new(false),
            redundant_delivery: false,
        })
        .collect()
}

impl ParallelMessageManager {
    /// Sends every batch twice, emulating an at-least-once transport.
    pub fn set_redundant_delivery(&mut self, redundant: bool) {
        self.redundant_delivery = redundant;
    }

    /// Receives the batches produced by the previous superstep and resolves
    /// their global ids to local inner vertices. Returns the number of
    /// messages.
    ///
    /// The driver guarantees every batch of the previous superstep is already
    /// queued. Batches stamped with a later round are kept for the next call.
    pub fn start_round<F: PartitionView>(&mut self, frag: &F) -> Result<usize> {
        self.incoming.clear();
        let mut ready = Vec::new();
        for batch in std::mem::take(&mut self.deferred).into_iter().chain(self.inbox.try_iter()) {
            if batch.round < self.round {
                ready.push(batch);
            } else {
                self.deferred.push(batch);
            }
        }
        for batch in ready {
            let pairs: Vec<(u64, u64)> = bincode::deserialize(&batch.payload)?;
            trace!(fid = self.fid, src = batch.src, count = pairs.len(), "batch received");
            for (gid, value) in pairs {
                match frag.gid_to_vertex(gid) {
                    Some(v) if frag.is_inner(v) => self.incoming.push((v, value)),
                    _ => return Err(WCCError::UnknownVertex { fid: self.fid, gid }),
                }
            }
        }
        Ok(self.incoming.len())
    }

    /// Flushes the per-thread buffers to their destinations and resets the
    /// continuation flag.
    pub fn finish_round(&mut self) -> Result<RoundReport> {
        let mut messages_sent = 0;
        for dst in 0..self.peers.len() {
            let mut batch = Vec::<(u64, u64)>::new();
            for buffer in self.send_buffers.iter_mut() {
                let buffer = buffer.get_mut().unwrap_or_else(PoisonError::into_inner);
                batch.append(&mut buffer[dst]);
            }
            if batch.is_empty() {
                continue;
            }
            messages_sent += batch.len();
            let payload = bincode::serialize(&batch)?;
            let copies = if self.redundant_delivery { 2 } else { 1 };
            for _ in 0..copies {
                self.peers[dst]
                    .send(MessageBatch { src: self.fid, round: self.round, payload: payload.clone() })
                    .map_err(|_| WCCError::ChannelClosed {
                        message: format!("fragment {} cannot reach fragment {dst}", self.fid),
                    })?;
            }
        }
        self.round += 1;
        Ok(RoundReport {
            fid: self.fid,
            messages_sent,
            force_continue: self.continue_flag.swap(false, Ordering::AcqRel),
        })
    }
}

impl MessageChannel for ParallelMessageManager {
    fn init_channels(&mut self, thread_num: usize) {
        let fnum = self.peers.len();
        self.send_buffers = (0..thread_num.max(1))
            .map(|_| Mutex::new(vec![Vec::new(); fnum]))
            .collect();
    }

    fn sync_state_on_outer_vertex<F: PartitionView>(
        &self,
        frag: &F,
        v: Vertex,
        value: u64,
        tid: usize,
    ) {
        let dst = frag.outer_owner(v) as usize;
        let gid = frag.outer_gid(v);
        // Each thread owns its buffer, so the lock is never contended.
        let mut buffers = self.send_buffers[tid]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        buffers[dst].push((gid, value));
    }

    fn parallel_process<G>(&mut self, engine: &ParallelEngine, f: G)
    where
        G: Fn(usize, Vertex, u64) + Sync + Send,
    {
        let incoming = std::mem::take(&mut self.incoming);
        engine.for_each_item(&incoming, |tid, &(v, value)| f(tid, v, value));
        self.incoming = incoming;
        self.incoming.clear();
    }

    fn force_continue(&self) {
        self.continue_flag.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod test_message {
    use std::sync::Mutex;

    use super::*;
    use crate::fragment::{Fragment, Partitioner};
    use crate::types::CSRGraph;

    fn two_fragments() -> Vec<Fragment> {
        // 0 - 1 | 2 - 3, cut between 1 and 2.
        let graph = CSRGraph::from_edges(4, &[(0, 1), (1, 2), (2, 3)]).unwrap();
        Fragment::build_fragments(&graph, Partitioner::Segmented, 2).unwrap()
    }

    #[test]
    fn test_message_reaches_owner() {
        let fragments = two_fragments();
        let mut bus = message_bus(2);
        let engine = ParallelEngine::new(2).unwrap();
        for manager in bus.iter_mut() {
            manager.init_channels(engine.thread_num());
        }

        // Fragment 0 mirrors vertex 2 and lowers it to 0.
        let mirror = fragments[0].gid_to_vertex(2).unwrap();
        assert!(fragments[0].is_outer(mirror));
        bus[0].sync_state_on_outer_vertex(&fragments[0], mirror, 0, 1);
        let report = bus[0].finish_round().unwrap();
        assert_eq!(report.messages_sent, 1);
        assert!(!report.force_continue);
        bus[1].finish_round().unwrap();

        assert_eq!(bus[1].start_round(&fragments[1]).unwrap(), 1);
        let received = Mutex::new(Vec::new());
        bus[1].parallel_process(&engine, |_, v, value| {
            received.lock().unwrap().push((fragments[1].inner_gid(v), value));
        });
        assert_eq!(received.into_inner().unwrap(), vec![(2, 0)]);
    }

    #[test]
    fn test_force_continue_resets_each_round() {
        let mut bus = message_bus(1);
        bus[0].init_channels(1);
        bus[0].force_continue();
        assert!(bus[0].finish_round().unwrap().has_pending_work());
        assert!(!bus[0].finish_round().unwrap().has_pending_work());
    }

    #[test]
    fn test_redundant_delivery_duplicates_batches() {
        let fragments = two_fragments();
        let mut bus = message_bus(2);
        for manager in bus.iter_mut() {
            manager.init_channels(1);
            manager.set_redundant_delivery(true);
        }
        let mirror = fragments[1].gid_to_vertex(1).unwrap();
        bus[1].sync_state_on_outer_vertex(&fragments[1], mirror, 0, 0);
        assert_eq!(bus[1].finish_round().unwrap().messages_sent, 1);
        bus[0].finish_round().unwrap();
        assert_eq!(bus[0].start_round(&fragments[0]).unwrap(), 2);
    }

    #[test]
    fn test_batches_from_later_round_are_deferred() {
        let fragments = two_fragments();
        let mut bus = message_bus(2);
        for manager in bus.iter_mut() {
            manager.init_channels(1);
        }
        let mirror = fragments[0].gid_to_vertex(2).unwrap();

        // Fragment 0 runs two supersteps before fragment 1 reads its inbox.
        bus[0].sync_state_on_outer_vertex(&fragments[0], mirror, 1, 0);
        bus[0].finish_round().unwrap();
        bus[1].finish_round().unwrap();
        bus[0].sync_state_on_outer_vertex(&fragments[0], mirror, 0, 0);
        bus[0].finish_round().unwrap();

        assert_eq!(bus[1].start_round(&fragments[1]).unwrap(), 1);
        assert_eq!(bus[1].incoming[0].1, 1);
        bus[1].finish_round().unwrap();
        assert_eq!(bus[1].start_round(&fragments[1]).unwrap(), 1);
        assert_eq!(bus[1].incoming[0].1, 0);
    }

    #[test]
    fn test_message_for_foreign_vertex_rejected() {
        let fragments = two_fragments();
        let mut bus = message_bus(2);
        let payload = bincode::serialize(&vec![(3u64, 0u64)]).unwrap();
        bus[1].peers[0].send(MessageBatch { src: 1, round: 0, payload }).unwrap();
        bus[0].finish_round().unwrap();
        let result = bus[0].start_round(&fragments[0]);
        assert!(matches!(result, Err(WCCError::UnknownVertex { fid: 0, gid: 3 })));
    }
}
