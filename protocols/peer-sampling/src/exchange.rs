// Copyright 2026 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! Query/reply construction shared by the gossip variants.

use std::collections::VecDeque;

use bytes::{BufMut, BytesMut};

use crate::{
    cache::PeerCache,
    error::{CacheError, Error, ExchangeError},
    identity::NodeId,
    protocol::{self, Header},
    Outbound,
};

/// Messages of Cyclon and Newscast must fit into a single datagram.
pub(crate) const DATAGRAM_BUDGET: usize = 1500;
/// T-Man ships whole ranked views and gets a larger budget.
pub(crate) const LARGE_BUDGET: usize = 60 * 1024;

/// Per-instance exchange state: the local node's own entry, a scratch buffer and the queue of
/// messages waiting to be sent.
#[derive(Debug)]
pub(crate) struct Exchange<I> {
    local_id: I,
    /// Single entry cache advertising the local node.
    my_entry: PeerCache<I>,
    max_message_size: usize,
    buffer: BytesMut,
    outbound: VecDeque<Outbound<I>>,
}

impl<I: NodeId> Exchange<I> {
    pub(crate) fn new(
        local_id: I,
        metadata: &[u8],
        max_message_size: usize,
    ) -> Result<Self, CacheError> {
        let mut my_entry = PeerCache::new(1, metadata.len(), 0);
        my_entry.add(local_id.clone(), metadata)?;
        Ok(Exchange {
            local_id,
            my_entry,
            max_message_size,
            buffer: BytesMut::with_capacity(max_message_size),
            outbound: VecDeque::new(),
        })
    }

    #[cfg(test)]
    pub(crate) fn my_entry(&self) -> &PeerCache<I> {
        &self.my_entry
    }

    pub(crate) fn local_id(&self) -> &I {
        &self.local_id
    }

    pub(crate) fn local_metadata(&self) -> &[u8] {
        self.my_entry.get(0).map(|e| e.metadata()).unwrap_or_default()
    }

    pub(crate) fn metadata_size(&self) -> usize {
        self.my_entry.metadata_size()
    }

    pub(crate) fn set_metadata(&mut self, metadata: &[u8]) -> Result<(), CacheError> {
        self.my_entry.update_metadata(&self.local_id, metadata)
    }

    /// Overrides the age advertised for the local node.
    pub(crate) fn set_own_age(&mut self, age: u32) {
        self.my_entry.set_age(0, age);
    }

    /// Sends `payload` back to the sender of `requester`, i.e. its first entry.
    ///
    /// `max_peers` bounds the number of payload entries, `0` meaning no bound. Returns the number
    /// of payload entries actually sent, see [`Exchange::query`].
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn reply(
        &mut self,
        requester: &PeerCache<I>,
        payload: &PeerCache<I>,
        protocol: u8,
        msg_type: u8,
        extra: &[u8],
        max_peers: usize,
        include_self: bool,
    ) -> Result<usize, Error> {
        let to = requester
            .get(0)
            .map(|e| e.id().clone())
            .ok_or(ExchangeError::NoDestination)?;
        self.send(
            payload,
            to,
            Header::new(protocol, msg_type),
            extra,
            max_peers,
            include_self,
        )
    }

    /// Sends `payload` to `to`, preceded by the local node's own entry.
    ///
    /// Payload entries are written in order until the next one would exceed the message budget.
    /// Returns the number of payload entries sent. Fails with [`ExchangeError::MessageTooLarge`]
    /// only if the headers and the own entry alone exceed the budget.
    pub(crate) fn query(
        &mut self,
        payload: &PeerCache<I>,
        to: &I,
        protocol: u8,
        msg_type: u8,
        extra: &[u8],
        max_peers: usize,
    ) -> Result<usize, Error> {
        self.send(
            payload,
            to.clone(),
            Header::new(protocol, msg_type),
            extra,
            max_peers,
            true,
        )
    }

    fn send(
        &mut self,
        payload: &PeerCache<I>,
        to: I,
        header: Header,
        extra: &[u8],
        max_peers: usize,
        include_self: bool,
    ) -> Result<usize, Error> {
        if payload.metadata_size() != self.metadata_size() {
            return Err(CacheError::MetadataSizeMismatch {
                expected: self.metadata_size(),
                found: payload.metadata_size(),
            }
            .into());
        }

        let advertised = match max_peers {
            0 => payload.capacity(),
            n => n.min(payload.capacity()),
        };
        let limit = if max_peers == 0 { usize::MAX } else { max_peers };

        self.buffer.clear();
        header.encode(&mut self.buffer);
        self.buffer.put_slice(extra);
        protocol::dump_cache_header(
            advertised,
            payload.metadata_size(),
            include_self,
            &mut self.buffer,
        );
        if include_self {
            protocol::dump_entry(&self.my_entry, 0, &mut self.buffer);
        }
        if self.buffer.len() > self.max_message_size {
            let size = self.buffer.len();
            self.buffer.clear();
            return Err(ExchangeError::MessageTooLarge {
                size,
                max: self.max_message_size,
            }
            .into());
        }

        let mut sent = 0;
        for entry in payload.iter().filter(|e| *e.id() != to).take(limit) {
            if self.buffer.len() + protocol::entry_len(entry) > self.max_message_size {
                break;
            }
            protocol::encode_entry(entry, &mut self.buffer);
            sent += 1;
        }

        tracing::trace!(
            peer=?to,
            protocol=header.protocol,
            msg_type=header.msg_type,
            entries=sent,
            size=self.buffer.len(),
            "Queueing message"
        );
        let data = self.buffer.split().freeze();
        self.outbound.push_back(Outbound { to, data });
        Ok(sent)
    }

    pub(crate) fn poll_outbound(&mut self) -> Option<Outbound<I>> {
        self.outbound.pop_front()
    }
}
