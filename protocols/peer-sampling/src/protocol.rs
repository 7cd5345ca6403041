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

//! Wire format shared by every gossip variant.
//!
//! A message is a two bytes [`Header`], an optional extra header, then a serialized
//! [`PeerCache`]:
//!
//! ```text
//! Header      : protocol_id:u8, msg_type:u8
//! CacheHeader : capacity:u32, metadata_size:u32
//! Entry       : age:u32, identity, metadata:[u8; metadata_size]
//! ```
//!
//! All integers are big-endian. Identities use the encoding of their [`NodeId`] impl.

use bytes::{Buf, BufMut, Bytes};

use crate::{
    cache::{CacheEntry, PeerCache},
    error::{IdentityError, WireError},
    identity::NodeId,
};

/// Protocol id of the generic peer sampling protocols (Cyclon, Newscast).
pub const TOPOLOGY: u8 = 0x10;
/// Protocol id of T-Man.
pub const TMAN: u8 = 0x13;

pub const NCAST_QUERY: u8 = 0x01;
pub const NCAST_REPLY: u8 = 0x02;
pub const TMAN_QUERY: u8 = 0x03;
pub const TMAN_REPLY: u8 = 0x04;
pub const CYCLON_QUERY: u8 = 0x05;
pub const CYCLON_REPLY: u8 = 0x06;
pub const CLOUDCAST_QUERY: u8 = 0x07;
pub const CLOUDCAST_REPLY: u8 = 0x08;
/// A cloud-relayed packet. Carries an extra header of [`CLOUD_HEADER_LEN`] bytes.
pub const CLOUDCAST_CLOUD: u8 = 0x09;

pub const HEADER_LEN: usize = 2;
pub const CACHE_HEADER_LEN: usize = 8;
/// Size of the last-cloud-contact timestamp following a [`CLOUDCAST_CLOUD`] header.
pub const CLOUD_HEADER_LEN: usize = 8;

/// First two bytes of every message.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Header {
    pub protocol: u8,
    pub msg_type: u8,
}

impl Header {
    pub fn new(protocol: u8, msg_type: u8) -> Self {
        Header { protocol, msg_type }
    }

    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.protocol);
        dst.put_u8(self.msg_type);
    }

    /// Reads the header of a message without decoding the rest of it.
    pub fn peek(data: &[u8]) -> Result<Header, WireError> {
        match data {
            [protocol, msg_type, ..] => Ok(Header::new(*protocol, *msg_type)),
            _ => Err(WireError::Truncated),
        }
    }

    /// Length of the extra header following this header.
    pub fn extra_len(&self) -> usize {
        if self.msg_type == CLOUDCAST_CLOUD {
            CLOUD_HEADER_LEN
        } else {
            0
        }
    }
}

/// A decoded gossip message.
#[derive(Debug, Clone)]
pub struct Message<I> {
    pub header: Header,
    /// Extra header bytes, empty for every message type but [`CLOUDCAST_CLOUD`].
    pub extra: Bytes,
    pub cache: PeerCache<I>,
}

impl<I: NodeId> Message<I> {
    /// Decodes a message that must belong to `protocol`.
    pub fn decode(data: &[u8], protocol: u8) -> Result<Self, WireError> {
        let header = Header::peek(data)?;
        if header.protocol != protocol {
            return Err(WireError::ProtocolMismatch {
                expected: protocol,
                found: header.protocol,
            });
        }

        let rest = &data[HEADER_LEN..];
        let extra_len = header.extra_len();
        if rest.len() < extra_len {
            return Err(WireError::Truncated);
        }
        let (extra, rest) = rest.split_at(extra_len);

        Ok(Message {
            header,
            extra: Bytes::copy_from_slice(extra),
            cache: undump(rest)?,
        })
    }
}

/// Writes the cache header of `cache`. With `include_self`, one more slot is advertised for the
/// sender's own entry.
pub fn dump_header<I>(cache: &PeerCache<I>, include_self: bool, dst: &mut impl BufMut) {
    dump_cache_header(cache.capacity(), cache.metadata_size(), include_self, dst)
}

pub(crate) fn dump_cache_header(
    capacity: usize,
    metadata_size: usize,
    include_self: bool,
    dst: &mut impl BufMut,
) {
    let capacity = capacity.saturating_add(usize::from(include_self));
    dst.put_u32(u32::try_from(capacity).unwrap_or(u32::MAX));
    dst.put_u32(u32::try_from(metadata_size).unwrap_or(u32::MAX));
}

/// Writes the entry at `index`. Returns the number of bytes written, or `None` if there is no
/// such entry.
pub fn dump_entry<I: NodeId>(
    cache: &PeerCache<I>,
    index: usize,
    dst: &mut impl BufMut,
) -> Option<usize> {
    let entry = cache.get(index)?;
    encode_entry(entry, dst);
    Some(entry_len(entry))
}

pub(crate) fn encode_entry<I: NodeId>(entry: &CacheEntry<I>, dst: &mut impl BufMut) {
    dst.put_u32(entry.age());
    entry.id().encode(dst);
    dst.put_slice(entry.metadata());
}

/// Encoded length of one entry.
pub fn entry_len<I: NodeId>(entry: &CacheEntry<I>) -> usize {
    4 + entry.id().encoded_len() + entry.metadata().len()
}

/// Decodes a cache serialized by [`dump_header`] and [`dump_entry`].
///
/// Entries are read until `data` is exhausted. The decoded cache has expiry disabled. A peer
/// appearing more than once keeps its first occurrence.
pub fn undump<I: NodeId>(mut data: &[u8]) -> Result<PeerCache<I>, WireError> {
    if data.len() < CACHE_HEADER_LEN {
        return Err(WireError::Truncated);
    }
    let capacity = data.get_u32() as usize;
    let metadata_size = data.get_u32() as usize;

    let mut entries: Vec<CacheEntry<I>> = Vec::new();
    while !data.is_empty() {
        if entries.len() >= capacity {
            return Err(WireError::TooManyEntries);
        }
        if data.len() < 4 {
            return Err(WireError::Truncated);
        }
        let age = data.get_u32();
        let (id, consumed) = I::decode(data).map_err(|e| match e {
            IdentityError::Truncated => WireError::Truncated,
            e => WireError::Identity(e),
        })?;
        data.advance(consumed);
        if data.len() < metadata_size {
            return Err(WireError::Truncated);
        }
        let metadata = Box::<[u8]>::from(&data[..metadata_size]);
        data.advance(metadata_size);

        if entries.iter().any(|e| *e.id() == id) {
            tracing::trace!(peer=?id, "Dropping duplicate entry");
            continue;
        }
        entries
            .try_reserve(1)
            .map_err(|_| WireError::AllocationFailure)?;
        entries.push(CacheEntry::new(id, age, metadata));
    }

    Ok(PeerCache::from_entries(capacity, metadata_size, 0, entries))
}
