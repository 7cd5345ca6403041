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

//! Gossip-based peer sampling.
//!
//! Every node of a large, churning network keeps a small view of other live nodes, refreshed by
//! periodically exchanging part of it with a peer taken from the view itself. Three protocols
//! are provided:
//!
//! - [`Cyclon`] swaps uniformly random subsets of the views and yields a random overlay.
//! - [`Ncast`] (Newscast) keeps the freshest entries of both views, with an optional adaptive
//!   traffic budget and bootstrap peer retention.
//! - [`TMan`] converges towards a topology chosen by the application through a [`Ranker`],
//!   drawing its candidates from another peer sampler.
//!
//! # Usage
//!
//! The protocols don't perform any I/O. Incoming datagrams are handed to
//! [`PeerSampler::parse_data`] together with the current time, which also drives the periodic
//! exchange when called with an empty buffer. Outgoing datagrams are retrieved with
//! [`PeerSampler::poll_outbound`] and must be delivered to [`Outbound::to`].
//!
//! With the `tokio` feature, the `net` module provides a UDP transport and a driver running
//! that loop.

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod cache;
mod config;
mod error;
mod exchange;
mod identity;
mod timer;

pub mod cyclon;
#[cfg(feature = "tokio")]
pub mod net;
pub mod ncast;
pub mod protocol;
pub mod tman;

use std::time::Instant;

use bytes::Bytes;

pub use crate::cache::{CacheEntry, PeerCache, Ranker, Sources, FRESH_AGE};
pub use crate::cyclon::Cyclon;
pub use crate::error::{CacheError, ConfigError, Error, ExchangeError, IdentityError, WireError};
pub use crate::identity::NodeId;
pub use crate::ncast::Ncast;
pub use crate::tman::TMan;

/// A message waiting to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound<I> {
    /// Peer the message is for.
    pub to: I,
    /// Encoded message.
    pub data: Bytes,
}

/// Interface shared by the peer sampling protocols.
pub trait PeerSampler {
    /// Identity of the peers.
    type Id: NodeId;

    /// Adds a peer to the view, typically to bootstrap the protocol. Most protocols immediately
    /// start an exchange with it.
    fn add_neighbour(&mut self, id: Self::Id, metadata: &[u8]) -> Result<(), Error>;

    /// Processes a datagram received from the network, then runs the periodic exchange if it is
    /// due at `now`.
    ///
    /// An empty `data` only drives the timer. A malformed datagram is reported as an error and
    /// leaves the view untouched.
    fn parse_data(&mut self, data: &[u8], now: Instant) -> Result<(), Error>;

    /// The current view.
    fn view(&self) -> &PeerCache<Self::Id>;

    /// Identities of the peers in the view.
    fn neighbourhood(&self) -> Vec<Self::Id> {
        self.view().ids().cloned().collect()
    }

    /// Metadata of the peers in the view, index aligned with [`PeerSampler::neighbourhood`].
    fn metadata(&self) -> Vec<&[u8]> {
        self.view().iter().map(|e| e.metadata()).collect()
    }

    /// Size of the metadata attached to every peer.
    fn metadata_size(&self) -> usize {
        self.view().metadata_size()
    }

    /// Asks for `n` more peers in the view. Returns the resulting target size.
    fn grow_neighbourhood(&mut self, n: usize) -> Result<usize, Error>;

    /// Asks for `n` fewer peers in the view. Returns the resulting target size.
    fn shrink_neighbourhood(&mut self, n: usize) -> Result<usize, Error>;

    /// Removes a peer from the view.
    fn remove_neighbour(&mut self, id: &Self::Id) -> Result<(), Error>;

    /// Changes the metadata advertised for the local node.
    fn change_metadata(&mut self, metadata: &[u8]) -> Result<(), Error>;

    /// Pops the next message to send.
    fn poll_outbound(&mut self) -> Option<Outbound<Self::Id>>;
}

impl<S: PeerSampler + ?Sized> PeerSampler for Box<S> {
    type Id = S::Id;

    fn add_neighbour(&mut self, id: Self::Id, metadata: &[u8]) -> Result<(), Error> {
        (**self).add_neighbour(id, metadata)
    }

    fn parse_data(&mut self, data: &[u8], now: Instant) -> Result<(), Error> {
        (**self).parse_data(data, now)
    }

    fn view(&self) -> &PeerCache<Self::Id> {
        (**self).view()
    }

    fn grow_neighbourhood(&mut self, n: usize) -> Result<usize, Error> {
        (**self).grow_neighbourhood(n)
    }

    fn shrink_neighbourhood(&mut self, n: usize) -> Result<usize, Error> {
        (**self).shrink_neighbourhood(n)
    }

    fn remove_neighbour(&mut self, id: &Self::Id) -> Result<(), Error> {
        (**self).remove_neighbour(id)
    }

    fn change_metadata(&mut self, metadata: &[u8]) -> Result<(), Error> {
        (**self).change_metadata(metadata)
    }

    fn poll_outbound(&mut self) -> Option<Outbound<Self::Id>> {
        (**self).poll_outbound()
    }
}
