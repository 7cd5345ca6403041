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

//! Cyclon: peer sampling by shuffling random subsets of the views.
//!
//! At every cycle a node contacts the oldest peer of its view and sends it a random part of the
//! view together with its own fresh entry. The peer answers with a random part of its own view,
//! and both fold what they received back into their views, evicting the entries they shipped
//! first. The resulting overlay approximates a random graph.

use std::{
    str::FromStr,
    time::{Duration, Instant},
};

use multiaddr::Multiaddr;

use crate::{
    cache::PeerCache,
    config,
    error::{CacheError, ConfigError, Error, WireError},
    exchange::{self, Exchange},
    identity::NodeId,
    protocol::{Message, CYCLON_QUERY, CYCLON_REPLY, TOPOLOGY},
    timer::Ticker,
    Outbound, PeerSampler,
};

/// Configuration for [`Cyclon`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of peers in the view.
    pub cache_size: usize,
    /// Number of entries shipped in every exchange, the sender's own entry included.
    pub sent_entries: usize,
    /// Interval between two exchanges.
    pub period: Duration,
    /// Interval between two exchanges until the first message is received.
    pub bootstrap_period: Duration,
    /// Age at which entries expire, `0` disabling expiry.
    pub max_age: u32,
    /// Maximum size of an encoded message.
    pub max_message_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_size: 10,
            sent_entries: 5,
            period: Duration::from_secs(10),
            bootstrap_period: Duration::from_secs(2),
            max_age: 0,
            max_message_size: exchange::DATAGRAM_BUDGET,
        }
    }
}

/// Parses the `key=value` form, e.g. `cache_size=20,sent_entries=8,period=5000000`.
///
/// `sent_entries` defaults to half of `cache_size`. Periods are in microseconds.
impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut config = Config::default();
        let mut sent_entries = None;
        for (key, value) in config::pairs(s)? {
            match key {
                "cache_size" => config.cache_size = config::value(key, value)?,
                "sent_entries" => sent_entries = Some(config::value(key, value)?),
                "period" => config.period = config::period(key, value)?,
                "bootstrap_period" => config.bootstrap_period = config::period(key, value)?,
                "max_age" | "max_timestamp" => config.max_age = config::value(key, value)?,
                "max_message_size" => config.max_message_size = config::value(key, value)?,
                _ => config::unknown(key),
            }
        }
        config.sent_entries = sent_entries.unwrap_or(config.cache_size / 2);
        Ok(config)
    }
}

/// A Cyclon peer sampler.
#[derive(Debug)]
pub struct Cyclon<I = Multiaddr> {
    config: Config,
    exchange: Exchange<I>,
    cache: PeerCache<I>,
    /// Entries shipped in the pending query, folded back in at the next cycle if no reply came.
    flying: Option<PeerCache<I>>,
    /// Peer the pending query was sent to.
    destination: Option<I>,
    bootstrap: bool,
    ticker: Ticker,
}

impl<I: NodeId> Cyclon<I> {
    /// Creates a sampler with an empty view for the node `local_id` advertising `metadata`.
    pub fn new(local_id: I, metadata: &[u8], config: Config) -> Result<Self, Error> {
        let cache = PeerCache::new(config.cache_size, metadata.len(), config.max_age);
        Self::with_view(local_id, metadata, config, cache)
    }

    /// Creates a sampler starting from an existing view.
    pub fn with_view(
        local_id: I,
        metadata: &[u8],
        config: Config,
        mut cache: PeerCache<I>,
    ) -> Result<Self, Error> {
        if cache.metadata_size() != metadata.len() {
            return Err(CacheError::MetadataSizeMismatch {
                expected: metadata.len(),
                found: cache.metadata_size(),
            }
            .into());
        }
        cache.remove(&local_id);
        cache.resize(config.cache_size);

        Ok(Cyclon {
            exchange: Exchange::new(local_id, metadata, config.max_message_size)?,
            config,
            cache,
            flying: None,
            destination: None,
            bootstrap: true,
            ticker: Ticker::new(),
        })
    }

    /// `true` until the first message is received.
    pub fn is_bootstrapping(&self) -> bool {
        self.bootstrap
    }

    /// Peer contacted by the exchange in progress.
    pub fn destination(&self) -> Option<&I> {
        self.destination.as_ref()
    }

    /// Entries shipped by the exchange in progress.
    pub fn flying(&self) -> Option<&PeerCache<I>> {
        self.flying.as_ref()
    }

    fn current_period(&self) -> Duration {
        if self.bootstrap {
            self.config.bootstrap_period
        } else {
            self.config.period
        }
    }

    /// A random sample of `n` entries of the view, leaving out `exclude`. The view keeps them.
    fn sample(&self, n: usize, exclude: Option<&I>) -> PeerCache<I> {
        let mut view = self.cache.clone();
        if let Some(id) = exclude {
            view.remove(id);
        }
        view.random_subset(n)
    }

    /// Folds a received cache into the view, evicting the peers in `shipped` first and then the
    /// oldest ones until the view fits its capacity again.
    fn absorb(
        &mut self,
        received: &PeerCache<I>,
        shipped: Option<&PeerCache<I>>,
    ) -> Result<(), Error> {
        let mut received = received.clone();
        received.remove(self.exchange.local_id());

        let (mut view, _) = self.cache.union(&received)?;
        let mut victims = shipped.into_iter().flat_map(|c| c.ids());
        while view.len() > self.config.cache_size {
            match victims.next() {
                Some(id) => {
                    view.remove(id);
                }
                None => {
                    view.take_oldest();
                }
            }
        }
        view.sort_by_age();
        view.resize(self.config.cache_size);

        tracing::trace!(size = view.len(), "Updated view");
        self.cache = view;
        Ok(())
    }

    fn handle_message(&mut self, data: &[u8]) -> Result<(), Error> {
        let message = Message::<I>::decode(data, TOPOLOGY)?;
        if !matches!(message.header.msg_type, CYCLON_QUERY | CYCLON_REPLY) {
            return Err(WireError::UnexpectedMessage {
                protocol: TOPOLOGY,
                msg_type: message.header.msg_type,
            }
            .into());
        }
        if message.cache.metadata_size() != self.cache.metadata_size() {
            return Err(CacheError::MetadataSizeMismatch {
                expected: self.cache.metadata_size(),
                found: message.cache.metadata_size(),
            }
            .into());
        }

        if message.header.msg_type == CYCLON_QUERY {
            let requester = message.cache.get(0).map(|e| e.id());
            tracing::debug!(peer=?requester, "Received query");
            let mut answer = self.sample(self.config.sent_entries, requester);
            let sent = self.exchange.reply(
                &message.cache,
                &answer,
                TOPOLOGY,
                CYCLON_REPLY,
                &[],
                0,
                false,
            )?;
            answer.resize(sent);
            self.bootstrap = false;
            self.absorb(&message.cache, Some(&answer))
        } else {
            tracing::debug!(peer=?self.destination, "Received reply");
            self.bootstrap = false;
            let flying = self.flying.take();
            self.destination = None;
            self.absorb(&message.cache, flying.as_ref())
        }
    }

    fn active_step(&mut self) -> Result<(), Error> {
        if let Some(flying) = self.flying.take() {
            tracing::debug!(peer=?self.destination, "No reply, folding shipped entries back");
            self.destination = None;
            self.absorb(&flying, None)?;
        }

        self.cache.age();
        let Some(oldest) = self.cache.take_oldest() else {
            tracing::trace!("Empty view, skipping cycle");
            return Ok(());
        };
        let destination = oldest.id().clone();

        let mut flying = self.sample(self.config.sent_entries.saturating_sub(1), None);
        let sent = self
            .exchange
            .query(&flying, &destination, TOPOLOGY, CYCLON_QUERY, &[], 0)?;
        flying.resize(sent);
        tracing::debug!(peer=?destination, entries = flying.len(), "Sent query");

        self.flying = Some(flying);
        self.destination = Some(destination);
        Ok(())
    }
}

impl<I: NodeId> PeerSampler for Cyclon<I> {
    type Id = I;

    fn add_neighbour(&mut self, id: I, metadata: &[u8]) -> Result<(), Error> {
        if id == *self.exchange.local_id() {
            return Err(CacheError::AlreadyPresent.into());
        }
        self.cache.add(id.clone(), metadata)?;
        let payload = self.sample(self.config.sent_entries.saturating_sub(1), Some(&id));
        if let Err(e) = self
            .exchange
            .query(&payload, &id, TOPOLOGY, CYCLON_QUERY, &[], 0)
        {
            self.cache.remove(&id);
            return Err(e);
        }
        Ok(())
    }

    fn parse_data(&mut self, data: &[u8], now: Instant) -> Result<(), Error> {
        let received = if data.is_empty() {
            Ok(())
        } else {
            self.handle_message(data)
        };
        if self.ticker.poll(now, self.current_period()) {
            self.active_step()?;
        }
        received
    }

    fn view(&self) -> &PeerCache<I> {
        &self.cache
    }

    fn grow_neighbourhood(&mut self, n: usize) -> Result<usize, Error> {
        if n == 0 {
            return Err(Error::InvalidResize(n));
        }
        self.config.cache_size += n;
        self.cache.resize(self.config.cache_size);
        Ok(self.config.cache_size)
    }

    fn shrink_neighbourhood(&mut self, n: usize) -> Result<usize, Error> {
        if n == 0 || n >= self.config.cache_size {
            return Err(Error::InvalidResize(n));
        }
        self.config.cache_size -= n;
        self.cache.resize(self.config.cache_size);
        Ok(self.config.cache_size)
    }

    fn remove_neighbour(&mut self, id: &I) -> Result<(), Error> {
        let len = self.cache.len();
        if self.cache.remove(id) == len {
            return Err(CacheError::NotFound.into());
        }
        Ok(())
    }

    fn change_metadata(&mut self, metadata: &[u8]) -> Result<(), Error> {
        Ok(self.exchange.set_metadata(metadata)?)
    }

    fn poll_outbound(&mut self) -> Option<Outbound<I>> {
        self.exchange.poll_outbound()
    }
}
