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

//! T-Man: topology construction driven by a ranking function.
//!
//! Every node ranks the peers it knows with a [`Ranker`] relative to its own metadata, and
//! periodically exchanges its ranked view with one of its best peers. Views converge towards the
//! topology the ranker describes, e.g. a ring when ranking by distance on a circle.
//!
//! T-Man draws its initial candidates, and the candidates of every restart, from another peer
//! sampler running alongside it. Datagrams not belonging to T-Man are handed to that sampler.

use std::{
    fmt,
    str::FromStr,
    time::{Duration, Instant},
};

use crate::{
    cache::PeerCache,
    config,
    error::{CacheError, ConfigError, Error, ExchangeError, WireError},
    exchange::{self, Exchange},
    protocol::{Header, Message, TMAN, TMAN_QUERY, TMAN_REPLY},
    timer::Ticker,
    Outbound, PeerSampler, Ranker,
};

/// Configuration for [`TMan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Initial number of peers in the view.
    pub cache_size: usize,
    /// Maximum number of entries shipped in a message.
    pub max_gossip_peers: usize,
    /// Exchanges are made with one of the first `max_preferred_peers` peers of the ranked view.
    pub max_preferred_peers: usize,
    /// Number of cycles without news after which the protocol restarts, halved.
    pub idle_time: u32,
    /// Interval between two cycles.
    pub period: Duration,
    /// Age at which entries expire, `0` disabling expiry.
    pub max_age: u32,
    /// Maximum size of an encoded message.
    pub max_message_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_size: 10,
            max_gossip_peers: 20,
            max_preferred_peers: 10,
            idle_time: 10,
            period: Duration::from_secs(1),
            max_age: 0,
            max_message_size: exchange::LARGE_BUDGET,
        }
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut config = Config::default();
        for (key, value) in config::pairs(s)? {
            match key {
                "cache_size" => config.cache_size = config::value(key, value)?,
                "max_gossip_peers" => config.max_gossip_peers = config::value(key, value)?,
                "max_preferred_peers" => config.max_preferred_peers = config::value(key, value)?,
                "idle_time" => config.idle_time = config::value(key, value)?,
                "period" => config.period = config::period(key, value)?,
                "max_age" | "max_timestamp" => config.max_age = config::value(key, value)?,
                "max_message_size" => config.max_message_size = config::value(key, value)?,
                _ => config::unknown(key),
            }
        }
        Ok(config)
    }
}

/// Where T-Man stands in its convergence.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Phase {
    /// No view yet. Received messages are ignored.
    Bootstrap,
    /// No news for too long. The next cycle starts over from the peer sampler's view.
    Restart,
    /// Exchanging with ranked peers. `countdown` cycles without news are left before a restart.
    Active { countdown: u32 },
}

/// Neighbourhood resize waiting for the next view replacement.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Resize {
    Grow(usize),
    Shrink(usize),
}

/// A T-Man instance ranking peers with `R`, drawing candidates from the sampler `S`.
pub struct TMan<S: PeerSampler, R> {
    config: Config,
    exchange: Exchange<S::Id>,
    cache: PeerCache<S::Id>,
    sampler: S,
    ranker: R,
    phase: Phase,
    /// Candidate contacted at the last (re)start. Its answer replaces the whole view.
    restart_peer: Option<S::Id>,
    pending_resize: Option<Resize>,
    ticker: Ticker,
}

impl<S, R> TMan<S, R>
where
    S: PeerSampler,
    R: Ranker,
{
    /// Creates a T-Man instance for the node `local_id`, ranked by `metadata`.
    ///
    /// The metadata size must be the one of `sampler`.
    pub fn new(
        local_id: S::Id,
        metadata: &[u8],
        ranker: R,
        sampler: S,
        config: Config,
    ) -> Result<Self, Error> {
        if sampler.metadata_size() != metadata.len() {
            return Err(CacheError::MetadataSizeMismatch {
                expected: sampler.metadata_size(),
                found: metadata.len(),
            }
            .into());
        }

        Ok(TMan {
            exchange: Exchange::new(local_id, metadata, config.max_message_size)?,
            cache: PeerCache::new(config.cache_size, metadata.len(), config.max_age),
            sampler,
            ranker,
            phase: Phase::Bootstrap,
            restart_peer: None,
            pending_resize: None,
            ticker: Ticker::new(),
            config,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn restart_peer(&self) -> Option<&S::Id> {
        self.restart_peer.as_ref()
    }

    /// The underlying peer sampler.
    pub fn sampler(&self) -> &S {
        &self.sampler
    }

    fn empty_cache(&self, capacity: usize) -> PeerCache<S::Id> {
        PeerCache::new(capacity, self.cache.metadata_size(), self.config.max_age)
    }

    fn idle_countdown(&self) -> Phase {
        Phase::Active {
            countdown: self.config.idle_time.saturating_mul(2),
        }
    }

    /// Installs a new view, applying the pending resize. `observed` is the number of distinct
    /// peers the new view was drawn from.
    fn replace_cache(&mut self, mut cache: PeerCache<S::Id>, observed: usize) {
        let capacity = self.config.cache_size;
        let target = match self.pending_resize {
            Some(Resize::Grow(requested)) => {
                let step = requested.min(capacity.max((3 * observed + 1) / 2));
                if step >= requested {
                    self.pending_resize = None;
                }
                step
            }
            Some(Resize::Shrink(requested)) => {
                self.pending_resize = None;
                requested
            }
            None => capacity,
        };
        if target != capacity {
            tracing::debug!(from = capacity, to = target, "Resizing neighbourhood");
        }

        cache.resize(target);
        self.config.cache_size = target;
        self.cache = cache;
    }

    fn handle_message(&mut self, data: &[u8]) -> Result<(), Error> {
        let message = Message::<S::Id>::decode(data, TMAN)?;
        if !matches!(message.header.msg_type, TMAN_QUERY | TMAN_REPLY) {
            return Err(WireError::UnexpectedMessage {
                protocol: TMAN,
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
        if self.phase == Phase::Bootstrap {
            tracing::trace!("Ignoring message received while bootstrapping");
            return Ok(());
        }
        let entry = message.cache.get(0).ok_or(ExchangeError::NoDestination)?;
        let sender = entry.id().clone();

        if message.header.msg_type == TMAN_QUERY {
            tracing::debug!(peer=?sender, "Received query");
            let answer = self
                .cache
                .rank(&self.ranker, Some(entry.id()), entry.metadata());
            self.exchange.reply(
                &message.cache,
                &answer,
                TMAN,
                TMAN_REPLY,
                &[],
                self.config.max_gossip_peers,
                true,
            )?;
        }

        let mut received = message.cache;
        received.remove(self.exchange.local_id());

        if self.restart_peer.as_ref() == Some(&sender) {
            tracing::debug!(peer=?sender, "Resynchronising with restart peer");
            let (fresh, observed) = self.empty_cache(0).union(&received)?;
            let ranked = fresh.rank(&self.ranker, None, self.exchange.local_metadata());
            self.replace_cache(ranked, observed);
            self.restart_peer = None;
            self.phase = self.idle_countdown();
            return Ok(());
        }

        let (union, observed) = self.cache.union(&received)?;
        let novel = observed > self.cache.len();
        let ranked = union.rank(&self.ranker, None, self.exchange.local_metadata());
        self.replace_cache(ranked, observed);
        if novel {
            self.phase = self.idle_countdown();
        }
        Ok(())
    }

    /// Ranks the peer sampler's view and contacts the best candidate.
    fn restart(&mut self) -> Result<(), Error> {
        let (mut candidates, _) = self.empty_cache(0).union(self.sampler.view())?;
        candidates.remove(self.exchange.local_id());
        let ranked = candidates.rank(&self.ranker, None, self.exchange.local_metadata());

        let Some(best) = ranked.get(0) else {
            tracing::trace!("No candidates from the peer sampler");
            return Ok(());
        };
        let (peer, metadata) = (best.id().clone(), best.metadata().to_vec());

        if self.phase == Phase::Bootstrap {
            let observed = ranked.len();
            self.replace_cache(ranked, observed);
        }
        let payload = self.cache.rank(&self.ranker, Some(&peer), &metadata);
        self.exchange.query(
            &payload,
            &peer,
            TMAN,
            TMAN_QUERY,
            &[],
            self.config.max_gossip_peers,
        )?;
        tracing::debug!(peer=?peer, phase=?self.phase, "Restarted from peer sampler view");

        self.restart_peer = Some(peer);
        self.phase = self.idle_countdown();
        Ok(())
    }

    fn active_step(&mut self) -> Result<(), Error> {
        self.cache.age();

        let countdown = match self.phase {
            Phase::Bootstrap | Phase::Restart => return self.restart(),
            Phase::Active { countdown } => countdown,
        };

        let Some(entry) = self.cache.random_peer(self.config.max_preferred_peers, &[]) else {
            self.phase = Phase::Restart;
            return Ok(());
        };
        let (peer, metadata) = (entry.id().clone(), entry.metadata().to_vec());
        let payload = self.cache.rank(&self.ranker, Some(&peer), &metadata);
        self.exchange.query(
            &payload,
            &peer,
            TMAN,
            TMAN_QUERY,
            &[],
            self.config.max_gossip_peers,
        )?;

        self.phase = match countdown.saturating_sub(1) {
            0 => {
                tracing::debug!("No news for too long, restarting");
                Phase::Restart
            }
            countdown => Phase::Active { countdown },
        };
        Ok(())
    }
}

impl<S, R> PeerSampler for TMan<S, R>
where
    S: PeerSampler,
    R: Ranker,
{
    type Id = S::Id;

    /// Hands the peer to the underlying sampler and, once bootstrapped, inserts it at its
    /// ranked position.
    fn add_neighbour(&mut self, id: S::Id, metadata: &[u8]) -> Result<(), Error> {
        self.sampler.add_neighbour(id.clone(), metadata)?;
        if self.phase == Phase::Bootstrap {
            return Ok(());
        }

        let capacity = self.cache.capacity();
        self.cache.resize(capacity + 1);
        let added = self.cache.add_ranked(
            id,
            metadata,
            &self.ranker,
            self.exchange.local_metadata(),
        );
        self.cache.resize(capacity);
        added?;
        Ok(())
    }

    fn parse_data(&mut self, data: &[u8], now: Instant) -> Result<(), Error> {
        let received = match Header::peek(data) {
            Ok(header) if header.protocol == TMAN => {
                let received = self.handle_message(data);
                self.sampler.parse_data(&[], now)?;
                received
            }
            _ => self.sampler.parse_data(data, now),
        };
        if self.ticker.poll(now, self.config.period) {
            self.active_step()?;
        }
        received
    }

    fn view(&self) -> &PeerCache<S::Id> {
        &self.cache
    }

    fn grow_neighbourhood(&mut self, n: usize) -> Result<usize, Error> {
        if n == 0 {
            return Err(Error::InvalidResize(n));
        }
        if self.pending_resize.is_some() {
            return Err(Error::ResizePending);
        }
        let target = self.config.cache_size + n;
        self.pending_resize = Some(Resize::Grow(target));
        Ok(target)
    }

    fn shrink_neighbourhood(&mut self, n: usize) -> Result<usize, Error> {
        if n == 0 || n >= self.config.cache_size {
            return Err(Error::InvalidResize(n));
        }
        if self.pending_resize.is_some() {
            return Err(Error::ResizePending);
        }
        let target = self.config.cache_size - n;
        self.pending_resize = Some(Resize::Shrink(target));
        Ok(target)
    }

    fn remove_neighbour(&mut self, id: &S::Id) -> Result<(), Error> {
        if let Err(e) = self.sampler.remove_neighbour(id) {
            tracing::trace!(peer=?id, "Peer sampler could not remove peer: {e}");
        }
        let len = self.cache.len();
        if self.cache.remove(id) == len {
            return Err(CacheError::NotFound.into());
        }
        Ok(())
    }

    /// Changes the metadata of the local node, here and in the underlying sampler, and re-ranks
    /// the view accordingly.
    fn change_metadata(&mut self, metadata: &[u8]) -> Result<(), Error> {
        self.exchange.set_metadata(metadata)?;
        self.sampler.change_metadata(metadata)?;
        self.cache = self.cache.rank(&self.ranker, None, metadata);
        Ok(())
    }

    fn poll_outbound(&mut self) -> Option<Outbound<S::Id>> {
        self.exchange
            .poll_outbound()
            .or_else(|| self.sampler.poll_outbound())
    }
}

impl<S: PeerSampler, R> fmt::Debug for TMan<S, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TMan")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("phase", &self.phase)
            .field("restart_peer", &self.restart_peer)
            .field("pending_resize", &self.pending_resize)
            .finish_non_exhaustive()
    }
}
