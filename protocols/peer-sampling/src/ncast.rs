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

//! Newscast: age-biased view maintenance.
//!
//! At every cycle a node sends its whole view, prefixed with its own fresh entry, to random
//! peers of the view. Both sides keep the freshest entries of the two views. Entries that are
//! not refreshed grow old and expire once they reach `max_age`.
//!
//! The "plus" options of [`Config`] refine the base protocol:
//!
//! - `adaptive` converts unspent reply tokens of quiet cycles into extra queries, keeping the
//!   traffic of a node roughly constant.
//! - `restart` re-adds the first neighbour ever added whenever the view falls below half its
//!   capacity.
//! - `randomize` shuffles entries of equal age before merging.
//! - `slowstart` starts the steady period at `bootstrap_period` and doubles it every cycle
//!   until it reaches `period`.

use std::{
    str::FromStr,
    time::{Duration, Instant},
};

use multiaddr::Multiaddr;

use crate::{
    cache::{PeerCache, FRESH_AGE},
    config,
    error::{CacheError, ConfigError, Error, WireError},
    exchange::{self, Exchange},
    identity::NodeId,
    protocol::{Message, NCAST_QUERY, NCAST_REPLY, TOPOLOGY},
    timer::Ticker,
    Outbound, PeerSampler,
};

/// Configuration for [`Ncast`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of peers in the view.
    pub cache_size: usize,
    /// Age at which entries expire, `0` disabling expiry.
    pub max_age: u32,
    /// Interval between two cycles once bootstrapped.
    pub period: Duration,
    /// Interval between two cycles while bootstrapping.
    pub bootstrap_period: Duration,
    /// Number of messages to receive before leaving the bootstrap phase.
    pub bootstrap_cycles: u32,
    pub adaptive: bool,
    pub restart: bool,
    pub randomize: bool,
    pub slowstart: bool,
    /// Maximum size of an encoded message.
    pub max_message_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_size: 10,
            max_age: 5,
            period: Duration::from_secs(10),
            bootstrap_period: Duration::from_secs(2),
            bootstrap_cycles: 5,
            adaptive: false,
            restart: false,
            randomize: false,
            slowstart: false,
            max_message_size: exchange::DATAGRAM_BUDGET,
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
                "max_age" | "max_timestamp" => config.max_age = config::value(key, value)?,
                "period" => config.period = config::period(key, value)?,
                "bootstrap_period" => config.bootstrap_period = config::period(key, value)?,
                "bootstrap_cycles" => config.bootstrap_cycles = config::value(key, value)?,
                "adaptive" => config.adaptive = config::flag(key, value)?,
                "restart" => config.restart = config::flag(key, value)?,
                "randomize" => config.randomize = config::flag(key, value)?,
                "slowstart" => config.slowstart = config::flag(key, value)?,
                "max_message_size" => config.max_message_size = config::value(key, value)?,
                _ => config::unknown(key),
            }
        }
        Ok(config)
    }
}

/// A Newscast peer sampler.
#[derive(Debug)]
pub struct Ncast<I = Multiaddr> {
    config: Config,
    exchange: Exchange<I>,
    cache: PeerCache<I>,
    ticker: Ticker,
    bootstrap: bool,
    /// Messages received during the bootstrap phase.
    cycles: u32,
    query_tokens: u32,
    reply_tokens: i32,
    /// Current period of the steady phase, below `config.period` during a slow start.
    steady_period: Duration,
    /// First neighbour ever added, re-added when the view runs low.
    bootstrap_peer: Option<(I, Box<[u8]>)>,
}

impl<I: NodeId> Ncast<I> {
    /// Creates a sampler with an empty view for the node `local_id` advertising `metadata`.
    pub fn new(local_id: I, metadata: &[u8], config: Config) -> Result<Self, Error> {
        let mut exchange = Exchange::new(local_id, metadata, config.max_message_size)?;
        let bootstrap = config.bootstrap_cycles > 0;
        if bootstrap {
            exchange.set_own_age((config.max_age / 2).max(FRESH_AGE));
        }
        let steady_period = if config.slowstart {
            config.bootstrap_period.min(config.period)
        } else {
            config.period
        };

        Ok(Ncast {
            cache: PeerCache::new(config.cache_size, metadata.len(), config.max_age),
            exchange,
            ticker: Ticker::new(),
            bootstrap,
            cycles: 0,
            query_tokens: 0,
            reply_tokens: 0,
            steady_period,
            bootstrap_peer: None,
            config,
        })
    }

    pub fn is_bootstrapping(&self) -> bool {
        self.bootstrap
    }

    fn current_period(&self) -> Duration {
        if self.bootstrap {
            self.config.bootstrap_period
        } else {
            self.steady_period
        }
    }

    fn count_cycle(&mut self) {
        if !self.bootstrap {
            return;
        }
        self.cycles += 1;
        if self.cycles >= self.config.bootstrap_cycles {
            tracing::debug!(cycles = self.cycles, "Bootstrap complete");
            self.bootstrap = false;
            self.exchange.set_own_age(FRESH_AGE);
        }
    }

    /// Keeps the freshest entries of the view and of `received`.
    fn merge(&mut self, mut received: PeerCache<I>) -> Result<(), Error> {
        received.remove(self.exchange.local_id());
        received.sort_by_age();

        let mut local = self.cache.clone();
        if self.config.randomize {
            local.shuffle_ties();
        }
        let (merged, sources) = local.merge(&received, self.config.cache_size)?;
        if !sources.has_news() {
            tracing::trace!("Nothing new in received view");
        }
        self.cache = merged;
        Ok(())
    }

    fn handle_message(&mut self, data: &[u8]) -> Result<(), Error> {
        let message = Message::<I>::decode(data, TOPOLOGY)?;
        if !matches!(message.header.msg_type, NCAST_QUERY | NCAST_REPLY) {
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

        if message.header.msg_type == NCAST_QUERY {
            tracing::debug!(peer=?message.cache.get(0).map(|e| e.id()), "Received query");
            self.exchange
                .reply(&message.cache, &self.cache, TOPOLOGY, NCAST_REPLY, &[], 0, true)?;
            self.reply_tokens = self.reply_tokens.saturating_sub(1);
        }
        self.count_cycle();
        self.merge(message.cache)
    }

    /// Puts the first neighbour back when the view falls below half its capacity.
    fn restart_if_depleted(&mut self) {
        let Some((id, metadata)) = &self.bootstrap_peer else {
            return;
        };
        if self.cache.len() < self.config.cache_size / 2 && !self.cache.contains(id) {
            tracing::debug!(peer=?id, "View depleted, re-adding bootstrap peer");
            if let Err(e) = self.cache.add(id.clone(), metadata) {
                tracing::debug!("Failed to re-add bootstrap peer: {e}");
            }
        }
    }

    fn active_step(&mut self) -> Result<(), Error> {
        if self.config.restart {
            self.restart_if_depleted();
        }

        if self.config.adaptive && !self.bootstrap && self.reply_tokens > 0 {
            self.reply_tokens -= 1;
            self.query_tokens += 1;
        }
        let bound = i32::try_from(self.config.cache_size).unwrap_or(i32::MAX);
        self.reply_tokens = self.reply_tokens.saturating_add(1).clamp(-bound, bound);
        self.query_tokens = if self.config.adaptive {
            self.query_tokens.saturating_add(1)
        } else {
            1
        };

        self.cache.age();

        // Unspent tokens never buy more than one query per peer of the view.
        let size = u32::try_from(self.cache.len()).unwrap_or(u32::MAX);
        self.query_tokens = self.query_tokens.min(size);

        let budget = self.query_tokens as usize;
        let mut contacted = Vec::with_capacity(budget);
        while contacted.len() < budget {
            let Some(entry) = self.cache.random_peer(0, &contacted) else {
                break;
            };
            let to = entry.id().clone();
            self.exchange
                .query(&self.cache, &to, TOPOLOGY, NCAST_QUERY, &[], 0)?;
            contacted.push(to);
        }
        self.query_tokens -= contacted.len() as u32;
        tracing::debug!(queries = contacted.len(), "Cycle complete");

        if self.config.slowstart && !self.bootstrap {
            self.steady_period = (self.steady_period * 2).min(self.config.period);
        }
        Ok(())
    }
}

impl<I: NodeId> PeerSampler for Ncast<I> {
    type Id = I;

    fn add_neighbour(&mut self, id: I, metadata: &[u8]) -> Result<(), Error> {
        if id == *self.exchange.local_id() {
            return Err(CacheError::AlreadyPresent.into());
        }
        self.cache.add(id.clone(), metadata)?;
        if let Err(e) = self
            .exchange
            .query(&self.cache, &id, TOPOLOGY, NCAST_QUERY, &[], 0)
        {
            self.cache.remove(&id);
            return Err(e);
        }
        if self.config.restart && self.bootstrap_peer.is_none() {
            self.bootstrap_peer = self
                .cache
                .iter()
                .find(|e| *e.id() == id)
                .map(|e| (id.clone(), e.metadata().into()));
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

#[cfg(test)]
mod tests {
    use super::*;
    use multiaddr::Protocol;
    use std::collections::HashSet;

    fn peer(n: u64) -> Multiaddr {
        Multiaddr::empty().with(Protocol::Memory(n))
    }

    fn drain(ncast: &mut Ncast) -> Vec<Outbound<Multiaddr>> {
        std::iter::from_fn(|| ncast.poll_outbound()).collect()
    }

    fn steady(config: Config) -> Config {
        Config {
            bootstrap_cycles: 0,
            max_age: 0,
            ..config
        }
    }

    #[test]
    fn entries_expire_with_age() {
        let start = Instant::now();
        let config = Config {
            max_age: 3,
            bootstrap_period: Duration::from_secs(1),
            ..Config::default()
        };
        let mut ncast = Ncast::new(peer(0), &[], config).unwrap();
        let (e1, e2) = (peer(1), peer(2));

        ncast.add_neighbour(e1.clone(), &[]).unwrap();
        ncast.parse_data(&[], start).unwrap();
        ncast.parse_data(&[], start + Duration::from_secs(1)).unwrap();
        assert_eq!(ncast.view().get(0).unwrap().age(), 3);

        ncast.add_neighbour(e2.clone(), &[]).unwrap();
        ncast.parse_data(&[], start + Duration::from_secs(2)).unwrap();

        assert_eq!(ncast.neighbourhood(), vec![e2]);
        assert!(!ncast.view().contains(&e1));
    }

    #[test]
    fn query_is_answered_with_own_entry() {
        let now = Instant::now();
        let mut alice = Ncast::new(peer(1), &[], steady(Config::default())).unwrap();
        let mut bob = Ncast::new(peer(2), &[], steady(Config::default())).unwrap();
        bob.add_neighbour(peer(3), &[]).unwrap();
        drain(&mut bob);

        alice.add_neighbour(peer(2), &[]).unwrap();
        let query = alice.poll_outbound().unwrap();
        assert_eq!(query.to, peer(2));

        bob.parse_data(&query.data, now).unwrap();
        assert!(bob.view().contains(&peer(1)));
        assert!(!bob.view().contains(&peer(2)));
        assert_eq!(bob.reply_tokens, 0);

        let reply = drain(&mut bob).into_iter().find(|o| o.to == peer(1)).unwrap();
        let message = Message::<Multiaddr>::decode(&reply.data, TOPOLOGY).unwrap();
        assert_eq!(message.header.msg_type, NCAST_REPLY);
        assert_eq!(message.cache.get(0).unwrap().id(), &peer(2));

        alice.parse_data(&reply.data, now).unwrap();
        assert!(alice.view().contains(&peer(3)));
        assert!(!alice.view().contains(&peer(1)));
    }

    #[test]
    fn bootstrap_inflates_own_age() {
        let config = Config {
            max_age: 8,
            bootstrap_cycles: 2,
            ..Config::default()
        };
        let now = Instant::now();
        let mut alice = Ncast::new(peer(1), &[], config).unwrap();
        assert_eq!(alice.exchange.my_entry().get(0).unwrap().age(), 4);

        let mut bob = Ncast::new(peer(2), &[], steady(Config::default())).unwrap();
        for _ in 0..2 {
            assert!(alice.is_bootstrapping());
            bob.remove_neighbour(&peer(1)).ok();
            bob.add_neighbour(peer(1), &[]).unwrap();
            let query = bob.poll_outbound().unwrap();
            alice.parse_data(&query.data, now).unwrap();
        }

        assert!(!alice.is_bootstrapping());
        assert_eq!(alice.exchange.my_entry().get(0).unwrap().age(), FRESH_AGE);
    }

    #[test]
    fn adaptive_converts_reply_tokens() {
        let start = Instant::now();
        let config = steady(Config {
            adaptive: true,
            ..Config::default()
        });
        let mut ncast = Ncast::new(peer(0), &[], config).unwrap();
        for n in 1..=5 {
            ncast.add_neighbour(peer(n), &[]).unwrap();
        }
        drain(&mut ncast);

        ncast.parse_data(&[], start).unwrap();
        assert_eq!(drain(&mut ncast).len(), 1);

        ncast.parse_data(&[], start + Duration::from_secs(10)).unwrap();
        let queries = drain(&mut ncast);
        assert_eq!(queries.len(), 2);
        let destinations: HashSet<_> = queries.iter().map(|q| q.to.clone()).collect();
        assert_eq!(destinations.len(), 2);
    }

    #[test]
    fn one_query_per_cycle_without_adaptive() {
        let start = Instant::now();
        let mut ncast = Ncast::new(peer(0), &[], steady(Config::default())).unwrap();
        for n in 1..=5 {
            ncast.add_neighbour(peer(n), &[]).unwrap();
        }
        drain(&mut ncast);

        for i in 0..3 {
            ncast
                .parse_data(&[], start + Duration::from_secs(10 * i))
                .unwrap();
            assert_eq!(drain(&mut ncast).len(), 1);
        }
    }

    #[test]
    fn restart_re_adds_bootstrap_peer() {
        let config = steady(Config {
            restart: true,
            ..Config::default()
        });
        let mut ncast = Ncast::new(peer(0), &[], config).unwrap();
        ncast.add_neighbour(peer(1), &[]).unwrap();
        ncast.add_neighbour(peer(2), &[]).unwrap();
        ncast.remove_neighbour(&peer(1)).unwrap();

        ncast.parse_data(&[], Instant::now()).unwrap();
        assert!(ncast.view().contains(&peer(1)));
    }

    #[test]
    fn slowstart_doubles_period() {
        let start = Instant::now();
        let config = steady(Config {
            slowstart: true,
            bootstrap_period: Duration::from_secs(1),
            period: Duration::from_secs(4),
            ..Config::default()
        });
        let mut ncast = Ncast::new(peer(0), &[], config).unwrap();
        ncast.add_neighbour(peer(1), &[]).unwrap();
        drain(&mut ncast);

        let mut fired = Vec::new();
        for s in 0..=8 {
            ncast.parse_data(&[], start + Duration::from_secs(s)).unwrap();
            if !drain(&mut ncast).is_empty() {
                fired.push(s);
            }
        }
        assert_eq!(fired, vec![0, 1, 3, 7]);
    }

    #[test]
    fn merge_prefers_fresh_entries() {
        let config = steady(Config {
            cache_size: 2,
            ..Config::default()
        });
        let mut ncast = Ncast::new(peer(0), &[], config).unwrap();
        ncast.add_neighbour(peer(1), &[]).unwrap();
        ncast.add_neighbour(peer(2), &[]).unwrap();
        ncast.cache.age();

        let mut received = PeerCache::new(3, 0, 0);
        received.add(peer(3), &[]).unwrap();
        received.add(peer(0), &[]).unwrap();
        ncast.merge(received).unwrap();

        assert_eq!(ncast.view().len(), 2);
        assert_eq!(ncast.view().get(0).unwrap().id(), &peer(3));
        assert!(!ncast.view().contains(&peer(0)));
    }

    #[test]
    fn parse_config() {
        let config: Config = "cache_size=30,adaptive=1,restart=1,bootstrap_cycles=3,max_age=7"
            .parse()
            .unwrap();
        assert_eq!(config.cache_size, 30);
        assert!(config.adaptive && config.restart);
        assert!(!config.randomize);
        assert_eq!(config.bootstrap_cycles, 3);
        assert_eq!(config.max_age, 7);
        assert!("adaptive=maybe".parse::<Config>().is_err());
    }

    fn udp_peer(n: u16) -> Multiaddr {
        format!("/ip4/10.0.{}.{}/udp/4000", n / 256, n % 256)
            .parse()
            .unwrap()
    }

    #[test]
    fn large_udp_view_fits_datagrams() {
        let now = Instant::now();
        let config = steady(Config {
            cache_size: 100,
            ..Config::default()
        });
        let local: Multiaddr = "/ip4/10.1.0.1/udp/4000".parse().unwrap();
        let mut ncast = Ncast::new(local.clone(), &[0; 4], config).unwrap();
        for n in 0..100 {
            ncast.add_neighbour(udp_peer(n), &[1; 4]).unwrap();
        }
        assert_eq!(ncast.view().len(), 100);
        assert!(drain(&mut ncast)
            .iter()
            .all(|o| o.data.len() <= exchange::DATAGRAM_BUDGET));

        ncast.parse_data(&[], now).unwrap();
        let queries = drain(&mut ncast);
        assert_eq!(queries.len(), 1);
        let message = Message::<Multiaddr>::decode(&queries[0].data, TOPOLOGY).unwrap();
        assert!(queries[0].data.len() <= exchange::DATAGRAM_BUDGET);
        assert_eq!(message.cache.get(0).unwrap().id(), &local);
        assert!(message.cache.len() > 1 && message.cache.len() < 100);

        // A query from a newcomer is answered and merged.
        let mut newcomer = Ncast::new(udp_peer(500), &[2; 4], steady(Config::default())).unwrap();
        newcomer.add_neighbour(local.clone(), &[0; 4]).unwrap();
        let query = newcomer.poll_outbound().unwrap();
        ncast.parse_data(&query.data, now).unwrap();
        assert!(ncast.view().contains(&udp_peer(500)));
        let reply = drain(&mut ncast).into_iter().find(|o| o.to == udp_peer(500)).unwrap();
        assert!(reply.data.len() <= exchange::DATAGRAM_BUDGET);
    }

    #[test]
    fn adaptive_tokens_are_capped_by_view_size() {
        let start = Instant::now();
        let config = steady(Config {
            adaptive: true,
            ..Config::default()
        });
        let mut ncast = Ncast::new(peer(0), &[], config).unwrap();
        for i in 0..50 {
            ncast
                .parse_data(&[], start + Duration::from_secs(10 * i))
                .unwrap();
        }
        assert_eq!(ncast.query_tokens, 0);

        for n in 1..=5 {
            ncast.add_neighbour(peer(n), &[]).unwrap();
        }
        drain(&mut ncast);
        for i in 50..60 {
            ncast
                .parse_data(&[], start + Duration::from_secs(10 * i))
                .unwrap();
            let queries = drain(&mut ncast).len();
            assert!((1..=2).contains(&queries), "{queries} queries");
        }
    }

    #[test]
    fn failed_bootstrap_query_leaves_view_untouched() {
        let config = steady(Config {
            restart: true,
            max_message_size: 16,
            ..Config::default()
        });
        let mut ncast = Ncast::new(peer(0), &[], config).unwrap();
        assert!(ncast.add_neighbour(peer(1), &[]).is_err());
        assert!(ncast.view().is_empty());
        assert!(ncast.bootstrap_peer.is_none());
        assert!(ncast.poll_outbound().is_none());
    }

    #[test]
    fn query_without_sender_leaves_tokens_untouched() {
        let mut ncast = Ncast::new(peer(0), &[], steady(Config::default())).unwrap();
        let data = [TOPOLOGY, NCAST_QUERY, 0, 0, 0, 1, 0, 0, 0, 0];
        assert!(ncast.parse_data(&data, Instant::now()).is_err());
        // The tick that ran afterwards earned one reply token and nothing was spent.
        assert_eq!(ncast.reply_tokens, 1);
    }
}
