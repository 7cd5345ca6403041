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

use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet, VecDeque},
    time::{Duration, Instant},
};

use libp2p_peer_sampling::{cyclon, ncast, tman, Cyclon, Ncast, PeerSampler, TMan};
use multiaddr::{Multiaddr, Protocol};
use tracing_subscriber::EnvFilter;

type Node = Box<dyn PeerSampler<Id = Multiaddr>>;

fn peer(n: u64) -> Multiaddr {
    Multiaddr::empty().with(Protocol::Memory(n))
}

/// Nodes exchanging datagrams instantly and without loss.
struct Simulation {
    nodes: Vec<Node>,
    index: HashMap<Multiaddr, usize>,
    now: Instant,
}

impl Simulation {
    fn new(nodes: Vec<Node>) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init();

        let index = (0..nodes.len()).map(|i| (peer(i as u64), i)).collect();
        Simulation {
            nodes,
            index,
            now: Instant::now(),
        }
    }

    /// Advances the clock by one second, lets every node run its cycle if due and delivers
    /// everything sent.
    fn round(&mut self) {
        for node in self.nodes.iter_mut() {
            node.parse_data(&[], self.now).unwrap();
        }
        self.deliver();
        self.now += Duration::from_secs(1);
    }

    fn run(&mut self, rounds: usize) {
        for _ in 0..rounds {
            self.round();
        }
    }

    fn deliver(&mut self) {
        let mut queue = VecDeque::new();
        loop {
            for node in self.nodes.iter_mut() {
                queue.extend(std::iter::from_fn(|| node.poll_outbound()));
            }
            let Some(message) = queue.pop_front() else {
                return;
            };
            let to = self.index[&message.to];
            self.nodes[to].parse_data(&message.data, self.now).unwrap();
        }
    }

    fn assert_views_sound(&self, max_len: usize) {
        for (i, node) in self.nodes.iter().enumerate() {
            let view = node.neighbourhood();
            assert!(view.len() <= max_len, "node {i} holds {} peers", view.len());
            assert!(!view.contains(&peer(i as u64)), "node {i} knows itself");
            let unique: HashSet<_> = view.iter().collect();
            assert_eq!(unique.len(), view.len(), "node {i} has duplicates");
            assert_eq!(node.metadata().len(), view.len());
        }
    }

    /// `true` if every node can be reached from node 0 following the views.
    fn is_connected(&self) -> bool {
        let mut seen = HashSet::from([0]);
        let mut todo = vec![0];
        while let Some(i) = todo.pop() {
            for id in self.nodes[i].neighbourhood() {
                let j = self.index[&id];
                if seen.insert(j) {
                    todo.push(j);
                }
            }
        }
        seen.len() == self.nodes.len()
    }
}

/// Every node initially knows the next one.
fn bootstrap_chain(nodes: &mut [Node]) {
    let n = nodes.len() as u64;
    for (i, node) in nodes.iter_mut().enumerate() {
        let next = (i as u64 + 1) % n;
        node.add_neighbour(peer(next), &[next as u8]).unwrap();
    }
}

fn cyclon_node(i: u64, cache_size: usize) -> Cyclon {
    let config = cyclon::Config {
        cache_size,
        sent_entries: cache_size / 2,
        period: Duration::from_secs(2),
        bootstrap_period: Duration::from_secs(1),
        ..cyclon::Config::default()
    };
    Cyclon::new(peer(i), &[i as u8], config).unwrap()
}

#[test]
fn cyclon_overlay() {
    let mut nodes: Vec<Node> = (0..20).map(|i| Box::new(cyclon_node(i, 6)) as Node).collect();
    bootstrap_chain(&mut nodes);
    let mut simulation = Simulation::new(nodes);

    simulation.run(60);

    simulation.assert_views_sound(6);
    assert!(simulation.is_connected());
    for node in &simulation.nodes {
        assert!(node.neighbourhood().len() >= 3);
    }
}

#[test]
fn ncast_overlay() {
    let config = ncast::Config {
        cache_size: 6,
        max_age: 8,
        adaptive: true,
        restart: true,
        randomize: true,
        ..ncast::Config::default()
    };
    let mut nodes: Vec<Node> = (0..20)
        .map(|i| Box::new(Ncast::new(peer(i), &[i as u8], config.clone()).unwrap()) as Node)
        .collect();
    bootstrap_chain(&mut nodes);
    let mut simulation = Simulation::new(nodes);

    simulation.run(120);

    simulation.assert_views_sound(6);
    assert!(simulation.is_connected());
    // Views are kept filled with fresh entries.
    for node in &simulation.nodes {
        assert!(node.neighbourhood().len() >= 3);
        assert!(node.view().iter().all(|e| e.age() <= 8));
    }
}

const RING: u8 = 16;

fn ring_distance(a: u8, b: u8) -> u8 {
    let d = a.abs_diff(b);
    d.min(RING - d)
}

fn ring(target: &[u8], a: &[u8], b: &[u8]) -> Ordering {
    ring_distance(target[0], a[0]).cmp(&ring_distance(target[0], b[0]))
}

#[test]
fn tman_builds_a_ring() {
    let config = tman::Config {
        cache_size: 4,
        idle_time: 100,
        ..tman::Config::default()
    };
    let mut nodes: Vec<Node> = (0..RING as u64)
        .map(|i| {
            let tman = TMan::new(
                peer(i),
                &[i as u8],
                ring as fn(&[u8], &[u8], &[u8]) -> Ordering,
                cyclon_node(i, 6),
                config.clone(),
            )
            .unwrap();
            Box::new(tman) as Node
        })
        .collect();
    bootstrap_chain(&mut nodes);
    let mut simulation = Simulation::new(nodes);

    simulation.run(60);

    simulation.assert_views_sound(4);
    let converged = simulation
        .nodes
        .iter()
        .enumerate()
        .filter(|(i, node)| {
            let i = *i as u64;
            let view = node.neighbourhood();
            let n = u64::from(RING);
            view.contains(&peer((i + 1) % n)) && view.contains(&peer((i + n - 1) % n))
        })
        .count();
    assert!(converged >= RING as usize - 2, "{converged} nodes converged");
}

#[test]
fn tman_grows_its_neighbourhood() {
    let config = tman::Config {
        cache_size: 2,
        idle_time: 100,
        ..tman::Config::default()
    };
    let mut nodes: Vec<Node> = (0..RING as u64)
        .map(|i| {
            let tman = TMan::new(
                peer(i),
                &[i as u8],
                ring as fn(&[u8], &[u8], &[u8]) -> Ordering,
                cyclon_node(i, 6),
                config.clone(),
            )
            .unwrap();
            Box::new(tman) as Node
        })
        .collect();
    bootstrap_chain(&mut nodes);
    let mut simulation = Simulation::new(nodes);
    simulation.run(5);

    assert_eq!(simulation.nodes[0].grow_neighbourhood(4).unwrap(), 6);
    simulation.run(40);

    assert_eq!(simulation.nodes[0].view().capacity(), 6);
    assert_eq!(simulation.nodes[0].neighbourhood().len(), 6);
}
