//! # Channel-Pair Registry
//!
//! Every (tx radio, tx channel, rx radio, rx channel) combination under test
//! gets its own [`Marker`]. Markers are derived from one seed per *transmit*
//! channel, so all pairs sharing a tx channel carry seed-identical markers and
//! the transmitter can send one marked signal that every receiver decodes.
//!
//! ```text
//!                 rx0/ch0   rx0/ch1   rx0/ch2
//!   tx0/ch0  ──►  seed A    seed A    seed A
//!   tx0/ch1  ──►  seed B    seed B    seed B
//!   tx1/ch0  ──►  seed C    seed C    seed C
//! ```
//!
//! Entries live in a flat table addressed by [`MarkerId`]; a hash index maps
//! each [`PairKey`] to its slot, giving O(1) lookups in both directions.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::marker::{Marker, MarkerParams};
use crate::types::{SyncError, SyncResult};

/// Seeds are drawn from `0 .. 2^32`.
pub const SEED_SPACE: u64 = 1 << 32;

/// One ordered transmit/receive channel combination (all zero-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    pub tx_radio: usize,
    pub tx_channel: usize,
    pub rx_radio: usize,
    pub rx_channel: usize,
}

impl PairKey {
    pub fn new(tx_radio: usize, tx_channel: usize, rx_radio: usize, rx_channel: usize) -> Self {
        Self {
            tx_radio,
            tx_channel,
            rx_radio,
            rx_channel,
        }
    }

    /// Filename prefix identifying this pair, e.g. `Tx0-1_Rx1-0_`.
    pub fn file_prefix(&self) -> String {
        format!(
            "Tx{}-{}_Rx{}-{}_",
            self.tx_radio, self.tx_channel, self.rx_radio, self.rx_channel
        )
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tx{}/ch{} → rx{}/ch{}",
            self.tx_radio, self.tx_channel, self.rx_radio, self.rx_channel
        )
    }
}

/// Slot of a marker in the registry table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerId(usize);

impl MarkerId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Draw `count` distinct seeds uniformly from `0 .. 2^32`.
pub fn draw_unique_seeds<R: Rng>(count: usize, rng: &mut R) -> Vec<u64> {
    let mut seen = HashSet::with_capacity(count);
    let mut seeds = Vec::with_capacity(count);
    while seeds.len() < count {
        let seed = rng.gen_range(0..SEED_SPACE);
        if seen.insert(seed) {
            seeds.push(seed);
        }
    }
    seeds
}

/// Marker assignment for every channel pair in a run.
#[derive(Debug, Clone)]
pub struct ChannelPairRegistry {
    entries: Vec<(PairKey, Marker)>,
    index: HashMap<PairKey, MarkerId>,
    /// Flat tx channel index of the first channel of each tx radio
    tx_offsets: Vec<usize>,
    tx_channels_per_radio: Vec<usize>,
    seeds: Vec<u64>,
}

impl ChannelPairRegistry {
    /// Build the registry.
    ///
    /// `seeds` holds one seed per tx channel in flat order (radio 0 channel 0,
    /// radio 0 channel 1, ..., radio 1 channel 0, ...). Seeds must be distinct.
    pub fn new(
        tx_channels_per_radio: &[usize],
        rx_channels_per_radio: &[usize],
        params: MarkerParams,
        seeds: &[u64],
    ) -> SyncResult<Self> {
        params.validate()?;

        let total_tx: usize = tx_channels_per_radio.iter().sum();
        let total_rx: usize = rx_channels_per_radio.iter().sum();
        if total_tx == 0 || total_rx == 0 {
            return Err(SyncError::Configuration(format!(
                "Registry needs at least one tx and one rx channel ({} tx, {} rx)",
                total_tx, total_rx
            )));
        }
        if seeds.len() != total_tx {
            return Err(SyncError::Configuration(format!(
                "Expected {} seeds (one per tx channel), got {}",
                total_tx,
                seeds.len()
            )));
        }
        let distinct: HashSet<u64> = seeds.iter().copied().collect();
        if distinct.len() != seeds.len() {
            return Err(SyncError::Configuration(
                "Marker seeds must be unique across tx channels".to_string(),
            ));
        }

        let mut tx_offsets = Vec::with_capacity(tx_channels_per_radio.len());
        let mut offset = 0;
        for &channels in tx_channels_per_radio {
            tx_offsets.push(offset);
            offset += channels;
        }

        let mut entries = Vec::with_capacity(total_tx * total_rx);
        let mut index = HashMap::with_capacity(total_tx * total_rx);
        for (rx_radio, &rx_channels) in rx_channels_per_radio.iter().enumerate() {
            for rx_channel in 0..rx_channels {
                for (tx_radio, &tx_channels) in tx_channels_per_radio.iter().enumerate() {
                    for tx_channel in 0..tx_channels {
                        let key = PairKey::new(tx_radio, tx_channel, rx_radio, rx_channel);
                        let seed = seeds[tx_offsets[tx_radio] + tx_channel];
                        index.insert(key, MarkerId(entries.len()));
                        entries.push((key, params.marker(seed)?));
                    }
                }
            }
        }

        tracing::debug!(
            pairs = entries.len(),
            tx_channels = total_tx,
            rx_channels = total_rx,
            "Channel-pair registry built"
        );

        Ok(Self {
            entries,
            index,
            tx_offsets,
            tx_channels_per_radio: tx_channels_per_radio.to_vec(),
            seeds: seeds.to_vec(),
        })
    }

    /// Build the registry with freshly drawn unique seeds.
    pub fn with_random_seeds<R: Rng>(
        tx_channels_per_radio: &[usize],
        rx_channels_per_radio: &[usize],
        params: MarkerParams,
        rng: &mut R,
    ) -> SyncResult<Self> {
        let total_tx = tx_channels_per_radio.iter().sum();
        let seeds = draw_unique_seeds(total_tx, rng);
        Self::new(tx_channels_per_radio, rx_channels_per_radio, params, &seeds)
    }

    /// Number of channel pairs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Marker assigned to a pair.
    pub fn marker(&self, key: &PairKey) -> Option<&Marker> {
        self.marker_id(key).map(|id| &self.entries[id.0].1)
    }

    pub fn marker_id(&self, key: &PairKey) -> Option<MarkerId> {
        self.index.get(key).copied()
    }

    /// Marker stored in a slot.
    pub fn marker_by_id(&self, id: MarkerId) -> Option<&Marker> {
        self.entries.get(id.0).map(|(_, marker)| marker)
    }

    /// Inverse lookup: the pair a marker slot belongs to.
    pub fn key_of(&self, id: MarkerId) -> Option<PairKey> {
        self.entries.get(id.0).map(|(key, _)| *key)
    }

    /// Flat index of a tx channel across all tx radios.
    pub fn tx_channel_index(&self, tx_radio: usize, tx_channel: usize) -> Option<usize> {
        let channels = *self.tx_channels_per_radio.get(tx_radio)?;
        if tx_channel < channels {
            Some(self.tx_offsets[tx_radio] + tx_channel)
        } else {
            None
        }
    }

    /// Seed shared by every pair of a tx channel.
    pub fn tx_seed(&self, tx_radio: usize, tx_channel: usize) -> Option<u64> {
        self.tx_channel_index(tx_radio, tx_channel)
            .map(|flat| self.seeds[flat])
    }

    /// All pairs with their markers, in registry order.
    pub fn iter(&self) -> impl Iterator<Item = (MarkerId, &PairKey, &Marker)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, (key, marker))| (MarkerId(i), key, marker))
    }

    /// Keys of all pairs, in registry order.
    pub fn keys(&self) -> impl Iterator<Item = &PairKey> {
        self.entries.iter().map(|(key, _)| key)
    }
}
