//! Size and count caps for bundles.
//!
//! Items are admitted in groups (one entity's data and metadata items
//! travel together) and groups are never reordered. A group that reaches
//! the byte cap on its own is never packed with anything else.

use crate::config::BundleConfig;
use crate::ledger::data_item::BUNDLE_HEADER_LEN;

/// Bytes every bundle spends before its first item.
const HEADER_BYTES: u64 = BUNDLE_HEADER_LEN as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleLimits {
    pub max_bytes: u64,
    pub max_items: usize,
}

impl From<&BundleConfig> for BundleLimits {
    fn from(config: &BundleConfig) -> Self {
        Self {
            max_bytes: config.max_bytes,
            max_items: config.max_items.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The group fits in the open bundle.
    Accepted,
    /// The open bundle must be finalized first; the group starts the next one.
    Full,
    /// The group must be sent in a bundle of its own.
    Solitary,
}

/// The open bundle: groups accepted so far and their totals. The byte
/// total includes the bundle header, so it is the encoded bundle size.
#[derive(Debug)]
pub struct BundleAccumulator<T> {
    limits: BundleLimits,
    groups: Vec<T>,
    bytes: u64,
    items: usize,
}

impl<T> BundleAccumulator<T> {
    pub fn new(limits: BundleLimits) -> Self {
        Self {
            limits,
            groups: Vec::new(),
            bytes: HEADER_BYTES,
            items: 0,
        }
    }

    pub fn limits(&self) -> BundleLimits {
        self.limits
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn items(&self) -> usize {
        self.items
    }

    /// Where a group of `items` items totalling `bytes` would go.
    pub fn admission(&self, bytes: u64, items: usize) -> Admission {
        if HEADER_BYTES + bytes >= self.limits.max_bytes {
            Admission::Solitary
        } else if self.is_empty() {
            Admission::Accepted
        } else if self.bytes + bytes > self.limits.max_bytes
            || self.items + items > self.limits.max_items
        {
            Admission::Full
        } else {
            Admission::Accepted
        }
    }

    pub fn push(&mut self, group: T, bytes: u64, items: usize) {
        self.groups.push(group);
        self.bytes += bytes;
        self.items += items;
    }

    /// Close the open bundle and start an empty one.
    pub fn take(&mut self) -> Vec<T> {
        self.bytes = HEADER_BYTES;
        self.items = 0;
        std::mem::take(&mut self.groups)
    }
}

/// Split groups, given as `(bytes, items)`, into bundles of group indices.
pub fn plan_bundles(groups: &[(u64, usize)], limits: BundleLimits) -> Vec<Vec<usize>> {
    let mut bundles = Vec::new();
    let mut open = BundleAccumulator::new(limits);

    for (index, &(bytes, items)) in groups.iter().enumerate() {
        match open.admission(bytes, items) {
            Admission::Accepted => open.push(index, bytes, items),
            Admission::Full => {
                bundles.push(open.take());
                open.push(index, bytes, items);
            }
            Admission::Solitary => {
                if !open.is_empty() {
                    bundles.push(open.take());
                }
                bundles.push(vec![index]);
            }
        }
    }
    if !open.is_empty() {
        bundles.push(open.take());
    }
    bundles
}
