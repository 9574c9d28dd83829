//! Upload cost estimation.
//!
//! Cost is quoted by a price oracle in winston for a byte count. Each file
//! is charged a fixed header overhead on top of its data, and a community
//! tip is added to the data cost.

use crate::config::PriceConfig;
use crate::error::Result;
use crate::ledger::Winston;
use crate::store::{StoreQueries, SyncStore};
use async_trait::async_trait;
use indicatif::HumanBytes;
use rand::Rng;
use tracing::{debug, info};

#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn winston_for_bytes(&self, bytes: u64) -> Result<Winston>;
}

/// Recipient of a tip, weighted by token balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHolder {
    pub address: String,
    pub weight: u64,
}

#[async_trait]
pub trait TipOracle: Send + Sync {
    async fn community_tip(&self, cost: Winston) -> Result<Winston>;
    async fn select_token_holder(&self) -> Result<Option<TokenHolder>>;
}

#[async_trait]
pub trait FiatOracle: Send + Sync {
    /// Price of one AR in `currency`.
    async fn ar_price(&self, currency: &str) -> Result<f64>;
}

// =============================================================================
// Community tip
// =============================================================================

/// Tip of `rate` times the cost, never below `minimum`, paid to a holder
/// drawn with probability proportional to their weight.
#[derive(Debug, Clone)]
pub struct CommunityTip {
    rate: f64,
    minimum: Winston,
    holders: Vec<TokenHolder>,
}

impl Default for CommunityTip {
    fn default() -> Self {
        Self::new(0.15, Winston(10_000_000), Vec::new())
    }
}

impl CommunityTip {
    pub fn new(rate: f64, minimum: Winston, holders: Vec<TokenHolder>) -> Self {
        Self {
            rate,
            minimum,
            holders,
        }
    }

    pub fn tip_for(&self, cost: Winston) -> Winston {
        let scaled = (cost.0 as f64 * self.rate).floor() as u64;
        Winston(scaled.max(self.minimum.0))
    }

    pub fn select_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<TokenHolder> {
        let total: u64 = self.holders.iter().map(|h| h.weight).sum();
        if total == 0 {
            return None;
        }
        let mut pick = rng.gen_range(0..total);
        for holder in &self.holders {
            if pick < holder.weight {
                return Some(holder.clone());
            }
            pick -= holder.weight;
        }
        None
    }
}

#[async_trait]
impl TipOracle for CommunityTip {
    async fn community_tip(&self, cost: Winston) -> Result<Winston> {
        Ok(self.tip_for(cost))
    }

    async fn select_token_holder(&self) -> Result<Option<TokenHolder>> {
        Ok(self.select_with(&mut rand::thread_rng()))
    }
}

// =============================================================================
// Estimation
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostEstimate {
    pub data: Winston,
    pub tip: Winston,
}

impl CostEstimate {
    pub fn total(&self) -> Winston {
        self.data.saturating_add(self.tip)
    }

    pub fn ar(&self) -> f64 {
        self.total().to_ar()
    }
}

/// Summary of the next upload batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEstimate {
    pub files: usize,
    pub metadata_only: usize,
    pub folders: usize,
    /// Files left for a later batch because the byte cap was reached.
    pub deferred: usize,
    /// Queue entries removed because their local path is gone.
    pub purged: usize,
    pub data_bytes: u64,
    pub data_cost: CostEstimate,
    pub metadata_cost: Winston,
    pub fiat: Option<f64>,
}

impl BatchEstimate {
    pub fn total(&self) -> Winston {
        self.data_cost.total().saturating_add(self.metadata_cost)
    }

    pub fn total_ar(&self) -> f64 {
        self.total().to_ar()
    }

    pub fn human_size(&self) -> String {
        HumanBytes(self.data_bytes).to_string()
    }

    pub fn is_empty(&self) -> bool {
        self.files == 0 && self.metadata_only == 0 && self.folders == 0
    }
}

pub struct PriceEstimator<'a> {
    price: &'a dyn PriceOracle,
    tip: &'a dyn TipOracle,
    fiat: Option<&'a dyn FiatOracle>,
    config: &'a PriceConfig,
}

impl<'a> PriceEstimator<'a> {
    pub fn new(price: &'a dyn PriceOracle, tip: &'a dyn TipOracle, config: &'a PriceConfig) -> Self {
        Self {
            price,
            tip,
            fiat: None,
            config,
        }
    }

    pub fn with_fiat(mut self, fiat: &'a dyn FiatOracle) -> Self {
        self.fiat = Some(fiat);
        self
    }

    /// Cost of uploading `file_count` files totalling `bytes`.
    pub async fn estimate_cost(&self, bytes: u64, file_count: u64) -> Result<CostEstimate> {
        let billed = bytes.saturating_add(file_count.saturating_mul(self.config.header_overhead_bytes));
        let data = self.price.winston_for_bytes(billed).await?;
        let tip = self.tip.community_tip(data).await?;
        debug!(bytes, file_count, billed, %data, %tip, "priced upload");
        Ok(CostEstimate { data, tip })
    }

    /// Price the pending queue of `login`, purging entries whose local path
    /// no longer exists.
    pub async fn estimate_batch<S: SyncStore + ?Sized>(
        &self,
        store: &S,
        login: &str,
    ) -> Result<BatchEstimate> {
        let mut files = 0usize;
        let mut metadata_only = 0usize;
        let mut folders = 0usize;
        let mut deferred = 0usize;
        let mut data_bytes = 0u64;

        let purged = purge_stale(store, login)?;
        for entity in store.pending_entities(login)? {
            if !entity.is_file() {
                folders += 1;
            } else if entity.needs_data_upload() {
                if data_bytes + entity.size > self.config.max_batch_bytes {
                    deferred += 1;
                    continue;
                }
                data_bytes += entity.size;
                files += 1;
            } else {
                metadata_only += 1;
            }
        }

        let data_cost = if files > 0 {
            self.estimate_cost(data_bytes, files as u64).await?
        } else {
            CostEstimate {
                data: Winston::ZERO,
                tip: Winston::ZERO,
            }
        };
        let metadata_cost =
            Winston(self.config.metadata_cost_winston.saturating_mul((metadata_only + folders) as u64));

        let mut estimate = BatchEstimate {
            files,
            metadata_only,
            folders,
            deferred,
            purged,
            data_bytes,
            data_cost,
            metadata_cost,
            fiat: None,
        };
        if let Some(fiat) = self.fiat {
            estimate.fiat = Some(estimate.total_ar() * fiat.ar_price("USD").await?);
        }

        info!(
            login,
            files,
            folders,
            metadata_only,
            deferred,
            purged,
            size = %estimate.human_size(),
            ar = estimate.total_ar(),
            "estimated upload batch"
        );
        Ok(estimate)
    }
}

/// Delete pending entities whose local path has disappeared.
pub fn purge_stale<S: SyncStore + ?Sized>(store: &S, login: &str) -> Result<usize> {
    let mut purged = 0;
    for entity in store.pending_entities(login)? {
        if !entity.path.exists() {
            info!(path = %entity.path.display(), "removing vanished entity from upload queue");
            store.delete_entity(&entity.key())?;
            purged += 1;
        }
    }
    Ok(purged)
}


#[cfg(test)]
mod tests {
    use super::testing::LinearPrice;
    use super::*;
    use crate::model::{Drive, Entity, Privacy};
    use crate::store::MemoryStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    struct FixedFiat(f64);

    #[async_trait]
    impl FiatOracle for FixedFiat {
        async fn ar_price(&self, _currency: &str) -> Result<f64> {
            Ok(self.0)
        }
    }

    fn no_tip() -> CommunityTip {
        CommunityTip::new(0.0, Winston::ZERO, Vec::new())
    }

    #[tokio::test]
    async fn test_cost_includes_header_overhead() {
        let config = PriceConfig::default();
        let tip = no_tip();
        let estimator = PriceEstimator::new(&LinearPrice, &tip, &config);
        let cost = estimator.estimate_cost(1000, 2).await.unwrap();
        assert_eq!(cost.data, Winston(1000 + 2 * 3210));
        assert_eq!(cost.tip, Winston::ZERO);
    }

    #[tokio::test]
    async fn test_tip_is_added() {
        let config = PriceConfig::default();
        let tip = CommunityTip::new(0.1, Winston(5), Vec::new());
        let estimator = PriceEstimator::new(&LinearPrice, &tip, &config);
        let cost = estimator.estimate_cost(100_000 - 3210, 1).await.unwrap();
        assert_eq!(cost.data, Winston(100_000));
        assert_eq!(cost.tip, Winston(10_000));
        assert_eq!(cost.total(), Winston(110_000));
    }

    #[test]
    fn test_tip_floor() {
        let tip = CommunityTip::new(0.15, Winston(10_000_000), Vec::new());
        assert_eq!(tip.tip_for(Winston(100)), Winston(10_000_000));
        assert_eq!(tip.tip_for(Winston(1_000_000_000)), Winston(150_000_000));
    }

    #[test]
    fn test_holder_selection_is_weighted() {
        let tip = CommunityTip::new(
            0.1,
            Winston::ZERO,
            vec![
                TokenHolder { address: "a".into(), weight: 0 },
                TokenHolder { address: "b".into(), weight: 3 },
                TokenHolder { address: "c".into(), weight: 1 },
            ],
        );
        let mut rng = StdRng::seed_from_u64(7);
        let mut b = 0;
        for _ in 0..1000 {
            let holder = tip.select_with(&mut rng).unwrap();
            assert_ne!(holder.address, "a");
            if holder.address == "b" {
                b += 1;
            }
        }
        assert!((650..850).contains(&b), "b picked {} times", b);
        assert!(no_tip().select_with(&mut rng).is_none());
    }

    #[tokio::test]
    async fn test_batch_estimate_purges_and_caps() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let drive = Drive::new("alice", "D", Privacy::Public, dir.path().to_path_buf());
        store.put_drive(&drive).unwrap();
        store.put_entity(&drive.root_folder()).unwrap();

        let add_file = |name: &str, size: u64, on_disk: bool| {
            let path = dir.path().join(name);
            if on_disk {
                std::fs::write(&path, b"x").unwrap();
            }
            let mut e = Entity::new_file(&drive, drive.root_folder_id, path, name.into());
            e.size = size;
            store.put_entity(&e).unwrap();
            e
        };
        add_file("a.bin", 1_500_000_000, true);
        add_file("b.bin", 1_000_000_000, true);
        let gone = add_file("gone.bin", 10, false);
        let mut renamed = add_file("c.txt", 50, true);
        renamed.data_sync_status = Some(crate::model::SyncStatus::Confirmed);
        renamed.data_tx_id = Some(crate::ledger::TxId::from_signature(b"d"));
        store.put_entity(&renamed).unwrap();

        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        store
            .put_entity(&Entity::new_folder(&drive, Some(drive.root_folder_id), sub, "sub".into()))
            .unwrap();

        let config = PriceConfig::default();
        let tip = no_tip();
        let fiat = FixedFiat(10.0);
        let estimator = PriceEstimator::new(&LinearPrice, &tip, &config).with_fiat(&fiat);
        let estimate = estimator.estimate_batch(&store, "alice").await.unwrap();

        assert_eq!(estimate.purged, 1);
        assert!(store.entity(&gone.key()).unwrap().is_none());
        assert_eq!(estimate.files, 1);
        assert_eq!(estimate.deferred, 1);
        assert_eq!(estimate.data_bytes, 1_500_000_000);
        assert_eq!(estimate.metadata_only, 1);
        assert_eq!(estimate.folders, 1);
        assert_eq!(estimate.metadata_cost, Winston(2 * config.metadata_cost_winston));
        assert_eq!(
            estimate.total(),
            Winston(1_500_000_000 + 3210 + 2 * config.metadata_cost_winston)
        );
        let fiat_total = estimate.fiat.unwrap();
        assert!((fiat_total - estimate.total_ar() * 10.0).abs() < 1e-12);
        assert_eq!(estimate.human_size(), "1.40 GiB");
    }
}
