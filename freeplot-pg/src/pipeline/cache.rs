//! Cache LRU des couches décodées
//!
//! La clé est le contenu (hash blake3 des octets de la source), pas le chemin :
//! un fichier remplacé sur disque n'est jamais servi depuis le cache.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use lru::LruCache;
use shpfile::{CharacterEncoding, Layer};
use tracing::debug;

use super::source::LayerSpec;
use crate::error::Result;

/// (hash du contenu, encodage, CRS de repli)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub digest: [u8; 32],
    pub encoding: CharacterEncoding,
    pub fallback_crs: Option<String>,
}

pub struct LayerCache {
    inner: Mutex<LruCache<CacheKey, Arc<Layer>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LayerCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Couche décodée depuis le cache, ou lue puis insérée. Bloquant.
    pub fn get_or_load(&self, spec: &LayerSpec) -> Result<Arc<Layer>> {
        let payload = spec.load()?;
        let key = CacheKey {
            digest: *payload.digest().as_bytes(),
            encoding: spec.encoding,
            fallback_crs: spec.fallback_crs.as_ref().map(|c| c.to_string()),
        };

        if let Some(layer) = self.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(
                layer = %spec.name,
                digest = %hex::encode(&key.digest[..8]),
                "Layer served from cache"
            );
            // Même contenu, nom d'affichage éventuellement différent
            if layer.name == spec.name {
                return Ok(layer);
            }
            let mut renamed = (*layer).clone();
            renamed.name = spec.name.clone();
            return Ok(Arc::new(renamed));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let layer = Arc::new(spec.decode(&payload)?);
        debug!(
            layer = %spec.name,
            digest = %hex::encode(&key.digest[..8]),
            features = layer.len(),
            "Layer decoded"
        );
        self.insert(key, Arc::clone(&layer));
        Ok(layer)
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<Layer>> {
        let mut cache = self.inner.lock().ok()?;
        cache.get(key).cloned()
    }

    pub fn insert(&self, key: CacheKey, layer: Arc<Layer>) {
        if let Ok(mut cache) = self.inner.lock() {
            cache.put(key, layer);
        }
    }

    /// Retire toutes les entrées d'un contenu, quel que soit l'encodage
    pub fn invalidate(&self, digest: &[u8; 32]) -> usize {
        let Ok(mut cache) = self.inner.lock() else {
            return 0;
        };
        let stale: Vec<CacheKey> = cache
            .iter()
            .filter(|(key, _)| &key.digest == digest)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            cache.pop(key);
        }
        stale.len()
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.inner.lock() {
            cache.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (hits, misses)
    pub fn stats(&self) -> (u64, u64) {
        (self.hits.load(Ordering::Relaxed), self.misses.load(Ordering::Relaxed))
    }
}

impl std::fmt::Debug for LayerCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (hits, misses) = self.stats();
        f.debug_struct("LayerCache")
            .field("len", &self.len())
            .field("hits", &hits)
            .field("misses", &misses)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Geometry, LineString, Polygon};
    use shpfile::{Crs, Feature, OutputFormat};

    fn tar(x: f64) -> Vec<u8> {
        let mut layer = Layer::new("layer", Crs::WGS84, CharacterEncoding::Utf8);
        layer.features.push(Feature::new(
            1,
            Geometry::Polygon(Polygon::new(
                LineString::from(vec![(x, 0.0), (x + 1.0, 0.0), (x + 1.0, 1.0), (x, 0.0)]),
                vec![],
            )),
        ));
        shpfile::serialize(&layer, OutputFormat::Shapefile).unwrap()
    }

    #[test]
    fn test_hit_after_miss() {
        let cache = LayerCache::new(4);
        let spec = LayerSpec::from_bytes("zouit", tar(0.0), CharacterEncoding::Utf8);

        let first = cache.get_or_load(&spec).unwrap();
        let second = cache.get_or_load(&spec).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.stats(), (1, 1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_same_content_other_name() {
        let cache = LayerCache::new(4);
        let data = tar(0.0);
        cache
            .get_or_load(&LayerSpec::from_bytes("a", data.clone(), CharacterEncoding::Utf8))
            .unwrap();
        let b = cache
            .get_or_load(&LayerSpec::from_bytes("b", data, CharacterEncoding::Utf8))
            .unwrap();
        assert_eq!(b.name, "b");
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn test_encoding_is_part_of_key() {
        let cache = LayerCache::new(4);
        cache
            .get_or_load(&LayerSpec::from_bytes("a", tar(0.0), CharacterEncoding::Utf8))
            .unwrap();
        cache
            .get_or_load(&LayerSpec::from_bytes("a", tar(0.0), CharacterEncoding::Windows1251))
            .unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let cache = LayerCache::new(1);
        let a = tar(0.0);
        cache
            .get_or_load(&LayerSpec::from_bytes("a", a.clone(), CharacterEncoding::Utf8))
            .unwrap();
        cache
            .get_or_load(&LayerSpec::from_bytes("b", tar(5.0), CharacterEncoding::Utf8))
            .unwrap();
        assert_eq!(cache.len(), 1);
        cache
            .get_or_load(&LayerSpec::from_bytes("a", a, CharacterEncoding::Utf8))
            .unwrap();
        assert_eq!(cache.stats(), (0, 3));
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = LayerCache::new(4);
        let data = tar(0.0);
        let digest = *blake3::hash(&data).as_bytes();
        cache
            .get_or_load(&LayerSpec::from_bytes("a", data.clone(), CharacterEncoding::Utf8))
            .unwrap();
        cache
            .get_or_load(&LayerSpec::from_bytes("a", data, CharacterEncoding::Windows1251))
            .unwrap();
        cache
            .get_or_load(&LayerSpec::from_bytes("c", tar(9.0), CharacterEncoding::Utf8))
            .unwrap();

        assert_eq!(cache.invalidate(&digest), 2);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_still_works() {
        let cache = LayerCache::new(0);
        let spec = LayerSpec::from_bytes("a", tar(0.0), CharacterEncoding::Utf8);
        assert_eq!(cache.get_or_load(&spec).unwrap().len(), 1);
    }
}
