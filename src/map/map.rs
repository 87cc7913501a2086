//! `Map`: a single-valued total function from entities to entities.
//!
//! Every entity in the domain has exactly one target; a negative target is a
//! sentinel meaning "no neighbor / boundary". Storage is one contiguous
//! buffer indexed by `entity - domain.min()`.

use crate::comm::wire::decode_records;
use crate::entity::{Entity, EntitySet};
use crate::map::container::Container;
use crate::map::image_of_values;

/// Single-valued entity-to-entity function over an [`EntitySet`] domain.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Map {
    domain: EntitySet,
    base: Entity,
    values: Vec<Entity>,
}

impl Map {
    /// Reserve storage for every entity in `domain`, zero-initialized.
    pub fn allocate(domain: EntitySet) -> Self {
        let base = domain.min().unwrap_or(0);
        let span = domain
            .max()
            .map_or(0, |mx| (mx as i64 - base as i64 + 1) as usize);
        Map {
            domain,
            base,
            values: vec![0; span],
        }
    }

    /// Drop all contents; the domain becomes empty.
    pub fn clear(&mut self) {
        self.domain = EntitySet::empty();
        self.base = 0;
        self.values.clear();
    }

    #[inline]
    pub fn domain(&self) -> &EntitySet {
        &self.domain
    }

    #[inline]
    fn slot(&self, e: Entity) -> usize {
        debug_assert!(
            self.domain.contains(e),
            "Map access outside domain: entity {e}"
        );
        (e - self.base) as usize
    }

    #[inline]
    pub fn get(&self, e: Entity) -> Entity {
        self.values[self.slot(e)]
    }

    #[inline]
    pub fn set(&mut self, e: Entity, v: Entity) {
        let i = self.slot(e);
        self.values[i] = v;
    }

    /// Iterate `(entity, value)` in ascending entity order.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, Entity)> + '_ {
        self.domain
            .iter()
            .map(move |e| (e, self.values[(e - self.base) as usize]))
    }

    /// Sorted, deduplicated set of values over `context ∩ domain`.
    pub fn image(&self, context: &EntitySet) -> EntitySet {
        let ctx = context & &self.domain;
        let vals: Vec<Entity> = ctx.iter().map(|e| self.get(e)).collect();
        image_of_values(vals)
    }

    /// Entities whose value lies in `codomain`. For a single-valued map the
    /// exact and partial preimages coincide, so the pair holds two copies.
    pub fn preimage(&self, codomain: &EntitySet) -> (EntitySet, EntitySet) {
        let s: EntitySet = self
            .domain
            .iter()
            .filter(|&e| codomain.contains(self.get(e)))
            .collect();
        (s.clone(), s)
    }

    /// Rewrite every value in `context` through `translate`.
    ///
    /// Negative sentinel values pass through unchanged.
    ///
    /// # Panics
    /// Panics if a non-sentinel value is outside `translate`'s domain — a
    /// malformed translation map is a programming bug, not a recoverable
    /// condition.
    pub fn compose(&mut self, translate: &Map, context: &EntitySet) {
        for e in (context & &self.domain).iter() {
            let v = self.get(e);
            if v < 0 {
                continue;
            }
            if !translate.domain().contains(v) {
                panic!("compose: value {v} at entity {e} outside translation domain");
            }
            self.set(e, translate.get(v));
        }
    }

    /// `self[e] = src[m[e]]` for every `e` in `context`.
    pub fn gather_from(&mut self, m: &Map, src: &Map, context: &EntitySet) {
        for e in context.iter() {
            self.set(e, src.get(m.get(e)));
        }
    }

    /// `self[m[e]] = src[e]` for every `e` in `context`.
    pub fn scatter_from(&mut self, m: &Map, src: &Map, context: &EntitySet) {
        for e in context.iter() {
            self.set(m.get(e), src.get(e));
        }
    }
}

impl Container for Map {
    fn domain(&self) -> &EntitySet {
        &self.domain
    }

    fn pack_size(&self, sub: &EntitySet) -> usize {
        sub.size() * std::mem::size_of::<Entity>()
    }

    fn pack(&self, sub: &EntitySet, out: &mut Vec<u8>) {
        debug_assert!((sub - &self.domain).is_empty(), "pack subset outside domain");
        for &(lo, hi) in sub.intervals() {
            let a = (lo - self.base) as usize;
            let b = (hi - self.base) as usize;
            out.extend_from_slice(bytemuck::cast_slice(&self.values[a..=b]));
        }
    }

    fn unpack_concat(chunks: &[(EntitySet, Vec<u8>)]) -> Self {
        let mut domain = EntitySet::empty();
        for (set, _) in chunks {
            domain = &domain | set;
        }
        let mut out = Map::allocate(domain);
        for (set, bytes) in chunks {
            let vals: Vec<Entity> = decode_records(bytes).unwrap_or_else(|e| {
                panic!("map unpack: {e}");
            });
            assert_eq!(
                vals.len(),
                set.size(),
                "map unpack: {} values for {} entities",
                vals.len(),
                set.size()
            );
            for (e, v) in set.iter().zip(vals) {
                out.set(e, v);
            }
        }
        out
    }

    fn remap_domain(&self, m: &Map) -> Self {
        let new_domain = m.image(&self.domain);
        assert_eq!(
            new_domain.size(),
            self.domain.size(),
            "remap_domain: translation map is not injective on the domain"
        );
        let mut out = Map::allocate(new_domain);
        for e in self.domain.iter() {
            out.set(m.get(e), self.get(e));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_of(pairs: &[(Entity, Entity)]) -> Map {
        let dom: EntitySet = pairs.iter().map(|&(e, _)| e).collect();
        let mut m = Map::allocate(dom);
        for &(e, v) in pairs {
            m.set(e, v);
        }
        m
    }

    #[test]
    fn image_over_context() {
        let m = map_of(&[(0, 5), (1, 6), (2, 5), (3, 9)]);
        assert_eq!(
            m.image(&EntitySet::interval(0, 2)),
            EntitySet::from_intervals([(5, 6)])
        );
        // context wider than domain is fine
        assert_eq!(m.image(&EntitySet::interval(-10, 100)).size(), 3);
    }

    #[test]
    fn image_distributes_over_union() {
        let m = map_of(&[(0, 5), (1, 6), (2, 7), (3, 8)]);
        let a = EntitySet::from_intervals([(0, 1)]);
        let b = EntitySet::from_intervals([(2, 3)]);
        assert_eq!(m.image(&(&a | &b)), &m.image(&a) | &m.image(&b));
    }

    #[test]
    fn preimage_exact_equals_partial() {
        let m = map_of(&[(0, 5), (1, 6), (2, 5)]);
        let (exact, partial) = m.preimage(&EntitySet::singleton(5));
        assert_eq!(exact, partial);
        assert_eq!(exact, EntitySet::from_intervals([(0, 0), (2, 2)]));
    }

    #[test]
    fn compose_translates_values() {
        let mut m = map_of(&[(0, 10), (1, 11), (2, -3)]);
        let tr = map_of(&[(10, 100), (11, 101)]);
        m.compose(&tr, &EntitySet::interval(0, 2));
        assert_eq!(m.get(0), 100);
        assert_eq!(m.get(1), 101);
        // sentinel untouched
        assert_eq!(m.get(2), -3);
    }

    #[test]
    #[should_panic(expected = "outside translation domain")]
    fn compose_out_of_domain_is_fatal() {
        let mut m = map_of(&[(0, 10), (1, 42)]);
        let tr = map_of(&[(10, 100)]);
        m.compose(&tr, &EntitySet::interval(0, 1));
    }

    #[test]
    fn gather_and_scatter() {
        let src = map_of(&[(10, 7), (11, 8)]);
        let remap = map_of(&[(0, 10), (1, 11)]);
        let mut dst = Map::allocate(EntitySet::interval(0, 1));
        dst.gather_from(&remap, &src, &EntitySet::interval(0, 1));
        assert_eq!(dst.get(0), 7);
        assert_eq!(dst.get(1), 8);

        let mut back = Map::allocate(EntitySet::interval(10, 11));
        back.scatter_from(&remap, &dst, &EntitySet::interval(0, 1));
        assert_eq!(back.get(10), 7);
        assert_eq!(back.get(11), 8);
    }

    #[test]
    fn pack_unpack_restriction() {
        let m = map_of(&[(0, 4), (1, 5), (2, 6), (5, -1)]);
        let sub = EntitySet::from_intervals([(1, 2), (5, 5)]);
        let mut buf = Vec::new();
        m.pack(&sub, &mut buf);
        let t = Map::unpack_concat(&[(sub.clone(), buf)]);
        assert_eq!(t.domain(), &sub);
        assert_eq!(t.get(1), 5);
        assert_eq!(t.get(2), 6);
        assert_eq!(t.get(5), -1);
    }

    #[test]
    fn unpack_multiple_senders() {
        let a = map_of(&[(0, 100), (1, 101)]);
        let b = map_of(&[(5, 105)]);
        let mut ba = Vec::new();
        a.pack(&EntitySet::interval(0, 1), &mut ba);
        let mut bb = Vec::new();
        b.pack(&EntitySet::singleton(5), &mut bb);
        let t = Map::unpack_concat(&[
            (EntitySet::interval(0, 1), ba),
            (EntitySet::singleton(5), bb),
        ]);
        assert_eq!(t.domain().size(), 3);
        assert_eq!(t.get(5), 105);
    }

    #[test]
    fn serde_roundtrip() {
        let m = map_of(&[(3, 5), (4, -2)]);
        let bytes = bincode::serialize(&m).unwrap();
        let t: Map = bincode::deserialize(&bytes).unwrap();
        assert_eq!(m, t);
    }
}
