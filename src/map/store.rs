//! `Store<T>`: one fixed-size value per entity.
//!
//! The simplest container kind — node positions, per-cell scalars, ownership
//! colors. Values live in one contiguous buffer indexed by
//! `entity - domain.min()`; entities in domain holes keep default values and
//! are never iterated.

use crate::comm::wire::decode_records;
use crate::entity::{Entity, EntitySet};
use crate::map::container::Container;
use crate::map::Map;
use bytemuck::Pod;

/// Per-entity fixed-size storage over an [`EntitySet`] domain.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Store<T> {
    domain: EntitySet,
    base: Entity,
    values: Vec<T>,
}

impl<T: Clone + Default> Store<T> {
    /// Reserve storage for every entity in `domain`, default-initialized.
    pub fn allocate(domain: EntitySet) -> Self {
        let base = domain.min().unwrap_or(0);
        let span = domain
            .max()
            .map_or(0, |mx| (mx as i64 - base as i64 + 1) as usize);
        Store {
            domain,
            base,
            values: vec![T::default(); span],
        }
    }

    /// Drop all contents; the domain becomes empty.
    pub fn clear(&mut self) {
        self.domain = EntitySet::empty();
        self.base = 0;
        self.values.clear();
    }
}

impl<T> Store<T> {
    #[inline]
    pub fn domain(&self) -> &EntitySet {
        &self.domain
    }

    #[inline]
    fn slot(&self, e: Entity) -> usize {
        debug_assert!(
            self.domain.contains(e),
            "Store access outside domain: entity {e}"
        );
        (e - self.base) as usize
    }

    #[inline]
    pub fn get(&self, e: Entity) -> &T {
        &self.values[self.slot(e)]
    }

    #[inline]
    pub fn get_mut(&mut self, e: Entity) -> &mut T {
        let i = self.slot(e);
        &mut self.values[i]
    }

    #[inline]
    pub fn set(&mut self, e: Entity, v: T) {
        let i = self.slot(e);
        self.values[i] = v;
    }

    /// Iterate `(entity, value)` in ascending entity order.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> + '_ {
        self.domain.iter().map(move |e| (e, &self.values[(e - self.base) as usize]))
    }
}

impl<T: Clone> Store<T> {
    /// `self[e] = src[m[e]]` for every `e` in `context`.
    pub fn gather_from(&mut self, m: &Map, src: &Store<T>, context: &EntitySet) {
        for e in context.iter() {
            self.set(e, src.get(m.get(e)).clone());
        }
    }

    /// `self[m[e]] = src[e]` for every `e` in `context`.
    pub fn scatter_from(&mut self, m: &Map, src: &Store<T>, context: &EntitySet) {
        for e in context.iter() {
            self.set(m.get(e), src.get(e).clone());
        }
    }
}

impl<T: Pod + Default> Container for Store<T> {
    fn domain(&self) -> &EntitySet {
        &self.domain
    }

    fn pack_size(&self, sub: &EntitySet) -> usize {
        sub.size() * std::mem::size_of::<T>()
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
        let mut out = Store::allocate(domain);
        for (set, bytes) in chunks {
            let vals: Vec<T> = decode_records(bytes).unwrap_or_else(|e| {
                panic!("store unpack: {e}");
            });
            assert_eq!(
                vals.len(),
                set.size(),
                "store unpack: {} values for {} entities",
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
        let mut out = Store::allocate(new_domain);
        for e in self.domain.iter() {
            out.set(m.get(e), *self.get(e));
        }
        out
    }
}
