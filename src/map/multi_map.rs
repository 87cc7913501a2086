//! `MultiMap`: a multi-valued function from entities to entity sequences.
//!
//! Values live in one flat array behind a monotone offset index; the degree
//! of entity `i` is `offs[i+1] - offs[i]`. Face-to-node connectivity is the
//! canonical instance.

use crate::debug_invariants::DebugInvariants;
use crate::entity::{Entity, EntitySet};
use crate::map::container::Container;
use crate::map::image_of_values;
use crate::map::{Map, Store};
use crate::mesh_error::MeshDistError;

/// Multi-valued entity-to-entities function over an [`EntitySet`] domain.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MultiMap {
    domain: EntitySet,
    base: Entity,
    offs: Vec<usize>,
    values: Vec<Entity>,
}

impl MultiMap {
    /// Reserve storage with the per-entity element counts in `counts`.
    /// The counts' domain becomes this map's domain.
    pub fn allocate(counts: &Store<i32>) -> Self {
        let domain = counts.domain().clone();
        let base = domain.min().unwrap_or(0);
        let span = domain
            .max()
            .map_or(0, |mx| (mx as i64 - base as i64 + 1) as usize);
        let mut offs = vec![0usize; span + 1];
        for (e, &c) in counts.iter() {
            offs[(e - base) as usize + 1] = c.max(0) as usize;
        }
        for i in 1..offs.len() {
            offs[i] += offs[i - 1];
        }
        let total = *offs.last().unwrap_or(&0);
        let mm = MultiMap {
            domain,
            base,
            offs,
            values: vec![0; total],
        };
        mm.debug_assert_invariants();
        mm
    }

    /// Convenience constructor from explicit rows.
    pub fn from_rows<'a, I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (Entity, &'a [Entity])> + Clone,
    {
        let dom: EntitySet = rows.clone().into_iter().map(|(e, _)| e).collect();
        let mut counts = Store::allocate(dom);
        for (e, vals) in rows.clone() {
            counts.set(e, vals.len() as i32);
        }
        let mut mm = MultiMap::allocate(&counts);
        for (e, vals) in rows {
            mm.row_mut(e).copy_from_slice(vals);
        }
        mm
    }

    /// Drop all contents; the domain becomes empty.
    pub fn clear(&mut self) {
        self.domain = EntitySet::empty();
        self.base = 0;
        self.offs = vec![0];
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
            "MultiMap access outside domain: entity {e}"
        );
        (e - self.base) as usize
    }

    /// Number of values stored for `e`.
    #[inline]
    pub fn degree(&self, e: Entity) -> usize {
        let i = self.slot(e);
        self.offs[i + 1] - self.offs[i]
    }

    /// The value sequence of `e`.
    #[inline]
    pub fn row(&self, e: Entity) -> &[Entity] {
        let i = self.slot(e);
        &self.values[self.offs[i]..self.offs[i + 1]]
    }

    /// Mutable value sequence of `e`.
    #[inline]
    pub fn row_mut(&mut self, e: Entity) -> &mut [Entity] {
        let i = self.slot(e);
        let (a, b) = (self.offs[i], self.offs[i + 1]);
        &mut self.values[a..b]
    }

    /// Iterate `(entity, row)` in ascending entity order.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, &[Entity])> + '_ {
        self.domain.iter().map(move |e| {
            let i = (e - self.base) as usize;
            (e, &self.values[self.offs[i]..self.offs[i + 1]])
        })
    }

    /// Total number of stored values.
    #[inline]
    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    /// Sorted, deduplicated set of all values over `context ∩ domain`.
    pub fn image(&self, context: &EntitySet) -> EntitySet {
        let ctx = context & &self.domain;
        let mut vals = Vec::new();
        for e in ctx.iter() {
            vals.extend_from_slice(self.row(e));
        }
        image_of_values(vals)
    }

    /// Split the domain by how rows relate to `codomain`: `exact` holds
    /// entities whose *entire* row lies in `codomain` (vacuously true for
    /// empty rows), `partial` those with *any* value in it.
    pub fn preimage(&self, codomain: &EntitySet) -> (EntitySet, EntitySet) {
        let mut exact = Vec::new();
        let mut partial = Vec::new();
        for (e, row) in self.iter() {
            let mut all = true;
            let mut any = false;
            for &v in row {
                if codomain.contains(v) {
                    any = true;
                } else {
                    all = false;
                }
            }
            if all {
                exact.push(e);
            }
            if any {
                partial.push(e);
            }
        }
        (exact.into_iter().collect(), partial.into_iter().collect())
    }

    /// Rewrite every value in `context` through `translate`; negative
    /// sentinels pass through.
    ///
    /// # Panics
    /// Panics if a non-sentinel value is outside `translate`'s domain.
    pub fn compose(&mut self, translate: &Map, context: &EntitySet) {
        for e in (context & &self.domain).iter() {
            let i = self.slot(e);
            for k in self.offs[i]..self.offs[i + 1] {
                let v = self.values[k];
                if v < 0 {
                    continue;
                }
                if !translate.domain().contains(v) {
                    panic!("compose: value {v} at entity {e} outside translation domain");
                }
                self.values[k] = translate.get(v);
            }
        }
    }

    pub(crate) fn offsets(&self) -> &[usize] {
        &self.offs
    }

    pub(crate) fn values_mut(&mut self) -> &mut [Entity] {
        &mut self.values
    }

    pub(crate) fn base(&self) -> Entity {
        self.base
    }
}

impl DebugInvariants for MultiMap {
    fn debug_assert_invariants(&self) {
        crate::dist_debug_assert_ok!(self.validate_invariants(), "MultiMap invalid");
    }

    fn validate_invariants(&self) -> Result<(), MeshDistError> {
        self.domain.validate_invariants()?;
        for w in self.offs.windows(2) {
            if w[1] < w[0] {
                return Err(MeshDistError::MalformedWire(format!(
                    "non-monotone offsets {} > {}",
                    w[0], w[1]
                )));
            }
        }
        if self.offs.last().copied().unwrap_or(0) != self.values.len() {
            return Err(MeshDistError::MalformedWire(
                "offset array does not cover value array".into(),
            ));
        }
        Ok(())
    }
}

impl Container for MultiMap {
    fn domain(&self) -> &EntitySet {
        &self.domain
    }

    fn pack_size(&self, sub: &EntitySet) -> usize {
        let mut total = 0usize;
        for e in sub.iter() {
            total += std::mem::size_of::<u32>() + self.degree(e) * std::mem::size_of::<Entity>();
        }
        total
    }

    fn pack(&self, sub: &EntitySet, out: &mut Vec<u8>) {
        debug_assert!((sub - &self.domain).is_empty(), "pack subset outside domain");
        for e in sub.iter() {
            let row = self.row(e);
            out.extend_from_slice(&(row.len() as u32).to_ne_bytes());
            out.extend_from_slice(bytemuck::cast_slice(row));
        }
    }

    fn unpack_concat(chunks: &[(EntitySet, Vec<u8>)]) -> Self {
        let mut domain = EntitySet::empty();
        for (set, _) in chunks {
            domain = &domain | set;
        }
        // First pass: degrees, so the offset array can be sized exactly.
        let mut counts: Store<i32> = Store::allocate(domain);
        for (set, bytes) in chunks {
            let mut pos = 0usize;
            for e in set.iter() {
                let deg = read_count(bytes, &mut pos);
                pos += deg * std::mem::size_of::<Entity>();
                counts.set(e, deg as i32);
            }
            assert!(
                pos == bytes.len(),
                "multiMap unpack: bytes left over ({pos} consumed of {}, {} entities)",
                bytes.len(),
                set.size()
            );
        }
        // Second pass: fill rows.
        let mut out = MultiMap::allocate(&counts);
        for (set, bytes) in chunks {
            let mut pos = 0usize;
            for e in set.iter() {
                let deg = read_count(bytes, &mut pos);
                let row = out.row_mut(e);
                debug_assert_eq!(row.len(), deg);
                for slot in row.iter_mut() {
                    let mut raw = [0u8; std::mem::size_of::<Entity>()];
                    let n = raw.len();
                    raw.copy_from_slice(&bytes[pos..pos + n]);
                    *slot = Entity::from_ne_bytes(raw);
                    pos += n;
                }
            }
        }
        out.debug_assert_invariants();
        out
    }

    fn remap_domain(&self, m: &Map) -> Self {
        let new_domain = m.image(&self.domain);
        assert_eq!(
            new_domain.size(),
            self.domain.size(),
            "remap_domain: translation map is not injective on the domain"
        );
        let mut counts: Store<i32> = Store::allocate(new_domain);
        for e in self.domain.iter() {
            counts.set(m.get(e), self.degree(e) as i32);
        }
        let mut out = MultiMap::allocate(&counts);
        for e in self.domain.iter() {
            out.row_mut(m.get(e)).copy_from_slice(self.row(e));
        }
        out
    }
}

fn read_count(bytes: &[u8], pos: &mut usize) -> usize {
    let sz = std::mem::size_of::<u32>();
    assert!(
        *pos + sz <= bytes.len(),
        "multiMap unpack: truncated count header at byte {pos}"
    );
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[*pos..*pos + sz]);
    *pos += sz;
    u32::from_ne_bytes(raw) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MultiMap {
        MultiMap::from_rows([
            (0, &[5, 6][..]),
            (1, &[6][..]),
            (2, &[5][..]),
        ])
    }

    #[test]
    fn rows_and_degrees() {
        let mm = sample();
        assert_eq!(mm.row(0), &[5, 6]);
        assert_eq!(mm.row(1), &[6]);
        assert_eq!(mm.degree(2), 1);
        assert_eq!(mm.num_values(), 4);
    }

    #[test]
    fn image_and_preimage() {
        let mm = sample();
        assert_eq!(mm.image(mm.domain()), EntitySet::interval(5, 6));
        let (exact, partial) = mm.preimage(&EntitySet::singleton(6));
        assert_eq!(exact, EntitySet::singleton(1));
        assert_eq!(partial, EntitySet::from_intervals([(0, 1)]));
    }

    #[test]
    fn preimage_exact_requires_all() {
        let mm = sample();
        let (exact, partial) = mm.preimage(&EntitySet::interval(5, 6));
        assert_eq!(exact, EntitySet::interval(0, 2));
        assert_eq!(partial, EntitySet::interval(0, 2));
    }

    #[test]
    fn compose_rows() {
        let mut mm = sample();
        let dom: EntitySet = [5, 6].into_iter().collect();
        let mut tr = Map::allocate(dom);
        tr.set(5, 50);
        tr.set(6, 60);
        mm.compose(&tr, &EntitySet::interval(0, 2));
        assert_eq!(mm.row(0), &[50, 60]);
        assert_eq!(mm.row(2), &[50]);
    }

    #[test]
    fn pack_unpack_roundtrip_subset() {
        let mm = sample();
        let sub = EntitySet::from_intervals([(0, 0), (2, 2)]);
        let mut buf = Vec::new();
        mm.pack(&sub, &mut buf);
        assert_eq!(buf.len(), mm.pack_size(&sub));
        let t = MultiMap::unpack_concat(&[(sub.clone(), buf)]);
        assert_eq!(t.domain(), &sub);
        assert_eq!(t.row(0), &[5, 6]);
        assert_eq!(t.row(2), &[5]);
    }

    #[test]
    fn unpack_from_two_senders() {
        let a = MultiMap::from_rows([(0, &[1, 2][..])]);
        let b = MultiMap::from_rows([(3, &[9][..]), (4, &[][..])]);
        let mut ba = Vec::new();
        a.pack(&EntitySet::singleton(0), &mut ba);
        let mut bb = Vec::new();
        b.pack(&EntitySet::interval(3, 4), &mut bb);
        let t = MultiMap::unpack_concat(&[
            (EntitySet::singleton(0), ba),
            (EntitySet::interval(3, 4), bb),
        ]);
        assert_eq!(t.row(0), &[1, 2]);
        assert_eq!(t.row(3), &[9]);
        assert_eq!(t.degree(4), 0);
    }

    #[test]
    #[should_panic(expected = "left over")]
    fn trailing_bytes_are_fatal() {
        let mm = sample();
        let sub = EntitySet::singleton(1);
        let mut buf = Vec::new();
        mm.pack(&sub, &mut buf);
        buf.extend_from_slice(&[0u8; 4]);
        let _ = MultiMap::unpack_concat(&[(sub, buf)]);
    }

    #[test]
    fn serde_roundtrip() {
        let mm = sample();
        let s = serde_json::to_string(&mm).unwrap();
        let t: MultiMap = serde_json::from_str(&s).unwrap();
        assert_eq!(mm, t);
    }
}
