//! End-to-end grid distribution over two ranks: derived partitions,
//! redistribution, renumbering, and the resulting ownership invariants.

use mesh_dist::comm::communicator::LocalComm;
use mesh_dist::grid::{distribute_grid, GridChunk, GridDistribution, PartitionOptions};
use mesh_dist::prelude::*;

fn run_universe<F, R>(n: usize, f: F) -> Vec<R>
where
    F: Fn(LocalComm) -> R + Send + Sync + Clone + 'static,
    R: Send + 'static,
{
    let handles: Vec<_> = LocalComm::universe(n)
        .into_iter()
        .map(|comm| {
            let f = f.clone();
            std::thread::spawn(move || f(comm))
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

/// A strip of four quad cells over ten nodes and five faces:
///
/// cells:  0 | 1 | 2 | 3      (cell r*2, r*2+1 on rank r)
/// faces:  f0 f1 f2 f3 f4     (f0..f2 on rank 0, f3..f4 on rank 1)
/// f0: boundary|0, f1: 0|1, f2: 1|2, f3: 2|3, f4: 3|boundary
fn strip_chunk(rank: usize) -> GridChunk {
    if rank == 0 {
        let mut pos: Store<[f64; 3]> = Store::allocate(EntitySet::interval(0, 4));
        for e in 0..=4 {
            pos.set(e, [e as f64, 0.0, 0.0]);
        }
        let face2node = MultiMap::from_rows([
            (0, &[0, 1][..]),
            (1, &[1, 2, 3][..]),
            (2, &[3, 4, 5][..]),
        ]);
        let faces = EntitySet::interval(0, 2);
        let mut cl = Map::allocate(faces.clone());
        let mut cr = Map::allocate(faces);
        cl.set(0, 0);
        cr.set(0, -1);
        cl.set(1, 0);
        cr.set(1, 1);
        cl.set(2, 1);
        cr.set(2, 2);
        GridChunk {
            cells: EntitySet::interval(0, 1),
            pos,
            face2node,
            cl,
            cr,
        }
    } else {
        let mut pos: Store<[f64; 3]> = Store::allocate(EntitySet::interval(5, 9));
        for e in 5..=9 {
            pos.set(e, [e as f64, 0.0, 0.0]);
        }
        let face2node = MultiMap::from_rows([(3, &[5, 6, 7][..]), (4, &[7, 8, 9][..])]);
        let faces = EntitySet::interval(3, 4);
        let mut cl = Map::allocate(faces.clone());
        let mut cr = Map::allocate(faces);
        cl.set(3, 2);
        cr.set(3, 3);
        cl.set(4, 3);
        cr.set(4, -2);
        GridChunk {
            cells: EntitySet::interval(2, 3),
            pos,
            face2node,
            cl,
            cr,
        }
    }
}

#[test]
fn two_rank_naive_distribution() {
    let results: Vec<GridDistribution> = run_universe(2, |comm| {
        let chunk = strip_chunk(comm.rank());
        distribute_grid(
            &chunk,
            &comm,
            PartitionOptions {
                use_graph_partitioner: false,
            },
        )
        .unwrap()
    });

    // Global invariants over both ranks' results.
    let cells_universe = EntitySet::interval(0, 3);
    let cell_parts: Vec<EntitySet> = results.iter().map(|r| r.chunk.cells.clone()).collect();
    validate_partition(&cell_parts, &cells_universe).unwrap();

    let face_parts: Vec<EntitySet> = results
        .iter()
        .map(|r| Container::domain(&r.chunk.cl).clone())
        .collect();
    validate_partition(&face_parts, &EntitySet::interval(0, 4)).unwrap();

    let node_parts: Vec<EntitySet> = results
        .iter()
        .map(|r| r.chunk.pos.domain().clone())
        .collect();
    validate_partition(&node_parts, &EntitySet::interval(0, 9)).unwrap();

    for r in &results {
        let faces = Container::domain(&r.chunk.cl).clone();
        for f in faces.iter() {
            let (l, rr) = (r.chunk.cl.get(f), r.chunk.cr.get(f));
            // at least one real cell per face, and real references stay in range
            assert!(l >= 0 || rr >= 0);
            for c in [l, rr] {
                if c >= 0 {
                    assert!(cells_universe.contains(c), "cell reference {c} out of range");
                }
            }
            if l >= 0 && rr >= 0 {
                assert_ne!(l, rr, "interior face {f} collapsed");
            }
            // node rings reference renumbered nodes
            for &nd in r.chunk.face2node.row(f) {
                assert!((0..=9).contains(&nd), "node reference {nd} out of range");
            }
        }
        // positions rode along: with this fixture the node renumbering is the
        // identity, so new node e still sits at x = e
        for (e, p) in r.chunk.pos.iter() {
            assert_eq!(p[0], e as f64);
        }
    }

    // The interior face between cells 1 and 2 crosses the rank boundary; the
    // higher rank owns it, so rank 1 holds three faces.
    assert_eq!(face_parts[0].size(), 2);
    assert_eq!(face_parts[1].size(), 3);
}

#[test]
fn four_cells_on_one_rank_matches_serial() {
    // the same strip run serially: nothing moves, everything renumbers to
    // contiguous blocks from zero
    let pos_dom = EntitySet::interval(0, 9);
    let mut pos: Store<[f64; 3]> = Store::allocate(pos_dom);
    for e in 0..=9 {
        pos.set(e, [e as f64, 0.0, 0.0]);
    }
    let face2node = MultiMap::from_rows([
        (0, &[0, 1][..]),
        (1, &[1, 2, 3][..]),
        (2, &[3, 4, 5][..]),
        (3, &[5, 6, 7][..]),
        (4, &[7, 8, 9][..]),
    ]);
    let faces = EntitySet::interval(0, 4);
    let mut cl = Map::allocate(faces.clone());
    let mut cr = Map::allocate(faces);
    for (f, (l, r)) in [(0, (0, -1)), (1, (0, 1)), (2, (1, 2)), (3, (2, 3)), (4, (3, -2))] {
        cl.set(f, l);
        cr.set(f, r);
    }
    let chunk = GridChunk {
        cells: EntitySet::interval(0, 3),
        pos,
        face2node,
        cl,
        cr,
    };
    let out = distribute_grid(
        &chunk,
        &NoComm,
        PartitionOptions {
            use_graph_partitioner: false,
        },
    )
    .unwrap();
    assert_eq!(out.chunk.cells, EntitySet::interval(0, 3));
    assert_eq!(Container::domain(&out.chunk.cl), &EntitySet::interval(0, 4));
    assert_eq!(out.chunk.pos.domain(), &EntitySet::interval(0, 9));
    // serial renumbering is the identity, so connectivity is unchanged
    assert_eq!(out.chunk.cl.get(2), 1);
    assert_eq!(out.chunk.cr.get(2), 2);
    assert_eq!(out.chunk.face2node.row(1), &[1, 2, 3]);
}
