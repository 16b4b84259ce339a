//! End-to-end assembly and solves through `System`.
//!
//! The distributed tests split a 1D chain of nodes into contiguous ranges,
//! one per rank, each rank also holding the nodes just outside its range as
//! ghosts. Every rank assembles every element whose two nodes it holds;
//! contributions to ghost rows are dropped by the matrix, so each owned row
//! still sees each element once.

use std::rc::Rc;

use approx::assert_abs_diff_eq;
use blocklss::parallel::{Comm, CommPattern, LocalUniverse, SerialComm, UniverseComm};
use blocklss::{
    BlockAccumulator, BlockVector, Layout, LssError, Matrix, PcKind, SolverKind, SolverOptions, System,
    SystemOptions, VariablesDescriptor, Vector,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Pattern of a chain of `n` nodes cut into `nproc` contiguous ranges.
/// Ghosts come first in the setup order.
fn chain_pattern(comm: impl Into<UniverseComm>, n: u64) -> CommPattern {
    let comm: UniverseComm = comm.into();
    let (me, nproc) = (comm.rank() as u64, comm.size() as u64);
    let k = n / nproc;
    let lo = me * k;
    let hi = if me + 1 == nproc { n } else { lo + k };
    let owner = |g: u64| ((g / k).min(nproc - 1)) as usize;
    let mut gid = Vec::new();
    if lo > 0 {
        gid.push(lo - 1);
    }
    if hi < n {
        gid.push(hi);
    }
    gid.extend(lo..hi);
    let rank = gid.iter().map(|&g| owner(g)).collect();
    let mut cp = CommPattern::new(comm);
    cp.setup_from(gid, rank).unwrap();
    cp
}

/// CSR adjacency over local ids: chain neighbours present on this rank,
/// plus any `extra` gid pairs.
fn adjacency(cp: &CommPattern, extra: &[(u64, u64)]) -> (Vec<usize>, Vec<usize>) {
    let mut conn = Vec::new();
    let mut start = vec![0];
    for lid in 0..cp.size() {
        let g = cp.gid(lid);
        let mut neighbours: Vec<u64> = vec![g.wrapping_sub(1), g + 1];
        for &(a, b) in extra {
            if a == g {
                neighbours.push(b);
            }
            if b == g {
                neighbours.push(a);
            }
        }
        conn.extend(neighbours.into_iter().filter_map(|n| cp.lid_of(n)));
        start.push(conn.len());
    }
    (conn, start)
}

/// Chain elements whose two nodes are held locally, as local id pairs.
fn local_elements(cp: &CommPattern) -> Vec<[usize; 2]> {
    (0..cp.size())
        .filter_map(|lid| cp.lid_of(cp.gid(lid) + 1).map(|next| [lid, next]))
        .collect()
}

/// Adds a 1D stiffness element for every equation.
fn add_stiffness(sys: &mut System, acc: &mut BlockAccumulator, element: [usize; 2], neq: usize) {
    acc.reset(0.0);
    acc.set_indices(&element);
    for eq in 0..neq {
        acc.mat[(eq, eq)] = 1.0;
        acc.mat[(eq, neq + eq)] = -1.0;
        acc.mat[(neq + eq, eq)] = -1.0;
        acc.mat[(neq + eq, neq + eq)] = 1.0;
    }
    sys.add_values(acc).unwrap();
}

/// Imposes `value` on `gid` on every rank holding it.
fn fix(sys: &mut System, cp: &CommPattern, gid: u64, eq: usize, value: f64) {
    if let Some(lid) = cp.lid_of(gid) {
        sys.dirichlet(lid, eq, value, true);
    }
}

/// Laplace on a chain with `u(0) = 0`, `u(n-1) = 1` has the linear
/// solution `u(g) = g / (n - 1)` at every node, ghosts included.
fn linear_profile(nproc: usize, solver: SolverOptions) {
    const N: u64 = 24;
    let out = LocalUniverse::run(nproc, |comm| {
        let cp = Rc::new(chain_pattern(comm, N));
        let (conn, start) = adjacency(&cp, &[]);
        let mut sys = System::new(SystemOptions::default().with_solver(solver.clone()));
        sys.create(cp.clone(), 1, &conn, &start).unwrap();
        let mut acc = BlockAccumulator::new(2, 1);
        for element in local_elements(&cp) {
            add_stiffness(&mut sys, &mut acc, element, 1);
        }
        fix(&mut sys, &cp, 0, 0, 0.0);
        fix(&mut sys, &cp, N - 1, 0, 1.0);
        let stats = sys.solve().unwrap();
        let residual = sys.compute_residual().unwrap();
        let values: Vec<(u64, f64)> = (0..cp.size())
            .map(|lid| (cp.gid(lid), sys.solution().get_block_value(lid, 0)))
            .collect();
        (stats.converged, residual, values)
    })
    .unwrap();

    for (converged, residual, values) in out {
        assert!(converged);
        assert!(residual < 1e-8, "residual {}", residual);
        for (g, u) in values {
            assert_abs_diff_eq!(u, g as f64 / (N - 1) as f64, epsilon = 1e-8);
        }
    }
}

#[test]
fn cg_on_one_rank() {
    linear_profile(1, SolverOptions::default().with_tol(1e-12));
}

#[test]
fn cg_on_four_ranks() {
    linear_profile(4, SolverOptions::default().with_tol(1e-12));
}

#[test]
fn jacobi_cg_on_three_ranks() {
    linear_profile(3, SolverOptions::default().with_pc(PcKind::Jacobi).with_tol(1e-12));
}

#[test]
fn bicgstab_on_two_ranks() {
    linear_profile(
        2,
        SolverOptions::default()
            .with_kind(SolverKind::Bicgstab)
            .with_pc(PcKind::BlockJacobi)
            .with_tol(1e-12),
    );
}

#[test]
fn direct_lu_on_one_rank() {
    linear_profile(1, SolverOptions::default().with_kind(SolverKind::DirectLu));
}

#[test]
fn direct_lu_is_refused_on_several_ranks() {
    let out = LocalUniverse::run(2, |comm| {
        let cp = Rc::new(chain_pattern(comm, 8));
        let (conn, start) = adjacency(&cp, &[]);
        let opts = SystemOptions::default().with_solver(SolverOptions::default().with_kind(SolverKind::DirectLu));
        let mut sys = System::new(opts);
        let err = sys.create(cp, 1, &conn, &start);
        (matches!(err, Err(LssError::NotSupported(_))), sys.is_created().unwrap())
    })
    .unwrap();
    assert!(out.iter().all(|&(refused, created)| refused && !created));
}

/// Two variables in blocked storage, each with its own boundary values,
/// solved together on two ranks.
#[test]
fn blocked_variables_on_two_ranks() {
    const N: u64 = 10;
    let out = LocalUniverse::run(2, |comm| {
        let cp = Rc::new(chain_pattern(comm, N));
        let (conn, start) = adjacency(&cp, &[]);
        let vars = VariablesDescriptor::new()
            .with_variable("p", 1)
            .unwrap()
            .with_variable("t", 1)
            .unwrap();
        let opts = SystemOptions::default()
            .with_layout(Layout::Blocked)
            .with_solver(SolverOptions::default().with_pc(PcKind::BlockJacobi).with_tol(1e-12));
        let mut sys = System::new(opts);
        sys.create_blocked(cp.clone(), &vars, &conn, &start).unwrap();
        let mut acc = BlockAccumulator::new(2, 2);
        for element in local_elements(&cp) {
            add_stiffness(&mut sys, &mut acc, element, 2);
        }
        fix(&mut sys, &cp, 0, 0, 1.0);
        fix(&mut sys, &cp, N - 1, 0, 1.0);
        fix(&mut sys, &cp, 0, 1, -2.0);
        fix(&mut sys, &cp, N - 1, 1, 7.0);
        sys.solve().unwrap();
        (0..cp.size())
            .map(|lid| {
                (
                    cp.gid(lid),
                    sys.solution().get_block_value(lid, 0),
                    sys.solution().get_block_value(lid, 1),
                )
            })
            .collect::<Vec<_>>()
    })
    .unwrap();

    for (g, p, t) in out.into_iter().flatten() {
        assert_abs_diff_eq!(p, 1.0, epsilon = 1e-8);
        assert_abs_diff_eq!(t, -2.0 + 9.0 * g as f64 / (N - 1) as f64, epsilon = 1e-8);
    }
}

/// Ghost rows of a vector are refreshed from their owners, whatever the
/// layout.
#[test]
fn vector_sync_fills_ghost_rows() {
    for layout in [Layout::Interleaved, Layout::Blocked] {
        let out = LocalUniverse::run(3, |comm| {
            let cp = Rc::new(chain_pattern(comm, 12));
            let vars = VariablesDescriptor::new()
                .with_variable("a", 1)
                .unwrap()
                .with_variable("b", 2)
                .unwrap();
            let map = blocklss::IndexMap::with_layout(&cp, &vars, layout).unwrap();
            let mut v = BlockVector::new();
            v.create_with_map(cp.clone(), Rc::new(map)).unwrap();
            v.reset(-1.0);
            for lid in 0..cp.num_updatable() {
                for eq in 0..3 {
                    v.set_block_value(lid, eq, cp.gid(lid) as f64 * 3.0 + eq as f64);
                }
            }
            v.sync().unwrap();
            (0..cp.size())
                .flat_map(|lid| (0..3).map(move |eq| (lid, eq)))
                .map(|(lid, eq)| (cp.gid(lid), eq, v.get_block_value(lid, eq)))
                .collect::<Vec<_>>()
        })
        .unwrap();
        for (g, eq, value) in out.into_iter().flatten() {
            assert_eq!(value, g as f64 * 3.0 + eq as f64, "{:?}", layout);
        }
    }
}

/// Repeated, overlapping and shuffled contributions sum up exactly as the
/// reference computed element by element.
#[test]
fn shuffled_accumulation_matches_reference() {
    const N: usize = 8;
    const NEQ: usize = 2;
    let mut rng = StdRng::seed_from_u64(42);

    let mut cp = CommPattern::new(SerialComm);
    cp.setup_from((0..N as u64).collect(), vec![0; N]).unwrap();
    let cp = Rc::new(cp);
    let mut conn = Vec::new();
    let mut start = vec![0];
    for i in 0..N {
        conn.extend((0..N).filter(|&j| j != i));
        start.push(conn.len());
    }

    // random elements of 1 to 3 distinct nodes
    let mut elements = Vec::new();
    for _ in 0..40 {
        let mut nodes: Vec<usize> = (0..N).collect();
        nodes.shuffle(&mut rng);
        nodes.truncate(rng.gen_range(1..=3));
        let size = nodes.len() * NEQ;
        let mat: Vec<f64> = (0..size * size).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let rhs: Vec<f64> = (0..size).map(|_| rng.gen_range(-1.0..1.0)).collect();
        elements.push((nodes, mat, rhs));
    }

    let mut dense = vec![vec![0.0; N * NEQ]; N * NEQ];
    let mut reference_rhs = vec![0.0; N * NEQ];
    for (nodes, mat, rhs) in &elements {
        let size = nodes.len() * NEQ;
        for (i, &bi) in nodes.iter().enumerate() {
            for a in 0..NEQ {
                reference_rhs[bi * NEQ + a] += rhs[i * NEQ + a];
                for (j, &bj) in nodes.iter().enumerate() {
                    for b in 0..NEQ {
                        dense[bi * NEQ + a][bj * NEQ + b] += mat[(i * NEQ + a) * size + j * NEQ + b];
                    }
                }
            }
        }
    }

    for _ in 0..3 {
        elements.shuffle(&mut rng);
        let mut sys = System::new(SystemOptions::default());
        sys.create(cp.clone(), NEQ, &conn, &start).unwrap();
        let mut acc = BlockAccumulator::new(1, NEQ);
        for (nodes, mat, rhs) in &elements {
            let size = nodes.len() * NEQ;
            acc.resize(nodes.len(), NEQ);
            acc.set_indices(nodes);
            acc.mat = faer::Mat::from_fn(size, size, |r, c| mat[r * size + c]);
            acc.rhs.copy_from_slice(rhs);
            sys.add_values(&acc).unwrap();
        }
        for row in 0..N * NEQ {
            assert_abs_diff_eq!(sys.rhs().get_value(row), reference_rhs[row], epsilon = 1e-12);
            for col in 0..N * NEQ {
                assert_abs_diff_eq!(sys.matrix().get_value(row, col).unwrap(), dense[row][col], epsilon = 1e-12);
            }
        }
    }
}

/// A periodic chain: the last node is an image of the first. Both rows
/// carry the union of their couplings so they can be tied.
#[test]
fn periodic_chain_conserves_and_solves() {
    const N: u64 = 9;
    let mut cp = CommPattern::new(SerialComm);
    cp.setup_from((0..N).collect(), vec![0; N as usize]).unwrap();
    let cp = Rc::new(cp);
    let extra = [(0, N - 1), (0, N - 2), (1, N - 1)];
    let (conn, start) = adjacency(&cp, &extra);

    let solver = SolverOptions::default().with_kind(SolverKind::DirectLu);
    let mut sys = System::new(SystemOptions::default().with_solver(solver));
    sys.create(cp.clone(), 1, &conn, &start).unwrap();
    let mut acc = BlockAccumulator::new(2, 1);
    for element in local_elements(&cp) {
        add_stiffness(&mut sys, &mut acc, element, 1);
        acc.reset(0.0);
        acc.rhs.copy_from_slice(&[0.5, 0.5]);
        sys.add_values(&acc).unwrap();
    }
    let last = (N - 1) as usize;
    sys.solution_mut().set_block_value(0, 0, 4.0);
    sys.solution_mut().set_block_value(last, 0, 2.0);
    let (rhs_to, rhs_from) = (sys.rhs().get_value(0), sys.rhs().get_value(last));

    sys.periodicity(0, last).unwrap();
    assert_eq!(sys.rhs().get_value(0), rhs_to + rhs_from);
    assert_eq!(sys.rhs().get_value(last), 0.0);
    assert_eq!(sys.solution().get_value(0), 3.0);
    assert_eq!(sys.solution().get_value(last), 3.0);

    // pin the middle node to remove the constant null space
    sys.dirichlet(4, 0, 0.0, false);
    let stats = sys.solve().unwrap();
    assert!(stats.converged);
    assert_abs_diff_eq!(sys.solution().get_value(0), sys.solution().get_value(last), epsilon = 1e-8);
    assert!(sys.compute_residual().unwrap() < 1e-8);
}
