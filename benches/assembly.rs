use std::rc::Rc;

use blocklss::parallel::{CommPattern, SerialComm};
use blocklss::{BlockAccumulator, PcKind, SolverOptions, System, SystemOptions};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const N: usize = 2000;
const NEQ: usize = 3;

fn chain() -> (Rc<CommPattern>, Vec<usize>, Vec<usize>) {
    let mut cp = CommPattern::new(SerialComm);
    cp.setup_from((0..N as u64).collect(), vec![0; N]).unwrap();
    let mut conn = Vec::new();
    let mut start = vec![0];
    for i in 0..N {
        if i > 0 {
            conn.push(i - 1);
        }
        if i + 1 < N {
            conn.push(i + 1);
        }
        start.push(conn.len());
    }
    (Rc::new(cp), conn, start)
}

fn assemble(sys: &mut System, acc: &mut BlockAccumulator) {
    sys.reset(0.0);
    for e in 0..N - 1 {
        acc.set_indices(&[e, e + 1]);
        sys.add_values(acc).unwrap();
    }
}

fn element() -> BlockAccumulator {
    let mut acc = BlockAccumulator::new(2, NEQ);
    for eq in 0..NEQ {
        acc.mat[(eq, eq)] = 1.0 + eq as f64;
        acc.mat[(eq, NEQ + eq)] = -1.0;
        acc.mat[(NEQ + eq, eq)] = -1.0;
        acc.mat[(NEQ + eq, NEQ + eq)] = 1.0 + eq as f64;
        acc.rhs[eq] = 1.0;
        acc.rhs[NEQ + eq] = 1.0;
    }
    acc
}

fn bench_assembly(c: &mut Criterion) {
    let (cp, conn, start) = chain();
    let mut acc = element();

    let mut sys = System::new(SystemOptions::default());
    sys.create(cp.clone(), NEQ, &conn, &start).unwrap();
    c.bench_function("add_values chain", |b| {
        b.iter(|| assemble(black_box(&mut sys), &mut acc))
    });

    let opts = SystemOptions::default().with_solver(SolverOptions::default().with_pc(PcKind::BlockJacobi));
    let mut sys = System::new(opts);
    sys.create(cp, NEQ, &conn, &start).unwrap();
    c.bench_function("assemble and solve chain", |b| {
        b.iter(|| {
            assemble(&mut sys, &mut acc);
            sys.dirichlet(0, 0, 0.0, true);
            sys.dirichlet(0, 1, 0.0, true);
            sys.dirichlet(0, 2, 0.0, true);
            black_box(sys.solve().unwrap())
        })
    });
}

criterion_group!(benches, bench_assembly);
criterion_main!(benches);
