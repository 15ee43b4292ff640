#[macro_use]
extern crate criterion;

use criterion::{black_box, Criterion};

use cowbuf::{Buffer, Repr};

fn standard_compare(c: &mut Criterion) {
    const SMALL_LEN: usize = 64;
    const LARGE_LEN: usize = 4096;
    const CHUNK: usize = 16;

    for len in [SMALL_LEN, LARGE_LEN] {
        let data = vec![0xA5u8; len];
        let chunk = Buffer::try_from_slice(&data[..CHUNK]).unwrap();

        c.bench_function(&format!("cowbuf reserved append {} bytes", len), |b| {
            b.iter(|| {
                let mut buf = Buffer::try_heap_reserved(len).unwrap();
                for _ in 0..len / CHUNK {
                    buf.try_append(black_box(&chunk)).unwrap();
                }
                buf
            });
        });

        c.bench_function(&format!("cowbuf unreserved append {} bytes", len), |b| {
            b.iter(|| {
                let mut buf = Buffer::try_heap(0).unwrap();
                for _ in 0..len / CHUNK {
                    buf.try_append(black_box(&chunk)).unwrap();
                }
                buf
            });
        });

        c.bench_function(
            &format!("stdvec with_capacity({0}) extend {0} bytes", len),
            |b| {
                b.iter(|| {
                    let mut buf = Vec::with_capacity(len);
                    for _ in 0..len / CHUNK {
                        buf.extend_from_slice(black_box(&data[..CHUNK]));
                    }
                    buf
                });
            },
        );

        c.bench_function(&format!("cowbuf clone handle {} bytes", len), |b| {
            let buf = Buffer::try_from_slice(&data).unwrap();
            b.iter(|| black_box(&buf).clone());
        });

        c.bench_function(&format!("stdvec clone {} bytes", len), |b| {
            let buf = data.clone();
            b.iter(|| black_box(&buf).clone());
        });

        c.bench_function(&format!("cowbuf deep copy {} bytes", len), |b| {
            let buf = Buffer::try_from_slice(&data).unwrap();
            b.iter(|| black_box(&buf).try_to_owned().unwrap());
        });

        c.bench_function(&format!("cowbuf represent hex {} bytes", len), |b| {
            let buf = Buffer::try_from_slice(&data).unwrap();
            b.iter(|| black_box(&buf).represent(Repr::HEX));
        });
    }
}

criterion_group!(benches, standard_compare);
criterion_main!(benches);
